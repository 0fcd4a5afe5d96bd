use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use lift_core::session;
use lift_core::templates;
use lift_core::*;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "lift")]
#[command(about = "Strength workout tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse and edit the exercise catalog
    Exercises {
        #[command(subcommand)]
        command: ExerciseCommand,
    },

    /// Record a workout session
    Workout {
        #[command(subcommand)]
        command: WorkoutCommand,
    },

    /// Manage routine templates
    Routine {
        #[command(subcommand)]
        command: RoutineCommand,
    },

    /// Show finished workouts, newest first
    History {
        /// Only show sets of this exercise id
        #[arg(long)]
        exercise: Option<String>,

        /// Maximum number of workouts to show
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// Write a backup snapshot of templates, history and custom exercises
    Backup { file: PathBuf },

    /// Replace templates, history and custom exercises with a backup
    Restore { file: PathBuf },

    /// Export completed sets of finished workouts as CSV
    ExportCsv { file: PathBuf },
}

#[derive(Subcommand)]
enum ExerciseCommand {
    /// List built-in and custom exercises
    List {
        /// Only custom exercises
        #[arg(long)]
        custom: bool,
    },
    /// Add a custom exercise
    Add {
        title: String,
        /// Primary muscle group (repeatable)
        #[arg(long = "muscle")]
        muscles: Vec<String>,
        /// Required equipment (repeatable)
        #[arg(long)]
        equipment: Vec<String>,
    },
    /// Rename a custom exercise
    Rename { id: String, title: String },
    /// Remove a custom exercise
    Remove { id: String },
}

#[derive(Subcommand)]
enum WorkoutCommand {
    /// Start a new workout
    Start {
        #[arg(long)]
        title: Option<String>,
        /// Lay the workout out from a routine
        #[arg(long, conflicts_with = "title")]
        routine: Option<Uuid>,
    },
    /// Log a set in the active workout
    Log {
        exercise: String,
        #[arg(long)]
        weight: f64,
        #[arg(long)]
        reps: u32,
        /// Target rep range, e.g. 8-12
        #[arg(long, value_parser = parse_rep_range)]
        target: Option<RepRange>,
        #[arg(long)]
        rpe: Option<f64>,
        #[arg(long, value_enum)]
        tag: Option<TagArg>,
        /// Mark the set as completed
        #[arg(long)]
        done: bool,
    },
    /// Mark a set completed
    Complete { set: Uuid },
    /// Finish the active workout
    Finish,
    /// Start a new workout with the structure of a finished one
    Repeat { workout: Uuid },
    /// Delete a workout
    Delete { workout: Uuid },
    /// Show the active workout
    Show,
}

#[derive(Subcommand)]
enum RoutineCommand {
    /// Create a routine
    Create {
        title: String,
        /// Plan to append the routine to
        #[arg(long)]
        plan: Option<Uuid>,
    },
    /// Add an exercise slot to a routine
    Add {
        routine: Uuid,
        exercise: String,
        #[arg(long, default_value_t = 3)]
        sets: u32,
        /// Target rep range, e.g. 8-12
        #[arg(long, value_parser = parse_rep_range)]
        reps: Option<RepRange>,
    },
    /// List routines with their entries
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum TagArg {
    Warmup,
    Drop,
    Failure,
}

impl From<TagArg> for SetTag {
    fn from(tag: TagArg) -> Self {
        match tag {
            TagArg::Warmup => SetTag::Warmup,
            TagArg::Drop => SetTag::Drop,
            TagArg::Failure => SetTag::Failure,
        }
    }
}

fn parse_rep_range(value: &str) -> std::result::Result<RepRange, String> {
    let parse = |s: &str| s.trim().parse::<u32>().map_err(|e| format!("invalid reps '{}': {}", s, e));
    match value.split_once('-') {
        Some((min, max)) => Ok(RepRange::new(parse(min)?, parse(max)?)),
        None => {
            let reps = parse(value)?;
            Ok(RepRange::new(reps, reps))
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    lift_core::logging::init(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let config = match cli.data_dir {
        Some(data_dir) => config.with_data_dir(data_dir),
        None => config,
    };
    tracing::debug!("Using data directory {:?}", config.data.data_dir);
    let library = Library::open(config)?;

    match cli.command {
        Commands::Exercises { command } => cmd_exercises(&library, command),
        Commands::Workout { command } => cmd_workout(&library, command),
        Commands::Routine { command } => cmd_routine(&library, command),
        Commands::History { exercise, limit } => cmd_history(&library, exercise, limit),
        Commands::Backup { file } => cmd_backup(&library, &file),
        Commands::Restore { file } => cmd_restore(&library, &file),
        Commands::ExportCsv { file } => {
            let rows = library.export_history_csv(&file)?;
            println!("✓ Exported {} sets to {}", rows, file.display());
            Ok(())
        }
    }
}

fn cmd_exercises(library: &Library, command: ExerciseCommand) -> Result<()> {
    match command {
        ExerciseCommand::List { custom } => {
            for exercise in library.exercises() {
                if custom && !exercise.is_custom {
                    continue;
                }
                let marker = if exercise.is_custom { "*" } else { " " };
                println!("{} {:<40} {}", marker, exercise.id, exercise.title);
            }
        }
        ExerciseCommand::Add {
            title,
            muscles,
            equipment,
        } => {
            let draft = ExerciseDraft {
                primary_muscles: muscles,
                equipment,
                ..ExerciseDraft::titled(title)
            };
            let exercise = library.create_exercise(draft)?;
            println!("✓ Added exercise {} ({})", exercise.title, exercise.id);
        }
        ExerciseCommand::Rename { id, title } => {
            let current = library
                .exercise(&id)
                .ok_or_else(|| Error::NotFound(format!("exercise '{}'", id)))?;
            let draft = ExerciseDraft {
                title,
                description: current.description,
                primary_muscles: current.primary_muscles,
                secondary_muscles: current.secondary_muscles,
                equipment: current.equipment,
                instructions: current.instructions,
                media: current.media,
            };
            let exercise = library.update_exercise(&id, draft)?;
            println!("✓ Renamed {} to {}", exercise.id, exercise.title);
        }
        ExerciseCommand::Remove { id } => {
            let exercise = library.delete_exercise(&id)?;
            println!("✓ Removed exercise {}", exercise.title);
        }
    }
    Ok(())
}

fn active_workout(library: &Library) -> Result<Workout> {
    library
        .store()
        .snapshot()
        .active_workout()
        .cloned()
        .ok_or_else(|| Error::Session("no workout in progress".into()))
}

fn cmd_workout(library: &Library, command: WorkoutCommand) -> Result<()> {
    let store = library.store();
    match command {
        WorkoutCommand::Start { title, routine } => {
            let workout = match routine {
                Some(routine_id) => session::start_from_routine(store, routine_id, Utc::now())?,
                None => session::start_workout(store, Utc::now(), title)?,
            };
            println!("✓ Started workout {}", workout.id);
        }
        WorkoutCommand::Log {
            exercise,
            weight,
            reps,
            target,
            rpe,
            tag,
            done,
        } => {
            let workout = active_workout(library)?;
            // Reuse the latest slot for this exercise, otherwise append one
            let slot = store
                .snapshot()
                .exercises_of(workout.id)
                .into_iter()
                .rev()
                .find(|e| e.exercise_id == exercise)
                .map(|e| e.id);
            let slot = match slot {
                Some(id) => id,
                None => library.add_exercise_to_workout(workout.id, &exercise)?.id,
            };

            let rpe = match rpe {
                Some(value) => Some(Rpe::new(value).ok_or_else(|| {
                    Error::Session(format!("RPE must be between 6 and 10 in half steps, got {}", value))
                })?),
                None => None,
            };
            let input = SetInput {
                weight,
                reps,
                target_reps: target,
                tag: tag.map(SetTag::from),
                rpe,
                comment: String::new(),
                completed: done,
            };
            let set = session::add_set(store, slot, input)?;
            println!("✓ Logged set {}", set.id);
        }
        WorkoutCommand::Complete { set } => {
            session::set_completed(store, set, true)?;
            println!("✓ Completed set {}", set);
        }
        WorkoutCommand::Finish => {
            let workout = active_workout(library)?;
            let changes = session::finish_workout(store, workout.id, Utc::now())?;
            let pruned = changes.count(ChangeKind::Deleted);
            println!("✓ Finished workout {}", workout.id);
            if pruned > 0 {
                println!("  Removed {} unperformed entries", pruned);
            }
        }
        WorkoutCommand::Repeat { workout } => {
            let repeated = session::repeat_workout(store, workout, Utc::now())?;
            println!("✓ Started workout {}", repeated.id);
        }
        WorkoutCommand::Delete { workout } => {
            session::delete_workout(store, workout)?;
            println!("✓ Deleted workout {}", workout);
        }
        WorkoutCommand::Show => {
            let graph = store.snapshot();
            match graph.active_workout() {
                Some(workout) => display_workout(library, &graph, workout),
                None => println!("No workout in progress."),
            }
        }
    }
    Ok(())
}

fn cmd_routine(library: &Library, command: RoutineCommand) -> Result<()> {
    let store = library.store();
    match command {
        RoutineCommand::Create { title, plan } => {
            let routine = templates::create_routine(store, plan, &title)?;
            println!("✓ Created routine {}", routine.id);
        }
        RoutineCommand::Add {
            routine,
            exercise,
            sets,
            reps,
        } => {
            if library.exercise(&exercise).is_none() {
                return Err(Error::NotFound(format!("exercise '{}'", exercise)));
            }
            let entry = templates::add_routine_entry(store, routine, &exercise, sets, reps)?;
            println!("✓ Added {} to routine {}", entry.exercise_id, routine);
        }
        RoutineCommand::List => {
            let graph = store.snapshot();
            for routine in graph.routines() {
                println!("{}  {}", routine.id, routine.title);
                for entry in graph.entries_of(routine.id) {
                    let reps = entry
                        .target_reps
                        .map(|r| format!(" x {}-{}", r.min, r.max))
                        .unwrap_or_default();
                    println!("    {} sets{}  {}", entry.target_sets, reps, exercise_title(library, &entry.exercise_id));
                }
            }
        }
    }
    Ok(())
}

fn cmd_history(library: &Library, exercise: Option<String>, limit: usize) -> Result<()> {
    let graph = library.store().snapshot();
    match exercise {
        Some(exercise_id) => {
            let entries = graph.exercise_history(&exercise_id);
            if entries.is_empty() {
                println!("No history for {}.", exercise_title(library, &exercise_id));
            }
            for entry in entries.into_iter().take(limit) {
                let sets: Vec<String> = entry
                    .sets
                    .iter()
                    .map(|s| format!("{}x{}", format_weight(s.weight), s.reps))
                    .collect();
                println!("{}  {}", format_date(entry.workout), sets.join(", "));
            }
        }
        None => {
            let finished = graph.finished_workouts();
            if finished.is_empty() {
                println!("No finished workouts.");
            }
            for workout in finished.into_iter().take(limit) {
                let sets = graph.sets_of_workout(workout.id).len();
                println!(
                    "{}  {}  {} ({} sets)",
                    format_date(workout),
                    workout.id,
                    workout.title.as_deref().unwrap_or("Workout"),
                    sets
                );
            }
        }
    }
    Ok(())
}

fn cmd_backup(library: &Library, file: &Path) -> Result<()> {
    let bytes = library.create_backup_snapshot()?;
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(file, &bytes)?;
    println!("✓ Wrote backup to {}", file.display());
    Ok(())
}

fn cmd_restore(library: &Library, file: &Path) -> Result<()> {
    let bytes = std::fs::read(file)?;
    library.restore_from_snapshot(&bytes)?;
    let graph = library.store().snapshot();
    println!(
        "✓ Restored {} workouts and {} routines from {}",
        graph.finished_workouts().len(),
        graph.routines().len(),
        file.display()
    );
    Ok(())
}

fn display_workout(library: &Library, graph: &Graph, workout: &Workout) {
    println!("\n{}", workout.title.as_deref().unwrap_or("Workout"));
    println!("  id: {}", workout.id);
    if let Some(start) = workout.start {
        println!("  started: {}", start.format("%Y-%m-%d %H:%M"));
    }
    for exercise in graph.exercises_of(workout.id) {
        println!("\n  {}", exercise_title(library, &exercise.exercise_id));
        for (number, set) in (1..).zip(graph.sets_of(exercise.id)) {
            let check = if set.is_completed { "✓" } else { " " };
            let rpe = set
                .rpe
                .map(|r| format!(" @{}", r.value()))
                .unwrap_or_default();
            println!(
                "    [{}] {}. {} x {}{}  ({})",
                check,
                number,
                format_weight(set.weight),
                set.reps,
                rpe,
                set.id
            );
        }
    }
    println!();
}

fn exercise_title(library: &Library, exercise_id: &str) -> String {
    library
        .exercise(exercise_id)
        .map(|e| e.title)
        .unwrap_or_else(|| exercise_id.to_string())
}

fn format_date(workout: &Workout) -> String {
    workout
        .start
        .map(|s| s.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| "----------".into())
}

fn format_weight(weight: f64) -> String {
    if weight.fract() == 0.0 {
        format!("{:.0}", weight)
    } else {
        format!("{}", weight)
    }
}
