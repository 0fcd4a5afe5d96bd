//! CSV export of finished workout history.
//!
//! One row per completed set. The file is written to a temporary sibling,
//! synced, and renamed over the destination so a reader never sees a partial
//! export.

use crate::catalog::ExerciseCatalog;
use crate::graph::{Graph, WorkoutOrder};
use crate::types::SetTag;
use crate::Result;
use std::path::Path;
use tempfile::NamedTempFile;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    workout_id: String,
    workout_title: Option<String>,
    started_at: Option<String>,
    ended_at: Option<String>,
    exercise_id: String,
    exercise_title: Option<String>,
    set_number: u32,
    weight: f64,
    reps: u32,
    rpe: Option<f64>,
    tag: Option<SetTag>,
    comment: String,
}

fn rows(graph: &Graph, catalog: &ExerciseCatalog) -> Vec<CsvRow> {
    let mut rows = Vec::new();
    for workout in graph.workouts_where(|w| !w.is_active, WorkoutOrder::StartAscending) {
        for exercise in graph.exercises_of(workout.id) {
            let completed = graph.sets_of(exercise.id).into_iter().filter(|s| s.is_completed);
            for (set_number, set) in (1u32..).zip(completed) {
                rows.push(CsvRow {
                    workout_id: workout.id.to_string(),
                    workout_title: workout.title.clone(),
                    started_at: workout.start.map(|t| t.to_rfc3339()),
                    ended_at: workout.end.map(|t| t.to_rfc3339()),
                    exercise_id: exercise.exercise_id.clone(),
                    exercise_title: catalog.get(&exercise.exercise_id).map(|e| e.title.clone()),
                    set_number,
                    weight: set.weight,
                    reps: set.reps,
                    rpe: set.rpe.map(|r| r.value()),
                    tag: set.tag,
                    comment: set.comment.clone(),
                });
            }
        }
    }
    rows
}

/// Export finished history to `csv_path`, replacing any previous export.
///
/// Returns the number of rows written.
pub fn export_history_csv(graph: &Graph, catalog: &ExerciseCatalog, csv_path: &Path) -> Result<usize> {
    let rows = rows(graph, catalog);

    let parent = csv_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(true)
            .from_writer(temp.as_file());
        for row in &rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(csv_path).map_err(|e| e.error)?;

    tracing::info!("Exported {} sets to {:?}", rows.len(), csv_path);
    Ok(rows.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::BuiltinCatalog;
    use crate::session::{self, SetInput};
    use crate::store::GraphStore;
    use crate::types::{Rpe, SetTag};
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_export_completed_sets_only() {
        let temp_dir = tempfile::tempdir().unwrap();
        let catalog = ExerciseCatalog::open(
            BuiltinCatalog::packaged().unwrap(),
            temp_dir.path().join("custom.json"),
        )
        .unwrap();
        let store = GraphStore::in_memory();

        let start = Utc.with_ymd_and_hms(2024, 4, 2, 6, 0, 0).unwrap();
        let workout = session::start_workout(&store, start, Some("Morning".into())).unwrap();
        let squat = session::add_exercise(&store, workout.id, "back_squat").unwrap();
        let mut top = SetInput::new(150.0, 3).completed();
        top.rpe = Rpe::new(9.0);
        top.tag = Some(SetTag::Failure);
        session::add_set(&store, squat.id, SetInput::new(60.0, 8).completed()).unwrap();
        session::add_set(&store, squat.id, top).unwrap();
        session::add_set(&store, squat.id, SetInput::new(150.0, 3)).unwrap();
        session::finish_workout(&store, workout.id, start + chrono::Duration::hours(1)).unwrap();

        // The active workout is not history yet
        let active = session::start_workout(&store, start + chrono::Duration::days(1), None).unwrap();
        let bench = session::add_exercise(&store, active.id, "bench_press").unwrap();
        session::add_set(&store, bench.id, SetInput::new(80.0, 5).completed()).unwrap();

        let csv_path = temp_dir.path().join("out").join("history.csv");
        let written = export_history_csv(&store.snapshot(), &catalog, &csv_path).unwrap();
        assert_eq!(written, 2);

        let mut reader = csv::Reader::from_path(&csv_path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(&headers[0], "workout_id");
        let records: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(&records[1][5], "Back Squat");
        assert_eq!(&records[1][6], "2");
        assert_eq!(&records[1][9], "9.0");
        assert_eq!(&records[1][10], "failure");
    }

    #[test]
    fn test_export_replaces_previous_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let catalog = ExerciseCatalog::open(
            BuiltinCatalog::packaged().unwrap(),
            temp_dir.path().join("custom.json"),
        )
        .unwrap();
        let csv_path = temp_dir.path().join("history.csv");
        std::fs::write(&csv_path, "stale").unwrap();

        let written = export_history_csv(&GraphStore::in_memory().snapshot(), &catalog, &csv_path).unwrap();
        assert_eq!(written, 0);
        assert!(!std::fs::read_to_string(&csv_path).unwrap().contains("stale"));
    }
}
