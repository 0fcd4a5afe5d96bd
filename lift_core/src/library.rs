//! The data layer as one handle.
//!
//! [`Library`] opens the graph store, the exercise catalog and the restore
//! journal from a data directory, finishes any restore a previous process
//! left half done, and exposes the operations front ends need.

use crate::backup;
use crate::catalog::{BuiltinCatalog, ExerciseCatalog};
use crate::config::Config;
use crate::export;
use crate::journal::{self, FileJournal, RecoveryOutcome};
use crate::notifier::Notifier;
use crate::restore::{RestoreMonitor, RestoreOrchestrator};
use crate::session;
use crate::store::GraphStore;
use crate::types::*;
use crate::{Error, Result};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

pub struct Library {
    config: Config,
    store: GraphStore,
    catalog: Mutex<ExerciseCatalog>,
    journal: Mutex<FileJournal>,
    notifier: Notifier,
    monitor: Arc<RestoreMonitor>,
    _notifier_thread: Option<JoinHandle<()>>,
}

impl Library {
    /// Open everything under the configured data directory
    pub fn open(config: Config) -> Result<Self> {
        let data = &config.data;
        std::fs::create_dir_all(&data.data_dir)?;

        let builtin = BuiltinCatalog::packaged()?;
        let store = GraphStore::open(data.graph_path())?;
        let mut catalog = ExerciseCatalog::open(builtin, data.custom_catalog_path())?;
        let mut journal = FileJournal::new(data.journal_path());

        match journal::recover_interrupted_restore(&mut journal, &store, &mut catalog)? {
            RecoveryOutcome::Clean => {}
            outcome => tracing::warn!("Recovered interrupted restore: {:?}", outcome),
        }

        let notifier = Notifier::new();
        let notifier_thread = if config.notifier.enabled {
            Some(notifier.spawn(&store)?)
        } else {
            None
        };

        tracing::info!("Library opened at {:?}", data.data_dir);
        Ok(Self {
            config,
            store,
            catalog: Mutex::new(catalog),
            journal: Mutex::new(journal),
            notifier,
            monitor: Arc::new(RestoreMonitor::new()),
            _notifier_thread: notifier_thread,
        })
    }

    /// Open with defaults rooted at `data_dir`
    pub fn open_dir(data_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open(Config::default().with_data_dir(data_dir.as_ref()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    /// Shared restore signal for collaborators that must pause during a restore
    pub fn restore_monitor(&self) -> Arc<RestoreMonitor> {
        Arc::clone(&self.monitor)
    }

    pub fn is_restore_in_progress(&self) -> bool {
        self.monitor.is_restore_in_progress()
    }

    // ------------------------------------------------------------------
    // Catalog
    // ------------------------------------------------------------------

    pub fn exercises(&self) -> Vec<Exercise> {
        self.lock_catalog().list_all().into_iter().cloned().collect()
    }

    pub fn exercise(&self, id: &str) -> Option<Exercise> {
        self.lock_catalog().get(id).cloned()
    }

    pub fn create_exercise(&self, draft: ExerciseDraft) -> Result<Exercise> {
        let created = self.lock_catalog().create(draft)?;
        self.notifier.publish_catalog(&[created.id.clone()], false);
        Ok(created)
    }

    pub fn update_exercise(&self, id: &str, draft: ExerciseDraft) -> Result<Exercise> {
        let updated = self.lock_catalog().update(id, draft)?;
        self.notifier.publish_catalog(&[updated.id.clone()], false);
        Ok(updated)
    }

    /// Delete a custom exercise that no workout or routine uses any more.
    /// Backups must be able to resolve every exercise their history names.
    pub fn delete_exercise(&self, id: &str) -> Result<Exercise> {
        let mut catalog = self.lock_catalog();
        if self.store.snapshot().references_exercise(id) {
            return Err(Error::Catalog(format!(
                "exercise '{}' is still used by workouts or routines",
                id
            )));
        }
        let deleted = catalog.delete(id)?;
        drop(catalog);
        self.notifier.publish_catalog(&[deleted.id.clone()], true);
        Ok(deleted)
    }

    /// Add an exercise to a workout after checking the catalog knows it
    pub fn add_exercise_to_workout(&self, workout_id: EntityId, exercise_id: &str) -> Result<WorkoutExercise> {
        // Held across the commit so a concurrent delete cannot slip in between
        let catalog = self.lock_catalog();
        if !catalog.contains(exercise_id) {
            return Err(Error::NotFound(format!("exercise '{}'", exercise_id)));
        }
        session::add_exercise(&self.store, workout_id, exercise_id)
    }

    // ------------------------------------------------------------------
    // Backup / restore / export
    // ------------------------------------------------------------------

    /// Encode templates, finished history and custom exercises
    pub fn create_backup_snapshot(&self) -> Result<Vec<u8>> {
        let graph = self.store.snapshot();
        let snapshot = {
            let catalog = self.lock_catalog();
            backup::create_snapshot(&graph, catalog.custom_entries(), Utc::now())
        };
        let bytes = backup::encode(&snapshot, self.config.backup.pretty)?;
        tracing::info!(
            "Created backup: {} workouts, {} routines, {} custom exercises",
            snapshot.workout_history.len(),
            snapshot.routine_templates.len(),
            snapshot.custom_catalog_entries.len()
        );
        Ok(bytes)
    }

    /// Replace templates, history and custom exercises with a backup's.
    /// Nothing changes if it fails.
    pub fn restore_from_snapshot(&self, bytes: &[u8]) -> Result<()> {
        if self.monitor.is_restore_in_progress() {
            return Err(Error::RestoreInProgress);
        }
        let mut catalog = self.lock_catalog();
        let mut journal = self.journal.lock().unwrap_or_else(PoisonError::into_inner);

        let before: BTreeSet<String> = catalog.custom_entries().iter().map(|e| e.id.clone()).collect();
        RestoreOrchestrator::new(&self.store, &mut catalog, &self.monitor)
            .with_journal(&mut *journal)
            .run(bytes)?;
        let after: BTreeSet<String> = catalog.custom_entries().iter().map(|e| e.id.clone()).collect();
        drop(journal);
        drop(catalog);

        let removed: Vec<String> = before.difference(&after).cloned().collect();
        let current: Vec<String> = after.into_iter().collect();
        self.notifier.publish_catalog(&removed, true);
        self.notifier.publish_catalog(&current, false);
        Ok(())
    }

    pub fn export_history_csv(&self, path: &Path) -> Result<usize> {
        let graph = self.store.snapshot();
        let catalog = self.lock_catalog();
        export::export_history_csv(&graph, &catalog, path)
    }

    fn lock_catalog(&self) -> MutexGuard<'_, ExerciseCatalog> {
        self.catalog.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::{JournalEntry, RestoreJournal};
    use crate::notifier::AggregateRoot;
    use crate::session::SetInput;
    use std::time::Duration;

    fn log_finished_workout(library: &Library) -> Workout {
        let now = Utc::now() - chrono::Duration::hours(2);
        let workout = session::start_workout(library.store(), now, None).unwrap();
        let exercise = library.add_exercise_to_workout(workout.id, "overhead_press").unwrap();
        session::add_set(library.store(), exercise.id, SetInput::new(50.0, 5).completed()).unwrap();
        session::finish_workout(library.store(), workout.id, now + chrono::Duration::hours(1)).unwrap();
        workout
    }

    #[test]
    fn test_backup_restores_into_fresh_library() {
        crate::logging::init_test();
        let source_dir = tempfile::tempdir().unwrap();
        let source = Library::open_dir(source_dir.path()).unwrap();
        let custom = source.create_exercise(ExerciseDraft::titled("Viking Press")).unwrap();
        let workout = log_finished_workout(&source);
        let bytes = source.create_backup_snapshot().unwrap();

        let target_dir = tempfile::tempdir().unwrap();
        let target = Library::open_dir(target_dir.path()).unwrap();
        target.restore_from_snapshot(&bytes).unwrap();

        assert!(target.store().snapshot().workout(workout.id).is_some());
        assert_eq!(target.exercise(&custom.id), Some(custom));
        assert!(!target.is_restore_in_progress());

        // Survives reopening
        drop(target);
        let reopened = Library::open_dir(target_dir.path()).unwrap();
        assert!(reopened.store().snapshot().workout(workout.id).is_some());
    }

    #[test]
    fn test_used_custom_exercise_kept_so_backup_restores() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::open_dir(dir.path()).unwrap();
        let used = library.create_exercise(ExerciseDraft::titled("Viking Press")).unwrap();
        let unused = library.create_exercise(ExerciseDraft::titled("Sled Push")).unwrap();

        let start = Utc::now() - chrono::Duration::hours(1);
        let workout = session::start_workout(library.store(), start, None).unwrap();
        let exercise = library.add_exercise_to_workout(workout.id, &used.id).unwrap();
        session::add_set(library.store(), exercise.id, SetInput::new(40.0, 10).completed()).unwrap();
        session::finish_workout(library.store(), workout.id, Utc::now()).unwrap();

        let err = library.delete_exercise(&used.id).unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
        assert_eq!(library.exercise(&used.id), Some(used.clone()));
        library.delete_exercise(&unused.id).unwrap();

        let bytes = library.create_backup_snapshot().unwrap();
        library.restore_from_snapshot(&bytes).unwrap();
        assert!(library.store().snapshot().workout(workout.id).is_some());
        assert_eq!(library.exercise(&used.id), Some(used));
        assert_eq!(library.exercise(&unused.id), None);
    }

    #[test]
    fn test_unknown_exercise_not_added() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::open_dir(dir.path()).unwrap();
        let workout = session::start_workout(library.store(), Utc::now(), None).unwrap();

        let err = library.add_exercise_to_workout(workout.id, "nope").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_catalog_and_graph_events_share_stream() {
        let dir = tempfile::tempdir().unwrap();
        let library = Library::open_dir(dir.path()).unwrap();
        let events = library.notifier().subscribe();

        let custom = library.create_exercise(ExerciseDraft::titled("Hack Squat")).unwrap();
        let first = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.root, AggregateRoot::Exercise(custom.id));

        let workout = session::start_workout(library.store(), Utc::now(), None).unwrap();
        let second = events.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.root, AggregateRoot::Workout(workout.id));
    }

    #[test]
    fn test_open_rolls_back_interrupted_restore() {
        let dir = tempfile::tempdir().unwrap();
        let kept = {
            let library = Library::open_dir(dir.path()).unwrap();
            library.create_exercise(ExerciseDraft::titled("Kept")).unwrap()
        };

        // Simulate a crash after the catalog was replaced but before the commit
        let config = Config::default().with_data_dir(dir.path());
        let mut journal = FileJournal::new(config.data.journal_path());
        journal
            .begin(&JournalEntry {
                restore_id: uuid::Uuid::new_v4(),
                started_at: Utc::now(),
                undo_catalog: vec![kept.clone()],
            })
            .unwrap();
        std::fs::write(config.data.custom_catalog_path(), "[]").unwrap();

        let library = Library::open(config).unwrap();
        assert_eq!(library.exercise(&kept.id), Some(kept));
        assert!(!library.config().data.journal_path().exists());
    }
}
