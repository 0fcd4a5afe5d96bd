//! Restore orchestration.
//!
//! A restore replaces templates, finished history and custom exercises with
//! the contents of a backup snapshot, or changes nothing at all. The graph
//! side is one isolated transaction, so a failure simply drops it. The
//! catalog side is a file, so a failure after it was replaced has to be
//! compensated by writing the previous entries back.

use crate::backup;
use crate::catalog::ExerciseCatalog;
use crate::graph::Entity;
use crate::journal::{JournalEntry, RestoreJournal};
use crate::store::{ChangeSet, GraphStore, Transaction};
use crate::types::{EntityId, Exercise};
use crate::{Error, Result};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Where a restore currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestorePhase {
    Idle,
    Snapshotting,
    Replacing,
    Committing,
    Success,
    RolledBack,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestoreEvent {
    Started,
    Ended { succeeded: bool },
}

/// Shared "restore in progress" signal.
///
/// Collaborators that must stay quiet during a restore (scheduled backups,
/// sync) either poll [`RestoreMonitor::is_restore_in_progress`] or subscribe
/// to start/end events.
#[derive(Debug)]
pub struct RestoreMonitor {
    running: AtomicBool,
    phase: Mutex<RestorePhase>,
    listeners: Mutex<Vec<Sender<RestoreEvent>>>,
}

impl Default for RestoreMonitor {
    fn default() -> Self {
        Self {
            running: AtomicBool::new(false),
            phase: Mutex::new(RestorePhase::Idle),
            listeners: Mutex::new(Vec::new()),
        }
    }
}

impl RestoreMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_restore_in_progress(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Phase of the current restore, or the outcome of the last one
    pub fn phase(&self) -> RestorePhase {
        *lock(&self.phase)
    }

    pub fn subscribe(&self) -> Receiver<RestoreEvent> {
        let (tx, rx) = channel();
        lock(&self.listeners).push(tx);
        rx
    }

    fn try_start(&self) -> bool {
        let started = self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if started {
            self.set_phase(RestorePhase::Snapshotting);
            self.emit(RestoreEvent::Started);
        }
        started
    }

    fn set_phase(&self, phase: RestorePhase) {
        tracing::debug!("Restore phase: {:?}", phase);
        *lock(&self.phase) = phase;
    }

    fn end(&self, outcome: RestorePhase) {
        self.set_phase(outcome);
        self.running.store(false, Ordering::SeqCst);
        self.emit(RestoreEvent::Ended {
            succeeded: outcome == RestorePhase::Success,
        });
    }

    fn emit(&self, event: RestoreEvent) {
        lock(&self.listeners).retain(|listener| listener.send(event).is_ok());
    }
}

/// Deleting templates cleared the active workout's routine link. Put it back
/// when the snapshot brought the same routine back.
fn relink_active_workout(tx: &mut Transaction, workout_id: EntityId, routine_id: EntityId) -> Result<()> {
    if tx.view().routine(routine_id).is_none() {
        tracing::debug!("Routine {} not in snapshot; active workout stays unlinked", routine_id);
        return Ok(());
    }
    if let Some(mut workout) = tx.view().workout(workout_id).cloned() {
        workout.routine_id = Some(routine_id);
        tx.update(Entity::Workout(workout))?;
    }
    Ok(())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Drives one restore from snapshot bytes to a committed store
pub struct RestoreOrchestrator<'a> {
    store: &'a GraphStore,
    catalog: &'a mut ExerciseCatalog,
    monitor: &'a RestoreMonitor,
    journal: Option<&'a mut dyn RestoreJournal>,
}

impl<'a> RestoreOrchestrator<'a> {
    pub fn new(store: &'a GraphStore, catalog: &'a mut ExerciseCatalog, monitor: &'a RestoreMonitor) -> Self {
        Self {
            store,
            catalog,
            monitor,
            journal: None,
        }
    }

    pub fn with_journal(mut self, journal: &'a mut dyn RestoreJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Replace templates, history and custom exercises with the snapshot's.
    ///
    /// On failure the store and the custom catalog are left as they were and
    /// the original error is returned.
    pub fn run(mut self, bytes: &[u8]) -> Result<ChangeSet> {
        if !self.monitor.try_start() {
            tracing::warn!("Refusing restore: another restore is in progress");
            return Err(Error::RestoreInProgress);
        }

        let undo = self.catalog.custom_entries().to_vec();
        let restore_id = Uuid::new_v4();
        tracing::info!("Restore {} started ({} bytes)", restore_id, bytes.len());

        let mut catalog_touched = false;
        match self.replace_and_commit(bytes, &undo, restore_id, &mut catalog_touched) {
            Ok(changes) => {
                self.finish_journal(restore_id);
                tracing::info!(
                    "Restore {} committed at generation {} ({} changes)",
                    restore_id,
                    changes.generation,
                    changes.changes.len()
                );
                self.monitor.end(RestorePhase::Success);
                Ok(changes)
            }
            Err(err) => {
                tracing::warn!("Restore {} failed: {}", restore_id, err);
                if catalog_touched {
                    self.compensate(undo, restore_id);
                } else {
                    self.finish_journal(restore_id);
                }
                self.monitor.end(RestorePhase::RolledBack);
                Err(err)
            }
        }
    }

    fn replace_and_commit(
        &mut self,
        bytes: &[u8],
        undo: &[Exercise],
        restore_id: Uuid,
        catalog_touched: &mut bool,
    ) -> Result<ChangeSet> {
        if let Some(journal) = self.journal.as_mut() {
            journal.begin(&JournalEntry {
                restore_id,
                started_at: Utc::now(),
                undo_catalog: undo.to_vec(),
            })?;
        }

        self.monitor.set_phase(RestorePhase::Replacing);
        let snapshot = backup::decode(bytes)?;
        let mut tx = self.store.begin();
        let active_link = tx
            .view()
            .active_workout()
            .and_then(|w| w.routine_id.map(|routine_id| (w.id, routine_id)));
        let removed = tx.delete_finished_workouts()?;
        tx.delete_templates()?;
        backup::materialize(&snapshot, self.catalog.builtin(), &mut tx)?;
        if let Some((workout_id, routine_id)) = active_link {
            relink_active_workout(&mut tx, workout_id, routine_id)?;
        }
        tx.set_restore_marker(restore_id);
        tracing::debug!(
            "Restore {} staged: {} workouts replaced by {}",
            restore_id,
            removed,
            snapshot.workout_history.len()
        );

        *catalog_touched = true;
        self.catalog.replace_all(snapshot.custom_catalog_entries)?;

        self.monitor.set_phase(RestorePhase::Committing);
        self.store.save(tx)
    }

    /// Put the previous custom entries back after a failed restore
    fn compensate(&mut self, undo: Vec<Exercise>, restore_id: Uuid) {
        match self.catalog.replace_all(undo) {
            Ok(()) => {
                tracing::info!("Restore {} rolled back custom catalog", restore_id);
                self.finish_journal(restore_id);
            }
            Err(e) => {
                // The journal stays so startup recovery can retry the rollback
                tracing::error!("Restore {} could not roll back custom catalog: {}", restore_id, e);
            }
        }
    }

    fn finish_journal(&mut self, restore_id: Uuid) {
        if let Some(journal) = self.journal.as_mut() {
            if let Err(e) = journal.finish(restore_id) {
                tracing::warn!("Failed to clear restore journal for {}: {}", restore_id, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::{create_snapshot, encode};
    use crate::catalog::BuiltinCatalog;
    use crate::graph::Graph;
    use crate::journal::FileJournal;
    use crate::session::{self, SetInput};
    use crate::templates;
    use crate::types::ExerciseDraft;
    use chrono::{DateTime, TimeZone};
    use serde_json::json;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 2, day, hour, 0, 0).unwrap()
    }

    struct Fixture {
        dir: tempfile::TempDir,
        store: GraphStore,
        catalog: ExerciseCatalog,
        monitor: RestoreMonitor,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let store = GraphStore::open(dir.path().join("graph.json")).unwrap();
            let catalog = ExerciseCatalog::open(
                BuiltinCatalog::packaged().unwrap(),
                dir.path().join("custom_exercises.json"),
            )
            .unwrap();
            Self {
                dir,
                store,
                catalog,
                monitor: RestoreMonitor::new(),
            }
        }

        fn restore(&mut self, bytes: &[u8]) -> Result<ChangeSet> {
            RestoreOrchestrator::new(&self.store, &mut self.catalog, &self.monitor).run(bytes)
        }

        fn log_workout(&self, day: u32, exercise_id: &str) {
            let workout = session::start_workout(&self.store, at(day, 9), None).unwrap();
            let exercise = session::add_exercise(&self.store, workout.id, exercise_id).unwrap();
            session::add_set(&self.store, exercise.id, SetInput::new(100.0, 5).completed()).unwrap();
            session::finish_workout(&self.store, workout.id, at(day, 10)).unwrap();
        }

        /// History and templates, without generation or restore marker
        fn content(&self) -> backup::Snapshot {
            create_snapshot(&self.store.snapshot(), self.catalog.custom_entries(), at(28, 0))
        }
    }

    /// A backup taken from a separate store with its own custom exercise
    fn foreign_backup() -> Vec<u8> {
        let mut source = Fixture::new();
        let custom = source.catalog.create(ExerciseDraft::titled("Pendlay Row")).unwrap();
        let routine = templates::create_routine(&source.store, None, "Pull").unwrap();
        templates::add_routine_entry(&source.store, routine.id, &custom.id, 4, None).unwrap();
        let workout = session::start_from_routine(&source.store, routine.id, at(3, 7)).unwrap();
        let exercise = source.store.snapshot().exercises_of(workout.id)[0].id;
        let set = source.store.snapshot().sets_of(exercise)[0].id;
        session::set_completed(&source.store, set, true).unwrap();
        session::finish_workout(&source.store, workout.id, at(3, 8)).unwrap();
        source.log_workout(4, "deadlift");

        let snapshot = create_snapshot(&source.store.snapshot(), source.catalog.custom_entries(), at(5, 0));
        encode(&snapshot, true).unwrap()
    }

    #[test]
    fn test_restore_replaces_everything() {
        let mut f = Fixture::new();
        f.log_workout(1, "bench_press");
        f.catalog.create(ExerciseDraft::titled("Old Custom")).unwrap();

        f.restore(&foreign_backup()).unwrap();

        let content = f.content();
        assert_eq!(content.workout_history.len(), 2);
        assert_eq!(content.routine_templates.len(), 1);
        assert_eq!(content.custom_catalog_entries.len(), 1);
        assert_eq!(content.custom_catalog_entries[0].title, "Pendlay Row");
        assert_eq!(f.monitor.phase(), RestorePhase::Success);
        assert!(!f.monitor.is_restore_in_progress());
    }

    #[test]
    fn test_restore_keeps_active_workout() {
        let mut f = Fixture::new();
        let active = session::start_workout(&f.store, at(20, 6), None).unwrap();

        f.restore(&foreign_backup()).unwrap();

        assert_eq!(f.store.snapshot().active_workout().map(|w| w.id), Some(active.id));
    }

    #[test]
    fn test_restoring_twice_is_idempotent() {
        let mut f = Fixture::new();
        let backup = foreign_backup();

        f.restore(&backup).unwrap();
        let first = f.content();
        f.restore(&backup).unwrap();
        let second = f.content();

        assert_eq!(first, second);
        assert_eq!(second.workout_history.len(), 2);
    }

    #[test]
    fn test_dangling_routine_leaves_everything_untouched() {
        let mut f = Fixture::new();
        f.log_workout(1, "bench_press");
        f.catalog.create(ExerciseDraft::titled("A")).unwrap();
        let before_graph: Graph = (*f.store.snapshot()).clone();
        let before_catalog = f.catalog.custom_entries().to_vec();

        let payload = json!({
            "format_version": 3,
            "created_at": "2024-02-10T00:00:00Z",
            "custom_catalog_entries": [{"id": "c9", "title": "Replacement"}],
            "routine_templates": [],
            "workout_history": [{
                "id": Uuid::new_v4(),
                "start": "2024-02-09T08:00:00Z",
                "end": "2024-02-09T09:00:00Z",
                "routine_id": "R1",
                "exercises": []
            }]
        });
        let err = f.restore(payload.to_string().as_bytes()).unwrap_err();

        assert!(matches!(err, Error::DanglingReference { .. }));
        assert_eq!(*f.store.snapshot(), before_graph);
        assert_eq!(f.catalog.custom_entries(), before_catalog.as_slice());
        assert_eq!(f.monitor.phase(), RestorePhase::RolledBack);
    }

    #[test]
    fn test_commit_violation_rolls_back_catalog() {
        let mut f = Fixture::new();
        f.log_workout(1, "bench_press");
        let original = f.catalog.create(ExerciseDraft::titled("Keep Me")).unwrap();
        let before = f.content();

        // Valid to decode, but the commit rejects end before start
        let payload = json!({
            "format_version": 2,
            "created_at": "2024-02-10T00:00:00Z",
            "custom_catalog_entries": [{"id": "c9", "title": "Replacement"}],
            "workout_history": [{
                "id": Uuid::new_v4(),
                "start": "2024-02-09T09:00:00Z",
                "end": "2024-02-09T08:00:00Z",
                "exercises": []
            }]
        });
        let err = f.restore(payload.to_string().as_bytes()).unwrap_err();

        assert_eq!(err.violations()[0].code.code(), 3);
        assert_eq!(f.content(), before);
        assert_eq!(f.catalog.custom_entries(), &[original.clone()]);

        // The file on disk was rolled back too
        let reopened = ExerciseCatalog::open(
            BuiltinCatalog::packaged().unwrap(),
            f.dir.path().join("custom_exercises.json"),
        )
        .unwrap();
        assert_eq!(reopened.custom_entries(), &[original]);
    }

    #[test]
    fn test_format_error_changes_nothing() {
        let mut f = Fixture::new();
        f.log_workout(1, "back_squat");
        let generation = f.store.generation();

        let err = f.restore(b"{\"format_version\": 3}").unwrap_err();
        assert!(matches!(err, Error::Format(_)));
        assert_eq!(f.store.generation(), generation);
    }

    #[test]
    fn test_events_bracket_the_restore() {
        let mut f = Fixture::new();
        let events = f.monitor.subscribe();

        f.restore(&foreign_backup()).unwrap();
        let _ = f.restore(b"not json");

        let received: Vec<_> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                RestoreEvent::Started,
                RestoreEvent::Ended { succeeded: true },
                RestoreEvent::Started,
                RestoreEvent::Ended { succeeded: false },
            ]
        );
    }

    #[test]
    fn test_concurrent_restore_refused() {
        let mut f = Fixture::new();
        assert!(f.monitor.try_start());
        assert!(f.monitor.is_restore_in_progress());

        let err = f.restore(&foreign_backup()).unwrap_err();
        assert!(matches!(err, Error::RestoreInProgress));
        assert!(f.monitor.is_restore_in_progress());
    }

    #[test]
    fn test_journal_cleared_after_restore() {
        let mut f = Fixture::new();
        let mut journal = FileJournal::new(f.dir.path().join("restore.journal"));

        let changes = RestoreOrchestrator::new(&f.store, &mut f.catalog, &f.monitor)
            .with_journal(&mut journal)
            .run(&foreign_backup())
            .unwrap();

        assert!(!journal.path().exists());
        assert!(changes.snapshot.restore_marker().is_some());
    }

    #[test]
    fn test_catalog_write_failure_rolls_back() {
        let mut f = Fixture::new();
        f.log_workout(1, "bench_press");
        let kept = f.catalog.create(ExerciseDraft::titled("Keep Me")).unwrap();
        let generation = f.store.generation();

        // A directory where the catalog file should be makes every write fail
        let catalog_path = f.catalog.path().to_path_buf();
        std::fs::remove_file(&catalog_path).unwrap();
        std::fs::create_dir(&catalog_path).unwrap();

        let mut journal = FileJournal::new(f.dir.path().join("restore.journal"));
        let err = RestoreOrchestrator::new(&f.store, &mut f.catalog, &f.monitor)
            .with_journal(&mut journal)
            .run(&foreign_backup())
            .unwrap_err();

        assert!(matches!(err, Error::CatalogIo(_)));
        assert_eq!(f.store.generation(), generation);
        assert_eq!(f.monitor.phase(), RestorePhase::RolledBack);
        assert!(!f.monitor.is_restore_in_progress());
        assert_eq!(f.catalog.custom_entries().to_vec(), vec![kept.clone()]);

        // The rollback could not be written either, so the journal stays for startup
        let pending = journal.pending().unwrap().unwrap();
        assert_eq!(pending.undo_catalog, vec![kept.clone()]);

        std::fs::remove_dir(&catalog_path).unwrap();
        let outcome = crate::journal::recover_interrupted_restore(&mut journal, &f.store, &mut f.catalog).unwrap();
        assert_eq!(outcome, crate::journal::RecoveryOutcome::RolledBack);
        assert_eq!(f.catalog.custom_entries().to_vec(), vec![kept]);
        assert!(!journal.path().exists());
    }

    #[test]
    fn test_restoring_own_backup_keeps_active_routine_link() {
        let mut f = Fixture::new();
        let routine = templates::create_routine(&f.store, None, "Legs").unwrap();
        templates::add_routine_entry(&f.store, routine.id, "back_squat", 3, None).unwrap();
        f.log_workout(1, "deadlift");
        let active = session::start_from_routine(&f.store, routine.id, at(20, 6)).unwrap();
        let bytes = encode(&f.content(), false).unwrap();

        f.restore(&bytes).unwrap();

        let snapshot = f.store.snapshot();
        let workout = snapshot.active_workout().unwrap();
        assert_eq!(workout.id, active.id);
        assert_eq!(workout.routine_id, Some(routine.id));
        assert_eq!(snapshot.exercises_of(active.id).len(), 1);
    }
}
