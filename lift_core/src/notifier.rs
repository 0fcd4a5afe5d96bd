//! Aggregate invalidation events.
//!
//! Committed change-sets name individual entities. Views care about the
//! aggregate an entity belongs to, so each change is walked up its ownership
//! chain to a root and every distinct root is announced once per commit.

use crate::store::{ChangeKind, ChangeSet, GraphStore};
use crate::types::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// Top-level owner whose dependent views must be refreshed
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AggregateRoot {
    Workout(EntityId),
    Routine(EntityId),
    Plan(EntityId),
    Exercise(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AggregateEvent {
    /// Store generation that produced the event; `None` for catalog changes
    pub generation: Option<u64>,
    pub root: AggregateRoot,
    /// The root itself was deleted by this change
    pub removed: bool,
}

/// Resolve a committed change-set to its distinct aggregate roots.
///
/// Owners deleted in the same commit are found through the change-set itself,
/// since the published snapshot no longer has them.
pub fn resolve_roots(changes: &ChangeSet) -> Vec<(AggregateRoot, bool)> {
    let committed_parents: HashMap<EntityId, (EntityKind, EntityId)> = changes
        .changes
        .iter()
        .filter_map(|c| c.parent.map(|p| (c.id, p)))
        .collect();

    let parent_of = |kind: EntityKind, id: EntityId| -> Option<EntityId> {
        if let Some(&(_, parent)) = committed_parents.get(&id) {
            return Some(parent);
        }
        match kind {
            EntityKind::WorkoutExercise => changes.snapshot.workout_exercise(id).map(|e| e.workout_id),
            EntityKind::WorkoutSet => changes.snapshot.set(id).map(|s| s.workout_exercise_id),
            EntityKind::RoutineEntry => changes.snapshot.routine_entry(id).map(|e| e.routine_id),
            _ => None,
        }
    };

    let mut roots: BTreeMap<AggregateRoot, bool> = BTreeMap::new();
    for change in &changes.changes {
        let root = match change.kind {
            EntityKind::Workout => Some(AggregateRoot::Workout(change.id)),
            EntityKind::WorkoutExercise => {
                parent_of(change.kind, change.id).map(AggregateRoot::Workout)
            }
            EntityKind::WorkoutSet => parent_of(change.kind, change.id)
                .and_then(|we| parent_of(EntityKind::WorkoutExercise, we))
                .map(AggregateRoot::Workout),
            EntityKind::RoutineEntry => {
                parent_of(change.kind, change.id).map(AggregateRoot::Routine)
            }
            EntityKind::Routine => Some(AggregateRoot::Routine(change.id)),
            EntityKind::Plan => Some(AggregateRoot::Plan(change.id)),
        };

        let Some(root) = root else {
            tracing::debug!("No aggregate root for {} {}", change.kind, change.id);
            continue;
        };
        let removed = is_root_change(change.kind) && change.change == ChangeKind::Deleted;
        *roots.entry(root).or_insert(false) |= removed;
    }
    roots.into_iter().collect()
}

fn is_root_change(kind: EntityKind) -> bool {
    matches!(kind, EntityKind::Workout | EntityKind::Routine | EntityKind::Plan)
}

/// Fans aggregate events out to independent listeners
#[derive(Clone, Default)]
pub struct Notifier {
    listeners: Arc<Mutex<Vec<Sender<AggregateEvent>>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Dropping the receiver unregisters it.
    pub fn subscribe(&self) -> Receiver<AggregateEvent> {
        let (tx, rx) = channel();
        self.lock_listeners().push(tx);
        rx
    }

    pub fn listener_count(&self) -> usize {
        self.lock_listeners().len()
    }

    /// Announce every root touched by a committed change-set
    pub fn dispatch(&self, changes: &ChangeSet) -> usize {
        let events: Vec<AggregateEvent> = resolve_roots(changes)
            .into_iter()
            .map(|(root, removed)| AggregateEvent {
                generation: Some(changes.generation),
                root,
                removed,
            })
            .collect();
        self.send_all(&events)
    }

    /// Announce catalog entries changed outside the graph store
    pub fn publish_catalog(&self, exercise_ids: &[String], removed: bool) -> usize {
        let events: Vec<AggregateEvent> = exercise_ids
            .iter()
            .map(|id| AggregateEvent {
                generation: None,
                root: AggregateRoot::Exercise(id.clone()),
                removed,
            })
            .collect();
        self.send_all(&events)
    }

    /// Forward the store's change-sets from a dedicated thread.
    ///
    /// The thread ends once the store is dropped.
    pub fn spawn(&self, store: &GraphStore) -> std::io::Result<JoinHandle<()>> {
        let commits = store.subscribe();
        let notifier = self.clone();
        thread::Builder::new()
            .name("lift-notifier".into())
            .spawn(move || {
                for changes in commits {
                    let sent = notifier.dispatch(&changes);
                    tracing::debug!(
                        "Generation {}: {} aggregate event(s) delivered",
                        changes.generation,
                        sent
                    );
                }
                tracing::debug!("Notifier thread exiting");
            })
    }

    fn send_all(&self, events: &[AggregateEvent]) -> usize {
        if events.is_empty() {
            return 0;
        }
        let mut listeners = self.lock_listeners();
        listeners.retain(|listener| events.iter().all(|e| listener.send(e.clone()).is_ok()));
        events.len() * listeners.len()
    }

    fn lock_listeners(&self) -> std::sync::MutexGuard<'_, Vec<Sender<AggregateEvent>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
