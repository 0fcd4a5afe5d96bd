//! Object graph store with validating, single-writer commits.
//!
//! Mutation always goes through a [`Transaction`]: an isolated working copy of
//! a point-in-time snapshot plus a log of net changes. [`GraphStore::save`]
//! replays that log onto the live graph under the writer lock, validates the
//! result, persists it (for file-backed stores) and only then publishes the new
//! snapshot and emits the committed [`ChangeSet`].

use crate::atomic;
use crate::graph::{Entity, Graph};
use crate::types::*;
use crate::validate::{self, ConsistencyViolation, ViolationCode};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use uuid::Uuid;

/// Net effect of a transaction on one entity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeKind {
    Inserted,
    Updated,
    Deleted,
}

/// One committed entity change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityChange {
    pub kind: EntityKind,
    pub id: EntityId,
    pub change: ChangeKind,
    /// Owner at commit time (taken from the pre-commit graph for deletions)
    pub parent: Option<(EntityKind, EntityId)>,
}

/// Everything one successful commit changed
#[derive(Clone, Debug)]
pub struct ChangeSet {
    pub generation: u64,
    pub changes: Vec<EntityChange>,
    /// The graph as published by this commit
    pub snapshot: Arc<Graph>,
}

impl ChangeSet {
    pub fn count(&self, change: ChangeKind) -> usize {
        self.changes.iter().filter(|c| c.change == change).count()
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Pending mutations, invisible to readers until saved
#[derive(Debug)]
pub struct Transaction {
    working: Graph,
    changes: BTreeMap<(EntityKind, EntityId), ChangeKind>,
    duplicate_ids: Vec<(EntityKind, EntityId)>,
    restore_marker: Option<Uuid>,
}

impl Transaction {
    fn new(base: &Graph) -> Self {
        Self {
            working: base.clone(),
            changes: BTreeMap::new(),
            duplicate_ids: Vec::new(),
            restore_marker: None,
        }
    }

    /// The transaction's own view, including its pending changes
    pub fn view(&self) -> &Graph {
        &self.working
    }

    pub fn has_changes(&self) -> bool {
        !self.changes.is_empty() || !self.duplicate_ids.is_empty() || self.restore_marker.is_some()
    }

    /// Stage a new entity. An id already present in any table is recorded and
    /// reported as a violation at save time.
    pub fn insert(&mut self, entity: Entity) {
        let (kind, id) = (entity.kind(), entity.id());
        if self.working.kind_of(id).is_some() {
            tracing::debug!("Duplicate id {} staged for {}", id, kind);
            self.duplicate_ids.push((kind, id));
            return;
        }
        self.working.put(entity);
        let change = match self.changes.get(&(kind, id)) {
            Some(ChangeKind::Deleted) => ChangeKind::Updated,
            _ => ChangeKind::Inserted,
        };
        self.changes.insert((kind, id), change);
    }

    /// Replace an existing entity of the same kind and id
    pub fn update(&mut self, entity: Entity) -> Result<()> {
        let (kind, id) = (entity.kind(), entity.id());
        if !self.working.contains(kind, id) {
            return Err(Error::NotFound(format!("{} {}", kind, id)));
        }
        self.working.put(entity);
        self.changes.entry((kind, id)).or_insert(ChangeKind::Updated);
        Ok(())
    }

    /// Delete an entity and everything it owns. Workouts referencing a deleted
    /// routine keep existing with their routine reference cleared.
    pub fn delete(&mut self, kind: EntityKind, id: EntityId) -> Result<()> {
        if !self.working.contains(kind, id) {
            return Err(Error::NotFound(format!("{} {}", kind, id)));
        }

        let mut pending = vec![(kind, id)];
        let mut doomed = Vec::new();
        while let Some((kind, id)) = pending.pop() {
            pending.extend(self.working.children_of(kind, id));
            doomed.push((kind, id));
        }

        for (kind, id) in doomed {
            if kind == EntityKind::Routine {
                let referencing: Vec<Workout> = self
                    .working
                    .workouts_using_routine(id)
                    .into_iter()
                    .cloned()
                    .collect();
                for mut workout in referencing {
                    workout.routine_id = None;
                    self.update(Entity::Workout(workout))?;
                }
            }
            self.working.remove(kind, id);
            match self.changes.get(&(kind, id)) {
                Some(ChangeKind::Inserted) => {
                    self.changes.remove(&(kind, id));
                }
                _ => {
                    self.changes.insert((kind, id), ChangeKind::Deleted);
                }
            }
        }
        Ok(())
    }

    /// Delete every finished workout, leaving the active one in place
    pub fn delete_finished_workouts(&mut self) -> Result<usize> {
        let finished: Vec<EntityId> = self
            .working
            .finished_workouts()
            .into_iter()
            .map(|w| w.id)
            .collect();
        for id in &finished {
            self.delete(EntityKind::Workout, *id)?;
        }
        Ok(finished.len())
    }

    /// Delete every plan and routine with their entries
    pub fn delete_templates(&mut self) -> Result<usize> {
        let plans: Vec<EntityId> = self.working.plans().into_iter().map(|p| p.id).collect();
        for id in &plans {
            self.delete(EntityKind::Plan, *id)?;
        }
        let routines: Vec<EntityId> = self.working.routines().into_iter().map(|r| r.id).collect();
        for id in &routines {
            self.delete(EntityKind::Routine, *id)?;
        }
        Ok(plans.len() + routines.len())
    }

    /// Tag the commit so a restore journal can later tell whether it landed
    pub fn set_restore_marker(&mut self, marker: Uuid) {
        self.restore_marker = Some(marker);
    }
}

// ============================================================================
// Store
// ============================================================================

/// Holds the published graph and serializes writers
pub struct GraphStore {
    path: Option<PathBuf>,
    published: RwLock<Arc<Graph>>,
    writer: Mutex<()>,
    subscribers: RwLock<Vec<Sender<ChangeSet>>>,
}

impl GraphStore {
    /// A store that lives only in memory
    pub fn in_memory() -> Self {
        Self::with_graph(None, Graph::default())
    }

    /// Open a file-backed store. A missing file starts an empty graph; a file
    /// that cannot be read or parsed is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let graph = load_graph(&path)?;
        tracing::info!(
            "Opened graph store {:?} at generation {} ({} workouts)",
            path,
            graph.generation,
            graph.workout_count()
        );
        Ok(Self::with_graph(Some(path), graph))
    }

    fn with_graph(path: Option<PathBuf>, graph: Graph) -> Self {
        Self {
            path,
            published: RwLock::new(Arc::new(graph)),
            writer: Mutex::new(()),
            subscribers: RwLock::new(Vec::new()),
        }
    }

    /// Consistent point-in-time view of the whole graph
    pub fn snapshot(&self) -> Arc<Graph> {
        self.published
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }

    /// Start an isolated transaction over the current snapshot
    pub fn begin(&self) -> Transaction {
        Transaction::new(&self.snapshot())
    }

    /// Receive every committed change-set from now on
    pub fn subscribe(&self) -> Receiver<ChangeSet> {
        let (tx, rx) = channel();
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(tx);
        rx
    }

    /// Validate and commit a transaction atomically.
    ///
    /// On any violation nothing is written and every violation is returned.
    pub fn save(&self, tx: Transaction) -> Result<ChangeSet> {
        let _writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let current = self.snapshot();

        if !tx.has_changes() {
            return Ok(ChangeSet {
                generation: current.generation,
                changes: Vec::new(),
                snapshot: current,
            });
        }

        let mut violations: Vec<ConsistencyViolation> = tx
            .duplicate_ids
            .iter()
            .map(|&(kind, id)| {
                ConsistencyViolation::new(kind, id, ViolationCode::InvalidId, "id is already in use")
            })
            .collect();

        let mut next = (*current).clone();
        let mut changes = tx.changes.clone();
        for (&(kind, id), change) in &tx.changes {
            match change {
                // Cascaded below, against the live graph
                ChangeKind::Deleted => {}
                ChangeKind::Inserted if current.kind_of(id).is_some() => {
                    violations.push(ConsistencyViolation::new(
                        kind,
                        id,
                        ViolationCode::InvalidId,
                        "id was committed by another transaction",
                    ));
                }
                ChangeKind::Inserted | ChangeKind::Updated => {
                    if let Some(entity) = tx.working.get(kind, id) {
                        next.put(entity);
                    }
                }
            }
        }

        let deleted: Vec<(EntityKind, EntityId)> = tx
            .changes
            .iter()
            .filter(|(_, change)| **change == ChangeKind::Deleted)
            .map(|(&key, _)| key)
            .collect();
        for (kind, id) in deleted {
            cascade_delete(&mut next, &mut changes, kind, id);
        }

        violations.extend(validate::validate_commit(&current, &next, &changes));
        if !violations.is_empty() {
            tracing::warn!("Rejected commit with {} violation(s)", violations.len());
            for violation in &violations {
                tracing::debug!("  {}", violation);
            }
            return Err(Error::Consistency(violations));
        }

        next.generation = current.generation + 1;
        if let Some(marker) = tx.restore_marker {
            next.restore_marker = Some(marker);
        }

        if let Some(path) = &self.path {
            atomic::write_json(path, &next, false)?;
            tracing::debug!("Persisted graph generation {} to {:?}", next.generation, path);
        }

        let changes = changes
            .iter()
            .map(|(&(kind, id), &change)| EntityChange {
                kind,
                id,
                change,
                parent: next
                    .get(kind, id)
                    .or_else(|| current.get(kind, id))
                    .and_then(|e| e.parent()),
            })
            .collect();

        let next = Arc::new(next);
        *self
            .published
            .write()
            .unwrap_or_else(PoisonError::into_inner) = next.clone();

        let change_set = ChangeSet {
            generation: next.generation,
            changes,
            snapshot: next,
        };
        tracing::info!(
            "Committed generation {} (+{} ~{} -{})",
            change_set.generation,
            change_set.count(ChangeKind::Inserted),
            change_set.count(ChangeKind::Updated),
            change_set.count(ChangeKind::Deleted)
        );

        // Emitted under the writer lock so subscribers see generations in order.
        // Sends never block; handlers run on the receiving side.
        self.emit(&change_set);
        Ok(change_set)
    }

    fn emit(&self, change_set: &ChangeSet) {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.retain(|sub| sub.send(change_set.clone()).is_ok());
    }
}

/// Remove an entity and whatever the live graph says it owns. Children
/// committed after the transaction began are caught here too.
fn cascade_delete(
    next: &mut Graph,
    changes: &mut BTreeMap<(EntityKind, EntityId), ChangeKind>,
    kind: EntityKind,
    id: EntityId,
) {
    let mut pending = vec![(kind, id)];
    while let Some((kind, id)) = pending.pop() {
        pending.extend(next.children_of(kind, id));
        if kind == EntityKind::Routine {
            let referencing: Vec<Workout> = next
                .workouts_using_routine(id)
                .into_iter()
                .cloned()
                .collect();
            for mut workout in referencing {
                workout.routine_id = None;
                changes
                    .entry((EntityKind::Workout, workout.id))
                    .or_insert(ChangeKind::Updated);
                next.put(Entity::Workout(workout));
            }
        }
        if next.remove(kind, id).is_some() || changes.contains_key(&(kind, id)) {
            changes.insert((kind, id), ChangeKind::Deleted);
        }
    }
}

fn load_graph(path: &Path) -> Result<Graph> {
    match atomic::read_json::<Graph>(path)? {
        Some(graph) => Ok(graph),
        None => {
            tracing::info!("No graph file at {:?}, starting empty", path);
            Ok(Graph::default())
        }
    }
}
