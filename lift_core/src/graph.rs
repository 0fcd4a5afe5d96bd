//! Id-keyed entity tables and the read-only query surface over them.
//!
//! A [`Graph`] is an immutable value once published by the store; readers hold
//! it through an `Arc` and always see one consistent point in time.

use crate::types::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Any entity held by the graph store
#[derive(Clone, Debug, PartialEq)]
pub enum Entity {
    Workout(Workout),
    WorkoutExercise(WorkoutExercise),
    WorkoutSet(WorkoutSet),
    Plan(WorkoutPlan),
    Routine(WorkoutRoutine),
    RoutineEntry(RoutineEntry),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Workout(_) => EntityKind::Workout,
            Entity::WorkoutExercise(_) => EntityKind::WorkoutExercise,
            Entity::WorkoutSet(_) => EntityKind::WorkoutSet,
            Entity::Plan(_) => EntityKind::Plan,
            Entity::Routine(_) => EntityKind::Routine,
            Entity::RoutineEntry(_) => EntityKind::RoutineEntry,
        }
    }

    pub fn id(&self) -> EntityId {
        match self {
            Entity::Workout(e) => e.id,
            Entity::WorkoutExercise(e) => e.id,
            Entity::WorkoutSet(e) => e.id,
            Entity::Plan(e) => e.id,
            Entity::Routine(e) => e.id,
            Entity::RoutineEntry(e) => e.id,
        }
    }

    /// The owning entity, if any. References (exercise, routine) are not ownership.
    pub fn parent(&self) -> Option<(EntityKind, EntityId)> {
        match self {
            Entity::Workout(_) | Entity::Plan(_) => None,
            Entity::WorkoutExercise(e) => Some((EntityKind::Workout, e.workout_id)),
            Entity::WorkoutSet(e) => Some((EntityKind::WorkoutExercise, e.workout_exercise_id)),
            Entity::Routine(e) => e.plan_id.map(|plan| (EntityKind::Plan, plan)),
            Entity::RoutineEntry(e) => Some((EntityKind::Routine, e.routine_id)),
        }
    }
}

/// Sort order for workout queries
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkoutOrder {
    StartAscending,
    StartDescending,
}

/// One past appearance of an exercise, with its sets in order
#[derive(Clone, Debug)]
pub struct ExerciseHistoryEntry<'a> {
    pub workout: &'a Workout,
    pub workout_exercise: &'a WorkoutExercise,
    pub sets: Vec<&'a WorkoutSet>,
}

/// The full object graph
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Graph {
    /// Bumped by every successful commit
    #[serde(default)]
    pub(crate) generation: u64,
    /// Marker of the last restore committed into this graph
    #[serde(default)]
    pub(crate) restore_marker: Option<Uuid>,
    #[serde(default)]
    pub(crate) workouts: BTreeMap<EntityId, Workout>,
    #[serde(default)]
    pub(crate) workout_exercises: BTreeMap<EntityId, WorkoutExercise>,
    #[serde(default)]
    pub(crate) sets: BTreeMap<EntityId, WorkoutSet>,
    #[serde(default)]
    pub(crate) plans: BTreeMap<EntityId, WorkoutPlan>,
    #[serde(default)]
    pub(crate) routines: BTreeMap<EntityId, WorkoutRoutine>,
    #[serde(default)]
    pub(crate) routine_entries: BTreeMap<EntityId, RoutineEntry>,
}

impl Graph {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn restore_marker(&self) -> Option<Uuid> {
        self.restore_marker
    }

    // ------------------------------------------------------------------------
    // Entity access
    // ------------------------------------------------------------------------

    pub fn workout(&self, id: EntityId) -> Option<&Workout> {
        self.workouts.get(&id)
    }

    pub fn workout_exercise(&self, id: EntityId) -> Option<&WorkoutExercise> {
        self.workout_exercises.get(&id)
    }

    pub fn set(&self, id: EntityId) -> Option<&WorkoutSet> {
        self.sets.get(&id)
    }

    pub fn plan(&self, id: EntityId) -> Option<&WorkoutPlan> {
        self.plans.get(&id)
    }

    pub fn routine(&self, id: EntityId) -> Option<&WorkoutRoutine> {
        self.routines.get(&id)
    }

    pub fn routine_entry(&self, id: EntityId) -> Option<&RoutineEntry> {
        self.routine_entries.get(&id)
    }

    /// Kind of the entity stored under `id`, searching every table
    pub fn kind_of(&self, id: EntityId) -> Option<EntityKind> {
        if self.workouts.contains_key(&id) {
            Some(EntityKind::Workout)
        } else if self.workout_exercises.contains_key(&id) {
            Some(EntityKind::WorkoutExercise)
        } else if self.sets.contains_key(&id) {
            Some(EntityKind::WorkoutSet)
        } else if self.plans.contains_key(&id) {
            Some(EntityKind::Plan)
        } else if self.routines.contains_key(&id) {
            Some(EntityKind::Routine)
        } else if self.routine_entries.contains_key(&id) {
            Some(EntityKind::RoutineEntry)
        } else {
            None
        }
    }

    pub fn contains(&self, kind: EntityKind, id: EntityId) -> bool {
        self.get(kind, id).is_some()
    }

    pub fn get(&self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        match kind {
            EntityKind::Workout => self.workouts.get(&id).cloned().map(Entity::Workout),
            EntityKind::WorkoutExercise => self
                .workout_exercises
                .get(&id)
                .cloned()
                .map(Entity::WorkoutExercise),
            EntityKind::WorkoutSet => self.sets.get(&id).cloned().map(Entity::WorkoutSet),
            EntityKind::Plan => self.plans.get(&id).cloned().map(Entity::Plan),
            EntityKind::Routine => self.routines.get(&id).cloned().map(Entity::Routine),
            EntityKind::RoutineEntry => self
                .routine_entries
                .get(&id)
                .cloned()
                .map(Entity::RoutineEntry),
        }
    }

    pub(crate) fn put(&mut self, entity: Entity) {
        match entity {
            Entity::Workout(e) => {
                self.workouts.insert(e.id, e);
            }
            Entity::WorkoutExercise(e) => {
                self.workout_exercises.insert(e.id, e);
            }
            Entity::WorkoutSet(e) => {
                self.sets.insert(e.id, e);
            }
            Entity::Plan(e) => {
                self.plans.insert(e.id, e);
            }
            Entity::Routine(e) => {
                self.routines.insert(e.id, e);
            }
            Entity::RoutineEntry(e) => {
                self.routine_entries.insert(e.id, e);
            }
        }
    }

    pub(crate) fn remove(&mut self, kind: EntityKind, id: EntityId) -> Option<Entity> {
        match kind {
            EntityKind::Workout => self.workouts.remove(&id).map(Entity::Workout),
            EntityKind::WorkoutExercise => {
                self.workout_exercises.remove(&id).map(Entity::WorkoutExercise)
            }
            EntityKind::WorkoutSet => self.sets.remove(&id).map(Entity::WorkoutSet),
            EntityKind::Plan => self.plans.remove(&id).map(Entity::Plan),
            EntityKind::Routine => self.routines.remove(&id).map(Entity::Routine),
            EntityKind::RoutineEntry => self.routine_entries.remove(&id).map(Entity::RoutineEntry),
        }
    }

    /// Directly owned children of an entity
    pub fn children_of(&self, kind: EntityKind, id: EntityId) -> Vec<(EntityKind, EntityId)> {
        match kind {
            EntityKind::Workout => self
                .exercises_of(id)
                .into_iter()
                .map(|e| (EntityKind::WorkoutExercise, e.id))
                .collect(),
            EntityKind::WorkoutExercise => self
                .sets_of(id)
                .into_iter()
                .map(|s| (EntityKind::WorkoutSet, s.id))
                .collect(),
            EntityKind::Plan => self
                .routines_of_plan(id)
                .into_iter()
                .map(|r| (EntityKind::Routine, r.id))
                .collect(),
            EntityKind::Routine => self
                .entries_of(id)
                .into_iter()
                .map(|e| (EntityKind::RoutineEntry, e.id))
                .collect(),
            EntityKind::WorkoutSet | EntityKind::RoutineEntry => Vec::new(),
        }
    }

    /// Owning workout of a workout exercise or set
    pub fn workout_of(&self, kind: EntityKind, id: EntityId) -> Option<EntityId> {
        match kind {
            EntityKind::Workout => Some(id),
            EntityKind::WorkoutExercise => self.workout_exercises.get(&id).map(|e| e.workout_id),
            EntityKind::WorkoutSet => self
                .sets
                .get(&id)
                .and_then(|s| self.workout_exercises.get(&s.workout_exercise_id))
                .map(|e| e.workout_id),
            _ => None,
        }
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// The single in-progress workout, if any
    pub fn active_workout(&self) -> Option<&Workout> {
        self.workouts.values().find(|w| w.is_active)
    }

    /// Workouts matching `filter`, sorted by start (ties broken by id)
    pub fn workouts_where<F>(&self, filter: F, order: WorkoutOrder) -> Vec<&Workout>
    where
        F: Fn(&Workout) -> bool,
    {
        let mut workouts: Vec<&Workout> = self.workouts.values().filter(|w| filter(w)).collect();
        workouts.sort_by(|a, b| (a.start, a.id).cmp(&(b.start, b.id)));
        if order == WorkoutOrder::StartDescending {
            workouts.reverse();
        }
        workouts
    }

    /// Finished workouts, newest first
    pub fn finished_workouts(&self) -> Vec<&Workout> {
        self.workouts_where(|w| !w.is_active, WorkoutOrder::StartDescending)
    }

    pub fn exercises_of(&self, workout_id: EntityId) -> Vec<&WorkoutExercise> {
        let mut exercises: Vec<_> = self
            .workout_exercises
            .values()
            .filter(|e| e.workout_id == workout_id)
            .collect();
        exercises.sort_by_key(|e| (e.position, e.id));
        exercises
    }

    pub fn sets_of(&self, workout_exercise_id: EntityId) -> Vec<&WorkoutSet> {
        let mut sets: Vec<_> = self
            .sets
            .values()
            .filter(|s| s.workout_exercise_id == workout_exercise_id)
            .collect();
        sets.sort_by_key(|s| (s.position, s.id));
        sets
    }

    /// Every set beneath a workout, in exercise then set order
    pub fn sets_of_workout(&self, workout_id: EntityId) -> Vec<&WorkoutSet> {
        self.exercises_of(workout_id)
            .into_iter()
            .flat_map(|e| self.sets_of(e.id))
            .collect()
    }

    /// Past performances of an exercise in finished workouts, newest first
    pub fn exercise_history(&self, exercise_id: &str) -> Vec<ExerciseHistoryEntry<'_>> {
        self.finished_workouts()
            .into_iter()
            .flat_map(|workout| {
                self.exercises_of(workout.id)
                    .into_iter()
                    .filter(|e| e.exercise_id == exercise_id)
                    .map(move |workout_exercise| (workout, workout_exercise))
            })
            .map(|(workout, workout_exercise)| ExerciseHistoryEntry {
                workout,
                workout_exercise,
                sets: self.sets_of(workout_exercise.id),
            })
            .collect()
    }

    pub fn plans(&self) -> Vec<&WorkoutPlan> {
        let mut plans: Vec<_> = self.plans.values().collect();
        plans.sort_by(|a, b| a.title.cmp(&b.title).then(a.id.cmp(&b.id)));
        plans
    }

    /// All routines, grouped by plan then ordered by position
    pub fn routines(&self) -> Vec<&WorkoutRoutine> {
        let mut routines: Vec<_> = self.routines.values().collect();
        routines.sort_by_key(|r| (r.plan_id, r.position, r.id));
        routines
    }

    pub fn routines_of_plan(&self, plan_id: EntityId) -> Vec<&WorkoutRoutine> {
        let mut routines: Vec<_> = self
            .routines
            .values()
            .filter(|r| r.plan_id == Some(plan_id))
            .collect();
        routines.sort_by_key(|r| (r.position, r.id));
        routines
    }

    pub fn entries_of(&self, routine_id: EntityId) -> Vec<&RoutineEntry> {
        let mut entries: Vec<_> = self
            .routine_entries
            .values()
            .filter(|e| e.routine_id == routine_id)
            .collect();
        entries.sort_by_key(|e| (e.position, e.id));
        entries
    }

    /// Workouts referencing a routine as their template
    pub fn workouts_using_routine(&self, routine_id: EntityId) -> Vec<&Workout> {
        self.workouts
            .values()
            .filter(|w| w.routine_id == Some(routine_id))
            .collect()
    }

    /// Whether any workout or routine entry still points at a catalog exercise
    pub fn references_exercise(&self, exercise_id: &str) -> bool {
        self.workout_exercises
            .values()
            .any(|e| e.exercise_id == exercise_id)
            || self
                .routine_entries
                .values()
                .any(|e| e.exercise_id == exercise_id)
    }

    pub fn workout_count(&self) -> usize {
        self.workouts.len()
    }
}
