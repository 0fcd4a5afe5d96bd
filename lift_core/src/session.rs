//! Workout session lifecycle.
//!
//! A workout is created active, edited while in progress, and finished once.
//! Finishing prunes everything that was never performed:
//! - workout exercises without a single completed set are deleted
//! - remaining incomplete sets are deleted
//! - the workout is marked inactive and its end stamped
//!
//! After that it is history: it can be deleted or repeated, never reopened.

use crate::graph::Entity;
use crate::store::{ChangeSet, GraphStore, Transaction};
use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Values for a newly logged set
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SetInput {
    pub weight: f64,
    pub reps: u32,
    pub target_reps: Option<RepRange>,
    pub tag: Option<SetTag>,
    pub rpe: Option<Rpe>,
    pub comment: String,
    pub completed: bool,
}

impl SetInput {
    pub fn new(weight: f64, reps: u32) -> Self {
        Self {
            weight,
            reps,
            ..Self::default()
        }
    }

    pub fn completed(mut self) -> Self {
        self.completed = true;
        self
    }
}

/// Start a new active workout. Fails with violation 4 if one is already active.
pub fn start_workout(store: &GraphStore, now: DateTime<Utc>, title: Option<String>) -> Result<Workout> {
    let mut workout = Workout::new_active(now);
    workout.title = title;

    let mut tx = store.begin();
    tx.insert(Entity::Workout(workout.clone()));
    store.save(tx)?;

    tracing::info!("Started workout {}", workout.id);
    Ok(workout)
}

/// Start an active workout laid out from a routine's entries
pub fn start_from_routine(store: &GraphStore, routine_id: EntityId, now: DateTime<Utc>) -> Result<Workout> {
    let snapshot = store.snapshot();
    let routine = snapshot
        .routine(routine_id)
        .ok_or_else(|| Error::NotFound(format!("routine {}", routine_id)))?;

    let mut workout = Workout::new_active(now);
    workout.title = Some(routine.title.clone());
    workout.routine_id = Some(routine.id);

    let mut tx = store.begin();
    tx.insert(Entity::Workout(workout.clone()));
    for (position, entry) in snapshot.entries_of(routine_id).into_iter().enumerate() {
        let mut exercise = WorkoutExercise::new(workout.id, position as u32, entry.exercise_id.clone());
        exercise.comment = entry.comment.clone();
        for set_position in 0..entry.target_sets {
            let mut set = WorkoutSet::new(exercise.id, set_position, 0.0, 0);
            set.target_reps = entry.target_reps;
            set.reps = entry.target_reps.map(|r| r.min).unwrap_or(0);
            tx.insert(Entity::WorkoutSet(set));
        }
        tx.insert(Entity::WorkoutExercise(exercise));
    }
    store.save(tx)?;

    tracing::info!("Started workout {} from routine {}", workout.id, routine_id);
    Ok(workout)
}

fn active_workout_in(tx: &Transaction, workout_id: EntityId) -> Result<Workout> {
    let workout = tx
        .view()
        .workout(workout_id)
        .ok_or_else(|| Error::NotFound(format!("workout {}", workout_id)))?;
    if !workout.is_active {
        return Err(Error::Session(format!(
            "workout {} is finished and can no longer be edited",
            workout_id
        )));
    }
    Ok(workout.clone())
}

/// Append an exercise to an active workout
pub fn add_exercise(store: &GraphStore, workout_id: EntityId, exercise_id: &str) -> Result<WorkoutExercise> {
    let mut tx = store.begin();
    active_workout_in(&tx, workout_id)?;

    let position = tx
        .view()
        .exercises_of(workout_id)
        .last()
        .map(|e| e.position + 1)
        .unwrap_or(0);
    let exercise = WorkoutExercise::new(workout_id, position, exercise_id);
    tx.insert(Entity::WorkoutExercise(exercise.clone()));
    store.save(tx)?;

    tracing::debug!("Added {} to workout {}", exercise_id, workout_id);
    Ok(exercise)
}

/// Append a set to a workout exercise of the active workout
pub fn add_set(store: &GraphStore, workout_exercise_id: EntityId, input: SetInput) -> Result<WorkoutSet> {
    let mut tx = store.begin();
    let workout_id = tx
        .view()
        .workout_exercise(workout_exercise_id)
        .map(|e| e.workout_id)
        .ok_or_else(|| Error::NotFound(format!("workout exercise {}", workout_exercise_id)))?;
    active_workout_in(&tx, workout_id)?;

    let position = tx
        .view()
        .sets_of(workout_exercise_id)
        .last()
        .map(|s| s.position + 1)
        .unwrap_or(0);
    let set = WorkoutSet {
        target_reps: input.target_reps,
        tag: input.tag,
        rpe: input.rpe,
        comment: input.comment,
        is_completed: input.completed,
        ..WorkoutSet::new(workout_exercise_id, position, input.weight, input.reps)
    };
    tx.insert(Entity::WorkoutSet(set.clone()));
    store.save(tx)?;
    Ok(set)
}

/// Mark a set of the active workout complete or incomplete
pub fn set_completed(store: &GraphStore, set_id: EntityId, completed: bool) -> Result<WorkoutSet> {
    let mut tx = store.begin();
    let mut set = tx
        .view()
        .set(set_id)
        .cloned()
        .ok_or_else(|| Error::NotFound(format!("set {}", set_id)))?;
    let workout_id = tx
        .view()
        .workout_of(EntityKind::WorkoutSet, set_id)
        .ok_or_else(|| Error::NotFound(format!("workout of set {}", set_id)))?;
    active_workout_in(&tx, workout_id)?;

    set.is_completed = completed;
    tx.update(Entity::WorkoutSet(set.clone()))?;
    store.save(tx)?;
    Ok(set)
}

/// Stage the finish of an active workout into `tx`
pub fn finish_in(tx: &mut Transaction, workout_id: EntityId, now: DateTime<Utc>) -> Result<()> {
    let mut workout = active_workout_in(tx, workout_id)?;

    let exercises: Vec<EntityId> = tx.view().exercises_of(workout_id).iter().map(|e| e.id).collect();
    for exercise_id in exercises {
        let sets: Vec<(EntityId, bool)> = tx
            .view()
            .sets_of(exercise_id)
            .iter()
            .map(|s| (s.id, s.is_completed))
            .collect();
        if sets.iter().all(|(_, completed)| !completed) {
            tx.delete(EntityKind::WorkoutExercise, exercise_id)?;
            continue;
        }
        for (set_id, _) in sets.into_iter().filter(|(_, completed)| !completed) {
            tx.delete(EntityKind::WorkoutSet, set_id)?;
        }
    }

    workout.is_active = false;
    workout.end = Some(now);
    tx.update(Entity::Workout(workout))
}

/// Finish the active workout and commit the pruned result
pub fn finish_workout(store: &GraphStore, workout_id: EntityId, now: DateTime<Utc>) -> Result<ChangeSet> {
    let mut tx = store.begin();
    finish_in(&mut tx, workout_id, now)?;
    let change_set = store.save(tx)?;
    tracing::info!("Finished workout {}", workout_id);
    Ok(change_set)
}

/// Start a new active workout with the structure of a finished one.
///
/// Exercises, weights, reps, targets, tags and comments are copied; completion
/// state and RPE are not.
pub fn repeat_workout(store: &GraphStore, workout_id: EntityId, now: DateTime<Utc>) -> Result<Workout> {
    let snapshot = store.snapshot();
    let source = snapshot
        .workout(workout_id)
        .ok_or_else(|| Error::NotFound(format!("workout {}", workout_id)))?;

    let workout = Workout {
        id: Uuid::new_v4(),
        title: source.title.clone(),
        comment: None,
        start: Some(now),
        end: None,
        is_active: true,
        routine_id: source.routine_id,
    };

    let mut tx = store.begin();
    tx.insert(Entity::Workout(workout.clone()));
    for exercise in snapshot.exercises_of(workout_id) {
        let copy = WorkoutExercise {
            id: Uuid::new_v4(),
            workout_id: workout.id,
            ..exercise.clone()
        };
        for set in snapshot.sets_of(exercise.id) {
            tx.insert(Entity::WorkoutSet(WorkoutSet {
                id: Uuid::new_v4(),
                workout_exercise_id: copy.id,
                rpe: None,
                is_completed: false,
                ..set.clone()
            }));
        }
        tx.insert(Entity::WorkoutExercise(copy));
    }
    store.save(tx)?;

    tracing::info!("Repeated workout {} as {}", workout_id, workout.id);
    Ok(workout)
}

/// Delete a workout and everything beneath it
pub fn delete_workout(store: &GraphStore, workout_id: EntityId) -> Result<ChangeSet> {
    let mut tx = store.begin();
    tx.delete(EntityKind::Workout, workout_id)?;
    store.save(tx)
}
