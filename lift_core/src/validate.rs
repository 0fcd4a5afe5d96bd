//! Commit-time invariant checks.
//!
//! Each entity kind has one validator function. The commit path calls
//! [`validate_commit`], which runs the validators for every entity touched by
//! the transaction (and every workout whose subtree was touched) and collects
//! all violations instead of stopping at the first.

use crate::graph::{Entity, Graph};
use crate::store::ChangeKind;
use crate::types::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Invariant broken by a pending commit
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// A workout has no start time
    MissingStart,
    /// A finished workout has no end time
    MissingEnd,
    /// A workout ends before it starts
    EndBeforeStart,
    /// More than one workout is active
    MultipleActive,
    /// A finished workout still has incomplete sets
    IncompleteSetsInFinished,
    /// An incomplete set exists outside the active workout
    IncompleteSetOutsideActive,
    /// An id is missing or already used
    InvalidId,
    /// A finished workout was made active again
    Reactivated,
    /// A field is outside its allowed range
    OutOfRange,
    /// A parent or template reference does not resolve
    DanglingParent,
}

impl ViolationCode {
    /// Stable numeric code reported to callers
    pub fn code(self) -> u8 {
        match self {
            ViolationCode::MissingStart => 1,
            ViolationCode::MissingEnd => 2,
            ViolationCode::EndBeforeStart => 3,
            ViolationCode::MultipleActive => 4,
            ViolationCode::IncompleteSetsInFinished => 5,
            ViolationCode::IncompleteSetOutsideActive => 6,
            ViolationCode::InvalidId => 7,
            ViolationCode::Reactivated => 8,
            ViolationCode::OutOfRange => 9,
            ViolationCode::DanglingParent => 10,
        }
    }
}

/// One offending entity and the invariant it breaks
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConsistencyViolation {
    pub entity_id: EntityId,
    pub kind: EntityKind,
    pub code: ViolationCode,
    pub message: String,
}

impl ConsistencyViolation {
    pub fn new(
        kind: EntityKind,
        entity_id: EntityId,
        code: ViolationCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity_id,
            kind,
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConsistencyViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}]: {}",
            self.kind,
            self.entity_id,
            self.code.code(),
            self.message
        )
    }
}

/// Validate the graph produced by applying `changes` to `before`.
pub fn validate_commit(
    before: &Graph,
    after: &Graph,
    changes: &BTreeMap<(EntityKind, EntityId), ChangeKind>,
) -> Vec<ConsistencyViolation> {
    let mut violations = Vec::new();
    let mut affected_workouts = BTreeSet::new();

    for (&(kind, id), change) in changes {
        if let Some(workout_id) = after
            .workout_of(kind, id)
            .or_else(|| before.workout_of(kind, id))
        {
            affected_workouts.insert(workout_id);
        }
        if *change == ChangeKind::Deleted {
            continue;
        }
        let Some(entity) = after.get(kind, id) else {
            continue;
        };
        violations.extend(match &entity {
            Entity::Workout(_) => Vec::new(), // covered through affected_workouts
            Entity::WorkoutExercise(e) => validate_workout_exercise(after, e),
            Entity::WorkoutSet(s) => validate_set(after, s),
            Entity::Plan(p) => validate_plan(p),
            Entity::Routine(r) => validate_routine(after, r),
            Entity::RoutineEntry(e) => validate_routine_entry(after, e),
        });
    }

    for workout_id in affected_workouts {
        if let Some(workout) = after.workout(workout_id) {
            violations.extend(validate_workout(before, after, workout));
        }
    }

    violations.extend(validate_single_active(after, changes));
    violations
}

/// Lifecycle, timing and routine reference checks for one workout
pub fn validate_workout(before: &Graph, after: &Graph, workout: &Workout) -> Vec<ConsistencyViolation> {
    let kind = EntityKind::Workout;
    let mut violations = Vec::new();

    if workout.id.is_nil() {
        violations.push(ConsistencyViolation::new(
            kind,
            workout.id,
            ViolationCode::InvalidId,
            "workout id is missing",
        ));
    }

    match (workout.start, workout.end) {
        (None, _) => violations.push(ConsistencyViolation::new(
            kind,
            workout.id,
            ViolationCode::MissingStart,
            "start is not set",
        )),
        (Some(start), Some(end)) if start > end => violations.push(ConsistencyViolation::new(
            kind,
            workout.id,
            ViolationCode::EndBeforeStart,
            format!("end {} is before start {}", end.to_rfc3339(), start.to_rfc3339()),
        )),
        _ => {}
    }

    if !workout.is_active {
        if workout.end.is_none() {
            violations.push(ConsistencyViolation::new(
                kind,
                workout.id,
                ViolationCode::MissingEnd,
                "finished workout has no end",
            ));
        }
        let incomplete = after
            .sets_of_workout(workout.id)
            .iter()
            .filter(|s| !s.is_completed)
            .count();
        if incomplete > 0 {
            violations.push(ConsistencyViolation::new(
                kind,
                workout.id,
                ViolationCode::IncompleteSetsInFinished,
                format!("finished workout has {} incomplete set(s)", incomplete),
            ));
        }
    } else if before.workout(workout.id).is_some_and(|w| !w.is_active) {
        violations.push(ConsistencyViolation::new(
            kind,
            workout.id,
            ViolationCode::Reactivated,
            "finished workouts cannot be reactivated",
        ));
    }

    if let Some(routine_id) = workout.routine_id {
        if after.routine(routine_id).is_none() {
            violations.push(ConsistencyViolation::new(
                kind,
                workout.id,
                ViolationCode::DanglingParent,
                format!("routine {} does not exist", routine_id),
            ));
        }
    }

    violations
}

pub fn validate_workout_exercise(graph: &Graph, exercise: &WorkoutExercise) -> Vec<ConsistencyViolation> {
    let kind = EntityKind::WorkoutExercise;
    let mut violations = Vec::new();
    if exercise.id.is_nil() || exercise.exercise_id.trim().is_empty() {
        violations.push(ConsistencyViolation::new(
            kind,
            exercise.id,
            ViolationCode::InvalidId,
            "workout exercise id or exercise reference is missing",
        ));
    }
    if graph.workout(exercise.workout_id).is_none() {
        violations.push(ConsistencyViolation::new(
            kind,
            exercise.id,
            ViolationCode::DanglingParent,
            format!("workout {} does not exist", exercise.workout_id),
        ));
    }
    violations
}

/// Field ranges and completion rules for one set
pub fn validate_set(graph: &Graph, set: &WorkoutSet) -> Vec<ConsistencyViolation> {
    let kind = EntityKind::WorkoutSet;
    let mut violations = Vec::new();

    if set.id.is_nil() {
        violations.push(ConsistencyViolation::new(
            kind,
            set.id,
            ViolationCode::InvalidId,
            "set id is missing",
        ));
    }
    if !set.weight.is_finite() || set.weight < 0.0 {
        violations.push(ConsistencyViolation::new(
            kind,
            set.id,
            ViolationCode::OutOfRange,
            format!("weight {} must be zero or more", set.weight),
        ));
    }
    if set.reps > MAX_REPS {
        violations.push(ConsistencyViolation::new(
            kind,
            set.id,
            ViolationCode::OutOfRange,
            format!("reps {} exceed {}", set.reps, MAX_REPS),
        ));
    }
    if set.target_reps.is_some_and(|range| !range.is_valid()) {
        violations.push(ConsistencyViolation::new(
            kind,
            set.id,
            ViolationCode::OutOfRange,
            "target rep range is inverted or too large",
        ));
    }

    let workout = graph
        .workout_exercise(set.workout_exercise_id)
        .and_then(|e| graph.workout(e.workout_id));
    match workout {
        None => violations.push(ConsistencyViolation::new(
            kind,
            set.id,
            ViolationCode::DanglingParent,
            format!("workout exercise {} does not exist", set.workout_exercise_id),
        )),
        Some(workout) if !set.is_completed && !workout.is_active => {
            violations.push(ConsistencyViolation::new(
                kind,
                set.id,
                ViolationCode::IncompleteSetOutsideActive,
                "incomplete set belongs to a finished workout",
            ))
        }
        Some(_) => {}
    }

    violations
}

pub fn validate_plan(plan: &WorkoutPlan) -> Vec<ConsistencyViolation> {
    let mut violations = Vec::new();
    if plan.id.is_nil() {
        violations.push(ConsistencyViolation::new(
            EntityKind::Plan,
            plan.id,
            ViolationCode::InvalidId,
            "plan id is missing",
        ));
    }
    violations
}

pub fn validate_routine(graph: &Graph, routine: &WorkoutRoutine) -> Vec<ConsistencyViolation> {
    let kind = EntityKind::Routine;
    let mut violations = Vec::new();
    if routine.id.is_nil() {
        violations.push(ConsistencyViolation::new(
            kind,
            routine.id,
            ViolationCode::InvalidId,
            "routine id is missing",
        ));
    }
    if let Some(plan_id) = routine.plan_id {
        if graph.plan(plan_id).is_none() {
            violations.push(ConsistencyViolation::new(
                kind,
                routine.id,
                ViolationCode::DanglingParent,
                format!("plan {} does not exist", plan_id),
            ));
        }
    }
    violations
}

pub fn validate_routine_entry(graph: &Graph, entry: &RoutineEntry) -> Vec<ConsistencyViolation> {
    let kind = EntityKind::RoutineEntry;
    let mut violations = Vec::new();
    if entry.id.is_nil() || entry.exercise_id.trim().is_empty() {
        violations.push(ConsistencyViolation::new(
            kind,
            entry.id,
            ViolationCode::InvalidId,
            "routine entry id or exercise reference is missing",
        ));
    }
    if entry.target_sets == 0 {
        violations.push(ConsistencyViolation::new(
            kind,
            entry.id,
            ViolationCode::OutOfRange,
            "target set count must be at least 1",
        ));
    }
    if entry.target_reps.is_some_and(|range| !range.is_valid()) {
        violations.push(ConsistencyViolation::new(
            kind,
            entry.id,
            ViolationCode::OutOfRange,
            "target rep range is inverted or too large",
        ));
    }
    if graph.routine(entry.routine_id).is_none() {
        violations.push(ConsistencyViolation::new(
            kind,
            entry.id,
            ViolationCode::DanglingParent,
            format!("routine {} does not exist", entry.routine_id),
        ));
    }
    violations
}

/// Single active workout rule, reported against the active workouts this commit touched
fn validate_single_active(
    after: &Graph,
    changes: &BTreeMap<(EntityKind, EntityId), ChangeKind>,
) -> Vec<ConsistencyViolation> {
    let active: Vec<&Workout> = after.workouts.values().filter(|w| w.is_active).collect();
    if active.len() <= 1 {
        return Vec::new();
    }

    let touched: Vec<&&Workout> = active
        .iter()
        .filter(|w| changes.contains_key(&(EntityKind::Workout, w.id)))
        .collect();
    let offenders: Vec<&Workout> = if touched.is_empty() {
        active.clone()
    } else {
        touched.into_iter().copied().collect()
    };

    offenders
        .into_iter()
        .map(|w| {
            ConsistencyViolation::new(
                EntityKind::Workout,
                w.id,
                ViolationCode::MultipleActive,
                format!("{} workouts would be active", active.len()),
            )
        })
        .collect()
}
