//! Core domain types for workout tracking.
//!
//! This module defines the entities held by the graph store and the
//! catalog:
//! - Exercises (catalog entries) and their editable drafts
//! - Workouts, the exercises performed in them, and their sets
//! - Routine templates grouped into plans
//!
//! Ownership is expressed with explicit parent-id fields; sibling order is the
//! `position` field.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Identifier of every graph entity
pub type EntityId = Uuid;

/// Maximum repetitions accepted for a single set
pub const MAX_REPS: u32 = 9999;

// ============================================================================
// Entity Kinds
// ============================================================================

/// Kind of entity held by the graph store
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Workout,
    WorkoutExercise,
    WorkoutSet,
    Plan,
    Routine,
    RoutineEntry,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::Workout => "workout",
            EntityKind::WorkoutExercise => "workout_exercise",
            EntityKind::WorkoutSet => "workout_set",
            EntityKind::Plan => "plan",
            EntityKind::Routine => "routine",
            EntityKind::RoutineEntry => "routine_entry",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Catalog Types
// ============================================================================

/// A named exercise definition referenced by id from workout data
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Exercise {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub primary_muscles: Vec<String>,
    #[serde(default)]
    pub secondary_muscles: Vec<String>,
    #[serde(default)]
    pub equipment: Vec<String>,
    #[serde(default)]
    pub instructions: Vec<String>,
    #[serde(default)]
    pub media: Vec<String>,
    /// Derived from the catalog the entry was loaded from, never persisted
    #[serde(skip)]
    pub is_custom: bool,
}

/// User-supplied fields for creating or replacing a custom exercise
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExerciseDraft {
    pub title: String,
    pub description: Option<String>,
    pub primary_muscles: Vec<String>,
    pub secondary_muscles: Vec<String>,
    pub equipment: Vec<String>,
    pub instructions: Vec<String>,
    pub media: Vec<String>,
}

impl ExerciseDraft {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Build a custom catalog entry with the given id and a trimmed title
    pub fn into_exercise(self, id: String) -> Exercise {
        Exercise {
            id,
            title: self.title.trim().to_string(),
            description: self.description,
            primary_muscles: self.primary_muscles,
            secondary_muscles: self.secondary_muscles,
            equipment: self.equipment,
            instructions: self.instructions,
            media: self.media,
            is_custom: true,
        }
    }
}

// ============================================================================
// Set Details
// ============================================================================

/// Target repetition range for a set or routine entry
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RepRange {
    pub min: u32,
    pub max: u32,
}

impl RepRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    pub fn is_valid(&self) -> bool {
        self.min <= self.max && self.max <= MAX_REPS
    }
}

/// Marker distinguishing special sets
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SetTag {
    Warmup,
    Drop,
    Failure,
}

/// Rate of perceived exertion, restricted to half steps between 6 and 10
///
/// Stored as twice the rating so the ladder stays integral.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rpe(u8);

impl Rpe {
    pub const LADDER: [f64; 9] = [6.0, 6.5, 7.0, 7.5, 8.0, 8.5, 9.0, 9.5, 10.0];

    /// Returns `None` for any value off the ladder
    pub fn new(value: f64) -> Option<Self> {
        if !value.is_finite() {
            return None;
        }
        let doubled = value * 2.0;
        if doubled.fract() != 0.0 || !(12.0..=20.0).contains(&doubled) {
            return None;
        }
        Some(Self(doubled as u8))
    }

    pub fn value(self) -> f64 {
        f64::from(self.0) / 2.0
    }
}

impl Serialize for Rpe {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_f64(self.value())
    }
}

/// Off-ladder or malformed ratings deserialize as absent rather than failing
pub(crate) fn lenient_rpe<'de, D>(deserializer: D) -> std::result::Result<Option<Rpe>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(raw.and_then(|v| v.as_f64()).and_then(Rpe::new))
}

// ============================================================================
// Workout Graph
// ============================================================================

/// A single set, owned by one workout exercise
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutSet {
    pub id: EntityId,
    pub workout_exercise_id: EntityId,
    pub position: u32,
    pub weight: f64,
    pub reps: u32,
    #[serde(default)]
    pub target_reps: Option<RepRange>,
    #[serde(default)]
    pub tag: Option<SetTag>,
    #[serde(default, deserialize_with = "lenient_rpe")]
    pub rpe: Option<Rpe>,
    #[serde(default)]
    pub comment: String,
    pub is_completed: bool,
}

impl WorkoutSet {
    pub fn new(workout_exercise_id: EntityId, position: u32, weight: f64, reps: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            workout_exercise_id,
            position,
            weight,
            reps,
            target_reps: None,
            tag: None,
            rpe: None,
            comment: String::new(),
            is_completed: false,
        }
    }
}

/// An exercise performed within a workout, owned by that workout
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutExercise {
    pub id: EntityId,
    pub workout_id: EntityId,
    pub position: u32,
    pub exercise_id: String,
    #[serde(default)]
    pub comment: String,
}

impl WorkoutExercise {
    pub fn new(workout_id: EntityId, position: u32, exercise_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            workout_id,
            position,
            exercise_id: exercise_id.into(),
            comment: String::new(),
        }
    }
}

/// A workout session, the aggregate root of its exercises and sets
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Workout {
    pub id: EntityId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
    pub is_active: bool,
    #[serde(default)]
    pub routine_id: Option<EntityId>,
}

impl Workout {
    /// A new in-progress session starting at `start`
    pub fn new_active(start: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: None,
            comment: None,
            start: Some(start),
            end: None,
            is_active: true,
            routine_id: None,
        }
    }
}

// ============================================================================
// Templates
// ============================================================================

/// A named group of routines
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutPlan {
    pub id: EntityId,
    pub title: String,
}

/// A workout template, optionally part of a plan
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutRoutine {
    pub id: EntityId,
    #[serde(default)]
    pub plan_id: Option<EntityId>,
    pub position: u32,
    pub title: String,
    #[serde(default)]
    pub comment: String,
}

/// One exercise slot within a routine
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoutineEntry {
    pub id: EntityId,
    pub routine_id: EntityId,
    pub position: u32,
    pub exercise_id: String,
    pub target_sets: u32,
    #[serde(default)]
    pub target_reps: Option<RepRange>,
    #[serde(default)]
    pub comment: String,
}
