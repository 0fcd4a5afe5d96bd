//! Versioned backup snapshots of catalog, templates and workout history.
//!
//! Encoding always writes the current layout. Decoding reads the
//! `format_version` tag first and hands the payload to the decoder for that
//! version, which upgrades it into the current [`Snapshot`]:
//!
//! - v1: no entity ids and no templates
//! - v2: ids on workouts, exercises and sets
//! - v3: routine templates and plans, ids everywhere (a missing `plans`
//!   list reads as empty)

use crate::catalog::BuiltinCatalog;
use crate::error::ReferenceKind;
use crate::graph::{Entity, Graph, WorkoutOrder};
use crate::store::Transaction;
use crate::types::*;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

/// Newest layout this build writes and reads
pub const FORMAT_VERSION: u64 = 3;

const REQUIRED_FIELDS: [&str; 4] = [
    "format_version",
    "created_at",
    "custom_catalog_entries",
    "workout_history",
];

// ============================================================================
// Current Layout
// ============================================================================

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub format_version: u64,
    pub created_at: DateTime<Utc>,
    pub custom_catalog_entries: Vec<Exercise>,
    #[serde(default)]
    pub routine_templates: Vec<RoutineRecord>,
    /// Every plan, including those no routine belongs to
    #[serde(default)]
    pub plans: Vec<PlanRecord>,
    pub workout_history: Vec<WorkoutRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanRecord {
    pub id: EntityId,
    pub title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoutineRecord {
    pub id: EntityId,
    pub title: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub plan: Option<PlanRecord>,
    #[serde(default)]
    pub entries: Vec<RoutineEntryRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RoutineEntryRecord {
    pub id: EntityId,
    pub exercise_id: String,
    pub target_sets: u32,
    #[serde(default)]
    pub target_reps: Option<RepRange>,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WorkoutRecord {
    pub id: EntityId,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// Id of a routine in `routine_templates`
    #[serde(default)]
    pub routine_id: Option<String>,
    #[serde(default)]
    pub exercises: Vec<ExerciseRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ExerciseRecord {
    pub id: EntityId,
    pub exercise_id: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub sets: Vec<SetRecord>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SetRecord {
    pub id: EntityId,
    pub weight: f64,
    pub reps: u32,
    #[serde(default)]
    pub target_reps: Option<RepRange>,
    #[serde(default)]
    pub tag: Option<SetTag>,
    #[serde(default, deserialize_with = "crate::types::lenient_rpe")]
    pub rpe: Option<Rpe>,
    #[serde(default)]
    pub comment: String,
    pub is_completed: bool,
}

// ============================================================================
// Version 2: ids on history entries, no templates
// ============================================================================

#[derive(Debug, Deserialize)]
struct SnapshotV2 {
    created_at: DateTime<Utc>,
    custom_catalog_entries: Vec<Exercise>,
    workout_history: Vec<WorkoutV2>,
}

#[derive(Debug, Deserialize)]
struct WorkoutV2 {
    id: EntityId,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    exercises: Vec<ExerciseV2>,
}

#[derive(Debug, Deserialize)]
struct ExerciseV2 {
    id: EntityId,
    exercise_id: String,
    #[serde(default)]
    comment: String,
    #[serde(default)]
    sets: Vec<SetV2>,
}

#[derive(Debug, Deserialize)]
struct SetV2 {
    id: EntityId,
    weight: f64,
    reps: u32,
    #[serde(default)]
    tag: Option<SetTag>,
    #[serde(default, deserialize_with = "crate::types::lenient_rpe")]
    rpe: Option<Rpe>,
    #[serde(default)]
    comment: String,
    is_completed: bool,
}

impl SnapshotV2 {
    fn upgrade(self) -> Snapshot {
        Snapshot {
            format_version: FORMAT_VERSION,
            created_at: self.created_at,
            custom_catalog_entries: self.custom_catalog_entries,
            routine_templates: Vec::new(),
            plans: Vec::new(),
            workout_history: self
                .workout_history
                .into_iter()
                .map(|w| WorkoutRecord {
                    id: w.id,
                    title: w.title,
                    comment: w.comment,
                    start: w.start,
                    end: w.end,
                    routine_id: None,
                    exercises: w
                        .exercises
                        .into_iter()
                        .map(|e| ExerciseRecord {
                            id: e.id,
                            exercise_id: e.exercise_id,
                            comment: e.comment,
                            sets: e
                                .sets
                                .into_iter()
                                .map(|s| SetRecord {
                                    id: s.id,
                                    weight: s.weight,
                                    reps: s.reps,
                                    target_reps: None,
                                    tag: s.tag,
                                    rpe: s.rpe,
                                    comment: s.comment,
                                    is_completed: s.is_completed,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// Version 1: positional history, no ids
// ============================================================================

#[derive(Debug, Deserialize)]
struct SnapshotV1 {
    created_at: DateTime<Utc>,
    custom_catalog_entries: Vec<Exercise>,
    workout_history: Vec<WorkoutV1>,
}

#[derive(Debug, Deserialize)]
struct WorkoutV1 {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    comment: Option<String>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    #[serde(default)]
    exercises: Vec<ExerciseV1>,
}

#[derive(Debug, Deserialize)]
struct ExerciseV1 {
    exercise_id: String,
    #[serde(default)]
    sets: Vec<SetV1>,
}

#[derive(Debug, Deserialize)]
struct SetV1 {
    weight: f64,
    reps: u32,
    #[serde(default, deserialize_with = "crate::types::lenient_rpe")]
    rpe: Option<Rpe>,
    is_completed: bool,
}

impl SnapshotV1 {
    /// Fresh ids are generated for every history entry
    fn upgrade(self) -> Snapshot {
        Snapshot {
            format_version: FORMAT_VERSION,
            created_at: self.created_at,
            custom_catalog_entries: self.custom_catalog_entries,
            routine_templates: Vec::new(),
            plans: Vec::new(),
            workout_history: self
                .workout_history
                .into_iter()
                .map(|w| WorkoutRecord {
                    id: Uuid::new_v4(),
                    title: w.title,
                    comment: w.comment,
                    start: w.start,
                    end: w.end,
                    routine_id: None,
                    exercises: w
                        .exercises
                        .into_iter()
                        .map(|e| ExerciseRecord {
                            id: Uuid::new_v4(),
                            exercise_id: e.exercise_id,
                            comment: String::new(),
                            sets: e
                                .sets
                                .into_iter()
                                .map(|s| SetRecord {
                                    id: Uuid::new_v4(),
                                    weight: s.weight,
                                    reps: s.reps,
                                    target_reps: None,
                                    tag: None,
                                    rpe: s.rpe,
                                    comment: String::new(),
                                    is_completed: s.is_completed,
                                })
                                .collect(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }
}

// ============================================================================
// Encode / Decode
// ============================================================================

pub fn encode(snapshot: &Snapshot, pretty: bool) -> Result<Vec<u8>> {
    let bytes = if pretty {
        serde_json::to_vec_pretty(snapshot)?
    } else {
        serde_json::to_vec(snapshot)?
    };
    Ok(bytes)
}

/// Parse any supported snapshot version into the current layout
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    let value: serde_json::Value = serde_json::from_slice(bytes)
        .map_err(|e| Error::Format(format!("snapshot is not valid JSON: {}", e)))?;
    let object = value
        .as_object()
        .ok_or_else(|| Error::Format("snapshot must be a JSON object".into()))?;

    for field in REQUIRED_FIELDS {
        if object.get(field).map_or(true, serde_json::Value::is_null) {
            return Err(Error::Format(format!("missing field `{}`", field)));
        }
    }

    let version = object
        .get("format_version")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| Error::Format("`format_version` must be a positive integer".into()))?;

    tracing::debug!("Decoding snapshot format version {}", version);
    let mut snapshot = match version {
        1 => parse::<SnapshotV1>(value, version)?.upgrade(),
        2 => parse::<SnapshotV2>(value, version)?.upgrade(),
        3 => parse::<Snapshot>(value, version)?,
        v if v > FORMAT_VERSION => {
            return Err(Error::Format(format!(
                "format version {} is newer than supported version {}",
                v, FORMAT_VERSION
            )))
        }
        v => return Err(Error::Format(format!("unknown format version {}", v))),
    };
    for entry in &mut snapshot.custom_catalog_entries {
        entry.is_custom = true;
    }
    Ok(snapshot)
}

fn parse<T: serde::de::DeserializeOwned>(value: serde_json::Value, version: u64) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::Format(format!("invalid version {} snapshot: {}", version, e)))
}

// ============================================================================
// Graph <-> Snapshot
// ============================================================================

/// Capture templates and finished history. The active workout is never exported.
pub fn create_snapshot(graph: &Graph, custom_entries: &[Exercise], created_at: DateTime<Utc>) -> Snapshot {
    let routine_templates = graph
        .routines()
        .into_iter()
        .map(|routine| RoutineRecord {
            id: routine.id,
            title: routine.title.clone(),
            comment: routine.comment.clone(),
            plan: routine
                .plan_id
                .and_then(|id| graph.plan(id))
                .map(|plan| PlanRecord {
                    id: plan.id,
                    title: plan.title.clone(),
                }),
            entries: graph
                .entries_of(routine.id)
                .into_iter()
                .map(|e| RoutineEntryRecord {
                    id: e.id,
                    exercise_id: e.exercise_id.clone(),
                    target_sets: e.target_sets,
                    target_reps: e.target_reps,
                    comment: e.comment.clone(),
                })
                .collect(),
        })
        .collect();

    let workout_history = graph
        .workouts_where(|w| !w.is_active, WorkoutOrder::StartAscending)
        .into_iter()
        .map(|workout| WorkoutRecord {
            id: workout.id,
            title: workout.title.clone(),
            comment: workout.comment.clone(),
            start: workout.start,
            end: workout.end,
            routine_id: workout.routine_id.map(|id| id.to_string()),
            exercises: graph
                .exercises_of(workout.id)
                .into_iter()
                .map(|e| ExerciseRecord {
                    id: e.id,
                    exercise_id: e.exercise_id.clone(),
                    comment: e.comment.clone(),
                    sets: graph
                        .sets_of(e.id)
                        .into_iter()
                        .map(|s| SetRecord {
                            id: s.id,
                            weight: s.weight,
                            reps: s.reps,
                            target_reps: s.target_reps,
                            tag: s.tag,
                            rpe: s.rpe,
                            comment: s.comment.clone(),
                            is_completed: s.is_completed,
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    Snapshot {
        format_version: FORMAT_VERSION,
        created_at,
        custom_catalog_entries: custom_entries.to_vec(),
        routine_templates,
        plans: graph
            .plans()
            .into_iter()
            .map(|plan| PlanRecord {
                id: plan.id,
                title: plan.title.clone(),
            })
            .collect(),
        workout_history,
    }
}

/// Stage every snapshot entity into `tx`.
///
/// Templates go in first so history can be checked against them. Exercise
/// references must resolve to a built-in entry or one of the snapshot's own
/// custom entries.
pub fn materialize(snapshot: &Snapshot, builtin: &BuiltinCatalog, tx: &mut Transaction) -> Result<()> {
    let custom_ids: HashSet<&str> = snapshot
        .custom_catalog_entries
        .iter()
        .map(|e| e.id.as_str())
        .collect();
    let check_exercise = |id: &str| -> Result<()> {
        if builtin.get(id).is_some() || custom_ids.contains(id) {
            Ok(())
        } else {
            Err(Error::DanglingReference {
                kind: ReferenceKind::Exercise,
                id: id.to_string(),
            })
        }
    };

    let mut plans: HashMap<EntityId, u32> = HashMap::new();
    for plan in &snapshot.plans {
        plans.entry(plan.id).or_insert_with(|| {
            tx.insert(Entity::Plan(WorkoutPlan {
                id: plan.id,
                title: plan.title.clone(),
            }));
            0
        });
    }
    let mut routines = HashSet::new();
    for routine in &snapshot.routine_templates {
        let position = match &routine.plan {
            Some(plan) => {
                let next = plans.entry(plan.id).or_insert_with(|| {
                    tx.insert(Entity::Plan(WorkoutPlan {
                        id: plan.id,
                        title: plan.title.clone(),
                    }));
                    0
                });
                let position = *next;
                *next += 1;
                position
            }
            None => 0,
        };
        tx.insert(Entity::Routine(WorkoutRoutine {
            id: routine.id,
            plan_id: routine.plan.as_ref().map(|p| p.id),
            position,
            title: routine.title.clone(),
            comment: routine.comment.clone(),
        }));
        for (position, entry) in (0u32..).zip(&routine.entries) {
            check_exercise(&entry.exercise_id)?;
            tx.insert(Entity::RoutineEntry(RoutineEntry {
                id: entry.id,
                routine_id: routine.id,
                position,
                exercise_id: entry.exercise_id.clone(),
                target_sets: entry.target_sets,
                target_reps: entry.target_reps,
                comment: entry.comment.clone(),
            }));
        }
        routines.insert(routine.id);
    }

    for workout in &snapshot.workout_history {
        let routine_id = match &workout.routine_id {
            Some(reference) => Some(
                Uuid::parse_str(reference)
                    .ok()
                    .filter(|id| routines.contains(id))
                    .ok_or_else(|| Error::DanglingReference {
                        kind: ReferenceKind::Routine,
                        id: reference.clone(),
                    })?,
            ),
            None => None,
        };
        tx.insert(Entity::Workout(Workout {
            id: workout.id,
            title: workout.title.clone(),
            comment: workout.comment.clone(),
            start: workout.start,
            end: workout.end,
            is_active: false,
            routine_id,
        }));

        for (position, exercise) in (0u32..).zip(&workout.exercises) {
            check_exercise(&exercise.exercise_id)?;
            tx.insert(Entity::WorkoutExercise(WorkoutExercise {
                id: exercise.id,
                workout_id: workout.id,
                position,
                exercise_id: exercise.exercise_id.clone(),
                comment: exercise.comment.clone(),
            }));
            for (position, set) in (0u32..).zip(&exercise.sets) {
                tx.insert(Entity::WorkoutSet(WorkoutSet {
                    id: set.id,
                    workout_exercise_id: exercise.id,
                    position,
                    weight: set.weight,
                    reps: set.reps,
                    target_reps: set.target_reps,
                    tag: set.tag,
                    rpe: set.rpe,
                    comment: set.comment.clone(),
                    is_completed: set.is_completed,
                }));
            }
        }
    }

    tracing::debug!(
        "Materialized {} routines and {} workouts",
        snapshot.routine_templates.len(),
        snapshot.workout_history.len()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{self, SetInput};
    use crate::store::GraphStore;
    use crate::templates;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 10, hour, 0, 0).unwrap()
    }

    fn builtin() -> std::sync::Arc<BuiltinCatalog> {
        BuiltinCatalog::packaged().unwrap()
    }

    fn populated_store() -> GraphStore {
        let store = GraphStore::in_memory();
        let plan = templates::create_plan(&store, "Strength").unwrap();
        let routine = templates::create_routine(&store, Some(plan.id), "Heavy Day").unwrap();
        templates::add_routine_entry(&store, routine.id, "back_squat", 5, Some(RepRange::new(3, 5)))
            .unwrap();

        let workout = session::start_from_routine(&store, routine.id, at(7)).unwrap();
        let exercise = store.snapshot().exercises_of(workout.id)[0].id;
        let sets: Vec<_> = store.snapshot().sets_of(exercise).iter().map(|s| s.id).collect();
        for set in &sets[..3] {
            session::set_completed(&store, *set, true).unwrap();
        }
        session::finish_workout(&store, workout.id, at(8)).unwrap();

        let other = session::start_workout(&store, at(17), Some("Evening".into())).unwrap();
        let bench = session::add_exercise(&store, other.id, "bench_press").unwrap();
        let mut input = SetInput::new(82.5, 6).completed();
        input.rpe = Rpe::new(8.5);
        input.tag = Some(SetTag::Failure);
        session::add_set(&store, bench.id, input).unwrap();
        session::finish_workout(&store, other.id, at(18)).unwrap();
        store
    }

    #[test]
    fn test_round_trip_preserves_ids_and_values() {
        let store = populated_store();
        let custom = vec![ExerciseDraft::titled("Belt Squat").into_exercise("custom-1".into())];
        let snapshot = create_snapshot(&store.snapshot(), &custom, at(20));

        let decoded = decode(&encode(&snapshot, true).unwrap()).unwrap();
        assert_eq!(decoded, snapshot);
        assert_eq!(decoded.workout_history.len(), 2);
        assert_eq!(decoded.routine_templates[0].entries.len(), 1);
    }

    #[test]
    fn test_active_workout_not_exported() {
        let store = populated_store();
        let active = session::start_workout(&store, at(21), None).unwrap();

        let snapshot = create_snapshot(&store.snapshot(), &[], at(22));
        assert!(snapshot.workout_history.iter().all(|w| w.id != active.id));
        assert_eq!(snapshot.workout_history.len(), 2);
    }

    #[test]
    fn test_materialized_snapshot_matches_source() {
        let source = populated_store();
        let snapshot = create_snapshot(&source.snapshot(), &[], at(20));

        let target = GraphStore::in_memory();
        let mut tx = target.begin();
        materialize(&snapshot, &builtin(), &mut tx).unwrap();
        target.save(tx).unwrap();

        assert_eq!(create_snapshot(&target.snapshot(), &[], at(20)), snapshot);
    }

    #[test]
    fn test_plan_without_routines_survives() {
        let source = populated_store();
        let empty = templates::create_plan(&source, "Deload").unwrap();
        let snapshot = create_snapshot(&source.snapshot(), &[], at(20));
        assert_eq!(snapshot.plans.len(), 2);

        let decoded = decode(&encode(&snapshot, false).unwrap()).unwrap();
        let target = GraphStore::in_memory();
        let mut tx = target.begin();
        materialize(&decoded, &builtin(), &mut tx).unwrap();
        target.save(tx).unwrap();

        let restored = target.snapshot();
        assert_eq!(restored.plan(empty.id).map(|p| p.title.as_str()), Some("Deload"));
        assert_eq!(restored.plans().len(), 2);
        assert!(restored.routines_of_plan(empty.id).is_empty());
    }

    #[test]
    fn test_v1_snapshot_gets_fresh_ids() {
        let payload = json!({
            "format_version": 1,
            "created_at": "2023-01-01T10:00:00Z",
            "custom_catalog_entries": [],
            "workout_history": [
                {
                    "start": "2022-12-30T08:00:00Z",
                    "end": "2022-12-30T09:00:00Z",
                    "exercises": [
                        {"exercise_id": "deadlift", "sets": [
                            {"weight": 180.0, "reps": 3, "rpe": 9.0, "is_completed": true},
                            {"weight": 180.0, "reps": 3, "rpe": 9.2, "is_completed": true}
                        ]}
                    ]
                },
                {
                    "start": "2022-12-31T08:00:00Z",
                    "end": "2022-12-31T09:00:00Z",
                    "exercises": []
                }
            ]
        });

        let snapshot = decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(snapshot.format_version, FORMAT_VERSION);
        assert!(snapshot.routine_templates.is_empty());

        let sets = &snapshot.workout_history[0].exercises[0].sets;
        assert_eq!(sets[0].rpe.map(Rpe::value), Some(9.0));
        assert!(sets[1].rpe.is_none());

        let mut ids = HashSet::new();
        for workout in &snapshot.workout_history {
            assert!(ids.insert(workout.id));
            for exercise in &workout.exercises {
                assert!(ids.insert(exercise.id));
                for set in &exercise.sets {
                    assert!(ids.insert(set.id));
                }
            }
        }
        assert_eq!(ids.len(), 5);

        let store = GraphStore::in_memory();
        let mut tx = store.begin();
        materialize(&snapshot, &builtin(), &mut tx).unwrap();
        store.save(tx).unwrap();
        assert_eq!(store.snapshot().finished_workouts().len(), 2);
    }

    #[test]
    fn test_v2_snapshot_keeps_ids() {
        let workout_id = Uuid::new_v4();
        let payload = json!({
            "format_version": 2,
            "created_at": "2023-06-01T10:00:00Z",
            "custom_catalog_entries": [{"id": "c1", "title": "Sissy Squat"}],
            "workout_history": [{
                "id": workout_id,
                "start": "2023-05-30T08:00:00Z",
                "end": "2023-05-30T09:00:00Z",
                "exercises": [{"id": Uuid::new_v4(), "exercise_id": "c1", "sets": [
                    {"id": Uuid::new_v4(), "weight": 0.0, "reps": 15, "is_completed": true}
                ]}]
            }]
        });

        let snapshot = decode(payload.to_string().as_bytes()).unwrap();
        assert_eq!(snapshot.workout_history[0].id, workout_id);
        assert_eq!(snapshot.custom_catalog_entries[0].title, "Sissy Squat");
    }

    #[test]
    fn test_missing_required_field_is_format_error() {
        for field in REQUIRED_FIELDS {
            let mut payload = json!({
                "format_version": 3,
                "created_at": "2024-01-01T00:00:00Z",
                "custom_catalog_entries": [],
                "routine_templates": [],
                "workout_history": []
            });
            payload.as_object_mut().unwrap().remove(field);
            let err = decode(payload.to_string().as_bytes()).unwrap_err();
            assert!(matches!(err, Error::Format(_)), "{}: {:?}", field, err);
        }
    }

    #[test]
    fn test_bad_payloads_are_format_errors() {
        let newer = json!({
            "format_version": FORMAT_VERSION + 1,
            "created_at": "2024-01-01T00:00:00Z",
            "custom_catalog_entries": [],
            "workout_history": []
        });
        let bad_date = json!({
            "format_version": 3,
            "created_at": "yesterday",
            "custom_catalog_entries": [],
            "workout_history": []
        });
        for payload in [newer.to_string(), bad_date.to_string(), "[]".into(), "{".into()] {
            assert!(matches!(decode(payload.as_bytes()), Err(Error::Format(_))));
        }
    }

    #[test]
    fn test_unknown_routine_reference_is_dangling() {
        let mut snapshot = create_snapshot(&populated_store().snapshot(), &[], at(20));
        snapshot.routine_templates.clear();

        let store = GraphStore::in_memory();
        let mut tx = store.begin();
        let err = materialize(&snapshot, &builtin(), &mut tx).unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference {
                kind: ReferenceKind::Routine,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_exercise_reference_is_dangling() {
        let mut snapshot = create_snapshot(&populated_store().snapshot(), &[], at(20));
        snapshot.workout_history[1].exercises[0].exercise_id = "no-such-lift".into();

        let store = GraphStore::in_memory();
        let mut tx = store.begin();
        let err = materialize(&snapshot, &builtin(), &mut tx).unwrap_err();
        assert!(matches!(
            err,
            Error::DanglingReference {
                kind: ReferenceKind::Exercise,
                ..
            }
        ));
    }

    #[test]
    fn test_inconsistent_history_rejected_on_commit() {
        let mut snapshot = create_snapshot(&populated_store().snapshot(), &[], at(20));
        let workout = &mut snapshot.workout_history[0];
        workout.end = workout.start.map(|s| s - Duration::hours(1));

        let store = GraphStore::in_memory();
        let mut tx = store.begin();
        materialize(&snapshot, &builtin(), &mut tx).unwrap();
        let err = store.save(tx).unwrap_err();
        assert_eq!(err.violations()[0].code.code(), 3);
    }
}
