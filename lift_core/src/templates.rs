//! Routine templates and the plans that group them.

use crate::graph::Entity;
use crate::store::GraphStore;
use crate::types::*;
use crate::{Error, Result};
use uuid::Uuid;

pub fn create_plan(store: &GraphStore, title: &str) -> Result<WorkoutPlan> {
    let plan = WorkoutPlan {
        id: Uuid::new_v4(),
        title: title.trim().to_string(),
    };
    let mut tx = store.begin();
    tx.insert(Entity::Plan(plan.clone()));
    store.save(tx)?;
    Ok(plan)
}

/// Create a routine, appended to the end of its plan when one is given
pub fn create_routine(store: &GraphStore, plan_id: Option<EntityId>, title: &str) -> Result<WorkoutRoutine> {
    let mut tx = store.begin();
    let position = match plan_id {
        Some(plan_id) => tx
            .view()
            .routines_of_plan(plan_id)
            .last()
            .map(|r| r.position + 1)
            .unwrap_or(0),
        None => 0,
    };
    let routine = WorkoutRoutine {
        id: Uuid::new_v4(),
        plan_id,
        position,
        title: title.trim().to_string(),
        comment: String::new(),
    };
    tx.insert(Entity::Routine(routine.clone()));
    store.save(tx)?;

    tracing::info!("Created routine {} ({})", routine.title, routine.id);
    Ok(routine)
}

pub fn add_routine_entry(
    store: &GraphStore,
    routine_id: EntityId,
    exercise_id: &str,
    target_sets: u32,
    target_reps: Option<RepRange>,
) -> Result<RoutineEntry> {
    let mut tx = store.begin();
    if tx.view().routine(routine_id).is_none() {
        return Err(Error::NotFound(format!("routine {}", routine_id)));
    }
    let position = tx
        .view()
        .entries_of(routine_id)
        .last()
        .map(|e| e.position + 1)
        .unwrap_or(0);
    let entry = RoutineEntry {
        id: Uuid::new_v4(),
        routine_id,
        position,
        exercise_id: exercise_id.to_string(),
        target_sets,
        target_reps,
        comment: String::new(),
    };
    tx.insert(Entity::RoutineEntry(entry.clone()));
    store.save(tx)?;
    Ok(entry)
}

pub fn delete_routine(store: &GraphStore, routine_id: EntityId) -> Result<()> {
    let mut tx = store.begin();
    tx.delete(EntityKind::Routine, routine_id)?;
    store.save(tx)?;
    Ok(())
}
