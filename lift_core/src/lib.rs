#![forbid(unsafe_code)]

//! Core data layer for the Lift workout tracker.
//!
//! This crate provides:
//! - Domain types (exercises, workouts, sets, routine templates)
//! - A validating object graph store with single-writer commits
//! - Session lifecycle (start, log, finish, repeat)
//! - Exercise catalog (built-in plus custom entries)
//! - Aggregate change notifications
//! - Versioned backup and all-or-nothing restore
//! - Persistence helpers, CSV export, configuration and logging

pub mod types;
pub mod error;
pub mod atomic;
pub mod graph;
pub mod validate;
pub mod store;
pub mod session;
pub mod templates;
pub mod catalog;
pub mod notifier;
pub mod backup;
pub mod journal;
pub mod restore;
pub mod export;
pub mod config;
pub mod logging;
pub mod library;

// Re-export commonly used types
pub use error::{Error, Result};
pub use types::*;
pub use catalog::{BuiltinCatalog, ExerciseCatalog};
pub use config::Config;
pub use graph::{Entity, Graph, WorkoutOrder};
pub use library::Library;
pub use notifier::{AggregateEvent, AggregateRoot, Notifier};
pub use restore::{RestoreEvent, RestoreMonitor, RestorePhase};
pub use session::SetInput;
pub use store::{ChangeKind, ChangeSet, GraphStore, Transaction};
pub use validate::{ConsistencyViolation, ViolationCode};
