//! Error types for the lift_core library.

use crate::validate::ConsistencyViolation;
use std::fmt;
use std::io;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Kind of reference that failed to resolve while materializing a snapshot
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReferenceKind {
    Routine,
    Exercise,
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceKind::Routine => f.write_str("routine"),
            ReferenceKind::Exercise => f.write_str("exercise"),
        }
    }
}

/// Core error type for lift_core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// IO error occurred
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// TOML parsing error
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A commit was rejected because it would break one or more invariants
    #[error("{}", describe_violations(.0))]
    Consistency(Vec<ConsistencyViolation>),

    /// Backup payload is missing a required field or has an unusable version
    #[error("Backup format error: {0}")]
    Format(String),

    /// Backup payload references a routine or exercise it does not define
    #[error("Dangling {kind} reference: {id}")]
    DanglingReference { kind: ReferenceKind, id: String },

    /// Reading or writing the custom catalog file failed; the file is unchanged
    #[error("Catalog I/O error: {0}")]
    CatalogIo(io::Error),

    /// Custom catalog mutation refused (duplicate title, unknown or built-in id)
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// The packaged built-in catalog could not be loaded
    #[error("Built-in catalog error: {0}")]
    BuiltinCatalog(String),

    /// Workout lifecycle misuse (e.g. finishing a workout that is not active)
    #[error("Session error: {0}")]
    Session(String),

    /// A restore is already running
    #[error("A restore is already in progress")]
    RestoreInProgress,

    /// Entity lookup failed
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Violations carried by a rejected commit, empty for every other error
    pub fn violations(&self) -> &[ConsistencyViolation] {
        match self {
            Error::Consistency(violations) => violations,
            _ => &[],
        }
    }
}

fn describe_violations(violations: &[ConsistencyViolation]) -> String {
    let parts: Vec<String> = violations.iter().map(ToString::to_string).collect();
    format!("Consistency violation: {}", parts.join("; "))
}
