//! Restore journal.
//!
//! A restore touches two stores that cannot share one transaction: the graph
//! file and the custom catalog file. Before the catalog is replaced, the
//! restore writes a journal record holding the catalog's previous entries and
//! a marker that the graph commit will carry. If the process dies mid-restore,
//! [`recover_interrupted_restore`] uses the marker to decide whether the graph
//! commit landed, and otherwise puts the previous catalog back.

use crate::atomic;
use crate::catalog::ExerciseCatalog;
use crate::store::GraphStore;
use crate::types::Exercise;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Durable record of an in-flight restore
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JournalEntry {
    pub restore_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub undo_catalog: Vec<Exercise>,
}

/// Sink for restore journal records
pub trait RestoreJournal {
    /// Durably record that a restore is about to touch the stores
    fn begin(&mut self, entry: &JournalEntry) -> Result<()>;
    /// Forget the record once the restore has finished or fully rolled back
    fn finish(&mut self, restore_id: Uuid) -> Result<()>;
}

/// Journal kept as a single JSON file next to the data files
pub struct FileJournal {
    path: PathBuf,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The record left behind by an interrupted restore, if any
    pub fn pending(&self) -> Result<Option<JournalEntry>> {
        atomic::read_json(&self.path)
    }
}

impl RestoreJournal for FileJournal {
    fn begin(&mut self, entry: &JournalEntry) -> Result<()> {
        atomic::write_json(&self.path, entry, false)?;
        tracing::debug!("Journaled restore {} to {:?}", entry.restore_id, self.path);
        Ok(())
    }

    fn finish(&mut self, restore_id: Uuid) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::debug!("Cleared restore journal for {}", restore_id);
        Ok(())
    }
}

/// What startup recovery found
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// No restore was interrupted
    Clean,
    /// The graph commit landed; only the journal was left over
    Completed,
    /// The graph commit never landed; the catalog was rolled back
    RolledBack,
}

/// Reconcile the catalog with the graph after an interrupted restore
pub fn recover_interrupted_restore(
    journal: &mut FileJournal,
    store: &GraphStore,
    catalog: &mut ExerciseCatalog,
) -> Result<RecoveryOutcome> {
    let entry = match journal.pending() {
        Ok(Some(entry)) => entry,
        Ok(None) => return Ok(RecoveryOutcome::Clean),
        Err(Error::Json(e)) => {
            // A torn journal means the restore never got past writing it
            tracing::warn!("Discarding unreadable restore journal {:?}: {}", journal.path(), e);
            journal.finish(Uuid::nil())?;
            return Ok(RecoveryOutcome::Clean);
        }
        Err(e) => return Err(e),
    };

    let outcome = if store.snapshot().restore_marker() == Some(entry.restore_id) {
        tracing::info!("Restore {} had committed; clearing journal", entry.restore_id);
        RecoveryOutcome::Completed
    } else {
        tracing::warn!(
            "Restore {} was interrupted before commit; rolling back custom catalog ({} entries)",
            entry.restore_id,
            entry.undo_catalog.len()
        );
        catalog.replace_all(entry.undo_catalog)?;
        RecoveryOutcome::RolledBack
    };
    journal.finish(entry.restore_id)?;
    Ok(outcome)
}
