//! Exercise catalog: built-in entries plus a user-editable custom list.
//!
//! The built-in catalog ships inside the binary and is parsed once. A broken
//! built-in catalog is fatal; there is nothing sensible to fall back to.
//!
//! The custom catalog is a single JSON file. Each mutation re-reads the file,
//! applies the change in memory and writes the whole list back atomically, so
//! a refused mutation never touches the file and a crash never truncates it.

use crate::atomic;
use crate::types::*;
use crate::{Error, Result};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

const PACKAGED_CATALOG: &str = include_str!("../assets/builtin_exercises.json");

/// Packaged catalog, parsed on first use and shared afterwards
static PACKAGED: Lazy<std::result::Result<Arc<BuiltinCatalog>, String>> = Lazy::new(|| {
    BuiltinCatalog::from_json(PACKAGED_CATALOG)
        .map(Arc::new)
        .map_err(|e| e.to_string())
});

// ============================================================================
// Built-in Catalog
// ============================================================================

/// Immutable exercises shipped with the application
#[derive(Clone, Debug)]
pub struct BuiltinCatalog {
    entries: Vec<Exercise>,
    index: HashMap<String, usize>,
}

impl BuiltinCatalog {
    /// The catalog packaged with this build
    pub fn packaged() -> Result<Arc<Self>> {
        PACKAGED.clone().map_err(Error::BuiltinCatalog)
    }

    /// Parse and validate a built-in catalog resource
    pub fn from_json(json: &str) -> Result<Self> {
        let mut entries: Vec<Exercise> = serde_json::from_str(json)
            .map_err(|e| Error::BuiltinCatalog(format!("unparseable resource: {}", e)))?;
        for entry in &mut entries {
            entry.is_custom = false;
        }

        let catalog = Self::from_entries(entries);
        let errors = catalog.validate();
        if !errors.is_empty() {
            return Err(Error::BuiltinCatalog(errors.join("; ")));
        }
        tracing::debug!("Loaded {} built-in exercises", catalog.entries.len());
        Ok(catalog)
    }

    fn from_entries(entries: Vec<Exercise>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.id.clone(), i))
            .collect();
        Self { entries, index }
    }

    /// Returns a list of validation errors, or empty Vec if valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        let mut titles = HashSet::new();

        if self.index.len() != self.entries.len() {
            errors.push("Built-in catalog has duplicate ids".to_string());
        }
        for exercise in &self.entries {
            if exercise.id.trim().is_empty() {
                errors.push(format!("Exercise '{}' has empty ID", exercise.title));
            }
            if exercise.title.trim().is_empty() {
                errors.push(format!("Exercise '{}' has empty title", exercise.id));
            }
            if !titles.insert(normalize_title(&exercise.title)) {
                errors.push(format!("Duplicate title '{}'", exercise.title));
            }
        }
        errors
    }

    pub fn get(&self, id: &str) -> Option<&Exercise> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[Exercise] {
        &self.entries
    }
}

// ============================================================================
// Custom Catalog File Schemas
// ============================================================================

/// Earlier custom-catalog layout: numeric ids, otherwise current fields
#[derive(Debug, Deserialize)]
struct NumericIdEntry {
    #[allow(dead_code)]
    id: u64,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    primary_muscles: Vec<String>,
    #[serde(default)]
    secondary_muscles: Vec<String>,
    #[serde(default)]
    equipment: Vec<String>,
    #[serde(default)]
    instructions: Vec<String>,
    #[serde(default)]
    media: Vec<String>,
}

/// Oldest custom-catalog layout: numeric ids, `name` and a single muscle list
#[derive(Debug, Deserialize)]
struct NamedEntry {
    #[allow(dead_code)]
    id: u64,
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    muscles: Vec<String>,
}

/// Outcome of parsing the custom catalog file
#[derive(Debug)]
enum Parsed {
    Current(Vec<Exercise>),
    Migrated(Vec<Exercise>),
    Unreadable,
}

fn parse_custom(contents: &str) -> Parsed {
    if let Ok(mut entries) = serde_json::from_str::<Vec<Exercise>>(contents) {
        for entry in &mut entries {
            entry.is_custom = true;
        }
        return Parsed::Current(entries);
    }

    if let Ok(legacy) = serde_json::from_str::<Vec<NumericIdEntry>>(contents) {
        tracing::info!("Migrating {} custom exercises from numeric-id schema", legacy.len());
        return Parsed::Migrated(
            legacy
                .into_iter()
                .map(|e| Exercise {
                    id: new_custom_id(),
                    title: e.title,
                    description: e.description,
                    primary_muscles: e.primary_muscles,
                    secondary_muscles: e.secondary_muscles,
                    equipment: e.equipment,
                    instructions: e.instructions,
                    media: e.media,
                    is_custom: true,
                })
                .collect(),
        );
    }

    if let Ok(legacy) = serde_json::from_str::<Vec<NamedEntry>>(contents) {
        tracing::info!("Migrating {} custom exercises from named schema", legacy.len());
        return Parsed::Migrated(
            legacy
                .into_iter()
                .map(|e| Exercise {
                    id: new_custom_id(),
                    title: e.name,
                    description: e.description,
                    primary_muscles: e.muscles,
                    secondary_muscles: Vec::new(),
                    equipment: Vec::new(),
                    instructions: Vec::new(),
                    media: Vec::new(),
                    is_custom: true,
                })
                .collect(),
        );
    }

    Parsed::Unreadable
}

fn new_custom_id() -> String {
    Uuid::new_v4().to_string()
}

fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

// ============================================================================
// Exercise Catalog Store
// ============================================================================

/// Built-in and custom exercises behind one lookup
pub struct ExerciseCatalog {
    builtin: Arc<BuiltinCatalog>,
    path: PathBuf,
    custom: Vec<Exercise>,
}

impl ExerciseCatalog {
    /// Open the custom catalog at `path`, migrating legacy files.
    ///
    /// A custom file that matches no known schema is treated as empty.
    pub fn open(builtin: Arc<BuiltinCatalog>, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let custom = match atomic::read_string(&path) {
            Ok(None) => Vec::new(),
            Ok(Some(contents)) => match parse_custom(&contents) {
                Parsed::Current(entries) => entries,
                Parsed::Migrated(entries) => {
                    if let Err(e) = atomic::write_json(&path, &entries, true) {
                        tracing::warn!("Failed to rewrite migrated catalog {:?}: {}", path, e);
                    }
                    entries
                }
                Parsed::Unreadable => {
                    tracing::warn!(
                        "Custom catalog {:?} matches no known schema. Treating as empty.",
                        path
                    );
                    Vec::new()
                }
            },
            Err(e) => {
                tracing::warn!(
                    "Unable to read custom catalog {:?}: {}. Treating as empty.",
                    path,
                    e
                );
                Vec::new()
            }
        };

        tracing::info!(
            "Catalog ready: {} built-in, {} custom",
            builtin.entries().len(),
            custom.len()
        );
        Ok(Self {
            builtin,
            path,
            custom,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn builtin(&self) -> &BuiltinCatalog {
        &self.builtin
    }

    /// Every exercise, built-in first, each group sorted by title
    pub fn list_all(&self) -> Vec<&Exercise> {
        let mut builtin: Vec<&Exercise> = self.builtin.entries().iter().collect();
        builtin.sort_by_key(|e| normalize_title(&e.title));
        let mut custom: Vec<&Exercise> = self.custom.iter().collect();
        custom.sort_by_key(|e| normalize_title(&e.title));
        builtin.into_iter().chain(custom).collect()
    }

    pub fn custom_entries(&self) -> &[Exercise] {
        &self.custom
    }

    pub fn get(&self, id: &str) -> Option<&Exercise> {
        self.builtin
            .get(id)
            .or_else(|| self.custom.iter().find(|e| e.id == id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Add a custom exercise with a fresh id
    pub fn create(&mut self, draft: ExerciseDraft) -> Result<Exercise> {
        let builtin = Arc::clone(&self.builtin);
        let created = self.mutate(|entries| {
            check_title(&builtin, entries, &draft.title, None)?;
            let exercise = draft.into_exercise(new_custom_id());
            entries.push(exercise.clone());
            Ok(exercise)
        })?;
        tracing::info!("Created custom exercise '{}' ({})", created.title, created.id);
        Ok(created)
    }

    /// Replace the fields of a custom exercise, keeping its id
    pub fn update(&mut self, id: &str, draft: ExerciseDraft) -> Result<Exercise> {
        if self.builtin.get(id).is_some() {
            return Err(Error::Catalog(format!("built-in exercise '{}' cannot be modified", id)));
        }
        let builtin = Arc::clone(&self.builtin);
        self.mutate(|entries| {
            let index = entries
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| Error::Catalog(format!("no custom exercise with id '{}'", id)))?;
            check_title(&builtin, entries, &draft.title, Some(id))?;
            let exercise = draft.into_exercise(id.to_string());
            entries[index] = exercise.clone();
            Ok(exercise)
        })
    }

    /// Remove a custom exercise. Reference checks against the graph belong to
    /// the caller; see `Library::delete_exercise`.
    pub fn delete(&mut self, id: &str) -> Result<Exercise> {
        if self.builtin.get(id).is_some() {
            return Err(Error::Catalog(format!("built-in exercise '{}' cannot be deleted", id)));
        }
        self.mutate(|entries| {
            let index = entries
                .iter()
                .position(|e| e.id == id)
                .ok_or_else(|| Error::Catalog(format!("no custom exercise with id '{}'", id)))?;
            Ok(entries.remove(index))
        })
    }

    /// Swap in a whole new custom list. Used by restore and its rollback.
    pub fn replace_all(&mut self, entries: Vec<Exercise>) -> Result<()> {
        let count = entries.len();
        self.mutate(move |current| {
            *current = entries
                .into_iter()
                .map(|e| Exercise {
                    is_custom: true,
                    ..e
                })
                .collect();
            Ok(())
        })?;
        tracing::info!("Replaced custom catalog with {} entries", count);
        Ok(())
    }

    /// Read the file, apply `f`, write back atomically, then update memory
    fn mutate<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Vec<Exercise>) -> Result<T>,
    {
        let mut entries = self.read_current()?;
        let value = f(&mut entries)?;
        atomic::write_json(&self.path, &entries, true).map_err(Error::CatalogIo)?;
        self.custom = entries;
        Ok(value)
    }

    fn read_current(&self) -> Result<Vec<Exercise>> {
        let contents = atomic::read_string(&self.path).map_err(Error::CatalogIo)?;
        let Some(contents) = contents else {
            return Ok(Vec::new());
        };
        match parse_custom(&contents) {
            Parsed::Current(entries) | Parsed::Migrated(entries) => Ok(entries),
            Parsed::Unreadable => {
                let preserved = self.path.with_extension("json.unreadable");
                tracing::warn!(
                    "Custom catalog {:?} is unreadable; moving it to {:?} before rewriting",
                    self.path,
                    preserved
                );
                std::fs::rename(&self.path, &preserved).map_err(Error::CatalogIo)?;
                Ok(Vec::new())
            }
        }
    }
}

/// Reject empty titles and case-insensitive clashes with any other entry
fn check_title(
    builtin: &BuiltinCatalog,
    custom: &[Exercise],
    title: &str,
    own_id: Option<&str>,
) -> Result<()> {
    let wanted = normalize_title(title);
    if wanted.is_empty() {
        return Err(Error::Catalog("exercise title cannot be empty".into()));
    }
    let clash = builtin
        .entries()
        .iter()
        .chain(custom.iter())
        .find(|e| Some(e.id.as_str()) != own_id && normalize_title(&e.title) == wanted);
    match clash {
        Some(existing) => Err(Error::Catalog(format!(
            "an exercise titled '{}' already exists ({})",
            existing.title, existing.id
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_catalog(dir: &Path) -> ExerciseCatalog {
        ExerciseCatalog::open(BuiltinCatalog::packaged().unwrap(), dir.join("custom.json")).unwrap()
    }

    fn titles(catalog: &ExerciseCatalog) -> Vec<String> {
        catalog.custom_entries().iter().map(|e| e.title.clone()).collect()
    }

    #[test]
    fn test_packaged_catalog_validates() {
        let catalog = BuiltinCatalog::packaged().unwrap();
        assert!(!catalog.entries().is_empty());
        assert!(catalog.validate().is_empty());
        assert!(catalog.entries().iter().all(|e| !e.is_custom));
        assert!(catalog.get("back_squat").is_some());
    }

    #[test]
    fn test_broken_builtin_is_fatal() {
        assert!(matches!(
            BuiltinCatalog::from_json("{ not a list"),
            Err(Error::BuiltinCatalog(_))
        ));
        let duplicate = r#"[{"id":"a","title":"A"},{"id":"a","title":"B"}]"#;
        assert!(matches!(
            BuiltinCatalog::from_json(duplicate),
            Err(Error::BuiltinCatalog(_))
        ));
    }

    #[test]
    fn test_create_persists_and_trims() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = open_catalog(temp_dir.path());

        let created = catalog.create(ExerciseDraft::titled("  Zercher Squat ")).unwrap();
        assert_eq!(created.title, "Zercher Squat");
        assert!(created.is_custom);

        let reopened = open_catalog(temp_dir.path());
        assert_eq!(reopened.get(&created.id), Some(&created));
    }

    #[test]
    fn test_duplicate_title_rejected_without_write() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = open_catalog(temp_dir.path());
        catalog.create(ExerciseDraft::titled("A")).unwrap();
        catalog.create(ExerciseDraft::titled("B")).unwrap();
        let before = std::fs::read(catalog.path()).unwrap();

        let err = catalog.create(ExerciseDraft::titled(" a ")).unwrap_err();
        assert!(matches!(err, Error::Catalog(_)));
        assert_eq!(titles(&catalog), vec!["A", "B"]);
        assert_eq!(std::fs::read(catalog.path()).unwrap(), before);

        // Built-in titles are taken too
        assert!(catalog.create(ExerciseDraft::titled("bench press")).is_err());
    }

    #[test]
    fn test_update_rejects_colliding_rename() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = open_catalog(temp_dir.path());
        let a = catalog.create(ExerciseDraft::titled("Cable Fly")).unwrap();
        catalog.create(ExerciseDraft::titled("Pec Deck")).unwrap();

        assert!(catalog.update(&a.id, ExerciseDraft::titled("PEC DECK")).is_err());

        // Renaming to a case variant of itself is fine
        let renamed = catalog.update(&a.id, ExerciseDraft::titled("cable fly")).unwrap();
        assert_eq!(renamed.id, a.id);
        assert_eq!(renamed.title, "cable fly");
    }

    #[test]
    fn test_builtin_entries_are_immutable() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = open_catalog(temp_dir.path());

        assert!(catalog.update("deadlift", ExerciseDraft::titled("Pull")).is_err());
        assert!(catalog.delete("deadlift").is_err());
        assert!(!catalog.path().exists());
    }

    #[test]
    fn test_delete_custom() {
        let temp_dir = tempfile::tempdir().unwrap();
        let mut catalog = open_catalog(temp_dir.path());
        let created = catalog.create(ExerciseDraft::titled("Landmine Press")).unwrap();

        catalog.delete(&created.id).unwrap();
        assert!(catalog.get(&created.id).is_none());
        assert!(open_catalog(temp_dir.path()).custom_entries().is_empty());
        assert!(catalog.delete(&created.id).is_err());
    }

    #[test]
    fn test_numeric_id_schema_migrated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.json");
        std::fs::write(
            &path,
            r#"[{"id": 1, "title": "Sled Push"}, {"id": 2, "title": "Farmer Walk", "equipment": ["dumbbell"]}]"#,
        )
        .unwrap();

        let catalog = open_catalog(temp_dir.path());
        let entries = catalog.custom_entries();
        assert_eq!(entries.len(), 2);
        assert_ne!(entries[0].id, entries[1].id);
        assert!(entries.iter().all(|e| Uuid::parse_str(&e.id).is_ok()));
        assert_eq!(entries[1].equipment, vec!["dumbbell".to_string()]);

        // Rewritten in the current schema with the same ids
        let rewritten: Vec<Exercise> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(rewritten[0].id, entries[0].id);
    }

    #[test]
    fn test_named_schema_migrated() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.json");
        std::fs::write(&path, r#"[{"id": 7, "name": "Hip Thrust", "muscles": ["glutes"]}]"#).unwrap();

        let catalog = open_catalog(temp_dir.path());
        let entry = &catalog.custom_entries()[0];
        assert_eq!(entry.title, "Hip Thrust");
        assert_eq!(entry.primary_muscles, vec!["glutes".to_string()]);
    }

    #[test]
    fn test_unreadable_custom_file_is_empty() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("custom.json");
        std::fs::write(&path, "{ garbage").unwrap();

        let mut catalog = open_catalog(temp_dir.path());
        assert!(catalog.custom_entries().is_empty());

        catalog.create(ExerciseDraft::titled("Good Morning")).unwrap();
        assert!(temp_dir.path().join("custom.json.unreadable").exists());
        assert_eq!(titles(&catalog), vec!["Good Morning"]);
    }

    #[test]
    fn test_failed_write_leaves_catalog_untouched() {
        let temp_dir = tempfile::tempdir().unwrap();
        // The catalog path is a directory, so the atomic rename must fail
        let path = temp_dir.path().join("custom.json");
        std::fs::create_dir(&path).unwrap();
        let mut catalog =
            ExerciseCatalog::open(BuiltinCatalog::packaged().unwrap(), &path).unwrap();

        let err = catalog.create(ExerciseDraft::titled("Nordic Curl")).unwrap_err();
        assert!(matches!(err, Error::CatalogIo(_)));
        assert!(catalog.custom_entries().is_empty());
    }
}
