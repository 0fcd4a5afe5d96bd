//! Crash-safe whole-file replacement.
//!
//! Every persisted file is written the same way:
//! 1. serialize into a temp file in the destination directory
//! 2. hold an exclusive lock on the temp file while writing
//! 3. fsync, then rename over the destination
//!
//! Readers therefore see either the old file or the new one, never a torn write.

use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Serialize `value` as JSON and atomically replace `path` with it
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T, pretty: bool) -> io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    temp.as_file().lock_exclusive()?;
    {
        let mut writer = io::BufWriter::new(temp.as_file());
        let result = if pretty {
            serde_json::to_writer_pretty(&mut writer, value)
        } else {
            serde_json::to_writer(&mut writer, value)
        };
        result.map_err(io::Error::from)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.as_file().unlock()?;

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Read a whole file under a shared lock. Returns `None` if it does not exist.
pub fn read_string(path: &Path) -> io::Result<Option<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    file.lock_shared()?;
    let mut contents = String::new();
    let read = BufReader::new(&file).read_to_string(&mut contents);
    file.unlock()?;
    read?;
    Ok(Some(contents))
}

/// Read and parse a JSON file. Returns `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> crate::Result<Option<T>> {
    match read_string(path)? {
        Some(contents) => Ok(Some(serde_json::from_str(&contents)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_leaves_no_temp_files() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("data.json");

        write_json(&path, &vec!["a", "b"], false).unwrap();
        write_json(&path, &vec!["c"], true).unwrap();

        let loaded: Vec<String> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, vec!["c".to_string()]);
        let entries: Vec<_> = std::fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_read_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(read_string(&temp_dir.path().join("missing")).unwrap().is_none());
    }

    #[test]
    fn test_failed_write_keeps_previous_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("data.json");
        write_json(&path, &vec![1, 2, 3], false).unwrap();

        // A map with non-string keys cannot be serialized to JSON
        let mut bad = std::collections::HashMap::new();
        bad.insert(vec![1u8], 1);
        assert!(write_json(&path, &bad, false).is_err());

        let loaded: Vec<i32> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, vec![1, 2, 3]);
    }
}
