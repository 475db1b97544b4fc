//! Atomic file operations for safe JSON persistence.
//!
//! Writes go to a named temp file in the target's directory, are synced,
//! then renamed over the target. Readers see either the old file or the new
//! one, never a torn write.

use crate::error::{HubError, Result};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::debug;

/// Read and parse a JSON file.
///
/// Returns `None` if the file doesn't exist, or an error if parsing fails.
pub fn atomic_read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(HubError::io_with_path(e, path)),
    };

    let data: T = serde_json::from_str(&contents).map_err(|e| HubError::Json {
        message: format!("Failed to parse {}: {}", path.display(), e),
        source: Some(e),
    })?;

    Ok(Some(data))
}

/// Write data to a JSON file atomically.
pub fn atomic_write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let parent = path.parent().ok_or_else(|| HubError::Io {
        message: format!("No parent directory for {}", path.display()),
        path: Some(path.to_path_buf()),
        source: None,
    })?;
    fs::create_dir_all(parent).map_err(|e| HubError::io_with_path(e, parent))?;

    let serialized = serde_json::to_string_pretty(data).map_err(|e| HubError::Json {
        message: format!("Failed to serialize data: {}", e),
        source: Some(e),
    })?;

    let mut temp = NamedTempFile::new_in(parent).map_err(|e| HubError::io_with_path(e, parent))?;
    temp.write_all(serialized.as_bytes())
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|e| HubError::io_with_path(e, temp.path()))?;
    temp.persist(path)
        .map_err(|e| HubError::io_with_path(e.error, path))?;

    debug!("Atomically wrote {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct TestData {
        name: String,
        value: i32,
    }

    #[test]
    fn test_write_and_read() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("test.json");

        let data = TestData {
            name: "test".to_string(),
            value: 42,
        };
        atomic_write_json(&path, &data).unwrap();

        let read: Option<TestData> = atomic_read_json(&path).unwrap();
        assert_eq!(read, Some(data));
    }

    #[test]
    fn test_read_nonexistent() {
        let temp_dir = TempDir::new().unwrap();
        let result: Option<TestData> =
            atomic_read_json(&temp_dir.path().join("missing.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_overwrite_leaves_no_temp_files() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("test.json");

        for value in 0..3 {
            let data = TestData {
                name: "x".to_string(),
                value,
            };
            atomic_write_json(&path, &data).unwrap();
        }

        let entries: Vec<_> = fs::read_dir(temp_dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let read: TestData = atomic_read_json(&path).unwrap().unwrap();
        assert_eq!(read.value, 2);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("bad.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(atomic_read_json::<TestData>(&path).is_err());
    }
}
