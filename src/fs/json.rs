//! JSON file operations with atomic writes
//!
//! Readers never observe a partially written file: every write goes to a
//! sibling temp file which is fsynced and then renamed over the target.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::{GatekeeperError, Result};

/// Read and deserialize a JSON file.
///
/// # Errors
/// * `FileNotFound` - If the file does not exist
/// * `InvalidJson` - If the file does not match the expected schema
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            GatekeeperError::FileNotFound(path.display().to_string())
        } else {
            GatekeeperError::Io(e)
        }
    })?;

    serde_json::from_str(&content).map_err(|e| {
        GatekeeperError::InvalidJson(format!("Invalid JSON in file {}: {}", path.display(), e))
    })
}

/// Read a JSON file, returning `None` when it does not exist.
pub fn read_json_opt<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_json(path) {
        Ok(value) => Ok(Some(value)),
        Err(GatekeeperError::FileNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Write a value to a JSON file with pretty formatting, atomically.
pub fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    let mut content = serde_json::to_string_pretty(data)
        .map_err(|e| GatekeeperError::InvalidJson(e.to_string()))?;
    content.push('\n');
    write_atomic(path, content.as_bytes())
}

/// Write bytes to `path` atomically: temp file, fsync, rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let written = write_synced(&temp_path, bytes).and_then(|()| fs::rename(&temp_path, path));
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(GatekeeperError::Io(e));
    }

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

// Unique per process so two writers never share a temp file.
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let nonce: u32 = rand::random();
    path.with_file_name(format!(".{}.{}.{:08x}.tmp", name, std::process::id(), nonce))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        id: String,
        round: u32,
    }

    #[test]
    fn test_read_json_file_not_found() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nonexistent.json");

        let result: Result<Sample> = read_json(&path);
        assert!(matches!(result.unwrap_err(), GatekeeperError::FileNotFound(_)));

        let missing: Option<Sample> = read_json_opt(&path).unwrap();
        assert!(missing.is_none());
    }

    #[test]
    fn test_read_json_invalid_json() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("invalid.json");
        fs::write(&path, "not valid json {").unwrap();

        let result: Result<Sample> = read_json(&path);
        assert!(matches!(result.unwrap_err(), GatekeeperError::InvalidJson(_)));
    }

    #[test]
    fn test_write_json_creates_parent_dirs_and_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested").join("dir").join("test.json");
        let sample = Sample { id: "T-1".into(), round: 2 };

        write_json(&path, &sample).unwrap();
        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back, sample);

        let leftovers: Vec<_> = fs::read_dir(path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_write_removes_temp_file() {
        let temp = TempDir::new().unwrap();
        // A non-empty directory cannot be replaced by rename
        let path = temp.path().join("bundle-summary.json");
        fs::create_dir_all(path.join("occupied")).unwrap();

        let err = write_json(&path, &Sample { id: "T-1".into(), round: 1 }).unwrap_err();
        assert!(matches!(err, GatekeeperError::Io(_)));

        let leftovers: Vec<_> = fs::read_dir(temp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_write_json_overwrites() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("test.json");
        write_json(&path, &Sample { id: "a".into(), round: 1 }).unwrap();
        write_json(&path, &Sample { id: "b".into(), round: 2 }).unwrap();
        let back: Sample = read_json(&path).unwrap();
        assert_eq!(back.id, "b");
    }
}
