//! Path resolution utilities for gatekeeper
//!
//! Provides functions to locate the project root and construct paths
//! to the files and directories under `.gatekeeper/`.

use std::path::{Path, PathBuf};

use crate::errors::{GatekeeperError, Result};
use crate::schemas::EntityType;

/// Name of the per-project state directory
pub const STATE_DIR: &str = ".gatekeeper";

/// Find the project root containing a `.gatekeeper` directory.
///
/// Walks up the directory tree from the starting directory.
///
/// # Errors
/// * `FileNotFound` - If no project root is found
pub fn find_project_root(start_cwd: &Path) -> Result<PathBuf> {
    let mut current = start_cwd
        .canonicalize()
        .map_err(|e| GatekeeperError::FileNotFound(format!("Cannot resolve path: {}", e)))?;

    loop {
        if current.join(STATE_DIR).is_dir() {
            return Ok(current);
        }

        match current.parent() {
            Some(parent) if parent != current => {
                current = parent.to_path_buf();
            }
            _ => {
                return Err(GatekeeperError::FileNotFound(format!(
                    "Could not find a project root with a {} directory",
                    STATE_DIR
                )));
            }
        }
    }
}

/// Resolve the current working directory, optionally using an override.
pub fn resolve_cwd(cwd_option: Option<&Path>) -> PathBuf {
    match cwd_option {
        Some(path) => path.to_path_buf(),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Get the path to the `.gatekeeper` directory.
pub fn get_state_dir(root: &Path) -> PathBuf {
    root.join(STATE_DIR)
}

/// Get the path to the project configuration file.
pub fn get_config_path(root: &Path) -> PathBuf {
    get_state_dir(root).join("config.yaml")
}

/// Get the directory holding entities of one type.
pub fn get_entity_dir(root: &Path, entity_type: EntityType) -> PathBuf {
    get_state_dir(root).join(entity_type.dir_name())
}

/// Get the path to an entity document.
pub fn get_entity_path(root: &Path, entity_type: EntityType, id: &str) -> PathBuf {
    get_entity_dir(root, entity_type).join(format!("{}.md", id))
}

/// Get the evidence root for a task.
pub fn get_evidence_dir(root: &Path, task_id: &str) -> PathBuf {
    get_state_dir(root).join("evidence").join(task_id)
}

/// Get the directory of lock files for a namespace.
pub fn get_lock_dir(root: &Path, namespace: &str) -> PathBuf {
    get_state_dir(root).join("locks").join(namespace)
}

/// Get the directory of per-validator prompt templates.
pub fn get_validator_prompts_dir(root: &Path) -> PathBuf {
    get_state_dir(root).join("prompts").join("validators")
}

/// Get the directory holding per-session worktrees.
pub fn get_worktrees_dir(root: &Path) -> PathBuf {
    get_state_dir(root).join("worktrees")
}

/// Reject ids that could escape their directory.
pub fn validate_id(id: &str) -> Result<()> {
    let ok = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && !id.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(GatekeeperError::ConfigError(format!("Invalid identifier: {:?}", id)))
    }
}
