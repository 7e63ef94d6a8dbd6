//! CLI command implementations

pub mod claim;
pub mod evidence;
pub mod report;
pub mod show;
pub mod status;
pub mod transition;
pub mod unlock;
pub mod validate;

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::errors::{GatekeeperError, Result};
use crate::fs::{find_project_root, resolve_cwd};
use crate::workflow::Workflow;

/// Project root found from `--cwd` or the current directory
pub fn project_root(cwd: Option<&Path>) -> Result<PathBuf> {
    find_project_root(&resolve_cwd(cwd))
}

pub fn open_workflow(cwd: Option<&Path>) -> Result<Workflow> {
    Workflow::discover(&project_root(cwd)?)
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| GatekeeperError::InvalidJson(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
