//! Unlock command - Release a stale task lock

use std::path::Path;

use serde_json::json;

use crate::errors::Result;
use crate::lock::TaskLock;

use super::{print_json, project_root};

pub async fn run(cwd: Option<&Path>, task_id: &str, force: bool, json: bool) -> Result<()> {
    let root = project_root(cwd)?;
    let holder = TaskLock::holder(&root, task_id)?;
    let removed = if force {
        TaskLock::force_remove(&root, task_id)?
    } else {
        TaskLock::clear_if_stale(&root, task_id)?
    };

    if json {
        return print_json(&json!({
            "task_id": task_id,
            "removed": removed,
            "holder": holder.as_ref().map(|h| h.to_string()),
        }));
    }
    match (removed, holder) {
        (true, Some(h)) => println!("Removed lock on {} held by {}", task_id, h),
        (true, None) => println!("Removed lock on {}", task_id),
        (false, Some(h)) => println!("Lock on {} is held by {}; use --force to remove it", task_id, h),
        (false, None) => println!("No lock on {}", task_id),
    }
    Ok(())
}
