//! Claim command - Claim a task for a session

use std::path::Path;

use crate::errors::Result;

use super::{open_workflow, print_json};

pub async fn run(cwd: Option<&Path>, task_id: &str, session: &str, json: bool) -> Result<()> {
    let workflow = open_workflow(cwd)?;
    let task = workflow.claim(task_id, session).await?;
    if json {
        return print_json(&task);
    }
    println!("Claimed {} for session {} ({})", task.id, session, task.state);
    Ok(())
}
