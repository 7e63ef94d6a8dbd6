//! Status command - Show tasks grouped by state

use std::collections::BTreeMap;
use std::path::Path;

use serde::Serialize;

use crate::errors::Result;
use crate::schemas::EntityType;

use super::{open_workflow, print_json};

#[derive(Debug, Serialize)]
struct TaskLine {
    id: String,
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<String>,
}

/// Show tasks grouped by state
pub async fn run(cwd: Option<&Path>, json: bool) -> Result<()> {
    let workflow = open_workflow(cwd)?;
    let mut by_state: BTreeMap<String, Vec<TaskLine>> = BTreeMap::new();
    for task in workflow.repository().list(EntityType::Task)? {
        by_state.entry(task.state).or_default().push(TaskLine {
            id: task.id,
            title: task.title,
            session: task.session_id,
        });
    }

    if json {
        return print_json(&by_state);
    }

    if by_state.is_empty() {
        println!("No tasks.");
        return Ok(());
    }
    for (state, tasks) in &by_state {
        println!("{} ({})", state, tasks.len());
        for task in tasks {
            match &task.session {
                Some(session) => println!("  {}  {}  [{}]", task.id, task.title, session),
                None => println!("  {}  {}", task.id, task.title),
            }
        }
    }
    Ok(())
}
