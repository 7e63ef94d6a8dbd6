//! Report command - Record the implementation report for the current round

use std::path::Path;

use tokio::io::AsyncReadExt;

use crate::errors::{GatekeeperError, Result};

use super::{open_workflow, print_json};

pub async fn run(
    cwd: Option<&Path>,
    task_id: &str,
    file: Option<&Path>,
    session: Option<&str>,
    json: bool,
) -> Result<()> {
    let body = match file {
        Some(path) => tokio::fs::read_to_string(path).await.map_err(|e| {
            GatekeeperError::FileNotFound(format!("{}: {}", path.display(), e))
        })?,
        None => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    if body.trim().is_empty() {
        return Err(GatekeeperError::wrap("report body is empty", "report"));
    }

    let workflow = open_workflow(cwd)?;
    let report = workflow.record_implementation(task_id, session, &body).await?;
    if json {
        return print_json(&report);
    }
    println!("Recorded implementation report for {} round {}", report.task_id, report.round);
    Ok(())
}
