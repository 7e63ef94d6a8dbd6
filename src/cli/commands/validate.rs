//! Validate command - Run validators against a task bundle

use std::path::Path;

use crate::errors::Result;
use crate::git::{changed_files, GitOptions};
use crate::workflow::{CycleOutcome, ValidateOptions};

use super::{open_workflow, print_json};

pub async fn run(
    cwd: Option<&Path>,
    task_id: &str,
    session: Option<&str>,
    mut options: ValidateOptions,
    json: bool,
) -> Result<()> {
    let workflow = open_workflow(cwd)?;
    if options.changed_files.is_none() {
        // Without --changed, triggers match the uncommitted files
        match changed_files(&GitOptions::new(workflow.root())).await {
            Ok(files) if !files.is_empty() => options.changed_files = Some(files),
            Ok(_) => {}
            Err(e) => tracing::debug!("no changed files for trigger matching: {}", e),
        }
    }
    let outcome = workflow.validate(task_id, session, &options).await?;
    if json {
        return print_json(&outcome);
    }

    let exec = &outcome.execution;
    println!(
        "{} round {} (preset {}): {:?}",
        task_id,
        exec.round,
        exec.preset,
        exec.status()
    );
    if !exec.missing_evidence.is_empty() {
        println!("  missing evidence: {}", exec.missing_evidence.join(", "));
    }
    if options.check_only {
        println!("  planned: {}", exec.planned.join(", "));
        return Ok(());
    }
    for r in &exec.results {
        let blocking = if r.blocking { "blocking" } else { "optional" };
        let reused = if r.reused { " (reused)" } else { "" };
        println!(
            "  [{}] {} {}: {}{}",
            r.wave,
            r.validator_id,
            blocking,
            r.effective_verdict(),
            reused
        );
    }
    if let Some(consensus) = &exec.consensus {
        if consensus.is_escalated() {
            println!("  consensus escalated: {}", consensus.validators.join(" vs "));
        }
    }
    if !exec.delegated_validators.is_empty() {
        println!("  delegated: {}", exec.delegated_validators.join(", "));
    }
    match outcome.cycle {
        Some(CycleOutcome::NextRound(n)) => println!("  rework in round {}", n),
        Some(CycleOutcome::Escalated(n)) => println!("  round limit reached at round {}, escalated", n),
        None => {}
    }
    println!("  task state: {}", outcome.task.state);
    Ok(())
}
