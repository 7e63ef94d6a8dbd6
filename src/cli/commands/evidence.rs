//! Evidence command - Show evidence for a task round

use std::path::Path;

use serde::Serialize;

use crate::errors::Result;
use crate::evidence::{preflight, PreflightReport};
use crate::git::{GitRepoInspector, RepoInspector};
use crate::schemas::{BundleSummary, ImplementationReport, ValidatorReport};

use super::{print_json, project_root};
use crate::evidence::EvidenceStore;

#[derive(Debug, Serialize)]
struct EvidenceOutput {
    task_id: String,
    rounds: Vec<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    implementation_report: Option<ImplementationReport>,
    validator_reports: Vec<ValidatorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    bundle: Option<BundleSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    preflight: Option<PreflightReport>,
}

pub async fn run(
    cwd: Option<&Path>,
    task_id: &str,
    round: Option<u32>,
    check_preflight: bool,
    json: bool,
) -> Result<()> {
    let root = project_root(cwd)?;
    let store = EvidenceStore::new(&root, task_id)?;
    let rounds = store.list_rounds()?;
    let round = match round {
        Some(n) => Some(n),
        None => rounds.last().copied(),
    };

    let preflight_report = if check_preflight {
        let inspector = GitRepoInspector;
        let worktree = inspector.worktree_path(&root, None);
        Some(preflight(&store, &inspector, &worktree, round).await?)
    } else {
        None
    };

    let output = EvidenceOutput {
        task_id: task_id.to_string(),
        rounds,
        round,
        implementation_report: match round {
            Some(n) => store.read_implementation_report(Some(n))?,
            None => None,
        },
        validator_reports: match round {
            Some(n) => store.list_validator_reports(Some(n))?,
            None => Vec::new(),
        },
        bundle: match round {
            Some(n) => store.read_bundle(Some(n))?,
            None => None,
        },
        preflight: preflight_report,
    };
    if json {
        return print_json(&output);
    }

    let Some(round) = output.round else {
        println!("No evidence recorded for {}", task_id);
        return Ok(());
    };
    println!("{} round {} of {:?}", task_id, round, output.rounds);
    match &output.implementation_report {
        Some(report) => println!("  implementation report by {}", report.authors.join(", ")),
        None => println!("  no implementation report"),
    }
    for report in &output.validator_reports {
        println!(
            "  {}: {} ({:?})",
            report.validator_id, report.verdict, report.confidence
        );
    }
    if let Some(bundle) = &output.bundle {
        println!("  bundle: {:?}, approved = {}", bundle.status, bundle.approved);
    }
    if let Some(pf) = &output.preflight {
        if pf.stale {
            println!("  STALE: {}", pf.reasons.join("; "));
        } else {
            println!("  evidence matches the worktree");
        }
    }
    Ok(())
}
