//! Rework after a rejected bundle

use serde::Serialize;
use tracing::{info, warn};

use crate::domain::{StateMachineEngine, TransitionContext};
use crate::errors::Result;
use crate::evidence::EvidenceStore;
use crate::schemas::{BundleSummary, Entity, ImplementationReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "round", rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Round budget spent; needs a human. Carries the last round.
    Escalated(u32),
    /// Rework continues in this new round
    NextRound(u32),
}

/// Sends a rejected task back to work and opens the next evidence round
pub struct RoundRejectionCycle<'a> {
    engine: &'a StateMachineEngine,
    in_progress: &'a str,
    max_rounds: u32,
}

impl<'a> RoundRejectionCycle<'a> {
    pub fn new(engine: &'a StateMachineEngine, in_progress: &'a str, max_rounds: u32) -> Self {
        RoundRejectionCycle {
            engine,
            in_progress,
            max_rounds,
        }
    }

    /// Transition `task` back to in-progress, then either escalate or
    /// carry the implementation report into a fresh round.
    ///
    /// Returns the transitioned task; the caller saves it.
    pub fn run(
        &self,
        task: &Entity,
        store: &EvidenceStore,
        bundle: &BundleSummary,
        ctx: &TransitionContext,
    ) -> Result<(Entity, CycleOutcome)> {
        let latest = store.latest_round()?.unwrap_or(0);
        let ctx = TransitionContext {
            bundle_rejected: true,
            round: Some(latest),
            max_rounds: self.max_rounds,
            ..ctx.clone()
        };
        let reworked = self.engine.transition(task, self.in_progress, &ctx)?;

        if latest + 1 > self.max_rounds {
            warn!(
                task = %task.id,
                round = latest,
                max_rounds = self.max_rounds,
                "round limit reached, escalating"
            );
            return Ok((reworked, CycleOutcome::Escalated(latest)));
        }

        let previous = store.read_implementation_report(Some(latest))?;
        let (next, _) = store.create_next_round()?;

        if let Some(previous) = previous {
            let carried = carry_forward(&previous, next, bundle);
            store.write_implementation_report(&carried)?;
        }

        info!(task = %task.id, round = next, "task returned for rework");
        Ok((reworked, CycleOutcome::NextRound(next)))
    }
}

/// Previous report body plus a section listing the rejecting feedback
fn carry_forward(previous: &ImplementationReport, round: u32, bundle: &BundleSummary) -> ImplementationReport {
    let mut body = previous.body.trim_end().to_string();
    body.push_str(&format!("\n\n## Changes in round {}\n\n", round));

    let mut any = false;
    for validator in bundle.rejecting() {
        any = true;
        let rationale = validator.rationale.trim();
        if rationale.is_empty() {
            body.push_str(&format!("- {}: rejected without rationale\n", validator.id));
        } else {
            body.push_str(&format!("- {}: {}\n", validator.id, rationale));
        }
    }
    if !any {
        body.push_str("- (no validator feedback recorded)\n");
    }

    ImplementationReport {
        task_id: previous.task_id.clone(),
        round,
        session_id: previous.session_id.clone(),
        authors: previous.authors.clone(),
        body,
        carried_from_round: Some(previous.round),
        fingerprint: None,
        created_at: chrono::Utc::now().to_rfc3339(),
    }
}
