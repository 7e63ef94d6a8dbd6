//! Delegated engine
//!
//! Writes a `delegation-<id>.json` request into the round directory and
//! returns `Pending`. The delegate writes the validator report itself.

use async_trait::async_trait;

use crate::errors::Result;
use crate::evidence::EvidenceStore;
use crate::schemas::DelegationRequest;

use super::{render_engine_prompt, EngineRequest, RunResult, ValidatorEngine};

#[derive(Debug, Clone)]
pub struct DelegatedEngine {
    id: String,
}

impl DelegatedEngine {
    pub fn new(id: impl Into<String>) -> Self {
        DelegatedEngine { id: id.into() }
    }
}

#[async_trait]
impl ValidatorEngine for DelegatedEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, request: &EngineRequest, evidence: &EvidenceStore) -> Result<RunResult> {
        let report_path = evidence.validator_report_path(request.round, &request.validator.id);
        let delegation = DelegationRequest {
            task_id: request.task_id.clone(),
            round: request.round,
            validator_id: request.validator.id.clone(),
            session_id: request.session_id.clone(),
            worktree: request.worktree.display().to_string(),
            prompt: render_engine_prompt(&request.prompt),
            report_path: report_path.display().to_string(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let path = evidence.write_delegation_request(&delegation)?;

        tracing::info!(
            validator = %request.validator.id,
            request = %path.display(),
            "validation delegated"
        );

        let mut result = RunResult::pending(format!(
            "delegated; awaiting report at {}",
            report_path.display()
        ));
        result.delegated = true;
        Ok(result)
    }
}
