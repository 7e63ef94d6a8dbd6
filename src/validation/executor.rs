//! Wave-ordered validator execution
//!
//! Waves run one after another. Inside a wave validators fan out to a
//! bounded pool; their reports are written in validator-id order once the
//! whole wave has finished.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::engines::{EngineRegistry, EngineRequest, RunResult};
use crate::errors::{GatekeeperError, Result};
use crate::evidence::EvidenceStore;
use crate::git::RepoInspector;
use crate::prompts::{PromptProvider, PromptVariables};
use crate::schemas::{
    BundleScope, BundleStatus, BundleSummary, BundleValidator, Confidence, Config, Tracking,
    ValidatorConfig, ValidatorReport, Verdict, Wave,
};

use super::consensus::{resolve, ConsensusOutcome, ConsensusReport, Opinion};
use super::requirements::{missing_required_evidence, resolve_preset};
use super::roster::{classify, Roster};

/// What to validate and how
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    pub task_id: String,
    pub session_id: Option<String>,

    /// Run only this wave
    pub wave: Option<Wave>,

    /// Explicit validator ids; bypasses roster classification
    pub validators: Option<Vec<String>>,

    /// Ids of triggered validators (see `triggered_validators`)
    pub triggered: Vec<String>,

    pub parallel: bool,

    /// Evidence round; defaults to the latest, or 1
    pub round: Option<u32>,

    /// Preset name; defaults to the configured default
    pub preset: Option<String>,

    /// Plan and check evidence without running engines
    pub check_only: bool,

    pub task_title: String,
    pub task_body: String,
    pub changed_files: Option<Vec<String>>,
}

/// Outcome of one validator in a round
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatorResult {
    pub validator_id: String,
    pub wave: Wave,
    pub blocking: bool,
    pub verdict: Verdict,
    pub confidence: Confidence,
    pub rationale: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub delegated: bool,
    /// Taken from an existing report instead of running the engine
    pub reused: bool,
    /// Verdict imposed by global-wave consensus
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus_verdict: Option<Verdict>,
}

impl ValidatorResult {
    pub fn effective_verdict(&self) -> Verdict {
        self.consensus_verdict.unwrap_or(self.verdict)
    }

    fn opinion(&self) -> Opinion<'_> {
        Opinion {
            validator_id: &self.validator_id,
            verdict: self.verdict,
            confidence: self.confidence,
            rationale: &self.rationale,
        }
    }

    fn from_report(validator: &ValidatorConfig, report: &ValidatorReport) -> Self {
        ValidatorResult {
            validator_id: validator.id.clone(),
            wave: validator.wave,
            blocking: validator.blocking,
            verdict: report.verdict,
            confidence: report.confidence,
            rationale: report.rationale.clone(),
            engine: report.engine.clone(),
            exit_code: report.exit_code,
            timed_out: false,
            delegated: false,
            reused: true,
            consensus_verdict: None,
        }
    }

    fn from_run(validator: &ValidatorConfig, run: RunResult) -> Self {
        ValidatorResult {
            validator_id: validator.id.clone(),
            wave: validator.wave,
            blocking: validator.blocking,
            verdict: run.verdict,
            confidence: run.confidence,
            rationale: run.rationale,
            engine: Some(validator.engine.clone()),
            exit_code: run.exit_code,
            timed_out: run.timed_out,
            delegated: run.delegated,
            reused: false,
            consensus_verdict: None,
        }
    }
}

/// Aggregate of one `execute` call
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionResult {
    pub task_id: String,
    pub round: u32,
    pub preset: String,
    /// Validator ids selected for this run, sorted
    pub planned: Vec<String>,
    pub all_blocking_passed: bool,
    pub blocking_failed: Vec<String>,
    pub delegated_validators: Vec<String>,
    pub passed_count: usize,
    pub failed_count: usize,
    pub pending_count: usize,
    pub escalated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consensus: Option<ConsensusReport>,
    pub missing_evidence: Vec<String>,
    /// Waves not run because an earlier wave failed
    pub skipped_waves: Vec<Wave>,
    pub results: Vec<ValidatorResult>,
}

impl ExecutionResult {
    pub fn status(&self) -> BundleStatus {
        if self.escalated {
            BundleStatus::Escalated
        } else if !self.missing_evidence.is_empty() || self.planned.is_empty() {
            BundleStatus::Pending
        } else if self
            .results
            .iter()
            .any(|r| r.blocking && r.effective_verdict() == Verdict::Reject)
        {
            BundleStatus::Rejected
        } else if self.all_blocking_passed {
            BundleStatus::Approved
        } else {
            BundleStatus::Pending
        }
    }

    pub fn bundle_summary(&self, root_task: &str, scope: BundleScope, tasks: Vec<String>) -> BundleSummary {
        let status = self.status();
        BundleSummary {
            root_task: root_task.to_string(),
            scope,
            tasks,
            round: self.round,
            approved: status == BundleStatus::Approved,
            preset: self.preset.clone(),
            status,
            validators: self
                .results
                .iter()
                .map(|r| BundleValidator {
                    id: r.validator_id.clone(),
                    verdict: r.effective_verdict(),
                    blocking: r.blocking,
                    rationale: r.rationale.clone(),
                })
                .collect(),
            blocking_failed: self.blocking_failed.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Runs validator waves for one task round
pub struct ValidationExecutor {
    config: Arc<Config>,
    engines: Arc<EngineRegistry>,
    prompts: Arc<dyn PromptProvider>,
    inspector: Arc<dyn RepoInspector>,
    project_root: PathBuf,
}

/// Per-round values shared by every validator of a run
struct RoundContext<'a> {
    request: &'a ExecutionRequest,
    store: &'a EvidenceStore,
    round: u32,
    worktree: PathBuf,
    implementation_report: Option<String>,
}

impl ValidationExecutor {
    pub fn new(
        config: Arc<Config>,
        engines: Arc<EngineRegistry>,
        prompts: Arc<dyn PromptProvider>,
        inspector: Arc<dyn RepoInspector>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        ValidationExecutor {
            config,
            engines,
            prompts,
            inspector,
            project_root: project_root.into(),
        }
    }

    /// Validators the request selects, before wave filtering
    pub fn plan(&self, request: &ExecutionRequest) -> Result<Roster> {
        if let Some(ids) = &request.validators {
            let mut roster = Roster::default();
            for id in ids {
                let validator = self.config.validator(id).ok_or_else(|| {
                    GatekeeperError::ConfigError(format!("Unknown validator '{}'", id))
                })?;
                roster.always.push(validator.clone());
            }
            return Ok(roster);
        }

        let (_, preset) = resolve_preset(&self.config, request.preset.as_deref())?;
        let candidates: Vec<ValidatorConfig> = self
            .config
            .validators
            .iter()
            .filter(|v| preset.validators.is_empty() || preset.validators.contains(&v.id))
            .cloned()
            .collect();
        Ok(classify(&candidates, &request.triggered))
    }

    pub async fn execute(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        let (preset_name, preset) = resolve_preset(&self.config, request.preset.as_deref())?;
        let roster = self.plan(request)?;
        let waves: Vec<Wave> = Wave::ORDER
            .iter()
            .copied()
            .filter(|w| request.wave.map_or(true, |only| only == *w))
            .collect();

        let mut planned: Vec<ValidatorConfig> = waves.iter().flat_map(|w| roster.wave(*w)).collect();
        planned.sort_by(|a, b| a.id.cmp(&b.id));

        let store = EvidenceStore::new(&self.project_root, &request.task_id)?;
        let round = if request.check_only {
            match request.round {
                Some(n) => n,
                None => store.latest_round()?.unwrap_or(1),
            }
        } else {
            store.ensure_round(request.round)?.0
        };

        let mut result = ExecutionResult {
            task_id: request.task_id.clone(),
            round,
            preset: preset_name.to_string(),
            planned: planned.iter().map(|v| v.id.clone()).collect(),
            all_blocking_passed: false,
            blocking_failed: Vec::new(),
            delegated_validators: Vec::new(),
            passed_count: 0,
            failed_count: 0,
            pending_count: 0,
            escalated: false,
            consensus: None,
            missing_evidence: missing_required_evidence(&store, &preset, round)?,
            skipped_waves: Vec::new(),
            results: Vec::new(),
        };

        if request.check_only || !result.missing_evidence.is_empty() {
            info!(
                task = %request.task_id,
                round,
                planned = result.planned.len(),
                missing = result.missing_evidence.len(),
                "validation planned without running engines"
            );
            finish(&mut result, &planned);
            return Ok(result);
        }

        let ctx = RoundContext {
            request,
            store: &store,
            round,
            worktree: self
                .inspector
                .worktree_path(&self.project_root, request.session_id.as_deref()),
            implementation_report: match store.read_implementation_report(Some(round)) {
                Ok(report) => report.map(|r| r.body),
                Err(e) => {
                    warn!(task = %request.task_id, round, "unreadable implementation report: {}", e);
                    None
                }
            },
        };

        for (index, wave) in waves.iter().enumerate() {
            let validators = roster.wave(*wave);
            if validators.is_empty() {
                continue;
            }
            info!(task = %request.task_id, round, wave = %wave, count = validators.len(), "running wave");

            let mut wave_results = self.run_wave(&validators, &ctx).await;

            if *wave == Wave::Global {
                if let Some(report) = self.apply_consensus(&mut wave_results) {
                    if report.is_escalated() {
                        warn!(task = %request.task_id, round, "global validators disagree, escalating");
                        result.escalated = true;
                    }
                    result.consensus = Some(report);
                }
            }

            let wave_failed = result.escalated
                || wave_results
                    .iter()
                    .any(|r| r.blocking && r.effective_verdict() == Verdict::Reject);
            result.results.extend(wave_results);

            if wave_failed && self.config.validation.fail_fast_waves {
                result.skipped_waves = waves[index + 1..].to_vec();
                if !result.skipped_waves.is_empty() {
                    info!(task = %request.task_id, round, wave = %wave, "wave failed, skipping later waves");
                }
                break;
            }
        }

        finish(&mut result, &planned);
        info!(
            task = %request.task_id,
            round,
            passed = result.passed_count,
            failed = result.failed_count,
            pending = result.pending_count,
            status = ?result.status(),
            "validation finished"
        );
        Ok(result)
    }

    /// Run one wave on a pool of `max_concurrent` permits, then write
    /// reports in validator-id order
    async fn run_wave(&self, validators: &[ValidatorConfig], ctx: &RoundContext<'_>) -> Vec<ValidatorResult> {
        let permits = if ctx.request.parallel {
            self.config.validation.max_concurrent.max(1)
        } else {
            1
        };
        let sem = Arc::new(Semaphore::new(permits));
        let mut tasks = FuturesUnordered::new();

        for validator in validators {
            let sem = sem.clone();
            tasks.push(async move {
                let _permit = match sem.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        let run = RunResult::pending("validator pool closed");
                        return (ValidatorResult::from_run(validator, run), None);
                    }
                };
                self.run_validator(validator, ctx).await
            });
        }

        let mut outcomes = Vec::with_capacity(validators.len());
        while let Some(outcome) = tasks.next().await {
            outcomes.push(outcome);
        }
        outcomes.sort_by(|a, b| a.0.validator_id.cmp(&b.0.validator_id));

        let mut results = Vec::with_capacity(outcomes.len());
        for (result, report) in outcomes {
            if let Some(report) = report {
                if let Err(e) = ctx.store.write_validator_report(&report) {
                    warn!(validator = %result.validator_id, "failed to write validator report: {}", e);
                }
            }
            results.push(result);
        }
        results
    }

    /// Never fails: errors become a pending verdict carrying the message
    async fn run_validator(
        &self,
        validator: &ValidatorConfig,
        ctx: &RoundContext<'_>,
    ) -> (ValidatorResult, Option<ValidatorReport>) {
        match ctx.store.read_validator_report(&validator.id, Some(ctx.round)) {
            Ok(Some(report)) if report.verdict.is_conclusive() => {
                debug!(validator = %validator.id, round = ctx.round, "reusing existing report");
                return (ValidatorResult::from_report(validator, &report), None);
            }
            Ok(_) => {}
            Err(e) => warn!(validator = %validator.id, "ignoring unreadable report: {}", e),
        }

        let tracking = Tracking::start();
        let run = match self.invoke(validator, ctx).await {
            Ok(run) => run,
            Err(e) => {
                warn!(validator = %validator.id, engine = %validator.engine, "validator failed: {}", e);
                RunResult::pending(format!("engine error: {}", e))
            }
        };
        info!(
            validator = %validator.id,
            verdict = %run.verdict,
            timed_out = run.timed_out,
            delegated = run.delegated,
            "validator finished"
        );

        let child_pid = run.process_id;
        let result = ValidatorResult::from_run(validator, run);
        if result.delegated {
            return (result, None);
        }

        let mut tracking = tracking.complete();
        if let Some(pid) = child_pid {
            tracking.process_id = pid;
        }
        let report = ValidatorReport {
            task_id: ctx.request.task_id.clone(),
            round: ctx.round,
            validator_id: validator.id.clone(),
            verdict: result.verdict,
            rationale: result.rationale.clone(),
            confidence: result.confidence,
            engine: result.engine.clone(),
            exit_code: result.exit_code,
            tracking,
        };
        (result, Some(report))
    }

    async fn invoke(&self, validator: &ValidatorConfig, ctx: &RoundContext<'_>) -> Result<RunResult> {
        let engine = self.engines.resolve(&validator.engine)?;
        let variables = PromptVariables {
            task_id: ctx.request.task_id.clone(),
            task_title: ctx.request.task_title.clone(),
            task_body: ctx.request.task_body.clone(),
            round: ctx.round,
            validator_id: validator.id.clone(),
            wave: validator.wave.to_string(),
            session_id: ctx.request.session_id.clone(),
            worktree: ctx.worktree.display().to_string(),
            implementation_report: ctx.implementation_report.clone(),
            changed_files: ctx.request.changed_files.clone(),
        };
        let prompt = self.prompts.prompt(validator, &variables)?;
        let timeout = validator
            .timeout_seconds
            .unwrap_or(self.config.validation.timeout_seconds);

        let request = EngineRequest {
            validator: validator.clone(),
            task_id: ctx.request.task_id.clone(),
            session_id: ctx.request.session_id.clone(),
            worktree: ctx.worktree.clone(),
            round: ctx.round,
            prompt,
            timeout: Duration::from_secs(timeout),
        };
        engine.run(&request, ctx.store).await
    }

    /// Consensus between the designated pair, when both ran in this wave
    fn apply_consensus(&self, results: &mut [ValidatorResult]) -> Option<ConsensusReport> {
        let pair = &self.config.validation.consensus.global_validators;
        if pair.len() != 2 {
            return None;
        }
        let a = results.iter().position(|r| r.validator_id == pair[0])?;
        let b = results.iter().position(|r| r.validator_id == pair[1])?;

        let report = resolve(&results[a].opinion(), &results[b].opinion());

        if let ConsensusOutcome::Agreed { verdict } = report.outcome {
            results[a].consensus_verdict = Some(verdict);
            results[b].consensus_verdict = Some(verdict);
        }
        Some(report)
    }
}

/// Fill the counters and blocking list from `results`
fn finish(result: &mut ExecutionResult, planned: &[ValidatorConfig]) {
    result.passed_count = 0;
    result.failed_count = 0;
    result.pending_count = 0;
    for r in &result.results {
        match r.effective_verdict() {
            Verdict::Approve => result.passed_count += 1,
            Verdict::Reject => result.failed_count += 1,
            Verdict::Pending => result.pending_count += 1,
        }
    }
    result.delegated_validators = result
        .results
        .iter()
        .filter(|r| r.delegated)
        .map(|r| r.validator_id.clone())
        .collect();

    // A planned blocking validator that never ran has not passed.
    result.blocking_failed = planned
        .iter()
        .filter(|v| v.blocking)
        .filter(|v| {
            !result
                .results
                .iter()
                .any(|r| r.validator_id == v.id && r.effective_verdict() == Verdict::Approve)
        })
        .map(|v| v.id.clone())
        .collect();
    result.all_blocking_passed = !planned.is_empty()
        && result.blocking_failed.is_empty()
        && result.missing_evidence.is_empty()
        && !result.escalated;
}
