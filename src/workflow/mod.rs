//! Task workflow: claim, implement, validate, transition
//!
//! Ties the state machine, evidence store, validation executor and task
//! lock together. Claim and validate each run inside the task lock.

mod cycle;

#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

pub use cycle::{CycleOutcome, RoundRejectionCycle};

use crate::config::{ConfigLayers, ConfigService};
use crate::domain::{StateMachineEngine, TransitionContext};
use crate::engines::EngineRegistry;
use crate::errors::{GatekeeperError, Result};
use crate::evidence::EvidenceStore;
use crate::git::{GitRepoInspector, RepoInspector};
use crate::lock::TaskLock;
use crate::prompts::{PromptProvider, TemplatePromptProvider};
use crate::repository::{EntityRepository, FileEntityRepository};
use crate::schemas::{
    BundleScope, BundleStatus, BundleSummary, Config, Entity, EntityType, ImplementationReport,
    RelationshipKind, Wave,
};
use crate::validation::{triggered_validators, ExecutionRequest, ExecutionResult, ValidationExecutor};

/// Knobs for one `validate` call
#[derive(Debug, Clone, Default)]
pub struct ValidateOptions {
    pub wave: Option<Wave>,
    pub check_only: bool,
    pub sequential: bool,
    pub preset: Option<String>,
    pub round: Option<u32>,
    /// Explicit validator ids
    pub validators: Option<Vec<String>>,
    /// Files used to match validator triggers
    pub changed_files: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ValidationOutcome {
    pub execution: ExecutionResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<BundleSummary>,
    /// Root task after any transition
    pub task: Entity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle: Option<CycleOutcome>,
}

pub struct Workflow {
    root: PathBuf,
    config: Arc<Config>,
    repository: Arc<dyn EntityRepository>,
    engine: StateMachineEngine,
    executor: ValidationExecutor,
    inspector: Arc<dyn RepoInspector>,
}

impl Workflow {
    pub fn new(
        root: impl Into<PathBuf>,
        config: Arc<Config>,
        repository: Arc<dyn EntityRepository>,
        engines: Arc<EngineRegistry>,
        prompts: Arc<dyn PromptProvider>,
        inspector: Arc<dyn RepoInspector>,
    ) -> Result<Self> {
        let root = root.into();
        let engine = StateMachineEngine::from_config(&config)?;
        let executor = ValidationExecutor::new(
            config.clone(),
            engines,
            prompts,
            inspector.clone(),
            root.clone(),
        );
        Ok(Workflow {
            root,
            config,
            repository,
            engine,
            executor,
            inspector,
        })
    }

    /// Workflow over the files under `root` with the default collaborators
    pub fn open(root: &Path, config: &ConfigService) -> Result<Self> {
        let config = config.get()?;
        let engines = Arc::new(EngineRegistry::from_config(&config));
        Self::new(
            root,
            config,
            Arc::new(FileEntityRepository::new(root)),
            engines,
            Arc::new(TemplatePromptProvider::new(root)),
            Arc::new(GitRepoInspector),
        )
    }

    /// `open` with configuration discovered from the standard layers
    pub fn discover(root: &Path) -> Result<Self> {
        Self::open(root, &ConfigService::new(ConfigLayers::discover(root)))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn repository(&self) -> &dyn EntityRepository {
        self.repository.as_ref()
    }

    pub fn engine(&self) -> &StateMachineEngine {
        &self.engine
    }

    pub fn evidence(&self, task_id: &str) -> Result<EvidenceStore> {
        EvidenceStore::new(&self.root, task_id)
    }

    fn lock_timeout(&self) -> Result<Duration> {
        let seconds = self.config.lock.timeout_seconds.max(0.0);
        Duration::try_from_secs_f64(seconds).map_err(|e| {
            GatekeeperError::ConfigError(format!("lock.timeout_seconds {} is not usable: {}", seconds, e))
        })
    }

    /// Move a task into the in-progress state for `session_id`.
    ///
    /// Claiming a task the session already holds is a no-op.
    pub async fn claim(&self, task_id: &str, session_id: &str) -> Result<Entity> {
        let _guard = TaskLock::acquire_async(
            &self.root,
            task_id,
            "claim",
            Some(session_id),
            self.lock_timeout()?,
        )
        .await?;

        let task = self.repository.get(EntityType::Task, task_id)?;
        let in_progress = &self.config.workflow.in_progress;
        if task.state == *in_progress && task.session_id.as_deref() == Some(session_id) {
            return Ok(task);
        }

        let ctx = self.context_for(&task, Some(session_id))?;
        let claimed = self.engine.transition(&task, in_progress, &ctx)?;
        self.repository.save(&claimed)?;
        info!(task = %task_id, session = %session_id, "task claimed");
        Ok(claimed)
    }

    /// Write the implementation report for the current round, stamped with
    /// the worktree fingerprint
    pub async fn record_implementation(
        &self,
        task_id: &str,
        session_id: Option<&str>,
        body: &str,
    ) -> Result<ImplementationReport> {
        self.repository.get(EntityType::Task, task_id)?;
        let store = self.evidence(task_id)?;
        let (round, _) = store.ensure_round(None)?;

        let mut report = ImplementationReport::new(task_id, round, body);
        report.session_id = session_id.map(str::to_string);
        if let Some(existing) = store.read_implementation_report(Some(round))? {
            report.authors = existing.authors;
            report.carried_from_round = existing.carried_from_round;
        }
        if let Some(session) = session_id {
            if !report.authors.iter().any(|a| a == session) {
                report.authors.push(session.to_string());
            }
        }

        let worktree = self.inspector.worktree_path(&self.root, session_id);
        report.fingerprint = match self.inspector.fingerprint(&worktree).await {
            Ok(fp) => Some(fp),
            Err(e) => {
                warn!(task = %task_id, "recording report without fingerprint: {}", e);
                None
            }
        };

        store.write_implementation_report(&report)?;
        info!(task = %task_id, round, "implementation report recorded");
        Ok(report)
    }

    /// Run validation for a task bundle and apply the verdict
    pub async fn validate(
        &self,
        task_id: &str,
        session_id: Option<&str>,
        options: &ValidateOptions,
    ) -> Result<ValidationOutcome> {
        let _guard = TaskLock::acquire_async(
            &self.root,
            task_id,
            "validate",
            session_id,
            self.lock_timeout()?,
        )
        .await?;

        let task = self.repository.get(EntityType::Task, task_id)?;
        let members: Vec<String> = self
            .repository
            .children(task_id)?
            .into_iter()
            .map(|t| t.id)
            .collect();
        let scope = if members.is_empty() {
            BundleScope::Task
        } else {
            BundleScope::Bundle
        };

        let triggered = options
            .changed_files
            .as_deref()
            .map(|files| triggered_validators(&self.config.validators, files))
            .unwrap_or_default();

        let request = ExecutionRequest {
            task_id: task_id.to_string(),
            session_id: session_id.map(str::to_string),
            wave: options.wave,
            validators: options.validators.clone(),
            triggered,
            parallel: !options.sequential,
            round: options.round,
            preset: options.preset.clone(),
            check_only: options.check_only,
            task_title: task.title.clone(),
            task_body: task.body.clone(),
            changed_files: options.changed_files.clone(),
        };
        let execution = self.executor.execute(&request).await?;

        if options.check_only {
            return Ok(ValidationOutcome {
                execution,
                bundle: None,
                task,
                cycle: None,
            });
        }

        let mut tasks = vec![task_id.to_string()];
        tasks.extend(members.iter().cloned());
        let bundle = execution.bundle_summary(task_id, scope, tasks);

        let store = self.evidence(task_id)?;
        store.write_bundle(&bundle)?;
        for member in &members {
            let member_store = self.evidence(member)?;
            member_store.ensure_round(Some(bundle.round))?;
            member_store.write_bundle(&bundle)?;
        }
        info!(task = %task_id, round = bundle.round, status = ?bundle.status, "bundle summary written");

        let (task, cycle) = match bundle.status {
            BundleStatus::Approved => {
                let ctx = self.context_for(&task, session_id)?;
                let done = self.engine.transition(&task, &self.config.workflow.done, &ctx)?;
                self.repository.save(&done)?;
                (done, None)
            }
            BundleStatus::Rejected => {
                let ctx = self.context_for(&task, session_id)?;
                let cycle = RoundRejectionCycle::new(
                    &self.engine,
                    &self.config.workflow.in_progress,
                    self.config.validation.max_rounds,
                );
                let (reworked, outcome) = cycle.run(&task, &store, &bundle, &ctx)?;
                self.repository.save(&reworked)?;
                (reworked, Some(outcome))
            }
            BundleStatus::Escalated | BundleStatus::Pending => (task, None),
        };

        Ok(ValidationOutcome {
            execution,
            bundle: Some(bundle),
            task,
            cycle,
        })
    }

    /// Apply a transition to any entity.
    ///
    /// Task documents are written under the task lock.
    pub async fn transition(
        &self,
        entity_type: EntityType,
        id: &str,
        target: &str,
        session_id: Option<&str>,
    ) -> Result<Entity> {
        let _guard = match entity_type {
            EntityType::Task => Some(
                TaskLock::acquire_async(&self.root, id, "transition", session_id, self.lock_timeout()?)
                    .await?,
            ),
            _ => None,
        };
        let entity = self.repository.get(entity_type, id)?;
        let ctx = self.context_for(&entity, session_id)?;
        let next = self.engine.transition(&entity, target, &ctx)?;
        self.repository.save(&next)?;
        info!(
            entity_type = %entity_type,
            id = %id,
            from = %entity.state,
            to = %next.state,
            "transition applied"
        );
        Ok(next)
    }

    /// Gather the facts guards and conditions look at
    pub fn context_for(&self, entity: &Entity, session_id: Option<&str>) -> Result<TransitionContext> {
        let mut ctx = TransitionContext::for_session(session_id).with_owner(entity);
        ctx.max_rounds = self.config.validation.max_rounds;

        match entity.entity_type {
            EntityType::Task => {
                self.fill_evidence_facts(&mut ctx, &entity.id)?;
                ctx.dependencies_done = self.dependencies_done(entity)?;
                ctx.open_children = self
                    .repository
                    .children(&entity.id)?
                    .into_iter()
                    .filter(|c| !self.is_finished(c))
                    .map(|c| c.id)
                    .collect();
            }
            EntityType::Qa => {
                // QA records follow the bundle of the task they review
                if let Some(task_id) = entity.related(RelationshipKind::Related).first() {
                    self.fill_evidence_facts(&mut ctx, task_id)?;
                }
            }
            EntityType::Session => {
                ctx.owned_wip = self
                    .repository
                    .list(EntityType::Task)?
                    .into_iter()
                    .filter(|t| t.session_id.as_deref() == Some(entity.id.as_str()))
                    .filter(|t| t.state == self.config.workflow.in_progress)
                    .map(|t| t.id)
                    .collect();
            }
        }
        Ok(ctx)
    }

    fn fill_evidence_facts(&self, ctx: &mut TransitionContext, task_id: &str) -> Result<()> {
        let store = self.evidence(task_id)?;
        ctx.round = store.latest_round()?;
        if let Some(bundle) = store.read_bundle(None)? {
            ctx.bundle_approved = bundle.approved;
            ctx.bundle_rejected = bundle.status == BundleStatus::Rejected;
        }
        ctx.has_implementation_report = store.read_implementation_report(None)?.is_some();
        Ok(())
    }

    fn dependencies_done(&self, task: &Entity) -> Result<bool> {
        for dep in task.related(RelationshipKind::DependsOn) {
            match self.repository.find(EntityType::Task, dep)? {
                Some(t) if self.is_finished(&t) => {}
                Some(_) => return Ok(false),
                None => {
                    return Err(GatekeeperError::EntityNotFound {
                        entity_type: EntityType::Task.to_string(),
                        id: dep.to_string(),
                    })
                }
            }
        }
        Ok(true)
    }

    /// Done, or any terminal state of the task machine
    fn is_finished(&self, task: &Entity) -> bool {
        task.state == self.config.workflow.done
            || self
                .engine
                .machine(EntityType::Task.as_str())
                .ok()
                .and_then(|m| m.states.get(&task.state))
                .map_or(false, |s| s.terminal)
    }
}
