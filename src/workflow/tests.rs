//! End-to-end workflow tests with scripted engines

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use super::*;
use crate::config::{load_config, ConfigLayers};
use crate::engines::{EngineRequest, RunResult, ValidatorEngine};
use crate::schemas::{Confidence, RelationshipKind, RepoFingerprint, Verdict};

/// Verdicts per validator id, switchable between rounds
struct ScriptedEngine {
    id: String,
    verdicts: Mutex<HashMap<String, Verdict>>,
    calls: AtomicUsize,
}

impl ScriptedEngine {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(ScriptedEngine {
            id: id.into(),
            verdicts: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn set(&self, validator: &str, verdict: Verdict) {
        self.verdicts.lock().unwrap().insert(validator.into(), verdict);
    }
}

#[async_trait]
impl ValidatorEngine for ScriptedEngine {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, request: &EngineRequest, _evidence: &EvidenceStore) -> Result<RunResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let verdict = self
            .verdicts
            .lock()
            .unwrap()
            .get(&request.validator.id)
            .copied()
            .unwrap_or(Verdict::Approve);
        Ok(RunResult {
            verdict,
            rationale: match verdict {
                Verdict::Reject => "missing input validation".into(),
                _ => "looks good".into(),
            },
            confidence: Confidence::High,
            raw_output: String::new(),
            exit_code: Some(0),
            timed_out: false,
            delegated: false,
            process_id: None,
        })
    }
}

struct StaticInspector;

#[async_trait]
impl RepoInspector for StaticInspector {
    async fn fingerprint(&self, _root: &Path) -> Result<RepoFingerprint> {
        Ok(RepoFingerprint {
            head: Some("deadbeef".into()),
            dirty: true,
            diff_hash: "abc123".into(),
        })
    }

    fn worktree_path(&self, root: &Path, _session_id: Option<&str>) -> PathBuf {
        root.to_path_buf()
    }
}

struct Harness {
    _temp: TempDir,
    workflow: Workflow,
    codex: Arc<ScriptedEngine>,
    claude: Arc<ScriptedEngine>,
}

fn harness_with(adjust: impl FnOnce(&mut Config)) -> Harness {
    let temp = TempDir::new().unwrap();
    let mut config = load_config(&ConfigLayers::default()).unwrap();
    config.lock.timeout_seconds = 0.2;
    adjust(&mut config);

    let codex = ScriptedEngine::new("codex");
    let claude = ScriptedEngine::new("claude");
    let mut engines = EngineRegistry::new(config.validation.allowed_engines.clone());
    engines.register("codex", codex.clone());
    engines.register("claude", claude.clone());
    engines.register("gemini", ScriptedEngine::new("gemini"));

    let root = temp.path().to_path_buf();
    let workflow = Workflow::new(
        &root,
        Arc::new(config),
        Arc::new(FileEntityRepository::new(&root)),
        Arc::new(engines),
        Arc::new(TemplatePromptProvider::new(&root)),
        Arc::new(StaticInspector),
    )
    .unwrap();

    Harness {
        _temp: temp,
        workflow,
        codex,
        claude,
    }
}

fn harness() -> Harness {
    harness_with(|_| {})
}

fn seed_task(h: &Harness, id: &str) -> Entity {
    let task = Entity::new(EntityType::Task, id, "todo").with_title("Add login throttling");
    h.workflow.repository().save(&task).unwrap();
    task
}

#[tokio::test]
async fn test_claim_assigns_session() {
    let h = harness();
    seed_task(&h, "T-1");

    let claimed = h.workflow.claim("T-1", "s1").await.unwrap();
    assert_eq!(claimed.state, "wip");
    assert_eq!(claimed.session_id.as_deref(), Some("s1"));

    // idempotent for the owner
    let again = h.workflow.claim("T-1", "s1").await.unwrap();
    assert_eq!(again.state, "wip");

    let stored = h.workflow.repository().get(EntityType::Task, "T-1").unwrap();
    assert_eq!(stored.session_id.as_deref(), Some("s1"));
}

#[tokio::test]
async fn test_claim_blocked_by_open_dependency() {
    let h = harness();
    seed_task(&h, "T-0");
    let task = Entity::new(EntityType::Task, "T-1", "todo").with_relationship(RelationshipKind::DependsOn, "T-0");
    h.workflow.repository().save(&task).unwrap();

    let err = h.workflow.claim("T-1", "s1").await.unwrap_err();
    assert!(matches!(err, GatekeeperError::StateTransition(_)));
}

#[tokio::test]
async fn test_task_transition_waits_for_lock() {
    let h = harness();
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();
    let held = TaskLock::acquire(
        h.workflow.root(),
        "T-1",
        "validate",
        Some("s1"),
        Duration::from_millis(100),
    )
    .unwrap();

    let err = h
        .workflow
        .transition(EntityType::Task, "T-1", "todo", Some("s1"))
        .await
        .unwrap_err();
    assert!(matches!(err, GatekeeperError::LockTimeout { .. }));
    let task = h.workflow.repository().get(EntityType::Task, "T-1").unwrap();
    assert_eq!(task.state, "wip");

    drop(held);
    let task = h.workflow.transition(EntityType::Task, "T-1", "todo", Some("s1")).await.unwrap();
    assert_eq!(task.state, "todo");
}

#[tokio::test]
async fn test_infinite_lock_timeout_is_config_error() {
    let h = harness_with(|config| config.lock.timeout_seconds = f64::INFINITY);
    seed_task(&h, "T-1");
    let err = h.workflow.claim("T-1", "s1").await.unwrap_err();
    assert!(matches!(err, GatekeeperError::ConfigError(_)));
}

#[tokio::test]
async fn test_claim_times_out_while_locked() {
    let h = harness();
    seed_task(&h, "T-1");
    let _held = TaskLock::acquire(
        h.workflow.root(),
        "T-1",
        "validate",
        Some("other"),
        Duration::from_millis(100),
    )
    .unwrap();

    let err = h.workflow.claim("T-1", "s1").await.unwrap_err();
    assert!(matches!(err, GatekeeperError::LockTimeout { .. }));
    assert!(err.to_string().contains("other"));
}

#[tokio::test]
async fn test_record_implementation_stamps_fingerprint() {
    let h = harness();
    seed_task(&h, "T-1");

    let first = h.workflow.record_implementation("T-1", Some("s1"), "draft").await.unwrap();
    assert_eq!(first.round, 1);
    assert_eq!(first.fingerprint.unwrap().diff_hash, "abc123");

    let second = h.workflow.record_implementation("T-1", Some("s2"), "final").await.unwrap();
    assert_eq!(second.authors, vec!["s1", "s2"]);
    assert_eq!(second.body, "final");

    assert!(h.workflow.record_implementation("T-9", None, "x").await.is_err());
}

#[tokio::test]
async fn test_approved_bundle_completes_task() {
    let h = harness();
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();
    h.workflow.record_implementation("T-1", Some("s1"), "Throttle after 5 failures").await.unwrap();

    let outcome = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.execution.status(), BundleStatus::Approved);
    assert_eq!(outcome.task.state, "done");
    assert!(outcome.task.meta_str("completed_at").is_some());
    assert!(outcome.cycle.is_none());

    let bundle = h.workflow.evidence("T-1").unwrap().read_bundle(None).unwrap().unwrap();
    assert!(bundle.approved);
    assert_eq!(bundle.scope, BundleScope::Task);
    assert_eq!(h.codex.calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.claude.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_rejection_then_approval() {
    let h = harness();
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();
    h.workflow.record_implementation("T-1", Some("s1"), "First pass").await.unwrap();

    h.codex.set("global-codex", Verdict::Reject);
    h.claude.set("global-claude", Verdict::Reject);
    let rejected = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap();

    assert_eq!(rejected.execution.status(), BundleStatus::Rejected);
    assert_eq!(rejected.cycle, Some(CycleOutcome::NextRound(2)));
    assert_eq!(rejected.task.state, "wip");

    let store = h.workflow.evidence("T-1").unwrap();
    let carried = store.read_implementation_report(Some(2)).unwrap().unwrap();
    assert!(carried.body.contains("## Changes in round 2"));
    assert!(carried.body.contains("missing input validation"));

    h.codex.set("global-codex", Verdict::Approve);
    h.claude.set("global-claude", Verdict::Approve);
    let approved = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap();
    assert_eq!(approved.execution.round, 2);
    assert_eq!(approved.task.state, "done");
    assert_eq!(h.codex.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_round_limit_escalates() {
    let h = harness_with(|c| c.validation.max_rounds = 1);
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();
    h.workflow.record_implementation("T-1", Some("s1"), "Only pass").await.unwrap();
    h.codex.set("global-codex", Verdict::Reject);
    h.claude.set("global-claude", Verdict::Reject);

    let outcome = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.cycle, Some(CycleOutcome::Escalated(1)));
    assert_eq!(h.workflow.evidence("T-1").unwrap().list_rounds().unwrap(), vec![1]);
}

#[tokio::test]
async fn test_escalation_leaves_state_unchanged() {
    let h = harness();
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();
    h.codex.set("global-codex", Verdict::Reject);

    let outcome = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.execution.status(), BundleStatus::Escalated);
    assert_eq!(outcome.task.state, "wip");
    assert!(outcome.cycle.is_none());
    assert_eq!(outcome.bundle.unwrap().status, BundleStatus::Escalated);
}

#[tokio::test]
async fn test_bundle_is_mirrored_to_children() {
    let h = harness();
    seed_task(&h, "T-1");
    let child = Entity::new(EntityType::Task, "T-2", "done").with_relationship(RelationshipKind::BundleRoot, "T-1");
    h.workflow.repository().save(&child).unwrap();
    h.workflow.claim("T-1", "s1").await.unwrap();
    h.workflow.record_implementation("T-1", Some("s1"), "Bundle work").await.unwrap();

    let outcome = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap();
    let bundle = outcome.bundle.unwrap();
    assert_eq!(bundle.scope, BundleScope::Bundle);
    assert_eq!(bundle.tasks, vec!["T-1", "T-2"]);

    let mirrored = h.workflow.evidence("T-2").unwrap().read_bundle(Some(1)).unwrap().unwrap();
    assert_eq!(mirrored.root_task, "T-1");
    assert_eq!(outcome.task.state, "done");
}

#[tokio::test]
async fn test_open_child_blocks_completion() {
    let h = harness();
    seed_task(&h, "T-1");
    let child = Entity::new(EntityType::Task, "T-2", "wip").with_relationship(RelationshipKind::Parent, "T-1");
    h.workflow.repository().save(&child).unwrap();
    h.workflow.claim("T-1", "s1").await.unwrap();
    h.workflow.record_implementation("T-1", Some("s1"), "Parent work").await.unwrap();

    let err = h
        .workflow
        .validate("T-1", Some("s1"), &ValidateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatekeeperError::StateTransition(_)));

    // the bundle verdict is still on disk
    let bundle = h.workflow.evidence("T-1").unwrap().read_bundle(None).unwrap().unwrap();
    assert!(bundle.approved);
}

#[tokio::test]
async fn test_check_only_writes_nothing() {
    let h = harness();
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();

    let options = ValidateOptions {
        check_only: true,
        changed_files: Some(vec!["src/auth/login.rs".into()]),
        ..Default::default()
    };
    let outcome = h.workflow.validate("T-1", Some("s1"), &options).await.unwrap();
    assert!(outcome.bundle.is_none());
    assert!(outcome.execution.planned.contains(&"security".to_string()));
    assert!(outcome.execution.planned.contains(&"performance".to_string()));
    assert_eq!(h.codex.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_session_close_requires_no_owned_wip() {
    let h = harness();
    seed_task(&h, "T-1");
    h.workflow.claim("T-1", "s1").await.unwrap();
    let session = Entity::new(EntityType::Session, "s1", "closing");
    h.workflow.repository().save(&session).unwrap();

    assert!(h
        .workflow
        .transition(EntityType::Session, "s1", "closed", Some("s1"))
        .await
        .is_err());

    h.workflow.transition(EntityType::Task, "T-1", "todo", Some("s1")).await.unwrap();
    let closed = h
        .workflow
        .transition(EntityType::Session, "s1", "closed", Some("s1"))
        .await
        .unwrap();
    assert_eq!(closed.state, "closed");
}
