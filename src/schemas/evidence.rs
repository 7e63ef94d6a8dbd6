//! Evidence schemas - validator reports, bundle summaries, implementation reports

use serde::{Deserialize, Serialize};

/// Tri-state verdict. `Pending` means inconclusive, never approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Approve,
    Reject,
    #[default]
    Pending,
}

impl Verdict {
    /// Approve or reject; a report with this verdict is final for its round
    pub fn is_conclusive(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Approve => write!(f, "approve"),
            Verdict::Reject => write!(f, "reject"),
            Verdict::Pending => write!(f, "pending"),
        }
    }
}

/// How sure an engine claims to be
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    #[default]
    Medium,
    High,
}

impl std::str::FromStr for Confidence {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Confidence::Low),
            "medium" | "med" => Ok(Confidence::Medium),
            "high" => Ok(Confidence::High),
            other => Err(format!("Unknown confidence: {}", other)),
        }
    }
}

/// Execution bookkeeping for a validator run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracking {
    pub process_id: u32,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl Tracking {
    pub fn start() -> Self {
        Tracking {
            process_id: std::process::id(),
            started_at: chrono::Utc::now().to_rfc3339(),
            completed_at: None,
        }
    }

    pub fn complete(mut self) -> Self {
        self.completed_at = Some(chrono::Utc::now().to_rfc3339());
        self
    }
}

/// Report written once per (task, round, validator)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorReport {
    pub task_id: String,
    pub round: u32,
    pub validator_id: String,
    pub verdict: Verdict,
    #[serde(default)]
    pub rationale: String,
    #[serde(default)]
    pub confidence: Confidence,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub tracking: Tracking,
}

/// Whether a bundle covers a single task or a cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleScope {
    Task,
    Bundle,
}

/// Aggregate status of a bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStatus {
    Approved,
    Rejected,
    Pending,
    Escalated,
}

/// Per-validator line in a bundle summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleValidator {
    pub id: String,
    pub verdict: Verdict,
    pub blocking: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub rationale: String,
}

/// Aggregate verdict for a task (or bundle of tasks) at a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleSummary {
    pub root_task: String,
    pub scope: BundleScope,
    #[serde(default)]
    pub tasks: Vec<String>,
    pub round: u32,
    pub approved: bool,
    pub preset: String,
    pub status: BundleStatus,
    #[serde(default)]
    pub validators: Vec<BundleValidator>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocking_failed: Vec<String>,
    pub created_at: String,
}

impl BundleSummary {
    /// Validators whose reports rejected the bundle
    pub fn rejecting(&self) -> impl Iterator<Item = &BundleValidator> {
        self.validators
            .iter()
            .filter(|v| v.verdict == Verdict::Reject)
    }
}

/// Snapshot of repository state when a report was written
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoFingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub head: Option<String>,
    pub dirty: bool,
    pub diff_hash: String,
}

/// Implementer's account of a round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImplementationReport {
    pub task_id: String,
    pub round: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carried_from_round: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<RepoFingerprint>,
    pub created_at: String,
}

impl ImplementationReport {
    pub fn new(task_id: impl Into<String>, round: u32, body: impl Into<String>) -> Self {
        ImplementationReport {
            task_id: task_id.into(),
            round,
            session_id: None,
            authors: Vec::new(),
            body: body.into(),
            carried_from_round: None,
            fingerprint: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Request left for a delegated validator to pick up
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationRequest {
    pub task_id: String,
    pub round: u32,
    pub validator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub worktree: String,
    pub prompt: String,
    /// Where the delegate must write its report
    pub report_path: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_serialization() {
        assert_eq!(serde_json::to_string(&Verdict::Approve).unwrap(), "\"approve\"");
        assert_eq!(serde_json::to_string(&Verdict::Reject).unwrap(), "\"reject\"");
        assert_eq!(serde_json::to_string(&Verdict::Pending).unwrap(), "\"pending\"");
        assert_eq!(Verdict::default(), Verdict::Pending);
        assert!(!Verdict::Pending.is_conclusive());
    }

    #[test]
    fn test_confidence_parse_and_order() {
        assert_eq!("HIGH".parse::<Confidence>().unwrap(), Confidence::High);
        assert_eq!(" med ".parse::<Confidence>().unwrap(), Confidence::Medium);
        assert!("certain".parse::<Confidence>().is_err());
        assert!(Confidence::High > Confidence::Low);
    }

    #[test]
    fn test_report_defaults_when_fields_missing() {
        let json = r#"{
            "task_id": "T-1", "round": 1, "validator_id": "global-codex",
            "verdict": "approve",
            "tracking": {"process_id": 7, "started_at": "2026-01-01T00:00:00Z"}
        }"#;
        let report: ValidatorReport = serde_json::from_str(json).unwrap();
        assert_eq!(report.verdict, Verdict::Approve);
        assert_eq!(report.confidence, Confidence::Medium);
        assert!(report.rationale.is_empty());
        assert!(report.tracking.completed_at.is_none());
    }

    #[test]
    fn test_bundle_rejecting_filter() {
        let bundle = BundleSummary {
            root_task: "T-1".into(),
            scope: BundleScope::Task,
            tasks: vec!["T-1".into()],
            round: 1,
            approved: false,
            preset: "standard".into(),
            status: BundleStatus::Rejected,
            validators: vec![
                BundleValidator { id: "a".into(), verdict: Verdict::Approve, blocking: true, rationale: String::new() },
                BundleValidator { id: "b".into(), verdict: Verdict::Reject, blocking: true, rationale: "missing tests".into() },
            ],
            blocking_failed: vec!["b".into()],
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        let ids: Vec<_> = bundle.rejecting().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }
}
