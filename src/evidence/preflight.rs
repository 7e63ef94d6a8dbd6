//! Staleness check for implementation reports
//!
//! Compares the fingerprint recorded with the implementation report against
//! the repository as it is now. A stale report is a warning, not a failure.

use std::path::Path;

use serde::Serialize;

use crate::errors::Result;
use crate::git::RepoInspector;

use super::store::EvidenceStore;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PreflightReport {
    pub round: Option<u32>,
    pub stale: bool,
    pub reasons: Vec<String>,
}

pub async fn preflight(
    store: &EvidenceStore,
    inspector: &dyn RepoInspector,
    worktree: &Path,
    round: Option<u32>,
) -> Result<PreflightReport> {
    let round = match round {
        Some(n) => Some(n),
        None => store.latest_round()?,
    };
    let mut report = PreflightReport {
        round,
        ..Default::default()
    };

    let Some(n) = round else {
        report.reasons.push("no evidence round recorded".to_string());
        report.stale = true;
        return Ok(report);
    };

    let Some(implementation) = store.read_implementation_report(Some(n))? else {
        report.stale = true;
        report.reasons.push(format!("round {} has no implementation report", n));
        return Ok(report);
    };

    let Some(recorded) = implementation.fingerprint else {
        report
            .reasons
            .push("implementation report carries no fingerprint".to_string());
        return Ok(report);
    };

    let current = match inspector.fingerprint(worktree).await {
        Ok(fp) => fp,
        Err(e) => {
            tracing::warn!("cannot fingerprint {}: {}", worktree.display(), e);
            report.reasons.push(format!("cannot fingerprint repository: {}", e));
            return Ok(report);
        }
    };

    if recorded.head != current.head {
        report.reasons.push(format!(
            "HEAD moved from {} to {}",
            recorded.head.as_deref().unwrap_or("<none>"),
            current.head.as_deref().unwrap_or("<none>")
        ));
    }
    if recorded.dirty != current.dirty {
        report.reasons.push(format!(
            "working tree went from {} to {}",
            if recorded.dirty { "dirty" } else { "clean" },
            if current.dirty { "dirty" } else { "clean" }
        ));
    }
    if recorded.diff_hash != current.diff_hash {
        report
            .reasons
            .push("working tree diff changed since the report".to_string());
    }
    report.stale = !report.reasons.is_empty();

    if report.stale {
        tracing::warn!(task = %store.task_id(), round = n, "implementation report is stale");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitRepoInspector;
    use crate::schemas::{ImplementationReport, RepoFingerprint};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::TempDir;

    struct FixedInspector(RepoFingerprint);

    #[async_trait]
    impl RepoInspector for FixedInspector {
        async fn fingerprint(&self, _root: &Path) -> Result<RepoFingerprint> {
            Ok(self.0.clone())
        }

        fn worktree_path(&self, root: &Path, _session_id: Option<&str>) -> PathBuf {
            root.to_path_buf()
        }
    }

    fn fingerprint(head: &str, diff: &str) -> RepoFingerprint {
        RepoFingerprint {
            head: Some(head.into()),
            dirty: true,
            diff_hash: diff.into(),
        }
    }

    #[tokio::test]
    async fn test_fresh_report_is_not_stale() {
        let temp = TempDir::new().unwrap();
        let store = EvidenceStore::new(temp.path(), "T-1").unwrap();
        store.ensure_round(None).unwrap();
        let mut report = ImplementationReport::new("T-1", 1, "done");
        report.fingerprint = Some(fingerprint("abc", "d1"));
        store.write_implementation_report(&report).unwrap();

        let inspector = FixedInspector(fingerprint("abc", "d1"));
        let result = preflight(&store, &inspector, temp.path(), None).await.unwrap();
        assert!(!result.stale);
        assert_eq!(result.round, Some(1));
    }

    #[tokio::test]
    async fn test_changed_diff_is_stale() {
        let temp = TempDir::new().unwrap();
        let store = EvidenceStore::new(temp.path(), "T-1").unwrap();
        store.ensure_round(None).unwrap();
        let mut report = ImplementationReport::new("T-1", 1, "done");
        report.fingerprint = Some(fingerprint("abc", "d1"));
        store.write_implementation_report(&report).unwrap();

        let inspector = FixedInspector(fingerprint("def", "d2"));
        let result = preflight(&store, &inspector, temp.path(), None).await.unwrap();
        assert!(result.stale);
        assert_eq!(result.reasons.len(), 2);
    }

    #[tokio::test]
    async fn test_clean_to_dirty_is_stale() {
        let repo = crate::git::setup_git_repo().await;
        let inspector = GitRepoInspector;
        let store = EvidenceStore::new(repo.path(), "T-1").unwrap();
        store.ensure_round(None).unwrap();
        let mut report = ImplementationReport::new("T-1", 1, "done");
        report.fingerprint = Some(inspector.fingerprint(repo.path()).await.unwrap());
        store.write_implementation_report(&report).unwrap();

        let fresh = preflight(&store, &inspector, repo.path(), None).await.unwrap();
        assert!(!fresh.stale, "{:?}", fresh.reasons);

        std::fs::write(repo.path().join("added.rs"), "fn added() {}").unwrap();
        let result = preflight(&store, &inspector, repo.path(), None).await.unwrap();
        assert!(result.stale);
        assert!(result.reasons.iter().any(|r| r.contains("clean to dirty")));
    }

    #[tokio::test]
    async fn test_missing_report_is_stale() {
        let temp = TempDir::new().unwrap();
        let store = EvidenceStore::new(temp.path(), "T-1").unwrap();
        let inspector = FixedInspector(fingerprint("abc", "d1"));
        let result = preflight(&store, &inspector, temp.path(), None).await.unwrap();
        assert!(result.stale);
        assert_eq!(result.round, None);
    }
}
