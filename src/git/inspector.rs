//! Repository inspection seam used by validation and evidence preflight

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::Result;
use crate::fs::{get_worktrees_dir, validate_id};
use crate::schemas::RepoFingerprint;

use super::operations::{repo_fingerprint, GitOptions};

#[async_trait]
pub trait RepoInspector: Send + Sync {
    /// Current fingerprint of the working tree at `root`
    async fn fingerprint(&self, root: &Path) -> Result<RepoFingerprint>;

    /// Directory a session works in
    fn worktree_path(&self, root: &Path, session_id: Option<&str>) -> PathBuf;
}

/// Shells out to `git`
#[derive(Debug, Clone, Default)]
pub struct GitRepoInspector;

#[async_trait]
impl RepoInspector for GitRepoInspector {
    async fn fingerprint(&self, root: &Path) -> Result<RepoFingerprint> {
        repo_fingerprint(&GitOptions::new(root)).await
    }

    /// `.gatekeeper/worktrees/<session>` when it exists, else the project root
    fn worktree_path(&self, root: &Path, session_id: Option<&str>) -> PathBuf {
        session_id
            .filter(|s| validate_id(s).is_ok())
            .map(|s| get_worktrees_dir(root).join(s))
            .filter(|p| p.is_dir())
            .unwrap_or_else(|| root.to_path_buf())
    }
}
