//! Git operations module
//!
//! Provides wrappers for git CLI commands and the repository inspector.

mod inspector;
mod operations;

pub use inspector::{GitRepoInspector, RepoInspector};
pub use operations::{
    changed_files, diff_hash, has_uncommitted_changes, head_commit, is_git_repo, repo_fingerprint,
    run_git_command, GitOptions,
};

#[cfg(test)]
pub(crate) use operations::tests::setup_git_repo;
