//! Git CLI operations
//!
//! Thin wrappers over `git` used to fingerprint the working tree.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use sha2::{Digest, Sha256};
use tokio::process::Command;

use crate::errors::{GatekeeperError, Result};
use crate::fs::STATE_DIR;
use crate::schemas::RepoFingerprint;

/// Options for git operations
#[derive(Debug, Clone)]
pub struct GitOptions {
    /// Working directory for git commands
    pub cwd: PathBuf,
}

impl GitOptions {
    pub fn new(cwd: impl Into<PathBuf>) -> Self {
        GitOptions { cwd: cwd.into() }
    }
}

async fn git_output(args: &[&str], options: &GitOptions) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(&options.cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| GatekeeperError::GitError(format!("Failed to execute git: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(GatekeeperError::GitError(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(output.stdout)
}

/// Execute a git command and return trimmed stdout
pub async fn run_git_command(args: &[&str], options: &GitOptions) -> Result<String> {
    let stdout = git_output(args, options).await?;
    Ok(String::from_utf8_lossy(&stdout).trim().to_string())
}

/// Check if a path is inside a git repository
pub async fn is_git_repo(cwd: &Path) -> bool {
    let output = Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(cwd)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await;

    matches!(output, Ok(status) if status.success())
}

/// Commit id of HEAD, `None` before the first commit
pub async fn head_commit(options: &GitOptions) -> Option<String> {
    run_git_command(&["rev-parse", "--verify", "HEAD"], options)
        .await
        .ok()
        .filter(|h| !h.is_empty())
}

/// Any tracked or untracked change. Errors count as dirty.
pub async fn has_uncommitted_changes(options: &GitOptions) -> bool {
    changed_files(options)
        .await
        .map_or(true, |files| !files.is_empty())
}

/// Our own state directory never counts as a change to the work
fn is_state_path(path: &str) -> bool {
    path.trim_matches('"').split('/').any(|part| part == STATE_DIR)
}

/// Exclude pathspec for the state directory
fn state_pathspec() -> String {
    format!(":(exclude){}", STATE_DIR)
}

/// Untracked, non-ignored files relative to the working directory
async fn untracked_files(options: &GitOptions) -> Result<Vec<String>> {
    let stdout = git_output(&["ls-files", "--others", "--exclude-standard", "-z"], options).await?;
    let mut files: Vec<String> = String::from_utf8_lossy(&stdout)
        .split('\0')
        .filter(|path| !path.is_empty() && !is_state_path(path))
        .map(str::to_string)
        .collect();
    files.sort();
    Ok(files)
}

/// Hex sha256 of `git diff HEAD` (plain `git diff` before the first commit)
/// plus the path and bytes of every untracked file
pub async fn diff_hash(options: &GitOptions, has_head: bool) -> Result<String> {
    let exclude = state_pathspec();
    let diff = if has_head {
        git_output(&["diff", "HEAD", "--", ".", &exclude], options).await?
    } else {
        git_output(&["diff", "--", ".", &exclude], options).await?
    };

    let mut hasher = Sha256::new();
    hasher.update(&diff);
    for path in untracked_files(options).await? {
        hasher.update(path.as_bytes());
        hasher.update([0u8]);
        match std::fs::read(options.cwd.join(&path)) {
            Ok(bytes) => hasher.update(&bytes),
            Err(e) => tracing::debug!("cannot read untracked {}: {}", path, e),
        }
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Paths with uncommitted changes, including untracked files.
/// Paths under the state directory are left out.
pub async fn changed_files(options: &GitOptions) -> Result<Vec<String>> {
    // Raw stdout: trimming would eat the status column of the first line
    let stdout = git_output(&["status", "--porcelain", "--untracked-files=all"], options).await?;
    let mut files: Vec<String> = String::from_utf8_lossy(&stdout)
        .lines()
        .filter(|line| line.len() > 3)
        .map(|line| {
            let path = &line[3..];
            // Renames are reported as "old -> new"
            match path.rsplit_once(" -> ") {
                Some((_, new)) => new.to_string(),
                None => path.to_string(),
            }
        })
        .filter(|path| !is_state_path(path))
        .collect();
    files.sort();
    files.dedup();
    Ok(files)
}

/// Snapshot of HEAD, dirtiness and the working diff
pub async fn repo_fingerprint(options: &GitOptions) -> Result<RepoFingerprint> {
    if !is_git_repo(&options.cwd).await {
        return Err(GatekeeperError::GitError(format!(
            "{} is not a git repository",
            options.cwd.display()
        )));
    }
    let head = head_commit(options).await;
    let dirty = has_uncommitted_changes(options).await;
    let diff_hash = diff_hash(options, head.is_some()).await?;
    Ok(RepoFingerprint {
        head,
        dirty,
        diff_hash,
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn git(dir: &Path, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(dir)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .unwrap();
        assert!(status.success(), "git {:?} failed", args);
    }

    /// Repository with one commit holding README.md
    pub(crate) async fn setup_git_repo() -> TempDir {
        let temp = TempDir::new().unwrap();
        let dir = temp.path();
        git(dir, &["init", "-q"]).await;
        git(dir, &["config", "user.email", "validator@example.com"]).await;
        git(dir, &["config", "user.name", "Validator"]).await;
        std::fs::write(dir.join("README.md"), "# Fixture").unwrap();
        git(dir, &["add", "-A"]).await;
        git(dir, &["commit", "-q", "-m", "fixture"]).await;
        temp
    }

    #[tokio::test]
    async fn test_is_git_repo() {
        let temp = setup_git_repo().await;
        assert!(is_git_repo(temp.path()).await);

        let non_repo = TempDir::new().unwrap();
        assert!(!is_git_repo(non_repo.path()).await);
    }

    #[tokio::test]
    async fn test_has_uncommitted_changes() {
        let temp = setup_git_repo().await;
        let options = GitOptions::new(temp.path());

        // No uncommitted changes initially
        assert!(!has_uncommitted_changes(&options).await);

        // Create an uncommitted change
        std::fs::write(temp.path().join("new_file.txt"), "content").unwrap();
        assert!(has_uncommitted_changes(&options).await);
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_diff() {
        let temp = setup_git_repo().await;
        let options = GitOptions::new(temp.path());

        let clean = repo_fingerprint(&options).await.unwrap();
        assert!(clean.head.is_some());
        assert!(!clean.dirty);
        assert_eq!(clean.diff_hash.len(), 64);

        std::fs::write(temp.path().join("README.md"), "# Changed").unwrap();
        let changed = repo_fingerprint(&options).await.unwrap();
        assert!(changed.dirty);
        assert_eq!(changed.head, clean.head);
        assert_ne!(changed.diff_hash, clean.diff_hash);
    }

    #[tokio::test]
    async fn test_changed_files() {
        let temp = setup_git_repo().await;
        let options = GitOptions::new(temp.path());
        assert!(changed_files(&options).await.unwrap().is_empty());

        std::fs::write(temp.path().join("README.md"), "# Changed").unwrap();
        std::fs::create_dir_all(temp.path().join("src/auth")).unwrap();
        std::fs::write(temp.path().join("src/auth/login.rs"), "fn main() {}").unwrap();

        let files = changed_files(&options).await.unwrap();
        assert_eq!(files, vec!["README.md", "src/auth/login.rs"]);
    }

    #[tokio::test]
    async fn test_fingerprint_tracks_untracked_contents() {
        let temp = setup_git_repo().await;
        let options = GitOptions::new(temp.path());
        let clean = repo_fingerprint(&options).await.unwrap();

        std::fs::write(temp.path().join("added.rs"), "fn one() {}").unwrap();
        let first = repo_fingerprint(&options).await.unwrap();
        assert!(first.dirty);
        assert_ne!(first.diff_hash, clean.diff_hash);

        std::fs::write(temp.path().join("added.rs"), "fn two() {}").unwrap();
        let second = repo_fingerprint(&options).await.unwrap();
        assert_ne!(second.diff_hash, first.diff_hash);
    }

    #[tokio::test]
    async fn test_state_dir_is_not_a_change() {
        let temp = setup_git_repo().await;
        let options = GitOptions::new(temp.path());
        let clean = repo_fingerprint(&options).await.unwrap();

        let tasks = temp.path().join(STATE_DIR).join("tasks");
        std::fs::create_dir_all(&tasks).unwrap();
        std::fs::write(tasks.join("secret-rotation.md"), "---\nid: T-1\n---\n").unwrap();

        assert!(changed_files(&options).await.unwrap().is_empty());
        let after = repo_fingerprint(&options).await.unwrap();
        assert!(!after.dirty);
        assert_eq!(after.diff_hash, clean.diff_hash);

        std::fs::write(temp.path().join("secret.rs"), "").unwrap();
        assert_eq!(changed_files(&options).await.unwrap(), vec!["secret.rs"]);
    }

    #[tokio::test]
    async fn test_fingerprint_outside_repo() {
        let temp = TempDir::new().unwrap();
        let err = repo_fingerprint(&GitOptions::new(temp.path())).await.unwrap_err();
        assert!(matches!(err, GatekeeperError::GitError(_)));
    }
}
