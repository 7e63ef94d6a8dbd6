//! Per-task mutual exclusion across processes

mod file_lock;

use std::path::{Path, PathBuf};
use std::time::Duration;

pub use file_lock::{LockGuard, LockHolder, TASK_NAMESPACE};

use crate::errors::Result;

/// Guard returned by `TaskLock::acquire`
pub type TaskLockGuard = LockGuard;

/// Lock serializing claim and validate on one task
pub struct TaskLock;

impl TaskLock {
    pub fn path(project_root: &Path, task_id: &str) -> PathBuf {
        file_lock::lock_path(project_root, TASK_NAMESPACE, task_id)
    }

    /// Take the task lock, waiting at most `timeout`
    pub fn acquire(
        project_root: &Path,
        task_id: &str,
        purpose: &str,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<TaskLockGuard> {
        file_lock::acquire(project_root, TASK_NAMESPACE, task_id, purpose, session_id, timeout)
    }

    /// `acquire` on the blocking pool, for async callers
    pub async fn acquire_async(
        project_root: &Path,
        task_id: &str,
        purpose: &str,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<TaskLockGuard> {
        let root = project_root.to_path_buf();
        let task_id = task_id.to_string();
        let purpose = purpose.to_string();
        let session_id = session_id.map(str::to_string);
        tokio::task::spawn_blocking(move || {
            Self::acquire(&root, &task_id, &purpose, session_id.as_deref(), timeout)
        })
        .await
        .map_err(|e| crate::errors::GatekeeperError::wrap(e, "lock acquisition task failed"))?
    }

    pub fn holder(project_root: &Path, task_id: &str) -> Result<Option<LockHolder>> {
        file_lock::read_holder(project_root, TASK_NAMESPACE, task_id)
    }

    pub fn is_held(project_root: &Path, task_id: &str) -> Result<bool> {
        file_lock::is_held(project_root, TASK_NAMESPACE, task_id)
    }

    /// Remove the lock file even if a live process holds it
    pub fn force_remove(project_root: &Path, task_id: &str) -> Result<bool> {
        file_lock::force_remove(project_root, TASK_NAMESPACE, task_id)
    }

    pub fn clear_if_stale(project_root: &Path, task_id: &str) -> Result<bool> {
        file_lock::clear_if_stale(project_root, TASK_NAMESPACE, task_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GatekeeperError;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_async_acquire_contends_with_sync_holder() {
        let temp = TempDir::new().unwrap();
        let _guard = TaskLock::acquire(temp.path(), "T-1", "claim", Some("s1"), Duration::from_secs(1)).unwrap();

        let err = TaskLock::acquire_async(temp.path(), "T-1", "validate", Some("s2"), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, GatekeeperError::LockTimeout { .. }));
        assert_eq!(TaskLock::holder(temp.path(), "T-1").unwrap().unwrap().purpose, "claim");
    }
}
