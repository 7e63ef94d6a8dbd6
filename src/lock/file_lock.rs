//! Advisory file locks
//!
//! One lock file per `(namespace, key)` under `.gatekeeper/locks/`. Acquisition
//! uses `flock(LOCK_EX | LOCK_NB)` polled with jitter until a deadline, so a
//! waiter never blocks past its timeout. The lock file carries JSON metadata
//! about the holder; the kernel releases the lock when the holder exits.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::errors::{GatekeeperError, Result};
use crate::fs::{get_lock_dir, validate_id};

/// Namespace for per-task claim/validate locks
pub const TASK_NAMESPACE: &str = "task";

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const POLL_JITTER_MS: u64 = 25;

/// Metadata written into a held lock file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockHolder {
    pub pid: u32,
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub acquired_at: String,
}

impl std::fmt::Display for LockHolder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pid {} ({})", self.pid, self.purpose)?;
        if let Some(session) = &self.session_id {
            write!(f, " session {}", session)?;
        }
        Ok(())
    }
}

/// Held lock; released on drop
#[derive(Debug)]
pub struct LockGuard {
    file: File,
    path: PathBuf,
    namespace: String,
    key: String,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        // Clear holder metadata while still holding the lock.
        if let Err(e) = self.file.set_len(0) {
            tracing::debug!(path = %self.path.display(), "failed to clear lock metadata: {}", e);
        }
        unlock(&self.file);
        tracing::debug!(namespace = %self.namespace, key = %self.key, "lock released");
    }
}

/// Lock file location for `(namespace, key)`
pub fn lock_path(root: &Path, namespace: &str, key: &str) -> PathBuf {
    get_lock_dir(root, namespace).join(format!("{}.lock", key))
}

fn open_lock_file(path: &Path) -> Result<File> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    Ok(file)
}

/// Try once to take the lock
pub fn try_acquire(
    root: &Path,
    namespace: &str,
    key: &str,
    purpose: &str,
    session_id: Option<&str>,
) -> Result<Option<LockGuard>> {
    validate_id(namespace)?;
    validate_id(key)?;
    let path = lock_path(root, namespace, key);
    let mut file = loop {
        let file = open_lock_file(&path)?;
        if !try_flock_exclusive(&file)? {
            return Ok(None);
        }
        if is_current(&file, &path)? {
            break file;
        }
        // Unlinked between our open and flock; the lock lives in the new file.
        tracing::debug!(namespace, key, "lock file replaced, reopening");
    };

    let holder = LockHolder {
        pid: std::process::id(),
        purpose: purpose.to_string(),
        session_id: session_id.map(str::to_string),
        acquired_at: chrono::Utc::now().to_rfc3339(),
    };
    let json = serde_json::to_vec(&holder).map_err(|e| GatekeeperError::InvalidJson(e.to_string()))?;
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&json)?;
    file.sync_data()?;

    tracing::debug!(namespace, key, purpose, "lock acquired");
    Ok(Some(LockGuard {
        file,
        path,
        namespace: namespace.to_string(),
        key: key.to_string(),
    }))
}

/// Poll for the lock until `timeout` elapses.
///
/// Blocks the calling thread; async callers go through `spawn_blocking`.
pub fn acquire(
    root: &Path,
    namespace: &str,
    key: &str,
    purpose: &str,
    session_id: Option<&str>,
    timeout: Duration,
) -> Result<LockGuard> {
    let start = Instant::now();
    loop {
        if let Some(guard) = try_acquire(root, namespace, key, purpose, session_id)? {
            return Ok(guard);
        }

        let elapsed = start.elapsed();
        if elapsed >= timeout {
            let holder = read_holder(root, namespace, key).ok().flatten();
            tracing::warn!(namespace, key, waited_ms = elapsed.as_millis() as u64, "lock timeout");
            return Err(GatekeeperError::LockTimeout {
                namespace: namespace.to_string(),
                key: key.to_string(),
                waited_ms: elapsed.as_millis() as u64,
                holder: holder.map(|h| h.to_string()),
            });
        }

        let jitter_ms = rand::random::<u64>() % (POLL_JITTER_MS + 1);
        let pause = (POLL_INTERVAL + Duration::from_millis(jitter_ms)).min(timeout - elapsed);
        std::thread::sleep(pause);
    }
}

/// Holder metadata, if the lock file has any
pub fn read_holder(root: &Path, namespace: &str, key: &str) -> Result<Option<LockHolder>> {
    let path = lock_path(root, namespace, key);
    let mut content = String::new();
    match File::open(&path) {
        Ok(mut file) => {
            file.read_to_string(&mut content)?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(GatekeeperError::Io(e)),
    }
    if content.trim().is_empty() {
        return Ok(None);
    }
    Ok(serde_json::from_str(&content).ok())
}

/// Whether some open file description currently holds the lock
pub fn is_held(root: &Path, namespace: &str, key: &str) -> Result<bool> {
    let path = lock_path(root, namespace, key);
    if !path.exists() {
        return Ok(false);
    }
    let file = OpenOptions::new().read(true).write(true).open(&path)?;
    // Taking it here releases it again when `file` drops.
    Ok(!try_flock_exclusive(&file)?)
}

/// Delete the lock file regardless of holder
pub fn force_remove(root: &Path, namespace: &str, key: &str) -> Result<bool> {
    let path = lock_path(root, namespace, key);
    let holder = read_holder(root, namespace, key).ok().flatten();
    match fs::remove_file(&path) {
        Ok(()) => {
            tracing::warn!(
                namespace,
                key,
                holder = holder.map(|h| h.to_string()).unwrap_or_default(),
                "force-removed lock file"
            );
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(GatekeeperError::Io(e)),
    }
}

/// Remove the lock file when nobody holds it or its recorded holder is dead
pub fn clear_if_stale(root: &Path, namespace: &str, key: &str) -> Result<bool> {
    let path = lock_path(root, namespace, key);
    let file = match OpenOptions::new().read(true).write(true).open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(GatekeeperError::Io(e)),
    };

    if try_flock_exclusive(&file)? {
        // Unlink while still holding the lock, so anyone who opened this
        // inode in the meantime sees it replaced once they get the flock.
        if !is_current(&file, &path)? {
            return Ok(false);
        }
        return force_remove(root, namespace, key);
    }

    match read_holder(root, namespace, key)? {
        Some(holder) if !process_alive(holder.pid) => force_remove(root, namespace, key),
        _ => Ok(false),
    }
}

/// Whether `file` is still the inode linked at `path`
fn is_current(file: &File, path: &Path) -> io::Result<bool> {
    use std::os::unix::fs::MetadataExt;
    let opened = file.metadata()?;
    match fs::metadata(path) {
        Ok(linked) => Ok(opened.dev() == linked.dev() && opened.ino() == linked.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: signal 0 performs only the existence and permission check.
    let result = unsafe { libc::kill(pid, 0) };
    if result == 0 {
        return true;
    }
    io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn try_flock_exclusive(file: &File) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;
    let fd = file.as_raw_fd();
    // SAFETY: fd is a valid descriptor owned by `file`; LOCK_NB never blocks.
    let result = unsafe { libc::flock(fd, libc::LOCK_EX | libc::LOCK_NB) };
    if result == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    if err.kind() == io::ErrorKind::WouldBlock || err.raw_os_error() == Some(libc::EWOULDBLOCK) {
        return Ok(false);
    }
    Err(err)
}

fn unlock(file: &File) {
    use std::os::unix::io::AsRawFd;
    // SAFETY: fd is a valid descriptor owned by `file`.
    unsafe {
        libc::flock(file.as_raw_fd(), libc::LOCK_UN);
    }
}
