//! Cross-process advisory locks for serialising database writes.
//!
//! Uses `flock(2)` (via the `fs2` crate) on dedicated lock files next to the
//! database so that **only one writer** — whether it lives inside an MCP
//! server, a CLI command, or a background worker — can hold the write lock at
//! any time.
//!
//! Three lock files are used:
//!
//! * `<db>.lock` — **write lock**, held for the duration of each write
//!   transaction. Prevents two processes from writing concurrently.
//! * `<db>.server` — **server singleton lock**, held for the entire lifetime
//!   of a `hoard serve` process. Prevents two servers from starting on the
//!   same database file.
//! * `<db>.sync` — guards the external connector sync pipeline so only one
//!   sync run is active at a time.
//!
//! Readers never need any lock (WAL mode guarantees non-blocking reads).
//!
//! `flock` is per-open-file-description: every acquisition opens the lock
//! file afresh, so two handles inside the same process contend with each
//! other exactly like two processes do. In-process code that already runs
//! under the write coordinator must therefore never re-acquire the write
//! lock — it would deadlock against its own writer thread. On network
//! filesystems `flock` may silently fail to exclude; `hoard doctor` warns
//! about non-local database paths.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use fs2::FileExt;

/// Interval between acquisition attempts while waiting for a held lock.
const ACQUIRE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, thiserror::Error)]
pub enum LockError {
    #[error("could not acquire lock {path} within {timeout_ms} ms; another process may be holding it")]
    Timeout { path: PathBuf, timeout_ms: u64 },

    #[error(
        "Another hoard server is already running on this database.\n\
         Only one server may write to a database at a time.\n\
         Stop the other process first, or use a different storage.db_path."
    )]
    AlreadyRunning,

    #[error("lock file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Low-level exclusive advisory lock on a file path.
///
/// Acquisition opens the file fresh each time (creating it if needed), so the
/// lock behaves per-open-file-description. The lock file is never deleted on
/// release — deleting it would race a concurrent acquirer that already holds
/// an open handle to the old inode.
#[derive(Debug)]
pub struct AdvisoryLock {
    path: PathBuf,
    timeout: Duration,
    file: Option<File>,
}

impl AdvisoryLock {
    pub fn new(path: PathBuf, timeout: Duration) -> Self {
        Self {
            path,
            timeout,
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn held(&self) -> bool {
        self.file.is_some()
    }

    /// Block until the lock is acquired or the timeout elapses.
    pub fn acquire(&mut self) -> Result<(), LockError> {
        let deadline = Instant::now() + self.timeout;
        loop {
            if self.try_acquire()? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    path: self.path.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
            std::thread::sleep(ACQUIRE_POLL);
        }
    }

    /// Single non-blocking acquisition attempt. Returns `false` if the lock
    /// is held elsewhere.
    pub fn try_acquire(&mut self) -> Result<bool, LockError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .map_err(|source| LockError::Io {
                path: self.path.clone(),
                source,
            })?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                write_holder_record(&file);
                self.file = Some(file);
                Ok(true)
            }
            // EWOULDBLOCK and friends all mean "held elsewhere"
            Err(_) => Ok(false),
        }
    }

    /// Release the lock if held. Idempotent.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}

impl Drop for AdvisoryLock {
    fn drop(&mut self) {
        self.release();
    }
}

/// Write a diagnostic record of the current holder into the lock file.
///
/// Purely informational (`hoard doctor` and humans read it); mutual
/// exclusion never depends on the file's contents.
fn write_holder_record(mut file: &File) {
    let record = serde_json::json!({
        "pid": std::process::id(),
        "acquired_at": crate::util::now_iso(),
    });
    let _ = file.set_len(0);
    let _ = writeln!(file, "{record}");
}

/// Exclusive, cross-process write lock at `<db_path>.lock`.
///
/// Acquired immediately before every write transaction and released right
/// after commit or rollback.
#[derive(Debug)]
pub struct DatabaseWriteLock {
    inner: AdvisoryLock,
}

impl DatabaseWriteLock {
    pub fn new(db_path: &Path, timeout_ms: u64) -> Self {
        Self {
            inner: AdvisoryLock::new(
                sibling_path(db_path, "lock"),
                Duration::from_millis(timeout_ms),
            ),
        }
    }

    pub fn acquire(&mut self) -> Result<(), LockError> {
        self.inner.acquire()
    }

    pub fn release(&mut self) {
        self.inner.release();
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

/// Prevents two `hoard serve` processes on the same database.
///
/// The lock file is `<db_path>.server` and is held for the server's entire
/// lifetime. It does not conflict with [`DatabaseWriteLock`] because it uses
/// a different file.
#[derive(Debug)]
pub struct ServerSingletonLock {
    inner: AdvisoryLock,
}

impl ServerSingletonLock {
    pub fn new(db_path: &Path) -> Self {
        Self {
            inner: AdvisoryLock::new(sibling_path(db_path, "server"), Duration::ZERO),
        }
    }

    /// Acquire the lock or fail immediately with [`LockError::AlreadyRunning`].
    pub fn acquire_or_fail(&mut self) -> Result<(), LockError> {
        if self.inner.try_acquire()? {
            Ok(())
        } else {
            Err(LockError::AlreadyRunning)
        }
    }

    pub fn release(&mut self) {
        self.inner.release();
    }

    pub fn path(&self) -> &Path {
        self.inner.path()
    }
}

/// Guards the external connector sync pipeline: at most one sync run at a
/// time, across all processes. Non-blocking by design — a sync attempt that
/// finds the lock held reports "already syncing" instead of waiting.
#[derive(Debug)]
pub struct SyncLock {
    inner: AdvisoryLock,
}

impl SyncLock {
    pub fn new(db_path: &Path) -> Self {
        Self {
            inner: AdvisoryLock::new(sibling_path(db_path, "sync"), Duration::ZERO),
        }
    }

    pub fn try_acquire(&mut self) -> Result<bool, LockError> {
        self.inner.try_acquire()
    }

    pub fn release(&mut self) {
        self.inner.release();
    }
}

/// `/path/to/hoard.db` + `"lock"` → `/path/to/hoard.db.lock`
fn sibling_path(db_path: &Path, suffix: &str) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".");
    os.push(suffix);
    PathBuf::from(os)
}
