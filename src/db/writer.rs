//! The write coordinator — a single-threaded serializer for all database
//! writes.
//!
//! Every write in the process funnels through one dedicated thread that owns
//! the only writable connection. Tasks are queued FIFO; each task runs inside
//! its own transaction under the cross-process [`DatabaseWriteLock`], so
//! concurrent processes (CLI commands, a background worker, a second server)
//! are serialised as well.
//!
//! A task submitted *from* the writer thread (a write handler calling a
//! helper that also submits) runs inline on the open transaction instead of
//! being re-enqueued — re-enqueueing would deadlock the thread against
//! itself, and inline execution keeps the outer transaction atomic across
//! helper calls.

use std::any::Any;
use std::cell::RefCell;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender};
use rusqlite::Connection;

use crate::config::DatabaseConfig;
use crate::db::lock::{DatabaseWriteLock, LockError};

type TaskFn = Box<dyn FnOnce(&Connection) -> Result<Box<dyn Any + Send>> + Send>;
type TaskResult = Result<Box<dyn Any + Send>>;

struct WriteTask {
    run: TaskFn,
    done: Sender<TaskResult>,
}

enum Msg {
    Task(WriteTask),
    Shutdown,
}

// The writer thread parks its connection here, tagged with its coordinator's
// id. `submit` consults the slot to detect re-entrant submission: a matching
// tag means we are already on the writer thread with a transaction open.
thread_local! {
    static ACTIVE_WRITER: RefCell<Option<(u64, Connection)>> = const { RefCell::new(None) };
}

static NEXT_COORDINATOR_ID: AtomicU64 = AtomicU64::new(1);

/// Serialises all database writes through one thread holding the one
/// writable connection, wrapping every task in the cross-process write lock.
///
/// Cheap to clone; all clones share the same queue and thread.
#[derive(Clone)]
pub struct WriteCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    id: u64,
    tx: Sender<Msg>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WriteCoordinator {
    /// Open the writable connection and start the writer thread.
    ///
    /// Opening happens before the thread starts so that an unreachable or
    /// corrupt store fails construction — the server must not begin serving
    /// without a working writer.
    pub fn start(db_path: &Path, cfg: &DatabaseConfig) -> Result<Self> {
        let conn = crate::db::open_database(db_path, cfg.busy_timeout_ms)
            .context("failed to open writer connection")?;
        let lock = DatabaseWriteLock::new(db_path, cfg.lock_timeout_ms);

        let id = NEXT_COORDINATOR_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = crossbeam_channel::unbounded();
        let cfg = cfg.clone();
        let handle = std::thread::Builder::new()
            .name("hoard-writer".into())
            .spawn(move || writer_loop(id, conn, lock, cfg, rx))
            .context("failed to spawn writer thread")?;

        Ok(Self {
            inner: Arc::new(Inner {
                id,
                tx,
                handle: Mutex::new(Some(handle)),
            }),
        })
    }

    /// Execute a write closure on the writer thread and block until it
    /// completes, returning its result or the error carried back from the
    /// worker.
    ///
    /// Tasks execute in FIFO enqueue order, each in its own committed (or
    /// rolled-back) transaction. If the caller *is* the writer thread, the
    /// closure runs inline on the current transaction instead.
    pub fn submit<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let inline = ACTIVE_WRITER.with(|slot| {
            matches!(&*slot.borrow(), Some((id, _)) if *id == self.inner.id)
        });
        if inline {
            return ACTIVE_WRITER.with(|slot| {
                let slot = slot.borrow();
                let (_, conn) = slot.as_ref().expect("writer connection installed");
                f(conn)
            });
        }

        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let run: TaskFn =
            Box::new(move |conn| f(conn).map(|value| Box::new(value) as Box<dyn Any + Send>));
        self.inner
            .tx
            .send(Msg::Task(WriteTask { run, done: done_tx }))
            .map_err(|_| anyhow!("write coordinator is shut down"))?;

        let result = done_rx
            .recv()
            .map_err(|_| anyhow!("write coordinator shut down before running the task"))?;
        result.map(|boxed| {
            *boxed
                .downcast::<R>()
                .expect("write task returned the submitted closure's type")
        })
    }

    /// Drain the queue and stop the writer thread. Tasks enqueued before the
    /// stop still run; the thread joins after the in-flight task finishes.
    pub fn stop(&self) {
        let _ = self.inner.tx.send(Msg::Shutdown);
        if let Some(handle) = self.inner.handle.lock().expect("handle mutex").take() {
            let _ = handle.join();
        }
    }
}

fn writer_loop(
    id: u64,
    conn: Connection,
    mut lock: DatabaseWriteLock,
    cfg: DatabaseConfig,
    rx: Receiver<Msg>,
) {
    ACTIVE_WRITER.with(|slot| *slot.borrow_mut() = Some((id, conn)));
    tracing::debug!(coordinator = id, "writer thread started");

    while let Ok(msg) = rx.recv() {
        match msg {
            Msg::Task(task) => run_task(&mut lock, &cfg, task),
            Msg::Shutdown => break,
        }
    }

    ACTIVE_WRITER.with(|slot| {
        slot.borrow_mut().take();
    });
    tracing::debug!(coordinator = id, "writer thread stopped");
}

/// Run one queued task: acquire the write lock (retrying timeouts within the
/// configured budget), execute inside a transaction, release, and signal the
/// submitter. Failures are attached to the task's result — a doomed task
/// never takes the worker thread down with it.
fn run_task(lock: &mut DatabaseWriteLock, cfg: &DatabaseConfig, task: WriteTask) {
    let deadline = Instant::now() + Duration::from_millis(cfg.retry_budget_ms);
    let backoff = Duration::from_millis(cfg.retry_backoff_ms.clamp(1, 500));

    let result = loop {
        match lock.acquire() {
            Ok(()) => {
                let outcome = execute_in_transaction(task.run);
                lock.release();
                break outcome;
            }
            Err(err @ LockError::Timeout { .. }) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    tracing::warn!(error = %err, "write lock unavailable, giving up");
                    break Err(err.into());
                }
                std::thread::sleep(backoff.min(remaining));
            }
            Err(err) => break Err(err.into()),
        }
    };

    let _ = task.done.send(result);
}

fn execute_in_transaction(run: TaskFn) -> TaskResult {
    ACTIVE_WRITER.with(|slot| {
        let slot = slot.borrow();
        let (_, conn) = slot.as_ref().expect("writer connection installed");

        conn.execute_batch("BEGIN IMMEDIATE")
            .context("failed to begin write transaction")?;

        match std::panic::catch_unwind(AssertUnwindSafe(|| run(conn))) {
            Ok(Ok(value)) => {
                if !conn.is_autocommit() {
                    if let Err(err) = conn.execute_batch("COMMIT") {
                        rollback_if_open(conn);
                        return Err(
                            anyhow::Error::new(err).context("failed to commit write transaction")
                        );
                    }
                }
                Ok(value)
            }
            Ok(Err(err)) => {
                rollback_if_open(conn);
                Err(err)
            }
            Err(panic) => {
                rollback_if_open(conn);
                Err(anyhow!("write task panicked: {}", panic_message(&panic)))
            }
        }
    })
}

fn rollback_if_open(conn: &Connection) {
    if !conn.is_autocommit() {
        if let Err(err) = conn.execute_batch("ROLLBACK") {
            tracing::error!(error = %err, "rollback failed");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}
