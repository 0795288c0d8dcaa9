//! Leased background job worker.
//!
//! Exactly one worker across the host drains the `background_jobs` queue at
//! a time: the singleton `worker_lease` row admits whoever wins the
//! optimistic upsert, and everyone else backs off. The holder renews well
//! inside the lease TTL on every poll; a renewal that matches zero rows
//! means the lease was lost, and the worker stops draining until it wins it
//! back.
//!
//! All database mutations go through the write coordinator — the worker runs
//! inside the server process, and re-acquiring the cross-process write lock
//! from here would self-contend with the writer thread's own acquisitions.
//! Job claiming is a SELECT followed by a conditional UPDATE; that two-step
//! form is safe only because it executes on the single writer thread.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::config::HoardConfig;
use crate::db;
use crate::db::writer::WriteCoordinator;
use crate::embedding::EmbeddingProvider;
use crate::memory::detect;
use crate::memory::types::{Job, JobKind};
use crate::tasks::requeue_expired_tasks;
use crate::util::{iso_after_millis, iso_before_millis, new_id, now_iso};

/// Handle to the background worker thread.
pub struct Worker {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Spawn the worker loop.
    pub fn start(
        db_path: PathBuf,
        config: HoardConfig,
        writer: WriteCoordinator,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let handle = std::thread::Builder::new()
            .name("hoard-worker".into())
            .spawn(move || worker_loop(db_path, config, writer, embedder, stop2))
            .expect("failed to spawn worker thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Signal the loop to exit and wait for it.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    db_path: PathBuf,
    config: HoardConfig,
    writer: WriteCoordinator,
    embedder: Arc<dyn EmbeddingProvider>,
    stop: Arc<AtomicBool>,
) {
    let worker_id = format!("worker-{}-{}", std::process::id(), &new_id()[..8]);
    let poll = Duration::from_millis(config.worker.poll_interval_ms.max(10));
    tracing::info!(worker_id = %worker_id, "background worker started");

    while !stop.load(Ordering::Relaxed) {
        let lease_ttl = config.worker.lease_ttl_ms as i64;
        let id = worker_id.clone();
        let holding = writer
            .submit(move |conn| acquire_or_renew_lease(conn, &id, lease_ttl))
            .unwrap_or_else(|err| {
                tracing::warn!(error = %err, "lease renewal failed");
                false
            });
        if !holding {
            sleep_with_stop(poll, &stop);
            continue;
        }

        if let Err(err) = housekeeping(&writer, &config) {
            tracing::warn!(error = %err, "worker housekeeping failed");
        }

        match run_one_job(&db_path, &writer, embedder.as_ref(), &config) {
            Ok(true) => {} // look for the next job immediately
            Ok(false) => sleep_with_stop(poll, &stop),
            Err(err) => {
                tracing::warn!(error = %err, "job processing round failed");
                sleep_with_stop(poll, &stop);
            }
        }
    }

    // Give the lease up promptly so a successor need not wait out the TTL.
    let id = worker_id.clone();
    let _ = writer.submit(move |conn| release_lease(conn, &id));
    tracing::info!(worker_id = %worker_id, "background worker stopped");
}

fn sleep_with_stop(total: Duration, stop: &AtomicBool) {
    let step = Duration::from_millis(25);
    let mut remaining = total;
    while !remaining.is_zero() && !stop.load(Ordering::Relaxed) {
        let chunk = remaining.min(step);
        std::thread::sleep(chunk);
        remaining -= chunk;
    }
}

fn housekeeping(writer: &WriteCoordinator, config: &HoardConfig) -> Result<()> {
    let job_timeout = config.worker.job_timeout_ms as i64;
    writer.submit(move |conn| requeue_stuck_jobs(conn, job_timeout))?;
    writer.submit(|conn| requeue_expired_tasks(conn))?;
    let retention = config.worker.job_retention_days;
    writer.submit(move |conn| prune_terminal_jobs(conn, retention))?;
    Ok(())
}

/// Claim and process at most one pending job. Returns `true` if a job was
/// processed (successfully or not), `false` if the queue was empty.
pub fn run_one_job(
    db_path: &Path,
    writer: &WriteCoordinator,
    embedder: &dyn EmbeddingProvider,
    config: &HoardConfig,
) -> Result<bool> {
    let Some(job) = writer.submit(claim_next_job)? else {
        return Ok(false);
    };

    let outcome = process_job(db_path, writer, embedder, &job, config);
    let job_id = job.id.clone();
    match outcome {
        Ok(()) => {
            writer.submit(move |conn| complete_job(conn, &job_id))?;
        }
        Err(err) => {
            tracing::warn!(job = %job.id, kind = %job.job_type, error = %err, "job failed");
            let message = err.to_string();
            writer.submit(move |conn| fail_job(conn, &job_id, &message))?;
        }
    }
    Ok(true)
}

/// Drain the queue until empty. Deterministic helper for tests and for
/// `hoard db drain`-style maintenance; the serving loop uses
/// [`run_one_job`] so it can interleave lease renewals.
pub fn drain_pending_jobs(
    db_path: &Path,
    writer: &WriteCoordinator,
    embedder: &dyn EmbeddingProvider,
    config: &HoardConfig,
) -> Result<usize> {
    let mut processed = 0;
    while run_one_job(db_path, writer, embedder, config)? {
        processed += 1;
    }
    Ok(processed)
}

fn process_job(
    db_path: &Path,
    writer: &WriteCoordinator,
    embedder: &dyn EmbeddingProvider,
    job: &Job,
    config: &HoardConfig,
) -> Result<()> {
    let kind: JobKind = job
        .job_type
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    let memory_id = job
        .memory_id
        .clone()
        .context("job has no target memory")?;

    match kind {
        JobKind::EmbedMemory => {
            // Read and compute outside any transaction; only the attach is a
            // (small, guarded) write.
            let reader = db::open_reader(db_path, config.database.busy_timeout_ms)?;
            let content: Option<String> = reader
                .query_row(
                    "SELECT content FROM memories WHERE id = ?1",
                    params![memory_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(content) = content else {
                // Pruned before we got here; nothing to embed.
                return Ok(());
            };

            let vector = embedder.embed(&content)?;
            let model = embedder.model_name().to_string();
            writer.submit(move |conn| {
                detect::attach_embedding(conn, &memory_id, &vector, &model)?;
                Ok(())
            })?;
        }
        JobKind::DetectDuplicates => {
            let threshold = config.duplicates.threshold;
            writer.submit(move |conn| {
                detect::detect_duplicates(conn, &memory_id, threshold)?;
                Ok(())
            })?;
        }
        JobKind::DetectConflicts => {
            writer.submit(move |conn| {
                detect::detect_conflicts(conn, &memory_id)?;
                Ok(())
            })?;
        }
    }
    Ok(())
}

/// Take or keep the singleton worker lease.
///
/// The upsert's predicate only lets a new holder in once the stored lease
/// has expired; zero affected rows with someone else's id in the row means
/// an active lease exists and must not be stolen. A holder that finds its
/// own id falls back to a guarded heartbeat.
pub fn acquire_or_renew_lease(conn: &Connection, worker_id: &str, lease_ttl_ms: i64) -> Result<bool> {
    let now = now_iso();
    let expires_at = iso_after_millis(lease_ttl_ms);
    let rows = conn.execute(
        "INSERT INTO worker_lease (id, worker_id, pid, acquired_at, heartbeat_at, expires_at)
         VALUES (1, ?1, ?2, ?3, ?3, ?4)
         ON CONFLICT(id) DO UPDATE SET
             worker_id = excluded.worker_id,
             pid = excluded.pid,
             acquired_at = excluded.acquired_at,
             heartbeat_at = excluded.heartbeat_at,
             expires_at = excluded.expires_at
         WHERE worker_lease.expires_at < ?3",
        params![worker_id, std::process::id(), now, expires_at],
    )?;
    if rows > 0 {
        return Ok(true);
    }

    // An unexpired lease exists. Heartbeat if it is ours, otherwise back off.
    let rows = conn.execute(
        "UPDATE worker_lease SET heartbeat_at = ?1, expires_at = ?2
         WHERE id = 1 AND worker_id = ?3",
        params![now, expires_at, worker_id],
    )?;
    Ok(rows > 0)
}

/// Expire our own lease immediately (clean shutdown). Guarded on ownership.
pub fn release_lease(conn: &Connection, worker_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE worker_lease SET expires_at = ?1 WHERE id = 1 AND worker_id = ?2",
        params![now_iso(), worker_id],
    )?;
    Ok(rows > 0)
}

/// Requeue `running` jobs whose start time is older than the job timeout.
/// Jobs out of retries are failed instead.
pub fn requeue_stuck_jobs(conn: &Connection, job_timeout_ms: i64) -> Result<usize> {
    let threshold = iso_before_millis(job_timeout_ms);
    let stuck: Vec<(String, u32, u32)> = conn
        .prepare(
            "SELECT id, retry_count, max_retries FROM background_jobs
             WHERE status = 'running' AND started_at < ?1",
        )?
        .query_map(params![threshold], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for (job_id, retry_count, max_retries) in &stuck {
        if retry_count >= max_retries {
            conn.execute(
                "UPDATE background_jobs
                 SET status = 'failed', completed_at = ?1, error = 'job timed out'
                 WHERE id = ?2",
                params![now_iso(), job_id],
            )?;
        } else {
            conn.execute(
                "UPDATE background_jobs
                 SET status = 'pending', retry_count = retry_count + 1, started_at = NULL
                 WHERE id = ?1",
                params![job_id],
            )?;
        }
    }
    Ok(stuck.len())
}

/// Delete terminal jobs past the retention window.
pub fn prune_terminal_jobs(conn: &Connection, retention_days: i64) -> Result<usize> {
    let threshold = iso_before_millis(retention_days.max(0) * 24 * 60 * 60 * 1000);
    let removed = conn.execute(
        "DELETE FROM background_jobs
         WHERE status IN ('completed','failed') AND completed_at IS NOT NULL
           AND completed_at <= ?1",
        params![threshold],
    )?;
    Ok(removed)
}

/// Claim the next pending job: SELECT then conditional UPDATE.
///
/// Not atomic as a pair — safe here because every claim runs on the single
/// writer thread. A port that moves the worker out of process must collapse
/// this into one conditional UPDATE.
pub fn claim_next_job(conn: &Connection) -> Result<Option<Job>> {
    let job_id: Option<String> = conn
        .query_row(
            "SELECT id FROM background_jobs
             WHERE status = 'pending'
             ORDER BY priority DESC, created_at, rowid
             LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()?;
    let Some(job_id) = job_id else {
        return Ok(None);
    };

    conn.execute(
        "UPDATE background_jobs SET status = 'running', started_at = ?1 WHERE id = ?2",
        params![now_iso(), job_id],
    )?;
    let job = conn
        .query_row(
            "SELECT * FROM background_jobs WHERE id = ?1",
            params![job_id],
            |row| Job::from_row(row),
        )
        .optional()?;
    Ok(job)
}

/// Mark a job completed.
pub fn complete_job(conn: &Connection, job_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE background_jobs SET status = 'completed', completed_at = ?1 WHERE id = ?2",
        params![now_iso(), job_id],
    )?;
    Ok(())
}

/// Mark a job failed, recording the error on the row. Background failures
/// never propagate to the caller whose write enqueued the job.
pub fn fail_job(conn: &Connection, job_id: &str, error: &str) -> Result<()> {
    conn.execute(
        "UPDATE background_jobs SET status = 'failed', completed_at = ?1, error = ?2 WHERE id = ?3",
        params![now_iso(), job_id, error],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn lease_admits_one_holder() {
        let conn = db::open_memory_database().unwrap();
        assert!(acquire_or_renew_lease(&conn, "worker-a", 60_000).unwrap());
        assert!(!acquire_or_renew_lease(&conn, "worker-b", 60_000).unwrap());
        // Holder renews freely
        assert!(acquire_or_renew_lease(&conn, "worker-a", 60_000).unwrap());
    }

    #[test]
    fn expired_lease_is_taken_over() {
        let conn = db::open_memory_database().unwrap();
        assert!(acquire_or_renew_lease(&conn, "worker-a", -1000).unwrap());
        assert!(acquire_or_renew_lease(&conn, "worker-b", 60_000).unwrap());
        // The old holder's renewal observes the loss
        assert!(!acquire_or_renew_lease(&conn, "worker-a", 60_000).unwrap());
    }

    #[test]
    fn release_lets_a_successor_in_immediately() {
        let conn = db::open_memory_database().unwrap();
        assert!(acquire_or_renew_lease(&conn, "worker-a", 60_000).unwrap());
        assert!(release_lease(&conn, "worker-a").unwrap());
        assert!(acquire_or_renew_lease(&conn, "worker-b", 60_000).unwrap());
    }

    #[test]
    fn release_requires_ownership() {
        let conn = db::open_memory_database().unwrap();
        assert!(acquire_or_renew_lease(&conn, "worker-a", 60_000).unwrap());
        assert!(!release_lease(&conn, "worker-b").unwrap());
        assert!(!acquire_or_renew_lease(&conn, "worker-b", 60_000).unwrap());
    }

    #[test]
    fn claim_next_job_is_fifo_within_priority() {
        let conn = db::open_memory_database().unwrap();
        conn.execute_batch(
            "INSERT INTO memories (id, content, memory_type, scope_type, source_agent, created_at)
             VALUES ('m1', 'x', 'fact', 'user', 'a', '2026-01-01T00:00:00.000Z');
             INSERT INTO background_jobs (id, job_type, memory_id, status, created_at)
             VALUES ('j1', 'embed_memory', 'm1', 'pending', '2026-01-01T00:00:00.000Z');
             INSERT INTO background_jobs (id, job_type, memory_id, status, created_at)
             VALUES ('j2', 'detect_duplicates', 'm1', 'pending', '2026-01-01T00:00:01.000Z');",
        )
        .unwrap();

        let first = claim_next_job(&conn).unwrap().unwrap();
        assert_eq!(first.id, "j1");
        let second = claim_next_job(&conn).unwrap().unwrap();
        assert_eq!(second.id, "j2");
        assert!(claim_next_job(&conn).unwrap().is_none());
    }

    #[test]
    fn stuck_job_requeues_until_out_of_retries() {
        let conn = db::open_memory_database().unwrap();
        conn.execute_batch(
            "INSERT INTO memories (id, content, memory_type, scope_type, source_agent, created_at)
             VALUES ('m1', 'x', 'fact', 'user', 'a', '2026-01-01T00:00:00.000Z');
             INSERT INTO background_jobs (id, job_type, memory_id, status, created_at, started_at, retry_count, max_retries)
             VALUES ('j1', 'embed_memory', 'm1', 'running', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z', 0, 1);",
        )
        .unwrap();

        assert_eq!(requeue_stuck_jobs(&conn, 1000).unwrap(), 1);
        let (status, retries): (String, u32) = conn
            .query_row(
                "SELECT status, retry_count FROM background_jobs WHERE id = 'j1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "pending");
        assert_eq!(retries, 1);

        // Out of retries now: a second stuck round fails it
        conn.execute(
            "UPDATE background_jobs SET status='running', started_at='2026-01-01T00:00:00.000Z' WHERE id='j1'",
            [],
        )
        .unwrap();
        requeue_stuck_jobs(&conn, 1000).unwrap();
        let status: String = conn
            .query_row("SELECT status FROM background_jobs WHERE id = 'j1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(status, "failed");
    }

    #[test]
    fn terminal_jobs_age_out() {
        let conn = db::open_memory_database().unwrap();
        conn.execute_batch(
            "INSERT INTO memories (id, content, memory_type, scope_type, source_agent, created_at)
             VALUES ('m1', 'x', 'fact', 'user', 'a', '2026-01-01T00:00:00.000Z');
             INSERT INTO background_jobs (id, job_type, memory_id, status, created_at, completed_at)
             VALUES ('old', 'embed_memory', 'm1', 'completed', '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z');",
        )
        .unwrap();

        assert_eq!(prune_terminal_jobs(&conn, 7).unwrap(), 1);
        assert_eq!(prune_terminal_jobs(&conn, 7).unwrap(), 0);
    }
}
