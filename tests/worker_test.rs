//! Background worker end-to-end: the polling loop drains jobs under its
//! lease, and detection output appears without blocking the write path.

mod helpers;

use std::sync::Arc;
use std::time::{Duration, Instant};

use helpers::{put_memory, test_store};
use hoard::db;
use hoard::memory::detect;
use hoard::worker::Worker;

/// Poll until the job queue is empty (all terminal) or the deadline passes.
fn wait_for_queue_drain(store: &helpers::TestStore, timeout: Duration) -> bool {
    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        let outstanding: i64 = reader
            .query_row(
                "SELECT COUNT(*) FROM background_jobs WHERE status IN ('pending','running')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        if outstanding == 0 {
            return true;
        }
        std::thread::sleep(Duration::from_millis(25));
    }
    false
}

#[test]
fn worker_loop_processes_jobs_in_the_background() {
    let store = test_store();

    let mut worker = Worker::start(
        store.db_path.clone(),
        store.config.clone(),
        store.writer.clone(),
        Arc::clone(&store.embedder),
    );

    let id = put_memory(&store, "owner", "Alice", "agent-a");
    put_memory(&store, "owner", "Bob", "agent-b");

    assert!(
        wait_for_queue_drain(&store, Duration::from_secs(10)),
        "worker did not drain the queue"
    );

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();

    // Embeddings attached
    let embedded: i64 = reader
        .query_row("SELECT COUNT(*) FROM memory_embeddings", [], |row| row.get(0))
        .unwrap();
    assert_eq!(embedded, 2);

    // Conflict detected across the two agents
    let conflicts = detect::conflicts_list(&reader, true).unwrap();
    assert_eq!(conflicts.len(), 1);
    assert!(conflicts[0].members.contains(&id));

    worker.stop();

    // Clean shutdown released the lease: a successor acquires immediately
    let acquired = store
        .writer
        .submit(|conn| hoard::worker::acquire_or_renew_lease(conn, "successor", 60_000))
        .unwrap();
    assert!(acquired, "stopped worker should have released its lease");

    store.writer.stop();
}

#[test]
fn completed_jobs_are_marked_terminal() {
    let store = test_store();

    put_memory(&store, "slot_x", "some content", "agent-a");
    let processed = helpers::drain_jobs(&store);
    assert_eq!(processed, 3);

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let completed: i64 = reader
        .query_row(
            "SELECT COUNT(*) FROM background_jobs WHERE status = 'completed'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(completed, 3);

    store.writer.stop();
}

#[test]
fn job_failure_is_recorded_not_propagated() {
    let store = test_store();

    // A job targeting a memory that no longer exists exercises the failure
    // path without any real fault injection: unknown kinds fail cleanly too.
    store
        .writer
        .submit(|conn| {
            conn.execute(
                "INSERT INTO background_jobs (id, job_type, memory_id, status, created_at)
                 VALUES ('j-bad', 'reticulate_splines', NULL, 'pending', ?1)",
                [hoard::util::now_iso()],
            )?;
            Ok(())
        })
        .unwrap();

    let processed = helpers::drain_jobs(&store);
    assert_eq!(processed, 1);

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let (status, error): (String, Option<String>) = reader
        .query_row(
            "SELECT status, error FROM background_jobs WHERE id = 'j-bad'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(status, "failed");
    assert!(error.unwrap().contains("unknown job type"));

    store.writer.stop();
}
