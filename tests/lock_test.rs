//! Advisory lock semantics: mutual exclusion, bounded acquisition, the
//! server singleton, and holder diagnostics.

use std::time::{Duration, Instant};

use hoard::db::lock::{DatabaseWriteLock, LockError, ServerSingletonLock, SyncLock};
use tempfile::TempDir;

fn temp_db_path(tmp: &TempDir) -> std::path::PathBuf {
    tmp.path().join("hoard.db")
}

#[test]
fn second_handle_times_out_while_first_holds() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut first = DatabaseWriteLock::new(&db, 200);
    first.acquire().unwrap();

    // A second handle is a distinct open file description, so it contends
    // exactly like another process would.
    let mut second = DatabaseWriteLock::new(&db, 200);
    let err = second.acquire().unwrap_err();
    assert!(matches!(err, LockError::Timeout { .. }));

    first.release();
    second.acquire().unwrap();
    second.release();
}

#[test]
fn blocked_acquirer_proceeds_once_holder_releases() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut first = DatabaseWriteLock::new(&db, 1000);
    first.acquire().unwrap();

    let db2 = db.clone();
    let waiter = std::thread::spawn(move || {
        let mut second = DatabaseWriteLock::new(&db2, 5000);
        let begin = Instant::now();
        second.acquire().unwrap();
        second.release();
        begin.elapsed()
    });

    std::thread::sleep(Duration::from_millis(150));
    first.release();

    let waited = waiter.join().unwrap();
    assert!(
        waited >= Duration::from_millis(100),
        "waiter should have blocked, waited only {waited:?}"
    );
}

#[test]
fn lock_held_intervals_do_not_overlap() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut handles = Vec::new();
    let intervals = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));

    for _ in 0..4 {
        let db = db.clone();
        let intervals = std::sync::Arc::clone(&intervals);
        handles.push(std::thread::spawn(move || {
            let mut lock = DatabaseWriteLock::new(&db, 10_000);
            lock.acquire().unwrap();
            let start = Instant::now();
            std::thread::sleep(Duration::from_millis(30));
            let end = Instant::now();
            lock.release();
            intervals.lock().unwrap().push((start, end));
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    let mut intervals = intervals.lock().unwrap().clone();
    intervals.sort_by_key(|(start, _)| *start);
    for pair in intervals.windows(2) {
        assert!(
            pair[0].1 <= pair[1].0,
            "lock-held intervals overlapped: {pair:?}"
        );
    }
}

#[test]
fn holder_record_contains_pid() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut lock = DatabaseWriteLock::new(&db, 1000);
    lock.acquire().unwrap();

    let contents = std::fs::read_to_string(lock.path()).unwrap();
    let record: serde_json::Value = serde_json::from_str(contents.trim()).unwrap();
    assert_eq!(record["pid"], std::process::id());
    assert!(record["acquired_at"].is_string());

    lock.release();
}

#[test]
fn second_server_is_rejected_with_the_exact_message() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut first = ServerSingletonLock::new(&db);
    first.acquire_or_fail().unwrap();

    let mut second = ServerSingletonLock::new(&db);
    let err = second.acquire_or_fail().unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Another hoard server is already running on this database."));

    first.release();
    second.acquire_or_fail().unwrap();
    second.release();
}

#[test]
fn singleton_and_write_lock_do_not_conflict() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut server = ServerSingletonLock::new(&db);
    server.acquire_or_fail().unwrap();

    // Different lock file: a write can proceed while the server runs.
    let mut write = DatabaseWriteLock::new(&db, 500);
    write.acquire().unwrap();
    write.release();
    server.release();
}

#[test]
fn sync_lock_is_try_only() {
    let tmp = TempDir::new().unwrap();
    let db = temp_db_path(&tmp);

    let mut first = SyncLock::new(&db);
    assert!(first.try_acquire().unwrap());

    let mut second = SyncLock::new(&db);
    assert!(!second.try_acquire().unwrap());

    first.release();
    assert!(second.try_acquire().unwrap());
    second.release();
}
