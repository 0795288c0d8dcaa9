//! End-to-end scenarios: concurrent agents, CLI/server interleaving, the
//! background detector, and TTL pruning.

mod helpers;

use std::sync::{Arc, Barrier};

use helpers::{drain_jobs, put_memory, test_store};
use hoard::db;
use hoard::memory::detect;
use hoard::memory::search::memory_search;
use hoard::memory::store;
use hoard::memory::types::{MemoryType, ScopeType};

#[test]
fn two_agents_writing_distinct_slots_both_commit() {
    let store = test_store();

    let barrier = Arc::new(Barrier::new(2));
    let writes = [("prd", "PRD test memory"), ("roadmap", "Q3 plan")];
    let mut handles = Vec::new();
    for (slot, content) in writes {
        let writer = store.writer.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            writer.submit(move |conn| {
                store::memory_put(
                    conn,
                    content,
                    MemoryType::Context,
                    Some(slot),
                    ScopeType::User,
                    None,
                    "agent-a",
                    None,
                    30,
                )
            })
        }));
    }
    for handle in handles {
        handle.join().unwrap().unwrap();
    }

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let prd = memory_search(&reader, "PRD test", 10).unwrap();
    assert_eq!(prd.len(), 1);
    assert_eq!(prd[0].memory.content, "PRD test memory");

    let roadmap = memory_search(&reader, "Q3 plan", 10).unwrap();
    assert_eq!(roadmap.len(), 1);
    assert_eq!(roadmap[0].memory.content, "Q3 plan");

    store.writer.stop();
}

#[test]
fn same_slot_writes_conflict_and_resolve() {
    let store = test_store();

    let barrier = Arc::new(Barrier::new(2));
    let writes = [("agent-a", "Alice"), ("agent-b", "Bob")];
    let mut handles = Vec::new();
    for (agent, content) in writes {
        let writer = store.writer.clone();
        let barrier = Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            barrier.wait();
            writer.submit(move |conn| {
                store::memory_put(
                    conn,
                    content,
                    MemoryType::Context,
                    Some("owner"),
                    ScopeType::User,
                    None,
                    agent,
                    None,
                    30,
                )
            })
        }));
    }
    let ids: Vec<String> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap().id)
        .collect();

    // Background detection runs after both writes committed
    let processed = drain_jobs(&store);
    assert!(processed >= 6, "expected both writes' jobs to run, got {processed}");

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let conflicts = detect::conflicts_list(&reader, true).unwrap();
    assert_eq!(conflicts.len(), 1, "expected one open conflict");
    let conflict = &conflicts[0];
    assert_eq!(conflict.slot, "owner");
    let mut members = conflict.members.clone();
    members.sort();
    let mut expected = ids.clone();
    expected.sort();
    assert_eq!(members, expected, "conflict must cover both memories");

    // Explicit resolution closes it; nothing was auto-merged.
    let resolved = store
        .writer
        .submit({
            let id = conflict.id.clone();
            move |conn| detect::conflict_resolve(conn, &id, "kept Bob's entry", "user")
        })
        .unwrap();
    assert!(resolved);
    assert!(detect::conflicts_list(&reader, true).unwrap().is_empty());

    store.writer.stop();
}

#[test]
fn cli_writes_interleave_with_server_writes() {
    let store = test_store();

    // Server write before
    put_memory(&store, "before", "server write 1", "server-agent");

    // CLI write path: own connection + cross-process lock + short transaction
    let cli_result = db::write_locked(&store.db_path, &store.config.database, |conn| {
        store::memory_put(
            conn,
            "v",
            MemoryType::Context,
            Some("k"),
            ScopeType::User,
            None,
            "cli",
            None,
            30,
        )
    })
    .unwrap();

    // Server write after
    put_memory(&store, "after", "server write 2", "server-agent");

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let fetched = store::memory_get(&reader, &cli_result.id).unwrap().unwrap();
    assert_eq!(fetched.content, "v");
    assert_eq!(fetched.source_agent, "cli");

    let total: i64 = reader
        .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 3);

    store.writer.stop();
}

#[test]
fn concurrent_cli_and_server_writes_all_commit() {
    let store = test_store();

    let barrier = Arc::new(Barrier::new(2));

    let cli_barrier = Arc::clone(&barrier);
    let cli_db = store.db_path.clone();
    let cli_cfg = store.config.database.clone();
    let cli = std::thread::spawn(move || {
        cli_barrier.wait();
        for i in 0..5 {
            db::write_locked(&cli_db, &cli_cfg, |conn| {
                store::memory_put(
                    conn,
                    &format!("cli write {i}"),
                    MemoryType::Context,
                    None,
                    ScopeType::User,
                    None,
                    "cli",
                    None,
                    30,
                )
            })
            .unwrap();
        }
    });

    let srv_barrier = Arc::clone(&barrier);
    let writer = store.writer.clone();
    let server = std::thread::spawn(move || {
        srv_barrier.wait();
        for i in 0..5 {
            writer
                .submit(move |conn| {
                    store::memory_put(
                        conn,
                        &format!("server write {i}"),
                        MemoryType::Context,
                        None,
                        ScopeType::User,
                        None,
                        "server-agent",
                        None,
                        30,
                    )
                })
                .unwrap();
        }
    });

    cli.join().unwrap();
    server.join().unwrap();

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let total: i64 = reader
        .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .unwrap();
    assert_eq!(total, 10, "a write was lost between CLI and server paths");

    store.writer.stop();
}

#[test]
fn ttl_zero_memory_is_gone_after_prune() {
    let store = test_store();

    let id = store
        .writer
        .submit(|conn| {
            store::memory_put(
                conn,
                "expire now",
                MemoryType::Context,
                Some("ttl_immediate"),
                ScopeType::User,
                None,
                "agent-a",
                Some(0),
                30,
            )
        })
        .unwrap()
        .id;

    std::thread::sleep(std::time::Duration::from_millis(5));

    // Prune through the CLI path, as `hoard memory prune` would
    let removed = db::write_locked(&store.db_path, &store.config.database, store::memory_prune)
        .unwrap();
    assert_eq!(removed, 1);

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    assert!(store::memory_get(&reader, &id).unwrap().is_none());
    assert!(
        store::memory_get_by_slot(&reader, "ttl_immediate", ScopeType::User, None)
            .unwrap()
            .is_none()
    );

    // Pruning again changes nothing
    let removed = db::write_locked(&store.db_path, &store.config.database, store::memory_prune)
        .unwrap();
    assert_eq!(removed, 0);

    store.writer.stop();
}

#[test]
fn duplicate_content_is_flagged_after_detection() {
    let store = test_store();

    put_memory(&store, "note_a", "the quarterly report is due friday", "agent-a");
    put_memory(&store, "note_b", "the quarterly report is due friday", "agent-b");
    drain_jobs(&store);

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    let duplicates = detect::duplicates_list(&reader, true).unwrap();
    assert_eq!(duplicates.len(), 1);
    assert!(duplicates[0].similarity >= store.config.duplicates.threshold);

    store.writer.stop();
}

#[test]
fn unrelated_content_is_not_flagged() {
    let store = test_store();

    put_memory(&store, "note_a", "sourdough starter feeding schedule", "agent-a");
    put_memory(&store, "note_b", "kubernetes ingress timeout settings", "agent-b");
    drain_jobs(&store);

    let reader = db::open_reader(&store.db_path, store.config.database.busy_timeout_ms).unwrap();
    assert!(detect::duplicates_list(&reader, true).unwrap().is_empty());

    store.writer.stop();
}
