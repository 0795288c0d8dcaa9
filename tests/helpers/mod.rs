#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use hoard::config::HoardConfig;
use hoard::db::writer::WriteCoordinator;
use hoard::embedding::{EmbeddingProvider, HashEmbedder};
use hoard::memory::store;
use hoard::memory::types::{MemoryType, ScopeType};
use tempfile::TempDir;

/// A temp-dir store with a running write coordinator and test-friendly
/// timeouts. Dropping the TempDir deletes the store, so keep it alive for
/// the duration of the test.
pub struct TestStore {
    pub tmp: TempDir,
    pub db_path: PathBuf,
    pub config: HoardConfig,
    pub writer: WriteCoordinator,
    pub embedder: Arc<dyn EmbeddingProvider>,
}

pub fn test_store() -> TestStore {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("hoard.db");

    let mut config = HoardConfig::default();
    config.storage.db_path = db_path.to_string_lossy().into_owned();
    config.database.lock_timeout_ms = 5000;
    config.database.retry_budget_ms = 5000;
    config.worker.poll_interval_ms = 20;

    let writer = WriteCoordinator::start(&db_path, &config.database).unwrap();
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbedder::new(64));

    TestStore {
        tmp,
        db_path,
        config,
        writer,
        embedder,
    }
}

/// Write a user-scoped context memory through the coordinator.
pub fn put_memory(store: &TestStore, slot: &str, content: &str, agent: &str) -> String {
    let (slot, content, agent) = (slot.to_string(), content.to_string(), agent.to_string());
    store
        .writer
        .submit(move |conn| {
            store::memory_put(
                conn,
                &content,
                MemoryType::Context,
                Some(&slot),
                ScopeType::User,
                None,
                &agent,
                None,
                30,
            )
        })
        .unwrap()
        .id
}

/// Run every pending background job to completion.
pub fn drain_jobs(store: &TestStore) -> usize {
    hoard::worker::drain_pending_jobs(
        &store.db_path,
        &store.writer,
        store.embedder.as_ref(),
        &store.config,
    )
    .unwrap()
}
