//! Administrative CLI commands that run against the store directly, without
//! a server.
//!
//! Write commands go through [`db::write_locked`]: a dedicated connection
//! plus the cross-process write lock for the lifetime of one short
//! transaction, so they serialize cleanly against a concurrently running
//! server's write coordinator. Read commands open a plain reader connection.

pub mod doctor;

use anyhow::Result;

use crate::config::HoardConfig;
use crate::db;
use crate::memory::search;
use crate::memory::store;
use crate::memory::types::{MemoryType, ScopeType};

/// `hoard memory put <slot> <content>`
pub fn memory_put(
    config: &HoardConfig,
    slot: &str,
    content: &str,
    agent: &str,
    ttl_days: Option<i64>,
) -> Result<()> {
    let db_path = config.resolved_db_path();
    let default_ttl = config.memory.default_ttl_days;

    let result = db::write_locked(&db_path, &config.database, |conn| {
        store::memory_put(
            conn,
            content,
            MemoryType::Context,
            Some(slot),
            ScopeType::User,
            None,
            agent,
            ttl_days,
            default_ttl,
        )
    })?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// `hoard memory get <slot>`
pub fn memory_get(config: &HoardConfig, slot: &str) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_reader(&db_path, config.database.busy_timeout_ms)?;

    match store::memory_get_by_slot(&conn, slot, ScopeType::User, None)? {
        Some(memory) => println!("{}", serde_json::to_string_pretty(&memory)?),
        None => println!("not found"),
    }
    Ok(())
}

/// `hoard memory search <query>`
pub fn memory_search(config: &HoardConfig, query: &str, limit: usize) -> Result<()> {
    let db_path = config.resolved_db_path();
    let conn = db::open_reader(&db_path, config.database.busy_timeout_ms)?;

    let hits = search::memory_search(&conn, query, limit)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({ "results": hits }))?
    );
    Ok(())
}

/// `hoard memory prune`
pub fn memory_prune(config: &HoardConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    let removed = db::write_locked(&db_path, &config.database, store::memory_prune)?;
    println!("Pruned {removed} expired memory entries.");
    Ok(())
}

/// `hoard db migrate` — bring the schema up to date under the write lock.
pub fn db_migrate(config: &HoardConfig) -> Result<()> {
    let db_path = config.resolved_db_path();
    // open_database runs schema init + migrations; holding the write lock
    // keeps a concurrent server's writer out while DDL executes.
    let version = db::write_locked(&db_path, &config.database, |conn| {
        Ok(db::migrations::get_schema_version(conn)?)
    })?;
    println!("Schema is at version {version}.");
    Ok(())
}
