//! CLI `doctor` command — run database and lock diagnostics and print a
//! health report.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::HoardConfig;
use crate::db;
use crate::db::lock::{DatabaseWriteLock, ServerSingletonLock};

/// Run diagnostics and print a health report.
pub fn doctor(config: &HoardConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `hoard serve` or `hoard memory put` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);

    let conn = db::open_database(&db_path, config.database.busy_timeout_ms)
        .context("failed to open database (may be corrupt)")?;

    let report = db::check_database_health(&conn).context("failed to run health check")?;

    println!("Hoard Health Report");
    println!("===================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!("Journal mode:      {}", report.journal_mode);
    if !report.journal_mode.eq_ignore_ascii_case("wal") {
        println!("  WARNING: WAL mode is off — readers will block on writers.");
    }
    println!();
    println!("Row counts:");
    println!("  Memories:        {} ({} live)", report.memory_count, report.live_memory_count);
    println!("  Pending jobs:    {}", report.pending_job_count);
    println!("  Open conflicts:  {}", report.open_conflict_count);
    println!("  Tasks:           {}", report.task_count);
    println!();

    check_write_lock(&db_path, config);
    check_server_singleton(&db_path);
    println!();

    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Stop all hoard processes.");
        println!("  2. Restore from a backup: cp backup.db {}", db_path.display());
    }

    Ok(())
}

/// Probe the advisory write lock: a quick acquire/release round trip proves
/// the lock file is usable, and flags database paths where flock may not
/// actually exclude (network mounts).
fn check_write_lock(db_path: &Path, config: &HoardConfig) {
    let mut lock = DatabaseWriteLock::new(db_path, config.database.lock_timeout_ms.min(2000));
    match lock.acquire() {
        Ok(()) => {
            lock.release();
            println!("Write lock:        OK ({})", lock.path().display());
        }
        Err(err) => {
            println!("Write lock:        BUSY or unavailable ({err})");
            println!("  A server or CLI write may be in progress — usually fine.");
        }
    }

    if looks_network_mounted(db_path) {
        println!(
            "  WARNING: {} looks network-mounted. Advisory file locks may \
             silently fail to exclude on network filesystems; keep the \
             database on a local disk.",
            db_path.display()
        );
    }
}

/// Report whether a server currently holds the singleton lock.
fn check_server_singleton(db_path: &Path) {
    let mut singleton = ServerSingletonLock::new(db_path);
    match singleton.acquire_or_fail() {
        Ok(()) => {
            singleton.release();
            println!("Server:            not running");
        }
        Err(_) => println!(
            "Server:            running (holds {})",
            singleton.path().display()
        ),
    }
}

/// Best-effort heuristic; there is no portable API for "is this NFS".
fn looks_network_mounted(path: &Path) -> bool {
    let s = path.to_string_lossy();
    s.starts_with("//") || s.starts_with("\\\\") || s.contains("/nfs/") || s.contains("/mnt/net")
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}
