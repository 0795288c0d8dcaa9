//! SQLite connection factory, schema, migrations, locks, and the write
//! coordinator.
//!
//! The factory distinguishes **reader** handles (many, per-request, see
//! [`open_reader`]) from the **writer** handle (exactly one, owned by the
//! [`writer::WriteCoordinator`] thread, opened via [`open_database`]). Both
//! kinds point at the same store file; WAL mode lets readers see a committed
//! snapshot while a write transaction is in flight.

pub mod lock;
pub mod migrations;
pub mod schema;
pub mod writer;

use anyhow::{Context, Result};
use rusqlite::Connection;
use std::path::Path;

use crate::config::DatabaseConfig;
use lock::DatabaseWriteLock;

/// Open (or create) the hoard database at the given path, with pragmas
/// applied and schema initialized. This is the writer-grade open: schema
/// init and migrations run here, so any process that obtains a writable
/// handle also guarantees the schema is current.
///
/// Fails with a fatal error if the store cannot be opened or fails its
/// integrity check — a server must not begin serving in that state.
pub fn open_database(path: impl AsRef<Path>, busy_timeout_ms: u64) -> Result<Connection> {
    let path = path.as_ref();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let conn = Connection::open(path).with_context(|| {
        format!(
            "failed to open database at {}. If the file is corrupt, \
             restore from a backup.",
            path.display()
        )
    })?;

    apply_pragmas(&conn, busy_timeout_ms)?;

    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;

    // Quick integrity check after schema init
    let integrity: String = conn.pragma_query_value(None, "quick_check", |row| row.get(0))?;
    if integrity != "ok" {
        anyhow::bail!("database integrity check failed: {integrity}. Restore from a backup.");
    }

    tracing::info!(path = %path.display(), "database initialized");
    Ok(conn)
}

/// Open a read-only-by-convention handle for the scope of one request.
///
/// Readers skip schema init (the serving process already ran it) and never
/// take any lock; WAL guarantees they see the latest committed snapshot.
pub fn open_reader(path: impl AsRef<Path>, busy_timeout_ms: u64) -> Result<Connection> {
    let path = path.as_ref();
    let conn = Connection::open(path)
        .with_context(|| format!("failed to open database at {}", path.display()))?;
    apply_pragmas(&conn, busy_timeout_ms)?;
    Ok(conn)
}

fn apply_pragmas(conn: &Connection, busy_timeout_ms: u64) -> Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    // WAL so readers proceed against a committed snapshot concurrent with a writer
    conn.pragma_update(None, "journal_mode", "WAL")?;
    // fsync at checkpoints rather than every commit
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "busy_timeout", busy_timeout_ms.to_string())?;
    Ok(())
}

/// Run a write closure under the cross-process write lock, on a dedicated
/// short-lived connection, inside one transaction.
///
/// This is the CLI path: commands like `hoard memory put` that bypass a
/// running server serialize against the server's write coordinator through
/// the same `<db>.lock` file. Commits on success, rolls back on error,
/// releases the lock on exit either way.
pub fn write_locked<R>(
    db_path: &Path,
    cfg: &DatabaseConfig,
    f: impl FnOnce(&Connection) -> Result<R>,
) -> Result<R> {
    let mut lock = DatabaseWriteLock::new(db_path, cfg.lock_timeout_ms);
    lock.acquire()?;

    let result = (|| {
        let conn = open_database(db_path, cfg.busy_timeout_ms)?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        match f(&conn) {
            Ok(value) => {
                if !conn.is_autocommit() {
                    conn.execute_batch("COMMIT")?;
                }
                Ok(value)
            }
            Err(err) => {
                if !conn.is_autocommit() {
                    let _ = conn.execute_batch("ROLLBACK");
                }
                Err(err)
            }
        }
    })();

    lock.release();
    result
}

/// Result of a full database health check.
pub struct HealthReport {
    pub schema_version: u32,
    pub integrity_ok: bool,
    pub integrity_details: String,
    pub journal_mode: String,
    pub memory_count: i64,
    pub live_memory_count: i64,
    pub pending_job_count: i64,
    pub open_conflict_count: i64,
    pub task_count: i64,
}

/// Run a comprehensive health check on the database.
pub fn check_database_health(conn: &Connection) -> Result<HealthReport> {
    let schema_version =
        migrations::get_schema_version(conn).context("failed to read schema version")?;

    let integrity_details: String = conn
        .pragma_query_value(None, "integrity_check", |row| row.get(0))
        .context("failed to run integrity check")?;
    let integrity_ok = integrity_details == "ok";

    let journal_mode: String = conn
        .pragma_query_value(None, "journal_mode", |row| row.get(0))
        .context("failed to read journal mode")?;

    let memory_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .unwrap_or(0);

    let now = crate::util::now_iso();
    let live_memory_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM memories
             WHERE superseded_at IS NULL AND retracted_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?1)",
            [&now],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let pending_job_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM background_jobs WHERE status = 'pending'",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let open_conflict_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM memory_conflicts WHERE resolved_at IS NULL",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    let task_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(HealthReport {
        schema_version,
        integrity_ok,
        integrity_details,
        journal_mode,
        memory_count,
        live_memory_count,
        pending_job_count,
        open_conflict_count,
        task_count,
    })
}

/// Open an in-memory database for testing.
#[cfg(test)]
pub fn open_memory_database() -> Result<Connection> {
    let conn = Connection::open_in_memory().context("failed to open in-memory database")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    schema::init_schema(&conn).context("failed to initialize schema")?;
    migrations::run_migrations(&conn).context("failed to run migrations")?;
    Ok(conn)
}
