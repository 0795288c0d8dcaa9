//! SQL DDL for all Hoard tables.
//!
//! Defines the `memories` table (plus FTS5 index and lifecycle triggers),
//! the event/audit trail, embeddings, the background job queue, the worker
//! lease singleton, the task queue, conflict/duplicate records, and
//! `schema_meta`. All DDL uses `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

/// All schema DDL statements for Hoard's core tables.
const SCHEMA_SQL: &str = r#"
-- Core memory storage. Lifecycle is encoded in columns: a row is live when
-- it is neither superseded nor retracted nor past its expiry; TTL prune is
-- the only hard delete.
CREATE TABLE IF NOT EXISTS memories (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    memory_type TEXT NOT NULL,
    slot TEXT,
    scope_type TEXT NOT NULL,
    scope_id TEXT,
    source_agent TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT,
    superseded_by TEXT REFERENCES memories(id) ON DELETE SET NULL,
    superseded_at TEXT,
    retracted_at TEXT,
    retracted_by TEXT,
    retraction_reason TEXT,
    CHECK (memory_type IN ('fact','preference','decision','observation','event','context')),
    CHECK (scope_type IN ('user','project','entity','domain')),
    CHECK ((scope_type = 'user' AND scope_id IS NULL) OR (scope_type != 'user' AND scope_id IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_memories_active ON memories(scope_type, scope_id)
    WHERE retracted_at IS NULL AND superseded_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_memories_slot ON memories(slot, scope_type, scope_id)
    WHERE slot IS NOT NULL AND retracted_at IS NULL AND superseded_at IS NULL;
CREATE INDEX IF NOT EXISTS idx_memories_agent ON memories(source_agent);
CREATE INDEX IF NOT EXISTS idx_memories_created ON memories(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_memories_expires ON memories(expires_at)
    WHERE expires_at IS NOT NULL AND retracted_at IS NULL;

-- Audit trail
CREATE TABLE IF NOT EXISTS memory_events (
    id TEXT PRIMARY KEY,
    memory_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    event_at TEXT NOT NULL,
    actor TEXT NOT NULL,
    event_data TEXT,
    CHECK (event_type IN (
        'created','superseded','retracted',
        'conflict_detected','conflict_resolved',
        'embedding_added'
    ))
);
CREATE INDEX IF NOT EXISTS idx_events_by_memory ON memory_events(memory_id, event_at);

-- Embeddings: little-endian f32 blobs, attached asynchronously by the worker
CREATE TABLE IF NOT EXISTS memory_embeddings (
    memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    model_name TEXT NOT NULL,
    dimensions INTEGER NOT NULL CHECK (dimensions > 0),
    embedded_at TEXT NOT NULL,
    CHECK (length(embedding) = dimensions * 4)
);

-- Background job queue, drained by the leased worker
CREATE TABLE IF NOT EXISTS background_jobs (
    id TEXT PRIMARY KEY,
    job_type TEXT NOT NULL,
    memory_id TEXT REFERENCES memories(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending',
    priority INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    error TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    CHECK (status IN ('pending','running','completed','failed'))
);
CREATE INDEX IF NOT EXISTS idx_jobs_pending
    ON background_jobs(status, priority DESC, created_at)
    WHERE status = 'pending';
CREATE INDEX IF NOT EXISTS idx_jobs_running
    ON background_jobs(status, started_at)
    WHERE status = 'running';

-- Worker lease: the singleton row whose non-expired holder may drain jobs
CREATE TABLE IF NOT EXISTS worker_lease (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    worker_id TEXT NOT NULL,
    pid INTEGER NOT NULL,
    acquired_at TEXT NOT NULL,
    heartbeat_at TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Task queue for agent orchestration
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    payload TEXT,
    status TEXT NOT NULL DEFAULT 'queued',
    assigned_agent_id TEXT,
    claimed_at TEXT,
    lease_expires_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT,
    output TEXT,
    error_message TEXT,
    attempt_number INTEGER NOT NULL DEFAULT 0,
    CHECK (status IN ('queued','claimed','running','done','failed')),
    CHECK (status NOT IN ('claimed','running') OR assigned_agent_id IS NOT NULL)
);
CREATE INDEX IF NOT EXISTS idx_tasks_queued
    ON tasks(status, created_at) WHERE status = 'queued';

-- Semantic conflicts: live memories on the same slot/scope from different agents
CREATE TABLE IF NOT EXISTS memory_conflicts (
    id TEXT PRIMARY KEY,
    slot TEXT NOT NULL,
    scope_type TEXT NOT NULL,
    scope_id TEXT,
    detected_at TEXT NOT NULL,
    resolved_at TEXT,
    resolution TEXT,
    resolved_by TEXT
);

CREATE TABLE IF NOT EXISTS conflict_members (
    conflict_id TEXT NOT NULL REFERENCES memory_conflicts(id) ON DELETE CASCADE,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    added_at TEXT NOT NULL,
    PRIMARY KEY (conflict_id, memory_id)
);
CREATE INDEX IF NOT EXISTS idx_conflict_members_by_memory ON conflict_members(memory_id);

-- Near-duplicate pairs above the similarity threshold
CREATE TABLE IF NOT EXISTS memory_duplicates (
    id TEXT PRIMARY KEY,
    similarity REAL NOT NULL CHECK (similarity >= 0 AND similarity <= 1),
    detected_at TEXT NOT NULL,
    resolved_at TEXT,
    resolution TEXT
);

CREATE TABLE IF NOT EXISTS duplicate_members (
    duplicate_id TEXT NOT NULL REFERENCES memory_duplicates(id) ON DELETE CASCADE,
    memory_id TEXT NOT NULL REFERENCES memories(id) ON DELETE CASCADE,
    PRIMARY KEY (duplicate_id, memory_id)
);
CREATE INDEX IF NOT EXISTS idx_duplicate_members_by_memory ON duplicate_members(memory_id);

-- Schema metadata
CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Full-text search over memory content (BM25)
CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts USING fts5(
    content,
    content='memories',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memories_fts_ai AFTER INSERT ON memories BEGIN
    INSERT INTO memories_fts(rowid, content) VALUES (NEW.rowid, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_ad AFTER DELETE ON memories BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content)
    VALUES('delete', OLD.rowid, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_retract AFTER UPDATE OF retracted_at ON memories
WHEN NEW.retracted_at IS NOT NULL AND OLD.retracted_at IS NULL BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content)
    VALUES('delete', OLD.rowid, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS memories_fts_supersede AFTER UPDATE OF superseded_at ON memories
WHEN NEW.superseded_at IS NOT NULL AND OLD.superseded_at IS NULL BEGIN
    INSERT INTO memories_fts(memories_fts, rowid, content)
    VALUES('delete', OLD.rowid, OLD.content);
END;
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    // Set initial schema version if not already present
    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}
