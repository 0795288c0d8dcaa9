//! Write path — slot-addressed memory writes, supersession, retraction, and
//! TTL pruning.
//!
//! Every function here expects to run inside the write coordinator's (or the
//! CLI helper's) open transaction: statements execute without committing, and
//! callers observe all-or-nothing semantics. Mutations of existing rows are
//! optimistic guards — conditional updates whose affected-row count is the
//! success signal, so a race that another writer already won surfaces as a
//! quiet no-op instead of a lost update or an error.

use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::memory::types::{JobKind, Memory, MemoryType, ScopeType};
use crate::memory::ACTIVE_MEMORY_SQL;
use crate::util::{iso_after_days, new_id, now_iso};

/// Slots are short lowercase identifiers, optionally namespaced with
/// `.`/`:`/`-` separators (e.g. `"owner"`, `"pref:editor.theme"`).
static SLOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_.:-]{0,127}$").expect("valid slot regex"));

/// Result returned from a memory write.
#[derive(Debug, Serialize)]
pub struct MemoryWriteResult {
    pub id: String,
    pub slot: Option<String>,
    pub scope_type: String,
    pub scope_id: Option<String>,
    pub expires_at: String,
    /// Ids of this agent's previous live entries on the same slot that the
    /// write superseded.
    pub superseded: Vec<String>,
}

/// Write a new memory.
///
/// Inserts the row, supersedes the writer's own previous live entry on the
/// same (slot, scope) — keeping at most one live memory per
/// (slot, scope, agent) — records the audit event, and enqueues the
/// post-write jobs (embedding, duplicate detection, conflict detection).
/// The jobs commit atomically with the memory, so the worker can never
/// observe one without the other.
#[allow(clippy::too_many_arguments)]
pub fn memory_put(
    conn: &Connection,
    content: &str,
    memory_type: MemoryType,
    slot: Option<&str>,
    scope_type: ScopeType,
    scope_id: Option<&str>,
    source_agent: &str,
    ttl_days: Option<i64>,
    default_ttl_days: i64,
) -> Result<MemoryWriteResult> {
    if content.is_empty() {
        bail!("memory content must not be empty");
    }
    if source_agent.is_empty() {
        bail!("source_agent must not be empty");
    }
    if let Some(slot) = slot {
        if !SLOT_RE.is_match(slot) {
            bail!("invalid slot: {slot}");
        }
    }
    match (scope_type.requires_scope_id(), scope_id) {
        (true, None) => bail!("scope_id is required for {scope_type} scope"),
        (false, Some(_)) => bail!("scope_id must be empty for user scope"),
        _ => {}
    }

    let ttl = ttl_days.unwrap_or(default_ttl_days);
    if ttl < 0 {
        bail!("ttl_days must not be negative");
    }

    let id = new_id();
    let now = now_iso();
    let expires_at = iso_after_days(ttl);

    conn.execute(
        "INSERT INTO memories (id, content, memory_type, slot, scope_type, scope_id,
                               source_agent, created_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            id,
            content,
            memory_type.as_str(),
            slot,
            scope_type.as_str(),
            scope_id,
            source_agent,
            now,
            expires_at,
        ],
    )?;

    // One live memory per (slot, scope, agent): replace our own prior entry.
    // Other agents' entries on the same slot stay live — those are exactly
    // what the conflict detector is for.
    let superseded = match slot {
        Some(slot) => supersede_own_slot_entries(conn, &id, slot, scope_type, scope_id, source_agent)?,
        None => Vec::new(),
    };

    insert_event(conn, &id, "created", source_agent, None)?;

    enqueue_job(conn, JobKind::EmbedMemory, &id)?;
    enqueue_job(conn, JobKind::DetectDuplicates, &id)?;
    enqueue_job(conn, JobKind::DetectConflicts, &id)?;

    Ok(MemoryWriteResult {
        id,
        slot: slot.map(str::to_string),
        scope_type: scope_type.as_str().to_string(),
        scope_id: scope_id.map(str::to_string),
        expires_at,
        superseded,
    })
}

fn supersede_own_slot_entries(
    conn: &Connection,
    new_id: &str,
    slot: &str,
    scope_type: ScopeType,
    scope_id: Option<&str>,
    source_agent: &str,
) -> Result<Vec<String>> {
    let now = now_iso();
    let sql = format!(
        "SELECT m.id FROM memories m
         WHERE m.slot = ?2 AND m.scope_type = ?3 AND m.scope_id IS ?4
           AND m.source_agent = ?5 AND m.id != ?6 AND {ACTIVE_MEMORY_SQL}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let prior: Vec<String> = stmt
        .query_map(
            params![now, slot, scope_type.as_str(), scope_id, source_agent, new_id],
            |row| row.get(0),
        )?
        .collect::<Result<Vec<_>, _>>()?;

    for old_id in &prior {
        let rows = conn.execute(
            "UPDATE memories SET superseded_by = ?1, superseded_at = ?2
             WHERE id = ?3 AND superseded_at IS NULL AND retracted_at IS NULL",
            params![new_id, now, old_id],
        )?;
        if rows > 0 {
            insert_event(
                conn,
                old_id,
                "superseded",
                source_agent,
                Some(&serde_json::json!({"superseded_by": new_id})),
            )?;
        }
    }

    Ok(prior)
}

/// Fetch a memory by id.
pub fn memory_get(conn: &Connection, memory_id: &str) -> Result<Option<Memory>> {
    let now = now_iso();
    let memory = conn
        .query_row(
            "SELECT * FROM memories WHERE id = ?1",
            params![memory_id],
            |row| Memory::from_row(row, &now),
        )
        .optional()?;
    Ok(memory)
}

/// Fetch the latest live memory for a slot within a scope.
pub fn memory_get_by_slot(
    conn: &Connection,
    slot: &str,
    scope_type: ScopeType,
    scope_id: Option<&str>,
) -> Result<Option<Memory>> {
    let now = now_iso();
    let sql = format!(
        "SELECT * FROM memories m
         WHERE m.slot = ?2 AND m.scope_type = ?3 AND m.scope_id IS ?4 AND {ACTIVE_MEMORY_SQL}
         ORDER BY m.created_at DESC
         LIMIT 1"
    );
    let memory = conn
        .query_row(
            &sql,
            params![now, slot, scope_type.as_str(), scope_id],
            |row| Memory::from_row(row, &now),
        )
        .optional()?;
    Ok(memory)
}

/// Mark `memory_id` as superseded by `superseded_by`.
///
/// Returns `false` if the target is already superseded, retracted, expired,
/// or missing — a normal outcome, not an error. Fails if the successor does
/// not exist or the edge would close a supersession cycle.
pub fn memory_supersede(
    conn: &Connection,
    memory_id: &str,
    superseded_by: &str,
    actor: &str,
) -> Result<bool> {
    if memory_id == superseded_by {
        bail!("a memory cannot supersede itself");
    }
    let successor_exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM memories WHERE id = ?1",
        params![superseded_by],
        |row| row.get(0),
    )?;
    if !successor_exists {
        bail!("superseding memory not found: {superseded_by}");
    }
    if supersession_chain_reaches(conn, superseded_by, memory_id)? {
        bail!("supersession cycle: {superseded_by} is already replaced by {memory_id}");
    }

    let now = now_iso();
    let rows = conn.execute(
        "UPDATE memories SET superseded_by = ?1, superseded_at = ?2
         WHERE id = ?3 AND superseded_at IS NULL AND retracted_at IS NULL
           AND (expires_at IS NULL OR expires_at > ?2)",
        params![superseded_by, now, memory_id],
    )?;
    if rows > 0 {
        insert_event(
            conn,
            memory_id,
            "superseded",
            actor,
            Some(&serde_json::json!({"superseded_by": superseded_by})),
        )?;
    }
    Ok(rows > 0)
}

/// Walk the supersession chain starting at `from`; true if it reaches `target`.
fn supersession_chain_reaches(conn: &Connection, from: &str, target: &str) -> Result<bool> {
    let mut current = from.to_string();
    // Chain length is bounded by the table size; the cap only guards against
    // pre-existing corruption.
    for _ in 0..10_000 {
        let next: Option<String> = conn
            .query_row(
                "SELECT superseded_by FROM memories WHERE id = ?1",
                params![current],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        match next {
            Some(next) if next == target => return Ok(true),
            Some(next) => current = next,
            None => return Ok(false),
        }
    }
    Ok(false)
}

/// Retract a live memory. Returns `false` if it is not live — already
/// retracted, superseded, expired, or missing.
pub fn memory_retract(
    conn: &Connection,
    memory_id: &str,
    actor: &str,
    reason: Option<&str>,
) -> Result<bool> {
    let now = now_iso();
    let rows = conn.execute(
        "UPDATE memories SET retracted_at = ?1, retracted_by = ?2, retraction_reason = ?3
         WHERE id = ?4 AND retracted_at IS NULL AND superseded_at IS NULL
           AND (expires_at IS NULL OR expires_at > ?1)",
        params![now, actor, reason, memory_id],
    )?;
    if rows > 0 {
        insert_event(
            conn,
            memory_id,
            "retracted",
            actor,
            reason.map(|r| serde_json::json!({"reason": r})).as_ref(),
        )?;
    }
    Ok(rows > 0)
}

/// Hard-delete memories past their TTL. The only hard delete in the system;
/// idempotent — a second run finds nothing left to remove.
pub fn memory_prune(conn: &Connection) -> Result<usize> {
    let now = now_iso();
    let removed = conn.execute(
        "DELETE FROM memories WHERE expires_at IS NOT NULL AND expires_at <= ?1",
        params![now],
    )?;
    if removed > 0 {
        tracing::info!(removed, "pruned expired memories");
    }
    Ok(removed)
}

/// Append an entry to the audit trail.
pub(crate) fn insert_event(
    conn: &Connection,
    memory_id: &str,
    event_type: &str,
    actor: &str,
    event_data: Option<&serde_json::Value>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO memory_events (id, memory_id, event_type, event_at, actor, event_data)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            new_id(),
            memory_id,
            event_type,
            now_iso(),
            actor,
            event_data.map(|d| d.to_string()),
        ],
    )?;
    Ok(())
}

/// Enqueue a background job for the leased worker.
pub(crate) fn enqueue_job(conn: &Connection, kind: JobKind, memory_id: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO background_jobs (id, job_type, memory_id, status, created_at)
         VALUES (?1, ?2, ?3, 'pending', ?4)",
        params![new_id(), kind.as_str(), memory_id, now_iso()],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    fn test_db() -> Connection {
        db::open_memory_database().unwrap()
    }

    fn put(conn: &Connection, content: &str, slot: Option<&str>, agent: &str) -> MemoryWriteResult {
        memory_put(
            conn,
            content,
            MemoryType::Context,
            slot,
            ScopeType::User,
            None,
            agent,
            None,
            30,
        )
        .unwrap()
    }

    #[test]
    fn put_then_get_round_trips() {
        let conn = test_db();
        let result = put(&conn, "PRD test memory", Some("prd"), "agent-a");

        let by_id = memory_get(&conn, &result.id).unwrap().unwrap();
        assert_eq!(by_id.content, "PRD test memory");
        assert_eq!(by_id.slot.as_deref(), Some("prd"));

        let by_slot = memory_get_by_slot(&conn, "prd", ScopeType::User, None)
            .unwrap()
            .unwrap();
        assert_eq!(by_slot.id, result.id);
    }

    #[test]
    fn put_enqueues_three_jobs_and_an_event() {
        let conn = test_db();
        let result = put(&conn, "hello", Some("greeting"), "agent-a");

        let jobs: Vec<String> = conn
            .prepare("SELECT job_type FROM background_jobs WHERE memory_id = ?1 ORDER BY job_type")
            .unwrap()
            .query_map(params![result.id], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(
            jobs,
            vec!["detect_conflicts", "detect_duplicates", "embed_memory"]
        );

        let event: String = conn
            .query_row(
                "SELECT event_type FROM memory_events WHERE memory_id = ?1",
                params![result.id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(event, "created");
    }

    #[test]
    fn second_put_supersedes_own_slot_entry() {
        let conn = test_db();
        let first = put(&conn, "Alice", Some("owner"), "agent-a");
        let second = put(&conn, "Alice Cooper", Some("owner"), "agent-a");

        assert_eq!(second.superseded, vec![first.id.clone()]);

        let old = memory_get(&conn, &first.id).unwrap().unwrap();
        assert_eq!(old.superseded_by.as_deref(), Some(second.id.as_str()));

        // The slot resolves to the replacement
        let live = memory_get_by_slot(&conn, "owner", ScopeType::User, None)
            .unwrap()
            .unwrap();
        assert_eq!(live.id, second.id);
    }

    #[test]
    fn same_slot_different_agents_both_stay_live() {
        let conn = test_db();
        let a = put(&conn, "Alice", Some("owner"), "agent-a");
        let b = put(&conn, "Bob", Some("owner"), "agent-b");

        assert!(b.superseded.is_empty());
        let now = now_iso();
        let sql = format!("SELECT COUNT(*) FROM memories m WHERE m.slot = 'owner' AND {ACTIVE_MEMORY_SQL}");
        let live: i64 = conn.query_row(&sql, params![now], |row| row.get(0)).unwrap();
        assert_eq!(live, 2);
        assert!(memory_get(&conn, &a.id).unwrap().unwrap().superseded_by.is_none());
    }

    #[test]
    fn supersede_of_non_live_target_is_a_noop() {
        let conn = test_db();
        let first = put(&conn, "v1", Some("doc"), "agent-a");
        let second = put(&conn, "v2", Some("doc"), "agent-a");
        let third = put(&conn, "other", None, "agent-a");

        // first is already superseded by second
        let changed = memory_supersede(&conn, &first.id, &third.id, "agent-a").unwrap();
        assert!(!changed);

        let row = memory_get(&conn, &first.id).unwrap().unwrap();
        assert_eq!(row.superseded_by.as_deref(), Some(second.id.as_str()));
    }

    #[test]
    fn supersede_missing_successor_fails() {
        let conn = test_db();
        let m = put(&conn, "x", None, "agent-a");
        let result = memory_supersede(&conn, &m.id, "nonexistent-id", "agent-a");
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("superseding memory not found"));
    }

    #[test]
    fn supersession_cycle_is_rejected() {
        let conn = test_db();
        let a = put(&conn, "a", None, "agent-a");
        let b = put(&conn, "b", None, "agent-a");

        assert!(memory_supersede(&conn, &a.id, &b.id, "agent-a").unwrap());
        let result = memory_supersede(&conn, &b.id, &a.id, "agent-a");
        assert!(result.unwrap_err().to_string().contains("cycle"));
    }

    #[test]
    fn retract_guards_on_live_status() {
        let conn = test_db();
        let m = put(&conn, "secret", None, "agent-a");

        assert!(memory_retract(&conn, &m.id, "agent-a", Some("mistake")).unwrap());
        // second retract is a quiet no-op
        assert!(!memory_retract(&conn, &m.id, "agent-a", None).unwrap());

        let row = memory_get(&conn, &m.id).unwrap().unwrap();
        assert_eq!(row.retracted_by.as_deref(), Some("agent-a"));
        assert_eq!(row.retraction_reason.as_deref(), Some("mistake"));
    }

    #[test]
    fn ttl_zero_memory_is_pruned() {
        let conn = test_db();
        let m = memory_put(
            &conn,
            "expire now",
            MemoryType::Context,
            Some("ttl_immediate"),
            ScopeType::User,
            None,
            "agent-a",
            Some(0),
            30,
        )
        .unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = memory_prune(&conn).unwrap();
        assert_eq!(removed, 1);
        assert!(memory_get(&conn, &m.id).unwrap().is_none());
        assert!(memory_get_by_slot(&conn, "ttl_immediate", ScopeType::User, None)
            .unwrap()
            .is_none());
    }

    #[test]
    fn prune_is_idempotent() {
        let conn = test_db();
        memory_put(
            &conn,
            "gone soon",
            MemoryType::Context,
            None,
            ScopeType::User,
            None,
            "agent-a",
            Some(0),
            30,
        )
        .unwrap();
        put(&conn, "stays", Some("keep"), "agent-a");

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(memory_prune(&conn).unwrap(), 1);
        assert_eq!(memory_prune(&conn).unwrap(), 0);

        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn invalid_slot_is_rejected() {
        let conn = test_db();
        let result = memory_put(
            &conn,
            "x",
            MemoryType::Fact,
            Some("Not A Slot!"),
            ScopeType::User,
            None,
            "agent-a",
            None,
            30,
        );
        assert!(result.unwrap_err().to_string().contains("invalid slot"));
    }

    #[test]
    fn project_scope_requires_scope_id() {
        let conn = test_db();
        let result = memory_put(
            &conn,
            "x",
            MemoryType::Fact,
            None,
            ScopeType::Project,
            None,
            "agent-a",
            None,
            30,
        );
        assert!(result.unwrap_err().to_string().contains("scope_id is required"));
    }
}
