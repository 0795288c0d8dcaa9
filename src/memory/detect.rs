//! Asynchronous conflict and duplicate detection, plus embedding attachment.
//!
//! These functions are the bodies of the background jobs enqueued by
//! [`super::store::memory_put`]. They run under the write coordinator like
//! any other write, but *after* the triggering write has committed — the
//! detector's cost never blocks the hot write path, and its output is
//! advisory: conflicts and duplicates are recorded for explicit resolution,
//! never auto-merged.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};

use crate::memory::store::insert_event;
use crate::memory::types::{Conflict, Duplicate};
use crate::memory::{bytes_to_embedding, cosine_similarity, embedding_to_bytes, ACTIVE_MEMORY_SQL};
use crate::util::{new_id, now_iso};

/// Attach a computed embedding to a memory, replacing any previous vector.
///
/// The upsert is guarded by the memory's existence: if the row was pruned
/// between compute and attach, this reports `false` instead of resurrecting
/// state.
pub fn attach_embedding(
    conn: &Connection,
    memory_id: &str,
    vector: &[f32],
    model_name: &str,
) -> Result<bool> {
    let exists: bool = conn.query_row(
        "SELECT COUNT(*) > 0 FROM memories WHERE id = ?1",
        params![memory_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Ok(false);
    }

    let rows = conn.execute(
        "INSERT INTO memory_embeddings (memory_id, embedding, model_name, dimensions, embedded_at)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(memory_id) DO UPDATE SET
             embedding = excluded.embedding,
             model_name = excluded.model_name,
             dimensions = excluded.dimensions,
             embedded_at = excluded.embedded_at",
        params![
            memory_id,
            embedding_to_bytes(vector),
            model_name,
            vector.len() as i64,
            now_iso(),
        ],
    )?;
    if rows > 0 {
        insert_event(conn, memory_id, "embedding_added", "worker", None)?;
    }
    Ok(rows > 0)
}

/// Compare the target memory's embedding against every other live embedded
/// memory and record pairs whose cosine similarity meets `threshold`.
///
/// Pairs already recorded in an unresolved duplicate are skipped. Returns
/// the number of new duplicate records. A target without an embedding (the
/// embed job failed or has not run) detects nothing.
pub fn detect_duplicates(conn: &Connection, memory_id: &str, threshold: f64) -> Result<usize> {
    let Some(target) = load_embedding(conn, memory_id)? else {
        return Ok(0);
    };

    let now = now_iso();
    let sql = format!(
        "SELECT e.memory_id, e.embedding
         FROM memory_embeddings e
         JOIN memories m ON m.id = e.memory_id
         WHERE e.memory_id != ?2 AND {ACTIVE_MEMORY_SQL}"
    );
    let mut stmt = conn.prepare(&sql)?;
    let candidates: Vec<(String, Vec<u8>)> = stmt
        .query_map(params![now, memory_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut recorded = 0;
    for (other_id, blob) in candidates {
        let Some(other) = bytes_to_embedding(&blob) else {
            continue;
        };
        let similarity = cosine_similarity(&target, &other);
        if similarity < threshold {
            continue;
        }
        if open_duplicate_exists(conn, memory_id, &other_id)? {
            continue;
        }

        let duplicate_id = new_id();
        conn.execute(
            "INSERT INTO memory_duplicates (id, similarity, detected_at) VALUES (?1, ?2, ?3)",
            params![duplicate_id, similarity, now_iso()],
        )?;
        for member in [memory_id, other_id.as_str()] {
            conn.execute(
                "INSERT INTO duplicate_members (duplicate_id, memory_id) VALUES (?1, ?2)",
                params![duplicate_id, member],
            )?;
        }
        tracing::debug!(memory = memory_id, other = %other_id, similarity, "duplicate recorded");
        recorded += 1;
    }
    Ok(recorded)
}

fn load_embedding(conn: &Connection, memory_id: &str) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM memory_embeddings WHERE memory_id = ?1",
            params![memory_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(blob.and_then(|b| bytes_to_embedding(&b)))
}

fn open_duplicate_exists(conn: &Connection, a: &str, b: &str) -> Result<bool> {
    let found: bool = conn.query_row(
        "SELECT COUNT(*) > 0
         FROM memory_duplicates d
         JOIN duplicate_members ma ON ma.duplicate_id = d.id AND ma.memory_id = ?1
         JOIN duplicate_members mb ON mb.duplicate_id = d.id AND mb.memory_id = ?2
         WHERE d.resolved_at IS NULL",
        params![a, b],
        |row| row.get(0),
    )?;
    Ok(found)
}

/// Detect a semantic conflict on the target memory's (slot, scope): live
/// memories addressed to the same slot but owned by different agents.
///
/// Maintains at most one open conflict per (slot, scope). Members that have
/// left `live` since the last run are dropped from the open conflict here;
/// the conflict itself stays open until explicitly resolved. Returns the
/// open conflict's id when the slot is (still) contested.
pub fn detect_conflicts(conn: &Connection, memory_id: &str) -> Result<Option<String>> {
    let target: Option<(Option<String>, String, Option<String>)> = conn
        .query_row(
            "SELECT slot, scope_type, scope_id FROM memories WHERE id = ?1",
            params![memory_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    // Unslotted or pruned memories cannot conflict
    let Some((Some(slot), scope_type, scope_id)) = target else {
        return Ok(None);
    };

    let now = now_iso();
    let sql = format!(
        "SELECT m.id, m.source_agent FROM memories m
         WHERE m.slot = ?2 AND m.scope_type = ?3 AND m.scope_id IS ?4 AND {ACTIVE_MEMORY_SQL}
         ORDER BY m.created_at"
    );
    let mut stmt = conn.prepare(&sql)?;
    let live_members: Vec<(String, String)> = stmt
        .query_map(params![now, slot, scope_type, scope_id], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let open_conflict: Option<String> = conn
        .query_row(
            "SELECT id FROM memory_conflicts
             WHERE slot = ?1 AND scope_type = ?2 AND scope_id IS ?3 AND resolved_at IS NULL",
            params![slot, scope_type, scope_id],
            |row| row.get(0),
        )
        .optional()?;

    // Membership is defined only over live memories: drop the rest now.
    if let Some(conflict_id) = &open_conflict {
        let live_ids: Vec<&str> = live_members.iter().map(|(id, _)| id.as_str()).collect();
        prune_conflict_members(conn, conflict_id, &live_ids)?;
    }

    let distinct_agents = {
        let mut agents: Vec<&str> = live_members.iter().map(|(_, a)| a.as_str()).collect();
        agents.sort_unstable();
        agents.dedup();
        agents.len()
    };
    if live_members.len() < 2 || distinct_agents < 2 {
        return Ok(open_conflict);
    }

    let conflict_id = match open_conflict {
        Some(id) => id,
        None => {
            let id = new_id();
            conn.execute(
                "INSERT INTO memory_conflicts (id, slot, scope_type, scope_id, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, slot, scope_type, scope_id, now_iso()],
            )?;
            tracing::info!(slot = %slot, conflict = %id, "conflict detected");
            id
        }
    };

    for (member_id, _) in &live_members {
        let added = conn.execute(
            "INSERT OR IGNORE INTO conflict_members (conflict_id, memory_id, added_at)
             VALUES (?1, ?2, ?3)",
            params![conflict_id, member_id, now_iso()],
        )?;
        if added > 0 {
            insert_event(
                conn,
                member_id,
                "conflict_detected",
                "worker",
                Some(&serde_json::json!({"conflict_id": conflict_id})),
            )?;
        }
    }

    Ok(Some(conflict_id))
}

fn prune_conflict_members(
    conn: &Connection,
    conflict_id: &str,
    live_ids: &[&str],
) -> Result<()> {
    let current: Vec<String> = conn
        .prepare("SELECT memory_id FROM conflict_members WHERE conflict_id = ?1")?
        .query_map(params![conflict_id], |row| row.get(0))?
        .collect::<Result<Vec<_>, _>>()?;
    for member in current {
        if !live_ids.contains(&member.as_str()) {
            conn.execute(
                "DELETE FROM conflict_members WHERE conflict_id = ?1 AND memory_id = ?2",
                params![conflict_id, member],
            )?;
        }
    }
    Ok(())
}

/// List conflicts, optionally only unresolved ones, newest first.
pub fn conflicts_list(conn: &Connection, unresolved_only: bool) -> Result<Vec<Conflict>> {
    let sql = if unresolved_only {
        "SELECT * FROM memory_conflicts WHERE resolved_at IS NULL ORDER BY detected_at DESC"
    } else {
        "SELECT * FROM memory_conflicts ORDER BY detected_at DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let mut conflicts = stmt
        .query_map([], |row| {
            Ok(Conflict {
                id: row.get("id")?,
                slot: row.get("slot")?,
                scope_type: row.get("scope_type")?,
                scope_id: row.get("scope_id")?,
                detected_at: row.get("detected_at")?,
                resolved_at: row.get("resolved_at")?,
                resolution: row.get("resolution")?,
                resolved_by: row.get("resolved_by")?,
                members: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for conflict in &mut conflicts {
        conflict.members = conn
            .prepare("SELECT memory_id FROM conflict_members WHERE conflict_id = ?1 ORDER BY added_at")?
            .query_map(params![conflict.id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(conflicts)
}

/// Close an open conflict. Returns `false` if it is already resolved or
/// missing.
pub fn conflict_resolve(
    conn: &Connection,
    conflict_id: &str,
    resolution: &str,
    resolved_by: &str,
) -> Result<bool> {
    let now = now_iso();
    let rows = conn.execute(
        "UPDATE memory_conflicts SET resolved_at = ?1, resolution = ?2, resolved_by = ?3
         WHERE id = ?4 AND resolved_at IS NULL",
        params![now, resolution, resolved_by, conflict_id],
    )?;
    if rows > 0 {
        let members: Vec<String> = conn
            .prepare("SELECT memory_id FROM conflict_members WHERE conflict_id = ?1")?
            .query_map(params![conflict_id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        for member in members {
            insert_event(
                conn,
                &member,
                "conflict_resolved",
                resolved_by,
                Some(&serde_json::json!({"conflict_id": conflict_id, "resolution": resolution})),
            )?;
        }
    }
    Ok(rows > 0)
}

/// List duplicate pairs, optionally only unresolved ones, newest first.
pub fn duplicates_list(conn: &Connection, unresolved_only: bool) -> Result<Vec<Duplicate>> {
    let sql = if unresolved_only {
        "SELECT * FROM memory_duplicates WHERE resolved_at IS NULL ORDER BY detected_at DESC"
    } else {
        "SELECT * FROM memory_duplicates ORDER BY detected_at DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let mut duplicates = stmt
        .query_map([], |row| {
            Ok(Duplicate {
                id: row.get("id")?,
                similarity: row.get("similarity")?,
                detected_at: row.get("detected_at")?,
                resolved_at: row.get("resolved_at")?,
                resolution: row.get("resolution")?,
                members: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    for duplicate in &mut duplicates {
        duplicate.members = conn
            .prepare("SELECT memory_id FROM duplicate_members WHERE duplicate_id = ?1")?
            .query_map(params![duplicate.id], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
    }
    Ok(duplicates)
}

/// Close a duplicate record. Returns `false` if already resolved or missing.
pub fn duplicate_resolve(conn: &Connection, duplicate_id: &str, resolution: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE memory_duplicates SET resolved_at = ?1, resolution = ?2
         WHERE id = ?3 AND resolved_at IS NULL",
        params![now_iso(), resolution, duplicate_id],
    )?;
    Ok(rows > 0)
}
