//! Read path — full-text search and listings over live memories.
//!
//! Runs on per-request reader connections; never takes a lock.

use anyhow::Result;
use rusqlite::{params, Connection};
use serde::Serialize;

use crate::memory::types::Memory;
use crate::memory::ACTIVE_MEMORY_SQL;
use crate::util::now_iso;

/// A search hit with its BM25-derived relevance score (higher is better).
#[derive(Debug, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub memory: Memory,
    pub score: f64,
}

/// Full-text search over live memory content.
pub fn memory_search(conn: &Connection, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
    if query.trim().is_empty() {
        return Ok(Vec::new());
    }

    let now = now_iso();
    let sql = format!(
        "SELECT m.*, bm25(memories_fts) AS bm25_score
         FROM memories_fts
         JOIN memories m ON memories_fts.rowid = m.rowid
         WHERE memories_fts MATCH ?2 AND {ACTIVE_MEMORY_SQL}
         ORDER BY bm25(memories_fts)
         LIMIT ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let hits = stmt
        .query_map(params![now, fts_escape(query), limit as i64], |row| {
            let memory = Memory::from_row(row, &now)?;
            let bm25: f64 = row.get("bm25_score")?;
            // bm25() returns lower-is-better; flip it for callers
            Ok(SearchHit {
                memory,
                score: 1.0 / (1.0 + bm25.max(0.0)),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(hits)
}

/// Quote each term so user queries cannot hit FTS5 operator syntax errors.
fn fts_escape(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::memory::store::{memory_put, memory_retract};
    use crate::memory::types::{MemoryType, ScopeType};

    fn put(conn: &Connection, content: &str, slot: Option<&str>) -> String {
        memory_put(
            conn,
            content,
            MemoryType::Context,
            slot,
            ScopeType::User,
            None,
            "agent-a",
            None,
            30,
        )
        .unwrap()
        .id
    }

    #[test]
    fn search_finds_matching_live_memory() {
        let conn = db::open_memory_database().unwrap();
        let id = put(&conn, "PRD test memory", Some("prd"));
        put(&conn, "Q3 plan", Some("roadmap"));

        let hits = memory_search(&conn, "PRD test", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].memory.id, id);
        assert!(hits[0].score > 0.0);
    }

    #[test]
    fn retracted_memory_leaves_the_index() {
        let conn = db::open_memory_database().unwrap();
        let id = put(&conn, "ephemeral quantum notes", None);

        assert_eq!(memory_search(&conn, "quantum", 10).unwrap().len(), 1);
        memory_retract(&conn, &id, "agent-a", None).unwrap();
        assert!(memory_search(&conn, "quantum", 10).unwrap().is_empty());
    }

    #[test]
    fn operator_characters_are_escaped() {
        let conn = db::open_memory_database().unwrap();
        put(&conn, "plain content", None);
        // Must not return an FTS syntax error
        let hits = memory_search(&conn, "plain AND (content", 10);
        assert!(hits.is_ok());
    }
}
