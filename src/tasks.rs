//! Task queue for agent orchestration.
//!
//! Claiming is the canonical optimistic guard: N agents race on one queued
//! task, the conditional UPDATE's affected-row count picks exactly one
//! winner, and the losers get a clean "not claimed" outcome. Claims carry a
//! lease so a crashed claimant's task can be requeued.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use crate::memory::types::{Task, TaskStatus};
use crate::util::{iso_after_millis, new_id, now_iso};

/// Create a queued task. `payload` is an opaque JSON value handed to the
/// eventual claimant.
pub fn task_create(
    conn: &Connection,
    name: &str,
    payload: Option<&serde_json::Value>,
) -> Result<Task> {
    if name.is_empty() {
        bail!("task name must not be empty");
    }
    let id = format!("tsk-{}", new_id());
    let now = now_iso();
    conn.execute(
        "INSERT INTO tasks (id, name, payload, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'queued', ?4, ?4)",
        params![id, name, payload.map(|p| p.to_string()), now],
    )?;
    Ok(task_get(conn, &id)?.expect("task row just inserted"))
}

/// Attempt to claim a queued task for `agent_id`.
///
/// A single conditional UPDATE: zero affected rows means another agent won
/// (or the task is gone), and `None` is returned. On success the task is
/// `claimed` with a lease of `lease_ttl_ms`.
pub fn task_claim(
    conn: &Connection,
    task_id: &str,
    agent_id: &str,
    lease_ttl_ms: i64,
) -> Result<Option<Task>> {
    if task_id.is_empty() || agent_id.is_empty() {
        bail!("task_id and agent_id are required");
    }
    let now = now_iso();
    let rows = conn.execute(
        "UPDATE tasks
         SET status = 'claimed', assigned_agent_id = ?1, claimed_at = ?2,
             lease_expires_at = ?3, updated_at = ?2,
             attempt_number = attempt_number + 1
         WHERE id = ?4
           AND status = 'queued'
           AND (assigned_agent_id IS NULL OR assigned_agent_id = ?1)",
        params![agent_id, now, iso_after_millis(lease_ttl_ms), task_id],
    )?;
    if rows == 0 {
        return Ok(None);
    }
    task_get(conn, task_id)
}

/// Renew a claimant's lease on a non-terminal task it owns. Zero affected
/// rows means the lease was lost (or the task finished) — stop working on it.
pub fn task_renew_lease(
    conn: &Connection,
    task_id: &str,
    agent_id: &str,
    lease_ttl_ms: i64,
) -> Result<bool> {
    let now = now_iso();
    let rows = conn.execute(
        "UPDATE tasks SET lease_expires_at = ?1, updated_at = ?2
         WHERE id = ?3 AND assigned_agent_id = ?4 AND status IN ('claimed','running')",
        params![iso_after_millis(lease_ttl_ms), now, task_id, agent_id],
    )?;
    Ok(rows > 0)
}

/// Move a claimed task to `running`. Guarded on ownership and status.
pub fn task_start(conn: &Connection, task_id: &str, agent_id: &str) -> Result<bool> {
    let now = now_iso();
    let rows = conn.execute(
        "UPDATE tasks SET status = 'running', updated_at = ?1
         WHERE id = ?2 AND assigned_agent_id = ?3 AND status = 'claimed'",
        params![now, task_id, agent_id],
    )?;
    Ok(rows > 0)
}

/// Finish a task the agent owns, as `done` (with output) or `failed` (with
/// an error message). Returns `false` if the agent does not own a
/// claimed/running task with this id.
pub fn task_finish(
    conn: &Connection,
    task_id: &str,
    agent_id: &str,
    success: bool,
    output: Option<&str>,
    error_message: Option<&str>,
) -> Result<bool> {
    let now = now_iso();
    let status = if success {
        TaskStatus::Done
    } else {
        TaskStatus::Failed
    };
    let rows = conn.execute(
        "UPDATE tasks
         SET status = ?1, completed_at = ?2, updated_at = ?2, output = ?3, error_message = ?4
         WHERE id = ?5 AND assigned_agent_id = ?6 AND status IN ('claimed','running')",
        params![status.as_str(), now, output, error_message, task_id, agent_id],
    )?;
    Ok(rows > 0)
}

/// Requeue claimed/running tasks whose lease has lapsed. The claimant
/// crashed or stalled; give the task back to the pool.
pub fn requeue_expired_tasks(conn: &Connection) -> Result<usize> {
    let now = now_iso();
    let rows = conn.execute(
        "UPDATE tasks
         SET status = 'queued', assigned_agent_id = NULL, claimed_at = NULL,
             lease_expires_at = NULL, updated_at = ?1
         WHERE status IN ('claimed','running')
           AND lease_expires_at IS NOT NULL AND lease_expires_at < ?1",
        params![now],
    )?;
    if rows > 0 {
        tracing::info!(requeued = rows, "requeued tasks with expired leases");
    }
    Ok(rows)
}

/// Fetch a task by id.
pub fn task_get(conn: &Connection, task_id: &str) -> Result<Option<Task>> {
    let task = conn
        .query_row("SELECT * FROM tasks WHERE id = ?1", params![task_id], |row| {
            Task::from_row(row)
        })
        .optional()?;
    Ok(task)
}

/// List tasks, newest first, optionally filtered by status.
pub fn task_list(conn: &Connection, status: Option<&str>, limit: usize) -> Result<Vec<Task>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM tasks
         WHERE (?1 IS NULL OR status = ?1)
         ORDER BY created_at DESC
         LIMIT ?2",
    )?;
    let tasks = stmt
        .query_map(params![status, limit as i64], |row| Task::from_row(row))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(tasks)
}
