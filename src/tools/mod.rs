//! MCP tool surface and transactional dispatch.
//!
//! Each tool is statically classified read or write ([`registry`]). Read
//! tools open a per-request reader connection and execute immediately —
//! they never wait on a writer. Write tools wrap their work into a closure
//! and submit it to the write coordinator; the request's blocking-pool
//! thread waits until the coordinator signals completion. Both kinds run
//! under `spawn_blocking` because rusqlite is synchronous.

pub mod memory;
pub mod registry;
pub mod review;
pub mod tasks;

use rmcp::handler::server::tool::Parameters;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::{tool, tool_handler, tool_router, ServerHandler};
use std::future::Future;
use std::sync::Arc;

use crate::db;
use crate::memory::store;
use crate::memory::types::{MemoryType, ScopeType};
use crate::memory::{detect, search};
use crate::server::AppState;
use memory::{
    MemoryGetParams, MemoryPruneParams, MemoryPutParams, MemoryRetractParams,
    MemorySearchParams, MemorySupersedeParams,
};
use review::{
    ConflictResolveParams, ConflictsListParams, DuplicateResolveParams, DuplicatesListParams,
};
use tasks::{
    TaskClaimParams, TaskCreateParams, TaskFinishParams, TaskGetParams, TaskListParams,
    TaskStartParams,
};

const DEFAULT_ACTOR: &str = "local";

/// The Hoard MCP tool handler. Holds the process root state (config, write
/// coordinator, store path) and exposes all MCP tools via the
/// `#[tool_router]` macro.
#[derive(Clone)]
pub struct HoardTools {
    tool_router: ToolRouter<Self>,
    state: Arc<AppState>,
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, String> {
    serde_json::to_string(value).map_err(|e| format!("serialization failed: {e}"))
}

#[tool_router]
impl HoardTools {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            state,
        }
    }

    /// Write a memory into a slot.
    #[tool(description = "Write a memory. Writing to a slot replaces your agent's previous entry on that slot; other agents' entries stay live and are flagged as conflicts by the background detector.")]
    async fn memory_put(
        &self,
        Parameters(params): Parameters<MemoryPutParams>,
    ) -> Result<String, String> {
        let memory_type: MemoryType = params
            .memory_type
            .as_deref()
            .unwrap_or("context")
            .parse()
            .map_err(|e: String| e)?;
        let scope_type: ScopeType = params
            .scope_type
            .as_deref()
            .unwrap_or("user")
            .parse()
            .map_err(|e: String| e)?;
        let agent = params.agent.unwrap_or_else(|| DEFAULT_ACTOR.into());
        let default_ttl = self.state.config.memory.default_ttl_days;

        tracing::info!(
            slot = params.slot.as_deref().unwrap_or("-"),
            agent = %agent,
            content_len = params.content.len(),
            "memory_put called"
        );

        let state = Arc::clone(&self.state);
        let (content, slot, scope_id, ttl_days) =
            (params.content, params.slot, params.scope_id, params.ttl_days);
        let result = tokio::task::spawn_blocking(move || {
            state.writer.submit(move |conn| {
                store::memory_put(
                    conn,
                    &content,
                    memory_type,
                    slot.as_deref(),
                    scope_type,
                    scope_id.as_deref(),
                    &agent,
                    ttl_days,
                    default_ttl,
                )
            })
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("memory_put failed: {e}"))?;

        tracing::info!(id = %result.id, "memory stored");
        to_json(&result)
    }

    /// Fetch a memory by id or resolve a slot.
    #[tool(description = "Fetch a memory by id, or resolve a slot to its latest live memory.")]
    async fn memory_get(
        &self,
        Parameters(params): Parameters<MemoryGetParams>,
    ) -> Result<String, String> {
        let scope_type: ScopeType = params
            .scope_type
            .as_deref()
            .unwrap_or("user")
            .parse()
            .map_err(|e: String| e)?;
        if params.id.is_none() && params.slot.is_none() {
            return Err("either id or slot is required".into());
        }

        let state = Arc::clone(&self.state);
        let (id, slot, scope_id) = (params.id, params.slot, params.scope_id);
        let memory = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = db::open_reader(&state.db_path, state.config.database.busy_timeout_ms)?;
            match (&id, &slot) {
                (Some(id), _) => store::memory_get(&conn, id),
                (None, Some(slot)) => {
                    store::memory_get_by_slot(&conn, slot, scope_type, scope_id.as_deref())
                }
                (None, None) => unreachable!("validated above"),
            }
        })
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| format!("memory_get failed: {e}"))?;

        to_json(&serde_json::json!({ "memory": memory }))
    }

    /// Search memories with full-text queries.
    #[tool(description = "Full-text search over live memories. Returns ranked results.")]
    async fn memory_search(
        &self,
        Parameters(params): Parameters<MemorySearchParams>,
    ) -> Result<String, String> {
        let limit = params.limit.unwrap_or(20);
        let state = Arc::clone(&self.state);
        let query = params.query;
        let hits = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = db::open_reader(&state.db_path, state.config.database.busy_timeout_ms)?;
            search::memory_search(&conn, &query, limit)
        })
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| format!("memory_search failed: {e}"))?;

        let total = hits.len();
        to_json(&serde_json::json!({ "results": hits, "total": total }))
    }

    /// Replace one memory with another.
    #[tool(description = "Mark a memory as superseded by another. A no-op if the target is no longer live.")]
    async fn memory_supersede(
        &self,
        Parameters(params): Parameters<MemorySupersedeParams>,
    ) -> Result<String, String> {
        let actor = params.agent.unwrap_or_else(|| DEFAULT_ACTOR.into());
        let state = Arc::clone(&self.state);
        let (memory_id, superseded_by) = (params.memory_id, params.superseded_by);
        let changed = tokio::task::spawn_blocking(move || {
            state.writer.submit(move |conn| {
                store::memory_supersede(conn, &memory_id, &superseded_by, &actor)
            })
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("memory_supersede failed: {e}"))?;

        to_json(&serde_json::json!({
            "superseded": changed,
            "message": if changed { "memory superseded" } else { "target not live; nothing changed" },
        }))
    }

    /// Retract a live memory.
    #[tool(description = "Retract a live memory. A no-op if the target is no longer live.")]
    async fn memory_retract(
        &self,
        Parameters(params): Parameters<MemoryRetractParams>,
    ) -> Result<String, String> {
        let actor = params.agent.unwrap_or_else(|| DEFAULT_ACTOR.into());
        let state = Arc::clone(&self.state);
        let (memory_id, reason) = (params.memory_id, params.reason);
        let changed = tokio::task::spawn_blocking(move || {
            state.writer.submit(move |conn| {
                store::memory_retract(conn, &memory_id, &actor, reason.as_deref())
            })
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("memory_retract failed: {e}"))?;

        to_json(&serde_json::json!({
            "retracted": changed,
            "message": if changed { "memory retracted" } else { "target not live; nothing changed" },
        }))
    }

    /// Hard-delete expired memories.
    #[tool(description = "Hard-delete memories past their TTL. Idempotent.")]
    async fn memory_prune(
        &self,
        Parameters(_params): Parameters<MemoryPruneParams>,
    ) -> Result<String, String> {
        let state = Arc::clone(&self.state);
        let removed = tokio::task::spawn_blocking(move || {
            state.writer.submit(store::memory_prune)
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("memory_prune failed: {e}"))?;

        to_json(&serde_json::json!({ "pruned": removed }))
    }

    /// Create a queued task.
    #[tool(description = "Create a queued task for any agent to claim.")]
    async fn task_create(
        &self,
        Parameters(params): Parameters<TaskCreateParams>,
    ) -> Result<String, String> {
        let state = Arc::clone(&self.state);
        let (name, payload) = (params.name, params.payload);
        let task = tokio::task::spawn_blocking(move || {
            state
                .writer
                .submit(move |conn| crate::tasks::task_create(conn, &name, payload.as_ref()))
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("task_create failed: {e}"))?;

        to_json(&serde_json::json!({ "task": task }))
    }

    /// Claim a queued task.
    #[tool(description = "Claim a queued task. Exactly one concurrent claimant wins; the rest get claimed=false.")]
    async fn task_claim(
        &self,
        Parameters(params): Parameters<TaskClaimParams>,
    ) -> Result<String, String> {
        let lease_ttl = self.state.config.worker.lease_ttl_ms as i64;
        let state = Arc::clone(&self.state);
        let (task_id, agent_id) = (params.task_id, params.agent_id);
        let task = tokio::task::spawn_blocking(move || {
            state
                .writer
                .submit(move |conn| crate::tasks::task_claim(conn, &task_id, &agent_id, lease_ttl))
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("task_claim failed: {e}"))?;

        to_json(&serde_json::json!({
            "claimed": task.is_some(),
            "task": task,
        }))
    }

    /// Move a claimed task to running.
    #[tool(description = "Move a task you claimed to running.")]
    async fn task_start(
        &self,
        Parameters(params): Parameters<TaskStartParams>,
    ) -> Result<String, String> {
        let state = Arc::clone(&self.state);
        let (task_id, agent_id) = (params.task_id, params.agent_id);
        let started = tokio::task::spawn_blocking(move || {
            state
                .writer
                .submit(move |conn| crate::tasks::task_start(conn, &task_id, &agent_id))
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("task_start failed: {e}"))?;

        to_json(&serde_json::json!({ "started": started }))
    }

    /// Finish a task as done or failed.
    #[tool(description = "Finish a task you own, as done (with output) or failed (with an error message).")]
    async fn task_finish(
        &self,
        Parameters(params): Parameters<TaskFinishParams>,
    ) -> Result<String, String> {
        let state = Arc::clone(&self.state);
        let (task_id, agent_id, success, output, error_message) = (
            params.task_id,
            params.agent_id,
            params.success,
            params.output,
            params.error_message,
        );
        let finished = tokio::task::spawn_blocking(move || {
            state.writer.submit(move |conn| {
                crate::tasks::task_finish(
                    conn,
                    &task_id,
                    &agent_id,
                    success,
                    output.as_deref(),
                    error_message.as_deref(),
                )
            })
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("task_finish failed: {e}"))?;

        to_json(&serde_json::json!({ "finished": finished }))
    }

    /// Fetch a task by id.
    #[tool(description = "Fetch a task by id.")]
    async fn task_get(
        &self,
        Parameters(params): Parameters<TaskGetParams>,
    ) -> Result<String, String> {
        let state = Arc::clone(&self.state);
        let task_id = params.task_id;
        let task = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = db::open_reader(&state.db_path, state.config.database.busy_timeout_ms)?;
            crate::tasks::task_get(&conn, &task_id)
        })
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| format!("task_get failed: {e}"))?;

        to_json(&serde_json::json!({ "task": task }))
    }

    /// List tasks.
    #[tool(description = "List tasks, newest first, optionally filtered by status.")]
    async fn task_list(
        &self,
        Parameters(params): Parameters<TaskListParams>,
    ) -> Result<String, String> {
        let limit = params.limit.unwrap_or(50);
        let state = Arc::clone(&self.state);
        let status = params.status;
        let tasks = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = db::open_reader(&state.db_path, state.config.database.busy_timeout_ms)?;
            crate::tasks::task_list(&conn, status.as_deref(), limit)
        })
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| format!("task_list failed: {e}"))?;

        to_json(&serde_json::json!({ "tasks": tasks }))
    }

    /// List detected memory conflicts.
    #[tool(description = "List semantic conflicts detected between agents' memories.")]
    async fn conflicts_list(
        &self,
        Parameters(params): Parameters<ConflictsListParams>,
    ) -> Result<String, String> {
        let unresolved_only = params.unresolved_only.unwrap_or(true);
        let state = Arc::clone(&self.state);
        let conflicts = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = db::open_reader(&state.db_path, state.config.database.busy_timeout_ms)?;
            detect::conflicts_list(&conn, unresolved_only)
        })
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| format!("conflicts_list failed: {e}"))?;

        to_json(&serde_json::json!({ "conflicts": conflicts }))
    }

    /// Resolve an open conflict.
    #[tool(description = "Close an open conflict with a free-text resolution. No automatic merging.")]
    async fn conflict_resolve(
        &self,
        Parameters(params): Parameters<ConflictResolveParams>,
    ) -> Result<String, String> {
        let resolved_by = params.resolved_by.unwrap_or_else(|| DEFAULT_ACTOR.into());
        let state = Arc::clone(&self.state);
        let (conflict_id, resolution) = (params.conflict_id, params.resolution);
        let resolved = tokio::task::spawn_blocking(move || {
            state.writer.submit(move |conn| {
                detect::conflict_resolve(conn, &conflict_id, &resolution, &resolved_by)
            })
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("conflict_resolve failed: {e}"))?;

        to_json(&serde_json::json!({ "resolved": resolved }))
    }

    /// List detected near-duplicates.
    #[tool(description = "List near-duplicate memory pairs above the similarity threshold.")]
    async fn duplicates_list(
        &self,
        Parameters(params): Parameters<DuplicatesListParams>,
    ) -> Result<String, String> {
        let unresolved_only = params.unresolved_only.unwrap_or(true);
        let state = Arc::clone(&self.state);
        let duplicates = tokio::task::spawn_blocking(move || -> anyhow::Result<_> {
            let conn = db::open_reader(&state.db_path, state.config.database.busy_timeout_ms)?;
            detect::duplicates_list(&conn, unresolved_only)
        })
        .await
        .map_err(|e| format!("read task failed: {e}"))?
        .map_err(|e| format!("duplicates_list failed: {e}"))?;

        to_json(&serde_json::json!({ "duplicates": duplicates }))
    }

    /// Resolve a duplicate record.
    #[tool(description = "Close a duplicate record with a free-text resolution.")]
    async fn duplicate_resolve(
        &self,
        Parameters(params): Parameters<DuplicateResolveParams>,
    ) -> Result<String, String> {
        let state = Arc::clone(&self.state);
        let (duplicate_id, resolution) = (params.duplicate_id, params.resolution);
        let resolved = tokio::task::spawn_blocking(move || {
            state
                .writer
                .submit(move |conn| detect::duplicate_resolve(conn, &duplicate_id, &resolution))
        })
        .await
        .map_err(|e| format!("write task failed: {e}"))?
        .map_err(|e| format!("duplicate_resolve failed: {e}"))?;

        to_json(&serde_json::json!({ "resolved": resolved }))
    }
}

#[cfg(test)]
mod tests {
    use super::registry;

    /// Every tool the router exposes must be classified by the registry —
    /// dispatch routing is only deterministic if the mapping is total.
    #[test]
    fn every_handler_is_classified() {
        let handlers = [
            "memory_put",
            "memory_get",
            "memory_search",
            "memory_supersede",
            "memory_retract",
            "memory_prune",
            "task_create",
            "task_claim",
            "task_start",
            "task_finish",
            "task_get",
            "task_list",
            "conflicts_list",
            "conflict_resolve",
            "duplicates_list",
            "duplicate_resolve",
        ];
        for tool in handlers {
            assert!(
                registry::is_write_tool(tool) || registry::is_read_tool(tool),
                "{tool} is not classified in the registry"
            );
        }
    }
}

#[tool_handler]
impl ServerHandler for HoardTools {
    fn get_info(&self) -> rmcp::model::ServerInfo {
        rmcp::model::ServerInfo {
            instructions: Some(
                "Hoard is a shared data layer for cooperating agents. Use memory_put to \
                 write slot-addressed memories, memory_search/memory_get to read, \
                 task_create/task_claim to coordinate work, and conflicts_list/\
                 conflict_resolve to review collisions between agents."
                    .into(),
            ),
            capabilities: rmcp::model::ServerCapabilities::builder()
                .enable_tools()
                .build(),
            ..Default::default()
        }
    }
}
