//! Parameter definitions for the memory MCP tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `memory_put` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryPutParams {
    /// The content of the memory.
    #[schemars(description = "The content of the memory")]
    pub content: String,

    /// Slot to write into (e.g. `"owner"`). The writer's previous live entry
    /// on this slot is superseded.
    #[schemars(
        description = "Named slot to write into (e.g. 'owner'). Replaces your own previous entry on the slot."
    )]
    pub slot: Option<String>,

    /// Memory type: `"fact"`, `"preference"`, `"decision"`, `"observation"`,
    /// `"event"`, or `"context"`. Defaults to `"context"`.
    #[schemars(
        description = "Memory type: 'fact', 'preference', 'decision', 'observation', 'event' or 'context'. Defaults to 'context'."
    )]
    pub memory_type: Option<String>,

    /// Scope type: `"user"` (default), `"project"`, `"entity"`, or `"domain"`.
    #[schemars(description = "Scope type: 'user' (default), 'project', 'entity' or 'domain'")]
    pub scope_type: Option<String>,

    /// Scope id; required for every scope type except `"user"`.
    #[schemars(description = "Scope id; required for every scope type except 'user'")]
    pub scope_id: Option<String>,

    /// Id of the agent writing this memory.
    #[schemars(description = "Id of the agent writing this memory. Defaults to 'local'.")]
    pub agent: Option<String>,

    /// Days until the memory expires. `0` expires immediately; defaults to
    /// the configured `memory.default_ttl_days`.
    #[schemars(description = "Days until expiry. 0 expires immediately. Defaults to config.")]
    pub ttl_days: Option<i64>,
}

/// Parameters for the `memory_get` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryGetParams {
    /// Memory id. Takes precedence over `slot`.
    #[schemars(description = "Memory id to fetch")]
    pub id: Option<String>,

    /// Slot to resolve to its latest live memory.
    #[schemars(description = "Slot to resolve to its latest live memory")]
    pub slot: Option<String>,

    /// Scope type for slot resolution. Defaults to `"user"`.
    #[schemars(description = "Scope type for slot lookup; defaults to 'user'")]
    pub scope_type: Option<String>,

    /// Scope id for slot resolution.
    #[schemars(description = "Scope id for slot lookup")]
    pub scope_id: Option<String>,
}

/// Parameters for the `memory_search` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemorySearchParams {
    /// Full-text query over live memory content.
    #[schemars(description = "Full-text query over live memory content")]
    pub query: String,

    /// Maximum number of results. Defaults to 20.
    #[schemars(description = "Maximum number of results. Defaults to 20.")]
    pub limit: Option<usize>,
}

/// Parameters for the `memory_supersede` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemorySupersedeParams {
    /// Id of the memory being replaced.
    #[schemars(description = "Id of the memory being replaced")]
    pub memory_id: String,

    /// Id of the replacement memory.
    #[schemars(description = "Id of the replacement memory")]
    pub superseded_by: String,

    /// Acting agent id.
    #[schemars(description = "Acting agent id. Defaults to 'local'.")]
    pub agent: Option<String>,
}

/// Parameters for the `memory_retract` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryRetractParams {
    /// Id of the memory to retract.
    #[schemars(description = "Id of the memory to retract")]
    pub memory_id: String,

    /// Why the memory is being retracted.
    #[schemars(description = "Why the memory is being retracted")]
    pub reason: Option<String>,

    /// Acting agent id.
    #[schemars(description = "Acting agent id. Defaults to 'local'.")]
    pub agent: Option<String>,
}

/// Parameters for the `memory_prune` MCP tool (none).
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MemoryPruneParams {}
