//! Parameter definitions for the conflict/duplicate review MCP tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `conflicts_list` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConflictsListParams {
    /// Only unresolved conflicts when `true` (default).
    #[schemars(description = "Only unresolved conflicts when true (default)")]
    pub unresolved_only: Option<bool>,
}

/// Parameters for the `conflict_resolve` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ConflictResolveParams {
    /// Id of the open conflict.
    #[schemars(description = "Id of the open conflict")]
    pub conflict_id: String,

    /// Free-text description of how it was resolved.
    #[schemars(description = "Free-text description of how it was resolved")]
    pub resolution: String,

    /// Resolving actor.
    #[schemars(description = "Resolving actor. Defaults to 'local'.")]
    pub resolved_by: Option<String>,
}

/// Parameters for the `duplicates_list` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DuplicatesListParams {
    /// Only unresolved duplicates when `true` (default).
    #[schemars(description = "Only unresolved duplicates when true (default)")]
    pub unresolved_only: Option<bool>,
}

/// Parameters for the `duplicate_resolve` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DuplicateResolveParams {
    /// Id of the duplicate record.
    #[schemars(description = "Id of the duplicate record")]
    pub duplicate_id: String,

    /// Free-text description of how it was resolved.
    #[schemars(description = "Free-text description of how it was resolved")]
    pub resolution: String,
}
