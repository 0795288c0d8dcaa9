//! Parameter definitions for the task MCP tools.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Parameters for the `task_create` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskCreateParams {
    /// Short human-readable task name.
    #[schemars(description = "Short human-readable task name")]
    pub name: String,

    /// Opaque JSON payload handed to the claimant.
    #[schemars(description = "Opaque JSON payload handed to the claimant")]
    pub payload: Option<serde_json::Value>,
}

/// Parameters for the `task_claim` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskClaimParams {
    /// Id of the queued task to claim.
    #[schemars(description = "Id of the queued task to claim")]
    pub task_id: String,

    /// Claiming agent id.
    #[schemars(description = "Claiming agent id")]
    pub agent_id: String,
}

/// Parameters for the `task_start` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskStartParams {
    /// Id of the claimed task.
    #[schemars(description = "Id of the claimed task")]
    pub task_id: String,

    /// Agent that claimed the task.
    #[schemars(description = "Agent that claimed the task")]
    pub agent_id: String,
}

/// Parameters for the `task_finish` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskFinishParams {
    /// Id of the claimed or running task.
    #[schemars(description = "Id of the claimed or running task")]
    pub task_id: String,

    /// Agent that owns the task.
    #[schemars(description = "Agent that owns the task")]
    pub agent_id: String,

    /// `true` to finish as done, `false` to finish as failed.
    #[schemars(description = "true finishes as done, false as failed")]
    pub success: bool,

    /// Output summary (done).
    #[schemars(description = "Output summary when finishing as done")]
    pub output: Option<String>,

    /// Error message (failed).
    #[schemars(description = "Error message when finishing as failed")]
    pub error_message: Option<String>,
}

/// Parameters for the `task_get` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskGetParams {
    /// Task id.
    #[schemars(description = "Task id")]
    pub task_id: String,
}

/// Parameters for the `task_list` MCP tool.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct TaskListParams {
    /// Filter by status (`queued`, `claimed`, `running`, `done`, `failed`).
    #[schemars(description = "Filter by status: queued, claimed, running, done or failed")]
    pub status: Option<String>,

    /// Maximum number of results. Defaults to 50.
    #[schemars(description = "Maximum number of results. Defaults to 50.")]
    pub limit: Option<usize>,
}
