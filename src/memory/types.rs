//! Core record type definitions.
//!
//! Defines [`MemoryType`] and [`ScopeType`] (the memory addressing model),
//! [`Memory`] (a full record with derived [`MemoryStatus`]), the task queue
//! types, and the conflict/duplicate records produced by the background
//! detector.

use rusqlite::Row;
use serde::{Deserialize, Serialize};

/// Categories a memory can be written as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryType {
    Fact,
    Preference,
    Decision,
    Observation,
    Event,
    Context,
}

impl MemoryType {
    /// SQL-compatible string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fact => "fact",
            Self::Preference => "preference",
            Self::Decision => "decision",
            Self::Observation => "observation",
            Self::Event => "event",
            Self::Context => "context",
        }
    }
}

impl std::fmt::Display for MemoryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MemoryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fact" => Ok(Self::Fact),
            "preference" => Ok(Self::Preference),
            "decision" => Ok(Self::Decision),
            "observation" => Ok(Self::Observation),
            "event" => Ok(Self::Event),
            "context" => Ok(Self::Context),
            _ => Err(format!("unknown memory type: {s}")),
        }
    }
}

/// Outer namespace a slot lives in. `User` scope is the singleton personal
/// namespace and carries no scope id; every other scope type is addressed by
/// a (scope_type, scope_id) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    User,
    Project,
    Entity,
    Domain,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Entity => "entity",
            Self::Domain => "domain",
        }
    }

    pub fn requires_scope_id(&self) -> bool {
        !matches!(self, Self::User)
    }
}

impl std::fmt::Display for ScopeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ScopeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "project" => Ok(Self::Project),
            "entity" => Ok(Self::Entity),
            "domain" => Ok(Self::Domain),
            _ => Err(format!("unknown scope type: {s}")),
        }
    }
}

/// Lifecycle state of a memory, derived from its lifecycle columns.
/// Pruned memories do not appear — TTL prune hard-deletes the row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStatus {
    Live,
    Superseded,
    Retracted,
    Expired,
}

/// A memory record, matching the `memories` table schema.
#[derive(Debug, Clone, Serialize)]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub memory_type: String,
    /// Named addressable location within the scope (e.g. `"owner"`), if any.
    pub slot: Option<String>,
    pub scope_type: String,
    pub scope_id: Option<String>,
    /// Agent that wrote this memory.
    pub source_agent: String,
    pub created_at: String,
    pub expires_at: Option<String>,
    pub superseded_by: Option<String>,
    pub superseded_at: Option<String>,
    pub retracted_at: Option<String>,
    pub retracted_by: Option<String>,
    pub retraction_reason: Option<String>,
    pub status: MemoryStatus,
}

impl Memory {
    /// Build from a `SELECT * FROM memories` row.
    pub fn from_row(row: &Row<'_>, now: &str) -> rusqlite::Result<Self> {
        let expires_at: Option<String> = row.get("expires_at")?;
        let superseded_at: Option<String> = row.get("superseded_at")?;
        let retracted_at: Option<String> = row.get("retracted_at")?;

        let status = if retracted_at.is_some() {
            MemoryStatus::Retracted
        } else if superseded_at.is_some() {
            MemoryStatus::Superseded
        } else if expires_at.as_deref().is_some_and(|e| e <= now) {
            MemoryStatus::Expired
        } else {
            MemoryStatus::Live
        };

        Ok(Self {
            id: row.get("id")?,
            content: row.get("content")?,
            memory_type: row.get("memory_type")?,
            slot: row.get("slot")?,
            scope_type: row.get("scope_type")?,
            scope_id: row.get("scope_id")?,
            source_agent: row.get("source_agent")?,
            created_at: row.get("created_at")?,
            expires_at,
            superseded_by: row.get("superseded_by")?,
            superseded_at,
            retracted_at,
            retracted_by: row.get("retracted_by")?,
            retraction_reason: row.get("retraction_reason")?,
            status,
        })
    }
}

/// Task queue states. A task only moves forward:
/// queued → claimed → running → done | failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Claimed,
    Running,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Claimed => "claimed",
            Self::Running => "running",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "claimed" => Ok(Self::Claimed),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("unknown task status: {s}")),
        }
    }
}

/// A task record, matching the `tasks` table schema.
#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: String,
    pub name: String,
    pub payload: Option<serde_json::Value>,
    pub status: String,
    pub assigned_agent_id: Option<String>,
    pub claimed_at: Option<String>,
    pub lease_expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub output: Option<String>,
    pub error_message: Option<String>,
    pub attempt_number: u32,
}

impl Task {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let payload: Option<String> = row.get("payload")?;
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            payload: payload.and_then(|p| serde_json::from_str(&p).ok()),
            status: row.get("status")?,
            assigned_agent_id: row.get("assigned_agent_id")?,
            claimed_at: row.get("claimed_at")?,
            lease_expires_at: row.get("lease_expires_at")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            completed_at: row.get("completed_at")?,
            output: row.get("output")?,
            error_message: row.get("error_message")?,
            attempt_number: row.get("attempt_number")?,
        })
    }
}

/// Kinds of background jobs enqueued by post-write hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    EmbedMemory,
    DetectDuplicates,
    DetectConflicts,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmbedMemory => "embed_memory",
            Self::DetectDuplicates => "detect_duplicates",
            Self::DetectConflicts => "detect_conflicts",
        }
    }
}

impl std::str::FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "embed_memory" => Ok(Self::EmbedMemory),
            "detect_duplicates" => Ok(Self::DetectDuplicates),
            "detect_conflicts" => Ok(Self::DetectConflicts),
            _ => Err(format!("unknown job type: {s}")),
        }
    }
}

/// A background job row claimed by the worker.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub job_type: String,
    pub memory_id: Option<String>,
    pub retry_count: u32,
    pub max_retries: u32,
}

impl Job {
    pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            memory_id: row.get("memory_id")?,
            retry_count: row.get("retry_count")?,
            max_retries: row.get("max_retries")?,
        })
    }
}

/// An open or resolved semantic conflict over one (slot, scope).
#[derive(Debug, Clone, Serialize)]
pub struct Conflict {
    pub id: String,
    pub slot: String,
    pub scope_type: String,
    pub scope_id: Option<String>,
    pub detected_at: String,
    pub resolved_at: Option<String>,
    pub resolution: Option<String>,
    pub resolved_by: Option<String>,
    /// Ids of the member memories.
    pub members: Vec<String>,
}

/// A near-duplicate pair above the similarity threshold.
#[derive(Debug, Clone, Serialize)]
pub struct Duplicate {
    pub id: String,
    pub similarity: f64,
    pub detected_at: String,
    pub resolved_at: Option<String>,
    pub resolution: Option<String>,
    pub members: Vec<String>,
}
