//! Shared memory and task coordination for AI agents — persistent, multi-agent,
//! corruption-free, via MCP.
//!
//! Hoard is an [MCP](https://modelcontextprotocol.io/) server that gives a set of
//! cooperating agents one local data layer: slot-addressed memories, a task queue,
//! and asynchronous conflict/duplicate detection — all backed by a single SQLite
//! file that may be written to concurrently by the server, the CLI, and a
//! background worker without lost updates or deadlocks.
//!
//! # Architecture
//!
//! - **Storage**: SQLite in WAL mode. Readers run on per-request connections and
//!   never block on writers; all writes funnel through one writer thread.
//! - **Write coordination**: three independent layers, each solving one axis of
//!   concurrency:
//!   1. the [`db::writer::WriteCoordinator`] — an in-process FIFO single-writer
//!      thread owning the only writable connection;
//!   2. the [`db::lock::DatabaseWriteLock`] — a cross-process advisory `flock`
//!      on `<db>.lock`, held for the duration of each write transaction;
//!   3. row-level optimistic guards — conditional updates whose affected-row
//!      count decides races that serialize cleanly but still collide in meaning
//!      (task claiming, lease renewal, supersession).
//! - **Background work**: a leased singleton worker drains a persistent job
//!   queue (embedding, duplicate detection, conflict detection) enqueued by
//!   post-write hooks.
//! - **Transport**: MCP over stdio (primary) or streamable HTTP.
//!
//! # Modules
//!
//! - [`config`] — Configuration loading from TOML files and environment variables
//! - [`db`] — Connection factory, schema, migrations, advisory locks, and the
//!   write coordinator
//! - [`embedding`] — Text-to-vector embedding seam used by the background worker
//! - [`memory`] — Memory write path, search, and the conflict/duplicate detector
//! - [`tasks`] — Task queue with optimistic claim semantics
//! - [`worker`] — Leased background job worker

pub mod config;
pub mod db;
pub mod embedding;
pub mod memory;
pub mod tasks;
pub mod util;
pub mod worker;
