mod cli;
mod config;
mod db;
mod embedding;
mod memory;
mod server;
mod tasks;
mod tools;
mod util;
mod worker;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::db::lock::LockError;

#[derive(Parser)]
#[command(name = "hoard", version, about = "Personal data layer for AI agents over MCP")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the MCP server (stdio transport by default)
    Serve {
        /// Serve over streamable HTTP instead of stdio
        #[arg(long)]
        http: bool,
    },
    /// Read and write memories directly, without a server
    Memory {
        #[command(subcommand)]
        action: MemoryAction,
    },
    /// Database administration
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
    /// Run database and lock diagnostics
    Doctor,
}

#[derive(Subcommand)]
enum MemoryAction {
    /// Write a memory into a slot
    Put {
        slot: String,
        content: String,
        /// Agent id recorded as the writer
        #[arg(long, default_value = "cli")]
        agent: String,
        /// Days until expiry (0 expires immediately)
        #[arg(long)]
        ttl_days: Option<i64>,
    },
    /// Resolve a slot to its latest live memory
    Get { slot: String },
    /// Full-text search over live memories
    Search {
        query: String,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Hard-delete memories past their TTL
    Prune,
}

#[derive(Subcommand)]
enum DbAction {
    /// Apply pending schema migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        // The singleton-conflict message must reach the user verbatim.
        if let Some(LockError::AlreadyRunning) = err.downcast_ref::<LockError>() {
            eprintln!("{err}");
        } else {
            eprintln!("Error: {err:#}");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load config (for log level)
    let config = config::HoardConfig::load()?;

    // Initialize tracing with the configured log level.
    // Log to stderr so stdout stays clean for MCP JSON-RPC.
    let filter = EnvFilter::try_new(&config.server.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve { http } => {
            if http {
                server::serve_http(config).await?;
            } else {
                server::serve_stdio(config).await?;
            }
        }
        Command::Memory { action } => match action {
            MemoryAction::Put {
                slot,
                content,
                agent,
                ttl_days,
            } => cli::memory_put(&config, &slot, &content, &agent, ttl_days)?,
            MemoryAction::Get { slot } => cli::memory_get(&config, &slot)?,
            MemoryAction::Search { query, limit } => {
                cli::memory_search(&config, &query, limit)?
            }
            MemoryAction::Prune => cli::memory_prune(&config)?,
        },
        Command::Db { action } => match action {
            DbAction::Migrate => cli::db_migrate(&config)?,
        },
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
