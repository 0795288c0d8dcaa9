//! MCP server initialization for stdio and HTTP transports.
//!
//! Provides [`serve_stdio`] and [`serve_http`] entry points that acquire the
//! server singleton lock, start the write coordinator and background worker,
//! and wire the MCP tool handler into a running server.

use crate::config::HoardConfig;
use crate::db::lock::ServerSingletonLock;
use crate::db::writer::WriteCoordinator;
use crate::embedding;
use crate::tools::HoardTools;
use crate::worker::Worker;
use anyhow::Result;
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;

/// Process-wide root state, initialized at server start and passed by shared
/// reference into every request handler.
pub struct AppState {
    pub config: HoardConfig,
    pub db_path: PathBuf,
    pub writer: WriteCoordinator,
}

/// Everything a running server owns: root state plus the singletons torn
/// down at shutdown. The singleton lock is held for the struct's lifetime.
pub struct ServerGuard {
    pub state: Arc<AppState>,
    worker: Worker,
    singleton: ServerSingletonLock,
}

impl ServerGuard {
    pub fn shutdown(mut self) {
        // Worker first (it submits to the writer), then the writer, then the
        // singleton lock.
        self.worker.stop();
        self.state.writer.stop();
        self.singleton.release();
        tracing::info!("server state torn down");
    }
}

/// Shared setup: singleton lock, writer thread (which opens and migrates the
/// database), embedding provider, background worker.
fn setup_server(config: HoardConfig) -> Result<ServerGuard> {
    let db_path = config.resolved_db_path();

    let mut singleton = ServerSingletonLock::new(&db_path);
    singleton.acquire_or_fail()?;

    let writer = WriteCoordinator::start(&db_path, &config.database)?;
    tracing::info!(db = %db_path.display(), "database ready, write coordinator running");

    let provider = embedding::create_provider(&config.embedding)?;
    let embedder: Arc<dyn embedding::EmbeddingProvider> = Arc::from(provider);

    let worker = Worker::start(
        db_path.clone(),
        config.clone(),
        writer.clone(),
        Arc::clone(&embedder),
    );

    let state = Arc::new(AppState {
        config,
        db_path,
        writer,
    });

    Ok(ServerGuard {
        state,
        worker,
        singleton,
    })
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: HoardConfig) -> Result<()> {
    tracing::info!("starting hoard MCP server on stdio");

    let guard = setup_server(config)?;

    let tools = HoardTools::new(Arc::clone(&guard.state));
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running — waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    guard.shutdown();
    Ok(())
}

/// Start the MCP server over streamable HTTP.
pub async fn serve_http(config: HoardConfig) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let bind_addr = format!("{host}:{port}");

    tracing::info!(addr = %bind_addr, "starting hoard MCP server on HTTP");

    let guard = setup_server(config)?;

    let state = Arc::clone(&guard.state);
    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(HoardTools::new(Arc::clone(&state))),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to listen for ctrl-c");
            tracing::info!("shutting down HTTP server");
        })
        .await?;

    guard.shutdown();
    Ok(())
}
