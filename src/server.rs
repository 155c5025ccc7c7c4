/// Server setup and initialization
///
/// Wires together all components: database, workflow storage, execution
/// ledger, engine, and HTTP routes. Provides the main application factory
/// function for creating the Axum app.

use crate::{
    api::{create_router, AppState},
    config::Config,
    db,
    ledger::ExecutionLedger,
    runtime::{engine::WorkflowEngine, executor::NodeExecutor},
    workflow::storage::WorkflowStorage,
};
use anyhow::Result;
use axum::{routing::get, Router};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Create the main Axum application with all routes
///
/// Opens the database file under the configured data directory and repairs
/// executions left running by a previous process before serving.
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Ensuring data directory exists: {}", config.database.data_dir);
    std::fs::create_dir_all(&config.database.data_dir)
        .map_err(|e| anyhow::anyhow!("Failed to create data directory: {}", e))?;

    let pool = db::connect_file(&config.database.path())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open workflow database: {}", e))?;

    create_app_with_pool(pool, &config).await
}

/// Build the application on an already opened database
pub async fn create_app_with_pool(pool: SqlitePool, config: &Config) -> Result<Router> {
    tracing::info!("📋 Initializing workflow storage and execution ledger");
    let storage = WorkflowStorage::new(pool.clone());
    let ledger = ExecutionLedger::new(pool);

    tracing::info!("⚙️ Initializing node executor (http timeout {:?})", config.engine.http_timeout());
    let executor = Arc::new(NodeExecutor::new(config.engine.http_timeout()));

    tracing::info!("🚀 Initializing workflow engine");
    let engine = Arc::new(WorkflowEngine::new(storage.clone(), ledger, executor));

    let repaired = engine
        .reconcile_interrupted()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to reconcile interrupted executions: {}", e))?;
    if repaired > 0 {
        tracing::info!("🩹 Reconciled {} interrupted executions", repaired);
    }

    let state = AppState {
        storage,
        engine,
        history_limit: config.engine.history_limit,
    };

    tracing::info!("📡 Creating HTTP router with all endpoints");
    let app = Router::new()
        .route("/healthz", get(health_check))
        .merge(create_router(state));

    tracing::info!("✅ Application initialized successfully");

    Ok(app)
}

/// Start the HTTP server with the given configuration
///
/// Creates the application and starts the Axum server on the configured address and port.
pub async fn start_server(config: Config) -> Result<()> {
    // RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .init();

    tracing::info!("Starting Zilliance workflow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", bind_addr, e))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

/// Health check endpoint handler
async fn health_check() -> &'static str {
    "ok"
}
