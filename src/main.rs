/// Zilliance workflow engine server
///
/// Main entry point. Loads configuration from the environment and starts
/// the HTTP server with workflow management and execution endpoints.

use zilliance_workflow::{config::Config, server::start_server};

/// Application entry point
///
/// The server provides:
/// - Workflow management API at /api/workflows/*
/// - Execution, history and cancellation at /api/workflows/{id}/execute and /api/executions/*
/// - Health check at /healthz
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::default();

    start_server(config).await?;

    Ok(())
}
