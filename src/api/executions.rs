/// Workflow execution REST API endpoints
///
/// Runs are executed synchronously from the caller's point of view, but each
/// one lives on its own tokio task so a dropped connection never abandons a
/// half-written execution record.

use crate::{
    api::{workflows::AppState, ApiError},
    ledger::{ExecutionDetail, WorkflowExecution},
    runtime::engine::ExecutionOutcome,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// Upper bound on a single history page
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Request body for a manual run
#[derive(Debug, Default, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub input: Value,
    pub triggered_by: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

/// Create execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(execute_workflow))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/executions/{id}/cancel", post(cancel_execution))
}

/// Execute a workflow and wait for the result
///
/// POST /api/workflows/{id}/execute
/// Body (optional): { "input": {...}, "triggered_by": "..." }
async fn execute_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: String,
) -> Result<Json<ExecutionOutcome>, ApiError> {
    tracing::info!("📥 Execution requested for workflow: {}", id);

    let request: ExecuteRequest = if body.trim().is_empty() {
        ExecuteRequest::default()
    } else {
        serde_json::from_str(&body).map_err(|e| {
            tracing::warn!("❌ Invalid execution request for {}: {}", id, e);
            ApiError::new(StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
        })?
    };

    let engine = state.engine.clone();
    let run = tokio::spawn(async move {
        engine
            .execute_workflow(&id, request.input, request.triggered_by.as_deref())
            .await
    });

    let outcome = run
        .await
        .map_err(|e| ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("execution task failed: {e}")))??;

    Ok(Json(outcome))
}

/// Recent runs of a workflow, newest first
///
/// GET /api/workflows/{id}/executions?limit=N
async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.history_limit)
        .clamp(1, MAX_HISTORY_LIMIT);
    let executions: Vec<WorkflowExecution> = state.engine.get_execution_history(&id, limit).await?;
    Ok(Json(json!({ "executions": executions })))
}

/// A run with its node logs
///
/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecutionDetail>, ApiError> {
    Ok(Json(state.engine.get_execution_details(&id).await?))
}

/// Signal a live run to stop
///
/// POST /api/executions/{id}/cancel
async fn cancel_execution(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if state.engine.cancel_execution(&id).await {
        Ok((
            StatusCode::ACCEPTED,
            Json(json!({ "execution_id": id, "message": "Cancellation requested" })),
        ))
    } else {
        Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("no running execution: {id}"),
        ))
    }
}
