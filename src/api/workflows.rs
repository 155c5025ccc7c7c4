/// Workflow management REST API endpoints
///
/// Provides CRUD operations for workflow definitions. Graphs are validated
/// before they are stored so structural errors surface at save time.

use crate::{
    api::ApiError,
    runtime::{engine::WorkflowEngine, scheduler::ExecutionPlan},
    workflow::{storage::WorkflowStorage, types::Workflow},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    /// Workflow storage for persistence
    pub storage: WorkflowStorage,
    /// Engine running workflows and answering execution queries
    pub engine: Arc<WorkflowEngine>,
    /// Default page size for execution history
    pub history_limit: i64,
}

/// Response for workflow creation/update operations
#[derive(Debug, Serialize)]
pub struct WorkflowResponse {
    pub id: String,
    pub message: String,
}

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub workflow: Workflow,
}

/// Create workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", get(list_workflows).post(create_workflow))
        .route(
            "/api/workflows/{id}",
            get(get_workflow).put(update_workflow).delete(delete_workflow),
        )
}

/// Reject graphs the scheduler could never run
fn validate(workflow: &Workflow) -> Result<(), ApiError> {
    if workflow.id.is_empty() || workflow.name.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "workflow id and name are required"));
    }
    ExecutionPlan::build(&workflow.nodes)
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;
    Ok(())
}

/// Create a new workflow
///
/// POST /api/workflows
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...] } }
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<WorkflowResponse>), ApiError> {
    let workflow = payload.workflow;
    validate(&workflow)?;

    if state.storage.get_workflow(&workflow.id).await?.is_some() {
        return Err(ApiError::new(
            StatusCode::CONFLICT,
            format!("workflow already exists: {}", workflow.id),
        ));
    }

    state.storage.save_workflow(&workflow).await?;
    tracing::info!("🔥 Created workflow: {} ({})", workflow.id, workflow.name);

    Ok((
        StatusCode::CREATED,
        Json(WorkflowResponse {
            id: workflow.id.clone(),
            message: format!("Workflow '{}' created successfully", workflow.name),
        }),
    ))
}

/// List all workflows
///
/// GET /api/workflows
/// Returns: { "workflows": [{ "id": "...", "name": "...", "run_count": 0, ... }] }
async fn list_workflows(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let workflows = state.storage.list_workflows().await?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// Get a specific workflow by ID
///
/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Workflow>, ApiError> {
    state
        .storage
        .get_workflow(&id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::new(StatusCode::NOT_FOUND, format!("workflow not found: {id}")))
}

/// Update an existing workflow
///
/// PUT /api/workflows/{id}
/// Body: { "workflow": { "id": "...", "name": "...", "nodes": [...] } }
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<Json<WorkflowResponse>, ApiError> {
    let mut workflow = payload.workflow;

    // URL id wins over the body
    workflow.id = id.clone();
    validate(&workflow)?;

    if state.storage.get_workflow(&id).await?.is_none() {
        return Err(ApiError::new(StatusCode::NOT_FOUND, format!("workflow not found: {id}")));
    }

    state.storage.save_workflow(&workflow).await?;
    tracing::info!("🔥 Updated workflow: {} ({})", workflow.id, workflow.name);

    Ok(Json(WorkflowResponse {
        id: workflow.id.clone(),
        message: format!("Workflow '{}' updated successfully", workflow.name),
    }))
}

/// Soft-delete a workflow, keeping its execution history
///
/// DELETE /api/workflows/{id}
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.storage.soft_delete_workflow(&id).await? {
        tracing::info!("🗑️ Deleted workflow: {}", id);
        Ok(Json(json!({ "message": "Workflow deleted successfully" })))
    } else {
        Err(ApiError::new(StatusCode::NOT_FOUND, format!("workflow not found: {id}")))
    }
}
