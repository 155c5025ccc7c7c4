/// HTTP API Layer
///
/// This module provides the REST API endpoints for workflow management
/// and execution. It handles:
/// - Workflow CRUD operations
/// - Synchronous workflow execution and cancellation
/// - Execution history and detail queries

use crate::error::EngineError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    Router,
};
use serde_json::json;

// Workflow management endpoints (POST/GET/PUT/DELETE)
pub mod workflows;

// Execution trigger, history and cancellation endpoints
pub mod executions;

pub use workflows::AppState;

/// Build the full API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(workflows::create_workflow_routes())
        .merge(executions::create_execution_routes())
        .with_state(state)
}

/// Error response with a `{ "error": message }` body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        let status = match &error {
            EngineError::WorkflowNotFound(_) | EngineError::ExecutionNotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Definition(_) => StatusCode::UNPROCESSABLE_ENTITY,
            EngineError::Cancelled => StatusCode::CONFLICT,
            EngineError::Executor { .. }
            | EngineError::LogNotFound(_)
            | EngineError::Storage(_)
            | EngineError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("❌ Request failed: {}", error);
        }
        Self::new(status, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}
