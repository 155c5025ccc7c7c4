/// Workflow Management Layer
///
/// This module handles workflow definitions and their persistence:
/// - Type definitions (Workflow, Node, Connection, ExecutionContext)
/// - SQLite persistence with sqlx, including soft delete and run stats

// Core workflow type definitions
pub mod types;

// SQLite persistence layer for workflow storage
pub mod storage;

// Re-export commonly used types
pub use storage::{WorkflowMetadata, WorkflowStorage};
pub use types::{Connection, ExecutionContext, Node, NodeType, Workflow};
