/// Zilliance workflow engine
///
/// Executes directed graphs of typed nodes (start, http_request,
/// data_transform, condition, delay, email, end) in Kahn order, with node
/// configs templated from earlier outputs and every run recorded in a SQLite
/// execution ledger.

// Core configuration and setup
pub mod config;

// Error taxonomy shared by every layer
pub mod error;

// SQLite pool and schema
pub mod db;

// Workflow management layer - definitions and storage
pub mod workflow;

// Runtime execution engine - templates, expressions, executors, scheduling
pub mod runtime;

// Execution ledger - runs and per-node logs
pub mod ledger;

// HTTP API layer - REST endpoints for workflows and executions
pub mod api;

// Server setup and initialization
pub mod server;

// Re-export commonly used types for external consumers
pub use error::{DefinitionError, EngineError, EngineResult};
pub use ledger::{ExecutionDetail, ExecutionLog, ExecutionStatus, LogStatus, WorkflowExecution};
pub use runtime::{ExecutionOutcome, WorkflowEngine};
pub use server::start_server;
pub use workflow::{Connection, ExecutionContext, Node, NodeType, Workflow};
