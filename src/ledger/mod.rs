/// Execution Ledger
///
/// Persists one record per workflow run and one log record per node step,
/// and answers history and detail queries for the API layer.

// Record types and statuses
pub mod types;

// SQLite persistence of executions and logs
pub mod store;

pub use store::{ExecutionLedger, INTERRUPTED};
pub use types::{
    ExecutionDetail, ExecutionLog, ExecutionStatus, LogStatus, RunOutcome, StepOutcome,
    WorkflowExecution,
};
