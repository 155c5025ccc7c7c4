/// Runtime Execution Engine
///
/// This module runs workflow graphs. It handles:
/// - Template resolution of node configs against earlier outputs
/// - The restricted expression language used by condition and transform nodes
/// - Per-type node executors
/// - Kahn scheduling with exactly-once joins and cancellation
/// - The engine facade that ties runs to the execution ledger

// {{path}} substitution in node configs
pub mod template;

// Restricted expression parser and evaluator
pub mod expression;

// Individual node execution handlers
pub mod executor;

// Kahn planning and sequential node scheduling
pub mod scheduler;

// Workflow engine facade over store, scheduler and ledger
pub mod engine;

// Re-export main types
pub use engine::{ExecutionOutcome, WorkflowEngine, DEFAULT_TRIGGER};
pub use executor::NodeExecutor;
pub use scheduler::{ExecutionPlan, GraphScheduler, NoopObserver, StepObserver};
