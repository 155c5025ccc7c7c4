/// Workflow engine facade
///
/// Loads a workflow, opens an execution record, plans the graph, runs it
/// through the scheduler with every step written to the ledger, and
/// finalizes the run as completed, failed or cancelled.

use crate::error::{EngineError, EngineResult};
use crate::ledger::{
    ExecutionDetail, ExecutionLedger, ExecutionStatus, RunOutcome, StepOutcome, WorkflowExecution,
};
use crate::runtime::executor::NodeExecutor;
use crate::runtime::scheduler::{ExecutionPlan, GraphScheduler, StepObserver};
use crate::workflow::storage::WorkflowStorage;
use crate::workflow::types::{ExecutionContext, Node, Workflow};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Trigger label used when the caller does not supply one
pub const DEFAULT_TRIGGER: &str = "system";

/// Result of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub status: ExecutionStatus,
    /// Map of node id to node output
    pub result: Value,
}

/// Entry point for running workflows and reading their history
#[derive(Debug)]
pub struct WorkflowEngine {
    storage: WorkflowStorage,
    ledger: ExecutionLedger,
    scheduler: GraphScheduler,
    /// Cancellation tokens of in-flight runs keyed by execution id
    running: Mutex<HashMap<String, CancellationToken>>,
}

/// Registration of one in-flight run, removed when dropped
///
/// Dropping covers both normal completion and an abandoned
/// `execute_workflow_with_cancel` future.
struct RunningGuard<'a> {
    running: &'a Mutex<HashMap<String, CancellationToken>>,
    execution_id: &'a str,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock(self.running).remove(self.execution_id);
    }
}

fn lock(running: &Mutex<HashMap<String, CancellationToken>>) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

impl WorkflowEngine {
    pub fn new(storage: WorkflowStorage, ledger: ExecutionLedger, executor: Arc<NodeExecutor>) -> Self {
        Self {
            storage,
            ledger,
            scheduler: GraphScheduler::new(executor),
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &ExecutionLedger {
        &self.ledger
    }

    /// Run a workflow to completion
    ///
    /// Failures are recorded on the execution and returned to the caller.
    pub async fn execute_workflow(
        &self,
        workflow_id: &str,
        input: Value,
        triggered_by: Option<&str>,
    ) -> EngineResult<ExecutionOutcome> {
        self.execute_workflow_with_cancel(workflow_id, input, triggered_by, CancellationToken::new())
            .await
    }

    /// Run a workflow that stops early once `cancel` fires
    ///
    /// The run is also registered under its execution id so
    /// `cancel_execution` can stop it. Cancelling by id leaves the caller's
    /// token untouched.
    pub async fn execute_workflow_with_cancel(
        &self,
        workflow_id: &str,
        input: Value,
        triggered_by: Option<&str>,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionOutcome> {
        let workflow = self
            .storage
            .get_workflow(workflow_id)
            .await?
            .ok_or_else(|| EngineError::WorkflowNotFound(workflow_id.to_string()))?;

        let triggered_by = triggered_by.unwrap_or(DEFAULT_TRIGGER);
        let execution_id = self.ledger.begin_execution(&workflow.id, triggered_by).await?;

        tracing::info!(
            "🚀 Starting workflow '{}' (execution {}, triggered by {})",
            workflow.id,
            execution_id,
            triggered_by
        );

        let run_token = cancel.child_token();
        lock(&self.running).insert(execution_id.clone(), run_token.clone());
        let registration = RunningGuard {
            running: &self.running,
            execution_id: &execution_id,
        };

        let started = Instant::now();
        let outcome = self.run(&workflow, &execution_id, input, &run_token).await;

        drop(registration);

        match outcome {
            Ok(result) => {
                self.ledger
                    .end_execution(&execution_id, &RunOutcome::Completed(result.clone()))
                    .await?;
                tracing::info!(
                    "🎉 Workflow '{}' completed in {:?} (execution {})",
                    workflow.id,
                    started.elapsed(),
                    execution_id
                );
                Ok(ExecutionOutcome {
                    execution_id,
                    status: ExecutionStatus::Completed,
                    result,
                })
            }
            Err(error) => {
                let terminal = match &error {
                    EngineError::Cancelled => RunOutcome::Cancelled,
                    other => RunOutcome::Failed(other.to_string()),
                };
                if let Err(e) = self.ledger.end_execution(&execution_id, &terminal).await {
                    tracing::error!("❌ Failed to finalize execution {}: {}", execution_id, e);
                }
                match terminal {
                    RunOutcome::Cancelled => {
                        tracing::warn!("⏹️ Workflow '{}' cancelled (execution {})", workflow.id, execution_id)
                    }
                    _ => tracing::error!(
                        "❌ Workflow '{}' failed (execution {}): {}",
                        workflow.id,
                        execution_id,
                        error
                    ),
                }
                Err(error)
            }
        }
    }

    async fn run(
        &self,
        workflow: &Workflow,
        execution_id: &str,
        input: Value,
        cancel: &CancellationToken,
    ) -> EngineResult<Value> {
        let plan = ExecutionPlan::build(&workflow.nodes)?;
        tracing::debug!(
            "📊 Planned {} nodes from {} start nodes",
            plan.len(),
            plan.start_ids().len()
        );

        let mut context = ExecutionContext::new(input);
        let recorder = LedgerRecorder {
            ledger: &self.ledger,
            execution_id,
        };
        let results = self.scheduler.run(&plan, &mut context, &recorder, cancel).await?;
        Ok(Value::Object(results))
    }

    /// Signal a live run to stop
    ///
    /// Returns false when no run with this id is in flight.
    pub async fn cancel_execution(&self, execution_id: &str) -> bool {
        match lock(&self.running).get(execution_id) {
            Some(token) => {
                tracing::info!("⏹️ Cancelling execution {}", execution_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ids of runs currently in flight
    pub async fn running_executions(&self) -> Vec<String> {
        lock(&self.running).keys().cloned().collect()
    }

    pub async fn get_execution_history(&self, workflow_id: &str, limit: i64) -> EngineResult<Vec<WorkflowExecution>> {
        self.ledger.get_history(workflow_id, limit).await
    }

    pub async fn get_execution_details(&self, execution_id: &str) -> EngineResult<ExecutionDetail> {
        self.ledger.get_detail(execution_id).await
    }

    /// Repair runs orphaned by a previous process. Call before serving.
    pub async fn reconcile_interrupted(&self) -> EngineResult<u64> {
        self.ledger.reconcile_interrupted().await
    }
}

/// Writes one execution log row per scheduled node
struct LedgerRecorder<'a> {
    ledger: &'a ExecutionLedger,
    execution_id: &'a str,
}

impl StepObserver for LedgerRecorder<'_> {
    type Handle = String;

    async fn node_started(&self, node: &Node, input: &Value) -> EngineResult<String> {
        self.ledger
            .begin_node_log(self.execution_id, &node.id, node.node_type.as_str(), input)
            .await
    }

    async fn node_finished(
        &self,
        log_id: String,
        outcome: &EngineResult<Value>,
        elapsed: Duration,
    ) -> EngineResult<()> {
        let step = match outcome {
            Ok(output) => StepOutcome::Completed(output.clone()),
            Err(e) => StepOutcome::Failed(e.to_string()),
        };
        self.ledger.end_node_log(&log_id, &step, elapsed).await
    }
}
