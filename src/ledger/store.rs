/// SQLite-backed execution ledger
///
/// Every write is its own atomic statement, except run finalization which
/// updates the execution row and the workflow stats in one transaction. A
/// crash mid-run leaves `running` rows behind; `reconcile_interrupted` marks
/// them failed on the next startup.

use crate::error::{EngineError, EngineResult};
use crate::ledger::types::{
    ExecutionDetail, ExecutionLog, ExecutionStatus, LogStatus, RunOutcome, StepOutcome,
    WorkflowExecution,
};
use crate::workflow::storage::WorkflowStorage;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::time::Duration;
use uuid::Uuid;

/// Error text recorded on runs and steps orphaned by a crash
pub const INTERRUPTED: &str = "interrupted";

#[derive(Debug, Clone)]
pub struct ExecutionLedger {
    pool: SqlitePool,
}

impl ExecutionLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a `running` execution row and return its id
    pub async fn begin_execution(&self, workflow_id: &str, triggered_by: &str) -> EngineResult<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO workflow_executions (id, workflow_id, status, started_at, triggered_by)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(workflow_id)
        .bind(ExecutionStatus::Running.as_str())
        .bind(Utc::now())
        .bind(triggered_by)
        .execute(&self.pool)
        .await?;

        tracing::debug!("📝 Began execution {} for workflow '{}'", id, workflow_id);
        Ok(id)
    }

    /// Insert a `running` log row for a node about to execute
    pub async fn begin_node_log(
        &self,
        execution_id: &str,
        node_id: &str,
        step: &str,
        input: &Value,
    ) -> EngineResult<String> {
        let id = Uuid::new_v4().to_string();

        sqlx::query(
            r#"
            INSERT INTO execution_logs (id, execution_id, node_id, step, status, input, started_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(execution_id)
        .bind(node_id)
        .bind(step)
        .bind(LogStatus::Running.as_str())
        .bind(serde_json::to_string(input)?)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    /// Write the terminal state of a node log
    ///
    /// Only a `running` row is updated, so each log is finalized once.
    pub async fn end_node_log(&self, log_id: &str, outcome: &StepOutcome, duration: Duration) -> EngineResult<()> {
        let (status, output, error) = match outcome {
            StepOutcome::Completed(output) => {
                (LogStatus::Completed, Some(serde_json::to_string(output)?), None)
            }
            StepOutcome::Failed(message) => (LogStatus::Failed, None, Some(message.as_str())),
        };

        let result = sqlx::query(
            r#"
            UPDATE execution_logs
            SET status = ?, output = ?, error = ?, completed_at = ?, duration_ms = ?
            WHERE id = ? AND status = ?
            "#,
        )
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .bind(Utc::now())
        .bind(duration_ms(duration))
        .bind(log_id)
        .bind(LogStatus::Running.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::LogNotFound(log_id.to_string()));
        }
        Ok(())
    }

    /// Write the terminal state of a run
    ///
    /// Completed runs also bump the workflow's `run_count` and `last_run` in
    /// the same transaction.
    pub async fn end_execution(&self, execution_id: &str, outcome: &RunOutcome) -> EngineResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT workflow_id, started_at FROM workflow_executions WHERE id = ? AND status = ?")
            .bind(execution_id)
            .bind(ExecutionStatus::Running.as_str())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        let workflow_id: String = row.try_get("workflow_id")?;
        let started_at: DateTime<Utc> = row.try_get("started_at")?;

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds().max(0);
        let (result, error) = match outcome {
            RunOutcome::Completed(result) => (Some(serde_json::to_string(result)?), None),
            RunOutcome::Failed(message) => (None, Some(message.clone())),
            RunOutcome::Cancelled => (None, Some(EngineError::Cancelled.to_string())),
        };

        sqlx::query(
            r#"
            UPDATE workflow_executions
            SET status = ?, completed_at = ?, duration_ms = ?, result = ?, error = ?
            WHERE id = ?
            "#,
        )
        .bind(outcome.status().as_str())
        .bind(completed_at)
        .bind(duration)
        .bind(result)
        .bind(error)
        .bind(execution_id)
        .execute(&mut *tx)
        .await?;

        if matches!(outcome, RunOutcome::Completed(_)) {
            WorkflowStorage::record_run(&mut tx, &workflow_id, completed_at).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            "📝 Finalized execution {} as {} after {}ms",
            execution_id,
            outcome.status(),
            duration
        );
        Ok(())
    }

    /// Most recent runs of a workflow first
    pub async fn get_history(&self, workflow_id: &str, limit: i64) -> EngineResult<Vec<WorkflowExecution>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_executions
            WHERE workflow_id = ?
            ORDER BY started_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(workflow_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(execution_from_row).collect()
    }

    /// A run with its node logs in start order
    pub async fn get_detail(&self, execution_id: &str) -> EngineResult<ExecutionDetail> {
        let row = sqlx::query("SELECT * FROM workflow_executions WHERE id = ?")
            .bind(execution_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| EngineError::ExecutionNotFound(execution_id.to_string()))?;
        let execution = execution_from_row(&row)?;

        let log_rows = sqlx::query(
            r#"
            SELECT * FROM execution_logs
            WHERE execution_id = ?
            ORDER BY started_at ASC, rowid ASC
            "#,
        )
        .bind(execution_id)
        .fetch_all(&self.pool)
        .await?;
        let logs = log_rows.iter().map(log_from_row).collect::<EngineResult<Vec<_>>>()?;

        Ok(ExecutionDetail { execution, logs })
    }

    /// Mark runs and steps left `running` by a previous process as failed
    ///
    /// Must only run while no executions are in flight. Returns the number of
    /// executions repaired.
    pub async fn reconcile_interrupted(&self) -> EngineResult<u64> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE execution_logs SET status = ?, error = ?, completed_at = ? WHERE status = ?")
            .bind(LogStatus::Failed.as_str())
            .bind(INTERRUPTED)
            .bind(now)
            .bind(LogStatus::Running.as_str())
            .execute(&mut *tx)
            .await?;

        let repaired = sqlx::query(
            "UPDATE workflow_executions SET status = ?, error = ?, completed_at = ? WHERE status = ?",
        )
        .bind(ExecutionStatus::Failed.as_str())
        .bind(INTERRUPTED)
        .bind(now)
        .bind(ExecutionStatus::Running.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;

        if repaired > 0 {
            tracing::warn!("🩹 Marked {} interrupted executions as failed", repaired);
        }
        Ok(repaired)
    }
}

fn duration_ms(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

fn decode_json(text: Option<String>) -> EngineResult<Option<Value>> {
    text.map(|t| serde_json::from_str(&t)).transpose().map_err(EngineError::from)
}

fn decode_status<T: std::str::FromStr<Err = crate::ledger::types::UnknownStatus>>(
    row: &SqliteRow,
) -> EngineResult<T> {
    let text: String = row.try_get("status")?;
    text.parse()
        .map_err(|e| EngineError::Storage(sqlx::Error::Decode(Box::new(e))))
}

fn execution_from_row(row: &SqliteRow) -> EngineResult<WorkflowExecution> {
    Ok(WorkflowExecution {
        id: row.try_get("id")?,
        workflow_id: row.try_get("workflow_id")?,
        status: decode_status(row)?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
        result: decode_json(row.try_get("result")?)?,
        error: row.try_get("error")?,
        triggered_by: row.try_get("triggered_by")?,
    })
}

fn log_from_row(row: &SqliteRow) -> EngineResult<ExecutionLog> {
    let input: String = row.try_get("input")?;
    Ok(ExecutionLog {
        id: row.try_get("id")?,
        execution_id: row.try_get("execution_id")?,
        node_id: row.try_get("node_id")?,
        step: row.try_get("step")?,
        status: decode_status(row)?,
        input: serde_json::from_str(&input)?,
        output: decode_json(row.try_get("output")?)?,
        error: row.try_get("error")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
        duration_ms: row.try_get("duration_ms")?,
    })
}
