/// Execution ledger records
///
/// One `WorkflowExecution` per run and one `ExecutionLog` per executed node.
/// Both are written while the run is in flight and are read-only history
/// once terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Status of a whole run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Status of a single node step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Unrecognised status text read back from storage
#[derive(Debug, thiserror::Error)]
#[error("unknown status '{0}'")]
pub struct UnknownStatus(pub String);

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "completed" => Ok(ExecutionStatus::Completed),
            "failed" => Ok(ExecutionStatus::Failed),
            "cancelled" => Ok(ExecutionStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl LogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogStatus::Pending => "pending",
            LogStatus::Running => "running",
            LogStatus::Completed => "completed",
            LogStatus::Failed => "failed",
        }
    }
}

impl FromStr for LogStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(LogStatus::Pending),
            "running" => Ok(LogStatus::Running),
            "completed" => Ok(LogStatus::Completed),
            "failed" => Ok(LogStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

impl fmt::Display for LogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One run of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: String,
    pub workflow_id: String,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    /// Results map of a completed run
    pub result: Option<Value>,
    /// Terminal error message of a failed or cancelled run
    pub error: Option<String>,
    pub triggered_by: String,
}

/// Audit record of one node's execution within a run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLog {
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    /// Node type of the step
    pub step: String,
    pub status: LogStatus,
    /// Resolved node config passed to the executor
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// A run together with its node logs, oldest step first
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionDetail {
    #[serde(flatten)]
    pub execution: WorkflowExecution,
    pub logs: Vec<ExecutionLog>,
}

/// Terminal state handed to the ledger when a run ends
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Value),
    Failed(String),
    Cancelled,
}

impl RunOutcome {
    pub fn status(&self) -> ExecutionStatus {
        match self {
            RunOutcome::Completed(_) => ExecutionStatus::Completed,
            RunOutcome::Failed(_) => ExecutionStatus::Failed,
            RunOutcome::Cancelled => ExecutionStatus::Cancelled,
        }
    }
}

/// Terminal state of a node step
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Completed(Value),
    Failed(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_parse_their_own_text() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<ExecutionStatus>().unwrap(), status);
        }
        assert!("paused".parse::<ExecutionStatus>().is_err());
        assert_eq!("pending".parse::<LogStatus>().unwrap(), LogStatus::Pending);
    }

    #[test]
    fn detail_flattens_execution_fields() {
        let detail = ExecutionDetail {
            execution: WorkflowExecution {
                id: "exec-1".to_string(),
                workflow_id: "wf-1".to_string(),
                status: ExecutionStatus::Completed,
                started_at: Utc::now(),
                completed_at: None,
                duration_ms: None,
                result: None,
                error: None,
                triggered_by: "system".to_string(),
            },
            logs: vec![],
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["id"], "exec-1");
        assert_eq!(json["status"], "completed");
        assert!(json["logs"].as_array().unwrap().is_empty());
    }
}
