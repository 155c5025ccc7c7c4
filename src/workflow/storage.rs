/// SQLite persistence layer for workflow storage
///
/// Handles workflow CRUD operations. Node graphs are stored as JSON text and
/// decoded on read. Soft-deleted workflows stay in the table (their execution
/// history remains queryable) but are hidden from lookups and listings.

use crate::error::EngineResult;
use crate::workflow::types::{Node, Workflow};
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row, Sqlite, SqlitePool};

/// SQLite-based workflow storage manager
#[derive(Debug, Clone)]
pub struct WorkflowStorage {
    /// SQLite connection pool shared with the execution ledger
    pool: SqlitePool,
}

impl WorkflowStorage {
    /// Create new storage instance with database connection
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Store a new workflow or update an existing one
    ///
    /// Uses UPSERT so create and update are a single atomic statement. Run
    /// stats are left untouched, and saving a soft-deleted workflow revives it.
    pub async fn save_workflow(&self, workflow: &Workflow) -> EngineResult<()> {
        let nodes_json = serde_json::to_string(&workflow.nodes)?;
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO workflows (id, name, owner_id, nodes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                owner_id = excluded.owner_id,
                nodes = excluded.nodes,
                deleted_at = NULL,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&workflow.id)
        .bind(&workflow.name)
        .bind(&workflow.owner_id)
        .bind(&nodes_json)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!("💾 Saved workflow '{}' with {} nodes", workflow.id, workflow.nodes.len());
        Ok(())
    }

    /// Retrieve a live (not soft-deleted) workflow by ID
    pub async fn get_workflow(&self, id: &str) -> EngineResult<Option<Workflow>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, owner_id, nodes, run_count, last_run
            FROM workflows
            WHERE id = ? AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(workflow_from_row).transpose()
    }

    /// List live workflows with basic metadata, most recently updated first
    pub async fn list_workflows(&self) -> EngineResult<Vec<WorkflowMetadata>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, owner_id, run_count, last_run, created_at, updated_at
            FROM workflows
            WHERE deleted_at IS NULL
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut workflows = Vec::with_capacity(rows.len());
        for row in rows {
            workflows.push(WorkflowMetadata {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                owner_id: row.try_get("owner_id")?,
                run_count: row.try_get("run_count")?,
                last_run: row.try_get("last_run")?,
                created_at: row.try_get("created_at")?,
                updated_at: row.try_get("updated_at")?,
            });
        }

        Ok(workflows)
    }

    /// Mark a workflow deleted without removing its history
    ///
    /// Returns false when the workflow does not exist or is already deleted.
    pub async fn soft_delete_workflow(&self, id: &str) -> EngineResult<bool> {
        let result = sqlx::query(
            "UPDATE workflows SET deleted_at = ?, updated_at = ? WHERE id = ? AND deleted_at IS NULL",
        )
        .bind(Utc::now())
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Permanently delete a workflow, cascading to executions and logs
    pub async fn delete_workflow(&self, id: &str) -> EngineResult<bool> {
        let result = sqlx::query("DELETE FROM workflows WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Bump run stats for a workflow inside an open transaction
    pub(crate) async fn record_run(
        conn: &mut sqlx::SqliteConnection,
        workflow_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query::<Sqlite>(
            "UPDATE workflows SET run_count = run_count + 1, last_run = ? WHERE id = ?",
        )
        .bind(at)
        .bind(workflow_id)
        .execute(conn)
        .await?;
        Ok(())
    }
}

fn workflow_from_row(row: &SqliteRow) -> EngineResult<Workflow> {
    let nodes_json: String = row.try_get("nodes")?;
    let nodes: Vec<Node> = serde_json::from_str(&nodes_json)?;

    Ok(Workflow {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        owner_id: row.try_get("owner_id")?,
        nodes,
        run_count: row.try_get("run_count")?,
        last_run: row.try_get("last_run")?,
    })
}

/// Basic workflow metadata for listing operations
#[derive(Debug, serde::Serialize)]
pub struct WorkflowMetadata {
    pub id: String,
    pub name: String,
    pub owner_id: Option<String>,
    pub run_count: i64,
    pub last_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::workflow::types::{Connection, NodeType};
    use serde_json::json;

    fn sample_workflow(id: &str) -> Workflow {
        Workflow {
            id: id.to_string(),
            name: "Onboarding".to_string(),
            owner_id: Some("user-1".to_string()),
            nodes: vec![
                Node {
                    id: "a".to_string(),
                    node_type: NodeType::Start,
                    data: json!({}),
                    connections: vec![Connection::to("b")],
                },
                Node {
                    id: "b".to_string(),
                    node_type: NodeType::End,
                    data: json!({}),
                    connections: vec![],
                },
            ],
            run_count: 0,
            last_run: None,
        }
    }

    #[tokio::test]
    async fn save_then_get_decodes_nodes() {
        let storage = WorkflowStorage::new(db::connect_in_memory().await.unwrap());
        storage.save_workflow(&sample_workflow("wf-1")).await.unwrap();

        let loaded = storage.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Onboarding");
        assert_eq!(loaded.owner_id.as_deref(), Some("user-1"));
        assert_eq!(loaded.nodes.len(), 2);
        assert_eq!(loaded.nodes[0].connections, vec![Connection::to("b")]);
        assert_eq!(loaded.run_count, 0);
    }

    #[tokio::test]
    async fn upsert_keeps_run_stats() {
        let storage = WorkflowStorage::new(db::connect_in_memory().await.unwrap());
        storage.save_workflow(&sample_workflow("wf-1")).await.unwrap();

        let mut conn = storage.pool().acquire().await.unwrap();
        WorkflowStorage::record_run(&mut conn, "wf-1", Utc::now()).await.unwrap();
        drop(conn);

        let mut renamed = sample_workflow("wf-1");
        renamed.name = "Renamed".to_string();
        storage.save_workflow(&renamed).await.unwrap();

        let loaded = storage.get_workflow("wf-1").await.unwrap().unwrap();
        assert_eq!(loaded.name, "Renamed");
        assert_eq!(loaded.run_count, 1);
        assert!(loaded.last_run.is_some());
    }

    #[tokio::test]
    async fn soft_deleted_workflows_are_hidden() {
        let storage = WorkflowStorage::new(db::connect_in_memory().await.unwrap());
        storage.save_workflow(&sample_workflow("wf-1")).await.unwrap();
        storage.save_workflow(&sample_workflow("wf-2")).await.unwrap();

        assert!(storage.soft_delete_workflow("wf-1").await.unwrap());
        assert!(!storage.soft_delete_workflow("wf-1").await.unwrap());

        assert!(storage.get_workflow("wf-1").await.unwrap().is_none());
        let listed: Vec<String> = storage
            .list_workflows()
            .await
            .unwrap()
            .into_iter()
            .map(|meta| meta.id)
            .collect();
        assert_eq!(listed, vec!["wf-2"]);
    }

    #[tokio::test]
    async fn hard_delete_reports_missing_rows() {
        let storage = WorkflowStorage::new(db::connect_in_memory().await.unwrap());
        storage.save_workflow(&sample_workflow("wf-1")).await.unwrap();

        assert!(storage.delete_workflow("wf-1").await.unwrap());
        assert!(!storage.delete_workflow("wf-1").await.unwrap());
    }
}
