#![allow(dead_code)]

use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use zilliance_workflow::{
    db,
    ledger::ExecutionLedger,
    runtime::{NodeExecutor, WorkflowEngine},
    workflow::WorkflowStorage,
    Connection, Node, NodeType, Workflow,
};

pub struct Harness {
    pub storage: WorkflowStorage,
    pub engine: Arc<WorkflowEngine>,
}

/// Engine over a fresh in-memory database
pub async fn harness() -> Harness {
    let pool = db::connect_in_memory().await.expect("in-memory database");
    let storage = WorkflowStorage::new(pool.clone());
    let engine = WorkflowEngine::new(
        storage.clone(),
        ExecutionLedger::new(pool),
        Arc::new(NodeExecutor::new(Duration::from_secs(5))),
    );
    Harness {
        storage,
        engine: Arc::new(engine),
    }
}

pub fn node(id: &str, node_type: NodeType, data: Value, targets: &[&str]) -> Node {
    Node {
        id: id.to_string(),
        node_type,
        data,
        connections: targets.iter().map(|t| Connection::to(*t)).collect(),
    }
}

pub fn workflow(id: &str, nodes: Vec<Node>) -> Workflow {
    Workflow {
        id: id.to_string(),
        name: format!("{id} workflow"),
        owner_id: None,
        nodes,
        run_count: 0,
        last_run: None,
    }
}

impl Harness {
    pub async fn save(&self, id: &str, nodes: Vec<Node>) {
        self.storage
            .save_workflow(&workflow(id, nodes))
            .await
            .expect("save workflow");
    }
}

/// Local HTTP target for http_request nodes; returns its base URL
///
/// - `GET /ok` answers `{"ok": true}`
/// - `POST /echo` answers with the JSON body it received
/// - `GET /text` answers plain text
/// - `GET /missing` answers 404
pub async fn spawn_target() -> String {
    let app = Router::new()
        .route("/ok", get(|| async { Json(json!({ "ok": true })) }))
        .route("/echo", post(|Json(body): Json<Value>| async move { Json(body) }))
        .route("/text", get(|| async { "plain text" }))
        .route("/missing", get(|| async { (StatusCode::NOT_FOUND, "nope") }));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind target");
    let addr = listener.local_addr().expect("target address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve target");
    });
    format!("http://{addr}")
}

/// URL of a local port with nothing listening on it
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind probe");
    let port = listener.local_addr().expect("probe address").port();
    drop(listener);
    format!("http://127.0.0.1:{port}/")
}
