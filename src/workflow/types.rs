/// Core workflow type definitions
///
/// Defines workflows, nodes, and connections. Nodes carry their outgoing
/// connections only; incoming edges are derived by scanning the node list.
/// These types are serialized to JSON for persistence and the REST API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A complete workflow definition
///
/// Stored in SQLite with `nodes` as a JSON text column. `run_count` and
/// `last_run` are aggregate stats maintained by the execution ledger and are
/// ignored when a definition is saved.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Unique workflow identifier (e.g., "wf-onboarding")
    pub id: String,
    /// Human-readable workflow name
    pub name: String,
    /// User that created the workflow
    #[serde(default)]
    pub owner_id: Option<String>,
    /// Nodes with their outgoing connections
    pub nodes: Vec<Node>,
    /// Number of completed runs
    #[serde(default)]
    pub run_count: i64,
    /// Completion time of the most recent successful run
    #[serde(default)]
    pub last_run: Option<DateTime<Utc>>,
}

/// A single unit of work in the workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    /// Unique node identifier within the workflow (e.g., "fetch-user")
    pub id: String,
    /// Executor kind
    #[serde(rename = "type")]
    pub node_type: NodeType,
    /// Type-specific configuration, template-resolved before execution
    #[serde(default)]
    pub data: Value,
    /// Outgoing edges
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Directed edge to a downstream node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub target: String,
}

impl Connection {
    pub fn to(target: impl Into<String>) -> Self {
        Self { target: target.into() }
    }
}

/// Available node types
///
/// Closed set of executor kinds. A type string that matches none of them
/// decodes to `Unknown` so persisted definitions still load; the node then
/// fails when the scheduler reaches it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NodeType {
    /// Entry point, outputs the trigger input verbatim
    Start,
    /// Outbound HTTP call
    /// Expected data: { "url": "...", "method": "POST", "headers": {...}, "body": ... }
    HttpRequest,
    /// Template or expression based reshaping of upstream outputs
    /// Expected data: { "transform": "Hello {{a.name}}" } or { "expression": "a.total * 2" }
    DataTransform,
    /// Boolean branch marker
    /// Expected data: { "condition": "fetch.status == 200" }
    Condition,
    /// Suspends the run
    /// Expected data: { "duration": 1000 }
    Delay,
    /// Simulated email delivery
    /// Expected data: { "to": "...", "subject": "...", "body": "..." }
    Email,
    /// Terminal node, outputs a snapshot of all variables
    End,
    /// Type string not understood by this engine
    Unknown(String),
}

impl NodeType {
    pub fn as_str(&self) -> &str {
        match self {
            NodeType::Start => "start",
            NodeType::HttpRequest => "http_request",
            NodeType::DataTransform => "data_transform",
            NodeType::Condition => "condition",
            NodeType::Delay => "delay",
            NodeType::Email => "email",
            NodeType::End => "end",
            NodeType::Unknown(name) => name,
        }
    }
}

impl From<String> for NodeType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "start" => NodeType::Start,
            "http_request" => NodeType::HttpRequest,
            "data_transform" => NodeType::DataTransform,
            "condition" => NodeType::Condition,
            "delay" => NodeType::Delay,
            "email" => NodeType::Email,
            "end" => NodeType::End,
            _ => NodeType::Unknown(value),
        }
    }
}

impl From<NodeType> for String {
    fn from(value: NodeType) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-run state shared between nodes
///
/// `variables` accumulates node id -> output as nodes complete. Each run owns
/// its context; nothing here is shared across runs or persisted directly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Caller-supplied trigger payload
    pub input: Value,
    /// Outputs of completed nodes keyed by node id
    pub variables: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(input: Value) -> Self {
        Self {
            input,
            variables: Map::new(),
        }
    }

    /// Resolve a dot-separated path against the variables
    ///
    /// The first segment names a node, later segments walk object keys or
    /// array indices. Returns `None` when any segment is missing.
    pub fn lookup<'a, I>(&self, segments: I) -> Option<&Value>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut segments = segments.into_iter();
        let mut current = self.variables.get(segments.next()?)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}
