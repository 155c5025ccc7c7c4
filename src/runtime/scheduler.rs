/// Dependency-ordered graph scheduler
///
/// Builds a petgraph DAG from node connections, validates it, then executes
/// nodes in Kahn order: a FIFO queue seeded with the start set, where a node
/// is enqueued exactly once, at the moment its last dependency completes.
/// Join nodes reached by several paths therefore run once.
///
/// Execution is sequential within a run. The first failing node aborts the
/// loop.

use crate::error::{DefinitionError, EngineError, EngineResult};
use crate::runtime::executor::NodeExecutor;
use crate::runtime::template;
use crate::workflow::types::{ExecutionContext, Node};
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Validated execution order for one workflow
#[derive(Debug)]
pub struct ExecutionPlan<'w> {
    /// Nodes in the order they will run
    order: Vec<&'w Node>,
    /// Nodes with no incoming connection, in definition order
    start_ids: Vec<&'w str>,
}

impl<'w> ExecutionPlan<'w> {
    /// Validate the graph and compute its Kahn order
    ///
    /// Fails if node ids repeat, a connection targets a missing node, no node
    /// is free of incoming connections, or the graph has a cycle. Nothing is
    /// executed when planning fails.
    pub fn build(nodes: &'w [Node]) -> Result<Self, DefinitionError> {
        let mut graph: DiGraph<&'w str, ()> = DiGraph::with_capacity(nodes.len(), nodes.len());
        let mut index_of: HashMap<&'w str, NodeIndex> = HashMap::with_capacity(nodes.len());

        for node in nodes {
            let index = graph.add_node(node.id.as_str());
            if index_of.insert(node.id.as_str(), index).is_some() {
                return Err(DefinitionError::DuplicateNodeId(node.id.clone()));
            }
        }

        for node in nodes {
            let from = index_of[node.id.as_str()];
            for connection in &node.connections {
                let to = *index_of.get(connection.target.as_str()).ok_or_else(|| {
                    DefinitionError::UnknownTarget {
                        node_id: node.id.clone(),
                        target: connection.target.clone(),
                    }
                })?;
                // Repeated connections to one target count as a single dependency
                graph.update_edge(from, to, ());
            }
        }

        let mut in_degree: Vec<usize> = graph
            .node_indices()
            .map(|index| graph.neighbors_directed(index, Direction::Incoming).count())
            .collect();

        let start_ids: Vec<&'w str> = nodes
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] == 0)
            .map(|(_, node)| node.id.as_str())
            .collect();
        if start_ids.is_empty() {
            return Err(DefinitionError::NoStartNodes);
        }

        toposort(&graph, None)
            .map_err(|cycle| DefinitionError::Cycle(graph[cycle.node_id()].to_string()))?;

        // Node indices follow definition order, so `nodes[index]` is the node
        let mut queue: VecDeque<usize> = start_ids
            .iter()
            .map(|id| index_of[id].index())
            .collect();
        let mut order = Vec::with_capacity(nodes.len());

        while let Some(current) = queue.pop_front() {
            let node = &nodes[current];
            order.push(node);

            let mut seen = HashSet::new();
            for connection in &node.connections {
                let target = index_of[connection.target.as_str()].index();
                if !seen.insert(target) {
                    continue;
                }
                in_degree[target] -= 1;
                if in_degree[target] == 0 {
                    queue.push_back(target);
                }
            }
        }

        Ok(Self { order, start_ids })
    }

    pub fn order(&self) -> &[&'w Node] {
        &self.order
    }

    pub fn start_ids(&self) -> &[&'w str] {
        &self.start_ids
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Receives a callback around every node execution
///
/// The execution ledger implements this to persist one log row per node
/// without the scheduler knowing about storage.
#[allow(async_fn_in_trait)]
pub trait StepObserver {
    type Handle;

    /// Called with the resolved config before the executor runs
    async fn node_started(&self, node: &Node, input: &Value) -> EngineResult<Self::Handle>;

    /// Called exactly once per started node with its outcome
    async fn node_finished(
        &self,
        handle: Self::Handle,
        outcome: &EngineResult<Value>,
        elapsed: Duration,
    ) -> EngineResult<()>;
}

/// Observer that records nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl StepObserver for NoopObserver {
    type Handle = ();

    async fn node_started(&self, _node: &Node, _input: &Value) -> EngineResult<()> {
        Ok(())
    }

    async fn node_finished(
        &self,
        _handle: (),
        _outcome: &EngineResult<Value>,
        _elapsed: Duration,
    ) -> EngineResult<()> {
        Ok(())
    }
}

/// Runs an execution plan node by node
#[derive(Debug, Clone)]
pub struct GraphScheduler {
    executor: Arc<NodeExecutor>,
}

impl GraphScheduler {
    pub fn new(executor: Arc<NodeExecutor>) -> Self {
        Self { executor }
    }

    /// Execute every node of the plan in order
    ///
    /// Each node's config is template-resolved against the outputs recorded
    /// so far, executed, and its output stored under its id. Returns the full
    /// results map. Cancellation is checked before every node and passed to
    /// the long-running executors.
    pub async fn run<O: StepObserver>(
        &self,
        plan: &ExecutionPlan<'_>,
        context: &mut ExecutionContext,
        observer: &O,
        cancel: &CancellationToken,
    ) -> EngineResult<Map<String, Value>> {
        tracing::debug!(
            "📋 Execution order: {:?}",
            plan.order().iter().map(|n| n.id.as_str()).collect::<Vec<_>>()
        );

        for (step, node) in plan.order().iter().enumerate() {
            if cancel.is_cancelled() {
                tracing::warn!("⏹️ Run cancelled before node '{}'", node.id);
                return Err(EngineError::Cancelled);
            }

            tracing::info!(
                "📍 Step {}/{}: Executing node '{}' (type: {})",
                step + 1,
                plan.len(),
                node.id,
                node.node_type
            );

            let config = template::resolve(&node.data, context);
            let handle = observer.node_started(node, &config).await?;

            let started = Instant::now();
            let outcome = self.executor.execute_node(node, &config, context, cancel).await;
            let elapsed = started.elapsed();

            observer.node_finished(handle, &outcome, elapsed).await?;

            match outcome {
                Ok(output) => {
                    tracing::info!("✅ Node '{}' completed in {:?}", node.id, elapsed);
                    context.variables.insert(node.id.clone(), output);
                }
                Err(e) => {
                    tracing::error!("❌ Node '{}' failed in {:?}: {}", node.id, elapsed, e);
                    return Err(e);
                }
            }
        }

        Ok(context.variables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::types::{Connection, NodeType};
    use serde_json::json;
    use std::sync::Mutex;

    fn node(id: &str, node_type: NodeType, targets: &[&str]) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            data: Value::Null,
            connections: targets.iter().map(|t| Connection::to(*t)).collect(),
        }
    }

    fn ids(plan: &ExecutionPlan<'_>) -> Vec<String> {
        plan.order().iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn linear_graph_runs_in_connection_order() {
        let nodes = vec![
            node("c", NodeType::End, &[]),
            node("a", NodeType::Start, &["b"]),
            node("b", NodeType::Email, &["c"]),
        ];
        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(ids(&plan), vec!["a", "b", "c"]);
        assert_eq!(plan.start_ids(), &["a"]);
    }

    #[test]
    fn diamond_join_is_planned_once() {
        //   a
        //  / \
        // b   c
        //  \ /
        //   d
        let nodes = vec![
            node("a", NodeType::Start, &["b", "c"]),
            node("b", NodeType::Email, &["d"]),
            node("c", NodeType::Email, &["d"]),
            node("d", NodeType::End, &[]),
        ];
        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(ids(&plan), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn join_waits_for_every_start_node() {
        let nodes = vec![
            node("a", NodeType::Start, &["e"]),
            node("d", NodeType::Start, &["x"]),
            node("x", NodeType::Email, &["e"]),
            node("e", NodeType::End, &[]),
        ];
        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(plan.start_ids(), &["a", "d"]);
        assert_eq!(ids(&plan), vec!["a", "d", "x", "e"]);
    }

    #[test]
    fn duplicate_connections_count_once() {
        let nodes = vec![
            node("a", NodeType::Start, &["b", "b"]),
            node("b", NodeType::End, &[]),
        ];
        let plan = ExecutionPlan::build(&nodes).unwrap();
        assert_eq!(ids(&plan), vec!["a", "b"]);
    }

    #[test]
    fn graph_without_start_nodes_is_rejected() {
        let nodes = vec![
            node("a", NodeType::Start, &["b"]),
            node("b", NodeType::End, &["a"]),
        ];
        assert_eq!(ExecutionPlan::build(&nodes).unwrap_err(), DefinitionError::NoStartNodes);
    }

    #[test]
    fn cycle_behind_a_start_node_is_rejected() {
        let nodes = vec![
            node("a", NodeType::Start, &["b"]),
            node("b", NodeType::Email, &["c"]),
            node("c", NodeType::Email, &["b"]),
        ];
        assert!(matches!(
            ExecutionPlan::build(&nodes),
            Err(DefinitionError::Cycle(ref id)) if id == "b" || id == "c"
        ));
    }

    #[test]
    fn self_loop_is_a_cycle() {
        let nodes = vec![
            node("a", NodeType::Start, &["b"]),
            node("b", NodeType::Email, &["b"]),
        ];
        assert_eq!(
            ExecutionPlan::build(&nodes).unwrap_err(),
            DefinitionError::Cycle("b".to_string())
        );
    }

    #[test]
    fn duplicate_ids_and_dangling_targets_are_rejected() {
        let duplicated = vec![node("a", NodeType::Start, &[]), node("a", NodeType::End, &[])];
        assert_eq!(
            ExecutionPlan::build(&duplicated).unwrap_err(),
            DefinitionError::DuplicateNodeId("a".to_string())
        );

        let dangling = vec![node("a", NodeType::Start, &["ghost"])];
        assert_eq!(
            ExecutionPlan::build(&dangling).unwrap_err(),
            DefinitionError::UnknownTarget {
                node_id: "a".to_string(),
                target: "ghost".to_string()
            }
        );
    }

    /// Records the order of node callbacks
    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl StepObserver for Recorder {
        type Handle = String;

        async fn node_started(&self, node: &Node, _input: &Value) -> EngineResult<String> {
            self.events.lock().unwrap().push(format!("start:{}", node.id));
            Ok(node.id.clone())
        }

        async fn node_finished(
            &self,
            handle: String,
            outcome: &EngineResult<Value>,
            _elapsed: Duration,
        ) -> EngineResult<()> {
            let verdict = if outcome.is_ok() { "ok" } else { "err" };
            self.events.lock().unwrap().push(format!("{verdict}:{handle}"));
            Ok(())
        }
    }

    fn scheduler() -> GraphScheduler {
        GraphScheduler::new(Arc::new(NodeExecutor::new(Duration::from_secs(1))))
    }

    #[tokio::test]
    async fn run_visits_every_node_once_and_resolves_templates() {
        let mut nodes = vec![
            node("a", NodeType::Start, &["b", "c"]),
            node("b", NodeType::DataTransform, &["d"]),
            node("c", NodeType::DataTransform, &["d"]),
            node("d", NodeType::End, &[]),
        ];
        nodes[1].data = json!({ "transform": "hello {{a.name}}" });
        nodes[2].data = json!({ "expression": "a.count + 1" });

        let plan = ExecutionPlan::build(&nodes).unwrap();
        let mut context = ExecutionContext::new(json!({ "name": "ada", "count": 1 }));
        let recorder = Recorder::default();

        let results = scheduler()
            .run(&plan, &mut context, &recorder, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(results.len(), 4);
        assert_eq!(results["b"], json!("hello ada"));
        assert_eq!(results["c"], json!(2));
        assert_eq!(
            results["d"],
            json!({ "a": { "name": "ada", "count": 1 }, "b": "hello ada", "c": 2 })
        );
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start:a", "ok:a", "start:b", "ok:b", "start:c", "ok:c", "start:d", "ok:d"]
        );
    }

    #[tokio::test]
    async fn first_failure_stops_the_run() {
        let nodes = vec![
            node("a", NodeType::Start, &["b"]),
            node("b", NodeType::Unknown("fax".to_string()), &["c"]),
            node("c", NodeType::End, &[]),
        ];
        let plan = ExecutionPlan::build(&nodes).unwrap();
        let mut context = ExecutionContext::new(json!({}));
        let recorder = Recorder::default();

        let err = scheduler()
            .run(&plan, &mut context, &recorder, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, EngineError::Definition(DefinitionError::UnknownNodeType { .. })));
        assert_eq!(
            *recorder.events.lock().unwrap(),
            vec!["start:a", "ok:a", "start:b", "err:b"]
        );
        assert!(context.variables.contains_key("a"));
        assert!(!context.variables.contains_key("c"));
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_the_next_node() {
        let nodes = vec![node("a", NodeType::Start, &[])];
        let plan = ExecutionPlan::build(&nodes).unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = scheduler()
            .run(&plan, &mut ExecutionContext::default(), &NoopObserver, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }
}
