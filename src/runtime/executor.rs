/// Node execution handlers
///
/// One handler per node type:
/// - start: passes the trigger input through
/// - http_request: outbound HTTP call via reqwest
/// - data_transform: template or expression reshaping
/// - condition: boolean branch evaluation
/// - delay: cancellable sleep
/// - email: simulated delivery
/// - end: snapshot of all variables
///
/// Handlers receive the node's template-resolved config and a read-only view
/// of the context. They never mutate the context; the scheduler records
/// their output.

use crate::error::{DefinitionError, EngineError, EngineResult};
use crate::runtime::expression::{self, Expression};
use crate::workflow::types::{ExecutionContext, Node, NodeType};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Delay used when a delay node has no usable `duration`
pub const DEFAULT_DELAY_MS: u64 = 1000;

/// Node executor that dispatches on node type
///
/// Holds the shared HTTP client; one executor serves every concurrent run.
#[derive(Debug, Clone)]
pub struct NodeExecutor {
    /// Pooled HTTP client for http_request nodes
    client: reqwest::Client,
    /// Timeout applied to http_request nodes without `timeout_ms`
    http_timeout: Duration,
}

impl NodeExecutor {
    pub fn new(http_timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            http_timeout,
        }
    }

    /// Execute a single node with its resolved config
    ///
    /// Returns the node output for downstream nodes. Unknown node types fail
    /// with a definition error.
    pub async fn execute_node(
        &self,
        node: &Node,
        config: &Value,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> EngineResult<Value> {
        tracing::debug!("🚀 Executing node '{}' (type: {})", node.id, node.node_type);

        match &node.node_type {
            NodeType::Start => Ok(context.input.clone()),
            NodeType::HttpRequest => self.execute_http_request(node, config, cancel).await,
            NodeType::DataTransform => execute_data_transform(node, config, context),
            NodeType::Condition => Ok(execute_condition(node, config, context)),
            NodeType::Delay => execute_delay(node, config, cancel).await,
            NodeType::Email => Ok(execute_email(node, config)),
            NodeType::End => Ok(Value::Object(context.variables.clone())),
            NodeType::Unknown(type_name) => Err(DefinitionError::UnknownNodeType {
                node_id: node.id.clone(),
                type_name: type_name.clone(),
            }
            .into()),
        }
    }

    /// Execute http_request node
    ///
    /// Non-2xx responses are not failures; the status is surfaced in the
    /// output. Network errors, timeouts and cancellation fail the node.
    async fn execute_http_request(
        &self,
        node: &Node,
        config: &Value,
        cancel: &CancellationToken,
    ) -> EngineResult<Value> {
        let url = config
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::executor(&node.id, "http_request missing 'url'"))?;

        let method_name = config
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("GET")
            .to_uppercase();
        let method = reqwest::Method::from_bytes(method_name.as_bytes()).map_err(|_| {
            EngineError::executor(&node.id, format!("unsupported HTTP method: {method_name}"))
        })?;

        let timeout = config
            .get("timeout_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis)
            .unwrap_or(self.http_timeout);

        tracing::debug!("🌍 HTTP Request: {} {} (timeout {:?})", method, url, timeout);

        let mut request = self.client.request(method.clone(), url).timeout(timeout);

        if let Some(headers) = config.get("headers").and_then(Value::as_object) {
            for (key, value) in headers {
                let header_value = match value {
                    Value::String(s) => s.clone(),
                    Value::Null => continue,
                    other => other.to_string(),
                };
                request = request.header(key.as_str(), header_value);
            }
        }

        match config.get("body") {
            None | Some(Value::Null) => {}
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(body) => request = request.json(body),
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            response = request.send() => response
                .map_err(|e| EngineError::executor(&node.id, format!("HTTP request failed: {e}")))?,
        };

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|s| (k.to_string(), s.to_string())))
            .collect();

        let text = tokio::select! {
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            text = response.text() => text
                .map_err(|e| EngineError::executor(&node.id, format!("failed to read response body: {e}")))?,
        };

        // JSON when it parses, raw text otherwise
        let data = serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text));

        tracing::info!("📡 HTTP request completed: {} {} (status: {})", method, url, status);

        Ok(json!({
            "status": status.as_u16(),
            "headers": headers,
            "data": data,
        }))
    }
}

/// Execute data_transform node
///
/// `transform` has already been template-resolved and is returned as is.
/// `expression` is evaluated with the restricted expression language. With
/// neither, the variables pass through unchanged.
fn execute_data_transform(
    node: &Node,
    config: &Value,
    context: &ExecutionContext,
) -> EngineResult<Value> {
    if let Some(transform) = config.get("transform").filter(|v| !v.is_null()) {
        return Ok(transform.clone());
    }

    if let Some(source) = config.get("expression").and_then(Value::as_str) {
        return expression::evaluate_str(source, context)
            .map_err(|e| EngineError::executor(&node.id, format!("transform expression failed: {e}")));
    }

    Ok(Value::Object(context.variables.clone()))
}

/// Execute condition node
///
/// Never fails. A string condition is parsed as an expression; if it does not
/// parse, the string's own truthiness decides. Evaluation errors count as
/// false. Non-string conditions are coerced directly.
fn execute_condition(node: &Node, config: &Value, context: &ExecutionContext) -> Value {
    let condition = config.get("condition").cloned().unwrap_or(Value::Null);

    let result = match &condition {
        Value::String(source) => match Expression::parse(source) {
            Ok(parsed) => match parsed.evaluate(context) {
                Ok(value) => expression::is_truthy(&value),
                Err(e) => {
                    tracing::warn!("⚠️ Condition on node '{}' failed to evaluate: {}", node.id, e);
                    false
                }
            },
            Err(_) => expression::is_truthy(&condition),
        },
        other => expression::is_truthy(other),
    };

    tracing::debug!("🔀 Condition on node '{}' evaluated to {}", node.id, result);

    json!({
        "condition": condition,
        "result": result,
        "branch": if result { "true" } else { "false" },
    })
}

/// Execute delay node
async fn execute_delay(node: &Node, config: &Value, cancel: &CancellationToken) -> EngineResult<Value> {
    let duration = match config.get("duration") {
        None | Some(Value::Null) => DEFAULT_DELAY_MS,
        Some(value) => delay_millis(value).ok_or_else(|| {
            EngineError::executor(&node.id, format!("invalid delay duration {value}"))
        })?,
    };

    tracing::debug!("⏳ Delaying node '{}' for {}ms", node.id, duration);

    tokio::select! {
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        _ = tokio::time::sleep(Duration::from_millis(duration)) => Ok(json!({
            "delayed": true,
            "duration": duration,
        })),
    }
}

/// Milliseconds from a numeric or numeric-string duration
///
/// Fractions round to the nearest millisecond and negatives clamp to zero.
fn delay_millis(value: &Value) -> Option<u64> {
    let millis = match value {
        Value::Number(n) => match n.as_u64() {
            Some(exact) => return Some(exact),
            None => n.as_f64()?,
        },
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !millis.is_finite() {
        return None;
    }
    Some(millis.round().max(0.0) as u64)
}

/// Execute email node
///
/// Delivery is simulated; the resolved message is echoed back.
fn execute_email(node: &Node, config: &Value) -> Value {
    let field = |key: &str| config.get(key).cloned().unwrap_or(Value::Null);
    let (to, subject, body) = (field("to"), field("subject"), field("body"));

    tracing::info!("📧 Simulated email from node '{}' to {}", node.id, to);

    let mut output = Map::new();
    output.insert("sent".to_string(), Value::Bool(true));
    output.insert("to".to_string(), to);
    output.insert("subject".to_string(), subject);
    output.insert("body".to_string(), body);
    Value::Object(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn node(id: &str, node_type: NodeType, data: Value) -> Node {
        Node {
            id: id.to_string(),
            node_type,
            data,
            connections: vec![],
        }
    }

    fn context() -> ExecutionContext {
        let mut context = ExecutionContext::new(json!({ "user": "ada" }));
        context
            .variables
            .insert("fetch".to_string(), json!({ "status": 404, "data": { "total": 21 } }));
        context
    }

    async fn run(node: &Node, context: &ExecutionContext) -> EngineResult<Value> {
        let executor = NodeExecutor::new(Duration::from_secs(5));
        executor
            .execute_node(node, &node.data, context, &CancellationToken::new())
            .await
    }

    #[tokio::test]
    async fn start_outputs_input_verbatim() {
        let output = run(&node("a", NodeType::Start, Value::Null), &context()).await.unwrap();
        assert_eq!(output, json!({ "user": "ada" }));
    }

    #[tokio::test]
    async fn end_snapshots_variables() {
        let output = run(&node("z", NodeType::End, Value::Null), &context()).await.unwrap();
        assert_eq!(output, json!({ "fetch": { "status": 404, "data": { "total": 21 } } }));
    }

    #[tokio::test]
    async fn condition_branch_matches_result() {
        let ctx = context();
        for (condition, expected) in [
            (json!("fetch.status == 404"), true),
            (json!("fetch.status < 300"), false),
            (json!(true), true),
            (json!(0), false),
            (json!("yes please"), true),
            (json!("fetch.data.total * 'x'"), false),
            (Value::Null, false),
        ] {
            let n = node("c", NodeType::Condition, json!({ "condition": condition }));
            let output = run(&n, &ctx).await.unwrap();
            assert_eq!(output["result"], json!(expected), "condition {condition}");
            assert_eq!(output["branch"], json!(if expected { "true" } else { "false" }));
            assert_eq!(output["condition"], condition);
        }
    }

    #[tokio::test]
    async fn data_transform_modes() {
        let ctx = context();

        let templated = node("t", NodeType::DataTransform, json!({ "transform": "total is 21" }));
        assert_eq!(run(&templated, &ctx).await.unwrap(), json!("total is 21"));

        let computed = node("t", NodeType::DataTransform, json!({ "expression": "fetch.data.total * 2" }));
        assert_eq!(run(&computed, &ctx).await.unwrap(), json!(42));

        let passthrough = node("t", NodeType::DataTransform, json!({}));
        assert_eq!(run(&passthrough, &ctx).await.unwrap(), Value::Object(ctx.variables.clone()));
    }

    #[tokio::test]
    async fn failing_transform_expression_fails_the_node() {
        let broken = node("t", NodeType::DataTransform, json!({ "expression": "fetch.status +" }));
        let err = run(&broken, &context()).await.unwrap_err();
        assert!(matches!(err, EngineError::Executor { ref node_id, .. } if node_id == "t"));
    }

    #[tokio::test]
    async fn delay_waits_and_reports_duration() {
        let started = Instant::now();
        let output = run(&node("d", NodeType::Delay, json!({ "duration": 100 })), &context())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(100));
        assert_eq!(output, json!({ "delayed": true, "duration": 100 }));
    }

    #[tokio::test]
    async fn delay_rounds_and_clamps_odd_durations() {
        for (duration, expected) in [
            (json!(1.5), 2),
            (json!(-5), 0),
            (json!("25"), 25),
            (json!(" 2.4 "), 2),
            (Value::Null, DEFAULT_DELAY_MS),
        ] {
            let n = node("d", NodeType::Delay, json!({ "duration": duration }));
            let output = run(&n, &context()).await.unwrap();
            assert_eq!(output["duration"], expected, "duration {duration}");
        }
    }

    #[tokio::test]
    async fn delay_rejects_unusable_durations() {
        for duration in [json!("soon"), json!(true), json!({ "ms": 5 }), json!("NaN")] {
            let n = node("d", NodeType::Delay, json!({ "duration": duration }));
            let err = run(&n, &context()).await.unwrap_err();
            assert!(
                matches!(err, EngineError::Executor { ref node_id, ref message } if node_id == "d" && message.contains("invalid delay duration")),
                "duration {duration}: {err}"
            );
        }
    }

    #[tokio::test]
    async fn deeply_nested_expressions_do_not_crash() {
        let deep = format!("{}1{}", "(".repeat(300), ")".repeat(300));

        let condition = node("c", NodeType::Condition, json!({ "condition": deep }));
        let output = run(&condition, &context()).await.unwrap();
        assert!(output["result"].is_boolean());

        let transform = node("t", NodeType::DataTransform, json!({ "expression": deep }));
        let err = run(&transform, &context()).await.unwrap_err();
        assert!(matches!(err, EngineError::Executor { ref node_id, .. } if node_id == "t"));
    }

    #[tokio::test]
    async fn delay_is_cancellable() {
        let executor = NodeExecutor::new(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        let n = node("d", NodeType::Delay, json!({ "duration": 60_000 }));

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = executor
            .execute_node(&n, &n.data, &context(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn email_is_simulated() {
        let n = node(
            "e",
            NodeType::Email,
            json!({ "to": "ada@example.com", "subject": "Hi", "body": "Welcome" }),
        );
        assert_eq!(
            run(&n, &context()).await.unwrap(),
            json!({ "sent": true, "to": "ada@example.com", "subject": "Hi", "body": "Welcome" })
        );
    }

    #[tokio::test]
    async fn unknown_type_is_a_definition_error() {
        let n = node("x", NodeType::Unknown("sms".to_string()), Value::Null);
        let err = run(&n, &context()).await.unwrap_err();
        assert!(matches!(
            err,
            EngineError::Definition(DefinitionError::UnknownNodeType { ref type_name, .. }) if type_name == "sms"
        ));
    }

    #[tokio::test]
    async fn http_request_requires_url() {
        let n = node("h", NodeType::HttpRequest, json!({ "method": "GET" }));
        let err = run(&n, &context()).await.unwrap_err();
        assert!(err.to_string().contains("missing 'url'"));
    }
}
