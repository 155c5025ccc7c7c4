/// Template resolution for node configuration
///
/// Substitutes `{{path.to.value}}` placeholders with outputs of previously
/// executed nodes. Resolution is plain path lookup against the context
/// variables; nothing inside a token is ever evaluated.

use crate::workflow::types::ExecutionContext;
use regex::{Captures, Regex};
use serde_json::Value;
use std::sync::LazyLock;

static TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{([^}]+)\}\}").expect("template token pattern is valid"));

/// Resolve every placeholder in `template`, preserving its shape
///
/// Strings are substituted, objects and arrays are resolved recursively,
/// and every other value is returned unchanged.
pub fn resolve(template: &Value, context: &ExecutionContext) -> Value {
    match template {
        Value::String(text) => resolve_string(text, context),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), resolve(value, context)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|item| resolve(item, context)).collect()),
        other => other.clone(),
    }
}

/// Resolve placeholders in a single string
///
/// A string that is exactly one resolvable token yields the referenced value
/// itself, keeping its JSON type. Otherwise each resolvable token is replaced
/// by its text form and unresolvable tokens are left as written.
pub fn resolve_string(text: &str, context: &ExecutionContext) -> Value {
    if let Some(whole) = TOKEN.captures(text) {
        if whole.get(0).map(|m| m.len()) == Some(text.len()) {
            if let Some(value) = lookup(&whole[1], context) {
                return value.clone();
            }
        }
    }

    let replaced = TOKEN.replace_all(text, |caps: &Captures| match lookup(&caps[1], context) {
        Some(Value::String(s)) => s.clone(),
        Some(value) => value.to_string(),
        None => caps[0].to_string(),
    });
    Value::String(replaced.into_owned())
}

fn lookup<'c>(expr: &str, context: &'c ExecutionContext) -> Option<&'c Value> {
    context.lookup(expr.trim().split('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> ExecutionContext {
        let mut context = ExecutionContext::new(json!({ "email": "ada@example.com" }));
        context
            .variables
            .insert("node1".to_string(), json!({ "data": { "email": "ada@example.com", "age": 36 } }));
        context
            .variables
            .insert("list".to_string(), json!({ "items": ["zero", "one"] }));
        context
    }

    #[test]
    fn strings_without_tokens_are_unchanged() {
        let ctx = context();
        assert_eq!(resolve(&json!("plain text"), &ctx), json!("plain text"));
        assert_eq!(resolve(&json!("{ not a token }"), &ctx), json!("{ not a token }"));
    }

    #[test]
    fn unresolved_paths_keep_the_literal_token() {
        let ctx = context();
        assert_eq!(resolve(&json!("{{missing.path}}"), &ctx), json!("{{missing.path}}"));
        assert_eq!(
            resolve(&json!("hi {{node1.data.nope}} there"), &ctx),
            json!("hi {{node1.data.nope}} there")
        );
    }

    #[test]
    fn embedded_tokens_are_substituted() {
        let ctx = context();
        assert_eq!(
            resolve(&json!("mailto:{{ node1.data.email }} ({{node1.data.age}})"), &ctx),
            json!("mailto:ada@example.com (36)")
        );
        assert_eq!(resolve(&json!("second={{list.items.1}}"), &ctx), json!("second=one"));
    }

    #[test]
    fn whole_token_keeps_the_value_type() {
        let ctx = context();
        assert_eq!(resolve(&json!("{{node1.data.age}}"), &ctx), json!(36));
        assert_eq!(
            resolve(&json!("{{node1.data}}"), &ctx),
            json!({ "email": "ada@example.com", "age": 36 })
        );
    }

    #[test]
    fn objects_and_arrays_resolve_recursively() {
        let ctx = context();
        let template = json!({
            "to": "{{node1.data.email}}",
            "headers": { "x-age": "{{node1.data.age}}" },
            "list": ["{{list.items.0}}", 7, null],
            "retries": 3
        });
        assert_eq!(
            resolve(&template, &ctx),
            json!({
                "to": "ada@example.com",
                "headers": { "x-age": 36 },
                "list": ["zero", 7, null],
                "retries": 3
            })
        );
    }

    #[test]
    fn token_content_is_not_evaluated() {
        let ctx = context();
        assert_eq!(resolve(&json!("{{1 + 1}}"), &ctx), json!("{{1 + 1}}"));
    }
}
