//! Tool dispatcher - routes invocations to registered handlers

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Error, Result};

use super::traits::{ToolHandler, ToolInvoker};

/// Registry of tool handlers keyed by name
#[derive(Default)]
pub struct ToolDispatcher {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolDispatcher {
    /// Create a new empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name
    pub fn register<T: ToolHandler + 'static>(&mut self, tool: T) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<&dyn ToolHandler> {
        self.tools.get(name).map(|t| t.as_ref())
    }

    /// Get tool count
    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// (name, description) pairs, sorted by name
    pub fn describe(&self) -> Vec<(String, String)> {
        let mut tools: Vec<(String, String)> = self
            .tools
            .values()
            .map(|t| (t.name().to_string(), t.description().to_string()))
            .collect();
        tools.sort();
        tools
    }
}

/// Add the token to the params object. Non-object params are wrapped as
/// `{ "params": <value> }`.
fn with_token(params: Value, token: &SecretString) -> Value {
    let mut object = match params {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => Map::from_iter([("params".to_string(), other)]),
    };
    object.insert(
        "token".to_string(),
        Value::String(token.expose_secret().to_string()),
    );
    Value::Object(object)
}

/// Tools may answer `{ "data": ... }`; callers only see the payload
fn unwrap_data(result: Value) -> Value {
    match result {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl ToolInvoker for ToolDispatcher {
    async fn invoke(&self, name: &str, params: Value, token: &SecretString) -> Result<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::NotFound(format!("Tool not found: {}", name)))?;

        debug!(tool = name, "Invoking tool");
        let result = tool.call(with_token(params, token)).await?;
        Ok(unwrap_data(result))
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool;

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Return the params"
        }

        async fn call(&self, params: Value) -> Result<Value> {
            Ok(json!({ "data": params }))
        }
    }

    struct CountTool;

    #[async_trait]
    impl ToolHandler for CountTool {
        fn name(&self) -> &str {
            "count"
        }

        fn description(&self) -> &str {
            "Count things"
        }

        async fn call(&self, _params: Value) -> Result<Value> {
            Ok(json!(3))
        }
    }

    fn token() -> SecretString {
        SecretString::from("tok-1".to_string())
    }

    #[tokio::test]
    async fn test_invoke_merges_token_and_unwraps_data() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(EchoTool);

        let result = dispatcher
            .invoke("echo", json!({ "limit": 5 }), &token())
            .await
            .unwrap();

        assert_eq!(result, json!({ "limit": 5, "token": "tok-1" }));
    }

    #[tokio::test]
    async fn test_result_without_envelope_passes_through() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(CountTool);

        let result = dispatcher.invoke("count", Value::Null, &token()).await.unwrap();
        assert_eq!(result, json!(3));
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let dispatcher = ToolDispatcher::new();
        let err = dispatcher
            .invoke("missing", json!({}), &token())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::NotFound(_)));
        assert_eq!(err.to_string(), "Not found: Tool not found: missing");
    }

    #[test]
    fn test_names_are_sorted() {
        let mut dispatcher = ToolDispatcher::new();
        dispatcher.register(EchoTool);
        dispatcher.register(CountTool);

        assert_eq!(dispatcher.tool_names(), vec!["count", "echo"]);
        assert_eq!(dispatcher.count(), 2);
        assert_eq!(dispatcher.describe()[1].1, "Return the params");
    }

    #[test]
    fn test_non_object_params_are_wrapped() {
        let merged = with_token(json!([1, 2]), &token());
        assert_eq!(merged, json!({ "params": [1, 2], "token": "tok-1" }));
    }
}
