//! Tool traits

use async_trait::async_trait;
use secrecy::SecretString;
use serde_json::Value;

use crate::error::Result;

/// A named operation sandboxed code may ask the host to perform
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Run the tool. `params` always carries the caller's `token` field.
    async fn call(&self, params: Value) -> Result<Value>;
}

/// Call-by-name entry point for tools, authenticated by the caller's token
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Invoke `name` with `params` on behalf of the token holder
    async fn invoke(&self, name: &str, params: Value, token: &SecretString) -> Result<Value>;

    /// Names of every registered tool, sorted
    fn tool_names(&self) -> Vec<String>;
}
