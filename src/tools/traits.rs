use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Description of a tool for the LLM
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

/// A remote collection of tools the agent can call.
#[async_trait]
pub trait ToolSource: Send + Sync {
    /// Source name, used as the author of tool-response events.
    fn name(&self) -> &str;

    /// Tool declarations. May connect on first use.
    async fn tools(&self) -> anyhow::Result<Vec<ToolSpec>>;

    /// Invoke one tool and flatten its result to text.
    async fn call(&self, name: &str, arguments: serde_json::Value) -> anyhow::Result<String>;
}
