//! A remote MCP server exposed as a [`ToolSource`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicI64, Ordering};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::protocol::{
    CallToolResult, JsonRpcRequest, ListToolsResult, METHOD_CALL_TOOL, METHOD_INITIALIZE,
    METHOD_INITIALIZED, METHOD_LIST_TOOLS, PROTOCOL_VERSION,
};
use super::transport::StreamableHttpTransport;
use crate::config::ToolServerSpec;
use crate::tools::traits::{ToolSource, ToolSpec};

/// Upper bound on `tools/list` pages followed per handshake.
const MAX_LIST_PAGES: usize = 16;

pub struct McpToolset {
    name: String,
    transport: StreamableHttpTransport,
    request_id: AtomicI64,
    /// Set after a successful handshake and listing. Failures leave it empty.
    tools: OnceCell<Vec<ToolSpec>>,
}

impl McpToolset {
    pub fn new(spec: &ToolServerSpec) -> anyhow::Result<Self> {
        Ok(Self {
            name: spec.name.clone(),
            transport: StreamableHttpTransport::new(&spec.url, spec.timeout)?,
            request_id: AtomicI64::new(1),
            tools: OnceCell::new(),
        })
    }

    fn next_id(&self) -> i64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> anyhow::Result<serde_json::Value> {
        let id = self.next_id();
        let mut request = JsonRpcRequest::new(id, method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        debug!(server = %self.name, method, id, "Sending MCP request");
        let response = self.transport.send(&request).await?;

        if let Some(err) = response.error {
            anyhow::bail!(
                "MCP server {} rejected {method} ({}): {}",
                self.name,
                err.code,
                err.message
            );
        }
        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    async fn connect(&self) -> anyhow::Result<Vec<ToolSpec>> {
        let params = serde_json::json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": {},
            "clientInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION")
            }
        });
        self.request(METHOD_INITIALIZE, Some(params)).await?;
        self.transport
            .notify(&JsonRpcRequest::notification(METHOD_INITIALIZED))
            .await?;

        let mut specs = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..MAX_LIST_PAGES {
            let params = cursor
                .as_ref()
                .map(|c| serde_json::json!({ "cursor": c }));
            let page: ListToolsResult =
                serde_json::from_value(self.request(METHOD_LIST_TOOLS, params).await?)?;

            specs.extend(page.tools.into_iter().map(|t| ToolSpec {
                description: t.description.unwrap_or_default(),
                name: t.name,
                parameters: t.input_schema,
            }));

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        info!(
            server = %self.name,
            url = %self.transport.url(),
            tools = specs.len(),
            "MCP tool source connected"
        );
        Ok(specs)
    }
}

#[async_trait]
impl ToolSource for McpToolset {
    fn name(&self) -> &str {
        &self.name
    }

    async fn tools(&self) -> anyhow::Result<Vec<ToolSpec>> {
        self.tools
            .get_or_try_init(|| self.connect())
            .await
            .cloned()
    }

    async fn call(&self, name: &str, arguments: serde_json::Value) -> anyhow::Result<String> {
        // Make sure the session handshake happened.
        self.tools().await?;

        let params = serde_json::json!({ "name": name, "arguments": arguments });
        let result: CallToolResult =
            serde_json::from_value(self.request(METHOD_CALL_TOOL, Some(params)).await?)?;
        Ok(result.to_text())
    }
}
