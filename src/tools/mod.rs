//! Tool sources the agent can call during a turn.
//!
//! Every source implements [`ToolSource`]. The only implementation is
//! [`McpToolset`], a remote MCP server reached over streamable HTTP; one is
//! created per configured tool server by [`tool_sources_for`].

pub mod mcp;
pub mod traits;

pub use mcp::McpToolset;
pub use traits::{ToolSource, ToolSpec};

use crate::config::ToolServerSpec;
use std::sync::Arc;

/// Create one tool source handle per configured server. No network I/O happens here.
pub fn tool_sources_for(servers: &[ToolServerSpec]) -> anyhow::Result<Vec<Arc<dyn ToolSource>>> {
    servers
        .iter()
        .map(|spec| Ok(Arc::new(McpToolset::new(spec)?) as Arc<dyn ToolSource>))
        .collect()
}
