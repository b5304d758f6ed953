//! MCP client over the streamable HTTP transport.

pub mod protocol;
pub mod toolset;
pub mod transport;

pub use toolset::McpToolset;
pub use transport::{StreamableHttpTransport, TransportError};
