//! # mcplink-mcp
//!
//! MCP (Model Context Protocol) client for mcplink.
//!
//! This crate provides:
//! - JSON-RPC 2.0 and MCP protocol types
//! - stdio and HTTP+SSE transports
//! - Connections, the multi-server client and the `mcpServers` file format
//! - Server lifecycle management and tool routing for the agent

pub mod client;
pub mod discovery;
pub mod error;
pub mod protocol;
pub mod servers;
pub mod sse;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod testing;

pub use client::{ConnectionState, McpClient, McpConnection, McpServerConfig, TransportConfig};
pub use discovery::{McpServerManager, ServerStatus, StartReport};
pub use error::{McpError, TransportError};
pub use servers::ServersFile;
pub use sse::SseTransport;
pub use tools::McpToolRouter;
pub use transport::{StdioTransport, Transport};
