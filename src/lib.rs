//! MCP relay library
//!
//! A JSON-RPC protocol engine for the Model Context Protocol: the message
//! model, a newline-delimited transport, a server-side dispatcher and a
//! client that supervises a tool-provider subprocess.

pub mod config;
pub mod error;
pub mod mcp;

pub use config::Config;
pub use error::{RelayError, Result};
pub use mcp::client::{ConnectionState, McpClient, ServerCommand};
pub use mcp::registry::CapabilityRegistry;
pub use mcp::server::{McpServer, ServerState};
pub use mcp::transport::{StdioTransport, Transport};
