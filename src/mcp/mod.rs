//! MCP (Model Context Protocol) module
//!
//! Wire types, the line transport, the server dispatcher and the client.

pub mod client;
pub mod registry;
pub mod server;
pub mod tools;
pub mod transport;
pub mod types;
