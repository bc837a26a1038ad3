//! Error types for the MCP relay
//!
//! This module defines the error hierarchy for every layer of the engine:
//! transport, dispatcher, client, capability registry and configuration.
//! Protocol-level error codes live with the wire types in `mcp::types`.

use thiserror::Error;

use crate::mcp::types::{error_codes, JsonRpcError, JsonRpcResponse, RequestId};

/// Main error type for the MCP relay
#[derive(Error, Debug)]
pub enum RelayError {
    /// Transport errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Client / process supervisor errors
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    /// Server dispatcher errors
    #[error("Server error: {0}")]
    Server(#[from] ServerError),

    /// Capability registration errors
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Handler errors
    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to turn one inbound line into a message
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The line is not JSON at all
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Valid JSON that is not a well-formed request, response or notification
    #[error("Invalid request: {reason}")]
    Invalid {
        id: Option<RequestId>,
        reason: String,
    },
}

impl DecodeError {
    pub fn code(&self) -> i32 {
        match self {
            DecodeError::Parse(_) => error_codes::PARSE_ERROR,
            DecodeError::Invalid { .. } => error_codes::INVALID_REQUEST,
        }
    }

    /// The error response a server sends back for this line.
    pub fn to_response(&self) -> JsonRpcResponse {
        let error = JsonRpcError::new(self.code(), self.to_string());
        match self {
            DecodeError::Invalid { id: Some(id), .. } => JsonRpcResponse::error(id.clone(), error),
            _ => JsonRpcResponse::unattributed(error),
        }
    }
}

/// Line transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("transport '{label}' is closed")]
    Closed { label: String },

    #[error("transport '{label}' was already started")]
    AlreadyStarted { label: String },

    #[error("message contains an embedded newline")]
    EmbeddedNewline,

    #[error("I/O failure on transport '{label}': {source}")]
    Io {
        label: String,
        #[source]
        source: std::io::Error,
    },
}

/// Server dispatcher errors
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("server cannot start from state {state}")]
    InvalidState { state: &'static str },

    #[error("failed to start transport: {0}")]
    Transport(#[from] TransportError),
}

/// Client and process supervisor errors
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("client is not connected (state: {state})")]
    NotConnected { state: &'static str },

    #[error("client is already {state}")]
    AlreadyStarted { state: &'static str },

    #[error("failed to spawn server '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server initialization failed: {reason}")]
    InitFailed { reason: String },

    #[error("call '{method}' timed out after {timeout_ms}ms")]
    Timeout { method: String, timeout_ms: u64 },

    #[error("connection to server lost")]
    ConnectionLost,

    #[error("server error [{}]: {}", .0.code, .0.message)]
    Server(JsonRpcError),

    #[error("unexpected result shape for '{method}': {source}")]
    InvalidResult {
        method: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("failed to encode request: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Capability registration errors
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("{kind} already registered: {key}")]
    Duplicate { kind: &'static str, key: String },
}

/// Errors returned by tool, resource and prompt handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("{0}")]
    Failed(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: String, value: String },
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

impl From<validator::ValidationErrors> for HandlerError {
    fn from(err: validator::ValidationErrors) -> Self {
        HandlerError::InvalidArguments(err.to_string())
    }
}

impl HandlerError {
    /// Map a handler failure onto its JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        match self {
            HandlerError::InvalidArguments(message) => JsonRpcError::invalid_params(message.clone()),
            HandlerError::Failed(message) => JsonRpcError::internal_error(message.clone()),
        }
    }
}
