//! Configuration management for the MCP relay
//!
//! Timeouts and identities, with overrides from environment variables.

use std::time::Duration;

use crate::error::ConfigError;
use crate::mcp::types::Implementation;

/// Default per-call timeout
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for the `initialize` handshake
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a stopped child gets to exit before it is killed
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Configuration for the MCP relay
#[derive(Debug, Clone)]
pub struct Config {
    /// Timeout applied by `McpClient::request` and the typed helpers
    pub call_timeout: Duration,

    /// Timeout for the `initialize` call made by `start`
    pub init_timeout: Duration,

    /// Grace period between closing a child's pipes and killing it
    pub shutdown_grace: Duration,

    /// `serverInfo` reported by the dispatcher
    pub server_info: Implementation,

    /// `clientInfo` sent by the client
    pub client_info: Implementation,
}

impl Config {
    /// Build a configuration from the defaults plus `MCP_RELAY_*` overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64>(&lookup, "MCP_RELAY_CALL_TIMEOUT_SECS")? {
            config.call_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64>(&lookup, "MCP_RELAY_INIT_TIMEOUT_SECS")? {
            config.init_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "MCP_RELAY_SHUTDOWN_GRACE_MS")? {
            config.shutdown_grace = Duration::from_millis(ms);
        }
        if let Some(name) = lookup("MCP_RELAY_SERVER_NAME").filter(|n| !n.is_empty()) {
            config.server_info.name = name;
        }
        if let Some(name) = lookup("MCP_RELAY_CLIENT_NAME").filter(|n| !n.is_empty()) {
            config.client_info.name = name;
        }

        Ok(config)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            }),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            call_timeout: DEFAULT_CALL_TIMEOUT,
            init_timeout: DEFAULT_INIT_TIMEOUT,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            server_info: Implementation::new("mcp-relay", env!("CARGO_PKG_VERSION")),
            client_info: Implementation::new("mcp-relay-client", env!("CARGO_PKG_VERSION")),
        }
    }
}
