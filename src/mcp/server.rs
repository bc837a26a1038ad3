//! MCP Server implementation
//!
//! Reads lines from a [`Transport`], decodes them once, routes requests
//! through a static method table onto the [`CapabilityRegistry`] and writes
//! the responses back. Each request runs on its own task so a slow or
//! panicking handler never stalls the read loop.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinError, JoinHandle, JoinSet};

use crate::error::ServerError;
use crate::mcp::registry::CapabilityRegistry;
use crate::mcp::transport::Transport;
use crate::mcp::types::*;

/// MCP Server info
const SERVER_NAME: &str = "mcp-relay";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Observable lifecycle of a server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Created,
    Listening,
    Stopped,
}

impl ServerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerState::Created => "created",
            ServerState::Listening => "listening",
            ServerState::Stopped => "stopped",
        }
    }
}

enum Lifecycle {
    Created,
    Listening {
        transport: Arc<dyn Transport>,
        task: JoinHandle<()>,
    },
    Stopped,
}

impl Lifecycle {
    fn state(&self) -> ServerState {
        match self {
            Lifecycle::Created => ServerState::Created,
            Lifecycle::Listening { .. } => ServerState::Listening,
            Lifecycle::Stopped => ServerState::Stopped,
        }
    }
}

/// MCP Server: dispatcher bound to one transport at a time
pub struct McpServer {
    dispatcher: Arc<Dispatcher>,
    lifecycle: Mutex<Lifecycle>,
}

struct Dispatcher {
    registry: CapabilityRegistry,
    server_info: Implementation,
    initialized: AtomicBool,
    closed: watch::Sender<bool>,
}

impl McpServer {
    /// Create a new MCP server over the given capabilities
    pub fn new(registry: CapabilityRegistry) -> Self {
        Self::with_info(registry, Implementation::new(SERVER_NAME, SERVER_VERSION))
    }

    /// Create a server that reports a custom `serverInfo`
    pub fn with_info(registry: CapabilityRegistry, server_info: Implementation) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            dispatcher: Arc::new(Dispatcher {
                registry,
                server_info,
                initialized: AtomicBool::new(false),
                closed,
            }),
            lifecycle: Mutex::new(Lifecycle::Created),
        }
    }

    pub async fn state(&self) -> ServerState {
        self.lifecycle.lock().await.state()
    }

    /// Whether the client has sent `notifications/initialized`
    pub fn is_initialized(&self) -> bool {
        self.dispatcher.initialized.load(Ordering::SeqCst)
    }

    /// Start the transport and begin dispatching. Only valid from `Created`.
    pub async fn start(&self, transport: Arc<dyn Transport>) -> Result<(), ServerError> {
        let mut lifecycle = self.lifecycle.lock().await;
        if !matches!(*lifecycle, Lifecycle::Created) {
            return Err(ServerError::InvalidState {
                state: lifecycle.state().as_str(),
            });
        }

        transport.start().await?;

        let task = tokio::spawn(run_loop(self.dispatcher.clone(), transport.clone()));
        *lifecycle = Lifecycle::Listening { transport, task };

        tracing::info!(server = %self.dispatcher.server_info.name, "MCP server listening");
        Ok(())
    }

    /// Resolves once the inbound stream has ended or the server was stopped.
    pub async fn closed(&self) {
        let mut rx = self.dispatcher.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Cancel the read loop and every in-flight handler, then release the
    /// transport. Safe to call from any state, any number of times.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.lifecycle.lock().await, Lifecycle::Stopped);

        if let Lifecycle::Listening { transport, task } = previous {
            task.abort();
            transport.stop().await;
            tracing::info!("MCP server stopped");
        }

        self.dispatcher.closed.send_replace(true);
    }

    /// Run until the peer closes the stream, then stop.
    pub async fn serve(&self, transport: Arc<dyn Transport>) -> Result<(), ServerError> {
        self.start(transport).await?;
        self.closed().await;
        self.stop().await;
        Ok(())
    }

    /// Handle one raw line inline and return the response to send, if any.
    pub async fn handle_message(&self, line: &str) -> Option<JsonRpcResponse> {
        match JsonRpcMessage::decode(line) {
            Ok(JsonRpcMessage::Request(request)) => Some(self.dispatcher.clone().run_request(request).await),
            Ok(JsonRpcMessage::Notification(notification)) => {
                self.dispatcher.handle_notification(notification);
                None
            }
            Ok(JsonRpcMessage::Response(response)) => {
                self.dispatcher.ignore_response(response);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "undecodable message");
                Some(e.to_response())
            }
        }
    }
}

async fn run_loop(dispatcher: Arc<Dispatcher>, transport: Arc<dyn Transport>) {
    // Dropping the set (on abort) cancels every in-flight handler.
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            line = transport.receive() => {
                let Some(line) = line else { break };
                match JsonRpcMessage::decode(&line) {
                    Ok(JsonRpcMessage::Request(request)) => {
                        let dispatcher = dispatcher.clone();
                        let transport = transport.clone();
                        in_flight.spawn(async move {
                            let response = dispatcher.run_request(request).await;
                            send_response(transport.as_ref(), &response).await;
                        });
                    }
                    Ok(JsonRpcMessage::Notification(notification)) => {
                        dispatcher.handle_notification(notification);
                    }
                    Ok(JsonRpcMessage::Response(response)) => {
                        dispatcher.ignore_response(response);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "undecodable message");
                        send_response(transport.as_ref(), &e.to_response()).await;
                    }
                }
            }
            Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                log_join_failure(joined);
            }
        }
    }

    tracing::info!("inbound stream closed, finishing in-flight requests");
    while let Some(joined) = in_flight.join_next().await {
        log_join_failure(joined);
    }
    dispatcher.closed.send_replace(true);
}

async fn send_response(transport: &dyn Transport, response: &JsonRpcResponse) {
    let line = match serde_json::to_string(response) {
        Ok(line) => line,
        Err(e) => {
            tracing::error!(error = %e, "failed to encode response");
            return;
        }
    };
    if let Err(e) = transport.send(&line).await {
        tracing::warn!(error = %e, "failed to send response");
    }
}

fn log_join_failure(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if !e.is_cancelled() {
            tracing::error!(error = %e, "response task failed");
        }
    }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

impl Dispatcher {
    /// Run one request on its own task, turning a panic into `-32603`.
    async fn run_request(self: Arc<Self>, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let method = request.method.clone();

        let handler = tokio::spawn(async move { self.handle_request(request).await });
        let _guard = AbortOnDrop(handler.abort_handle());

        match handler.await {
            Ok(response) => response,
            Err(e) => {
                let description = join_failure_description(e);
                tracing::error!(%method, %id, error = %description, "handler failed");
                JsonRpcResponse::error(
                    id,
                    JsonRpcError::internal_error(format!("Handler for '{method}' failed: {description}")),
                )
            }
        }
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        tracing::debug!(method = %request.method, id = %request.id, "handling request");

        if !self.initialized.load(Ordering::SeqCst)
            && request.method != methods::INITIALIZE
            && request.method != methods::PING
        {
            tracing::debug!(method = %request.method, "request received before initialization handshake");
        }

        let outcome = match request.method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request.params),
            methods::PING => Ok(json!({})),
            methods::LIST_TOOLS => to_result(ListToolsResult {
                tools: self.registry.tools(),
            }),
            methods::CALL_TOOL => self.handle_call_tool(request.params).await,
            methods::LIST_RESOURCES => to_result(ListResourcesResult {
                resources: self.registry.resources(),
            }),
            methods::READ_RESOURCE => self.handle_read_resource(request.params).await,
            methods::LIST_PROMPTS => to_result(ListPromptsResult {
                prompts: self.registry.prompts(),
            }),
            methods::GET_PROMPT => self.handle_get_prompt(request.params).await,
            _ => Err(JsonRpcError::method_not_found(&request.method)),
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(request.id, result),
            Err(error) => {
                tracing::debug!(method = %request.method, code = error.code, message = %error.message, "request failed");
                JsonRpcResponse::error(request.id, error)
            }
        }
    }

    fn handle_notification(&self, notification: JsonRpcNotification) {
        match notification.method.as_str() {
            methods::INITIALIZED => {
                self.initialized.store(true, Ordering::SeqCst);
                tracing::info!("client initialized");
            }
            methods::CANCELLED => {
                tracing::info!(params = ?notification.params, "client cancelled a request");
            }
            methods::SET_LOG_LEVEL => {
                tracing::info!(params = ?notification.params, "log level change requested");
            }
            other => {
                tracing::warn!(method = %other, "unknown notification dropped");
            }
        }
    }

    fn ignore_response(&self, response: JsonRpcResponse) {
        tracing::warn!(id = ?response.id, "server received a response; dropping it");
    }

    /// Handle initialize request
    fn handle_initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: Option<InitializeParams> = params
            .map(serde_json::from_value)
            .transpose()
            .map_err(|e| JsonRpcError::invalid_params(format!("Invalid initialize params: {e}")))?;

        let protocol_version = match &params {
            Some(p) if SUPPORTED_PROTOCOL_VERSIONS.contains(&p.protocol_version.as_str()) => {
                p.protocol_version.clone()
            }
            Some(p) => {
                tracing::warn!(
                    requested = %p.protocol_version,
                    offered = MCP_VERSION,
                    "unsupported protocol version requested"
                );
                MCP_VERSION.to_string()
            }
            None => MCP_VERSION.to_string(),
        };

        if let Some(client) = params.as_ref().and_then(|p| p.client_info.as_ref()) {
            tracing::info!(client = %client.name, version = %client.version, %protocol_version, "initialize");
        }

        to_result(InitializeResult {
            protocol_version,
            capabilities: ServerCapabilities {
                tools: self.registry.has_tools().then(ToolsCapability::default),
                resources: self.registry.has_resources().then(ResourcesCapability::default),
                prompts: self.registry.has_prompts().then(PromptsCapability::default),
                logging: Some(LoggingCapability::default()),
            },
            server_info: self.server_info.clone(),
        })
    }

    /// Handle call tool request
    async fn handle_call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params)?;
        let arguments = match params.arguments {
            Value::Null => Value::Object(serde_json::Map::new()),
            other => other,
        };
        let result = self.registry.call_tool(&params.name, arguments).await?;
        to_result(result)
    }

    async fn handle_read_resource(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: ReadResourceParams = parse_params(params)?;
        let result = self.registry.read_resource(&params.uri).await?;
        to_result(result)
    }

    async fn handle_get_prompt(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: GetPromptParams = parse_params(params)?;
        let result = self.registry.get_prompt(&params.name, &params.arguments).await?;
        to_result(result)
    }
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.ok_or_else(|| JsonRpcError::invalid_params("Missing params"))?;
    serde_json::from_value(params).map_err(|e| JsonRpcError::invalid_params(format!("Invalid params: {e}")))
}

fn to_result<T: Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value).map_err(|e| JsonRpcError::internal_error(e.to_string()))
}

fn join_failure_description(err: JoinError) -> String {
    if !err.is_panic() {
        return "handler was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}
