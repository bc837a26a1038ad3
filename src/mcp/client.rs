//! MCP client and process supervisor
//!
//! Spawns (or attaches to) a tool provider, performs the initialize handshake
//! and correlates responses to callers by request id. Connection state, the
//! pending-call table and the process handle share one lock, so a state change
//! and the rejection of pending calls always happen together.

use std::collections::HashMap;
use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::error::{ClientError, TransportError};
use crate::mcp::transport::{ChildTransport, Transport};
use crate::mcp::types::*;

/// Request ids come from one counter shared by every client in the process.
static NEXT_REQUEST_ID: AtomicI64 = AtomicI64::new(1);

/// Allocate the next request id.
pub fn next_request_id() -> i64 {
    NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed)
}

/// Connection lifecycle of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    NotConnected,
    Starting,
    Connected,
    Disconnected,
    Stopped,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::NotConnected => "not connected",
            ConnectionState::Starting => "starting",
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How to launch a tool provider subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl ServerCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

impl fmt::Display for ServerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

type Completion = oneshot::Sender<Result<Value, ClientError>>;

/// Which connection state a message may go out in.
#[derive(Debug, Clone, Copy)]
enum Phase {
    /// Normal traffic, only once the handshake has completed.
    Ready,
    /// The handshake of the given start attempt, while still `Starting`.
    Handshake(u64),
}

/// How a request ended before the deadline.
enum Exchange {
    Answered(Result<Value, ClientError>),
    SendFailed(TransportError),
}

struct PendingCall {
    method: String,
    submitted_at: Instant,
    completion: Completion,
}

/// Everything acquired by `start`/`connect`, released by teardown.
struct Connection {
    transport: Arc<dyn Transport>,
    reader: Option<JoinHandle<()>>,
    process: Option<Child>,
    stderr: Option<JoinHandle<()>>,
}

impl Drop for Connection {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        if let Some(stderr) = self.stderr.take() {
            stderr.abort();
        }
    }
}

struct Shared {
    state: ConnectionState,
    /// Bumped on every start and stop; a reader only acts for its own generation.
    generation: u64,
    pending: HashMap<RequestId, PendingCall>,
    connection: Option<Connection>,
    server: Option<InitializeResult>,
}

/// MCP client bound to at most one tool provider at a time
pub struct McpClient {
    config: Config,
    shared: Arc<Mutex<Shared>>,
}

impl McpClient {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            shared: Arc::new(Mutex::new(Shared {
                state: ConnectionState::NotConnected,
                generation: 0,
                pending: HashMap::new(),
                connection: None,
                server: None,
            })),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Number of calls still waiting for a response
    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    /// The `initialize` result of the current connection
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.lock().server.clone()
    }

    /// Spawn a tool provider, wire its pipes and run the initialize handshake.
    pub async fn start(&self, command: &ServerCommand) -> Result<InitializeResult, ClientError> {
        let generation = self.begin_start()?;
        tracing::info!(command = %command, "spawning MCP server");

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                self.abandon_start(generation);
                return Err(ClientError::Spawn {
                    command: command.to_string(),
                    source,
                });
            }
        };

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                self.abandon_start(generation);
                return Err(ClientError::Spawn {
                    command: command.to_string(),
                    source: std::io::Error::new(std::io::ErrorKind::BrokenPipe, "child stdio was not captured"),
                });
            }
        };

        let label = command.program.clone();
        let stderr = child
            .stderr
            .take()
            .map(|stderr| tokio::spawn(forward_stderr(label.clone(), stderr)));
        let transport = Arc::new(ChildTransport::child(label, stdin, stdout));

        self.attach(generation, transport, Some(child), stderr).await
    }

    /// Run the handshake over an already-built transport, with no subprocess.
    pub async fn connect(&self, transport: Arc<dyn Transport>) -> Result<InitializeResult, ClientError> {
        let generation = self.begin_start()?;
        self.attach(generation, transport, None, None).await
    }

    /// Send a request and wait for its response, at most `timeout`.
    ///
    /// The deadline covers writing the request as well as waiting for the
    /// answer. A request that could not be fully written in time leaves a
    /// partial line on the wire, so the connection is dropped.
    pub async fn call(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value, ClientError> {
        self.exchange(method, params, timeout, Phase::Ready).await
    }

    /// [`call`](Self::call) with the configured default timeout.
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, ClientError> {
        self.call(method, params, self.config.call_timeout).await
    }

    /// Send a notification; no response is expected.
    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), ClientError> {
        self.send_notification(method, params, Phase::Ready).await
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        self.request(methods::PING, None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> Result<Vec<Tool>, ClientError> {
        let result: ListToolsResult = self.request_typed(methods::LIST_TOOLS, None).await?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, ClientError> {
        self.request_typed(methods::CALL_TOOL, Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    pub async fn list_resources(&self) -> Result<Vec<Resource>, ClientError> {
        let result: ListResourcesResult = self.request_typed(methods::LIST_RESOURCES, None).await?;
        Ok(result.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, ClientError> {
        self.request_typed(methods::READ_RESOURCE, Some(json!({ "uri": uri })))
            .await
    }

    pub async fn list_prompts(&self) -> Result<Vec<Prompt>, ClientError> {
        let result: ListPromptsResult = self.request_typed(methods::LIST_PROMPTS, None).await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: HashMap<String, String>,
    ) -> Result<GetPromptResult, ClientError> {
        self.request_typed(methods::GET_PROMPT, Some(json!({ "name": name, "arguments": arguments })))
            .await
    }

    /// Fail every pending call, then tear the connection down: abort the
    /// reader, close the pipes, wait out the grace period, kill.
    pub async fn stop(&self) {
        let (connection, pending) = {
            let mut shared = self.lock();
            shared.state = ConnectionState::Stopped;
            shared.generation += 1;
            shared.server = None;
            (shared.connection.take(), std::mem::take(&mut shared.pending))
        };

        fail_pending(pending);
        if let Some(connection) = connection {
            shutdown_connection(connection, self.config.shutdown_grace).await;
            tracing::info!("MCP client stopped");
        }
    }

    async fn exchange(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
        phase: Phase,
    ) -> Result<Value, ClientError> {
        let id = RequestId::Number(next_request_id());
        let line = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;
        let (completion, mut response) = oneshot::channel();

        let (transport, generation) = {
            let mut shared = self.lock();
            let admitted = admit(&shared, phase)?;
            shared.pending.insert(
                id.clone(),
                PendingCall {
                    method: method.to_string(),
                    submitted_at: Instant::now(),
                    completion,
                },
            );
            admitted
        };

        tracing::debug!(%method, %id, "sending request");
        let mut sent = false;
        let exchange = async {
            // A stop or disconnect completes the call even while the send is
            // stuck behind a full pipe.
            tokio::select! {
                result = transport.send(&line) => {
                    if let Err(e) = result {
                        return Exchange::SendFailed(e);
                    }
                }
                outcome = &mut response => {
                    return Exchange::Answered(outcome.unwrap_or(Err(ClientError::ConnectionLost)));
                }
            }
            sent = true;
            Exchange::Answered(response.await.unwrap_or(Err(ClientError::ConnectionLost)))
        };
        let outcome = tokio::time::timeout(timeout, exchange).await;

        match outcome {
            Ok(Exchange::Answered(result)) => result,
            Ok(Exchange::SendFailed(e)) => {
                tracing::warn!(%method, error = %e, "send failed, dropping connection");
                self.lock().pending.remove(&id);
                self.lose_connection(generation);
                Err(ClientError::ConnectionLost)
            }
            Err(_) => {
                let timeout_ms = timeout.as_millis() as u64;
                let removed = self.lock().pending.remove(&id);
                if !sent {
                    tracing::warn!(%method, %id, timeout_ms, "timed out while sending, dropping connection");
                    self.lose_connection(generation);
                } else if removed.is_some() {
                    tracing::warn!(%method, %id, timeout_ms, "call timed out");
                }
                Err(ClientError::Timeout {
                    method: method.to_string(),
                    timeout_ms,
                })
            }
        }
    }

    async fn send_notification(&self, method: &str, params: Option<Value>, phase: Phase) -> Result<(), ClientError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;

        let (transport, generation) = admit(&self.lock(), phase)?;

        let timeout = self.config.call_timeout;
        let error = match tokio::time::timeout(timeout, transport.send(&line)).await {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => e.to_string(),
            Err(_) => format!("no progress within {}ms", timeout.as_millis()),
        };
        tracing::warn!(%method, %error, "send failed, dropping connection");
        self.lose_connection(generation);
        Err(ClientError::ConnectionLost)
    }

    async fn request_typed<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T, ClientError> {
        let value = self.request(method, params).await?;
        decode_result(method, value)
    }

    fn begin_start(&self) -> Result<u64, ClientError> {
        let mut shared = self.lock();
        match shared.state {
            ConnectionState::NotConnected | ConnectionState::Disconnected | ConnectionState::Stopped => {
                shared.state = ConnectionState::Starting;
                shared.generation += 1;
                shared.server = None;
                Ok(shared.generation)
            }
            state => Err(ClientError::AlreadyStarted { state: state.as_str() }),
        }
    }

    /// Undo a failed start, unless `stop` already took over.
    fn abandon_start(&self, generation: u64) -> Option<Connection> {
        let (connection, pending) = {
            let mut shared = self.lock();
            if shared.generation != generation {
                return None;
            }
            shared.state = ConnectionState::NotConnected;
            shared.server = None;
            (shared.connection.take(), std::mem::take(&mut shared.pending))
        };
        fail_pending(pending);
        connection
    }

    async fn attach(
        &self,
        generation: u64,
        transport: Arc<dyn Transport>,
        process: Option<Child>,
        stderr: Option<JoinHandle<()>>,
    ) -> Result<InitializeResult, ClientError> {
        let grace = self.config.shutdown_grace;

        if let Err(e) = transport.start().await {
            self.abandon_start(generation);
            let connection = Connection {
                transport,
                reader: None,
                process,
                stderr,
            };
            shutdown_connection(connection, grace).await;
            return Err(e.into());
        }

        let reader = tokio::spawn(read_loop(self.shared.clone(), transport.clone(), generation, grace));
        let connection = Connection {
            transport,
            reader: Some(reader),
            process,
            stderr,
        };

        // The state stays `Starting` until the handshake is done; only the
        // handshake messages may use the connection meanwhile.
        let rejected = {
            let mut shared = self.lock();
            if shared.generation == generation && shared.state == ConnectionState::Starting {
                shared.connection = Some(connection);
                None
            } else {
                Some((shared.generation == generation, shared.state.as_str(), connection))
            }
        };
        if let Some((lost, state, connection)) = rejected {
            shutdown_connection(connection, grace).await;
            if !lost {
                return Err(ClientError::NotConnected { state });
            }
            // The reader saw end of stream before the connection was registered.
            self.abandon_start(generation);
            return Err(ClientError::InitFailed {
                reason: "connection lost before initialize".to_string(),
            });
        }

        let outcome = match self.initialize(generation).await {
            Ok(result) => self.finish_start(generation, result),
            Err(e) => Err(ClientError::InitFailed { reason: e.to_string() }),
        };

        match outcome {
            Ok(result) => {
                tracing::info!(
                    server = %result.server_info.name,
                    version = %result.server_info.version,
                    protocol = %result.protocol_version,
                    "MCP server initialized"
                );
                Ok(result)
            }
            Err(e) => {
                if let Some(connection) = self.abandon_start(generation) {
                    shutdown_connection(connection, grace).await;
                }
                Err(e)
            }
        }
    }

    async fn initialize(&self, generation: u64) -> Result<InitializeResult, ClientError> {
        let params = InitializeParams {
            protocol_version: MCP_VERSION.to_string(),
            capabilities: ClientCapabilities::default(),
            client_info: Some(self.config.client_info.clone()),
        };
        let phase = Phase::Handshake(generation);
        let value = self
            .exchange(
                methods::INITIALIZE,
                Some(serde_json::to_value(params)?),
                self.config.init_timeout,
                phase,
            )
            .await?;
        let result: InitializeResult = decode_result(methods::INITIALIZE, value)?;

        self.send_notification(methods::INITIALIZED, None, phase).await?;
        Ok(result)
    }

    /// Move a completed handshake to `Connected`, unless the connection was
    /// lost or `stop` took over in the meantime.
    fn finish_start(&self, generation: u64, result: InitializeResult) -> Result<InitializeResult, ClientError> {
        let mut shared = self.lock();
        if shared.generation != generation {
            return Err(ClientError::NotConnected {
                state: shared.state.as_str(),
            });
        }
        if shared.state != ConnectionState::Starting {
            return Err(ClientError::InitFailed {
                reason: "connection lost during initialize".to_string(),
            });
        }
        shared.state = ConnectionState::Connected;
        shared.server = Some(result.clone());
        Ok(result)
    }

    fn lose_connection(&self, generation: u64) {
        if let Some(connection) = disconnect(&self.shared, generation) {
            tokio::spawn(shutdown_connection(connection, self.config.shutdown_grace));
        }
    }

    fn lock(&self) -> MutexGuard<'_, Shared> {
        lock(&self.shared)
    }
}

impl Drop for McpClient {
    fn drop(&mut self) {
        // Dropping the connection aborts its tasks; kill-on-drop reaps the child.
        let connection = self.lock().connection.take();
        drop(connection);
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

fn decode_result<T: DeserializeOwned>(method: &str, value: Value) -> Result<T, ClientError> {
    serde_json::from_value(value).map_err(|source| ClientError::InvalidResult {
        method: method.to_string(),
        source,
    })
}

fn fail_pending(pending: HashMap<RequestId, PendingCall>) {
    for (id, call) in pending {
        tracing::debug!(method = %call.method, %id, "failing pending call");
        let _ = call.completion.send(Err(ClientError::ConnectionLost));
    }
}

/// Check that a message may be sent in `phase`; yields the transport and the
/// generation it belongs to.
fn admit(shared: &Shared, phase: Phase) -> Result<(Arc<dyn Transport>, u64), ClientError> {
    let open = match phase {
        Phase::Ready => shared.state == ConnectionState::Connected,
        Phase::Handshake(generation) => {
            shared.state == ConnectionState::Starting && shared.generation == generation
        }
    };
    match (open, shared.connection.as_ref()) {
        (true, Some(connection)) => Ok((connection.transport.clone(), shared.generation)),
        _ => Err(ClientError::NotConnected {
            state: shared.state.as_str(),
        }),
    }
}

/// Mark a live or handshaking connection of `generation` as lost and hand
/// back its resources.
fn disconnect(shared: &Mutex<Shared>, generation: u64) -> Option<Connection> {
    let (connection, pending) = {
        let mut shared = lock(shared);
        let live = matches!(shared.state, ConnectionState::Starting | ConnectionState::Connected);
        if shared.generation != generation || !live {
            return None;
        }
        shared.state = ConnectionState::Disconnected;
        shared.server = None;
        (shared.connection.take(), std::mem::take(&mut shared.pending))
    };
    fail_pending(pending);
    connection
}

async fn shutdown_connection(mut connection: Connection, grace: Duration) {
    if let Some(reader) = connection.reader.take() {
        reader.abort();
    }

    connection.transport.stop().await;

    if let Some(mut child) = connection.process.take() {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => tracing::info!(%status, "MCP server exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "failed to wait for MCP server"),
            Err(_) => {
                tracing::warn!(grace_ms = grace.as_millis() as u64, "MCP server did not exit in time, killing");
                if let Err(e) = child.kill().await {
                    tracing::warn!(error = %e, "failed to kill MCP server");
                }
            }
        }
    }

    // Let the stderr forwarder drain whatever the child wrote last.
    if let Some(stderr) = connection.stderr.take() {
        drop(stderr);
    }
}

async fn read_loop(shared: Arc<Mutex<Shared>>, transport: Arc<dyn Transport>, generation: u64, grace: Duration) {
    while let Some(line) = transport.receive().await {
        match JsonRpcMessage::decode(&line) {
            Ok(JsonRpcMessage::Response(response)) => complete(&shared, response),
            Ok(JsonRpcMessage::Request(request)) => answer_server_request(transport.as_ref(), request).await,
            Ok(JsonRpcMessage::Notification(notification)) => {
                tracing::debug!(method = %notification.method, "server notification");
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable line from server");
            }
        }
    }

    tracing::info!("MCP server closed the connection");
    if let Some(mut connection) = disconnect(&shared, generation) {
        // This task is the reader; detach rather than abort itself.
        drop(connection.reader.take());
        shutdown_connection(connection, grace).await;
    }
}

fn complete(shared: &Mutex<Shared>, response: JsonRpcResponse) {
    let Some(id) = response.id.clone() else {
        if let Err(error) = response.into_result() {
            tracing::warn!(code = error.code, message = %error.message, "unattributed error from server");
        }
        return;
    };

    let call = lock(shared).pending.remove(&id);
    match call {
        Some(call) => {
            tracing::debug!(
                method = %call.method,
                %id,
                elapsed_ms = call.submitted_at.elapsed().as_millis() as u64,
                "response received"
            );
            let _ = call.completion.send(response.into_result().map_err(ClientError::Server));
        }
        None => {
            tracing::debug!(%id, "discarding response with no pending call");
        }
    }
}

async fn answer_server_request(transport: &dyn Transport, request: JsonRpcRequest) {
    let response = match request.method.as_str() {
        methods::PING => JsonRpcResponse::success(request.id, json!({})),
        other => {
            tracing::debug!(method = %other, "unsupported server request");
            JsonRpcResponse::error(request.id, JsonRpcError::method_not_found(other))
        }
    };

    match serde_json::to_string(&response) {
        Ok(line) => {
            if let Err(e) = transport.send(&line).await {
                tracing::warn!(error = %e, "failed to answer server request");
            }
        }
        Err(e) => tracing::warn!(error = %e, "failed to encode answer to server request"),
    }
}

async fn forward_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => tracing::debug!(server = %label, "{line}"),
            Ok(None) => break,
            Err(e) => {
                tracing::debug!(server = %label, error = %e, "stderr closed");
                break;
            }
        }
    }
}
