//! MCP protocol type definitions
//!
//! Wire-level JSON-RPC envelopes plus the MCP payload types carried inside
//! them. Every inbound line is decoded exactly once into [`JsonRpcMessage`];
//! nothing downstream inspects raw JSON for `id`/`method`/`result` again.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::DecodeError;

/// JSON-RPC version
pub const JSONRPC_VERSION: &str = "2.0";

/// Latest MCP protocol version spoken by this crate
pub const MCP_VERSION: &str = "2025-03-26";

/// Protocol versions a server will echo back during negotiation
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &[MCP_VERSION, "2024-11-05"];

/// JSON-RPC and MCP error codes
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;

    pub const INVALID_METHOD: i32 = -32000;
    pub const RESOURCE_NOT_FOUND: i32 = -32001;
    pub const TOOL_NOT_FOUND: i32 = -32002;
    pub const PROMPT_NOT_FOUND: i32 = -32003;
}

// ==================== Envelopes ====================

/// Request ID (can be string or number)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
}

impl RequestId {
    fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RequestId::String(s)),
            Value::Number(n) => n.as_i64().map(RequestId::Number),
            _ => None,
        }
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id)
    }
}

/// JSON-RPC request
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcRequest {
    /// Request ID
    pub id: RequestId,

    /// Method name
    pub method: String,

    /// Method parameters
    pub params: Option<Value>,
}

impl JsonRpcRequest {
    pub fn new(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcNotification {
    /// Method name
    pub method: String,

    /// Parameters
    pub params: Option<Value>,
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            method: method.into(),
            params,
        }
    }
}

/// JSON-RPC response
///
/// The outcome is a two-armed enum, so a response can never be built with
/// both `result` and `error`, or with neither.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonRpcResponse {
    /// Request ID; `None` encodes as `null` for errors that cannot be
    /// attributed to a request
    pub id: Option<RequestId>,

    /// Result or error
    pub outcome: ResponseOutcome,
}

/// The single payload of a response
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    Result(Value),
    Error(JsonRpcError),
}

impl JsonRpcResponse {
    /// Create a success response
    pub fn success(id: RequestId, result: Value) -> Self {
        Self {
            id: Some(id),
            outcome: ResponseOutcome::Result(result),
        }
    }

    /// Create an error response
    pub fn error(id: RequestId, error: JsonRpcError) -> Self {
        Self {
            id: Some(id),
            outcome: ResponseOutcome::Error(error),
        }
    }

    /// Create an error response with a `null` id
    pub fn unattributed(error: JsonRpcError) -> Self {
        Self {
            id: None,
            outcome: ResponseOutcome::Error(error),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ResponseOutcome::Error(_))
    }

    /// Unwrap the outcome into a `Result`
    pub fn into_result(self) -> Result<Value, JsonRpcError> {
        match self.outcome {
            ResponseOutcome::Result(value) => Ok(value),
            ResponseOutcome::Error(error) => Err(error),
        }
    }
}

/// Any message that can travel over a transport
#[derive(Debug, Clone, PartialEq)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Decode one line into a message, classifying by field presence.
    pub fn decode(line: &str) -> Result<Self, DecodeError> {
        let value: Value = serde_json::from_str(line).map_err(DecodeError::Parse)?;
        if !value.is_object() {
            return Err(DecodeError::Invalid {
                id: None,
                reason: "message must be a JSON object".into(),
            });
        }

        let recovered_id = value
            .get("id")
            .cloned()
            .and_then(RequestId::from_value);

        let raw = RawMessage::deserialize(value).map_err(|e| DecodeError::Invalid {
            id: recovered_id.clone(),
            reason: e.to_string(),
        })?;

        raw.classify().map_err(|reason| DecodeError::Invalid {
            id: recovered_id,
            reason,
        })
    }

    /// Encode as a single JSON line (without the trailing delimiter).
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(request: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(request)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(response: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(response)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(notification: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(notification)
    }
}

// ==================== Wire encoding ====================

#[derive(Serialize)]
struct WireRequest<'a> {
    jsonrpc: &'static str,
    id: &'a RequestId,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

#[derive(Serialize)]
struct WireResponse<'a> {
    jsonrpc: &'static str,
    id: Option<&'a RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<&'a Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a JsonRpcError>,
}

#[derive(Serialize)]
struct WireNotification<'a> {
    jsonrpc: &'static str,
    method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<&'a Value>,
}

impl Serialize for JsonRpcRequest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireRequest {
            jsonrpc: JSONRPC_VERSION,
            id: &self.id,
            method: &self.method,
            params: self.params.as_ref(),
        }
        .serialize(serializer)
    }
}

impl Serialize for JsonRpcResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let (result, error) = match &self.outcome {
            ResponseOutcome::Result(value) => (Some(value), None),
            ResponseOutcome::Error(error) => (None, Some(error)),
        };
        WireResponse {
            jsonrpc: JSONRPC_VERSION,
            id: self.id.as_ref(),
            result,
            error,
        }
        .serialize(serializer)
    }
}

impl Serialize for JsonRpcNotification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        WireNotification {
            jsonrpc: JSONRPC_VERSION,
            method: &self.method,
            params: self.params.as_ref(),
        }
        .serialize(serializer)
    }
}

impl Serialize for JsonRpcMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            JsonRpcMessage::Request(request) => request.serialize(serializer),
            JsonRpcMessage::Response(response) => response.serialize(serializer),
            JsonRpcMessage::Notification(notification) => notification.serialize(serializer),
        }
    }
}

// ==================== Wire decoding ====================

/// Field-presence view of an inbound object. `id` and `result` keep an
/// explicit `null` distinct from an absent member.
#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,

    #[serde(default, deserialize_with = "present")]
    id: Option<Value>,

    #[serde(default)]
    method: Option<String>,

    #[serde(default)]
    params: Option<Value>,

    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,

    #[serde(default)]
    error: Option<JsonRpcError>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl RawMessage {
    fn classify(self) -> Result<JsonRpcMessage, String> {
        if let Some(version) = &self.jsonrpc {
            if version != JSONRPC_VERSION {
                return Err(format!("unsupported jsonrpc version: {version}"));
            }
        }

        match (self.id, self.method) {
            (Some(id), Some(method)) => {
                let id = RequestId::from_value(id)
                    .ok_or_else(|| "request id must be a string or an integer".to_string())?;
                Ok(JsonRpcMessage::Request(JsonRpcRequest {
                    id,
                    method,
                    params: self.params,
                }))
            }
            (Some(id), None) => {
                let id = match id {
                    Value::Null => None,
                    other => Some(
                        RequestId::from_value(other)
                            .ok_or_else(|| "response id must be a string, an integer or null".to_string())?,
                    ),
                };
                let outcome = match (self.result, self.error) {
                    (Some(result), None) => ResponseOutcome::Result(result),
                    (None, Some(error)) => ResponseOutcome::Error(error),
                    (Some(_), Some(_)) => return Err("response carries both result and error".into()),
                    (None, None) => return Err("message has an id but no method, result or error".into()),
                };
                Ok(JsonRpcMessage::Response(JsonRpcResponse { id, outcome }))
            }
            (None, Some(method)) => Ok(JsonRpcMessage::Notification(JsonRpcNotification {
                method,
                params: self.params,
            })),
            (None, None) => Err("message has neither id nor method".into()),
        }
    }
}

// ==================== Errors ====================

/// JSON-RPC error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JsonRpcError {
    /// Error code
    pub code: i32,

    /// Error message
    pub message: String,

    /// Additional data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl JsonRpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Parse error (-32700)
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, message)
    }

    /// Invalid request (-32600)
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, message)
    }

    /// Method not found (-32601)
    pub fn method_not_found(method: impl Into<String>) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method.into()),
        )
    }

    /// Invalid params (-32602)
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, message)
    }

    /// Internal error (-32603)
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, message)
    }

    /// Resource not found (-32001)
    pub fn resource_not_found(uri: &str) -> Self {
        Self::new(error_codes::RESOURCE_NOT_FOUND, format!("Resource not found: {uri}"))
    }

    /// Tool not found (-32002)
    pub fn tool_not_found(name: &str) -> Self {
        Self::new(error_codes::TOOL_NOT_FOUND, format!("Tool not found: {name}"))
    }

    /// Prompt not found (-32003)
    pub fn prompt_not_found(name: &str) -> Self {
        Self::new(error_codes::PROMPT_NOT_FOUND, format!("Prompt not found: {name}"))
    }
}

// ==================== Initialize ====================

/// Server or client implementation info
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

impl Implementation {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// MCP server capabilities
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ServerCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingCapability>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default)]
    pub subscribe: bool,

    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    #[serde(default)]
    pub list_changed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct LoggingCapability {}

/// Client capabilities (decoded structurally, never validated)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ClientCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<Value>,
}

/// Initialize request params
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,

    #[serde(default)]
    pub capabilities: ClientCapabilities,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_info: Option<Implementation>,
}

/// Initialize result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub protocol_version: String,
    pub capabilities: ServerCapabilities,
    pub server_info: Implementation,
}

// ==================== Tools ====================

/// Tool definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Tool {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Input schema (JSON Schema)
    pub input_schema: Value,
}

/// List tools result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListToolsResult {
    pub tools: Vec<Tool>,
}

/// Call tool params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallToolParams {
    pub name: String,

    #[serde(default)]
    pub arguments: Value,
}

/// Content item carried by tool results and prompt messages
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Content {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },

    /// Image content
    #[serde(rename = "image")]
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },

    /// Embedded resource
    #[serde(rename = "resource")]
    Resource { resource: ResourceContents },
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text { text } => Some(text),
            _ => None,
        }
    }
}

/// Call tool result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,

    /// Whether the tool call resulted in an error
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
}

impl CallToolResult {
    /// Create a text result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(text)],
            is_error: false,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![Content::text(format!("Error: {}", message.into()))],
            is_error: true,
        }
    }
}

// ==================== Resources ====================

/// Resource definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub uri: String,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Resource contents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContents {
    pub uri: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Base64 payload for binary resources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResourcesResult {
    pub resources: Vec<Resource>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceParams {
    pub uri: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadResourceResult {
    pub contents: Vec<ResourceContents>,
}

// ==================== Prompts ====================

/// Prompt definition
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Prompt {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub arguments: Vec<PromptArgument>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptArgument {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromptMessage {
    pub role: Role,
    pub content: Content,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListPromptsResult {
    pub prompts: Vec<Prompt>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetPromptParams {
    pub name: String,

    #[serde(default)]
    pub arguments: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetPromptResult {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub messages: Vec<PromptMessage>,
}

/// MCP methods
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const PING: &str = "ping";
    pub const LIST_TOOLS: &str = "tools/list";
    pub const CALL_TOOL: &str = "tools/call";
    pub const LIST_RESOURCES: &str = "resources/list";
    pub const READ_RESOURCE: &str = "resources/read";
    pub const LIST_PROMPTS: &str = "prompts/list";
    pub const GET_PROMPT: &str = "prompts/get";

    pub const INITIALIZED: &str = "notifications/initialized";
    pub const CANCELLED: &str = "notifications/cancelled";
    pub const SET_LOG_LEVEL: &str = "logging/setLevel";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decode(line: &str) -> JsonRpcMessage {
        JsonRpcMessage::decode(line).unwrap()
    }

    #[test]
    fn test_request_decode() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#);
        match msg {
            JsonRpcMessage::Request(req) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id, RequestId::Number(1));
                assert!(req.params.is_none());
            }
            other => panic!("expected request, got {other:?}"),
        }
    }

    #[test]
    fn test_request_without_jsonrpc_member_is_tolerated() {
        let msg = decode(r#"{"method":"foo/bar","id":7}"#);
        assert!(matches!(msg, JsonRpcMessage::Request(ref r) if r.id == RequestId::Number(7)));
    }

    #[test]
    fn test_string_id_request() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":"abc","method":"ping"}"#);
        assert!(matches!(msg, JsonRpcMessage::Request(ref r) if r.id == RequestId::String("abc".into())));
    }

    #[test]
    fn test_notification_decode() {
        let msg = decode(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);
        assert!(matches!(msg, JsonRpcMessage::Notification(ref n) if n.method == methods::INITIALIZED));
    }

    #[test]
    fn test_response_decode_keeps_null_result() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":3,"result":null}"#);
        match msg {
            JsonRpcMessage::Response(resp) => {
                assert_eq!(resp.id, Some(RequestId::Number(3)));
                assert_eq!(resp.into_result().unwrap(), Value::Null);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_error_response_with_null_id() {
        let msg = decode(r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"bad"}}"#);
        match msg {
            JsonRpcMessage::Response(resp) => {
                assert!(resp.id.is_none());
                assert_eq!(resp.into_result().unwrap_err().code, error_codes::PARSE_ERROR);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn test_non_json_is_parse_error() {
        let err = JsonRpcMessage::decode("not json").unwrap_err();
        assert!(matches!(err, DecodeError::Parse(_)));
        assert_eq!(err.code(), error_codes::PARSE_ERROR);
    }

    #[test]
    fn test_response_with_both_result_and_error_is_invalid() {
        let err = JsonRpcMessage::decode(
            r#"{"jsonrpc":"2.0","id":4,"result":{},"error":{"code":1,"message":"x"}}"#,
        )
        .unwrap_err();
        match err {
            DecodeError::Invalid { id, .. } => assert_eq!(id, Some(RequestId::Number(4))),
            other => panic!("expected invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_unclassifiable_messages_are_invalid() {
        for line in [
            r#"{"jsonrpc":"2.0","id":5}"#,
            r#"{"jsonrpc":"2.0"}"#,
            r#"[1,2,3]"#,
            r#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#,
            r#"{"jsonrpc":"2.0","id":1.5,"method":"ping"}"#,
        ] {
            let err = JsonRpcMessage::decode(line).unwrap_err();
            assert_eq!(err.code(), error_codes::INVALID_REQUEST, "line: {line}");
        }
    }

    #[test]
    fn test_response_serialize_success() {
        let resp = JsonRpcResponse::success(RequestId::Number(1), json!({"test": true}));
        let value = serde_json::to_value(&resp).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "id": 1, "result": {"test": true}}));
    }

    #[test]
    fn test_response_serialize_error_never_carries_result() {
        let resp = JsonRpcResponse::error(RequestId::Number(9), JsonRpcError::method_not_found("x"));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.get("result").is_none());
        assert_eq!(value["error"]["code"], -32601);
    }

    #[test]
    fn test_null_result_still_serialized() {
        let resp = JsonRpcResponse::success(RequestId::Number(2), Value::Null);
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.as_object().unwrap().contains_key("result"));
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_unattributed_error_has_null_id() {
        let resp = JsonRpcResponse::unattributed(JsonRpcError::parse_error("bad"));
        let value = serde_json::to_value(&resp).unwrap();
        assert!(value.as_object().unwrap().contains_key("id"));
        assert!(value["id"].is_null());
    }

    #[test]
    fn test_encode_has_no_raw_newline() {
        let req = JsonRpcRequest::new(1_i64, "tools/call", Some(json!({"text": "a\nb"})));
        let line = JsonRpcMessage::from(req).encode().unwrap();
        assert!(!line.contains('\n'));
        assert!(line.contains(r#""jsonrpc":"2.0""#));
    }

    #[test]
    fn test_notification_serialize_has_no_id() {
        let value = serde_json::to_value(JsonRpcNotification::new(methods::INITIALIZED, None)).unwrap();
        assert_eq!(value, json!({"jsonrpc": "2.0", "method": "notifications/initialized"}));
    }

    #[test]
    fn test_tool_result() {
        let result = CallToolResult::text("Hello");
        assert!(!result.is_error);
        assert_eq!(result.content.len(), 1);
        assert_eq!(result.content[0].as_text(), Some("Hello"));
    }

    #[test]
    fn test_initialize_params_tolerate_missing_capabilities() {
        let params: InitializeParams =
            serde_json::from_value(json!({"protocolVersion": "2025-03-26"})).unwrap();
        assert_eq!(params.protocol_version, "2025-03-26");
        assert!(params.client_info.is_none());
    }

    #[test]
    fn test_capabilities_use_camel_case() {
        let caps = ServerCapabilities {
            resources: Some(ResourcesCapability::default()),
            ..Default::default()
        };
        let value = serde_json::to_value(caps).unwrap();
        assert_eq!(value["resources"]["listChanged"], false);
        assert!(value.get("tools").is_none());
    }
}
