//! Built-in demo capabilities
//!
//! A small static catalog served by `mcp-relay serve`: two tools, one
//! resource and one prompt. Tool input schemas are generated from the
//! argument structs; arguments are checked before a tool runs.

use std::collections::HashMap;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use validator::Validate;

use crate::error::{HandlerError, RegistryError};
use crate::mcp::registry::{CapabilityRegistry, PromptRenderer, ResourceReader, ToolHandler};
use crate::mcp::types::{
    CallToolResult, Content, GetPromptResult, Prompt, PromptArgument, PromptMessage, Resource,
    ResourceContents, Role, Tool,
};

pub const WEATHER_RESOURCE_URI: &str = "koog://weather";

const WEATHER_RESOURCE_BODY: &str = r#"{"temperature": 25, "condition": "sunny"}"#;

const ANALYZE_INSTRUCTION: &str = "Please analyze the provided data and create a summary.";

/// Build the registry served by default.
pub fn builtin_registry() -> Result<CapabilityRegistry, RegistryError> {
    let mut registry = CapabilityRegistry::new();

    registry.register_tool(
        tool_def::<WeatherArgs>("weather", "Get weather information for a location"),
        WeatherTool,
    )?;
    registry.register_tool(
        tool_def::<CalculatorArgs>("calculator", "Perform mathematical calculations"),
        CalculatorTool,
    )?;

    registry.register_resource(
        Resource {
            uri: WEATHER_RESOURCE_URI.to_string(),
            name: "Weather Data".to_string(),
            description: Some("Current weather information".to_string()),
            mime_type: Some("application/json".to_string()),
        },
        WeatherResource,
    )?;

    registry.register_prompt(
        Prompt {
            name: "analyze-data".to_string(),
            description: Some("Analyze and summarize data".to_string()),
            arguments: vec![PromptArgument {
                name: "data".to_string(),
                description: Some("Data to analyze".to_string()),
                required: true,
            }],
        },
        AnalyzeDataPrompt,
    )?;

    Ok(registry)
}

// ==================== Tools ====================

#[derive(Debug, Deserialize, JsonSchema, Validate)]
struct WeatherArgs {
    /// Location name
    #[validate(length(min = 1, max = 128))]
    location: String,
}

#[derive(Debug, Deserialize, JsonSchema, Validate)]
struct CalculatorArgs {
    /// Expression of the form `a <op> b`, where op is one of + - * /
    #[validate(length(min = 1, max = 256))]
    expression: String,
}

struct WeatherTool;

#[async_trait]
impl ToolHandler for WeatherTool {
    async fn call(&self, arguments: Value) -> Result<CallToolResult, HandlerError> {
        let args: WeatherArgs = parse_args(arguments)?;
        let location = args.location.trim();
        tracing::debug!(%location, "weather lookup");
        Ok(CallToolResult::text(format!("Weather in {location}: Sunny, 25°C")))
    }
}

struct CalculatorTool;

#[async_trait]
impl ToolHandler for CalculatorTool {
    async fn call(&self, arguments: Value) -> Result<CallToolResult, HandlerError> {
        let args: CalculatorArgs = parse_args(arguments)?;
        let expression = args.expression.trim();

        match evaluate(expression) {
            Ok(value) => Ok(CallToolResult::text(format!("{expression} = {value}"))),
            Err(e) => Ok(CallToolResult::error(e)),
        }
    }
}

/// Deserialize and validate tool arguments.
fn parse_args<T: DeserializeOwned + Validate>(arguments: Value) -> Result<T, HandlerError> {
    let args: T = serde_json::from_value(arguments).map_err(|e| HandlerError::InvalidArguments(e.to_string()))?;
    args.validate()?;
    Ok(args)
}

/// Evaluate `a <op> b`. A leading sign on either operand is allowed.
fn evaluate(expression: &str) -> Result<f64, String> {
    let (index, op) = expression
        .char_indices()
        .skip(1)
        .find(|(_, c)| matches!(c, '+' | '-' | '*' | '/'))
        .ok_or_else(|| format!("Unsupported expression: {expression}"))?;

    let lhs = parse_operand(&expression[..index])?;
    let rhs = parse_operand(&expression[index + op.len_utf8()..])?;

    match op {
        '+' => Ok(lhs + rhs),
        '-' => Ok(lhs - rhs),
        '*' => Ok(lhs * rhs),
        '/' if rhs == 0.0 => Err("Division by zero".to_string()),
        '/' => Ok(lhs / rhs),
        _ => Err(format!("Unsupported operator: {op}")),
    }
}

fn parse_operand(text: &str) -> Result<f64, String> {
    let text = text.trim();
    text.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("Invalid number: '{text}'"))
}

// ==================== Resources & prompts ====================

struct WeatherResource;

#[async_trait]
impl ResourceReader for WeatherResource {
    async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>, HandlerError> {
        Ok(vec![ResourceContents {
            uri: uri.to_string(),
            mime_type: Some("application/json".to_string()),
            text: Some(WEATHER_RESOURCE_BODY.to_string()),
            blob: None,
        }])
    }
}

struct AnalyzeDataPrompt;

#[async_trait]
impl PromptRenderer for AnalyzeDataPrompt {
    async fn render(&self, arguments: &HashMap<String, String>) -> Result<GetPromptResult, HandlerError> {
        let data = arguments
            .get("data")
            .ok_or_else(|| HandlerError::InvalidArguments("data is required".to_string()))?;

        Ok(GetPromptResult {
            description: Some("Analyze and summarize data".to_string()),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(format!("{ANALYZE_INSTRUCTION}\n\n{data}")),
            }],
        })
    }
}

// ==================== Schema Definitions ====================

fn tool_def<T: JsonSchema>(name: &str, description: &str) -> Tool {
    let schema = serde_json::to_value(schemars::schema_for!(T))
        .unwrap_or_else(|_| json!({"type": "object", "properties": {}}));

    Tool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: schema,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::types::error_codes;

    #[test]
    fn test_builtin_catalog() {
        let registry = builtin_registry().unwrap();

        let names: Vec<String> = registry.tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["weather", "calculator"]);
        assert_eq!(registry.resources()[0].uri, WEATHER_RESOURCE_URI);
        assert_eq!(registry.prompts()[0].name, "analyze-data");
    }

    #[test]
    fn test_generated_schema_requires_arguments() {
        let tool = tool_def::<WeatherArgs>("weather", "Weather");
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.input_schema["properties"]["location"].is_object());
        assert_eq!(tool.input_schema["required"], json!(["location"]));
    }

    #[test]
    fn test_evaluate() {
        assert_eq!(evaluate("2 + 3"), Ok(5.0));
        assert_eq!(evaluate("10-4"), Ok(6.0));
        assert_eq!(evaluate("-3 * 4"), Ok(-12.0));
        assert_eq!(evaluate("7 / 2"), Ok(3.5));
        assert_eq!(evaluate("5 - -2"), Ok(7.0));
        assert_eq!(evaluate("1 / 0"), Err("Division by zero".to_string()));
        assert!(evaluate("hello").is_err());
        assert!(evaluate("2 + x").is_err());
    }

    #[tokio::test]
    async fn test_weather_tool() {
        let registry = builtin_registry().unwrap();
        let result = registry
            .call_tool("weather", json!({"location": "Tokyo"}))
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("Weather in Tokyo: Sunny, 25°C"));
    }

    #[tokio::test]
    async fn test_calculator_results() {
        let registry = builtin_registry().unwrap();

        let ok = registry
            .call_tool("calculator", json!({"expression": "6 * 7"}))
            .await
            .unwrap();
        assert!(!ok.is_error);
        assert_eq!(ok.content[0].as_text(), Some("6 * 7 = 42"));

        let div = registry
            .call_tool("calculator", json!({"expression": "1 / 0"}))
            .await
            .unwrap();
        assert!(div.is_error);
        assert_eq!(div.content[0].as_text(), Some("Error: Division by zero"));
    }

    #[tokio::test]
    async fn test_invalid_arguments_are_invalid_params() {
        let registry = builtin_registry().unwrap();

        let missing = registry.call_tool("weather", json!({})).await.unwrap_err();
        assert_eq!(missing.code, error_codes::INVALID_PARAMS);

        let empty = registry
            .call_tool("calculator", json!({"expression": ""}))
            .await
            .unwrap_err();
        assert_eq!(empty.code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_weather_resource() {
        let registry = builtin_registry().unwrap();
        let result = registry.read_resource(WEATHER_RESOURCE_URI).await.unwrap();

        let body: Value = serde_json::from_str(result.contents[0].text.as_deref().unwrap()).unwrap();
        assert_eq!(body["temperature"], 25);
        assert_eq!(result.contents[0].mime_type.as_deref(), Some("application/json"));
    }

    #[tokio::test]
    async fn test_analyze_prompt() {
        let registry = builtin_registry().unwrap();
        let args = HashMap::from([("data".to_string(), "1, 2, 3".to_string())]);
        let result = registry.get_prompt("analyze-data", &args).await.unwrap();

        assert_eq!(result.messages[0].role, Role::User);
        let text = result.messages[0].content.as_text().unwrap();
        assert!(text.starts_with(ANALYZE_INSTRUCTION));
        assert!(text.ends_with("1, 2, 3"));
    }
}
