//! Capability registry
//!
//! Tools, resources and prompts are registered once, before the registry is
//! handed to [`McpServer`](crate::mcp::server::McpServer), and are immutable
//! afterwards. Lookups go by tool name, resource URI and prompt name.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::{HandlerError, RegistryError};
use crate::mcp::types::{
    CallToolResult, GetPromptResult, JsonRpcError, Prompt, ReadResourceResult, Resource,
    ResourceContents, Tool,
};

/// Executes one tool
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value) -> Result<CallToolResult, HandlerError>;
}

/// Produces the contents of one resource
#[async_trait]
pub trait ResourceReader: Send + Sync {
    async fn read(&self, uri: &str) -> Result<Vec<ResourceContents>, HandlerError>;
}

/// Expands one prompt template
#[async_trait]
pub trait PromptRenderer: Send + Sync {
    async fn render(&self, arguments: &HashMap<String, String>) -> Result<GetPromptResult, HandlerError>;
}

struct ToolEntry {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

struct ResourceEntry {
    resource: Resource,
    reader: Arc<dyn ResourceReader>,
}

struct PromptEntry {
    prompt: Prompt,
    renderer: Arc<dyn PromptRenderer>,
}

/// Registered capabilities, in registration order
#[derive(Default)]
pub struct CapabilityRegistry {
    tools: Vec<ToolEntry>,
    resources: Vec<ResourceEntry>,
    prompts: Vec<PromptEntry>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_tool(
        &mut self,
        tool: Tool,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), RegistryError> {
        if self.find_tool(&tool.name).is_some() {
            return Err(RegistryError::Duplicate {
                kind: "tool",
                key: tool.name,
            });
        }
        self.tools.push(ToolEntry {
            tool,
            handler: Arc::new(handler),
        });
        Ok(())
    }

    pub fn register_resource(
        &mut self,
        resource: Resource,
        reader: impl ResourceReader + 'static,
    ) -> Result<(), RegistryError> {
        if self.find_resource(&resource.uri).is_some() {
            return Err(RegistryError::Duplicate {
                kind: "resource",
                key: resource.uri,
            });
        }
        self.resources.push(ResourceEntry {
            resource,
            reader: Arc::new(reader),
        });
        Ok(())
    }

    pub fn register_prompt(
        &mut self,
        prompt: Prompt,
        renderer: impl PromptRenderer + 'static,
    ) -> Result<(), RegistryError> {
        if self.find_prompt(&prompt.name).is_some() {
            return Err(RegistryError::Duplicate {
                kind: "prompt",
                key: prompt.name,
            });
        }
        self.prompts.push(PromptEntry {
            prompt,
            renderer: Arc::new(renderer),
        });
        Ok(())
    }

    pub fn tools(&self) -> Vec<Tool> {
        self.tools.iter().map(|e| e.tool.clone()).collect()
    }

    pub fn resources(&self) -> Vec<Resource> {
        self.resources.iter().map(|e| e.resource.clone()).collect()
    }

    pub fn prompts(&self) -> Vec<Prompt> {
        self.prompts.iter().map(|e| e.prompt.clone()).collect()
    }

    pub fn has_tools(&self) -> bool {
        !self.tools.is_empty()
    }

    pub fn has_resources(&self) -> bool {
        !self.resources.is_empty()
    }

    pub fn has_prompts(&self) -> bool {
        !self.prompts.is_empty()
    }

    /// Run the named tool.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, JsonRpcError> {
        let entry = self
            .find_tool(name)
            .ok_or_else(|| JsonRpcError::tool_not_found(name))?;

        entry
            .handler
            .call(arguments)
            .await
            .map_err(|e| e.to_rpc_error())
    }

    /// Read the resource at `uri`.
    pub async fn read_resource(&self, uri: &str) -> Result<ReadResourceResult, JsonRpcError> {
        let entry = self
            .find_resource(uri)
            .ok_or_else(|| JsonRpcError::resource_not_found(uri))?;

        let contents = entry.reader.read(uri).await.map_err(|e| e.to_rpc_error())?;
        Ok(ReadResourceResult { contents })
    }

    /// Render the named prompt after checking its required arguments.
    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: &HashMap<String, String>,
    ) -> Result<GetPromptResult, JsonRpcError> {
        let entry = self
            .find_prompt(name)
            .ok_or_else(|| JsonRpcError::prompt_not_found(name))?;

        let missing: Vec<&str> = entry
            .prompt
            .arguments
            .iter()
            .filter(|arg| arg.required && !arguments.contains_key(&arg.name))
            .map(|arg| arg.name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(JsonRpcError::invalid_params(format!(
                "Missing required arguments for prompt '{}': {}",
                name,
                missing.join(", ")
            ))
            .with_data(json!({ "missing": missing })));
        }

        entry
            .renderer
            .render(arguments)
            .await
            .map_err(|e| e.to_rpc_error())
    }

    fn find_tool(&self, name: &str) -> Option<&ToolEntry> {
        self.tools.iter().find(|e| e.tool.name == name)
    }

    fn find_resource(&self, uri: &str) -> Option<&ResourceEntry> {
        self.resources.iter().find(|e| e.resource.uri == uri)
    }

    fn find_prompt(&self, name: &str) -> Option<&PromptEntry> {
        self.prompts.iter().find(|e| e.prompt.name == name)
    }
}
