//! Tool trait: the abstraction over in-process tool back ends.
//!
//! A `Tool` is something the engine can run itself. Tools the caller must
//! fulfill (declared tools) have no `Tool` implementation at all; invoking
//! one yields [`ToolOutcome::RequiresExternalExecution`] instead of running
//! anything.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ToolError;
use crate::provider::ToolDefinition;

/// A request to execute a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique call ID (matches the LLM's tool_call.id)
    pub id: String,

    pub name: String,

    pub arguments: serde_json::Value,
}

/// The result of an in-process tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,

    pub success: bool,

    pub output: String,

    /// Optional structured data
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// What happened when a tool call was dispatched.
#[derive(Debug, Clone)]
pub enum ToolOutcome {
    /// The tool ran in-process.
    Completed(ToolResult),
    /// The tool has no in-process executor; the caller must fulfill the call.
    RequiresExternalExecution {
        tool_name: String,
        call_id: String,
        arguments: serde_json::Value,
    },
}

/// Whether a tool invocation can be fulfilled in-process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    Server,
    External,
}

/// Provenance and execution mode of a merged tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolMetadata {
    pub name: String,

    pub execution_mode: ExecutionMode,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_description: Option<String>,
}

/// The core Tool trait.
///
/// Builtin tools and tools proxied from an external tool protocol implement
/// this trait; the merged toolset dispatches calls to them.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "web_search").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    /// Where the tool comes from, if worth reporting (e.g. "mcp:github").
    fn origin(&self) -> Option<&str> {
        None
    }

    /// Execute the tool with the given arguments.
    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError>;

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}
