//! Tool definitions and execution types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Definition of a tool the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name (unique identifier)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: Value,
}

impl ToolDefinition {
    /// Create a new tool definition with an empty object schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        }
    }

    /// Set the parameters schema.
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }
}

/// A request to call a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique ID for this tool call
    pub id: String,
    /// Tool name
    pub name: String,
    /// Tool arguments
    pub arguments: Value,
    /// Opaque provider token that must accompany the call when it is sent
    /// back to the model (Gemini's `thoughtSignature`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl ToolCall {
    /// Create a new tool call.
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
            signature: None,
        }
    }

    /// Attach the provider's signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}

/// Result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// ID of the tool call this is responding to
    pub tool_call_id: String,
    /// Name of the tool that ran
    pub name: String,
    /// Whether execution succeeded
    pub success: bool,
    /// Structured output (the tool's content items)
    pub output: Value,
    /// Error message if failed
    pub error: Option<String>,
    /// Execution duration in milliseconds
    pub duration_ms: u64,
}

impl ToolResult {
    /// Create a successful result.
    pub fn success(call: &ToolCall, output: Value) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: true,
            output,
            error: None,
            duration_ms: 0,
        }
    }

    /// Create a failed result.
    pub fn error(call: &ToolCall, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: call.id.clone(),
            name: call.name.clone(),
            success: false,
            output: Value::Null,
            error: Some(error.into()),
            duration_ms: 0,
        }
    }

    /// Set the duration.
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// The payload handed back to the model: `{"result": ...}` on success,
    /// `{"error": ...}` otherwise.
    pub fn to_response(&self) -> Value {
        if self.success {
            json!({ "result": self.output })
        } else {
            json!({ "error": self.error.clone().unwrap_or_default() })
        }
    }
}

/// Something that can list and execute tools on behalf of the model.
#[async_trait]
pub trait ToolBackend: Send + Sync {
    /// Definitions of every tool currently available.
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Execute a tool call. Failures are reported through the result,
    /// never as an `Err`, so the model always gets an answer.
    async fn call(&self, call: &ToolCall) -> ToolResult;
}
