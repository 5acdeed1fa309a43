//! Provider trait definitions.

use async_trait::async_trait;
use mcplink_core::{Message, ToolCall, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Request for a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// Model to use
    pub model: String,
    /// Messages in the conversation
    pub messages: Vec<Message>,
    /// System prompt
    pub system: Option<String>,
    /// Temperature; provider default when unset
    pub temperature: Option<f32>,
    /// Maximum tokens to generate; provider default when unset
    pub max_tokens: Option<u32>,
    /// Available tools
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    /// Create a request with no sampling overrides.
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            system: None,
            temperature: None,
            max_tokens: None,
            tools: vec![],
        }
    }
}

/// Response from a completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    /// Response text
    pub content: String,
    /// Tool calls requested
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Finish reason
    pub finish_reason: FinishReason,
    /// Usage statistics
    pub usage: Usage,
}

/// Reason the completion finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Normal completion
    Stop,
    /// Hit max tokens limit
    MaxTokens,
    /// Tool use requested
    ToolUse,
    /// Content was filtered
    ContentFilter,
}

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Input tokens used
    pub input_tokens: u32,
    /// Output tokens generated
    pub output_tokens: u32,
    /// Cached tokens (if applicable)
    pub cached_tokens: u32,
}

impl Usage {
    /// Accumulate another usage record into this one.
    pub fn add(&mut self, other: &Usage) {
        self.input_tokens += other.input_tokens;
        self.output_tokens += other.output_tokens;
        self.cached_tokens += other.cached_tokens;
    }
}

/// Core provider trait.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider identifier.
    fn id(&self) -> &str;

    /// Human-readable name.
    fn name(&self) -> &str;

    /// Check if provider is configured and ready.
    fn is_configured(&self) -> bool;

    /// Generate a completion.
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usage_accumulates() {
        let mut total = Usage::default();
        total.add(&Usage { input_tokens: 10, output_tokens: 3, cached_tokens: 0 });
        total.add(&Usage { input_tokens: 7, output_tokens: 2, cached_tokens: 4 });
        assert_eq!(total, Usage { input_tokens: 17, output_tokens: 5, cached_tokens: 4 });
    }

    #[test]
    fn test_finish_reason_serializes_snake_case() {
        let json = serde_json::to_string(&FinishReason::MaxTokens).unwrap();
        assert_eq!(json, "\"max_tokens\"");
    }
}
