//! Query processing loop.
//!
//! The [`Agent`] connects a [`Provider`] to a [`ToolBackend`]:
//!
//! ```text
//! Agent
//! ├── Provider (LLM interaction)
//! ├── ToolBackend (MCP tools)
//! └── AgentEventHandler (UI callbacks)
//! ```
//!
//! Every call to [`Agent::run`] starts a fresh conversation. The model sees the
//! prompt and the tool schemas; each tool round executes all requested calls,
//! feeds the results back and asks again, up to `max_tool_rounds` rounds.

use std::sync::Arc;
use std::time::Instant;

use mcplink_core::{Config, ContentPart, Message, ToolBackend, ToolCall, ToolDefinition, ToolResult};
use mcplink_providers::{CompletionRequest, Provider, Usage};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while answering a prompt.
#[derive(Error, Debug)]
pub enum AgentError {
    /// Error from the AI provider.
    #[error("Provider error: {0}")]
    Provider(#[from] anyhow::Error),

    /// Agent not properly configured.
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Result type for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model identifier to use.
    pub model: String,
    /// System prompt.
    pub system_prompt: Option<String>,
    /// Temperature; provider default when unset.
    pub temperature: Option<f32>,
    /// Maximum tokens per response; provider default when unset.
    pub max_tokens: Option<u32>,
    /// Rounds of tool execution allowed per prompt.
    pub max_tool_rounds: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: mcplink_core::config::DEFAULT_MODEL.to_string(),
            system_prompt: None,
            temperature: None,
            max_tokens: None,
            max_tool_rounds: 1,
        }
    }
}

impl AgentConfig {
    /// Take model, sampling and limits from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            model: config.general.model.clone(),
            system_prompt: config.general.system_prompt.clone(),
            temperature: config.general.temperature,
            max_tokens: config.general.max_output_tokens,
            max_tool_rounds: config.limits.max_tool_rounds,
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

/// One model turn and the tools it triggered.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    /// Text content from the model.
    pub content: String,
    /// Tool calls requested (empty if none).
    pub tool_calls: Vec<ToolCall>,
    /// Results of the calls that were executed. Empty when the round limit
    /// stopped execution.
    pub tool_results: Vec<ToolResult>,
    /// Usage for this turn.
    pub usage: Usage,
}

/// Final answer to a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct AgentResponse {
    /// Text of every model turn, joined with newlines.
    pub content: String,
    /// All model turns, in order.
    pub steps: Vec<StepResult>,
    /// Tool rounds executed.
    pub rounds: usize,
    /// Full conversation, from the prompt to the last model turn.
    pub transcript: Vec<Message>,
    /// Usage summed over every turn.
    pub total_usage: Usage,
}

// ============================================================================
// Event Handler
// ============================================================================

/// Handler for agent events during execution.
///
/// This is the interface the CLI uses to show progress while a prompt is
/// being answered.
pub trait AgentEventHandler: Send + Sync {
    /// Called before each request to the model.
    fn on_thinking(&self) {}

    /// Called when a tool execution starts.
    fn on_tool_start(&self, _call: &ToolCall) {}

    /// Called when a tool execution completes.
    fn on_tool_complete(&self, _call: &ToolCall, _result: &ToolResult) {}

    /// Called when the agent completes successfully.
    fn on_complete(&self, _response: &AgentResponse) {}

    /// Called when an error occurs.
    fn on_error(&self, _error: &AgentError) {}

    /// Called with usage statistics for each turn.
    fn on_usage(&self, _usage: &Usage) {}
}

/// Default event handler that does nothing.
pub struct NoOpEventHandler;

impl AgentEventHandler for NoOpEventHandler {}

// ============================================================================
// Agent
// ============================================================================

/// Answers prompts by letting the model call tools.
pub struct Agent {
    /// AI provider for completions.
    provider: Arc<dyn Provider>,
    /// Where tool calls are executed.
    tools: Arc<dyn ToolBackend>,
    /// Agent configuration.
    config: AgentConfig,
    /// Event handler for UI callbacks.
    event_handler: Arc<dyn AgentEventHandler>,
}

impl Agent {
    /// Create a new agent with all dependencies.
    pub fn new(
        provider: Arc<dyn Provider>,
        tools: Arc<dyn ToolBackend>,
        config: AgentConfig,
        event_handler: Arc<dyn AgentEventHandler>,
    ) -> Self {
        Self {
            provider,
            tools,
            config,
            event_handler,
        }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Answer a prompt.
    pub async fn run(&self, prompt: &str) -> AgentResult<AgentResponse> {
        match self.run_loop(prompt).await {
            Ok(response) => {
                self.event_handler.on_complete(&response);
                Ok(response)
            }
            Err(err) => {
                self.event_handler.on_error(&err);
                Err(err)
            }
        }
    }

    async fn run_loop(&self, prompt: &str) -> AgentResult<AgentResponse> {
        let tools = self.tools.definitions();
        let mut messages = vec![Message::user(prompt)];
        let mut steps = Vec::new();
        let mut texts = Vec::new();
        let mut total_usage = Usage::default();
        let mut rounds = 0;

        loop {
            debug!(round = rounds, "Requesting completion");
            let response = self.complete(&messages, &tools).await?;

            total_usage.add(&response.usage);
            self.event_handler.on_usage(&response.usage);

            if !response.content.is_empty() {
                texts.push(response.content.clone());
            }

            if response.tool_calls.is_empty() {
                messages.push(Message::assistant(&response.content));
                steps.push(StepResult {
                    content: response.content,
                    tool_calls: vec![],
                    tool_results: vec![],
                    usage: response.usage,
                });
                break;
            }

            if rounds >= self.config.max_tool_rounds {
                warn!(
                    max_tool_rounds = self.config.max_tool_rounds,
                    requested = response.tool_calls.len(),
                    "Tool round limit reached, not executing further tool calls"
                );
                messages.push(Message::assistant_with_tool_calls(
                    &response.content,
                    response.tool_calls.clone(),
                ));
                steps.push(StepResult {
                    content: response.content,
                    tool_calls: response.tool_calls,
                    tool_results: vec![],
                    usage: response.usage,
                });
                break;
            }

            rounds += 1;
            let results = self.execute_calls(&response.tool_calls).await;

            messages.push(Message::assistant_with_tool_calls(
                &response.content,
                response.tool_calls.clone(),
            ));
            messages.push(Message::tool_results(
                results
                    .iter()
                    .map(|result| ContentPart::ToolResult {
                        tool_use_id: result.tool_call_id.clone(),
                        name: result.name.clone(),
                        content: result.to_response(),
                        is_error: !result.success,
                    })
                    .collect(),
            ));
            steps.push(StepResult {
                content: response.content,
                tool_calls: response.tool_calls,
                tool_results: results,
                usage: response.usage,
            });
        }

        info!(
            rounds,
            turns = steps.len(),
            input_tokens = total_usage.input_tokens,
            output_tokens = total_usage.output_tokens,
            "Prompt answered"
        );

        Ok(AgentResponse {
            content: texts.join("\n"),
            steps,
            rounds,
            transcript: messages,
            total_usage,
        })
    }

    async fn complete(
        &self,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> AgentResult<mcplink_providers::CompletionResponse> {
        self.event_handler.on_thinking();

        let mut request = CompletionRequest::new(self.config.model.clone(), messages.to_vec());
        request.system = self.config.system_prompt.clone();
        request.temperature = self.config.temperature;
        request.max_tokens = self.config.max_tokens;
        request.tools = tools.to_vec();

        Ok(self.provider.complete(request).await?)
    }

    /// Run every call of one round in the order the model asked for them.
    async fn execute_calls(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            self.event_handler.on_tool_start(call);

            let started = Instant::now();
            let result = self.tools.call(call).await;
            let result = result.with_duration(started.elapsed().as_millis() as u64);

            if result.success {
                debug!(tool = %call.name, duration_ms = result.duration_ms, "Tool call succeeded");
            } else {
                warn!(
                    tool = %call.name,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Tool call failed"
                );
            }

            self.event_handler.on_tool_complete(call, &result);
            results.push(result);
        }
        results
    }
}

// ============================================================================
// Agent Builder
// ============================================================================

/// Builder for constructing an [`Agent`].
pub struct AgentBuilder {
    provider: Option<Arc<dyn Provider>>,
    tools: Option<Arc<dyn ToolBackend>>,
    config: AgentConfig,
    event_handler: Option<Arc<dyn AgentEventHandler>>,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentBuilder {
    /// Create a new builder with default configuration.
    pub fn new() -> Self {
        Self {
            provider: None,
            tools: None,
            config: AgentConfig::default(),
            event_handler: None,
        }
    }

    /// Set the AI provider.
    pub fn provider(mut self, provider: Arc<dyn Provider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Set the tool backend.
    pub fn tools(mut self, tools: Arc<dyn ToolBackend>) -> Self {
        self.tools = Some(tools);
        self
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the model.
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    /// Set the system prompt.
    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.system_prompt = Some(prompt.into());
        self
    }

    /// Set the number of tool rounds per prompt.
    pub fn max_tool_rounds(mut self, rounds: usize) -> Self {
        self.config.max_tool_rounds = rounds;
        self
    }

    /// Set the event handler.
    pub fn event_handler(mut self, handler: Arc<dyn AgentEventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    /// Build the agent.
    pub fn build(self) -> AgentResult<Agent> {
        let provider = self
            .provider
            .ok_or_else(|| AgentError::NotConfigured("provider is required".to_string()))?;
        let tools = self
            .tools
            .ok_or_else(|| AgentError::NotConfigured("tool backend is required".to_string()))?;

        if !provider.is_configured() {
            return Err(AgentError::NotConfigured(format!(
                "provider '{}' is missing credentials",
                provider.id()
            )));
        }

        Ok(Agent::new(
            provider,
            tools,
            self.config,
            self.event_handler.unwrap_or_else(|| Arc::new(NoOpEventHandler)),
        ))
    }
}
