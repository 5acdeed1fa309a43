//! Google Gemini provider implementation.
//!
//! Talks to the `generateContent` endpoint of the Generative Language API
//! with function calling enabled.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, instrument};

use mcplink_core::{Config, Content, ContentPart, Message, ProviderError, Role, ToolCall, ToolDefinition};

use crate::schema::function_parameters;
use crate::traits::{CompletionRequest, CompletionResponse, FinishReason, Provider, Usage};

/// Default Gemini API base URL.
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

const PROVIDER_ID: &str = "gemini";

/// Gemini provider.
pub struct GeminiProvider {
    client: Client,
    api_key: String,
    base_url: String,
    default_model: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_API_URL.to_string(),
            default_model: mcplink_core::config::DEFAULT_MODEL.to_string(),
        }
    }

    /// Build a provider from configuration, failing when no API key resolves.
    pub fn from_config(config: &Config) -> Result<Self, ProviderError> {
        let api_key = config
            .gemini
            .resolve_api_key()
            .ok_or_else(|| ProviderError::not_configured(PROVIDER_ID))?;

        let mut provider = Self::new(api_key).with_default_model(config.general.model.clone());
        if let Some(ref url) = config.gemini.base_url {
            provider = provider.with_base_url(url.clone());
        }
        Ok(provider)
    }

    /// Set a custom base URL (for proxies or regional endpoints).
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Set the default model.
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = model.into();
        self
    }

    fn endpoint(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("{}/models/{}:generateContent", self.base_url, model)
    }

    /// Build the wire request. System messages in the conversation are folded
    /// into the system instruction.
    fn build_request(&self, request: &CompletionRequest) -> GenerateContentRequest {
        let mut system_texts: Vec<String> = request.system.iter().cloned().collect();
        let mut contents = Vec::new();

        for message in &request.messages {
            if message.role == Role::System {
                system_texts.push(message.content.as_text());
                continue;
            }
            let content = convert_message(message);
            if !content.parts.is_empty() {
                contents.push(content);
            }
        }

        let system_instruction = if system_texts.is_empty() {
            None
        } else {
            Some(GeminiContent {
                role: None,
                parts: vec![GeminiPart::text(system_texts.join("\n\n"))],
            })
        };

        let tools = if request.tools.is_empty() {
            vec![]
        } else {
            vec![GeminiTool {
                function_declarations: request.tools.iter().map(convert_tool).collect(),
            }]
        };

        let generation_config = if request.temperature.is_some() || request.max_tokens.is_some() {
            Some(GenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
            })
        } else {
            None
        };

        GenerateContentRequest {
            contents,
            system_instruction,
            tools,
            generation_config,
        }
    }

    /// Parse the wire response into our format.
    fn parse_response(&self, response: GenerateContentResponse) -> Result<CompletionResponse, ProviderError> {
        if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
            return Err(ProviderError::Blocked {
                provider: PROVIDER_ID.to_string(),
                reason,
            });
        }

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::EmptyResponse {
                provider: PROVIDER_ID.to_string(),
            })?;

        let parts = candidate.content.map(|c| c.parts).unwrap_or_default();
        let mut texts = Vec::new();
        let mut tool_calls = Vec::new();

        for part in parts {
            if let Some(text) = part.text {
                if !text.is_empty() {
                    texts.push(text);
                }
            }
            if let Some(call) = part.function_call {
                let id = call
                    .id
                    .filter(|id| !id.is_empty())
                    .unwrap_or_else(|| format!("call_{}", tool_calls.len() + 1));
                let arguments = if call.args.is_null() {
                    Value::Object(Default::default())
                } else {
                    call.args
                };
                let mut tool_call = ToolCall::new(id, call.name, arguments);
                if let Some(signature) = part.thought_signature.filter(|s| !s.is_empty()) {
                    tool_call = tool_call.with_signature(signature);
                }
                tool_calls.push(tool_call);
            }
        }

        let finish_reason = if !tool_calls.is_empty() {
            FinishReason::ToolUse
        } else {
            map_finish_reason(candidate.finish_reason.as_deref())
        };

        let usage = response
            .usage_metadata
            .map(|u| Usage {
                input_tokens: u.prompt_token_count,
                output_tokens: u.candidates_token_count,
                cached_tokens: u.cached_content_token_count,
            })
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: texts.join(""),
            tool_calls,
            finish_reason,
            usage,
        })
    }
}

fn map_finish_reason(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("MAX_TOKENS") => FinishReason::MaxTokens,
        Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII") => {
            FinishReason::ContentFilter
        }
        _ => FinishReason::Stop,
    }
}

fn convert_message(message: &Message) -> GeminiContent {
    let role = match message.role {
        Role::Assistant => "model",
        Role::User | Role::Tool | Role::System => "user",
    };

    let mut parts = Vec::new();
    match &message.content {
        Content::Text(text) => {
            if !text.is_empty() {
                parts.push(GeminiPart::text(text.clone()));
            }
        }
        Content::Parts(content_parts) => {
            for part in content_parts {
                match part {
                    ContentPart::Text { text } => parts.push(GeminiPart::text(text.clone())),
                    ContentPart::ToolUse { id, name, input } => {
                        parts.push(GeminiPart::function_call(id, name, input.clone(), None))
                    }
                    ContentPart::ToolResult { name, content, .. } => parts.push(GeminiPart {
                        function_response: Some(GeminiFunctionResponse {
                            name: name.clone(),
                            response: content.clone(),
                        }),
                        ..Default::default()
                    }),
                }
            }
        }
    }

    for call in &message.tool_calls {
        parts.push(GeminiPart::function_call(
            &call.id,
            &call.name,
            call.arguments.clone(),
            call.signature.clone(),
        ));
    }

    GeminiContent {
        role: Some(role.to_string()),
        parts,
    }
}

fn convert_tool(tool: &ToolDefinition) -> FunctionDeclaration {
    FunctionDeclaration {
        name: tool.name.clone(),
        description: tool.description.clone(),
        parameters: function_parameters(&tool.parameters),
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn id(&self) -> &str {
        PROVIDER_ID
    }

    fn name(&self) -> &str {
        "Google Gemini"
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    #[instrument(skip(self, request), fields(model = %request.model))]
    async fn complete(&self, request: CompletionRequest) -> anyhow::Result<CompletionResponse> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let api_request = self.build_request(&request);
        debug!(
            contents = api_request.contents.len(),
            tools = request.tools.len(),
            "Sending request to Gemini API"
        );

        let response = self
            .client
            .post(self.endpoint(model))
            .header("x-goog-api-key", &self.api_key)
            .json(&api_request)
            .send()
            .await
            .map_err(|e| ProviderError::NetworkError {
                provider: PROVIDER_ID.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<GeminiErrorResponse>(&error_text)
                .map(|e| e.error.message)
                .unwrap_or(error_text);
            error!("Gemini API error: {} - {}", status, message);
            return Err(ProviderError::api_error(PROVIDER_ID, status.as_u16(), message).into());
        }

        let api_response: GenerateContentResponse = response.json().await.map_err(|e| {
            ProviderError::NetworkError {
                provider: PROVIDER_ID.to_string(),
                message: format!("invalid response body: {}", e),
            }
        })?;

        Ok(self.parse_response(api_response)?)
    }
}

// Gemini API types

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<GeminiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<GeminiFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<GeminiFunctionResponse>,
    /// Returned next to a function call; must be echoed back verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
}

impl GeminiPart {
    fn text(text: String) -> Self {
        Self {
            text: Some(text),
            ..Default::default()
        }
    }

    fn function_call(id: &str, name: &str, args: Value, thought_signature: Option<String>) -> Self {
        Self {
            function_call: Some(GeminiFunctionCall {
                id: Some(id.to_string()),
                name: name.to_string(),
                args,
            }),
            thought_signature,
            ..Default::default()
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionCall {
    /// Only read; synthetic ids are never sent back.
    #[serde(default, skip_serializing)]
    id: Option<String>,
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct FunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    cached_content_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiErrorBody,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorBody {
    message: String,
}
