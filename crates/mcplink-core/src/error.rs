//! Error types for mcplink.
//!
//! Structured errors that carry enough context to print a recovery
//! suggestion next to the failure.

use thiserror::Error;

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for mcplink.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider error with structured details
    #[error("{0}")]
    Provider(#[from] ProviderError),

    /// MCP error
    #[error("MCP error: {0}")]
    Mcp(String),

    /// Tool execution error
    #[error("Tool error: {0}")]
    Tool(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Not found error
    #[error("Not found: {0}")]
    NotFound(String),
}

impl Error {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            Error::Config(_) => Some("Check your config file at ~/.config/mcplink/config.toml"),
            Error::Provider(e) => e.recovery_suggestion(),
            Error::Mcp(_) => Some("Check that the MCP server command or URL is correct and reachable"),
            Error::NotFound(_) => Some("Check the path passed on the command line"),
            _ => None,
        }
    }

    /// Create a provider-not-configured error.
    pub fn provider_not_configured(provider: &str) -> Self {
        Error::Provider(ProviderError::not_configured(provider))
    }
}

/// Provider-specific errors with detailed context.
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Provider not configured
    #[error("Provider '{provider}' is not configured{}", env_var.as_ref().map(|v| format!(": {} not found", v)).unwrap_or_default())]
    NotConfigured {
        provider: String,
        env_var: Option<String>,
    },

    /// API request failed
    #[error("API request to {provider} failed: {status} - {message}")]
    ApiError {
        provider: String,
        status: u16,
        message: String,
    },

    /// Prompt or response was blocked by the provider
    #[error("Request was blocked by {provider}: {reason}")]
    Blocked { provider: String, reason: String },

    /// The provider answered without any candidate content
    #[error("{provider} returned an empty response")]
    EmptyResponse { provider: String },

    /// Network error
    #[error("Network error connecting to {provider}: {message}")]
    NetworkError { provider: String, message: String },
}

impl ProviderError {
    /// Get a recovery suggestion for this error.
    pub fn recovery_suggestion(&self) -> Option<&'static str> {
        match self {
            ProviderError::NotConfigured {
                env_var: Some(_), ..
            } => Some("Add the API key to your environment or to a .env file"),
            ProviderError::NotConfigured { .. } => {
                Some("Configure the provider in ~/.config/mcplink/config.toml")
            }
            ProviderError::ApiError {
                status: 401 | 403, ..
            } => Some("Check that your API key is valid and not expired"),
            ProviderError::ApiError { status: 429, .. } => {
                Some("You've hit rate limits. Wait a moment and try again")
            }
            ProviderError::ApiError {
                status: 500..=599, ..
            } => Some("The API service is having issues. Try again later"),
            ProviderError::Blocked { .. } => {
                Some("Rephrase your request to avoid triggering content filters")
            }
            ProviderError::NetworkError { .. } => Some("Check your internet connection"),
            _ => None,
        }
    }

    /// Create a not-configured error, naming the env var the provider reads.
    pub fn not_configured(provider: &str) -> Self {
        ProviderError::NotConfigured {
            provider: provider.to_string(),
            env_var: match provider {
                "gemini" => Some("GEMINI_API_KEY".to_string()),
                _ => None,
            },
        }
    }

    /// Create an API error from status code and message.
    pub fn api_error(provider: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        ProviderError::ApiError {
            provider: provider.into(),
            status,
            message: message.into(),
        }
    }
}

/// Format an error with its recovery suggestion.
pub fn format_error_with_suggestion(error: &Error) -> String {
    let mut output = error.to_string();
    if let Some(suggestion) = error.recovery_suggestion() {
        output.push_str(&format!("\n  Suggestion: {}", suggestion));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_not_configured() {
        let err = Error::provider_not_configured("gemini");
        assert_eq!(
            err.to_string(),
            "Provider 'gemini' is not configured: GEMINI_API_KEY not found"
        );
        assert!(err.recovery_suggestion().unwrap().contains(".env"));
    }

    #[test]
    fn test_unknown_provider_has_no_env_var() {
        let err = ProviderError::not_configured("other");
        assert_eq!(err.to_string(), "Provider 'other' is not configured");
        assert!(err.recovery_suggestion().unwrap().contains("config.toml"));
    }

    #[test]
    fn test_api_error() {
        let err = ProviderError::api_error("gemini", 429, "Rate limited");
        assert!(err.to_string().contains("429"));
        assert!(err.recovery_suggestion().is_some());

        let err = ProviderError::api_error("gemini", 400, "Bad schema");
        assert!(err.recovery_suggestion().is_none());
    }

    #[test]
    fn test_format_with_suggestion() {
        let err = Error::Provider(ProviderError::NetworkError {
            provider: "gemini".into(),
            message: "dns failure".into(),
        });
        let text = format_error_with_suggestion(&err);
        assert!(text.starts_with("Network error connecting to gemini"));
        assert!(text.contains("Suggestion: Check your internet connection"));
    }
}
