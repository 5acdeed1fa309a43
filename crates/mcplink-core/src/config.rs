//! Configuration system for mcplink.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Error;

/// Default Gemini model.
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash-001";

/// Environment variable consulted when `api_key_env` is not overridden.
pub const DEFAULT_API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Fallback environment variable for Google AI Studio keys.
pub const FALLBACK_API_KEY_ENV: &str = "GOOGLE_API_KEY";

/// Main configuration struct for mcplink.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,
    /// Resource limits
    pub limits: LimitsConfig,
    /// Gemini provider settings
    pub gemini: GeminiConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Model to use
    pub model: String,
    /// Sampling temperature; provider default when unset
    pub temperature: Option<f32>,
    /// Maximum output tokens; provider default when unset
    pub max_output_tokens: Option<u32>,
    /// Optional system instruction sent with every prompt
    pub system_prompt: Option<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: None,
            max_output_tokens: None,
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Rounds of tool calls dispatched per prompt
    pub max_tool_rounds: usize,
    /// Timeout for a single MCP request, in seconds
    pub request_timeout_secs: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: 1,
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeminiConfig {
    /// API key (can be set directly or via environment)
    pub api_key: Option<String>,
    /// Environment variable name for the API key
    pub api_key_env: String,
    /// Base URL (optional, for proxies or regional endpoints)
    pub base_url: Option<String>,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            base_url: None,
        }
    }
}

impl GeminiConfig {
    /// Resolve the API key from the direct value, the configured
    /// environment variable, or `GOOGLE_API_KEY`, in that order.
    pub fn resolve_api_key(&self) -> Option<String> {
        if let Some(ref key) = self.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }
        [self.api_key_env.as_str(), FALLBACK_API_KEY_ENV]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .find(|key| !key.is_empty())
    }
}

/// Validation result with multiple issues.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    /// List of validation issues
    pub issues: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Create a new empty validation result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if validation passed (no errors).
    pub fn is_ok(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Error)
    }

    /// Get only error-level issues.
    pub fn errors(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Error).collect()
    }

    /// Get only warning-level issues.
    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == IssueSeverity::Warning).collect()
    }

    /// Add an error.
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Error,
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning.
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity: IssueSeverity::Warning,
            field: field.into(),
            message: message.into(),
        });
    }
}

/// A single validation issue.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity of the issue
    pub severity: IssueSeverity,
    /// Field path (e.g., "limits.max_tool_rounds")
    pub field: String,
    /// Human-readable message
    pub message: String,
}

/// Severity level for validation issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueSeverity {
    /// Warnings don't prevent loading
    Warning,
    /// Errors prevent loading
    Error,
}

impl Config {
    /// Build the layered figment: defaults, user config, project config,
    /// then `MCPLINK_*` environment variables (`__` separates sections).
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(Self::config_dir().join("config.toml")))
            .merge(Toml::file(".mcplink.toml"))
            .merge(Env::prefixed("MCPLINK_").split("__"))
    }

    /// Load configuration from all sources.
    pub fn load() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Load and validate configuration.
    pub fn load_validated() -> Result<Self, Error> {
        let config = Self::load().map_err(|e| Error::Config(e.to_string()))?;
        config.ensure_valid()?;
        Ok(config)
    }

    /// Fail on validation errors; log warnings.
    pub fn ensure_valid(&self) -> Result<(), Error> {
        let result = self.validate();

        if !result.is_ok() {
            let errors: Vec<String> = result
                .errors()
                .iter()
                .map(|e| format!("{}: {}", e.field, e.message))
                .collect();
            return Err(Error::Config(format!(
                "Configuration validation failed:\n  {}",
                errors.join("\n  ")
            )));
        }

        for warning in result.warnings() {
            tracing::warn!("Config warning - {}: {}", warning.field, warning.message);
        }

        Ok(())
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::new();

        if self.general.model.trim().is_empty() {
            result.add_error("general.model", "Model name cannot be empty");
        }

        if let Some(temperature) = self.general.temperature {
            if !(0.0..=2.0).contains(&temperature) {
                result.add_error("general.temperature", "temperature must be between 0.0 and 2.0");
            }
        }

        if self.general.max_output_tokens == Some(0) {
            result.add_error("general.max_output_tokens", "max_output_tokens must be greater than 0");
        }

        if self.limits.max_tool_rounds == 0 {
            result.add_error("limits.max_tool_rounds", "max_tool_rounds must be at least 1");
        }

        if self.limits.max_tool_rounds > 10 {
            result.add_warning(
                "limits.max_tool_rounds",
                "max_tool_rounds is high (> 10), a looping model may run many tools",
            );
        }

        if self.limits.request_timeout_secs == 0 {
            result.add_error("limits.request_timeout_secs", "request_timeout_secs must be greater than 0");
        }

        if self.gemini.api_key.as_ref().map(|k| k.is_empty()).unwrap_or(false) {
            result.add_warning("gemini.api_key", "API key is empty string");
        }

        if self.gemini.api_key_env.trim().is_empty() {
            result.add_error("gemini.api_key_env", "api_key_env cannot be empty");
        }

        if let Some(ref base_url) = self.gemini.base_url {
            if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
                result.add_error("gemini.base_url", "base_url must start with http:// or https://");
            }
        }

        result
    }

    /// Get the configuration directory.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("mcplink"))
            .unwrap_or_else(|| PathBuf::from("~/.config/mcplink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        let result = config.validate();
        assert!(result.is_ok(), "Default config should be valid: {:?}", result.issues);
        assert_eq!(config.general.model, DEFAULT_MODEL);
        assert_eq!(config.limits.max_tool_rounds, 1);
    }

    #[test]
    fn test_zero_tool_rounds_is_error() {
        let mut config = Config::default();
        config.limits.max_tool_rounds = 0;
        let result = config.validate();
        assert!(!result.is_ok());
        assert!(result.errors().iter().any(|e| e.field == "limits.max_tool_rounds"));
    }

    #[test]
    fn test_many_tool_rounds_is_warning() {
        let mut config = Config::default();
        config.limits.max_tool_rounds = 25;
        let result = config.validate();
        assert!(result.is_ok());
        assert!(result.warnings().iter().any(|e| e.field == "limits.max_tool_rounds"));
    }

    #[test]
    fn test_invalid_temperature_and_base_url() {
        let mut config = Config::default();
        config.general.temperature = Some(3.5);
        config.gemini.base_url = Some("generativelanguage.googleapis.com".to_string());
        let result = config.validate();
        assert_eq!(result.errors().len(), 2);
    }

    #[test]
    fn test_layered_loading() {
        Jail::expect_with(|jail| {
            jail.create_file(
                ".mcplink.toml",
                r#"
                [general]
                model = "gemini-1.5-pro"
                temperature = 0.0

                [limits]
                max_tool_rounds = 3
                "#,
            )?;
            jail.set_env("MCPLINK_LIMITS__REQUEST_TIMEOUT_SECS", "5");

            let config = Config::load()?;
            assert_eq!(config.general.model, "gemini-1.5-pro");
            assert_eq!(config.general.temperature, Some(0.0));
            assert_eq!(config.limits.max_tool_rounds, 3);
            assert_eq!(config.limits.request_timeout_secs, 5);
            assert_eq!(config.gemini.api_key_env, DEFAULT_API_KEY_ENV);
            Ok(())
        });
    }

    #[test]
    fn test_load_validated_rejects_invalid_file() {
        Jail::expect_with(|jail| {
            jail.create_file(
                ".mcplink.toml",
                r#"
                [general]
                temperature = 3.0

                [gemini]
                api_key = "from-file"
                "#,
            )?;

            match Config::load_validated() {
                Err(Error::Config(message)) => assert!(message.contains("general.temperature")),
                other => panic!("expected a config error, got {:?}", other),
            }
            Ok(())
        });
    }

    #[test]
    fn test_load_validated_accepts_warnings() {
        Jail::expect_with(|jail| {
            jail.create_file(
                ".mcplink.toml",
                r#"
                [limits]
                max_tool_rounds = 20

                [gemini]
                api_key = ""
                "#,
            )?;

            let config = Config::load_validated().expect("warnings must not abort loading");
            assert_eq!(config.limits.max_tool_rounds, 20);
            assert_eq!(config.gemini.api_key.as_deref(), Some(""));
            Ok(())
        });
    }

    #[test]
    fn test_api_key_resolution_order() {
        Jail::expect_with(|jail| {
            jail.set_env("MCPLINK_TEST_KEY", "from-custom-env");
            jail.set_env(FALLBACK_API_KEY_ENV, "from-google-env");

            let mut gemini = GeminiConfig {
                api_key: Some("direct".to_string()),
                api_key_env: "MCPLINK_TEST_KEY".to_string(),
                base_url: None,
            };
            assert_eq!(gemini.resolve_api_key().as_deref(), Some("direct"));

            gemini.api_key = Some(String::new());
            assert_eq!(gemini.resolve_api_key().as_deref(), Some("from-custom-env"));

            gemini.api_key_env = "MCPLINK_TEST_MISSING_KEY".to_string();
            assert_eq!(gemini.resolve_api_key().as_deref(), Some("from-google-env"));
            Ok(())
        });
    }
}
