//! Terminal output: tool call notices, answers and error messages.

use std::io::{self, Write};

use mcplink_agent::{AgentEventHandler, AgentResponse};
use mcplink_core::error::format_error_with_suggestion;
use mcplink_core::{Error, ProviderError, ToolCall};

/// Event handler that announces tool calls on stdout.
pub struct CliEventHandler {
    /// In JSON mode stdout carries only the transcript.
    quiet: bool,
}

impl CliEventHandler {
    pub fn new(quiet: bool) -> Self {
        Self { quiet }
    }
}

impl AgentEventHandler for CliEventHandler {
    fn on_tool_start(&self, call: &ToolCall) {
        if !self.quiet {
            println!("{}", format_tool_call(call));
        }
    }
}

/// The line shown when the model asks for a tool.
pub fn format_tool_call(call: &ToolCall) -> String {
    format!("[Model requested tool call: {} with args {}]", call.name, call.arguments)
}

/// Print a status line. In JSON mode it goes to stderr.
pub fn print_status(json: bool, line: &str) {
    let _ = write_status(&mut io::stdout().lock(), &mut io::stderr().lock(), json, line);
}

fn write_status(out: &mut impl Write, err: &mut impl Write, json: bool, line: &str) -> io::Result<()> {
    if json {
        writeln!(err, "{}", line)
    } else {
        writeln!(out, "{}", line)
    }
}

/// Print the answer, or the whole response as pretty JSON.
pub fn print_response(response: &AgentResponse, json: bool) -> anyhow::Result<()> {
    write_response(&mut io::stdout().lock(), response, json)
}

fn write_response(out: &mut impl Write, response: &AgentResponse, json: bool) -> anyhow::Result<()> {
    if json {
        writeln!(out, "{}", serde_json::to_string_pretty(response)?)?;
    } else {
        writeln!(out, "\n{}", response.content)?;
    }
    Ok(())
}

/// Render an error for the user, with a recovery hint when one is known.
pub fn describe_error(err: &anyhow::Error) -> String {
    for cause in err.chain() {
        if let Some(provider_err) = cause.downcast_ref::<ProviderError>() {
            return format_error_with_suggestion(&Error::Provider(provider_err.clone()));
        }
        if let Some(core_err) = cause.downcast_ref::<Error>() {
            return format_error_with_suggestion(core_err);
        }
    }
    format!("{:#}", err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcplink_agent::AgentError;
    use mcplink_core::Message;
    use mcplink_providers::Usage;
    use serde_json::{json, Value};

    fn response(content: &str) -> AgentResponse {
        AgentResponse {
            content: content.to_string(),
            steps: vec![],
            rounds: 0,
            transcript: vec![Message::user("hi"), Message::assistant(content)],
            total_usage: Usage::default(),
        }
    }

    #[test]
    fn test_json_mode_keeps_stdout_to_the_transcript() {
        let mut out = Vec::new();
        let mut err = Vec::new();

        write_status(&mut out, &mut err, true, "Connected to server with tools: [\"add\"]").unwrap();
        write_response(&mut out, &response("3"), true).unwrap();

        let parsed: Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed["content"], "3");
        assert_eq!(parsed["transcript"].as_array().unwrap().len(), 2);
        assert!(String::from_utf8(err).unwrap().starts_with("Connected to server with tools"));
    }

    #[test]
    fn test_text_mode_prints_status_and_answer() {
        let mut out = Vec::new();
        let mut err = Vec::new();

        write_status(&mut out, &mut err, false, "Connected to server with tools: []").unwrap();
        write_response(&mut out, &response("Hello"), false).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "Connected to server with tools: []\n\nHello\n"
        );
        assert!(err.is_empty());
    }

    #[test]
    fn test_format_tool_call() {
        let call = ToolCall::new("call_0", "get_forecast", json!({"latitude": 47.6}));
        assert_eq!(
            format_tool_call(&call),
            r#"[Model requested tool call: get_forecast with args {"latitude":47.6}]"#
        );
    }

    #[test]
    fn test_describe_provider_error_inside_agent_error() {
        let provider_err = anyhow::Error::new(ProviderError::api_error("gemini", 429, "quota exceeded"));
        let err = anyhow::Error::new(AgentError::Provider(provider_err));

        let text = describe_error(&err);
        assert!(text.contains("429"));
        assert!(text.contains("Suggestion: You've hit rate limits"));
    }

    #[test]
    fn test_describe_not_configured() {
        let err = anyhow::Error::new(ProviderError::not_configured("gemini"));
        let text = describe_error(&err);
        assert!(text.contains("GEMINI_API_KEY"));
        assert!(text.contains("Suggestion:"));
    }

    #[test]
    fn test_describe_plain_error_keeps_context() {
        let err = anyhow::anyhow!("connection refused").context("Failed to connect to MCP server");
        assert_eq!(
            describe_error(&err),
            "Failed to connect to MCP server: connection refused"
        );
    }
}
