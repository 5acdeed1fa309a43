//! Message and conversation primitives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tool::ToolCall;

/// Role in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message (instructions)
    System,
    /// User message
    User,
    /// Model response
    Assistant,
    /// Tool result
    Tool,
}

/// Message content types.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text content
    Text(String),
    /// Multiple content parts
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Create text content.
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Get content as text (concatenates parts if needed).
    pub fn as_text(&self) -> String {
        match self {
            Content::Text(s) => s.clone(),
            Content::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Content part of a structured message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text content
    #[serde(rename = "text")]
    Text { text: String },
    /// Tool use request
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Tool result, as handed back to the model
    #[serde(rename = "tool_result")]
    ToolResult {
        tool_use_id: String,
        name: String,
        content: serde_json::Value,
        is_error: bool,
    },
}

/// A message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,
    /// Message role
    pub role: Role,
    /// Message content
    pub content: Content,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Tool calls in this message (for assistant messages)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
}

impl Message {
    fn with_role(role: Role, content: Content) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            tool_calls: vec![],
        }
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, Content::text(content))
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, Content::text(content))
    }

    /// Create an assistant message that requests tool calls.
    pub fn assistant_with_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        let mut message = Self::assistant(content);
        message.tool_calls = tool_calls;
        message
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, Content::text(content))
    }

    /// Create a tool result message.
    pub fn tool_result(
        tool_use_id: impl Into<String>,
        name: impl Into<String>,
        content: serde_json::Value,
        is_error: bool,
    ) -> Self {
        Self::with_role(
            Role::Tool,
            Content::Parts(vec![ContentPart::ToolResult {
                tool_use_id: tool_use_id.into(),
                name: name.into(),
                content,
                is_error,
            }]),
        )
    }

    /// Merge several tool results into one tool-role message.
    pub fn tool_results(parts: Vec<ContentPart>) -> Self {
        Self::with_role(Role::Tool, Content::Parts(parts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_constructors_set_roles() {
        assert_eq!(Message::user("hi").role, Role::User);
        assert_eq!(Message::assistant("hello").role, Role::Assistant);
        assert_eq!(Message::system("be brief").role, Role::System);

        let msg = Message::tool_result("call_1", "add", json!({"result": 3}), false);
        assert_eq!(msg.role, Role::Tool);
        assert!(msg.content.as_text().is_empty());
    }

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::user("a");
        let b = Message::user("a");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_parts_as_text_skips_tool_parts() {
        let content = Content::Parts(vec![
            ContentPart::Text { text: "one".into() },
            ContentPart::ToolUse {
                id: "call_1".into(),
                name: "echo".into(),
                input: json!({}),
            },
            ContentPart::Text { text: "two".into() },
        ]);
        assert_eq!(content.as_text(), "one\ntwo");
    }

    #[test]
    fn test_tool_calls_serialized_only_when_present() {
        let plain = serde_json::to_value(Message::assistant("ok")).unwrap();
        assert!(plain.get("tool_calls").is_none());

        let call = ToolCall::new("call_1", "add", json!({"a": 1}));
        let with_calls =
            serde_json::to_value(Message::assistant_with_tool_calls("", vec![call])).unwrap();
        assert_eq!(with_calls["tool_calls"][0]["name"], "add");
        assert_eq!(with_calls["role"], "assistant");
    }
}
