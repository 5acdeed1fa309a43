//! MCP error types.

use thiserror::Error;

/// Errors raised by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server process could not be started.
    #[error("failed to start '{command}': {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Writing to the server failed.
    #[error("write error: {0}")]
    WriteError(std::io::Error),

    /// Reading from the server failed.
    #[error("read error: {0}")]
    ReadError(std::io::Error),

    /// HTTP request or event stream failure.
    #[error("http error: {0}")]
    Http(String),

    /// The server closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// The transport has already been closed.
    #[error("not connected")]
    NotConnected,
}

impl TransportError {
    pub(crate) fn spawn_failed(command: &str, source: std::io::Error) -> Self {
        Self::SpawnFailed {
            command: command.to_string(),
            source,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e.to_string())
    }
}

/// Errors raised by MCP operations.
#[derive(Debug, Error)]
pub enum McpError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Invalid server configuration.
    #[error("config error: {0}")]
    Config(String),

    /// Server not found by name.
    #[error("server not found: {0}")]
    ServerNotFound(String),

    /// Tool not found on any server.
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// The server returned a JSON-RPC error.
    #[error("server error (code {code}): {message}")]
    ServerError { code: i32, message: String },

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection is not in the required state.
    #[error("invalid connection state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// No response arrived in time.
    #[error("request '{method}' timed out after {secs} seconds")]
    Timeout { method: String, secs: u64 },

    /// A server with this name is already connected.
    #[error("server already exists: {0}")]
    ServerAlreadyExists(String),
}

impl McpError {
    /// Create a protocol error.
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a config error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a server error from a JSON-RPC error.
    pub fn server_error(code: i32, message: impl Into<String>) -> Self {
        Self::ServerError {
            code,
            message: message.into(),
        }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<McpError> for mcplink_core::Error {
    fn from(e: McpError) -> Self {
        match e {
            McpError::Config(msg) => mcplink_core::Error::Config(msg),
            other => mcplink_core::Error::Mcp(other.to_string()),
        }
    }
}
