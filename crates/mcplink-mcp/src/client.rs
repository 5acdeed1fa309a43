//! MCP connections and the multi-server client.
//!
//! `McpConnection` drives one server through the handshake and tool calls;
//! `McpClient` keeps the named connections of a session.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::error::McpError;
use crate::protocol::{
    CallToolParams, CallToolResult, Implementation, IncomingMessage, InitializeParams, InitializeResult,
    JsonRpcError, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse, ListToolsResult, McpToolDefinition,
    PaginatedParams, RequestId, ServerCapabilities,
};
use crate::sse::SseTransport;
use crate::transport::{StdioTransport, Transport};

/// Default bound on a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection state for an MCP server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport closed.
    Disconnected,
    /// Transport open, handshake not done.
    Connected,
    /// Handshake done; tools may be listed and called.
    Ready,
    Closing,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Closing => "closing",
        };
        f.write_str(s)
    }
}

/// A connection to a single MCP server.
pub struct McpConnection {
    name: String,
    transport: Mutex<Box<dyn Transport>>,
    state: RwLock<ConnectionState>,
    server_info: RwLock<Option<Implementation>>,
    capabilities: RwLock<Option<ServerCapabilities>>,
    cached_tools: RwLock<Vec<McpToolDefinition>>,
    request_counter: AtomicU64,
    timeout: Duration,
}

impl McpConnection {
    /// Wrap an open transport.
    pub fn new(name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            name: name.into(),
            transport: Mutex::new(transport),
            state: RwLock::new(ConnectionState::Connected),
            server_info: RwLock::new(None),
            capabilities: RwLock::new(None),
            cached_tools: RwLock::new(Vec::new()),
            request_counter: AtomicU64::new(1),
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Bound every request by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    pub async fn is_ready(&self) -> bool {
        self.state().await == ConnectionState::Ready
    }

    /// Server name and version reported during the handshake.
    pub async fn server_info(&self) -> Option<Implementation> {
        self.server_info.read().await.clone()
    }

    pub async fn capabilities(&self) -> Option<ServerCapabilities> {
        self.capabilities.read().await.clone()
    }

    /// Tools from the last `list_tools` call.
    pub async fn tools(&self) -> Vec<McpToolDefinition> {
        self.cached_tools.read().await.clone()
    }

    fn next_request_id(&self) -> RequestId {
        RequestId::from(self.request_counter.fetch_add(1, Ordering::SeqCst))
    }

    async fn require_state(&self, expected: ConnectionState) -> Result<(), McpError> {
        let state = self.state().await;
        if state != expected {
            return Err(McpError::invalid_state(expected.to_string(), state.to_string()));
        }
        Ok(())
    }

    /// Send a request and wait for the response carrying its id.
    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R, McpError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let id = self.next_request_id();
        let request_json = serde_json::to_string(&JsonRpcRequest::new(id.clone(), method, params))?;

        let mut transport = self.transport.lock().await;
        let response = tokio::time::timeout(self.timeout, exchange(&mut **transport, &id, &request_json))
            .await
            .map_err(|_| McpError::Timeout {
                method: method.to_string(),
                secs: self.timeout.as_secs(),
            })??;

        if let Some(error) = response.error {
            return Err(McpError::server_error(error.code, error.message));
        }

        let result = response
            .result
            .ok_or_else(|| McpError::protocol(format!("response to '{}' has no result", method)))?;

        serde_json::from_value(result)
            .map_err(|e| McpError::protocol(format!("unexpected '{}' result: {}", method, e)))
    }

    /// Send a notification (no response expected).
    async fn notify<P: Serialize>(&self, method: &str, params: Option<P>) -> Result<(), McpError> {
        let notification_json = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.transport.lock().await.send(&notification_json).await?;
        Ok(())
    }

    /// Perform the `initialize` handshake.
    pub async fn initialize(&self) -> Result<(), McpError> {
        self.require_state(ConnectionState::Connected).await?;

        debug!(server = %self.name, "Initializing MCP connection");

        let result: InitializeResult = self
            .request("initialize", Some(InitializeParams::default()))
            .await?;

        self.notify::<()>("notifications/initialized", None).await?;

        info!(
            server = %self.name,
            server_name = %result.server_info.name,
            protocol_version = %result.protocol_version,
            "MCP connection initialized"
        );

        *self.capabilities.write().await = Some(result.capabilities);
        *self.server_info.write().await = Some(result.server_info);
        *self.state.write().await = ConnectionState::Ready;
        Ok(())
    }

    /// List every tool, following `nextCursor` pagination.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDefinition>, McpError> {
        self.require_state(ConnectionState::Ready).await?;

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let params = cursor.take().map(|c| PaginatedParams { cursor: Some(c) });
            let page: ListToolsResult = self.request("tools/list", params).await?;
            tools.extend(page.tools);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }

        debug!(server = %self.name, tool_count = tools.len(), "Listed tools");

        *self.cached_tools.write().await = tools.clone();
        Ok(tools)
    }

    /// Call a tool on the server.
    pub async fn call_tool(&self, name: &str, arguments: Option<Value>) -> Result<CallToolResult, McpError> {
        self.require_state(ConnectionState::Ready).await?;

        debug!(server = %self.name, tool = name, "Calling tool");

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };
        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        if result.is_error {
            warn!(server = %self.name, tool = name, "Tool returned error");
        }
        Ok(result)
    }

    /// Close the transport.
    pub async fn close(&self) -> Result<(), McpError> {
        if self.state().await == ConnectionState::Disconnected {
            return Ok(());
        }
        *self.state.write().await = ConnectionState::Closing;

        debug!(server = %self.name, "Closing MCP connection");
        let closed = self.transport.lock().await.close().await;
        *self.state.write().await = ConnectionState::Disconnected;
        closed?;

        info!(server = %self.name, "MCP connection closed");
        Ok(())
    }
}

/// Write a request and read until its response arrives. Notifications are
/// logged, server requests answered, stray responses dropped.
async fn exchange(
    transport: &mut dyn Transport,
    id: &RequestId,
    request_json: &str,
) -> Result<JsonRpcResponse<Value>, McpError> {
    transport.send(request_json).await?;

    loop {
        let raw = transport.receive().await?;
        match IncomingMessage::classify(&raw) {
            Ok(IncomingMessage::Response(response)) if &response.id == id => return Ok(response),
            Ok(IncomingMessage::Response(response)) => {
                warn!(id = %response.id, "Dropping response to an unknown request");
            }
            Ok(IncomingMessage::Notification(notification)) => {
                debug!(method = %notification.method, "Server notification");
            }
            Ok(IncomingMessage::Request(request)) => {
                let reply = if request.method == "ping" {
                    JsonRpcResponse::success(request.id, serde_json::json!({}))
                } else {
                    debug!(method = %request.method, "Rejecting unsupported server request");
                    JsonRpcResponse::failure(request.id, JsonRpcError::method_not_found(&request.method))
                };
                transport.send(&serde_json::to_string(&reply)?).await?;
            }
            Err(e) => warn!(error = %e, "Ignoring malformed server message"),
        }
    }
}

/// How to reach a server.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportConfig {
    /// Spawn a process and talk over its stdio.
    Stdio {
        command: String,
        args: Vec<String>,
        env: HashMap<String, String>,
        working_dir: Option<PathBuf>,
    },
    /// Connect to an HTTP+SSE endpoint.
    Sse {
        url: String,
        headers: HashMap<String, String>,
    },
}

/// Configuration for an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub struct McpServerConfig {
    /// Unique server name.
    pub name: String,
    pub transport: TransportConfig,
    pub enabled: bool,
    /// Bound on each request (and on the SSE endpoint handshake).
    pub request_timeout: Duration,
}

impl McpServerConfig {
    fn with_transport(name: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            name: name.into(),
            transport,
            enabled: true,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// A server launched as `command`.
    pub fn stdio(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Stdio {
                command: command.into(),
                args: Vec::new(),
                env: HashMap::new(),
                working_dir: None,
            },
        )
    }

    /// A server reached over HTTP+SSE at `url`.
    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self::with_transport(
            name,
            TransportConfig::Sse {
                url: url.into(),
                headers: HashMap::new(),
            },
        )
    }

    /// A server script or program given on the command line.
    ///
    /// `.py` scripts run under `python`, `.js`/`.mjs`/`.cjs` under `node`;
    /// anything else is executed directly. The server is named after the
    /// file stem.
    pub fn for_script(path: &str, args: Vec<String>) -> Result<Self, McpError> {
        let script = Path::new(path);
        let name = script
            .file_stem()
            .and_then(|s| s.to_str())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| McpError::config(format!("invalid server path: '{}'", path)))?;

        let launcher = match script.extension().and_then(|e| e.to_str()) {
            Some("py") => Some("python"),
            Some("js" | "mjs" | "cjs") => Some("node"),
            _ => None,
        };

        let config = match launcher {
            Some(launcher) => {
                if !script.is_file() {
                    return Err(McpError::config(format!("server script not found: {}", path)));
                }
                let mut full_args = vec![path.to_string()];
                full_args.extend(args);
                Self::stdio(name, launcher).with_args(full_args)
            }
            None => Self::stdio(name, path).with_args(args),
        };
        Ok(config)
    }

    /// An SSE server named after the URL's host.
    pub fn for_url(url: &str) -> Result<Self, McpError> {
        let parsed = Url::parse(url).map_err(|e| McpError::config(format!("invalid server URL '{}': {}", url, e)))?;
        let name = parsed.host_str().unwrap_or("sse").to_string();
        Ok(Self::sse(name, url))
    }

    /// Set stdio command arguments.
    pub fn with_args(mut self, new_args: Vec<String>) -> Self {
        if let TransportConfig::Stdio { ref mut args, .. } = self.transport {
            *args = new_args;
        }
        self
    }

    /// Add an environment variable for a stdio server.
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Stdio { ref mut env, .. } = self.transport {
            env.insert(key.into(), value.into());
        }
        self
    }

    /// Set the working directory of a stdio server.
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        if let TransportConfig::Stdio { ref mut working_dir, .. } = self.transport {
            *working_dir = Some(dir.into());
        }
        self
    }

    /// Add an HTTP header for an SSE server.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let TransportConfig::Sse { ref mut headers, .. } = self.transport {
            headers.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Human-readable target: the command line or the URL.
    pub fn target(&self) -> String {
        match &self.transport {
            TransportConfig::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            TransportConfig::Stdio { command, args, .. } => format!("{} {}", command, args.join(" ")),
            TransportConfig::Sse { url, .. } => url.clone(),
        }
    }

    async fn open_transport(&self) -> Result<Box<dyn Transport>, McpError> {
        let transport: Box<dyn Transport> = match &self.transport {
            TransportConfig::Stdio {
                command,
                args,
                env,
                working_dir,
            } => Box::new(StdioTransport::spawn(command, args, env, working_dir.as_deref()).await?),
            TransportConfig::Sse { url, headers } => {
                Box::new(SseTransport::connect(url, headers, self.request_timeout).await?)
            }
        };
        Ok(transport)
    }
}

/// Client for managing multiple MCP server connections.
pub struct McpClient {
    connections: RwLock<HashMap<String, Arc<McpConnection>>>,
}

impl McpClient {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Open the transport, run the handshake and register the connection.
    pub async fn connect(&self, config: McpServerConfig) -> Result<Arc<McpConnection>, McpError> {
        if !config.enabled {
            return Err(McpError::config(format!("server '{}' is disabled", config.name)));
        }
        if self.connections.read().await.contains_key(&config.name) {
            return Err(McpError::ServerAlreadyExists(config.name.clone()));
        }

        info!(server = %config.name, target = %config.target(), "Connecting to MCP server");

        let transport = config.open_transport().await?;
        let connection = Arc::new(McpConnection::new(config.name.clone(), transport).with_timeout(config.request_timeout));

        if let Err(e) = connection.initialize().await {
            let _ = connection.close().await;
            return Err(e);
        }

        self.register(Arc::clone(&connection)).await?;
        Ok(connection)
    }

    /// Register an already-initialized connection.
    pub async fn register(&self, connection: Arc<McpConnection>) -> Result<(), McpError> {
        let mut connections = self.connections.write().await;
        if connections.contains_key(connection.name()) {
            return Err(McpError::ServerAlreadyExists(connection.name().to_string()));
        }
        connections.insert(connection.name().to_string(), connection);
        Ok(())
    }

    /// Disconnect from an MCP server.
    pub async fn disconnect(&self, name: &str) -> Result<(), McpError> {
        let connection = self
            .connections
            .write()
            .await
            .remove(name)
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        connection.close().await
    }

    /// Disconnect from all servers. Close failures are logged.
    pub async fn disconnect_all(&self) {
        let connections: Vec<Arc<McpConnection>> = {
            let mut connections = self.connections.write().await;
            connections.drain().map(|(_, conn)| conn).collect()
        };

        for connection in connections {
            if let Err(e) = connection.close().await {
                error!(server = %connection.name(), error = %e, "Failed to close connection");
            }
        }
    }

    pub async fn get(&self, name: &str) -> Option<Arc<McpConnection>> {
        self.connections.read().await.get(name).cloned()
    }

    /// Connected server names, sorted.
    pub async fn list_servers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.connections.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Every cached tool as `(server, tool)`, sorted by server then tool.
    pub async fn all_tools(&self) -> Vec<(String, McpToolDefinition)> {
        let connections: Vec<Arc<McpConnection>> = self.connections.read().await.values().cloned().collect();

        let mut tools = Vec::new();
        for connection in connections {
            for tool in connection.tools().await {
                tools.push((connection.name().to_string(), tool));
            }
        }
        tools.sort_by(|a, b| (&a.0, &a.1.name).cmp(&(&b.0, &b.1.name)));
        tools
    }

    /// Re-list tools on every ready connection. Failures are logged.
    pub async fn refresh_tools(&self) {
        let connections: Vec<Arc<McpConnection>> = self.connections.read().await.values().cloned().collect();

        for connection in connections {
            if connection.is_ready().await {
                if let Err(e) = connection.list_tools().await {
                    error!(server = %connection.name(), error = %e, "Failed to refresh tools");
                }
            }
        }
    }

    /// Call a tool on a specific server.
    pub async fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Option<Value>,
    ) -> Result<CallToolResult, McpError> {
        let connection = self
            .get(server)
            .await
            .ok_or_else(|| McpError::ServerNotFound(server.to_string()))?;

        connection.call_tool(tool, arguments).await
    }
}

impl Default for McpClient {
    fn default() -> Self {
        Self::new()
    }
}
