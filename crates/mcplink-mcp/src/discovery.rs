//! Server lifecycle management.
//!
//! `McpServerManager` owns the configured servers of a session, connects
//! them, and hands the agent a tool router over whatever came up.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::client::{McpClient, McpServerConfig};
use crate::error::McpError;
use crate::tools::McpToolRouter;

/// Outcome of [`McpServerManager::start_all`].
#[derive(Debug, Default)]
pub struct StartReport {
    /// Servers that connected and listed their tools.
    pub connected: Vec<String>,
    /// Servers that failed, with the reason.
    pub failed: Vec<(String, McpError)>,
}

impl StartReport {
    pub fn all_failed(&self) -> bool {
        self.connected.is_empty()
    }
}

/// Manages MCP server connections.
pub struct McpServerManager {
    client: Arc<McpClient>,
    configs: RwLock<Vec<McpServerConfig>>,
}

impl McpServerManager {
    pub fn new() -> Self {
        Self::with_configs(Vec::new())
    }

    pub fn with_configs(configs: Vec<McpServerConfig>) -> Self {
        Self {
            client: Arc::new(McpClient::new()),
            configs: RwLock::new(configs),
        }
    }

    pub fn client(&self) -> Arc<McpClient> {
        Arc::clone(&self.client)
    }

    pub async fn add_config(&self, config: McpServerConfig) {
        self.configs.write().await.push(config);
    }

    pub async fn list_configs(&self) -> Vec<McpServerConfig> {
        self.configs.read().await.clone()
    }

    pub async fn get_config(&self, name: &str) -> Option<McpServerConfig> {
        self.configs.read().await.iter().find(|c| c.name == name).cloned()
    }

    /// Connect every enabled server in order. A server that fails to
    /// connect or list its tools is logged, closed and skipped.
    pub async fn start_all(&self) -> StartReport {
        let configs = self.list_configs().await;
        info!(count = configs.len(), "Starting MCP servers");

        let mut report = StartReport::default();
        for config in configs {
            if !config.enabled {
                debug!(server = %config.name, "Skipping disabled server");
                continue;
            }

            let name = config.name.clone();
            match self.connect(config).await {
                Ok(tool_count) => {
                    info!(server = %name, tool_count, "MCP server ready");
                    report.connected.push(name);
                }
                Err(e) => {
                    error!(server = %name, error = %e, "Failed to start MCP server");
                    report.failed.push((name, e));
                }
            }
        }

        info!(
            connected = report.connected.len(),
            failed = report.failed.len(),
            "MCP servers started"
        );
        report
    }

    /// Start one configured server by name.
    pub async fn start_server(&self, name: &str) -> Result<(), McpError> {
        let config = self
            .get_config(name)
            .await
            .ok_or_else(|| McpError::ServerNotFound(name.to_string()))?;

        self.connect(config).await.map(|_| ())
    }

    async fn connect(&self, config: McpServerConfig) -> Result<usize, McpError> {
        let name = config.name.clone();
        let connection = self.client.connect(config).await?;

        match connection.list_tools().await {
            Ok(tools) => Ok(tools.len()),
            Err(e) => {
                let _ = self.client.disconnect(&name).await;
                Err(e)
            }
        }
    }

    /// Close every connection.
    pub async fn stop_all(&self) {
        info!("Stopping all MCP servers");
        self.client.disconnect_all().await;
    }

    pub async fn stop_server(&self, name: &str) -> Result<(), McpError> {
        self.client.disconnect(name).await
    }

    /// Connected server names, sorted.
    pub async fn list_servers(&self) -> Vec<String> {
        self.client.list_servers().await
    }

    pub async fn server_status(&self, name: &str) -> ServerStatus {
        match self.client.get(name).await {
            Some(connection) => ServerStatus::Connected {
                state: connection.state().await.to_string(),
                tool_count: connection.tools().await.len(),
            },
            None => ServerStatus::Disconnected,
        }
    }

    /// Tool router over the servers connected right now.
    pub async fn router(&self) -> McpToolRouter {
        McpToolRouter::new(self.client()).await
    }
}

impl Default for McpServerManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Status of an MCP server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerStatus {
    Disconnected,
    Connected { state: String, tool_count: usize },
}

impl std::fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Connected { state, tool_count } => write!(f, "{} ({} tools)", state, tool_count),
        }
    }
}
