//! The `mcpServers` JSON file.
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "weather": { "command": "python", "args": ["weather.py"] },
//!     "remote":  { "url": "http://localhost:8080/sse" }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::client::McpServerConfig;
use crate::error::McpError;

/// Environment variable naming the servers file.
pub const SERVERS_CONFIG_ENV: &str = "MCP_SERVERS_CONFIG";

/// Older name of [`SERVERS_CONFIG_ENV`], still honored.
pub const LEGACY_SERVERS_CONFIG_ENV: &str = "THEAILANGUAGE_CONFIG";

/// File used when neither an argument nor the environment names one.
pub const DEFAULT_SERVERS_FILE: &str = "mcp_servers.json";

/// Older default file name, used when only it exists.
pub const LEGACY_SERVERS_FILE: &str = "theailanguage_config.json";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawServersFile {
    mcp_servers: Option<BTreeMap<String, RawServerEntry>>,
}

#[derive(Debug, Deserialize)]
struct RawServerEntry {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, String>,
    cwd: Option<PathBuf>,
    url: Option<String>,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    disabled: bool,
}

impl RawServerEntry {
    fn into_config(self, name: String, base_dir: Option<&Path>) -> Result<McpServerConfig, McpError> {
        let config = match (self.command, self.url) {
            (Some(command), None) => {
                let mut config = McpServerConfig::stdio(&name, command).with_args(self.args);
                for (key, value) in self.env {
                    config = config.with_env(key, value);
                }
                if let Some(cwd) = self.cwd {
                    let cwd = match base_dir {
                        Some(base) if cwd.is_relative() => base.join(cwd),
                        _ => cwd,
                    };
                    config = config.with_working_dir(cwd);
                }
                config
            }
            (None, Some(url)) => {
                let mut config = McpServerConfig::sse(&name, url);
                for (key, value) in self.headers {
                    config = config.with_header(key, value);
                }
                config
            }
            (Some(_), Some(_)) => {
                return Err(McpError::config(format!(
                    "server '{}' sets both 'command' and 'url'",
                    name
                )));
            }
            (None, None) => {
                return Err(McpError::config(format!(
                    "server '{}' needs either 'command' or 'url'",
                    name
                )));
            }
        };
        Ok(config.with_enabled(!self.disabled))
    }
}

/// Servers declared in a file, in name order.
#[derive(Debug, Clone)]
pub struct ServersFile {
    servers: Vec<McpServerConfig>,
}

impl ServersFile {
    /// Path from the command line, else `MCP_SERVERS_CONFIG` or
    /// `THEAILANGUAGE_CONFIG`, else `mcp_servers.json` in the working
    /// directory. `theailanguage_config.json` is used when only it exists.
    pub fn resolve_path(arg: Option<&str>) -> PathBuf {
        resolve_path_with(arg, |key| std::env::var_os(key), Path::new(""))
    }

    /// Read and parse a servers file. Relative `cwd` entries are resolved
    /// against the file's directory.
    pub fn load(path: &Path) -> Result<Self, McpError> {
        debug!(path = %path.display(), "Loading MCP servers file");

        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => {
                McpError::config(format!("servers file not found: {}", path.display()))
            }
            _ => McpError::Io(e),
        })?;

        Self::parse(&content, path.parent())
    }

    /// Parse a servers document.
    pub fn from_json(json: &str) -> Result<Self, McpError> {
        Self::parse(json, None)
    }

    fn parse(json: &str, base_dir: Option<&Path>) -> Result<Self, McpError> {
        let raw: RawServersFile =
            serde_json::from_str(json).map_err(|e| McpError::config(format!("invalid servers file: {}", e)))?;

        let entries = raw.mcp_servers.unwrap_or_default();
        if entries.is_empty() {
            return Err(McpError::config("no MCP servers found in servers file"));
        }

        let servers = entries
            .into_iter()
            .map(|(name, entry)| entry.into_config(name, base_dir))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { servers })
    }

    pub fn servers(&self) -> &[McpServerConfig] {
        &self.servers
    }

    /// Names of the enabled servers.
    pub fn enabled_names(&self) -> Vec<&str> {
        self.servers
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.name.as_str())
            .collect()
    }

    pub fn into_configs(self) -> Vec<McpServerConfig> {
        self.servers
    }
}

fn resolve_path_with(
    arg: Option<&str>,
    env: impl Fn(&str) -> Option<OsString>,
    dir: &Path,
) -> PathBuf {
    if let Some(arg) = arg {
        return PathBuf::from(arg);
    }
    if let Some(path) = env(SERVERS_CONFIG_ENV).or_else(|| env(LEGACY_SERVERS_CONFIG_ENV)) {
        return PathBuf::from(path);
    }

    let default = dir.join(DEFAULT_SERVERS_FILE);
    let legacy = dir.join(LEGACY_SERVERS_FILE);
    if !default.exists() && legacy.exists() {
        debug!(path = %legacy.display(), "Using legacy servers file");
        return legacy;
    }
    default
}
