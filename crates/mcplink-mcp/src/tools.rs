//! Tool routing between the model and MCP servers.
//!
//! Tools keep their server-side names. When two servers expose the same
//! name, both are qualified as `<server>__<tool>` so the model can tell
//! them apart. Exposed names are limited to `[A-Za-z0-9_.-]` and 64
//! characters, and any name still taken gets a numeric suffix.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use mcplink_core::{ToolBackend, ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::client::McpClient;
use crate::error::McpError;
use crate::protocol::{CallToolResult, McpToolDefinition};

/// Separator between server and tool in qualified names.
pub const QUALIFIED_SEPARATOR: &str = "__";

/// Longest function name the model accepts.
pub const MAX_TOOL_NAME_LEN: usize = 64;

#[derive(Debug, Clone)]
struct Route {
    exposed: String,
    server: String,
    tool: McpToolDefinition,
}

/// Exposes the tools of every connected server as one [`ToolBackend`].
pub struct McpToolRouter {
    client: Arc<McpClient>,
    routes: Vec<Route>,
}

impl McpToolRouter {
    /// Snapshot the client's current tools.
    pub async fn new(client: Arc<McpClient>) -> Self {
        let tools = client.all_tools().await;

        let pairs: Vec<(&str, &str)> = tools
            .iter()
            .map(|(server, tool)| (server.as_str(), tool.name.as_str()))
            .collect();
        let names = exposed_names(&pairs);

        let routes = tools
            .iter()
            .zip(names)
            .map(|((server, tool), exposed)| Route {
                exposed,
                server: server.clone(),
                tool: tool.clone(),
            })
            .collect::<Vec<_>>();

        for route in routes.iter().filter(|r| r.exposed != r.tool.name) {
            debug!(server = %route.server, tool = %route.tool.name, exposed = %route.exposed, "Exposing tool under a different name");
        }

        Self { client, routes }
    }

    /// Names the model sees, in server then tool order.
    pub fn tool_names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.exposed.as_str()).collect()
    }

    /// Owning server and server-side name for an exposed tool name.
    pub fn resolve(&self, exposed: &str) -> Option<(&str, &str)> {
        self.routes
            .iter()
            .find(|r| r.exposed == exposed)
            .map(|r| (r.server.as_str(), r.tool.name.as_str()))
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    fn to_tool_result(call: &ToolCall, result: CallToolResult) -> ToolResult {
        if result.is_error {
            let message = result.text();
            let message = if message.is_empty() {
                "tool reported an error".to_string()
            } else {
                message
            };
            return ToolResult::error(call, message);
        }

        let output = serde_json::to_value(&result.content).unwrap_or_else(|_| Value::Array(vec![]));
        ToolResult::success(call, output)
    }
}

/// Exposed name for each `(server, tool)` pair, in the same order.
///
/// Names shared by several servers are qualified, then every name is made
/// safe for the model. Tools whose name needed no change are placed first,
/// so a real tool never loses its name to a qualified one.
fn exposed_names(tools: &[(&str, &str)]) -> Vec<String> {
    let mut occurrences: HashMap<&str, usize> = HashMap::new();
    for (_, tool) in tools {
        *occurrences.entry(*tool).or_default() += 1;
    }

    let candidates: Vec<String> = tools
        .iter()
        .map(|(server, tool)| {
            if occurrences[tool] > 1 {
                sanitize_name(&format!("{}{}{}", server, QUALIFIED_SEPARATOR, tool))
            } else {
                sanitize_name(tool)
            }
        })
        .collect();

    let mut order: Vec<usize> = (0..tools.len()).collect();
    order.sort_by_key(|&i| candidates[i] != tools[i].1);

    let mut taken = HashSet::new();
    let mut exposed = vec![String::new(); tools.len()];
    for i in order {
        let mut name = candidates[i].clone();
        let mut n = 2;
        while taken.contains(&name) {
            name = with_suffix(&candidates[i], n);
            n += 1;
        }
        taken.insert(name.clone());
        exposed[i] = name;
    }
    exposed
}

/// Replace characters outside `[A-Za-z0-9_.-]` and cut to the length limit.
fn sanitize_name(name: &str) -> String {
    let mut clean: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if clean.is_empty() {
        clean.push_str("tool");
    }
    clean.truncate(MAX_TOOL_NAME_LEN);
    clean
}

fn with_suffix(base: &str, n: usize) -> String {
    let suffix = format!("_{}", n);
    // base is ASCII after sanitizing
    let keep = base.len().min(MAX_TOOL_NAME_LEN - suffix.len());
    format!("{}{}", &base[..keep], suffix)
}

#[async_trait]
impl ToolBackend for McpToolRouter {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.routes
            .iter()
            .map(|r| {
                ToolDefinition::new(&r.exposed, r.tool.description.clone().unwrap_or_default())
                    .with_parameters(r.tool.input_schema.clone())
            })
            .collect()
    }

    async fn call(&self, call: &ToolCall) -> ToolResult {
        let Some((server, tool)) = self.resolve(&call.name) else {
            warn!(tool = %call.name, "Model requested an unknown tool");
            return ToolResult::error(call, McpError::ToolNotFound(call.name.clone()).to_string());
        };

        let arguments = match &call.arguments {
            Value::Null => None,
            args => Some(args.clone()),
        };

        let start = Instant::now();
        let result = match self.client.call_tool(server, tool, arguments).await {
            Ok(result) => Self::to_tool_result(call, result),
            Err(e) => {
                error!(server, tool, error = %e, "Tool call failed");
                ToolResult::error(call, e.to_string())
            }
        };
        result.with_duration(start.elapsed().as_millis() as u64)
    }
}
