//! End-to-end tests against a scripted MCP server speaking over stdio.
#![cfg(unix)]

use std::time::Duration;

use mcplink_core::{ToolBackend, ToolCall};
use mcplink_mcp::{McpError, McpServerConfig, McpServerManager, ServerStatus};
use serde_json::json;

/// A shell "server" that replays a fixed session. Request ids are assigned
/// sequentially by the client, so initialize=1, tools/list=2, tools/call=3.
const SCRIPTED_SERVER: &str = r#"
read -r line
echo '{"jsonrpc":"2.0","method":"notifications/message","params":{"level":"info","data":"starting"}}'
echo '{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"scripted","version":"1.0.0"}}}'
read -r line
read -r line
echo '{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo text back","inputSchema":{"type":"object","properties":{"text":{"type":"string"}},"required":["text"]}}]}}'
read -r line
echo '{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hello back"}],"isError":false}}'
read -r line
"#;

fn scripted(name: &str) -> McpServerConfig {
    McpServerConfig::stdio(name, "sh")
        .with_args(vec!["-c".to_string(), SCRIPTED_SERVER.to_string()])
        .with_timeout(Duration::from_secs(10))
}

#[tokio::test]
async fn test_scripted_session_through_router() {
    let manager = McpServerManager::with_configs(vec![scripted("scripted")]);

    let report = manager.start_all().await;
    assert_eq!(report.connected, vec!["scripted".to_string()]);
    assert!(report.failed.is_empty());

    let connection = manager.client().get("scripted").await.unwrap();
    assert_eq!(connection.server_info().await.unwrap().name, "scripted");

    let router = manager.router().await;
    let definitions = router.definitions();
    assert_eq!(definitions.len(), 1);
    assert_eq!(definitions[0].name, "echo");
    assert_eq!(definitions[0].parameters["required"], json!(["text"]));

    let result = router
        .call(&ToolCall::new("call_1", "echo", json!({"text": "hello"})))
        .await;
    assert!(result.success, "unexpected error: {:?}", result.error);
    assert_eq!(result.output, json!([{"type": "text", "text": "hello back"}]));

    manager.stop_all().await;
    assert_eq!(manager.server_status("scripted").await, ServerStatus::Disconnected);
}

#[tokio::test]
async fn test_server_exiting_during_handshake() {
    let manager = McpServerManager::with_configs(vec![
        McpServerConfig::stdio("quitter", "sh").with_args(vec!["-c".to_string(), "read -r line; exit 0".to_string()]),
    ]);

    let report = manager.start_all().await;
    assert!(report.all_failed());
    assert!(matches!(report.failed[0].1, McpError::Transport(_)));
}

#[tokio::test]
async fn test_silent_server_times_out() {
    let config = McpServerConfig::stdio("sleeper", "sh")
        .with_args(vec!["-c".to_string(), "sleep 30".to_string()])
        .with_timeout(Duration::from_millis(200));

    let manager = McpServerManager::with_configs(vec![config]);
    let report = manager.start_all().await;
    assert!(matches!(report.failed[0].1, McpError::Timeout { .. }));
}
