//! SSE transport tests against a minimal in-process HTTP server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcplink_mcp::{McpClient, McpServerConfig, SseTransport, Transport};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

const EVENT_STREAM_HEAD: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nCache-Control: no-cache\r\n\r\n";

/// Read one HTTP/1.1 request; returns the request line and body.
async fn read_request(stream: &mut BufReader<TcpStream>) -> Option<(String, String)> {
    let mut request_line = String::new();
    if stream.read_line(&mut request_line).await.ok()? == 0 {
        return None;
    }

    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        stream.read_line(&mut line).await.ok()?;
        let line = line.trim_end();
        if line.is_empty() {
            break;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.trim().parse().ok()?;
            }
        }
    }

    let mut body = vec![0; content_length];
    stream.read_exact(&mut body).await.ok()?;
    Some((request_line.trim_end().to_string(), String::from_utf8(body).ok()?))
}

/// Replies a calculator server sends for one client message.
fn respond(message: &Value) -> Vec<Value> {
    let id = message["id"].clone();
    match message["method"].as_str() {
        Some("initialize") => vec![json!({"jsonrpc": "2.0", "id": id, "result": {
            "protocolVersion": "2024-11-05",
            "capabilities": {"tools": {}},
            "serverInfo": {"name": "calculator", "version": "0.1.0"}
        }})],
        Some("tools/list") => vec![
            json!({"jsonrpc": "2.0", "id": "srv-ping", "method": "ping"}),
            json!({"jsonrpc": "2.0", "id": id, "result": {"tools": [{
                "name": "add",
                "description": "Add two numbers",
                "inputSchema": {"type": "object", "properties": {"a": {"type": "number"}, "b": {"type": "number"}}}
            }]}}),
        ],
        Some("tools/call") => {
            let args = &message["params"]["arguments"];
            let sum = args["a"].as_i64().unwrap_or(0) + args["b"].as_i64().unwrap_or(0);
            vec![json!({"jsonrpc": "2.0", "id": id, "result": {
                "content": [{"type": "text", "text": sum.to_string()}]
            }})]
        }
        _ => vec![],
    }
}

/// Serve one SSE session at `/sse`; every POSTed message is recorded.
async fn spawn_server() -> (String, Arc<Mutex<Vec<Value>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/sse", listener.local_addr().unwrap());
    let received = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&received);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        let (request_line, _) = read_request(&mut stream).await.unwrap();
        assert!(request_line.starts_with("GET /sse"), "unexpected: {}", request_line);

        let mut events = stream.into_inner();
        events.write_all(EVENT_STREAM_HEAD).await.unwrap();
        events
            .write_all(b": connected\n\nevent: endpoint\ndata: /messages?session_id=abc\n\n")
            .await
            .unwrap();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            while let Some(message) = events_rx.recv().await {
                let frame = format!("event: message\ndata: {}\n\n", message);
                if events.write_all(frame.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        while let Ok((stream, _)) = listener.accept().await {
            let events_tx = events_tx.clone();
            let recorded = Arc::clone(&recorded);
            tokio::spawn(async move {
                let mut stream = BufReader::new(stream);
                while let Some((request_line, body)) = read_request(&mut stream).await {
                    assert!(request_line.starts_with("POST /messages?session_id=abc"), "unexpected: {}", request_line);
                    let message: Value = serde_json::from_str(&body).unwrap();
                    recorded.lock().unwrap().push(message.clone());

                    stream
                        .get_mut()
                        .write_all(b"HTTP/1.1 202 Accepted\r\nContent-Length: 0\r\n\r\n")
                        .await
                        .unwrap();
                    for reply in respond(&message) {
                        let _ = events_tx.send(reply);
                    }
                }
            });
        }
    });

    (url, received)
}

#[tokio::test]
async fn test_sse_session() {
    let (url, received) = spawn_server().await;

    let config = McpServerConfig::for_url(&url)
        .unwrap()
        .with_timeout(Duration::from_secs(10));
    assert_eq!(config.name, "127.0.0.1");

    let client = McpClient::new();
    let connection = client.connect(config).await.unwrap();
    assert_eq!(connection.server_info().await.unwrap().name, "calculator");

    let tools = connection.list_tools().await.unwrap();
    assert_eq!(tools.len(), 1);
    assert_eq!(tools[0].name, "add");

    let result = connection
        .call_tool("add", Some(json!({"a": 2, "b": 40})))
        .await
        .unwrap();
    assert_eq!(result.text(), "42");

    client.disconnect_all().await;

    let received = received.lock().unwrap();
    let methods: Vec<&str> = received.iter().filter_map(|m| m["method"].as_str()).collect();
    assert_eq!(
        methods,
        vec!["initialize", "notifications/initialized", "tools/list", "tools/call"]
    );

    let ping_reply = received.iter().find(|m| m["id"] == "srv-ping").unwrap();
    assert_eq!(ping_reply["result"], json!({}));
}

#[tokio::test]
async fn test_endpoint_is_resolved_against_stream_url() {
    let (url, _) = spawn_server().await;
    let mut transport = SseTransport::connect(&url, &HashMap::new(), Duration::from_secs(10))
        .await
        .unwrap();

    assert_eq!(transport.endpoint().path(), "/messages");
    assert_eq!(transport.endpoint().query(), Some("session_id=abc"));
    assert!(transport.is_connected());

    transport.close().await.unwrap();
    assert!(!transport.is_connected());
}

#[tokio::test]
async fn test_stream_closing_before_endpoint() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/sse", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        read_request(&mut stream).await.unwrap();
        let mut stream = stream.into_inner();
        stream.write_all(EVENT_STREAM_HEAD).await.unwrap();
        stream.write_all(b": nothing to see\n\n").await.unwrap();
        stream.shutdown().await.unwrap();
    });

    let result = SseTransport::connect(&url, &HashMap::new(), Duration::from_secs(10)).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_non_success_status_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/sse", listener.local_addr().unwrap());

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        read_request(&mut stream).await.unwrap();
        stream
            .get_mut()
            .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
    });

    let err = SseTransport::connect(&url, &HashMap::new(), Duration::from_secs(10))
        .await
        .err()
        .unwrap();
    assert!(err.to_string().contains("404"));
}

#[tokio::test]
async fn test_silent_server_times_out_on_open() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/sse", listener.local_addr().unwrap());

    // Accept and read the request, then never answer.
    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut stream = BufReader::new(stream);
        read_request(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let started = std::time::Instant::now();
    let err = SseTransport::connect(&url, &HashMap::new(), Duration::from_millis(200))
        .await
        .err()
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(err.to_string().contains("no response"));
    server.abort();
}
