//! In-memory transport and scripted servers for unit tests.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::client::McpConnection;
use crate::error::TransportError;
use crate::transport::Transport;

type Responder = Box<dyn FnMut(&Value) -> Vec<Value> + Send>;

/// Transport that answers every sent message through a responder closure.
/// `receive()` pends forever once the queue is empty.
pub(crate) struct MockTransport {
    responder: Responder,
    queue: VecDeque<String>,
    sent: Arc<Mutex<Vec<Value>>>,
    connected: bool,
}

impl MockTransport {
    pub(crate) fn new(
        responder: impl FnMut(&Value) -> Vec<Value> + Send + 'static,
    ) -> (Self, Arc<Mutex<Vec<Value>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let transport = Self {
            responder: Box::new(responder),
            queue: VecDeque::new(),
            sent: Arc::clone(&sent),
            connected: true,
        };
        (transport, sent)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let value: Value = serde_json::from_str(message).expect("client sent invalid JSON");
        self.sent.lock().unwrap().push(value.clone());
        for reply in (self.responder)(&value) {
            self.queue.push_back(reply.to_string());
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        match self.queue.pop_front() {
            Some(message) => Ok(message),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Responder for a well-behaved server named `name` exposing `tools`.
///
/// `on_call(tool, arguments)` returns the `tools/call` result; a result of
/// the form `{"__error": {...}}` is sent as a JSON-RPC error instead.
pub(crate) fn tool_server(
    name: &str,
    tools: Value,
    mut on_call: impl FnMut(&str, &Value) -> Value + Send + 'static,
) -> impl FnMut(&Value) -> Vec<Value> + Send + 'static {
    let name = name.to_string();
    move |msg: &Value| {
        let Some(id) = msg.get("id").cloned() else {
            return vec![];
        };
        let result = match msg["method"].as_str() {
            Some("initialize") => json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": name, "version": "0.0.1"}
            }),
            Some("tools/list") => json!({"tools": tools}),
            Some("tools/call") => {
                let tool = msg["params"]["name"].as_str().unwrap_or_default();
                on_call(tool, &msg["params"]["arguments"])
            }
            _ => return vec![],
        };

        match result.get("__error") {
            Some(error) => vec![json!({"jsonrpc": "2.0", "id": id, "error": error})],
            None => vec![json!({"jsonrpc": "2.0", "id": id, "result": result})],
        }
    }
}

/// A connection to a scripted server, initialized and with tools listed.
pub(crate) async fn ready_connection(
    name: &str,
    tools: Value,
    on_call: impl FnMut(&str, &Value) -> Value + Send + 'static,
) -> Arc<McpConnection> {
    let (transport, _) = MockTransport::new(tool_server(name, tools, on_call));
    let connection = McpConnection::new(name, Box::new(transport));
    connection.initialize().await.unwrap();
    connection.list_tools().await.unwrap();
    Arc::new(connection)
}
