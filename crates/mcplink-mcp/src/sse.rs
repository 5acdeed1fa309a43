//! HTTP + Server-Sent Events transport.
//!
//! The client opens a long-lived `GET` event stream. The server's first
//! `endpoint` event names the URL that client messages are `POST`ed to;
//! server messages arrive as `message` events on the stream.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CONTENT_TYPE};
use reqwest::{Client, Url};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::transport::Transport;

/// Capacity of the queue between the stream reader and `receive()`.
const MESSAGE_QUEUE: usize = 64;

/// A parsed SSE event.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Value of the `event:` field, if any
    pub event: Option<String>,
    /// `data:` lines joined with `\n`
    pub data: String,
    pub id: Option<String>,
    pub retry: Option<u64>,
}

impl SseEvent {
    /// Event type, defaulting to `message` as the SSE format prescribes.
    pub fn event_type(&self) -> &str {
        self.event.as_deref().unwrap_or("message")
    }
}

/// Incremental SSE parser.
///
/// Bytes are buffered until a full line is available, so chunks may split
/// lines and multi-byte characters anywhere.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
    id: Option<String>,
    retry: Option<u64>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event it completes.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&*line);

            if line.is_empty() {
                if let Some(event) = self.dispatch() {
                    events.push(event);
                }
            } else {
                self.field(line);
            }
        }
        events
    }

    fn field(&mut self, line: &str) {
        if line.starts_with(':') {
            return;
        }

        let (name, value) = match line.split_once(':') {
            Some((name, value)) => (name, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match name {
            "event" => self.event = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => self.retry = value.parse().ok(),
            _ => {}
        }
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        let id = self.id.take();
        let retry = self.retry.take();

        if self.data.is_empty() {
            return None;
        }

        Some(SseEvent {
            event,
            data: std::mem::take(&mut self.data).join("\n"),
            id,
            retry,
        })
    }
}

/// MCP transport over HTTP POST + an SSE response stream.
pub struct SseTransport {
    client: Client,
    endpoint: Url,
    headers: HeaderMap,
    incoming: mpsc::Receiver<String>,
    reader: JoinHandle<()>,
    connected: bool,
}

impl SseTransport {
    /// Open the event stream at `url` and wait up to `timeout` for the
    /// server to announce its message endpoint.
    pub async fn connect(
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base = Url::parse(url).map_err(|e| TransportError::Http(format!("invalid URL '{}': {}", url, e)))?;
        let headers = header_map(headers)?;
        let client = Client::new();

        debug!(url = %base, "Opening SSE stream");

        let request = client
            .get(base.clone())
            .headers(headers.clone())
            .header(ACCEPT, "text/event-stream")
            .send();
        let response = tokio::time::timeout(timeout, request).await.map_err(|_| {
            TransportError::Http(format!(
                "GET {} got no response within {} seconds",
                base,
                timeout.as_secs()
            ))
        })??;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Http(format!("GET {} returned {}", base, status)));
        }

        let (endpoint_tx, endpoint_rx) = oneshot::channel();
        let (message_tx, incoming) = mpsc::channel(MESSAGE_QUEUE);
        let reader = tokio::spawn(read_events(response.bytes_stream(), endpoint_tx, message_tx));

        let announced = match tokio::time::timeout(timeout, endpoint_rx).await {
            Ok(Ok(endpoint)) => endpoint,
            Ok(Err(_)) => {
                return Err(TransportError::Http(
                    "event stream ended before the endpoint event".to_string(),
                ));
            }
            Err(_) => {
                reader.abort();
                return Err(TransportError::Http(format!(
                    "no endpoint event within {} seconds",
                    timeout.as_secs()
                )));
            }
        };

        let endpoint = match resolve_endpoint(&base, &announced) {
            Ok(endpoint) => endpoint,
            Err(e) => {
                reader.abort();
                return Err(e);
            }
        };

        info!(url = %base, endpoint = %endpoint, "SSE transport connected");

        Ok(Self {
            client,
            endpoint,
            headers,
            incoming,
            reader,
            connected: true,
        })
    }

    /// URL that messages are posted to.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

/// Resolve the announced endpoint against the stream URL. The endpoint must
/// stay on the same origin.
fn resolve_endpoint(base: &Url, announced: &str) -> Result<Url, TransportError> {
    let endpoint = base
        .join(announced.trim())
        .map_err(|e| TransportError::Http(format!("invalid endpoint '{}': {}", announced, e)))?;

    if endpoint.origin() != base.origin() {
        return Err(TransportError::Http(format!(
            "endpoint origin does not match {}: {}",
            base, endpoint
        )));
    }
    Ok(endpoint)
}

fn header_map(headers: &HashMap<String, String>) -> Result<HeaderMap, TransportError> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Http(format!("invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::Http(format!("invalid value for header '{}': {}", name, e)))?;
        map.insert(name, value);
    }
    Ok(map)
}

async fn read_events<S, B, E>(
    stream: S,
    endpoint_tx: oneshot::Sender<String>,
    message_tx: mpsc::Sender<String>,
) where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut parser = SseParser::new();
    let mut endpoint_tx = Some(endpoint_tx);

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "SSE stream failed");
                break;
            }
        };

        for event in parser.feed(chunk.as_ref()) {
            match event.event_type() {
                "endpoint" => match endpoint_tx.take() {
                    Some(tx) => {
                        let _ = tx.send(event.data);
                    }
                    None => debug!("Ignoring repeated endpoint event"),
                },
                "message" => {
                    debug!(raw = %event.data, "<- sse");
                    if message_tx.send(event.data).await.is_err() {
                        return;
                    }
                }
                other => debug!(event = other, "Ignoring SSE event"),
            }
        }
    }

    debug!("SSE stream ended");
}

#[async_trait]
impl Transport for SseTransport {
    async fn send(&mut self, message: &str) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        debug!(raw = message, "-> sse");

        let response = self
            .client
            .post(self.endpoint.clone())
            .headers(self.headers.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(message.to_string())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Http(format!(
                "POST {} returned {}: {}",
                self.endpoint, status, body
            )));
        }
        Ok(())
    }

    async fn receive(&mut self) -> Result<String, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        match self.incoming.recv().await {
            Some(message) => Ok(message),
            None => {
                self.connected = false;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.connected {
            debug!(endpoint = %self.endpoint, "Closing SSE transport");
            self.connected = false;
        }
        self.reader.abort();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
