//! Shared fixtures for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use genai_transports::transport::{SocketChannel, SocketConnector};
use genai_transports::{Error, Result};
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Test fixture that manages a mock HTTP server
pub struct MockServerFixture {
    pub server: ServerGuard,
    pub base_url: String,
}

impl MockServerFixture {
    pub async fn new() -> Self {
        let server = Server::new_async().await;
        let base_url = server.url();
        Self { server, base_url }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Mock an event stream at `path` that sends `events` as named SSE frames.
    pub async fn mock_event_stream(&mut self, path: &str, events: &[(&str, &str)]) -> Mock {
        let body = events
            .iter()
            .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
            .collect::<String>();

        self.server
            .mock("GET", path)
            .match_query(Matcher::Any)
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await
    }

    /// Mock a JSON response for `method path`.
    pub async fn mock_json(&mut self, method: &str, path: &str, status: usize, body: &str) -> Mock {
        self.server
            .mock(method, path)
            .match_query(Matcher::Any)
            .with_status(status)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await
    }
}

/// What the fake socket server does in response to one request frame.
#[derive(Debug, Clone)]
pub enum Reply {
    Frame(String),
    /// Close the connection from the server side.
    Close,
    /// Pause before the next reply.
    Delay(Duration),
}

pub type Script = Arc<dyn Fn(&Value) -> Vec<Reply> + Send + Sync>;

/// In-process socket connector driven by a reply script.
///
/// An empty reply list leaves the request hanging.
pub struct ScriptedConnector {
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Duration,
    script: Script,
    sent: Arc<Mutex<Vec<Value>>>,
}

impl ScriptedConnector {
    pub fn new(script: impl Fn(&Value) -> Vec<Reply> + Send + Sync + 'static) -> Self {
        Self {
            attempts: AtomicUsize::new(0),
            failures_remaining: AtomicUsize::new(0),
            delay: Duration::ZERO,
            script: Arc::new(script),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail the next `n` connection attempts.
    pub fn failing(self, n: usize) -> Self {
        self.failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Request frames received so far, across connections.
    pub fn sent(&self) -> Vec<Value> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl SocketConnector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<SocketChannel> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(Error::connection("connection refused"));
        }

        let (out_tx, mut out_rx) = futures::channel::mpsc::unbounded::<String>();
        let (in_tx, in_rx) = futures::channel::mpsc::unbounded::<Result<String>>();
        let script = self.script.clone();
        let sent = self.sent.clone();

        tokio::spawn(async move {
            while let Some(text) = out_rx.next().await {
                let request: Value = serde_json::from_str(&text).unwrap_or(Value::Null);
                sent.lock().unwrap().push(request.clone());
                for reply in script(&request) {
                    match reply {
                        Reply::Frame(frame) => {
                            let _ = in_tx.unbounded_send(Ok(frame));
                        }
                        Reply::Close => return,
                        Reply::Delay(pause) => tokio::time::sleep(pause).await,
                    }
                }
            }
        });

        let outbound = out_tx.sink_map_err(|e| Error::connection(e.to_string()));
        Ok(SocketChannel::new(Box::pin(outbound), Box::pin(in_rx)))
    }
}

/// Request id of a request frame.
pub fn request_id(request: &Value) -> String {
    request["requestId"].as_str().unwrap_or_default().to_string()
}

pub fn prompt(request: &Value) -> String {
    request["payload"]["prompt"].as_str().unwrap_or_default().to_string()
}

pub fn chunk(text: &str, id: &str) -> Reply {
    Reply::Frame(json!({"type": "chunk", "payload": {"text": text}, "requestId": id}).to_string())
}

pub fn success(text: Option<&str>, id: &str) -> Reply {
    let payload = match text {
        Some(t) => json!({"text": t}),
        None => json!({}),
    };
    Reply::Frame(json!({"type": "success", "payload": payload, "requestId": id}).to_string())
}

pub fn server_error(message: &str, code: &str, id: &str) -> Reply {
    Reply::Frame(
        json!({
            "type": "error",
            "payload": {"message": message, "code": code, "statusCode": 500},
            "requestId": id
        })
        .to_string(),
    )
}

/// A reply frame carrying no request id.
pub fn bare(kind: &str, text: &str) -> Reply {
    Reply::Frame(json!({"type": kind, "payload": {"text": text}}).to_string())
}

/// Streams "Hello", " world" and completes, for any request.
pub fn hello_world_script(request: &Value) -> Vec<Reply> {
    let id = request_id(request);
    vec![chunk("Hello", &id), chunk(" world", &id), success(None, &id)]
}
