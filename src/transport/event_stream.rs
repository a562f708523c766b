//! Server-push transport over server-sent events.

use crate::callbacks::GenerationCallbacks;
use crate::config::EndpointConfig;
use crate::metrics::ChunkTimeline;
use crate::transport::sse::decode_frames;
use crate::transport::{complete, emit_chunk, fail, TransportSession};
use crate::types::wire::{ServerErrorBody, StreamEvent};
use crate::types::{GenerationRequest, TransportKind, TransportOutcome};
use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use std::sync::{Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

const SOURCE: TransportKind = TransportKind::EventStream;

/// Opens one event stream per request, scoped to the request's parameters.
///
/// Stateless across requests apart from a cancellation root used by
/// [`disconnect`](TransportSession::disconnect) to close streams still open.
pub struct EventStreamSession {
    client: reqwest::Client,
    url: String,
    shutdown: Mutex<CancellationToken>,
}

enum Step {
    Completed,
    Failed(Error),
}

impl EventStreamSession {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            shutdown: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn from_config(client: reqwest::Client, endpoints: &EndpointConfig) -> Self {
        Self::new(client, endpoints.event_stream.as_str())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn shutdown_root(&self) -> MutexGuard<'_, CancellationToken> {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn open(&self, request: &GenerationRequest) -> Result<BoxStream<'static, bytes::Bytes>> {
        let response = self
            .client
            .get(&self.url)
            .query(&request.query_pairs())
            .header("accept", "text/event-stream")
            .send()
            .await
            .map_err(|e| {
                Error::connection_with_context(
                    format!("SSE connection error: {}", e),
                    ErrorContext::new()
                        .with_source("event_stream")
                        .with_details(&self.url),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            let parsed = serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| ServerErrorBody::from_value(&v).ok())
                .unwrap_or_default();
            return Err(parsed.into_error("SSE request failed", Some(status.as_u16())));
        }

        tracing::info!(transport = %SOURCE, "event stream opened");
        let bytes = response.bytes_stream().map_err(|e| {
            Error::connection_with_context(
                format!("SSE connection error: {}", e),
                ErrorContext::new().with_source("event_stream"),
            )
        });
        Ok(Box::pin(bytes))
    }
}

#[async_trait]
impl TransportSession for EventStreamSession {
    fn kind(&self) -> TransportKind {
        SOURCE
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<TransportOutcome> {
        if let Err(e) = request.validate() {
            return fail(SOURCE, callbacks, e);
        }

        let cancelled = self.shutdown_root().child_token();
        let mut timeline = ChunkTimeline::start();

        let opened = tokio::select! {
            _ = cancelled.cancelled() => Err(closed_by_caller()),
            opened = self.open(request) => opened,
        };
        let mut frames = match opened {
            Ok(bytes) => decode_frames(bytes),
            Err(e) => return fail(SOURCE, callbacks, e),
        };

        let step = loop {
            let next = tokio::select! {
                _ = cancelled.cancelled() => break Step::Failed(closed_by_caller()),
                next = frames.next() => next,
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => break Step::Failed(e),
                None => {
                    break Step::Failed(Error::connection_with_context(
                        "stream ended before completion",
                        ErrorContext::new().with_source("event_stream"),
                    ))
                }
            };

            match StreamEvent::decode(frame.event.as_deref(), &frame.data) {
                Ok(Some(StreamEvent::Chunk { text })) => {
                    let metrics = timeline.record_chunk(&text);
                    emit_chunk(SOURCE, callbacks, &text, &metrics);
                }
                Ok(Some(StreamEvent::Complete { status })) => {
                    tracing::debug!(transport = %SOURCE, status = ?status, "complete event");
                    break Step::Completed;
                }
                Ok(Some(StreamEvent::Error(body))) => {
                    break Step::Failed(body.into_error("SSE stream error", None));
                }
                Ok(None) => {
                    tracing::debug!(
                        transport = %SOURCE,
                        event = ?frame.event,
                        "ignoring unrecognized event"
                    );
                }
                Err(e) => {
                    // The stream may still recover with the next event.
                    tracing::warn!(transport = %SOURCE, error = %e, "skipping malformed event");
                }
            }
        };

        // Close the underlying connection before reporting the terminal event.
        drop(frames);
        tracing::info!(transport = %SOURCE, "event stream closed");

        match step {
            Step::Completed => {
                let (text, metrics) = timeline.finish();
                complete(SOURCE, callbacks, text, metrics)
            }
            Step::Failed(e) => fail(SOURCE, callbacks, e),
        }
    }

    fn disconnect(&self) {
        let mut root = self.shutdown_root();
        let old = std::mem::replace(&mut *root, CancellationToken::new());
        old.cancel();
    }
}

fn closed_by_caller() -> Error {
    Error::connection_with_context(
        "event stream closed by disconnect",
        ErrorContext::new().with_source("event_stream"),
    )
}
