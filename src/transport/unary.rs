//! Single request/response transport.

use crate::callbacks::GenerationCallbacks;
use crate::config::EndpointConfig;
use crate::metrics::ChunkTimeline;
use crate::transport::{complete, emit_chunk, fail, TransportSession};
use crate::types::wire::{ServerErrorBody, UnaryResponse};
use crate::types::{GenerationRequest, TransportKind, TransportOutcome};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;

const SOURCE: TransportKind = TransportKind::Unary;

/// `POST {unary}/generate`, one JSON body back.
///
/// The whole text is reported as a single synthesized chunk, so its metrics
/// always have `chunk_count == 1` and identical first/average/total latencies.
pub struct UnarySession {
    client: reqwest::Client,
    url: String,
}

impl UnarySession {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn from_config(client: reqwest::Client, endpoints: &EndpointConfig) -> Self {
        Self::new(client, endpoints.unary_generate_url())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn fetch_text(&self, request: &GenerationRequest) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                Error::connection_with_context(
                    format!("REST request failed: {}", e),
                    ErrorContext::new().with_source("unary").with_details(&self.url),
                )
            })?;

        let status = response.status();
        let body = response.bytes().await.map_err(|e| {
            Error::connection_with_context(
                format!("failed to read REST response body: {}", e),
                ErrorContext::new().with_source("unary"),
            )
        })?;

        if !status.is_success() {
            let parsed = serde_json::from_slice::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| ServerErrorBody::from_value(&v).ok())
                .unwrap_or_default();
            return Err(parsed.into_error("API request failed", Some(status.as_u16())));
        }

        let parsed: UnaryResponse = serde_json::from_slice(&body).map_err(|e| {
            Error::protocol_with_context(
                format!("unexpected REST response body: {}", e),
                ErrorContext::new()
                    .with_source("unary")
                    .with_field_path("data.text"),
            )
        })?;
        Ok(parsed.data.text)
    }
}

#[async_trait]
impl TransportSession for UnarySession {
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
        tracing::info!(transport = %SOURCE, url = %self.url, "sending generate request");

        let mut timeline = ChunkTimeline::start();
        let text = match self.fetch_text(request).await {
            Ok(text) => text,
            Err(e) => return fail(SOURCE, callbacks, e),
        };

        // Reuse the chunk-time metrics for the outcome so the three latencies stay equal.
        let metrics = timeline.record_chunk(&text);
        emit_chunk(SOURCE, callbacks, &text, &metrics);
        complete(SOURCE, callbacks, text.trim().to_string(), metrics)
    }

    fn disconnect(&self) {}
}
