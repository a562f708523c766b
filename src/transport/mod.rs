//! Transport sessions.
//!
//! Each session speaks one wire protocol and normalizes it into the
//! [`GenerationCallbacks`] contract:
//!
//! | Session | Protocol | State across requests |
//! |---------|----------|-----------------------|
//! | [`SocketSession`] | persistent WebSocket, typed JSON frames | connection state machine |
//! | [`EventStreamSession`] | server-sent events, one stream per request | none |
//! | [`UnarySession`] | one POST, one JSON body | none |

pub mod connector;
pub mod event_stream;
pub mod http;
pub mod socket;
pub mod sse;
pub mod unary;

pub use connector::{SocketChannel, SocketConnector, TungsteniteConnector};
pub use event_stream::EventStreamSession;
pub use http::build_http_client;
pub use socket::{SocketSession, SocketState};
pub use unary::UnarySession;

use crate::callbacks::GenerationCallbacks;
use crate::types::{GenerationRequest, TransportKind, TransportOutcome};
use crate::{Error, Result};
use async_trait::async_trait;

/// One protocol's connection lifecycle, request dispatch and event normalization.
#[async_trait]
pub trait TransportSession: Send + Sync {
    fn kind(&self) -> TransportKind;

    /// Run one generation to its terminal event.
    ///
    /// Emits zero or more `on_chunk` calls, then exactly one of `on_complete`
    /// (and returns `Ok`) or `on_error` (and returns the same error).
    async fn generate(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<TransportOutcome>;

    /// Release any held connection. Idempotent; safe at any time.
    fn disconnect(&self);
}

/// Report a terminal failure once and hand it back as the settled result.
pub(crate) fn fail<T>(
    source: TransportKind,
    callbacks: &dyn GenerationCallbacks,
    error: Error,
) -> Result<T> {
    tracing::info!(transport = %source, error = %error, "generation failed");
    callbacks.on_error(source, &error);
    Err(error)
}

/// Report a chunk with its cumulative metrics.
pub(crate) fn emit_chunk(
    source: TransportKind,
    callbacks: &dyn GenerationCallbacks,
    text: &str,
    metrics: &crate::metrics::StreamMetrics,
) {
    tracing::debug!(
        transport = %source,
        chunk_count = metrics.chunk_count,
        bytes = text.len(),
        "chunk received"
    );
    callbacks.on_chunk(source, text, metrics);
}

/// Report success and build the outcome from the finished timeline.
pub(crate) fn complete(
    source: TransportKind,
    callbacks: &dyn GenerationCallbacks,
    text: String,
    metrics: crate::metrics::StreamMetrics,
) -> Result<TransportOutcome> {
    tracing::info!(
        transport = %source,
        chunk_count = metrics.chunk_count,
        total_ms = metrics.total_duration_ms,
        "generation complete"
    );
    callbacks.on_complete(source);
    Ok(TransportOutcome {
        source,
        text,
        metrics,
    })
}
