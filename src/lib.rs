//! # genai-transports
//!
//! 多传输生成客户端：同一请求并发发往 WebSocket、SSE 与 REST 三种传输并统一回调。
//!
//! Client-side coordination of three generation transports. One request is
//! fanned out to a persistent WebSocket session, a server-sent-events stream
//! and a plain REST call; every transport reports through the same tagged
//! callback contract and is measured by the same streaming metrics.
//!
//! ## Core Philosophy
//!
//! - **Settle-All**: a failing transport never cancels or hides the others
//! - **One Contract**: chunks, completion and errors arrive tagged with their [`TransportKind`]
//! - **Comparable Metrics**: every transport is timed with the same [`StreamMetrics`] rules
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use genai_transports::{Coordinator, EndpointConfig, EventRecorder, GenerationRequest};
//!
//! #[tokio::main]
//! async fn main() -> genai_transports::Result<()> {
//!     let coordinator = Coordinator::new(EndpointConfig::from_cdn_domain("cdn.example.com")?)?;
//!     let recorder = EventRecorder::new();
//!
//!     let request = GenerationRequest::new("Write a haiku about latency").with_max_tokens(64);
//!     for outcome in coordinator.generate_all(&request, &recorder).await? {
//!         println!("{}: {:.1} ms", outcome.source, outcome.metrics.total_duration_ms);
//!     }
//!
//!     coordinator.disconnect();
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | [`Coordinator`] fan-out and its builder |
//! | [`transport`] | Socket, event-stream and unary sessions |
//! | [`metrics`] | Chunk timeline, [`StreamMetrics`] and token estimation |
//! | [`callbacks`] | The [`GenerationCallbacks`] contract and ready-made sinks |
//! | [`config`] | Endpoint resolution from env, YAML or a CDN domain |
//! | [`types`] | Requests, normalized events, outcomes and wire frames |

pub mod callbacks;
pub mod client;
pub mod config;
pub mod metrics;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use callbacks::{noop_callbacks, EventRecorder, GenerationCallbacks, NoopCallbacks};
pub use client::{Coordinator, CoordinatorBuilder};
pub use config::EndpointConfig;
pub use metrics::{StreamMetrics, TokenCounter, WordEstimator};
pub use transport::{
    EventStreamSession, SocketConnector, SocketSession, SocketState, TransportSession,
    UnarySession,
};
pub use types::{GenerationRequest, NormalizedEvent, Settlement, TransportKind, TransportOutcome};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind};
