//! Persistent bidirectional transport over a WebSocket.
//!
//! State machine: `Disconnected -> Connecting -> Open`, back to `Disconnected`
//! on [`disconnect`](TransportSession::disconnect), on a read/write failure, or
//! when the server closes the connection. A close while idle is noticed the next
//! time the session looks at the connection, including [`SocketSession::state`].
//! There is no background reconnect; the next `generate` (or an explicit
//! [`SocketSession::connect`]) opens a fresh connection.
//!
//! A generation dropped before its terminal reply takes the connection down
//! with it, so replies still in flight for it never reach the next request.
//!
//! Connection establishment is single-flight: callers that arrive while an
//! attempt is in progress wait for that attempt and share its result.
//!
//! One generation at a time per session. A second overlapping `generate`
//! fails with [`Error::Busy`] instead of interleaving replies, since the
//! backend is not required to echo the request id on every reply.

use crate::callbacks::GenerationCallbacks;
use crate::config::EndpointConfig;
use crate::metrics::ChunkTimeline;
use crate::transport::connector::{SocketChannel, SocketConnector, TungsteniteConnector};
use crate::transport::{complete, emit_chunk, fail, TransportSession};
use crate::types::wire::{SocketEnvelope, SocketReply, SocketRequestFrame};
use crate::types::{GenerationRequest, TransportKind, TransportOutcome};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::{FutureExt, SinkExt, StreamExt};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const SOURCE: TransportKind = TransportKind::Socket;

/// How long a background close handshake may take before the socket is just dropped.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection state reported by [`SocketSession::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocketState {
    Disconnected,
    Connecting,
    Open,
}

impl fmt::Display for SocketState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SocketState::Disconnected => "disconnected",
            SocketState::Connecting => "connecting",
            SocketState::Open => "open",
        })
    }
}

struct Link {
    channel: Option<SocketChannel>,
    /// Error of the most recent failed attempt, handed to callers that waited on it.
    last_error: Option<Error>,
}

enum Step {
    Completed,
    /// The backend reported an error; the connection itself is still usable.
    Failed(Error),
    /// The request frame could not be written.
    Unsent(Error),
    /// The connection is gone.
    Dropped(Error),
}

/// Clears the in-flight flag on every exit path, including a dropped future.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlight(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Resets `Connecting` when an attempt is dropped before it resolves.
struct PendingAttempt<'a> {
    session: &'a SocketSession,
    resolved: bool,
}

impl Drop for PendingAttempt<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.session.set_state(SocketState::Disconnected);
        }
    }
}

/// The link, held for one request/reply exchange.
///
/// Unless the exchange is settled on a terminal reply, dropping it discards the
/// connection: whatever the server still sends belongs to the abandoned request.
struct Exchange<'a> {
    session: &'a SocketSession,
    link: tokio::sync::MutexGuard<'a, Link>,
    settled: bool,
}

impl Exchange<'_> {
    fn settle(mut self) {
        self.settled = true;
    }

    fn discard(&mut self) {
        if let Some(channel) = self.link.channel.take() {
            info!(transport = %SOURCE, "WebSocket closed");
            close_in_background(channel);
        }
        self.session.set_state(SocketState::Disconnected);
    }
}

impl Drop for Exchange<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.discard();
        }
    }
}

pub struct SocketSession {
    url: String,
    connector: Arc<dyn SocketConnector>,
    state: Mutex<SocketState>,
    link: tokio::sync::Mutex<Link>,
    /// Completed connection attempts, successful or not.
    attempts: AtomicU64,
    shutdown: Mutex<CancellationToken>,
    in_flight: AtomicBool,
}

impl SocketSession {
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_connector(url, Arc::new(TungsteniteConnector::new()))
    }

    pub fn from_config(endpoints: &EndpointConfig, connector: Arc<dyn SocketConnector>) -> Self {
        Self::with_connector(endpoints.socket.as_str(), connector)
    }

    pub fn with_connector(url: impl Into<String>, connector: Arc<dyn SocketConnector>) -> Self {
        Self {
            url: url.into(),
            connector,
            state: Mutex::new(SocketState::Disconnected),
            link: tokio::sync::Mutex::new(Link {
                channel: None,
                last_error: None,
            }),
            attempts: AtomicU64::new(0),
            shutdown: Mutex::new(CancellationToken::new()),
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Current state. An idle connection the server has closed reads as `Disconnected`.
    pub fn state(&self) -> SocketState {
        if *self.state_guard() == SocketState::Open {
            // A generation holding the link notices a close itself.
            if let Ok(mut link) = self.link.try_lock() {
                self.reap_idle(&mut link);
            }
        }
        *self.state_guard()
    }

    pub fn is_open(&self) -> bool {
        self.state() == SocketState::Open
    }

    /// Whether a generation is currently running on this session.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    fn state_guard(&self) -> MutexGuard<'_, SocketState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, next: SocketState) {
        let mut state = self.state_guard();
        if *state != next {
            debug!(transport = %SOURCE, from = %*state, to = %next, "socket state change");
            *state = next;
        }
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .child_token()
    }

    /// Drop the channel if the server closed it while no request was running.
    ///
    /// Frames still queued from an earlier request are discarded on the way.
    fn reap_idle(&self, link: &mut Link) {
        let channel = match link.channel.as_mut() {
            Some(channel) => channel,
            None => return,
        };
        loop {
            match channel.inbound.next().now_or_never() {
                None => return,
                Some(Some(Ok(raw))) => {
                    debug!(transport = %SOURCE, bytes = raw.len(), "discarding stale frame");
                }
                Some(Some(Err(e))) => {
                    warn!(transport = %SOURCE, error = %e, "idle WebSocket failed");
                    break;
                }
                Some(None) => break,
            }
        }
        link.channel = None;
        info!(transport = %SOURCE, "WebSocket closed by server");
        self.set_state(SocketState::Disconnected);
    }

    /// Ensure the connection is open, connecting if needed.
    ///
    /// Concurrent calls share one attempt.
    pub async fn connect(&self) -> Result<()> {
        let shutdown = self.shutdown_token();
        let seen = self.attempts.load(Ordering::Acquire);
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link, seen, &shutdown)
            .await
            .map(|_| ())
    }

    /// Returns whether this call opened a new connection.
    async fn connect_locked(
        &self,
        link: &mut Link,
        seen: u64,
        shutdown: &CancellationToken,
    ) -> Result<bool> {
        self.reap_idle(link);
        if link.channel.is_some() {
            return Ok(false);
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            // An attempt finished while we were queued on the lock and it failed.
            if let Some(e) = &link.last_error {
                return Err(e.clone());
            }
        }
        if shutdown.is_cancelled() {
            return Err(disconnected_by_caller());
        }

        self.set_state(SocketState::Connecting);
        info!(transport = %SOURCE, url = %self.url, "connecting");
        let mut pending = PendingAttempt {
            session: self,
            resolved: false,
        };

        let result = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Err(disconnected_by_caller()),
            connected = self.connector.connect(&self.url) => connected,
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);
        pending.resolved = true;

        match result {
            Ok(channel) if shutdown.is_cancelled() => {
                close_in_background(channel);
                let e = disconnected_by_caller();
                link.last_error = Some(e.clone());
                self.set_state(SocketState::Disconnected);
                Err(e)
            }
            Ok(channel) => {
                link.channel = Some(channel);
                link.last_error = None;
                self.set_state(SocketState::Open);
                info!(transport = %SOURCE, "WebSocket connected");
                Ok(true)
            }
            Err(e) => {
                warn!(transport = %SOURCE, error = %e, "WebSocket connection failed");
                link.last_error = Some(e.clone());
                self.set_state(SocketState::Disconnected);
                Err(e)
            }
        }
    }

    async fn exchange(
        &self,
        channel: &mut SocketChannel,
        frame: String,
        request_id: &str,
        shutdown: &CancellationToken,
        timeline: &mut ChunkTimeline,
        callbacks: &dyn GenerationCallbacks,
    ) -> Step {
        let sent = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Step::Dropped(disconnected_by_caller()),
            sent = channel.outbound.send(frame) => sent,
        };
        if let Err(e) = sent {
            return Step::Unsent(e);
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = shutdown.cancelled() => return Step::Dropped(disconnected_by_caller()),
                next = channel.inbound.next() => next,
            };

            let raw = match next {
                Some(Ok(raw)) => raw,
                Some(Err(e)) => return Step::Dropped(e),
                None => {
                    return Step::Dropped(Error::connection_with_context(
                        "WebSocket closed by server",
                        ErrorContext::new().with_source("socket"),
                    ))
                }
            };

            let envelope = match SocketEnvelope::decode(&raw) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(transport = %SOURCE, error = %e, "skipping malformed message");
                    continue;
                }
            };
            if !envelope.belongs_to(request_id) {
                debug!(
                    transport = %SOURCE,
                    reply_id = ?envelope.request_id,
                    "ignoring reply for another request"
                );
                continue;
            }

            match envelope.reply {
                SocketReply::Chunk { text } => {
                    let metrics = timeline.record_chunk(&text);
                    emit_chunk(SOURCE, callbacks, &text, &metrics);
                }
                SocketReply::Success { text } => {
                    // Non-streaming backends send the whole text with the success reply.
                    if timeline.chunk_count() == 0 {
                        if let Some(text) = text.filter(|t| !t.is_empty()) {
                            let metrics = timeline.record_chunk(&text);
                            emit_chunk(SOURCE, callbacks, &text, &metrics);
                        }
                    }
                    return Step::Completed;
                }
                SocketReply::Error(body) => {
                    return Step::Failed(body.into_error("WebSocket request failed", None));
                }
                SocketReply::Unknown(kind) => {
                    warn!(transport = %SOURCE, kind = %kind, "unknown message type");
                }
            }
        }
    }
}

#[async_trait]
impl TransportSession for SocketSession {
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
        let _in_flight = match InFlight::acquire(&self.in_flight) {
            Some(guard) => guard,
            None => return fail(SOURCE, callbacks, Error::Busy { transport: SOURCE }),
        };

        let shutdown = self.shutdown_token();
        let mut timeline = ChunkTimeline::start();

        let seen = self.attempts.load(Ordering::Acquire);
        let mut link = self.link.lock().await;
        let mut fresh = match self.connect_locked(&mut link, seen, &shutdown).await {
            Ok(fresh) => fresh,
            Err(e) => return fail(SOURCE, callbacks, e),
        };

        let request_id = Uuid::new_v4().to_string();
        let frame = match SocketRequestFrame::generate(request, &request_id).to_text() {
            Ok(frame) => frame,
            Err(e) => return fail(SOURCE, callbacks, e),
        };
        info!(transport = %SOURCE, request_id = %request_id, "sending generate action");

        let mut exchange = Exchange {
            session: self,
            link,
            settled: false,
        };
        let step = loop {
            let step = match exchange.link.channel.as_mut() {
                Some(channel) => {
                    self.exchange(
                        channel,
                        frame.clone(),
                        &request_id,
                        &shutdown,
                        &mut timeline,
                        callbacks,
                    )
                    .await
                }
                None => Step::Dropped(Error::connection_with_context(
                    "WebSocket is not open",
                    ErrorContext::new().with_source("socket"),
                )),
            };
            match step {
                // The server may close a reused connection between the idle check and the send.
                Step::Unsent(e) if !fresh => {
                    debug!(
                        transport = %SOURCE,
                        error = %e,
                        "reused connection is gone, reconnecting"
                    );
                    exchange.discard();
                    let seen = self.attempts.load(Ordering::Acquire);
                    match self.connect_locked(&mut exchange.link, seen, &shutdown).await {
                        Ok(_) => fresh = true,
                        Err(e) => break Step::Dropped(e),
                    }
                }
                other => break other,
            }
        };

        match step {
            Step::Completed => {
                exchange.settle();
                let (text, metrics) = timeline.finish();
                complete(SOURCE, callbacks, text, metrics)
            }
            Step::Failed(e) => {
                exchange.settle();
                fail(SOURCE, callbacks, e)
            }
            Step::Unsent(e) | Step::Dropped(e) => {
                drop(exchange);
                fail(SOURCE, callbacks, e)
            }
        }
    }

    fn disconnect(&self) {
        let old = {
            let mut root = self
                .shutdown
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            std::mem::replace(&mut *root, CancellationToken::new())
        };
        old.cancel();

        // A holder of the link lock observes the cancellation and drops the channel itself.
        if let Ok(mut link) = self.link.try_lock() {
            link.last_error = None;
            if let Some(channel) = link.channel.take() {
                info!(transport = %SOURCE, "WebSocket closed");
                close_in_background(channel);
            }
        }
        self.set_state(SocketState::Disconnected);
    }
}

/// Send a close frame without blocking the caller, then drop the connection.
///
/// Outside a tokio runtime the connection is dropped without a close frame.
fn close_in_background(mut channel: SocketChannel) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                match tokio::time::timeout(CLOSE_GRACE, channel.outbound.close()).await {
                    Ok(Ok(())) => debug!(transport = %SOURCE, "close frame sent"),
                    Ok(Err(e)) => {
                        debug!(transport = %SOURCE, error = %e, "close frame not sent")
                    }
                    Err(_) => debug!(transport = %SOURCE, "close handshake timed out"),
                }
            });
        }
        Err(_) => {
            debug!(transport = %SOURCE, "no runtime, dropping WebSocket without close frame")
        }
    }
}

fn disconnected_by_caller() -> Error {
    Error::connection_with_context(
        "WebSocket disconnected by caller",
        ErrorContext::new().with_source("socket"),
    )
}
