use crate::callbacks::GenerationCallbacks;
use crate::client::relay::TransportRelay;
use crate::transport::{SocketSession, SocketState, TransportSession};
use crate::types::{GenerationRequest, Settlement, TransportKind, TransportOutcome};
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Fans one request out to the socket, event-stream and unary sessions.
///
/// All three run concurrently on the caller's task and always run to their own
/// settlement: one transport finishing or failing never cancels another.
pub struct Coordinator {
    pub(crate) socket: Arc<dyn TransportSession>,
    pub(crate) event_stream: Arc<dyn TransportSession>,
    pub(crate) unary: Arc<dyn TransportSession>,
    /// Typed handle when the socket slot holds the built-in session.
    pub(crate) socket_session: Option<Arc<SocketSession>>,
    pub(crate) attempt_timeout: Option<Duration>,
}

impl Coordinator {
    /// Coordinator over the built-in sessions for `endpoints`.
    pub fn new(endpoints: crate::config::EndpointConfig) -> Result<Self> {
        crate::client::builder::CoordinatorBuilder::new()
            .endpoints(endpoints)
            .build()
    }

    pub fn builder() -> crate::client::builder::CoordinatorBuilder {
        crate::client::builder::CoordinatorBuilder::new()
    }

    pub fn session(&self, kind: TransportKind) -> &dyn TransportSession {
        match kind {
            TransportKind::Socket => &*self.socket,
            TransportKind::EventStream => &*self.event_stream,
            TransportKind::Unary => &*self.unary,
        }
    }

    /// Current socket state, if the socket slot holds the built-in session.
    pub fn socket_state(&self) -> Option<SocketState> {
        self.socket_session.as_ref().map(|s| s.state())
    }

    /// Open the socket ahead of the first request.
    pub async fn connect_socket(&self) -> Result<()> {
        match &self.socket_session {
            Some(session) => session.connect().await,
            None => Ok(()),
        }
    }

    pub fn attempt_timeout(&self) -> Option<Duration> {
        self.attempt_timeout
    }

    /// Run `request` on every transport and return the successful outcomes.
    ///
    /// Failed transports are reported through `callbacks.on_error` and left out
    /// of the result; partial failure is not an error. Only an invalid request
    /// fails the call, before any transport is started.
    pub async fn generate_all(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<Vec<TransportOutcome>> {
        let settled = self.generate_all_settled(request, callbacks).await?;
        Ok(settled
            .into_iter()
            .filter_map(|s| match s.result {
                Ok(outcome) => Some(outcome),
                Err(e) => {
                    warn!(transport = %s.source, error = %e, "transport failed");
                    None
                }
            })
            .collect())
    }

    /// Like [`generate_all`](Self::generate_all) but keeps failures, one
    /// settlement per transport in [`TransportKind::ALL`] order.
    pub async fn generate_all_settled(
        &self,
        request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> Result<Vec<Settlement>> {
        request.validate()?;
        info!(prompt_len = request.prompt.len(), "starting generation on all transports");

        let [socket, event_stream, unary] =
            TransportKind::ALL.map(|kind| TransportRelay::new(kind, callbacks));

        // Settle-all join on the current task: a stuck transport never holds
        // back the others' callbacks.
        let (s, e, u) = futures::join!(
            self.run(&*self.socket, request, &socket),
            self.run(&*self.event_stream, request, &event_stream),
            self.run(&*self.unary, request, &unary),
        );

        let settled = vec![s, e, u];
        info!(
            succeeded = settled.iter().filter(|s| s.is_success()).count(),
            "all transports settled"
        );
        Ok(settled)
    }

    async fn run(
        &self,
        session: &dyn TransportSession,
        request: &GenerationRequest,
        relay: &TransportRelay<'_>,
    ) -> Settlement {
        let source = relay.source();
        let generation = session.generate(request, relay);

        let result = match self.attempt_timeout {
            Some(limit) => match tokio::time::timeout(limit, generation).await {
                Ok(result) => result,
                Err(_) => Err(Error::connection_with_context(
                    format!("no terminal event within {} ms", limit.as_millis()),
                    ErrorContext::new()
                        .with_source("coordinator")
                        .with_field_path("attempt_timeout"),
                )),
            },
            None => generation.await,
        };

        // The relay lets through only the first terminal event, so this only
        // fills in for sessions that settled without reporting it.
        match &result {
            Ok(_) => relay.on_complete(source),
            Err(e) => relay.on_error(source, e),
        }

        Settlement { source, result }
    }

    /// Tear down every session's connection. Idempotent.
    pub fn disconnect(&self) {
        for kind in TransportKind::ALL {
            self.session(kind).disconnect();
        }
        info!("all transports disconnected");
    }
}
