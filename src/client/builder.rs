use crate::client::core::Coordinator;
use crate::config::EndpointConfig;
use crate::transport::{
    build_http_client, EventStreamSession, SocketConnector, SocketSession, TransportSession,
    TungsteniteConnector, UnarySession,
};
use crate::types::TransportKind;
use crate::{Error, ErrorContext, Result};
use std::sync::Arc;
use std::time::Duration;

/// Builder for a [`Coordinator`].
///
/// Keep this surface area small: endpoints are usually all that is needed.
/// Individual sessions can be swapped out, mainly for tests.
pub struct CoordinatorBuilder {
    endpoints: Option<EndpointConfig>,
    http_client: Option<reqwest::Client>,
    connector: Option<Arc<dyn SocketConnector>>,
    socket: Option<Arc<dyn TransportSession>>,
    event_stream: Option<Arc<dyn TransportSession>>,
    unary: Option<Arc<dyn TransportSession>>,
    attempt_timeout: Option<Duration>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            endpoints: None,
            http_client: None,
            connector: None,
            socket: None,
            event_stream: None,
            unary: None,
            attempt_timeout: None,
        }
    }

    pub fn endpoints(mut self, endpoints: EndpointConfig) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Share an existing HTTP client between the event-stream and unary sessions.
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Use a custom connector for the built-in socket session.
    pub fn socket_connector(mut self, connector: Arc<dyn SocketConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Replace the session for one transport.
    pub fn session(mut self, session: Arc<dyn TransportSession>) -> Self {
        match session.kind() {
            TransportKind::Socket => self.socket = Some(session),
            TransportKind::EventStream => self.event_stream = Some(session),
            TransportKind::Unary => self.unary = Some(session),
        }
        self
    }

    /// Settle a transport as failed when it has not finished within `limit`.
    ///
    /// Off by default. Can also be enabled via env: `GENAI_ATTEMPT_TIMEOUT_MS`.
    pub fn attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        let endpoints = self.endpoints;
        let mut http = self.http_client;

        let mut socket_session = None;
        let socket: Arc<dyn TransportSession> = match self.socket {
            Some(session) => session,
            None => {
                let connector: Arc<dyn SocketConnector> = match self.connector {
                    Some(connector) => connector,
                    None => Arc::new(TungsteniteConnector::new()),
                };
                let session = Arc::new(SocketSession::from_config(
                    require_endpoints(&endpoints)?,
                    connector,
                ));
                socket_session = Some(session.clone());
                session
            }
        };

        let event_stream: Arc<dyn TransportSession> = match self.event_stream {
            Some(session) => session,
            None => Arc::new(EventStreamSession::from_config(
                shared_client(&mut http)?,
                require_endpoints(&endpoints)?,
            )),
        };

        let unary: Arc<dyn TransportSession> = match self.unary {
            Some(session) => session,
            None => Arc::new(UnarySession::from_config(
                shared_client(&mut http)?,
                require_endpoints(&endpoints)?,
            )),
        };

        let attempt_timeout = self.attempt_timeout.or_else(|| {
            std::env::var("GENAI_ATTEMPT_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
        });

        Ok(Coordinator {
            socket,
            event_stream,
            unary,
            socket_session,
            attempt_timeout,
        })
    }
}

fn require_endpoints(endpoints: &Option<EndpointConfig>) -> Result<&EndpointConfig> {
    endpoints.as_ref().ok_or_else(|| {
        Error::configuration_with_context(
            "endpoints are required for the built-in sessions",
            ErrorContext::new()
                .with_field_path("endpoints")
                .with_source("coordinator_builder"),
        )
    })
}

/// One client for both HTTP sessions, built on first use.
fn shared_client(slot: &mut Option<reqwest::Client>) -> Result<reqwest::Client> {
    if let Some(client) = slot {
        return Ok(client.clone());
    }
    let client = build_http_client()?;
    *slot = Some(client.clone());
    Ok(client)
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
