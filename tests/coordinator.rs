//! Coordinator fan-out: settle-all, tagging and partial failure.

mod common;

use async_trait::async_trait;
use common::{
    bare, chunk, hello_world_script, prompt, request_id, success, MockServerFixture, Reply,
    ScriptedConnector,
};
use genai_transports::{
    Coordinator, EndpointConfig, Error, ErrorKind, EventRecorder, GenerationCallbacks,
    GenerationRequest, SocketState, StreamMetrics, TransportKind, TransportOutcome,
    TransportSession,
};
use std::sync::Arc;
use std::time::Duration;

enum Behavior {
    Succeed(&'static [&'static str]),
    Fail,
    Hang,
    /// Breaks the callback contract: two terminal events and a late chunk.
    Misbehave,
}

struct FakeSession {
    kind: TransportKind,
    delay: Duration,
    behavior: Behavior,
}

impl FakeSession {
    fn new(kind: TransportKind, behavior: Behavior) -> Arc<Self> {
        Self::delayed(kind, behavior, Duration::ZERO)
    }

    fn delayed(kind: TransportKind, behavior: Behavior, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            delay,
            behavior,
        })
    }
}

#[async_trait]
impl TransportSession for FakeSession {
    fn kind(&self) -> TransportKind {
        self.kind
    }

    async fn generate(
        &self,
        _request: &GenerationRequest,
        callbacks: &dyn GenerationCallbacks,
    ) -> genai_transports::Result<TransportOutcome> {
        tokio::time::sleep(self.delay).await;
        let mut metrics = StreamMetrics::default();
        match self.behavior {
            Behavior::Succeed(chunks) => {
                for chunk in chunks {
                    metrics.chunk_count += 1;
                    callbacks.on_chunk(self.kind, chunk, &metrics);
                }
                callbacks.on_complete(self.kind);
                Ok(TransportOutcome {
                    source: self.kind,
                    text: chunks.concat(),
                    metrics,
                })
            }
            Behavior::Fail => {
                let e = Error::connection("fake failure");
                callbacks.on_error(self.kind, &e);
                Err(e)
            }
            Behavior::Hang => std::future::pending().await,
            Behavior::Misbehave => {
                callbacks.on_complete(self.kind);
                callbacks.on_complete(self.kind);
                callbacks.on_chunk(self.kind, "late", &metrics);
                Ok(TransportOutcome {
                    source: self.kind,
                    text: String::new(),
                    metrics,
                })
            }
        }
    }

    fn disconnect(&self) {}
}

fn endpoints(fixture: &MockServerFixture) -> EndpointConfig {
    EndpointConfig::new(
        "ws://127.0.0.1:1/ws/",
        &fixture.url("/sse/"),
        &fixture.url("/api"),
    )
    .unwrap()
}

async fn mock_http_transports(fixture: &mut MockServerFixture) -> Vec<mockito::Mock> {
    let sse = fixture
        .mock_event_stream(
            "/sse/",
            &[
                ("chunk", r#"{"text":"streamed"}"#),
                ("chunk", r#"{"text":" text"}"#),
                ("complete", "{}"),
            ],
        )
        .await;
    let unary = fixture
        .mock_json("POST", "/api/generate", 200, r#"{"data":{"text":"unary text"}}"#)
        .await;
    vec![sse, unary]
}

#[tokio::test]
async fn test_socket_failure_does_not_affect_other_transports() {
    let mut fixture = MockServerFixture::new().await;
    let _mocks = mock_http_transports(&mut fixture).await;
    let connector = Arc::new(ScriptedConnector::new(hello_world_script).failing(usize::MAX));

    let coordinator = Coordinator::builder()
        .endpoints(endpoints(&fixture))
        .socket_connector(connector.clone())
        .build()
        .unwrap();
    let recorder = EventRecorder::new();

    let outcomes = coordinator
        .generate_all(&GenerationRequest::new("hello"), &recorder)
        .await
        .unwrap();

    let sources: Vec<_> = outcomes.iter().map(|o| o.source).collect();
    assert_eq!(sources, vec![TransportKind::EventStream, TransportKind::Unary]);
    assert_eq!(outcomes[0].text, "streamed text");
    assert_eq!(outcomes[1].text, "unary text");

    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, TransportKind::Socket);
    assert_eq!(errors[0].1.kind(), ErrorKind::Connection);

    let mut completed = recorder.completions();
    completed.sort_by_key(|k| k.as_str());
    assert_eq!(completed, vec![TransportKind::Unary, TransportKind::EventStream]);
    assert_eq!(recorder.chunks_from(TransportKind::EventStream).len(), 2);
    assert_eq!(recorder.chunks_from(TransportKind::Unary).len(), 1);
    assert_eq!(coordinator.socket_state(), Some(SocketState::Disconnected));
    assert_eq!(connector.attempts(), 1);
}

#[tokio::test]
async fn test_all_transports_succeed_with_builtin_sessions() {
    let mut fixture = MockServerFixture::new().await;
    let _mocks = mock_http_transports(&mut fixture).await;
    let connector = Arc::new(ScriptedConnector::new(hello_world_script));

    let coordinator = Coordinator::builder()
        .endpoints(endpoints(&fixture))
        .socket_connector(connector)
        .build()
        .unwrap();
    let recorder = EventRecorder::new();

    let settled = coordinator
        .generate_all_settled(&GenerationRequest::new("hello"), &recorder)
        .await
        .unwrap();

    assert_eq!(settled.len(), 3);
    assert!(settled.iter().all(|s| s.is_success()));
    let sources: Vec<_> = settled.iter().map(|s| s.source).collect();
    assert_eq!(sources, TransportKind::ALL.to_vec());
    assert_eq!(settled[0].outcome().unwrap().text, "Hello world");
    assert_eq!(recorder.completions().len(), 3);
    assert!(recorder.errors().is_empty());
    assert_eq!(coordinator.socket_state(), Some(SocketState::Open));

    coordinator.disconnect();
    coordinator.disconnect();
    assert_eq!(coordinator.socket_state(), Some(SocketState::Disconnected));
}

#[tokio::test]
async fn test_invalid_request_starts_no_transport() {
    let fixture = MockServerFixture::new().await;
    let connector = Arc::new(ScriptedConnector::new(hello_world_script));
    let coordinator = Coordinator::builder()
        .endpoints(endpoints(&fixture))
        .socket_connector(connector.clone())
        .build()
        .unwrap();
    let recorder = EventRecorder::new();

    let err = coordinator
        .generate_all(&GenerationRequest::new(""), &recorder)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert!(recorder.is_empty());
    assert_eq!(connector.attempts(), 0);
}

#[tokio::test]
async fn test_settlements_keep_transport_order() {
    let coordinator = Coordinator::builder()
        .session(FakeSession::delayed(
            TransportKind::Socket,
            Behavior::Succeed(&["slow"]),
            Duration::from_millis(40),
        ))
        .session(FakeSession::delayed(
            TransportKind::EventStream,
            Behavior::Fail,
            Duration::from_millis(20),
        ))
        .session(FakeSession::new(TransportKind::Unary, Behavior::Succeed(&["fast"])))
        .build()
        .unwrap();
    let recorder = EventRecorder::new();

    let settled = coordinator
        .generate_all_settled(&GenerationRequest::new("hello"), &recorder)
        .await
        .unwrap();

    let sources: Vec<_> = settled.iter().map(|s| s.source).collect();
    assert_eq!(sources, TransportKind::ALL.to_vec());
    assert!(settled[0].is_success());
    assert_eq!(
        settled[1].error().map(|e| e.kind()),
        Some(ErrorKind::Connection)
    );
    assert!(settled[2].is_success());

    // Events arrive in completion order, not transport order.
    let completions = recorder.completions();
    assert_eq!(completions, vec![TransportKind::Unary, TransportKind::Socket]);
    assert_eq!(coordinator.socket_state(), None);
}

#[tokio::test]
async fn test_attempt_timeout_settles_hung_transport() {
    let coordinator = Coordinator::builder()
        .session(FakeSession::new(TransportKind::Socket, Behavior::Hang))
        .session(FakeSession::new(TransportKind::EventStream, Behavior::Succeed(&["a", "b"])))
        .session(FakeSession::new(TransportKind::Unary, Behavior::Succeed(&["c"])))
        .attempt_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let recorder = EventRecorder::new();

    let outcomes = coordinator
        .generate_all(&GenerationRequest::new("hello"), &recorder)
        .await
        .unwrap();

    assert_eq!(outcomes.len(), 2);
    let errors = recorder.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, TransportKind::Socket);
    assert!(errors[0].1.message().contains("no terminal event"));
}

#[tokio::test]
async fn test_timed_out_socket_generation_does_not_leak_into_the_next() {
    // "slow" answers after the attempt timeout, without a request id.
    let connector = Arc::new(ScriptedConnector::new(|req| {
        let id = request_id(req);
        if prompt(req) == "slow" {
            vec![
                Reply::Delay(Duration::from_millis(80)),
                bare("chunk", "STALE"),
                bare("success", ""),
            ]
        } else {
            vec![chunk("fresh", &id), success(None, &id)]
        }
    }));
    let endpoints = EndpointConfig::new(
        "ws://127.0.0.1:1/ws/",
        "http://127.0.0.1:1/sse/",
        "http://127.0.0.1:1/api",
    )
    .unwrap();
    let coordinator = Coordinator::builder()
        .endpoints(endpoints)
        .socket_connector(connector.clone())
        .session(FakeSession::new(TransportKind::EventStream, Behavior::Succeed(&["a"])))
        .session(FakeSession::new(TransportKind::Unary, Behavior::Succeed(&["b"])))
        .attempt_timeout(Duration::from_millis(30))
        .build()
        .unwrap();

    let first = EventRecorder::new();
    let outcomes = coordinator
        .generate_all(&GenerationRequest::new("slow"), &first)
        .await
        .unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(first.errors()[0].0, TransportKind::Socket);
    assert_eq!(coordinator.socket_state(), Some(SocketState::Disconnected));

    tokio::time::sleep(Duration::from_millis(120)).await;

    let second = EventRecorder::new();
    let settled = coordinator
        .generate_all_settled(&GenerationRequest::new("next"), &second)
        .await
        .unwrap();
    let socket = settled[0].outcome().unwrap();
    assert_eq!(socket.text, "fresh");
    assert_eq!(socket.metrics.chunk_count, 1);
    let socket_chunks: Vec<_> = second
        .chunks_from(TransportKind::Socket)
        .into_iter()
        .map(|(text, _)| text)
        .collect();
    assert_eq!(socket_chunks, vec!["fresh".to_string()]);
    assert_eq!(connector.attempts(), 2);
}

#[tokio::test]
async fn test_only_one_terminal_event_per_transport_reaches_caller() {
    let coordinator = Coordinator::builder()
        .session(FakeSession::new(TransportKind::Socket, Behavior::Misbehave))
        .session(FakeSession::new(TransportKind::EventStream, Behavior::Fail))
        .session(FakeSession::new(TransportKind::Unary, Behavior::Succeed(&["x"])))
        .build()
        .unwrap();
    let recorder = EventRecorder::new();

    coordinator
        .generate_all(&GenerationRequest::new("hello"), &recorder)
        .await
        .unwrap();

    let socket_events = recorder.events_from(TransportKind::Socket);
    assert_eq!(socket_events.len(), 1);
    assert!(socket_events[0].is_terminal());
    assert_eq!(recorder.events_from(TransportKind::EventStream).len(), 1);
    assert_eq!(recorder.events_from(TransportKind::Unary).len(), 2);
}

#[tokio::test]
async fn test_builder_requires_endpoints_for_builtin_sessions() {
    let err = Coordinator::builder().build().err().unwrap();
    assert_eq!(err.kind(), ErrorKind::Configuration);

    let partial = Coordinator::builder()
        .session(FakeSession::new(TransportKind::Socket, Behavior::Fail))
        .build();
    assert!(partial.is_err());
}

#[tokio::test]
async fn test_connect_socket_opens_ahead_of_first_request() {
    let mut fixture = MockServerFixture::new().await;
    let _mocks = mock_http_transports(&mut fixture).await;
    let connector = Arc::new(ScriptedConnector::new(hello_world_script));
    let coordinator = Coordinator::builder()
        .endpoints(endpoints(&fixture))
        .socket_connector(connector.clone())
        .build()
        .unwrap();

    assert_eq!(coordinator.socket_state(), Some(SocketState::Disconnected));
    coordinator.connect_socket().await.unwrap();
    assert_eq!(coordinator.socket_state(), Some(SocketState::Open));

    coordinator
        .generate_all(&GenerationRequest::new("hello"), &EventRecorder::new())
        .await
        .unwrap();
    assert_eq!(connector.attempts(), 1);
}
