//! Socket connection establishment.
//!
//! [`SocketSession`](super::SocketSession) owns the state machine; a
//! [`SocketConnector`] only knows how to turn a URL into a text-frame channel.
//! The default connector uses `tokio-tungstenite`.

use crate::{BoxStream, Error, ErrorContext, Result};
use async_trait::async_trait;
use futures::{future, Sink, SinkExt, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::Message;

/// Outbound half: accepts whole text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = Error> + Send>>;

/// An open bidirectional text-frame channel.
///
/// The inbound stream ends when the peer closes the connection.
pub struct SocketChannel {
    pub outbound: FrameSink,
    pub inbound: BoxStream<'static, String>,
}

impl SocketChannel {
    pub fn new(outbound: FrameSink, inbound: BoxStream<'static, String>) -> Self {
        Self { outbound, inbound }
    }
}

#[async_trait]
pub trait SocketConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<SocketChannel>;
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<SocketChannel> {
        let (ws, response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            Error::connection_with_context(
                format!("WebSocket connection error: {}", e),
                ErrorContext::new().with_source("socket").with_details(url),
            )
        })?;
        tracing::debug!(status = %response.status(), "websocket handshake complete");

        let (sink, stream) = ws.split();

        let outbound = sink
            .with(|text: String| future::ready(Ok::<_, tokio_tungstenite::tungstenite::Error>(Message::Text(text))))
            .sink_map_err(Error::from);

        let inbound = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                        Ok(text) => Some(Ok(text)),
                        Err(_) => {
                            tracing::warn!("dropping non UTF-8 binary frame");
                            None
                        }
                    },
                    // Ping/pong are answered by tungstenite itself.
                    Ok(_) => None,
                    Err(e) => Some(Err(Error::from(e))),
                })
            });

        Ok(SocketChannel::new(Box::pin(outbound), Box::pin(inbound)))
    }
}
