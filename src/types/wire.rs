//! Wire frames exchanged with the generation endpoint.
//!
//! Each protocol selects behavior through a string tag (`type` for the socket,
//! the SSE `event:` name for the event stream). Tags are decoded here, once, into
//! closed enums; sessions only ever match on the enums.

use crate::types::GenerationRequest;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Structured error reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub status_code: Option<u16>,
}

impl ServerErrorBody {
    /// Accepts both `{"error": {...}}` and a flat `{"message": ...}` payload.
    pub fn from_value(value: &Value) -> Result<Self> {
        let inner = value.get("error").unwrap_or(value);
        Ok(serde_json::from_value(inner.clone())?)
    }

    pub fn into_error(self, fallback: &str, http_status: Option<u16>) -> Error {
        let message = self
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| fallback.to_string());
        Error::server(message, self.code, http_status.or(self.status_code))
    }
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// `{"action":"generate","payload":{...},"requestId":"..."}`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocketRequestFrame<'a> {
    pub action: &'static str,
    pub payload: &'a GenerationRequest,
    pub request_id: &'a str,
}

impl<'a> SocketRequestFrame<'a> {
    pub fn generate(payload: &'a GenerationRequest, request_id: &'a str) -> Self {
        Self {
            action: "generate",
            payload,
            request_id,
        }
    }

    pub fn to_text(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSocketFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    request_id: Option<String>,
}

/// Reply kinds the socket endpoint sends.
#[derive(Debug, Clone, PartialEq)]
pub enum SocketReply {
    Chunk { text: String },
    /// Terminal success. Non-streaming backends put the whole text here.
    Success { text: Option<String> },
    Error(ServerErrorBody),
    /// A `type` this client does not know.
    Unknown(String),
}

/// A decoded reply plus its optional correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct SocketEnvelope {
    pub request_id: Option<String>,
    pub reply: SocketReply,
}

impl SocketEnvelope {
    pub fn decode(raw: &str) -> Result<Self> {
        let frame: RawSocketFrame = serde_json::from_str(raw).map_err(|e| {
            Error::protocol_with_context(
                format!("malformed socket frame: {}", e),
                ErrorContext::new()
                    .with_source("socket")
                    .with_details(truncate(raw)),
            )
        })?;

        let reply = match frame.kind.as_str() {
            "chunk" => {
                let text = frame
                    .payload
                    .get("text")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::protocol_with_context(
                            "chunk frame without payload.text",
                            ErrorContext::new()
                                .with_source("socket")
                                .with_field_path("payload.text"),
                        )
                    })?;
                SocketReply::Chunk {
                    text: text.to_string(),
                }
            }
            "success" => SocketReply::Success {
                text: frame
                    .payload
                    .get("text")
                    .and_then(Value::as_str)
                    .map(str::to_string),
            },
            "error" => SocketReply::Error(ServerErrorBody::from_value(&frame.payload).unwrap_or_default()),
            other => SocketReply::Unknown(other.to_string()),
        };

        Ok(Self {
            request_id: frame.request_id,
            reply,
        })
    }

    /// Replies without an id belong to whichever request is in flight.
    pub fn belongs_to(&self, request_id: &str) -> bool {
        self.request_id.as_deref().map_or(true, |id| id == request_id)
    }
}

// ---------------------------------------------------------------------------
// Event stream
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ChunkData {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
struct CompleteData {
    #[serde(default)]
    status: Option<String>,
}

/// Named events on the server-push stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Chunk { text: String },
    Complete { status: Option<String> },
    Error(ServerErrorBody),
}

impl StreamEvent {
    /// Decode one SSE frame. `Ok(None)` for event names this client ignores.
    pub fn decode(event: Option<&str>, data: &str) -> Result<Option<Self>> {
        let malformed = |e: serde_json::Error| {
            Error::protocol_with_context(
                format!("malformed {} event: {}", event.unwrap_or("message"), e),
                ErrorContext::new()
                    .with_source("event_stream")
                    .with_details(truncate(data)),
            )
        };

        match event {
            Some("chunk") => {
                let chunk: ChunkData = serde_json::from_str(data).map_err(malformed)?;
                Ok(Some(StreamEvent::Chunk { text: chunk.text }))
            }
            Some("complete") => {
                let complete = if data.trim().is_empty() {
                    CompleteData::default()
                } else {
                    serde_json::from_str(data).map_err(malformed)?
                };
                Ok(Some(StreamEvent::Complete {
                    status: complete.status,
                }))
            }
            Some("error") => {
                let value: Value = serde_json::from_str(data).map_err(malformed)?;
                let body = ServerErrorBody::from_value(&value)?;
                Ok(Some(StreamEvent::Error(body)))
            }
            _ => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Unary
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct UnaryResponse {
    pub data: UnaryData,
    #[serde(default)]
    pub meta: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UnaryData {
    pub text: String,
    #[serde(default)]
    pub usage: Option<Value>,
}

fn truncate(raw: &str) -> String {
    const MAX: usize = 120;
    if raw.len() <= MAX {
        return raw.to_string();
    }
    let mut end = MAX;
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &raw[..end])
}
