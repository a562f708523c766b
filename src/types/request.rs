use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One logical generation request, fanned out to every transport unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Reject requests the backend would refuse anyway.
    pub fn validate(&self) -> Result<()> {
        if self.prompt.trim().is_empty() {
            return Err(Error::validation_with_context(
                "Prompt is required",
                ErrorContext::new()
                    .with_field_path("request.prompt")
                    .with_source("request"),
            ));
        }
        if self.max_tokens == Some(0) {
            return Err(Error::validation_with_context(
                "maxTokens must be greater than zero",
                ErrorContext::new()
                    .with_field_path("request.maxTokens")
                    .with_source("request"),
            ));
        }
        Ok(())
    }

    /// Query parameters for transports that carry the request in the URL.
    pub(crate) fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![("prompt", self.prompt.clone())];
        if let Some(m) = self.max_tokens {
            pairs.push(("maxTokens", m.to_string()));
        }
        if let Some(t) = self.temperature {
            pairs.push(("temperature", t.to_string()));
        }
        pairs
    }
}

/// The wire-level mechanism a result was delivered over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Persistent bidirectional WebSocket connection.
    Socket,
    /// Server-sent event stream.
    EventStream,
    /// Single request/response call.
    Unary,
}

impl TransportKind {
    /// Coordinator order.
    pub const ALL: [TransportKind; 3] = [
        TransportKind::Socket,
        TransportKind::EventStream,
        TransportKind::Unary,
    ];

    /// Label shown to users.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Socket => "WebSocket",
            TransportKind::EventStream => "SSE",
            TransportKind::Unary => "REST",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}
