//! Normalized events and per-transport outcomes.

use crate::metrics::StreamMetrics;
use crate::types::TransportKind;
use crate::{Error, Result};
use serde::Serialize;

/// One event from any transport, in the shape consumers see.
#[derive(Debug, Clone)]
pub enum NormalizedEvent {
    /// A fragment of generated text, with metrics as of this fragment.
    Chunk {
        source: TransportKind,
        text: String,
        metrics: StreamMetrics,
    },
    /// The transport delivered its last fragment.
    Complete { source: TransportKind },
    /// The transport failed; no `Complete` follows.
    Error { source: TransportKind, error: Error },
}

impl NormalizedEvent {
    pub fn source(&self) -> TransportKind {
        match self {
            NormalizedEvent::Chunk { source, .. }
            | NormalizedEvent::Complete { source }
            | NormalizedEvent::Error { source, .. } => *source,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, NormalizedEvent::Chunk { .. })
    }
}

/// Successful result of one transport for one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportOutcome {
    pub source: TransportKind,
    /// Accumulated text, surrounding whitespace trimmed.
    pub text: String,
    pub metrics: StreamMetrics,
}

/// Settled result of one transport, success or failure.
#[derive(Debug, Clone)]
pub struct Settlement {
    pub source: TransportKind,
    pub result: Result<TransportOutcome>,
}

impl Settlement {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn outcome(&self) -> Option<&TransportOutcome> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&Error> {
        self.result.as_ref().err()
    }
}
