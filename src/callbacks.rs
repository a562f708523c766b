//! The outward callback contract.
//!
//! Sessions call these synchronously, in arrival order, from inside their
//! `generate` future. Implementations should return quickly; anything slow
//! belongs on the other side of a channel (see the `UnboundedSender` impl).

use crate::metrics::StreamMetrics;
use crate::types::{NormalizedEvent, TransportKind};
use crate::Error;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc::UnboundedSender;

/// Receiver of normalized transport events.
///
/// Per transport and request: zero or more `on_chunk`, then exactly one of
/// `on_complete` or `on_error`.
pub trait GenerationCallbacks: Send + Sync {
    /// `text` is the new fragment; `metrics` are cumulative for the request.
    fn on_chunk(&self, _source: TransportKind, _text: &str, _metrics: &StreamMetrics) {}

    fn on_complete(&self, _source: TransportKind) {}

    fn on_error(&self, _source: TransportKind, _error: &Error) {}
}

/// Ignores every event.
pub struct NoopCallbacks;

impl GenerationCallbacks for NoopCallbacks {}

/// Returns a no-op callback set.
pub fn noop_callbacks() -> Arc<dyn GenerationCallbacks> {
    Arc::new(NoopCallbacks)
}

impl GenerationCallbacks for UnboundedSender<NormalizedEvent> {
    fn on_chunk(&self, source: TransportKind, text: &str, metrics: &StreamMetrics) {
        // A dropped receiver just means nobody is watching anymore.
        let _ = self.send(NormalizedEvent::Chunk {
            source,
            text: text.to_string(),
            metrics: *metrics,
        });
    }

    fn on_complete(&self, source: TransportKind) {
        let _ = self.send(NormalizedEvent::Complete { source });
    }

    fn on_error(&self, source: TransportKind, error: &Error) {
        let _ = self.send(NormalizedEvent::Error {
            source,
            error: error.clone(),
        });
    }
}

/// Collects events in memory, in the order they were delivered.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<NormalizedEvent>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, Vec<NormalizedEvent>> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn events(&self) -> Vec<NormalizedEvent> {
        self.guard().clone()
    }

    pub fn events_from(&self, source: TransportKind) -> Vec<NormalizedEvent> {
        self.guard()
            .iter()
            .filter(|e| e.source() == source)
            .cloned()
            .collect()
    }

    pub fn chunks_from(&self, source: TransportKind) -> Vec<(String, StreamMetrics)> {
        self.guard()
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::Chunk {
                    source: s,
                    text,
                    metrics,
                } if *s == source => Some((text.clone(), *metrics)),
                _ => None,
            })
            .collect()
    }

    pub fn completions(&self) -> Vec<TransportKind> {
        self.guard()
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::Complete { source } => Some(*source),
                _ => None,
            })
            .collect()
    }

    pub fn errors(&self) -> Vec<(TransportKind, Error)> {
        self.guard()
            .iter()
            .filter_map(|e| match e {
                NormalizedEvent::Error { source, error } => Some((*source, error.clone())),
                _ => None,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}

impl GenerationCallbacks for EventRecorder {
    fn on_chunk(&self, source: TransportKind, text: &str, metrics: &StreamMetrics) {
        self.guard().push(NormalizedEvent::Chunk {
            source,
            text: text.to_string(),
            metrics: *metrics,
        });
    }

    fn on_complete(&self, source: TransportKind) {
        self.guard().push(NormalizedEvent::Complete { source });
    }

    fn on_error(&self, source: TransportKind, error: &Error) {
        self.guard().push(NormalizedEvent::Error {
            source,
            error: error.clone(),
        });
    }
}

impl<T: GenerationCallbacks + ?Sized> GenerationCallbacks for Arc<T> {
    fn on_chunk(&self, source: TransportKind, text: &str, metrics: &StreamMetrics) {
        (**self).on_chunk(source, text, metrics)
    }

    fn on_complete(&self, source: TransportKind) {
        (**self).on_complete(source)
    }

    fn on_error(&self, source: TransportKind, error: &Error) {
        (**self).on_error(source, error)
    }
}
