use crate::callbacks::GenerationCallbacks;
use crate::metrics::StreamMetrics;
use crate::types::TransportKind;
use crate::Error;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Per-transport adapter between a session and the caller's callbacks.
///
/// Every forwarded event is tagged with this relay's transport, at most one
/// terminal event (`on_complete` or `on_error`) gets through, and chunks that
/// arrive after settlement are dropped.
pub struct TransportRelay<'a> {
    source: TransportKind,
    inner: &'a dyn GenerationCallbacks,
    settled: AtomicBool,
    chunks: AtomicUsize,
}

impl<'a> TransportRelay<'a> {
    pub fn new(source: TransportKind, inner: &'a dyn GenerationCallbacks) -> Self {
        Self {
            source,
            inner,
            settled: AtomicBool::new(false),
            chunks: AtomicUsize::new(0),
        }
    }

    pub fn source(&self) -> TransportKind {
        self.source
    }

    pub fn is_settled(&self) -> bool {
        self.settled.load(Ordering::Acquire)
    }

    /// Chunks forwarded so far.
    pub fn chunk_count(&self) -> usize {
        self.chunks.load(Ordering::Acquire)
    }

    fn settle(&self) -> bool {
        !self.settled.swap(true, Ordering::AcqRel)
    }
}

impl GenerationCallbacks for TransportRelay<'_> {
    fn on_chunk(&self, source: TransportKind, text: &str, metrics: &StreamMetrics) {
        if source != self.source {
            tracing::warn!(relay = %self.source, reported = %source, "chunk reported under foreign tag");
        }
        if self.is_settled() {
            tracing::warn!(transport = %self.source, "dropping chunk after settlement");
            return;
        }
        self.chunks.fetch_add(1, Ordering::AcqRel);
        self.inner.on_chunk(self.source, text, metrics);
    }

    fn on_complete(&self, _source: TransportKind) {
        if self.settle() {
            self.inner.on_complete(self.source);
        }
    }

    fn on_error(&self, _source: TransportKind, error: &Error) {
        if self.settle() {
            self.inner.on_error(self.source, error);
        } else {
            tracing::debug!(transport = %self.source, error = %error, "suppressing second terminal event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::EventRecorder;

    #[test]
    fn test_tags_with_relay_source() {
        let rec = EventRecorder::new();
        let relay = TransportRelay::new(TransportKind::EventStream, &rec);
        relay.on_chunk(TransportKind::Unary, "x", &StreamMetrics::default());
        assert_eq!(rec.chunks_from(TransportKind::EventStream).len(), 1);
        assert!(rec.chunks_from(TransportKind::Unary).is_empty());
    }

    #[test]
    fn test_single_terminal_event() {
        let rec = EventRecorder::new();
        let relay = TransportRelay::new(TransportKind::Socket, &rec);
        relay.on_chunk(TransportKind::Socket, "a", &StreamMetrics::default());
        relay.on_error(TransportKind::Socket, &Error::connection("first"));
        relay.on_complete(TransportKind::Socket);
        relay.on_error(TransportKind::Socket, &Error::connection("second"));
        relay.on_chunk(TransportKind::Socket, "late", &StreamMetrics::default());

        assert_eq!(rec.len(), 2);
        assert_eq!(rec.errors().len(), 1);
        assert!(rec.completions().is_empty());
        assert_eq!(relay.chunk_count(), 1);
        assert!(relay.is_settled());
    }
}
