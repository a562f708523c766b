//! 指标模块：流式延迟与令牌估算。
//!
//! Streaming latency metrics.
//!
//! Metrics are a pure function of the request start, the chunk arrival log and
//! the accumulated text. They are recomputed from scratch on every chunk and
//! once more at completion, so the final values never drift from the
//! per-chunk ones.

pub mod tokens;

pub use tokens::{TokenCounter, WordEstimator};

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Latency and size statistics for one request on one transport.
///
/// All durations are milliseconds since the request started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamMetrics {
    /// Time to the first chunk; equals `total_duration_ms` when no chunk arrived.
    pub first_chunk_latency_ms: f64,
    pub total_duration_ms: f64,
    pub chunk_count: usize,
    /// Mean gap between consecutive chunks; equals `total_duration_ms` with fewer than two chunks.
    pub avg_chunk_latency_ms: f64,
    /// Rough estimate, see [`WordEstimator`].
    pub estimated_token_count: usize,
}

fn millis_between(from: Instant, to: Instant) -> f64 {
    to.saturating_duration_since(from).as_nanos() as f64 / 1_000_000.0
}

/// Compute metrics as of `now`.
///
/// `arrivals` must be in arrival order.
pub fn compute_metrics(
    started: Instant,
    arrivals: &[Instant],
    now: Instant,
    text: &str,
    counter: &dyn TokenCounter,
) -> StreamMetrics {
    let total_duration_ms = millis_between(started, now);
    let chunk_count = arrivals.len();

    let first_chunk_latency_ms = arrivals
        .first()
        .map(|first| millis_between(started, *first))
        .unwrap_or(total_duration_ms);

    let avg_chunk_latency_ms = if chunk_count > 1 {
        let sum: f64 = arrivals
            .windows(2)
            .map(|pair| millis_between(pair[0], pair[1]))
            .sum();
        sum / (chunk_count - 1) as f64
    } else {
        total_duration_ms
    };

    StreamMetrics {
        first_chunk_latency_ms,
        total_duration_ms,
        chunk_count,
        avg_chunk_latency_ms,
        estimated_token_count: counter.count(text),
    }
}

/// Per-request accumulation state: text buffer plus chunk arrival log.
///
/// A fresh timeline is created at the start of every `generate` call and
/// dropped when it settles, so nothing leaks from one request into the next.
#[derive(Debug)]
pub struct ChunkTimeline {
    started: Instant,
    arrivals: Vec<Instant>,
    text: String,
    counter: WordEstimator,
}

impl ChunkTimeline {
    pub fn start() -> Self {
        Self::started_at(Instant::now())
    }

    pub fn started_at(started: Instant) -> Self {
        Self {
            started,
            arrivals: Vec::new(),
            text: String::new(),
            counter: WordEstimator::default(),
        }
    }

    /// Append a chunk that arrived now and return the cumulative metrics.
    pub fn record_chunk(&mut self, text: &str) -> StreamMetrics {
        self.record_chunk_at(text, Instant::now())
    }

    pub fn record_chunk_at(&mut self, text: &str, at: Instant) -> StreamMetrics {
        // Clamp so the log stays monotonic even if a caller passes an earlier instant.
        let at = self.arrivals.last().map_or(at, |last| at.max(*last));
        self.arrivals.push(at);
        self.text.push_str(text);
        self.metrics_at(at)
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.metrics_at(Instant::now())
    }

    pub fn metrics_at(&self, now: Instant) -> StreamMetrics {
        compute_metrics(self.started, &self.arrivals, now, &self.text, &self.counter)
    }

    pub fn chunk_count(&self) -> usize {
        self.arrivals.len()
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Final text (trimmed) and metrics recomputed at completion.
    pub fn finish(self) -> (String, StreamMetrics) {
        let metrics = self.metrics();
        (self.text.trim().to_string(), metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_no_chunks_falls_back_to_total_duration() {
        let t0 = Instant::now();
        let m = compute_metrics(t0, &[], t0 + ms(250), "", &WordEstimator::new());
        assert_eq!(m.chunk_count, 0);
        assert_eq!(m.total_duration_ms, 250.0);
        assert_eq!(m.first_chunk_latency_ms, 250.0);
        assert_eq!(m.avg_chunk_latency_ms, 250.0);
        assert_eq!(m.estimated_token_count, 0);
    }

    #[test]
    fn test_single_chunk_average_is_total_duration() {
        let t0 = Instant::now();
        let m = compute_metrics(t0, &[t0 + ms(40)], t0 + ms(100), "hi", &WordEstimator::new());
        assert_eq!(m.first_chunk_latency_ms, 40.0);
        assert_eq!(m.avg_chunk_latency_ms, m.total_duration_ms);
        assert_eq!(m.avg_chunk_latency_ms, 100.0);
    }

    #[test]
    fn test_average_of_consecutive_gaps() {
        let t0 = Instant::now();
        let arrivals = [t0 + ms(100), t0 + ms(130), t0 + ms(190)];
        let m = compute_metrics(t0, &arrivals, t0 + ms(200), "a b c", &WordEstimator::new());
        assert_eq!(m.chunk_count, 3);
        assert_eq!(m.first_chunk_latency_ms, 100.0);
        assert_eq!(m.avg_chunk_latency_ms, 45.0);
        assert_eq!(m.total_duration_ms, 200.0);
        assert_eq!(m.estimated_token_count, 4);
    }

    #[test]
    fn test_timeline_is_cumulative_and_monotonic() {
        let t0 = Instant::now();
        let mut timeline = ChunkTimeline::started_at(t0);
        let mut last_count = 0;
        let mut last_total = 0.0;
        for (i, word) in ["Hello", " there", " friend"].iter().enumerate() {
            let m = timeline.record_chunk_at(word, t0 + ms(10 * (i as u64 + 1)));
            assert_eq!(m.chunk_count, i + 1);
            assert!(m.chunk_count >= last_count);
            assert!(m.total_duration_ms >= last_total);
            last_count = m.chunk_count;
            last_total = m.total_duration_ms;
        }
        assert_eq!(timeline.text(), "Hello there friend");
        assert_eq!(timeline.metrics_at(t0 + ms(30)).estimated_token_count, 4);
    }

    #[test]
    fn test_single_synthesized_chunk_has_equal_latencies() {
        let t0 = Instant::now();
        let mut timeline = ChunkTimeline::started_at(t0);
        let m = timeline.record_chunk_at("whole body", t0 + ms(75));
        assert_eq!(m.chunk_count, 1);
        assert_eq!(m.first_chunk_latency_ms, m.total_duration_ms);
        assert_eq!(m.avg_chunk_latency_ms, m.total_duration_ms);
    }

    #[test]
    fn test_out_of_order_instant_is_clamped() {
        let t0 = Instant::now();
        let mut timeline = ChunkTimeline::started_at(t0);
        timeline.record_chunk_at("a", t0 + ms(50));
        let m = timeline.record_chunk_at("b", t0 + ms(20));
        assert_eq!(m.avg_chunk_latency_ms, 0.0);
        assert_eq!(m.total_duration_ms, 50.0);
    }

    #[test]
    fn test_finish_trims_text() {
        let mut timeline = ChunkTimeline::start();
        timeline.record_chunk("  padded ");
        let (text, metrics) = timeline.finish();
        assert_eq!(text, "padded");
        assert_eq!(metrics.chunk_count, 1);
    }

    #[test]
    fn test_metrics_serialize_camel_case() {
        let json = serde_json::to_value(StreamMetrics::default()).unwrap();
        assert!(json.get("firstChunkLatencyMs").is_some());
        assert!(json.get("estimatedTokenCount").is_some());
    }
}
