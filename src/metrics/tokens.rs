//! Token count estimation.
//!
//! These are approximations for display, not tokenizers: no vocabulary is
//! consulted and the result will drift from a model's real token count.

pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// Words times a fixed tokens-per-word ratio, rounded to nearest.
///
/// Words are maximal runs of non-whitespace, so empty or all-whitespace text
/// counts as zero words.
#[derive(Debug, Clone)]
pub struct WordEstimator {
    tokens_per_word: f64,
}

impl WordEstimator {
    pub fn new() -> Self {
        Self::with_ratio(1.3)
    }
    pub fn with_ratio(r: f64) -> Self {
        Self { tokens_per_word: r }
    }
}

impl Default for WordEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCounter for WordEstimator {
    fn count(&self, text: &str) -> usize {
        let words = text.split_whitespace().count();
        (words as f64 * self.tokens_per_word).round() as usize
    }
}
