//! Entropy-weighted pattern matching
//!
//! Looks for the longest recent pattern that has been seen before inside a
//! trailing window and predicts its most frequent continuation. The less
//! predictable that continuation is, the lower the confidence.
//!
//! The `max(0, 1 - H / threshold)` scaling uses the entropy of the matched
//! continuation histogram. Symbol and window-pattern entropies are reported in
//! `detail` only: a balanced four-symbol window sits near 2 bits, above the
//! 1.5 bit threshold, and would silence the predictor on exactly the periodic
//! sequences it is meant to catch.

use super::{argmax_first, shannon_entropy, symbol_counts, trailing, Analysis, Predictor};
use crate::config::EntropyConfig;
use crate::error::Result;
use crate::types::{PredictorId, Symbol, ALPHABET_SIZE};
use serde_json::json;
use std::collections::HashMap;

pub struct EntropyPredictor {
    config: EntropyConfig,
}

impl EntropyPredictor {
    pub fn new(config: EntropyConfig) -> Self {
        Self { config }
    }

    /// Entropy of the distribution of all length-`len` windows
    pub fn pattern_entropy(window: &[Symbol], len: usize) -> f64 {
        if len == 0 || window.len() < len {
            return 0.0;
        }
        let mut freq: HashMap<&[Symbol], f64> = HashMap::new();
        for w in window.windows(len) {
            *freq.entry(w).or_insert(0.0) += 1.0;
        }
        shannon_entropy(freq.into_values())
    }

    /// Continuation counts of the trailing `len` symbols within `window`
    fn continuations(window: &[Symbol], len: usize) -> [f64; ALPHABET_SIZE] {
        let mut counts = [0.0; ALPHABET_SIZE];
        if window.len() <= len {
            return counts;
        }
        let pattern = &window[window.len() - len..];
        for i in 0..window.len() - len {
            if &window[i..i + len] == pattern {
                counts[window[i + len].index()] += 1.0;
            }
        }
        counts
    }
}

impl Predictor for EntropyPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Entropy
    }

    fn min_length(&self) -> usize {
        self.config.min_length.max(self.config.min_pattern_len + 1)
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let window = trailing(sequence, self.config.window_size);
        let symbol_entropy = shannon_entropy(symbol_counts(window));
        let pattern_entropies: Vec<(usize, f64)> = (self.config.min_pattern_len
            ..=self.config.max_pattern_len)
            .map(|len| (len, Self::pattern_entropy(window, len)))
            .collect();

        for len in (self.config.min_pattern_len..=self.config.max_pattern_len).rev() {
            let counts = Self::continuations(window, len);
            let total: f64 = counts.iter().sum();
            if total == 0.0 {
                continue;
            }

            let Some((next, count)) = argmax_first(&counts) else {
                continue;
            };
            let ratio = count / total;
            let continuation_entropy = shannon_entropy(counts);
            let scale = (1.0 - continuation_entropy / self.config.entropy_threshold).max(0.0);

            return Ok(Analysis::predict(
                Symbol::from_index(next),
                ratio * scale,
                json!({
                    "pattern_len": len,
                    "matches": total,
                    "ratio": ratio,
                    "continuation_entropy": continuation_entropy,
                    "symbol_entropy": symbol_entropy,
                    "pattern_entropy": pattern_entropies,
                }),
            ));
        }

        Ok(Analysis::no_opinion(
            "no recurring pattern in window",
            json!({
                "symbol_entropy": symbol_entropy,
                "pattern_entropy": pattern_entropies,
            }),
        ))
    }
}
