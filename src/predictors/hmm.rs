//! Transition-count stand-in for a hidden Markov model
//!
//! No Baum–Welch: the conditional mode of the next symbol given the latest
//! one, over unweighted whole-history counts. Only switched on for long
//! histories, and its confidence stays modest.

use super::{argmax_first, Analysis, Predictor};
use crate::config::HmmConfig;
use crate::error::Result;
use crate::types::{PredictorId, Symbol, ALPHABET_SIZE};
use serde_json::json;

pub struct HmmPredictor {
    config: HmmConfig,
}

impl HmmPredictor {
    pub fn new(config: HmmConfig) -> Self {
        Self { config }
    }

    /// Rises from `base_confidence` at `min_length` toward `confidence_ceiling`
    pub fn length_confidence(&self, len: usize) -> f64 {
        let min = self.min_length() as f64;
        let progress = (1.0 - min / len.max(1) as f64).max(0.0);
        let span = self.config.confidence_ceiling - self.config.base_confidence;
        (self.config.base_confidence + span * progress).min(self.config.confidence_ceiling)
    }
}

impl Predictor for HmmPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Hmm
    }

    fn min_length(&self) -> usize {
        self.config.min_length.max(2)
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let mut counts = [[0.0; ALPHABET_SIZE]; ALPHABET_SIZE];
        for w in sequence.windows(2) {
            counts[w[0].index()][w[1].index()] += 1.0;
        }

        let last = sequence[sequence.len() - 1];
        let row = counts[last.index()];
        let total: f64 = row.iter().sum();
        if total == 0.0 {
            return Ok(Analysis::no_opinion(
                format!("{last} never followed by anything"),
                json!({ "last": last }),
            ));
        }

        match argmax_first(&row) {
            Some((next, count)) => Ok(Analysis::predict(
                Symbol::from_index(next),
                self.length_confidence(sequence.len()),
                json!({
                    "last": last,
                    "conditional_probability": count / total,
                    "observations": total,
                }),
            )),
            None => Ok(Analysis::no_opinion("empty transition row", json!({}))),
        }
    }
}
