//! First-order Markov chain over symbol transitions

use super::{argmax_first, Analysis, Predictor};
use crate::config::MarkovConfig;
use crate::error::Result;
use crate::types::{PredictorId, Symbol, ALPHABET_SIZE};
use serde_json::json;

pub type TransitionMatrix = [[f64; ALPHABET_SIZE]; ALPHABET_SIZE];

/// Keeps very old transitions from underflowing to zero
const MIN_TRANSITION_WEIGHT: f64 = 1e-9;

pub struct MarkovPredictor {
    config: MarkovConfig,
}

impl MarkovPredictor {
    pub fn new(config: MarkovConfig) -> Self {
        Self { config }
    }

    /// Weighted transition counts; newest transitions weigh the most
    pub fn transition_counts(&self, sequence: &[Symbol]) -> TransitionMatrix {
        let mut counts = [[0.0; ALPHABET_SIZE]; ALPHABET_SIZE];
        let mut weight = 1.0;

        for (age, pair) in sequence.windows(2).rev().enumerate() {
            let w = if self.config.use_decay {
                if age < self.config.recent_window {
                    weight * self.config.recent_weight
                } else {
                    weight
                }
            } else {
                1.0
            };
            counts[pair[0].index()][pair[1].index()] += w;
            weight = (weight * self.config.decay_factor).max(MIN_TRANSITION_WEIGHT);
        }

        counts
    }

    /// Row-normalized transition probabilities; unobserved rows stay all zero
    pub fn transition_matrix(&self, sequence: &[Symbol]) -> TransitionMatrix {
        let mut matrix = self.transition_counts(sequence);
        for row in matrix.iter_mut() {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                for p in row.iter_mut() {
                    *p /= total;
                }
            }
        }
        matrix
    }
}

impl Predictor for MarkovPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Markov
    }

    fn min_length(&self) -> usize {
        self.config.min_length.max(2)
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let matrix = self.transition_matrix(sequence);
        let last = sequence[sequence.len() - 1];
        let row = matrix[last.index()];

        if row.iter().sum::<f64>() == 0.0 {
            return Ok(Analysis::no_opinion(
                format!("no transitions observed from {last}"),
                json!({ "last": last }),
            ));
        }

        match argmax_first(&row) {
            Some((next, probability)) => Ok(Analysis::predict(
                Symbol::from_index(next),
                probability,
                json!({ "last": last, "row": row }),
            )),
            None => Ok(Analysis::no_opinion("empty transition row", json!({}))),
        }
    }
}
