//! Chi-square deviation ("most due symbol") model

use super::{symbol_counts, trailing, Analysis, Predictor};
use crate::config::ChiSquareConfig;
use crate::error::Result;
use crate::types::{PredictorId, Symbol, ALPHABET_SIZE};
use serde_json::json;

/// No expected share may collapse below this
const MIN_EXPECTED_SHARE: f64 = 0.01;

pub struct ChiSquarePredictor {
    config: ChiSquareConfig,
    /// Expected share of each symbol, sums to 1
    expected: [f64; ALPHABET_SIZE],
}

impl ChiSquarePredictor {
    pub fn new(config: ChiSquareConfig) -> Self {
        Self {
            config,
            expected: [1.0 / ALPHABET_SIZE as f64; ALPHABET_SIZE],
        }
    }

    pub fn expected(&self) -> [f64; ALPHABET_SIZE] {
        self.expected
    }

    /// χ² statistic and per-symbol deviation (observed − expected)
    pub fn statistic(&self, window: &[Symbol]) -> (f64, [f64; ALPHABET_SIZE]) {
        let observed = symbol_counts(window);
        let n = window.len() as f64;
        let mut chi2 = 0.0;
        let mut deviation = [0.0; ALPHABET_SIZE];

        for i in 0..ALPHABET_SIZE {
            let expected = self.expected[i] * n;
            deviation[i] = observed[i] - expected;
            if expected > 0.0 {
                chi2 += deviation[i] * deviation[i] / expected;
            }
        }

        (chi2, deviation)
    }

    pub fn confidence_for(chi2: f64) -> f64 {
        (1.0 - (-chi2 / 10.0).exp()).clamp(0.25, 0.95)
    }
}

impl Predictor for ChiSquarePredictor {
    fn id(&self) -> PredictorId {
        PredictorId::ChiSquare
    }

    fn min_length(&self) -> usize {
        self.config.min_length.max(1)
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let window = trailing(sequence, self.config.window_size);
        let (chi2, deviation) = self.statistic(window);

        // most negative deviation: the symbol most underrepresented
        let mut due = 0;
        for i in 1..ALPHABET_SIZE {
            if deviation[i] < deviation[due] {
                due = i;
            }
        }

        Ok(Analysis::predict(
            Symbol::from_index(due),
            Self::confidence_for(chi2),
            json!({
                "chi_square": chi2,
                "deviation": deviation,
                "expected": self.expected,
                "window": window.len(),
            }),
        ))
    }

    fn observe(&mut self, sequence: &[Symbol], actual: Symbol) {
        let mut window = trailing(sequence, self.config.window_size.saturating_sub(1)).to_vec();
        window.push(actual);

        let counts = symbol_counts(&window);
        let n = window.len() as f64;
        let rate = self.config.learning_rate;

        for i in 0..ALPHABET_SIZE {
            let share = counts[i] / n;
            self.expected[i] = (self.expected[i] * (1.0 - rate) + share * rate).max(MIN_EXPECTED_SHARE);
        }

        let total: f64 = self.expected.iter().sum();
        for e in self.expected.iter_mut() {
            *e /= total;
        }
    }
}
