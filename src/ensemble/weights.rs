//! Performance-driven model weights
//!
//! Raw weights are kept on a scale where 1.0 is an equal share. Each update
//! pulls them toward targets derived from tracked performance, at a learning
//! rate damped by how noisy the predictor's accuracy has been, then floors
//! them at `min_weight` so no predictor is ever silenced. Normalized weights
//! are the raw weights divided by their sum.

use super::tracker::PerformanceTracker;
use crate::config::WeightConfig;
use crate::error::{EnsembleError, Result};
use crate::types::{PredictorId, BASELINE_CONFIDENCE};

#[derive(Debug, Clone)]
pub struct WeightManager {
    config: WeightConfig,
    raw: [f64; PredictorId::COUNT],
}

impl WeightManager {
    pub fn new(config: WeightConfig) -> Self {
        Self {
            config,
            raw: [1.0; PredictorId::COUNT],
        }
    }

    /// Pre-normalization weights, each at least `min_weight`
    pub fn raw(&self) -> [f64; PredictorId::COUNT] {
        self.raw
    }

    /// Normalized weight vector, sums to 1
    pub fn weights(&self) -> [f64; PredictorId::COUNT] {
        let total: f64 = self.raw.iter().sum();
        let mut weights = self.raw;
        for w in weights.iter_mut() {
            *w /= total;
        }
        weights
    }

    pub fn weight(&self, id: PredictorId) -> f64 {
        self.raw[id.index()] / self.raw.iter().sum::<f64>()
    }

    pub fn score(&self, tracker: &PerformanceTracker, id: PredictorId) -> f64 {
        let confidence_edge = tracker.average_confidence(id) - BASELINE_CONFIDENCE;
        let score = tracker.decayed_accuracy(id) * (1.0 + self.config.confidence_weight * confidence_edge);
        score.max(0.0)
    }

    /// `base_learning_rate × 1/(1 + variance)`
    pub fn learning_rate(&self, tracker: &PerformanceTracker, id: PredictorId) -> f64 {
        let stability = 1.0 / (1.0 + tracker.accuracy_variance(id));
        self.config.base_learning_rate * stability
    }

    /// Recompute every weight from the tracker
    pub fn update(&mut self, tracker: &PerformanceTracker) -> Result<()> {
        let n = PredictorId::COUNT as f64;
        let scores = PredictorId::ALL.map(|id| self.score(tracker, id));
        let total: f64 = scores.iter().sum();

        let mut next = self.raw;
        for id in PredictorId::ALL {
            let i = id.index();
            let target = if total > 0.0 { n * scores[i] / total } else { 1.0 };
            let rate = self.learning_rate(tracker, id);
            next[i] = (next[i] + rate * (target - next[i])).max(self.config.min_weight);
        }

        if next.iter().any(|w| !w.is_finite()) {
            return Err(EnsembleError::StateUpdate(format!("non-finite weights: {next:?}")));
        }

        self.raw = next;
        tracing::debug!("Weights updated: {:?}", self.weights());
        Ok(())
    }
}
