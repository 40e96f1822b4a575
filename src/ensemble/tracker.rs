//! Per-predictor performance tracking
//!
//! Each predictor gets a bounded window of outcomes. From it we derive:
//! - a decayed accuracy (newest outcome weighs 1, older ones `decay^age`)
//! - a calibration factor (realized accuracy / stated confidence)
//! - an adaptive retraining threshold nudged toward recent accuracy

use crate::config::TrackerConfig;
use crate::error::{EnsembleError, Result};
use crate::types::{PredictorId, BASELINE_CONFIDENCE, MAX_CONFIDENCE};
use serde::Serialize;
use std::collections::VecDeque;

/// One graded prediction
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Outcome {
    /// Correctness adjusted by how far confidence strayed from chance
    pub weighted_accuracy: f64,
    pub confidence: f64,
    pub correct: bool,
}

impl Outcome {
    pub fn grade(correct: bool, confidence: f64) -> Self {
        let emphasis =
            ((confidence - BASELINE_CONFIDENCE) / (MAX_CONFIDENCE - BASELINE_CONFIDENCE)).clamp(0.0, 1.0);
        let weighted_accuracy = if correct {
            0.75 + 0.25 * emphasis
        } else {
            0.25 - 0.25 * emphasis
        };
        Self {
            weighted_accuracy,
            confidence,
            correct,
        }
    }
}

#[derive(Debug, Clone)]
struct PerformanceWindow {
    outcomes: VecDeque<Outcome>,
    threshold: f64,
}

#[derive(Debug, Clone)]
pub struct PerformanceTracker {
    config: TrackerConfig,
    windows: [PerformanceWindow; PredictorId::COUNT],
}

impl PerformanceTracker {
    pub fn new(config: TrackerConfig) -> Self {
        let windows = std::array::from_fn(|_| PerformanceWindow {
            outcomes: VecDeque::with_capacity(config.window_size),
            threshold: config.initial_threshold,
        });
        Self { config, windows }
    }

    /// Grade one prediction against ground truth
    pub fn record(&mut self, id: PredictorId, correct: bool, confidence: f64) -> Result<()> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(EnsembleError::StateUpdate(format!(
                "{id}: confidence {confidence} outside [0, 1]"
            )));
        }

        let capacity = self.config.window_size;
        let window = &mut self.windows[id.index()];
        window.outcomes.push_back(Outcome::grade(correct, confidence));
        while window.outcomes.len() > capacity {
            window.outcomes.pop_front();
        }

        let recent = self.recent_accuracy(id);
        let window = &mut self.windows[id.index()];
        if recent > window.threshold {
            window.threshold += self.config.threshold_step;
        } else if recent < window.threshold {
            window.threshold -= self.config.threshold_step;
        }
        window.threshold = window
            .threshold
            .clamp(self.config.threshold_floor, self.config.threshold_ceiling);
        Ok(())
    }

    pub fn outcomes(&self, id: PredictorId) -> impl Iterator<Item = &Outcome> + '_ {
        self.windows[id.index()].outcomes.iter()
    }

    pub fn window_len(&self, id: PredictorId) -> usize {
        self.windows[id.index()].outcomes.len()
    }

    /// Recency-weighted mean of weighted accuracy; chance level when empty
    pub fn decayed_accuracy(&self, id: PredictorId) -> f64 {
        let mut weight = 1.0;
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for outcome in self.windows[id.index()].outcomes.iter().rev() {
            weighted_sum += weight * outcome.weighted_accuracy;
            weight_total += weight;
            weight *= self.config.decay_factor;
        }

        if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            BASELINE_CONFIDENCE
        }
    }

    fn recent(&self, id: PredictorId) -> impl Iterator<Item = &Outcome> + '_ {
        let outcomes = &self.windows[id.index()].outcomes;
        outcomes
            .iter()
            .skip(outcomes.len().saturating_sub(self.config.calibration_window))
    }

    /// Plain hit rate over the calibration window
    pub fn recent_accuracy(&self, id: PredictorId) -> f64 {
        let (hits, n) = self
            .recent(id)
            .fold((0usize, 0usize), |(h, n), o| (h + o.correct as usize, n + 1));
        if n == 0 {
            BASELINE_CONFIDENCE
        } else {
            hits as f64 / n as f64
        }
    }

    pub fn average_confidence(&self, id: PredictorId) -> f64 {
        let (sum, n) = self
            .recent(id)
            .fold((0.0, 0usize), |(s, n), o| (s + o.confidence, n + 1));
        if n == 0 {
            BASELINE_CONFIDENCE
        } else {
            sum / n as f64
        }
    }

    /// Realized accuracy / stated confidence; 1.0 until enough samples exist
    pub fn calibration_factor(&self, id: PredictorId) -> f64 {
        if self.window_len(id) < self.config.min_samples {
            return 1.0;
        }
        let confidence = self.average_confidence(id);
        if confidence <= 0.0 {
            return 1.0;
        }
        (self.recent_accuracy(id) / confidence).clamp(0.0, 2.0)
    }

    /// Population variance of weighted accuracy across the window
    pub fn accuracy_variance(&self, id: PredictorId) -> f64 {
        let outcomes = &self.windows[id.index()].outcomes;
        if outcomes.len() < 2 {
            return 0.0;
        }
        let n = outcomes.len() as f64;
        let mean = outcomes.iter().map(|o| o.weighted_accuracy).sum::<f64>() / n;
        outcomes
            .iter()
            .map(|o| (o.weighted_accuracy - mean).powi(2))
            .sum::<f64>()
            / n
    }

    pub fn threshold(&self, id: PredictorId) -> f64 {
        self.windows[id.index()].threshold
    }

    pub fn needs_retraining(&self, id: PredictorId) -> bool {
        if self.window_len(id) < self.config.min_samples {
            return false;
        }
        let poorly_calibrated =
            (self.calibration_factor(id) - 1.0).abs() > self.config.calibration_tolerance;
        self.recent_accuracy(id) < self.threshold(id) || poorly_calibrated
    }
}
