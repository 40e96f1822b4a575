//! Ensemble coordination
//!
//! One prediction cycle runs Collect → Filter → Vote → Correct → Emit:
//! - every enabled predictor analyzes the sequence, faults are isolated
//! - votes below `min_confidence` (after calibration) are dropped
//! - surviving votes are weighted by `weight × confidence` per symbol
//! - the winner goes through the error corrector
//!
//! Ground truth flows back through `record_outcome`, which updates the
//! tracker, the weights and the corrector as one all-or-nothing step.

pub mod correction;
pub mod tracker;
pub mod weights;


pub use correction::{Context, Correction, ErrorCorrector, PatternStats};
pub use tracker::{Outcome, PerformanceTracker};
pub use weights::WeightManager;

use crate::config::{Config, EnsembleConfig};
use crate::error::Result;
use crate::predictors::{Predictor, PredictorTable};
use crate::types::{
    clamp_confidence, trailing_context, EnsembleResult, ModelBreakdown, NullReason,
    PredictionRecord, PredictorId, PredictorRole, Symbol, VoteStatus, ALPHABET_SIZE,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use serde::Serialize;
use std::collections::VecDeque;
use tracing::{debug, warn};

/// Everything that changes when ground truth arrives
#[derive(Debug, Clone)]
struct AdaptiveState {
    tracker: PerformanceTracker,
    weights: WeightManager,
    corrector: ErrorCorrector,
    history: VecDeque<CycleOutcome>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CycleOutcome {
    predicted: Option<Symbol>,
    actual: Symbol,
}

/// The last cycle, waiting for its ground truth
#[derive(Debug, Clone)]
struct PendingCycle {
    sequence: Vec<Symbol>,
    records: Vec<PredictionRecord>,
    /// Pre-correction winner and its confidence
    vote: Option<(Symbol, f64)>,
    emitted: Option<Symbol>,
}

/// Per-predictor snapshot for observability
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelStats {
    pub predictor: PredictorId,
    pub enabled: bool,
    pub weight: f64,
    pub raw_weight: f64,
    pub decayed_accuracy: f64,
    pub recent_accuracy: f64,
    pub calibration_factor: f64,
    pub window_len: usize,
    pub needs_retraining: bool,
}

/// What one ground-truth event changed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackSummary {
    pub actual: Symbol,
    pub ensemble_correct: Option<bool>,
    pub predictors_graded: usize,
}

pub struct EnsembleCoordinator {
    config: EnsembleConfig,
    predictors: RwLock<PredictorTable>,
    state: RwLock<AdaptiveState>,
    pending: Mutex<Option<PendingCycle>>,
}

impl EnsembleCoordinator {
    pub fn new(config: &Config) -> Self {
        Self::with_table(config, PredictorTable::from_config(&config.predictors))
    }

    pub fn with_table(config: &Config, table: PredictorTable) -> Self {
        Self {
            config: config.ensemble.clone(),
            predictors: RwLock::new(table),
            state: RwLock::new(AdaptiveState {
                tracker: PerformanceTracker::new(config.tracker.clone()),
                weights: WeightManager::new(config.weights.clone()),
                corrector: ErrorCorrector::new(config.corrector.clone()),
                history: VecDeque::with_capacity(config.ensemble.history_capacity),
            }),
            pending: Mutex::new(None),
        }
    }

    pub fn set_enabled(&self, id: PredictorId, enabled: bool) {
        self.predictors.write().set_enabled(id, enabled);
    }

    pub fn replace_predictor(&self, predictor: Box<dyn Predictor>) {
        self.predictors.write().replace(predictor);
    }

    /// Run one prediction cycle over `sequence`
    pub fn predict(&self, sequence: &[Symbol]) -> EnsembleResult {
        // Collect
        let collected: Vec<_> = {
            let table = self.predictors.read();
            table
                .enabled()
                .map(|p| (p.id(), p.role(), p.analyze(sequence)))
                .collect()
        };

        if collected.is_empty() {
            *self.pending.lock() = None;
            return EnsembleResult::null(NullReason::NoPredictors, Vec::new());
        }

        let state = self.state.read();
        let now = Utc::now();
        let context_snapshot = trailing_context(sequence).map(|c| c.to_vec()).unwrap_or_default();

        let mut breakdown = Vec::with_capacity(collected.len());
        let mut records = Vec::new();
        let mut deterministic_source = None;

        for (id, role, outcome) in collected {
            let weight = state.weights.weight(id);
            let analysis = match outcome {
                Ok(analysis) => analysis,
                Err(e) => {
                    warn!("Predictor {} excluded from cycle: {}", id, e);
                    breakdown.push(ModelBreakdown {
                        predictor: id,
                        prediction: None,
                        raw_confidence: 0.0,
                        calibrated_confidence: 0.0,
                        weight,
                        status: VoteStatus::Faulted(e.to_string()),
                        message: None,
                        detail: serde_json::Value::Null,
                    });
                    continue;
                }
            };

            let calibrated = if self.config.use_calibration {
                clamp_confidence(analysis.confidence * state.tracker.calibration_factor(id).min(1.0))
            } else {
                analysis.confidence
            };

            // Filter
            let status = match (role, analysis.prediction) {
                (PredictorRole::Diagnostic, _) => VoteStatus::Diagnostic,
                (_, None) => VoteStatus::Abstained,
                (_, Some(_)) if calibrated >= self.config.min_confidence => VoteStatus::Voted,
                _ => VoteStatus::BelowThreshold,
            };

            debug!(
                "{}: {:?} conf={:.3} (calibrated {:.3}) {:?}",
                id, analysis.prediction, analysis.confidence, calibrated, status
            );

            if role == PredictorRole::Diagnostic && analysis.seed_match.is_some() {
                deterministic_source = analysis.seed_match.clone();
            }

            if analysis.prediction.is_some() {
                records.push(PredictionRecord {
                    predictor: id,
                    predicted: analysis.prediction,
                    raw_confidence: analysis.confidence,
                    context: context_snapshot.clone(),
                    timestamp: now,
                });
            }

            breakdown.push(ModelBreakdown {
                predictor: id,
                prediction: analysis.prediction,
                raw_confidence: analysis.confidence,
                calibrated_confidence: calibrated,
                weight,
                status,
                message: analysis.message,
                detail: analysis.detail,
            });
        }

        let voters: Vec<&ModelBreakdown> = breakdown
            .iter()
            .filter(|b| b.status == VoteStatus::Voted)
            .collect();

        if voters.len() < self.config.min_votes {
            let reason = NullReason::UnderQuorum {
                qualifying: voters.len(),
                required: self.config.min_votes,
            };
            debug!("Ensemble under quorum: {:?}", reason);
            drop(state);
            self.set_pending(sequence, records, None, None);
            let mut result = EnsembleResult::null(reason, breakdown);
            result.deterministic_source = deterministic_source;
            return result;
        }

        // Vote
        let mut scores = [0.0; ALPHABET_SIZE];
        for v in &voters {
            if let Some(symbol) = v.prediction {
                scores[symbol.index()] += v.weight * v.calibrated_confidence;
            }
        }
        let mut winner = 0;
        for i in 1..ALPHABET_SIZE {
            if scores[i] > scores[winner] {
                winner = i;
            }
        }
        let winner = Symbol::from_index(winner);

        let total: f64 = scores.iter().sum();
        let vote_ratio = if total > 0.0 { scores[winner.index()] / total } else { 0.0 };
        let agreeing: Vec<&&ModelBreakdown> = voters
            .iter()
            .filter(|v| v.prediction == Some(winner))
            .collect();
        let consensus = agreeing.len() as f64 / voters.len() as f64;
        let max_confidence = agreeing
            .iter()
            .map(|v| v.raw_confidence)
            .fold(0.0, f64::max);
        let confidence = clamp_confidence(vote_ratio * consensus * max_confidence);

        // Correct
        let context = trailing_context(sequence);
        let correction = state.corrector.correct(context.as_ref(), winner, confidence);
        drop(state);

        debug!(
            "Ensemble: {} conf={:.3} consensus={:.2} corrected={}",
            correction.symbol, correction.confidence, consensus, correction.applied
        );

        // Emit
        self.set_pending(sequence, records, Some((winner, confidence)), Some(correction.symbol));
        EnsembleResult {
            symbol: Some(correction.symbol),
            confidence: clamp_confidence(correction.confidence),
            consensus,
            correction_applied: correction.applied,
            corrected_from: correction.applied.then_some(correction.original),
            null_reason: None,
            deterministic_source,
            breakdown,
        }
    }

    fn set_pending(
        &self,
        sequence: &[Symbol],
        records: Vec<PredictionRecord>,
        vote: Option<(Symbol, f64)>,
        emitted: Option<Symbol>,
    ) {
        *self.pending.lock() = Some(PendingCycle {
            sequence: sequence.to_vec(),
            records,
            vote,
            emitted,
        });
    }

    /// Forget the last cycle without grading it
    pub fn discard_pending(&self) {
        self.pending.lock().take();
    }

    pub fn has_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Grade the most recent cycle against the symbol that actually followed
    ///
    /// Returns `Ok(None)` when there is nothing to grade. On error the
    /// tracker, weights and corrector are left exactly as they were.
    pub fn record_outcome(&self, actual: Symbol) -> Result<Option<FeedbackSummary>> {
        let Some(cycle) = self.pending.lock().take() else {
            debug!("No pending prediction for outcome {}", actual);
            return Ok(None);
        };

        // upgradable read: readers continue, other writers wait
        let guard = self.state.upgradable_read();
        let mut next = (*guard).clone();

        let mut graded = 0;
        for record in &cycle.records {
            if let Some(predicted) = record.predicted {
                next.tracker.record(record.predictor, predicted == actual, record.raw_confidence)?;
                graded += 1;
            }
        }
        next.weights.update(&next.tracker)?;

        if let (Some((voted, confidence)), Some(context)) = (cycle.vote, trailing_context(&cycle.sequence)) {
            next.corrector.record(context, voted, actual, confidence);
        }

        next.history.push_back(CycleOutcome {
            predicted: cycle.emitted,
            actual,
        });
        while next.history.len() > self.config.history_capacity {
            next.history.pop_front();
        }

        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        *guard = next;
        drop(guard);

        let mut table = self.predictors.write();
        for predictor in table.enabled_mut() {
            predictor.observe(&cycle.sequence, actual);
        }

        Ok(Some(FeedbackSummary {
            actual,
            ensemble_correct: cycle.emitted.map(|s| s == actual),
            predictors_graded: graded,
        }))
    }

    pub fn weights(&self) -> [f64; PredictorId::COUNT] {
        self.state.read().weights.weights()
    }

    pub fn raw_weights(&self) -> [f64; PredictorId::COUNT] {
        self.state.read().weights.raw()
    }

    pub fn model_stats(&self) -> Vec<ModelStats> {
        let table = self.predictors.read();
        let state = self.state.read();
        let weights = state.weights.weights();
        let raw = state.weights.raw();

        PredictorId::ALL
            .iter()
            .map(|&id| ModelStats {
                predictor: id,
                enabled: table.is_enabled(id),
                weight: weights[id.index()],
                raw_weight: raw[id.index()],
                decayed_accuracy: state.tracker.decayed_accuracy(id),
                recent_accuracy: state.tracker.recent_accuracy(id),
                calibration_factor: state.tracker.calibration_factor(id),
                window_len: state.tracker.window_len(id),
                needs_retraining: state.tracker.needs_retraining(id),
            })
            .collect()
    }

    /// Hit rate of emitted symbols over the retained history
    pub fn ensemble_accuracy(&self) -> Option<f64> {
        let state = self.state.read();
        let (hits, n) = state
            .history
            .iter()
            .filter_map(|c| c.predicted.map(|p| p == c.actual))
            .fold((0usize, 0usize), |(h, n), hit| (h + hit as usize, n + 1));
        (n > 0).then(|| hits as f64 / n as f64)
    }

    pub fn history_len(&self) -> usize {
        self.state.read().history.len()
    }

    pub fn corrector_len(&self) -> usize {
        self.state.read().corrector.len()
    }
}
