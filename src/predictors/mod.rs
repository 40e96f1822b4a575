//! Statistical predictors
//!
//! Every predictor implements one contract:
//! - `analyze` looks at a read-only sequence tail and returns a guess
//! - short sequences yield a null prediction at chance confidence, never an error
//! - genuine numerical failures surface as `EnsembleError::PredictorFault`
//!
//! Predictors live in a fixed-size table indexed by `PredictorId`.

pub mod arima;
pub mod chi_square;
pub mod entropy;
pub mod hmm;
pub mod markov;
pub mod monte_carlo;
pub mod rng_seed;

#[cfg(test)]
mod tests;

pub use arima::ArimaPredictor;
pub use chi_square::ChiSquarePredictor;
pub use entropy::EntropyPredictor;
pub use hmm::HmmPredictor;
pub use markov::{MarkovPredictor, TransitionMatrix};
pub use monte_carlo::MonteCarloPredictor;
pub use rng_seed::{generate, GeneratorState, RngSeedPredictor};

use crate::config::PredictorsConfig;
use crate::error::Result;
use crate::types::{
    clamp_confidence, PredictorId, PredictorRole, SeedMatch, Symbol, ALPHABET_SIZE,
    BASELINE_CONFIDENCE,
};
use serde_json::{json, Value};

/// Output of a single `analyze` call
#[derive(Debug, Clone, PartialEq)]
pub struct Analysis {
    pub prediction: Option<Symbol>,
    pub confidence: f64,
    pub message: Option<String>,
    /// Predictor-specific debugging payload
    pub detail: Value,
    /// Set only by diagnostic predictors
    pub seed_match: Option<SeedMatch>,
}

impl Analysis {
    pub fn predict(symbol: Symbol, confidence: f64, detail: Value) -> Self {
        Self {
            prediction: Some(symbol),
            confidence: clamp_confidence(confidence),
            message: None,
            detail,
            seed_match: None,
        }
    }

    /// Not enough history to say anything
    pub fn insufficient(have: usize, need: usize) -> Self {
        Self {
            prediction: None,
            confidence: BASELINE_CONFIDENCE,
            message: Some(format!("insufficient data: {have} symbols, need {need}")),
            detail: json!({ "have": have, "need": need }),
            seed_match: None,
        }
    }

    /// Enough history, but nothing to predict from it
    pub fn no_opinion(message: impl Into<String>, detail: Value) -> Self {
        Self {
            prediction: None,
            confidence: BASELINE_CONFIDENCE,
            message: Some(message.into()),
            detail,
            seed_match: None,
        }
    }
}

/// Common predictor contract
pub trait Predictor: Send + Sync {
    fn id(&self) -> PredictorId;

    /// Shortest sequence the predictor will form an opinion on
    fn min_length(&self) -> usize;

    fn role(&self) -> PredictorRole {
        PredictorRole::Voter
    }

    /// Depends only on `sequence` and the predictor's own state
    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis>;

    /// Ground truth for `sequence`; predictors with rolling state adapt here
    fn observe(&mut self, _sequence: &[Symbol], _actual: Symbol) {}
}

struct Slot {
    predictor: Box<dyn Predictor>,
    enabled: bool,
}

/// One slot per `PredictorId`, in `PredictorId::ALL` order
pub struct PredictorTable {
    slots: [Slot; PredictorId::COUNT],
}

impl PredictorTable {
    pub fn from_config(config: &PredictorsConfig) -> Self {
        let slots = PredictorId::ALL.map(|id| Slot {
            predictor: build(id, config),
            enabled: config.is_enabled(id),
        });
        Self { slots }
    }

    /// Swap in a custom implementation for the predictor's own slot
    pub fn replace(&mut self, predictor: Box<dyn Predictor>) {
        let slot = &mut self.slots[predictor.id().index()];
        slot.predictor = predictor;
        slot.enabled = true;
    }

    pub fn set_enabled(&mut self, id: PredictorId, enabled: bool) {
        self.slots[id.index()].enabled = enabled;
    }

    pub fn is_enabled(&self, id: PredictorId) -> bool {
        self.slots[id.index()].enabled
    }

    pub fn get(&self, id: PredictorId) -> &dyn Predictor {
        self.slots[id.index()].predictor.as_ref()
    }

    pub fn enabled(&self) -> impl Iterator<Item = &dyn Predictor> + '_ {
        self.slots
            .iter()
            .filter(|s| s.enabled)
            .map(|s| s.predictor.as_ref())
    }

    pub fn enabled_mut(&mut self) -> impl Iterator<Item = &mut Box<dyn Predictor>> + '_ {
        self.slots
            .iter_mut()
            .filter(|s| s.enabled)
            .map(|s| &mut s.predictor)
    }
}

fn build(id: PredictorId, config: &PredictorsConfig) -> Box<dyn Predictor> {
    match id {
        PredictorId::Markov => Box::new(MarkovPredictor::new(config.markov.clone())),
        PredictorId::Entropy => Box::new(EntropyPredictor::new(config.entropy.clone())),
        PredictorId::ChiSquare => Box::new(ChiSquarePredictor::new(config.chi_square.clone())),
        PredictorId::MonteCarlo => Box::new(MonteCarloPredictor::new(config.monte_carlo.clone())),
        PredictorId::Arima => Box::new(ArimaPredictor::new(config.arima.clone())),
        PredictorId::Hmm => Box::new(HmmPredictor::new(config.hmm.clone())),
        PredictorId::RngSeed => Box::new(RngSeedPredictor::new(config.rng_seed.clone())),
    }
}

/// Index of the largest value; the first one wins ties
pub(crate) fn argmax_first(values: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Shannon entropy in bits of a frequency table
pub(crate) fn shannon_entropy<I>(counts: I) -> f64
where
    I: IntoIterator<Item = f64>,
{
    let counts: Vec<f64> = counts.into_iter().filter(|c| *c > 0.0).collect();
    let total: f64 = counts.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    counts
        .iter()
        .map(|c| {
            let p = c / total;
            -p * p.log2()
        })
        .sum()
}

pub(crate) fn symbol_counts(sequence: &[Symbol]) -> [f64; ALPHABET_SIZE] {
    let mut counts = [0.0; ALPHABET_SIZE];
    for s in sequence {
        counts[s.index()] += 1.0;
    }
    counts
}

/// The last `n` symbols (or all of them)
pub(crate) fn trailing(sequence: &[Symbol], n: usize) -> &[Symbol] {
    &sequence[sequence.len().saturating_sub(n)..]
}
