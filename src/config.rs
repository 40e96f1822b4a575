//! Configuration management
//!
//! Layered as: built-in defaults, then an optional TOML file, then
//! `ENSEMBLE_*` environment variables (nested keys joined with `__`,
//! e.g. `ENSEMBLE_BATCH__BATCH_SIZE=10`).

use crate::error::{EnsembleError, Result};
use crate::types::PredictorId;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ensemble: EnsembleConfig,
    pub tracker: TrackerConfig,
    pub weights: WeightConfig,
    pub corrector: CorrectorConfig,
    pub predictors: PredictorsConfig,
    pub batch: BatchConfig,
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path).required(false))
            .add_source(
                config::Environment::with_prefix("ENSEMBLE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, value: f64) -> Result<()> {
            if (0.0..=1.0).contains(&value) {
                Ok(())
            } else {
                Err(EnsembleError::Config(format!("{name} must be within [0, 1], got {value}")))
            }
        }
        fn positive(name: &str, value: usize) -> Result<()> {
            if value > 0 {
                Ok(())
            } else {
                Err(EnsembleError::Config(format!("{name} must be greater than zero")))
            }
        }

        unit("ensemble.min_confidence", self.ensemble.min_confidence)?;
        positive("ensemble.min_votes", self.ensemble.min_votes)?;
        positive("ensemble.history_capacity", self.ensemble.history_capacity)?;

        positive("tracker.window_size", self.tracker.window_size)?;
        positive("tracker.calibration_window", self.tracker.calibration_window)?;
        unit("tracker.decay_factor", self.tracker.decay_factor)?;
        unit("tracker.threshold_floor", self.tracker.threshold_floor)?;
        unit("tracker.threshold_ceiling", self.tracker.threshold_ceiling)?;
        if self.tracker.threshold_floor > self.tracker.threshold_ceiling {
            return Err(EnsembleError::Config(
                "tracker.threshold_floor exceeds tracker.threshold_ceiling".into(),
            ));
        }

        unit("weights.base_learning_rate", self.weights.base_learning_rate)?;
        if self.weights.min_weight <= 0.0 {
            return Err(EnsembleError::Config("weights.min_weight must be positive".into()));
        }

        positive("corrector.history_capacity", self.corrector.history_capacity)?;
        unit("corrector.trust_threshold", self.corrector.trust_threshold)?;
        unit("corrector.min_coverage", self.corrector.min_coverage)?;

        positive("predictors.monte_carlo.simulations", self.predictors.monte_carlo.simulations)?;
        positive("predictors.monte_carlo.pattern_len", self.predictors.monte_carlo.pattern_len)?;
        positive("predictors.arima.ar_order", self.predictors.arima.ar_order)?;
        unit(
            "predictors.rng_seed.similarity_threshold",
            self.predictors.rng_seed.similarity_threshold,
        )?;

        positive("batch.batch_size", self.batch.batch_size)?;
        positive("batch.history_tail", self.batch.history_tail)?;
        positive("batch.event_capacity", self.batch.event_capacity)?;
        positive("batch.retained_batches", self.batch.retained_batches)?;
        Ok(())
    }
}

/// Coordinator settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Minimum calibrated confidence for a vote to count
    pub min_confidence: f64,
    /// Minimum qualifying votes before a symbol is emitted
    pub min_votes: usize,
    /// Completed cycles kept for ensemble-level accuracy
    pub history_capacity: usize,
    /// Discount over-confident predictors by their calibration factor
    pub use_calibration: bool,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_votes: 2,
            history_capacity: 100,
            use_calibration: true,
        }
    }
}

/// Per-predictor performance window settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub window_size: usize,
    pub decay_factor: f64,
    /// Recent outcomes used for the calibration factor
    pub calibration_window: usize,
    pub initial_threshold: f64,
    pub threshold_floor: f64,
    pub threshold_ceiling: f64,
    pub threshold_step: f64,
    /// Allowed distance of the calibration factor from 1.0
    pub calibration_tolerance: f64,
    /// Outcomes required before calibration or retraining flags apply
    pub min_samples: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_size: 20,
            decay_factor: 0.9,
            calibration_window: 10,
            initial_threshold: 0.6,
            threshold_floor: 0.55,
            threshold_ceiling: 0.75,
            threshold_step: 0.01,
            calibration_tolerance: 0.3,
            min_samples: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    pub base_learning_rate: f64,
    pub confidence_weight: f64,
    /// Floor applied to every weight before renormalization
    pub min_weight: f64,
}

impl Default for WeightConfig {
    fn default() -> Self {
        Self {
            base_learning_rate: 0.1,
            confidence_weight: 0.5,
            min_weight: 0.2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CorrectorConfig {
    pub history_capacity: usize,
    /// Predictions above this confidence are never overridden
    pub trust_threshold: f64,
    pub min_matches: usize,
    /// Share of matching entries a substitution must exceed
    pub min_coverage: f64,
}

impl Default for CorrectorConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            trust_threshold: 0.9,
            min_matches: 3,
            min_coverage: 0.3,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PredictorsConfig {
    pub markov: MarkovConfig,
    pub entropy: EntropyConfig,
    pub chi_square: ChiSquareConfig,
    pub monte_carlo: MonteCarloConfig,
    pub arima: ArimaConfig,
    pub hmm: HmmConfig,
    pub rng_seed: RngSeedConfig,
}

impl PredictorsConfig {
    pub fn is_enabled(&self, id: PredictorId) -> bool {
        match id {
            PredictorId::Markov => self.markov.enabled,
            PredictorId::Entropy => self.entropy.enabled,
            PredictorId::ChiSquare => self.chi_square.enabled,
            PredictorId::MonteCarlo => self.monte_carlo.enabled,
            PredictorId::Arima => self.arima.enabled,
            PredictorId::Hmm => self.hmm.enabled,
            PredictorId::RngSeed => self.rng_seed.enabled,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MarkovConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub use_decay: bool,
    pub decay_factor: f64,
    /// Transitions this close to the end get `recent_weight` on top of decay
    pub recent_window: usize,
    pub recent_weight: f64,
}

impl Default for MarkovConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 2,
            use_decay: true,
            decay_factor: 0.95,
            recent_window: 10,
            recent_weight: 1.5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EntropyConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub window_size: usize,
    /// Entropy in bits at which confidence reaches zero
    pub entropy_threshold: f64,
    pub min_pattern_len: usize,
    pub max_pattern_len: usize,
}

impl Default for EntropyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 10,
            window_size: 30,
            entropy_threshold: 1.5,
            min_pattern_len: 2,
            max_pattern_len: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChiSquareConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub window_size: usize,
    pub learning_rate: f64,
}

impl Default for ChiSquareConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 20,
            window_size: 40,
            learning_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub pattern_len: usize,
    pub simulations: usize,
    /// Continuations seen fewer times than this are pruned when a stronger one exists
    pub min_occurrences: u32,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 4,
            pattern_len: 3,
            simulations: 1000,
            min_occurrences: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArimaConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub ar_order: usize,
}

impl Default for ArimaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 10,
            ar_order: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HmmConfig {
    pub enabled: bool,
    pub min_length: usize,
    pub base_confidence: f64,
    pub confidence_ceiling: f64,
}

impl Default for HmmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 200,
            base_confidence: 0.4,
            confidence_ceiling: 0.8,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RngSeedConfig {
    pub enabled: bool,
    pub min_length: usize,
    /// Seeds `0..seed_range` are tried for every family
    pub seed_range: u64,
    pub similarity_threshold: f64,
    /// Only the first `max_compare` symbols are regenerated and compared
    pub max_compare: usize,
    pub max_candidates: usize,
}

impl Default for RngSeedConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_length: 16,
            seed_range: 4096,
            similarity_threshold: 0.85,
            max_compare: 128,
            max_candidates: 5,
        }
    }
}

/// Batch feedback loop settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    /// Timeout for one queue connectivity check
    pub queue_timeout_ms: u64,
    /// Connectivity checks before falling back to in-process processing
    pub queue_retries: u32,
    /// Symbols of history handed to the coordinator per prediction
    pub history_tail: usize,
    /// Capacity of the prediction broadcast channel
    pub event_capacity: usize,
    /// Finished batches kept for status queries, oldest forgotten first
    pub retained_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_delay_ms: 2000,
            queue_timeout_ms: 1000,
            queue_retries: 3,
            history_tail: 500,
            event_capacity: 256,
            retained_batches: 1024,
        }
    }
}
