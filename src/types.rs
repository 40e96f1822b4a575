//! Core types shared across the ensemble

use crate::error::{EnsembleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of distinct symbols in the alphabet
pub const ALPHABET_SIZE: usize = 4;

/// Length of the trailing context used for error patterns
pub const CONTEXT_LEN: usize = 5;

/// Confidence ceiling applied everywhere; nothing is ever reported as certain
pub const MAX_CONFIDENCE: f64 = 0.95;

/// Uniform-chance confidence for a four-symbol alphabet
pub const BASELINE_CONFIDENCE: f64 = 0.25;

/// One observed outcome, always in `0..=3`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Symbol(u8);

impl Symbol {
    pub const ALL: [Symbol; ALPHABET_SIZE] = [Symbol(0), Symbol(1), Symbol(2), Symbol(3)];

    pub fn new(value: u8) -> Result<Self> {
        Self::try_from(value as i64)
    }

    /// Wraps any index into the alphabet
    pub fn from_index(index: usize) -> Self {
        Symbol((index % ALPHABET_SIZE) as u8)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<i64> for Symbol {
    type Error = EnsembleError;

    fn try_from(value: i64) -> Result<Self> {
        if (0..ALPHABET_SIZE as i64).contains(&value) {
            Ok(Symbol(value as u8))
        } else {
            Err(EnsembleError::InvalidSymbol(value))
        }
    }
}

impl From<Symbol> for u8 {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validate raw integers at the boundary
pub fn symbols_from_raw(values: &[i64]) -> Result<Vec<Symbol>> {
    values.iter().map(|v| Symbol::try_from(*v)).collect()
}

/// Parse "0,1,2" / "0 1 2" / "012" style input
pub fn parse_sequence(input: &str) -> Result<Vec<Symbol>> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    let has_separator = trimmed.contains(',') || trimmed.contains(char::is_whitespace);
    if has_separator {
        trimmed
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .map(|t| {
                t.parse::<i64>()
                    .map_err(|_| EnsembleError::Config(format!("not a symbol: {t:?}")))
                    .and_then(Symbol::try_from)
            })
            .collect()
    } else {
        trimmed
            .chars()
            .map(|c| match c.to_digit(10) {
                Some(d) => Symbol::try_from(d as i64),
                None => Err(EnsembleError::Config(format!("not a symbol: {c:?}"))),
            })
            .collect()
    }
}

/// Trailing context of exactly `CONTEXT_LEN` symbols, if the sequence is long enough
pub fn trailing_context(sequence: &[Symbol]) -> Option<[Symbol; CONTEXT_LEN]> {
    if sequence.len() < CONTEXT_LEN {
        return None;
    }
    let tail = &sequence[sequence.len() - CONTEXT_LEN..];
    let mut context = [Symbol(0); CONTEXT_LEN];
    context.copy_from_slice(tail);
    Some(context)
}

/// Fixed identifiers for every predictor in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorId {
    Markov,
    Entropy,
    ChiSquare,
    MonteCarlo,
    Arima,
    Hmm,
    RngSeed,
}

impl PredictorId {
    pub const COUNT: usize = 7;

    pub const ALL: [PredictorId; PredictorId::COUNT] = [
        PredictorId::Markov,
        PredictorId::Entropy,
        PredictorId::ChiSquare,
        PredictorId::MonteCarlo,
        PredictorId::Arima,
        PredictorId::Hmm,
        PredictorId::RngSeed,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            PredictorId::Markov => "markov",
            PredictorId::Entropy => "entropy",
            PredictorId::ChiSquare => "chi_square",
            PredictorId::MonteCarlo => "monte_carlo",
            PredictorId::Arima => "arima",
            PredictorId::Hmm => "hmm",
            PredictorId::RngSeed => "rng_seed",
        }
    }
}

impl fmt::Display for PredictorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the coordinator treats a predictor's output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictorRole {
    /// Casts a weighted vote
    Voter,
    /// Reported in the breakdown but never votes
    Diagnostic,
}

/// A single predictor's guess, as captured for feedback
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRecord {
    pub predictor: PredictorId,
    pub predicted: Option<Symbol>,
    pub raw_confidence: f64,
    pub context: Vec<Symbol>,
    pub timestamp: DateTime<Utc>,
}

/// Deterministic generator families the seed matcher knows about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorFamily {
    Lcg,
    XorShift,
    MiddleSquareWeyl,
}

/// A seed that reproduces the observed sequence closely
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedMatch {
    pub family: GeneratorFamily,
    pub seed: u64,
    pub similarity: f64,
    /// The generator's next output after the observed sequence
    pub next_symbol: Symbol,
}

/// What happened to one predictor during a cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "reason")]
pub enum VoteStatus {
    /// Counted in the vote
    Voted,
    /// Produced a prediction below the confidence threshold
    BelowThreshold,
    /// Not enough data, or no opinion
    Abstained,
    /// Failed; excluded from this cycle
    Faulted(String),
    /// Diagnostic output only
    Diagnostic,
}

/// Per-predictor line in an ensemble result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelBreakdown {
    pub predictor: PredictorId,
    pub prediction: Option<Symbol>,
    pub raw_confidence: f64,
    pub calibrated_confidence: f64,
    pub weight: f64,
    pub status: VoteStatus,
    pub message: Option<String>,
    pub detail: serde_json::Value,
}

/// Why an ensemble result carries no symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum NullReason {
    UnderQuorum { qualifying: usize, required: usize },
    NoPredictors,
}

/// Final output of one prediction cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleResult {
    pub symbol: Option<Symbol>,
    pub confidence: f64,
    /// Fraction of voters agreeing with the winner
    pub consensus: f64,
    pub correction_applied: bool,
    /// The pre-correction symbol when a correction was applied
    pub corrected_from: Option<Symbol>,
    pub null_reason: Option<NullReason>,
    pub deterministic_source: Option<SeedMatch>,
    pub breakdown: Vec<ModelBreakdown>,
}

impl EnsembleResult {
    pub fn null(reason: NullReason, breakdown: Vec<ModelBreakdown>) -> Self {
        Self {
            symbol: None,
            confidence: 0.0,
            consensus: 0.0,
            correction_applied: false,
            corrected_from: None,
            null_reason: Some(reason),
            deterministic_source: None,
            breakdown,
        }
    }

    pub fn voters(&self) -> usize {
        self.breakdown
            .iter()
            .filter(|b| b.status == VoteStatus::Voted)
            .count()
    }
}

/// Clamp into the reportable confidence range
pub fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, MAX_CONFIDENCE)
}
