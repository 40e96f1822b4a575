//! Brute-force seed search against known deterministic generators
//!
//! Answers "is this sequence secretly a PRNG?" rather than "what comes next".
//! The coordinator reports the result but never counts it as a vote.
//!
//! All generator arithmetic is fixed-width with explicit wraparound.

use super::{Analysis, Predictor};
use crate::config::RngSeedConfig;
use crate::error::Result;
use crate::types::{
    GeneratorFamily, PredictorId, PredictorRole, SeedMatch, Symbol, ALPHABET_SIZE,
};
use serde_json::json;

const LCG_MULTIPLIER: u32 = 1_103_515_245;
const LCG_INCREMENT: u32 = 12_345;
const LCG_MASK: u32 = 0x7fff_ffff;
const XORSHIFT_SALT: u32 = 0x2545_f491;
const WEYL_STEP: u64 = 0xb5ad_4ece_da1c_e2a9;

pub const FAMILIES: [GeneratorFamily; 3] = [
    GeneratorFamily::Lcg,
    GeneratorFamily::XorShift,
    GeneratorFamily::MiddleSquareWeyl,
];

/// Running state of one generator instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Lcg(u32),
    XorShift(u32),
    MiddleSquareWeyl { x: u64, w: u64 },
}

impl GeneratorState {
    pub fn seeded(family: GeneratorFamily, seed: u64) -> Self {
        match family {
            GeneratorFamily::Lcg => GeneratorState::Lcg(seed as u32 & LCG_MASK),
            GeneratorFamily::XorShift => {
                // xorshift is stuck at zero forever
                let state = (seed as u32) ^ XORSHIFT_SALT;
                GeneratorState::XorShift(if state == 0 { 1 } else { state })
            }
            GeneratorFamily::MiddleSquareWeyl => GeneratorState::MiddleSquareWeyl { x: seed, w: 0 },
        }
    }

    pub fn next_symbol(&mut self) -> Symbol {
        let raw = match self {
            GeneratorState::Lcg(state) => {
                *state = state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT) & LCG_MASK;
                *state >> 16
            }
            GeneratorState::XorShift(state) => {
                let mut x = *state;
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                *state = x;
                x
            }
            GeneratorState::MiddleSquareWeyl { x, w } => {
                *x = x.wrapping_mul(*x);
                *w = w.wrapping_add(WEYL_STEP);
                *x = x.wrapping_add(*w);
                *x = x.rotate_left(32);
                *x as u32
            }
        };
        Symbol::from_index(raw as usize % ALPHABET_SIZE)
    }
}

/// The first `len` symbols a seeded generator produces
pub fn generate(family: GeneratorFamily, seed: u64, len: usize) -> Vec<Symbol> {
    let mut state = GeneratorState::seeded(family, seed);
    (0..len).map(|_| state.next_symbol()).collect()
}

pub struct RngSeedPredictor {
    config: RngSeedConfig,
}

impl RngSeedPredictor {
    pub fn new(config: RngSeedConfig) -> Self {
        Self { config }
    }

    /// Every (family, seed) whose output matches the sequence above threshold
    pub fn search(&self, sequence: &[Symbol]) -> Vec<SeedMatch> {
        let prefix_len = sequence.len().min(self.config.max_compare);
        if prefix_len == 0 {
            return Vec::new();
        }
        let required = (self.config.similarity_threshold * prefix_len as f64).ceil() as usize;
        let allowed_misses = prefix_len.saturating_sub(required);

        let mut matches = Vec::new();
        for family in FAMILIES {
            for seed in 0..self.config.seed_range {
                if !prefix_matches(family, seed, &sequence[..prefix_len], allowed_misses) {
                    continue;
                }
                if let Some(found) = self.full_match(family, seed, sequence) {
                    matches.push(found);
                }
            }
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(self.config.max_candidates);
        matches
    }

    fn full_match(&self, family: GeneratorFamily, seed: u64, sequence: &[Symbol]) -> Option<SeedMatch> {
        let mut state = GeneratorState::seeded(family, seed);
        let hits = sequence
            .iter()
            .filter(|s| state.next_symbol() == **s)
            .count();
        let similarity = hits as f64 / sequence.len() as f64;
        if similarity < self.config.similarity_threshold {
            return None;
        }
        Some(SeedMatch {
            family,
            seed,
            similarity,
            next_symbol: state.next_symbol(),
        })
    }
}

fn prefix_matches(family: GeneratorFamily, seed: u64, prefix: &[Symbol], allowed_misses: usize) -> bool {
    let mut state = GeneratorState::seeded(family, seed);
    let mut misses = 0;
    for s in prefix {
        if state.next_symbol() != *s {
            misses += 1;
            if misses > allowed_misses {
                return false;
            }
        }
    }
    true
}

impl Predictor for RngSeedPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::RngSeed
    }

    fn min_length(&self) -> usize {
        self.config.min_length.max(1)
    }

    fn role(&self) -> PredictorRole {
        PredictorRole::Diagnostic
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let candidates = self.search(sequence);
        let detail = json!({
            "candidates": candidates,
            "seed_range": self.config.seed_range,
        });

        match candidates.first().cloned() {
            Some(best) => {
                let mut analysis = Analysis::predict(best.next_symbol, best.similarity, detail);
                analysis.seed_match = Some(best);
                Ok(analysis)
            }
            None => Ok(Analysis::no_opinion("no deterministic generator matched", detail)),
        }
    }
}
