//! Monte Carlo pattern simulation
//!
//! Indexes every length-`pattern_len` subsequence with a histogram of the
//! symbol that followed it, then simulates the continuation of the current
//! trailing pattern. The simulation RNG is seeded from the sequence itself so
//! the same input always produces the same answer.

use super::{argmax_first, Analysis, Predictor};
use crate::config::MonteCarloConfig;
use crate::error::Result;
use crate::types::{PredictorId, Symbol, ALPHABET_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::collections::HashMap;

pub type Histogram = [u32; ALPHABET_SIZE];

pub struct MonteCarloPredictor {
    config: MonteCarloConfig,
}

impl MonteCarloPredictor {
    pub fn new(config: MonteCarloConfig) -> Self {
        Self { config }
    }

    /// Pattern (base-4 encoded) → next-symbol histogram
    pub fn pattern_table(&self, sequence: &[Symbol]) -> HashMap<u64, Histogram> {
        let len = self.config.pattern_len;
        let mut table: HashMap<u64, Histogram> = HashMap::new();
        if sequence.len() <= len {
            return table;
        }

        for w in sequence.windows(len + 1) {
            let key = encode(&w[..len]);
            table.entry(key).or_insert([0; ALPHABET_SIZE])[w[len].index()] += 1;
        }

        for histogram in table.values_mut() {
            prune(histogram, self.config.min_occurrences);
        }
        table
    }
}

impl Predictor for MonteCarloPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::MonteCarlo
    }

    fn min_length(&self) -> usize {
        self.config.min_length.max(self.config.pattern_len + 1)
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let table = self.pattern_table(sequence);
        let pattern = &sequence[sequence.len() - self.config.pattern_len..];
        let histogram = table
            .get(&encode(pattern))
            .copied()
            .filter(|h| h.iter().any(|c| *c > 0));

        let mut rng = StdRng::seed_from_u64(sequence_seed(sequence));
        let mut tallies = [0.0; ALPHABET_SIZE];

        for _ in 0..self.config.simulations {
            let drawn = match &histogram {
                Some(h) => weighted_draw(h, &mut rng),
                None => rng.random_range(0..ALPHABET_SIZE),
            };
            tallies[drawn] += 1.0;
        }

        match argmax_first(&tallies) {
            Some((mode, hits)) => Ok(Analysis::predict(
                Symbol::from_index(mode),
                hits / self.config.simulations as f64,
                json!({
                    "pattern": pattern,
                    "histogram": histogram,
                    "tallies": tallies,
                    "patterns_indexed": table.len(),
                }),
            )),
            None => Ok(Analysis::no_opinion("no simulations run", json!({}))),
        }
    }
}

fn encode(pattern: &[Symbol]) -> u64 {
    pattern
        .iter()
        .fold(0u64, |acc, s| acc.wrapping_mul(ALPHABET_SIZE as u64).wrapping_add(s.value() as u64))
}

/// Drops rare continuations, unless nothing would survive
fn prune(histogram: &mut Histogram, min_occurrences: u32) {
    let strongest = histogram.iter().copied().max().unwrap_or(0);
    if strongest < min_occurrences {
        return;
    }
    for count in histogram.iter_mut() {
        if *count < min_occurrences {
            *count = 0;
        }
    }
}

fn weighted_draw(histogram: &Histogram, rng: &mut StdRng) -> usize {
    let total: u32 = histogram.iter().sum();
    let mut pick = rng.random_range(0..total);
    for (i, count) in histogram.iter().enumerate() {
        if pick < *count {
            return i;
        }
        pick -= count;
    }
    ALPHABET_SIZE - 1
}

/// FNV-1a over the sequence
fn sequence_seed(sequence: &[Symbol]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for s in sequence {
        hash ^= s.value() as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash ^ sequence.len() as u64
}
