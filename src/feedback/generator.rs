//! Symbol sources for simulation runs

use crate::predictors::GeneratorState;
use crate::types::{GeneratorFamily, Symbol, ALPHABET_SIZE};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GenerationMode {
    /// Independent uniform draws
    Uniform,
    /// Repeats `0, 1, .., period-1`, replaced by a uniform draw with probability `noise`
    Cycle { period: usize, noise: f64 },
    /// Output of a known deterministic generator
    Deterministic { family: GeneratorFamily, seed: u64 },
}

pub struct SymbolGenerator {
    mode: GenerationMode,
    rng: StdRng,
    position: usize,
    deterministic: Option<GeneratorState>,
}

impl SymbolGenerator {
    pub fn new(mode: GenerationMode, seed: u64) -> Self {
        let deterministic = match mode {
            GenerationMode::Deterministic { family, seed } => Some(GeneratorState::seeded(family, seed)),
            _ => None,
        };
        Self {
            mode,
            rng: StdRng::seed_from_u64(seed),
            position: 0,
            deterministic,
        }
    }

    pub fn next_symbol(&mut self) -> Symbol {
        let symbol = match (self.mode, self.deterministic.as_mut()) {
            (_, Some(state)) => state.next_symbol(),
            (GenerationMode::Cycle { period, noise }, None) => {
                if self.rng.random_bool(noise.clamp(0.0, 1.0)) {
                    Symbol::from_index(self.rng.random_range(0..ALPHABET_SIZE))
                } else {
                    Symbol::from_index(self.position % period.clamp(1, ALPHABET_SIZE))
                }
            }
            _ => Symbol::from_index(self.rng.random_range(0..ALPHABET_SIZE)),
        };
        self.position += 1;
        symbol
    }

    pub fn take(&mut self, count: usize) -> Vec<Symbol> {
        (0..count).map(|_| self.next_symbol()).collect()
    }
}
