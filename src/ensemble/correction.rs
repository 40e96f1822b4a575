//! Context-keyed error correction
//!
//! Remembers what actually followed each (context, prediction) pair and,
//! when a low-confidence prediction has a history of being wrong in the same
//! context, swaps in the historically observed outcome.

use crate::config::CorrectorConfig;
use crate::types::{Symbol, ALPHABET_SIZE, CONTEXT_LEN, MAX_CONFIDENCE};
use std::collections::{HashMap, VecDeque};

pub type Context = [Symbol; CONTEXT_LEN];

#[derive(Debug, Clone, PartialEq)]
pub struct CorrectionEntry {
    pub context: Context,
    pub predicted: Symbol,
    pub actual: Symbol,
    pub confidence: f64,
}

/// Histogram of actual outcomes for one (context, predicted) key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatternStats {
    pub counts: [u32; ALPHABET_SIZE],
    confidence_sums: [f64; ALPHABET_SIZE],
}

impl PatternStats {
    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub fn average_confidence(&self, actual: Symbol) -> f64 {
        let count = self.counts[actual.index()];
        if count == 0 {
            0.0
        } else {
            self.confidence_sums[actual.index()] / count as f64
        }
    }
}

/// What the corrector decided for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Correction {
    pub symbol: Symbol,
    pub confidence: f64,
    pub applied: bool,
    pub original: Symbol,
}

impl Correction {
    fn unchanged(symbol: Symbol, confidence: f64) -> Self {
        Self {
            symbol,
            confidence,
            applied: false,
            original: symbol,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorCorrector {
    config: CorrectorConfig,
    history: VecDeque<CorrectionEntry>,
    patterns: HashMap<(Context, Symbol), PatternStats>,
}

impl ErrorCorrector {
    pub fn new(config: CorrectorConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_capacity),
            patterns: HashMap::new(),
            config,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn pattern(&self, context: &Context, predicted: Symbol) -> Option<&PatternStats> {
        self.patterns.get(&(*context, predicted))
    }

    pub fn record(&mut self, context: Context, predicted: Symbol, actual: Symbol, confidence: f64) {
        let stats = self.patterns.entry((context, predicted)).or_default();
        stats.counts[actual.index()] += 1;
        stats.confidence_sums[actual.index()] += confidence;

        self.history.push_back(CorrectionEntry {
            context,
            predicted,
            actual,
            confidence,
        });

        while self.history.len() > self.config.history_capacity {
            if let Some(evicted) = self.history.pop_front() {
                self.forget(&evicted);
            }
        }
    }

    fn forget(&mut self, entry: &CorrectionEntry) {
        let key = (entry.context, entry.predicted);
        if let Some(stats) = self.patterns.get_mut(&key) {
            let i = entry.actual.index();
            stats.counts[i] = stats.counts[i].saturating_sub(1);
            stats.confidence_sums[i] -= entry.confidence;
            if stats.counts[i] == 0 {
                stats.confidence_sums[i] = 0.0;
            }
            if stats.total() == 0 {
                self.patterns.remove(&key);
            }
        }
    }

    /// Entries recorded under `context`, whatever was predicted
    pub fn matching(&self, context: &Context) -> u32 {
        Symbol::ALL
            .iter()
            .filter_map(|p| self.pattern(context, *p))
            .map(PatternStats::total)
            .sum()
    }

    pub fn correct(&self, context: Option<&Context>, symbol: Symbol, confidence: f64) -> Correction {
        if confidence > self.config.trust_threshold {
            return Correction::unchanged(symbol, confidence);
        }
        let Some(context) = context else {
            return Correction::unchanged(symbol, confidence);
        };

        let matching = self.matching(context);
        if (matching as usize) < self.config.min_matches {
            return Correction::unchanged(symbol, confidence);
        }
        let Some(stats) = self.pattern(context, symbol) else {
            return Correction::unchanged(symbol, confidence);
        };

        // most frequent actual outcome for this prediction; first wins ties
        let mut best = 0;
        for i in 1..ALPHABET_SIZE {
            if stats.counts[i] > stats.counts[best] {
                best = i;
            }
        }
        let actual = Symbol::from_index(best);
        let coverage = stats.counts[best] as f64 / matching as f64;

        if actual == symbol || coverage <= self.config.min_coverage {
            return Correction::unchanged(symbol, confidence);
        }

        let blended = ((confidence + stats.average_confidence(actual)) / 2.0).min(MAX_CONFIDENCE);
        tracing::debug!(
            "Correcting {} -> {} (coverage {:.2}, {} matches)",
            symbol,
            actual,
            coverage,
            matching
        );
        Correction {
            symbol: actual,
            confidence: blended,
            applied: true,
            original: symbol,
        }
    }
}
