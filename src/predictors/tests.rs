//! Tests for the predictor suite

use super::*;
use crate::config::{
    ArimaConfig, ChiSquareConfig, EntropyConfig, HmmConfig, MarkovConfig, MonteCarloConfig,
    RngSeedConfig,
};
use crate::types::{symbols_from_raw, GeneratorFamily};

fn seq(values: &[i64]) -> Vec<Symbol> {
    symbols_from_raw(values).unwrap()
}

fn cycle(period: i64, len: usize) -> Vec<Symbol> {
    let raw: Vec<i64> = (0..len as i64).map(|i| i % period).collect();
    seq(&raw)
}

#[test]
fn test_every_predictor_is_null_on_short_input() {
    let table = PredictorTable::from_config(&PredictorsConfig::default());
    let short = seq(&[1]);

    for predictor in table.enabled() {
        let analysis = predictor.analyze(&short).unwrap();
        assert_eq!(analysis.prediction, None, "{}", predictor.id());
        assert_eq!(analysis.confidence, 0.25, "{}", predictor.id());
    }
}

#[test]
fn test_table_set_enabled() {
    let mut table = PredictorTable::from_config(&PredictorsConfig::default());
    assert_eq!(table.enabled().count(), PredictorId::COUNT);

    table.set_enabled(PredictorId::Hmm, false);
    assert!(!table.is_enabled(PredictorId::Hmm));
    assert_eq!(table.enabled().count(), PredictorId::COUNT - 1);
    assert!(table.enabled().all(|p| p.id() != PredictorId::Hmm));
    assert_eq!(table.get(PredictorId::Hmm).id(), PredictorId::Hmm);
}

#[test]
fn test_markov_rows_are_distributions() {
    let markov = MarkovPredictor::new(MarkovConfig::default());
    let matrix = markov.transition_matrix(&seq(&[0, 1, 1, 2, 0, 1, 2, 2, 1, 0, 0, 1]));

    for row in matrix {
        let total: f64 = row.iter().sum();
        assert!((total - 1.0).abs() < 1e-9 || total == 0.0, "row sums to {total}");
    }
    // 3 never appears
    assert_eq!(matrix[3], [0.0; 4]);
}

#[test]
fn test_markov_alternating() {
    let markov = MarkovPredictor::new(MarkovConfig::default());
    let analysis = markov.analyze(&seq(&[0, 1, 0, 1, 0, 1])).unwrap();

    assert_eq!(analysis.prediction, Some(Symbol::from_index(0)));
    assert_eq!(analysis.confidence, 0.95);
}

#[test]
fn test_markov_recent_transitions_dominate() {
    let config = MarkovConfig {
        decay_factor: 0.5,
        ..MarkovConfig::default()
    };
    let markov = MarkovPredictor::new(config);
    // early history says 0 → 1, the latest transition says 0 → 2
    let analysis = markov.analyze(&seq(&[0, 1, 0, 1, 0, 1, 0, 2, 0])).unwrap();

    assert_eq!(analysis.prediction, Some(Symbol::from_index(2)));
}

#[test]
fn test_markov_unseen_last_symbol() {
    let markov = MarkovPredictor::new(MarkovConfig::default());
    let analysis = markov.analyze(&seq(&[0, 1, 0, 3])).unwrap();

    assert_eq!(analysis.prediction, None);
    assert_eq!(analysis.confidence, 0.25);
}

#[test]
fn test_entropy_periodic_sequence() {
    let entropy = EntropyPredictor::new(EntropyConfig::default());
    let analysis = entropy.analyze(&cycle(4, 20)).unwrap();

    assert_eq!(analysis.prediction, Some(Symbol::from_index(0)));
    assert_eq!(analysis.confidence, 0.95);
    assert_eq!(analysis.detail["pattern_len"], 4);
}

#[test]
fn test_entropy_balanced_window_still_predicts() {
    let entropy = EntropyPredictor::new(EntropyConfig::default());
    let analysis = entropy.analyze(&cycle(4, 40)).unwrap();

    // near-uniform symbol counts: close to 2 bits, above the 1.5 bit threshold
    let symbol_entropy = analysis.detail["symbol_entropy"].as_f64().unwrap();
    assert!(symbol_entropy > 1.9);
    // the continuation of the matched pattern is certain, so nothing is scaled away
    assert_eq!(analysis.detail["continuation_entropy"], 0.0);
    assert_eq!(analysis.prediction, Some(Symbol::from_index(0)));
    assert_eq!(analysis.confidence, 0.95);
}

#[test]
fn test_pattern_entropy() {
    // single repeated symbol: one distinct window
    assert_eq!(EntropyPredictor::pattern_entropy(&seq(&[2, 2, 2, 2, 2]), 2), 0.0);
    // four equally frequent windows: 2 bits
    let h = EntropyPredictor::pattern_entropy(&cycle(4, 8), 1);
    assert!((h - 2.0).abs() < 1e-9);
}

#[test]
fn test_chi_square_picks_underrepresented_symbol() {
    let chi = ChiSquarePredictor::new(ChiSquareConfig::default());
    let sequence = cycle(3, 20);
    let analysis = chi.analyze(&sequence).unwrap();

    assert_eq!(analysis.prediction, Some(Symbol::from_index(3)));
    // χ² = 6.8 → 1 - e^-0.68
    let expected = 1.0 - (-0.68f64).exp();
    assert!((analysis.confidence - expected).abs() < 1e-9);
}

#[test]
fn test_chi_square_confidence_bounds() {
    assert_eq!(ChiSquarePredictor::confidence_for(0.0), 0.25);
    assert_eq!(ChiSquarePredictor::confidence_for(1000.0), 0.95);
}

#[test]
fn test_chi_square_observe_shifts_expected() {
    let mut chi = ChiSquarePredictor::new(ChiSquareConfig::default());
    let sequence = cycle(3, 20);
    let before = chi.analyze(&sequence).unwrap();

    chi.observe(&sequence, Symbol::from_index(0));
    let expected = chi.expected();
    assert!((expected.iter().sum::<f64>() - 1.0).abs() < 1e-9);
    assert!((expected[3] - 0.225).abs() < 1e-9);
    assert!(expected[0] > 0.25);

    // 3 is now expected less often, so its absence is less surprising
    let after = chi.analyze(&sequence).unwrap();
    assert!(after.confidence < before.confidence);
}

#[test]
fn test_chi_square_analyze_is_pure() {
    let chi = ChiSquarePredictor::new(ChiSquareConfig::default());
    let sequence = cycle(3, 30);
    let first = chi.analyze(&sequence).unwrap();
    let second = chi.analyze(&sequence).unwrap();
    assert_eq!(first, second);
    assert_eq!(chi.expected(), [0.25; 4]);
}

#[test]
fn test_monte_carlo_trailing_pattern() {
    let mc = MonteCarloPredictor::new(MonteCarloConfig::default());
    let analysis = mc.analyze(&seq(&[0, 1, 2, 0, 1, 2, 0, 1])).unwrap();

    assert_eq!(analysis.prediction, Some(Symbol::from_index(2)));
    assert_eq!(analysis.confidence, 0.95);
}

#[test]
fn test_monte_carlo_is_deterministic() {
    let mc = MonteCarloPredictor::new(MonteCarloConfig::default());
    let sequence = seq(&[3, 1, 0, 2, 2, 1, 3, 0, 0, 1, 2, 3, 1, 1, 0, 2, 3]);

    let first = mc.analyze(&sequence).unwrap();
    let second = mc.analyze(&sequence).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_monte_carlo_prunes_rare_continuations() {
    let mc = MonteCarloPredictor::new(MonteCarloConfig::default());
    // (0,1,2) → 3 three times, → 0 once
    let sequence = seq(&[0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 3, 0, 1, 2, 0]);
    let table = mc.pattern_table(&sequence);

    let histogram = table.values().find(|h| h[3] == 3).copied().unwrap();
    assert_eq!(histogram, [0, 0, 0, 3]);
}

#[test]
fn test_yule_walker_ar2() {
    let phi = arima::yule_walker(&[1.0, 0.5, 0.25], 2).unwrap();
    assert!((phi[0] - 0.5).abs() < 1e-12);
    assert!(phi[1].abs() < 1e-12);
}

#[test]
fn test_yule_walker_degenerate_falls_back_to_ar1() {
    let phi = arima::yule_walker(&[1.0, 1.0, 1.0], 2).unwrap();
    assert_eq!(phi, vec![1.0, 0.0]);
}

#[test]
fn test_yule_walker_higher_order() {
    let phi = arima::yule_walker(&[1.0, 0.0, 0.0, 0.0], 3).unwrap();
    assert_eq!(phi, vec![0.0, 0.0, 0.0]);
}

#[test]
fn test_gaussian_elimination() {
    let x = arima::gaussian_elimination(vec![vec![2.0, 1.0], vec![1.0, 3.0]], vec![3.0, 5.0]).unwrap();
    assert!((x[0] - 0.8).abs() < 1e-12);
    assert!((x[1] - 1.4).abs() < 1e-12);
}

#[test]
fn test_gaussian_elimination_singular() {
    let result = arima::gaussian_elimination(vec![vec![1.0, 2.0], vec![2.0, 4.0]], vec![1.0, 2.0]);
    assert!(result.is_err());
}

#[test]
fn test_arima_constant_sequence_is_drift() {
    let arima = ArimaPredictor::new(ArimaConfig::default());
    let analysis = arima.analyze(&seq(&[1; 12])).unwrap();

    assert_eq!(analysis.prediction, Some(Symbol::from_index(1)));
    assert_eq!(analysis.confidence, 0.95);
    assert_eq!(analysis.detail["degenerate"], true);
}

#[test]
fn test_arima_forecast_stays_in_alphabet() {
    let arima = ArimaPredictor::new(ArimaConfig::default());
    let analysis = arima
        .analyze(&seq(&[0, 3, 1, 2, 2, 0, 3, 3, 1, 0, 2, 1, 3, 0]))
        .unwrap();

    assert!(analysis.prediction.is_some());
    assert!((0.25..=0.95).contains(&analysis.confidence));
}

#[test]
fn test_hmm_needs_long_history() {
    let hmm = HmmPredictor::new(HmmConfig::default());
    let analysis = hmm.analyze(&cycle(4, 199)).unwrap();
    assert_eq!(analysis.prediction, None);
    assert_eq!(analysis.confidence, 0.25);
}

#[test]
fn test_hmm_confidence_is_modest() {
    let hmm = HmmPredictor::new(HmmConfig::default());
    let analysis = hmm.analyze(&cycle(4, 250)).unwrap();

    // last symbol is 1, always followed by 2
    assert_eq!(analysis.prediction, Some(Symbol::from_index(2)));
    assert!((analysis.confidence - 0.48).abs() < 1e-9);
    assert!(hmm.length_confidence(1_000_000) <= 0.8);
}

#[test]
fn test_hmm_can_vote_within_history_tail() {
    let config = crate::config::Config::default();
    let hmm = HmmPredictor::new(config.predictors.hmm.clone());

    // the batch loop never hands over more than history_tail symbols
    let confidence = hmm.length_confidence(config.batch.history_tail);
    assert!((confidence - 0.64).abs() < 1e-9);
    assert!(confidence >= config.ensemble.min_confidence);
    assert!(hmm.length_confidence(hmm.min_length()) < config.ensemble.min_confidence);
}

#[test]
fn test_generators_are_reproducible() {
    for family in rng_seed::FAMILIES {
        assert_eq!(generate(family, 77, 32), generate(family, 77, 32));
    }
    assert_ne!(
        generate(GeneratorFamily::Lcg, 1, 32),
        generate(GeneratorFamily::Lcg, 2, 32)
    );
}

#[test]
fn test_rng_seed_detects_lcg() {
    let predictor = RngSeedPredictor::new(RngSeedConfig::default());
    let stream = generate(GeneratorFamily::Lcg, 1234, 65);
    let analysis = predictor.analyze(&stream[..64]).unwrap();

    let found = analysis.seed_match.unwrap();
    assert_eq!(found.family, GeneratorFamily::Lcg);
    assert_eq!(found.seed, 1234);
    assert_eq!(found.similarity, 1.0);
    assert_eq!(found.next_symbol, stream[64]);
    assert_eq!(analysis.prediction, Some(stream[64]));
    assert_eq!(predictor.role(), PredictorRole::Diagnostic);
}

#[test]
fn test_rng_seed_ignores_structured_sequence() {
    let predictor = RngSeedPredictor::new(RngSeedConfig::default());
    let analysis = predictor.analyze(&cycle(4, 64)).unwrap();

    assert!(analysis.seed_match.is_none());
    assert_eq!(analysis.prediction, None);
}

#[test]
fn test_shannon_entropy() {
    assert_eq!(shannon_entropy([4.0, 0.0, 0.0, 0.0]), 0.0);
    assert!((shannon_entropy([1.0, 1.0, 1.0, 1.0]) - 2.0).abs() < 1e-12);
    assert_eq!(argmax_first(&[0.2, 0.5, 0.5]), Some((1, 0.5)));
}
