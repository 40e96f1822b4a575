//! Sequence Ensemble
//!
//! Adaptive multi-model prediction of the next symbol in a `{0,1,2,3}` stream.
//!
//! ## Architecture
//!
//! ```text
//! Batch → Store → Predictors (Markov/Entropy/Chi²/MC/ARIMA/HMM) → Vote → Corrector → Event
//!                      ↑                                  ↑           ↑
//!                      └──────── record_outcome ──── Tracker → Weights ┘
//!                                                     RNG seed matcher (diagnostic)
//! ```

pub mod config;
pub mod ensemble;
pub mod error;
pub mod feedback;
pub mod predictors;
pub mod types;
