//! Simplified ARIMA(p, 1, 0)
//!
//! First-order differencing, AR coefficients from the Yule–Walker equations,
//! then the forecast is re-integrated and folded back into the alphabet.

use super::{Analysis, Predictor};
use crate::config::ArimaConfig;
use crate::error::{EnsembleError, Result};
use crate::types::{PredictorId, Symbol, ALPHABET_SIZE};
use serde_json::json;

const EPSILON: f64 = 1e-10;

pub struct ArimaPredictor {
    config: ArimaConfig,
}

impl ArimaPredictor {
    pub fn new(config: ArimaConfig) -> Self {
        Self { config }
    }
}

impl Predictor for ArimaPredictor {
    fn id(&self) -> PredictorId {
        PredictorId::Arima
    }

    fn min_length(&self) -> usize {
        // p + 2 differenced values at the very least
        self.config.min_length.max(self.config.ar_order + 3)
    }

    fn analyze(&self, sequence: &[Symbol]) -> Result<Analysis> {
        if sequence.len() < self.min_length() {
            return Ok(Analysis::insufficient(sequence.len(), self.min_length()));
        }

        let p = self.config.ar_order;
        let diffs = difference(sequence);
        let n = diffs.len();
        let mean = diffs.iter().sum::<f64>() / n as f64;
        let acov = autocovariance(&diffs, mean, p);
        let last = sequence[sequence.len() - 1].value() as f64;

        // constant differences: the series is a pure drift
        if acov[0] < EPSILON {
            let forecast = last + mean;
            return Ok(Analysis::predict(
                fold(forecast),
                0.95,
                json!({ "drift": mean, "forecast": forecast, "degenerate": true }),
            ));
        }

        let phi = yule_walker(&acov, p).map_err(|reason| EnsembleError::fault(self.id(), reason))?;

        let mut next_diff = mean;
        for (i, coef) in phi.iter().enumerate() {
            next_diff += coef * (diffs[n - 1 - i] - mean);
        }
        let forecast = last + next_diff;
        if !forecast.is_finite() {
            return Err(EnsembleError::fault(self.id(), "non-finite forecast"));
        }

        let lag1 = acov[1] / acov[0];
        Ok(Analysis::predict(
            fold(forecast),
            lag1.abs().clamp(0.25, 0.95),
            json!({
                "coefficients": phi,
                "lag1_autocorrelation": lag1,
                "forecast": forecast,
            }),
        ))
    }
}

pub fn difference(sequence: &[Symbol]) -> Vec<f64> {
    sequence
        .windows(2)
        .map(|w| w[1].value() as f64 - w[0].value() as f64)
        .collect()
}

/// Autocovariances γ(0..=max_lag) of a series around `mean`
pub fn autocovariance(series: &[f64], mean: f64, max_lag: usize) -> Vec<f64> {
    let n = series.len() as f64;
    (0..=max_lag)
        .map(|lag| {
            if lag >= series.len() {
                return 0.0;
            }
            series
                .iter()
                .zip(series.iter().skip(lag))
                .map(|(a, b)| (a - mean) * (b - mean))
                .sum::<f64>()
                / n
        })
        .collect()
}

/// Solves the Yule–Walker system for AR(p) coefficients
pub fn yule_walker(acov: &[f64], p: usize) -> std::result::Result<Vec<f64>, String> {
    if acov.len() < p + 1 {
        return Err(format!("need {} autocovariances, have {}", p + 1, acov.len()));
    }

    match p {
        0 => Ok(Vec::new()),
        1 => Ok(vec![acov[1] / acov[0]]),
        2 => {
            let (r0, r1, r2) = (acov[0], acov[1], acov[2]);
            let det = r0 * r0 - r1 * r1;
            if det.abs() < EPSILON {
                // perfectly correlated lags: AR(2) is unidentifiable, use AR(1)
                return Ok(vec![r1 / r0, 0.0]);
            }
            Ok(vec![(r0 * r1 - r1 * r2) / det, (r0 * r2 - r1 * r1) / det])
        }
        _ => {
            let matrix: Vec<Vec<f64>> = (0..p)
                .map(|i| (0..p).map(|j| acov[i.abs_diff(j)]).collect())
                .collect();
            let rhs: Vec<f64> = acov[1..=p].to_vec();
            gaussian_elimination(matrix, rhs)
        }
    }
}

/// Gaussian elimination with partial pivoting
pub fn gaussian_elimination(
    mut a: Vec<Vec<f64>>,
    mut b: Vec<f64>,
) -> std::result::Result<Vec<f64>, String> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < EPSILON {
            return Err(format!("singular matrix at column {col}"));
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        let pivot_row = a[col].clone();
        let pivot_rhs = b[col];
        for row in col + 1..n {
            let factor = a[row][col] / pivot_row[col];
            for k in col..n {
                a[row][k] -= factor * pivot_row[k];
            }
            b[row] -= factor * pivot_rhs;
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

fn fold(forecast: f64) -> Symbol {
    let rounded = forecast.round() as i64;
    Symbol::from_index(rounded.rem_euclid(ALPHABET_SIZE as i64) as usize)
}
