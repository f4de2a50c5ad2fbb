// =============================================================================
// (S)ARIMA Family — autoregressive forecasting with damped extrapolation
// =============================================================================
//
// ARIMA(p,d,q) and seasonal SARIMA(p,d,q)(P,D,Q,s). Training:
//
//   1. Difference d times, then seasonally D times at lag s.
//   2. Demean the stationary series.
//   3. AR coefficients from Yule-Walker, solved with the Levinson-Durbin
//      recursion on the autocorrelation function. A zero-variance step or a
//      negative updated variance falls back to a conservative default
//      (first coefficient 0.5, rest 0).
//   4. One-step residuals of the AR fit.
//   5. MA coefficients from residual autocorrelations at lags 1..q, clipped
//      to |c| <= 0.9.
//   6. Seasonal AR from the ACF at lags {0, s, 2s, .., Ps} via the same
//      Levinson step (fallback 0.3); seasonal MA from residual ACF at
//      seasonal lags, clipped to |c| <= 0.9.
//
// Prediction fuses the fitted components into the first step with a fixed
// 0.1 weight, then extrapolates with damping 1/(1+0.1t). Every step is
// saturated at min(max(pred, 0), last*2 + 100, 1e9).
// =============================================================================

use std::sync::Arc;

use anyhow::{bail, Result};
use parking_lot::RwLock;
use tracing::debug;

use crate::frame::FeatureFrame;
use crate::model::{forecast_steps, gaussian_quantiles, Forecast, ModelError};

/// Hard ceiling on any single prediction.
const PREDICTION_CEILING: f64 = 1e9;

/// Minimum training rows for a non-seasonal fit.
const MIN_NON_SEASONAL_ROWS: usize = 20;

// =============================================================================
// Parameters
// =============================================================================

/// Model orders. Seasonal orders of zero with `season_length` zero mean a
/// plain ARIMA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArimaParams {
    pub p: usize,
    pub d: usize,
    pub q: usize,
    pub seasonal_p: usize,
    pub seasonal_d: usize,
    pub seasonal_q: usize,
    pub season_length: usize,
}

impl ArimaParams {
    pub fn non_seasonal(p: usize, d: usize, q: usize) -> Self {
        Self {
            p,
            d,
            q,
            seasonal_p: 0,
            seasonal_d: 0,
            seasonal_q: 0,
            season_length: 0,
        }
    }

    fn is_seasonal(&self) -> bool {
        self.seasonal_p > 0 || self.seasonal_d > 0 || self.seasonal_q > 0
    }
}

/// Immutable coefficient bundle published by `train`.
struct Bundle {
    ar: Vec<f64>,
    ma: Vec<f64>,
    seasonal_ar: Vec<f64>,
    seasonal_ma: Vec<f64>,
    /// Last max(p, s*P) raw (undifferenced) values.
    recent_values: Vec<f64>,
    /// Last max(q, s*Q) one-step residuals.
    recent_residuals: Vec<f64>,
    residual_std: f64,
}

// =============================================================================
// ArimaModel
// =============================================================================

pub struct ArimaModel {
    metric: String,
    horizon_seconds: i64,
    step_seconds: i64,
    params: ArimaParams,
    state: RwLock<Option<Arc<Bundle>>>,
}

impl ArimaModel {
    /// Validate orders and build the model.
    ///
    /// Auto-defaults: a zero among p, d, q promotes all three to 1.
    pub fn new(
        metric: &str,
        horizon_seconds: i64,
        step_seconds: i64,
        mut params: ArimaParams,
    ) -> Result<Self> {
        if params.p == 0 || params.d == 0 || params.q == 0 {
            params.p = 1;
            params.d = 1;
            params.q = 1;
        }

        if params.d > 2 {
            bail!("ARIMA differencing order d={} out of range [0, 2]", params.d);
        }
        if params.seasonal_d > 1 {
            bail!(
                "seasonal differencing order D={} out of range [0, 1]",
                params.seasonal_d
            );
        }
        if params.is_seasonal() && params.season_length == 0 {
            bail!("seasonal orders require a season length s > 0");
        }

        Ok(Self {
            metric: metric.to_string(),
            horizon_seconds,
            step_seconds,
            params,
            state: RwLock::new(None),
        })
    }

    pub fn name(&self) -> &'static str {
        if self.params.is_seasonal() {
            "sarima"
        } else {
            "arima"
        }
    }

    /// Fewest rows a training window must carry for these orders.
    fn min_training_rows(&self) -> usize {
        let p = &self.params;
        let s = p.season_length;
        let mut min = (p.p + p.d).max(p.q + p.d);
        if p.is_seasonal() {
            min = min
                .max(s * p.seasonal_p + s * p.seasonal_d)
                .max(s * p.seasonal_q + s * p.seasonal_d)
                .max(2 * s);
        } else {
            min = min.max(MIN_NON_SEASONAL_ROWS);
        }
        min
    }

    /// Fit coefficients and publish a fresh bundle.
    pub fn train(&self, features: &FeatureFrame) -> Result<(), ModelError> {
        let values = features.values();
        let required = self.min_training_rows();
        if values.len() < required {
            return Err(ModelError::InsufficientData {
                required,
                actual: values.len(),
            });
        }

        let p = self.params;
        let s = p.season_length;

        // Differencing to a stationary series.
        let mut series = values.clone();
        for _ in 0..p.d {
            series = difference(&series, 1);
        }
        for _ in 0..p.seasonal_d {
            series = difference(&series, s);
        }
        if series.len() < 2 {
            return Err(ModelError::InsufficientData {
                required,
                actual: values.len(),
            });
        }

        let mean = series.iter().sum::<f64>() / series.len() as f64;
        let centered: Vec<f64> = series.iter().map(|x| x - mean).collect();

        let max_lag = p
            .p
            .max(p.q)
            .max(s * p.seasonal_p)
            .max(s * p.seasonal_q)
            .max(1);
        let acf = autocorrelation(&centered, max_lag);

        // AR via Yule-Walker / Levinson-Durbin, conservative on failure.
        let ar = acf
            .as_ref()
            .and_then(|a| levinson_durbin(&a[..=p.p], p.p))
            .unwrap_or_else(|| conservative_coeffs(p.p, 0.5));

        // One-step residuals of the AR fit.
        let mut residuals = Vec::new();
        for t in p.p..centered.len() {
            let mut fitted = 0.0;
            for (i, &coef) in ar.iter().enumerate() {
                fitted += coef * centered[t - 1 - i];
            }
            residuals.push(centered[t] - fitted);
        }

        // MA from residual autocorrelations, clipped.
        let resid_acf = autocorrelation(&residuals, p.q.max(s * p.seasonal_q).max(1));
        let ma: Vec<f64> = (1..=p.q)
            .map(|k| {
                resid_acf
                    .as_ref()
                    .and_then(|a| a.get(k).copied())
                    .unwrap_or(0.0)
                    .clamp(-0.9, 0.9)
            })
            .collect();

        // Seasonal AR from the ACF at multiples of the season length.
        let seasonal_ar = if p.seasonal_p > 0 {
            acf.as_ref()
                .and_then(|a| {
                    let lag_acf: Option<Vec<f64>> =
                        (0..=p.seasonal_p).map(|j| a.get(j * s).copied()).collect();
                    levinson_durbin(&lag_acf?, p.seasonal_p)
                })
                .unwrap_or_else(|| conservative_coeffs(p.seasonal_p, 0.3))
        } else {
            Vec::new()
        };

        // Seasonal MA from residual ACF at seasonal lags, clipped.
        let seasonal_ma: Vec<f64> = (1..=p.seasonal_q)
            .map(|j| {
                resid_acf
                    .as_ref()
                    .and_then(|a| a.get(j * s).copied())
                    .unwrap_or(0.0)
                    .clamp(-0.9, 0.9)
            })
            .collect();

        let keep_values = p.p.max(s * p.seasonal_p).max(1);
        let keep_residuals = p.q.max(s * p.seasonal_q).max(1);
        let recent_values = values[values.len().saturating_sub(keep_values)..].to_vec();
        let recent_residuals =
            residuals[residuals.len().saturating_sub(keep_residuals)..].to_vec();

        let residual_std = sample_std_dev(&residuals);

        debug!(
            metric = %self.metric,
            model = self.name(),
            rows = values.len(),
            ar = ?ar,
            ma = ?ma,
            residual_std = format!("{residual_std:.4}"),
            "ARIMA trained"
        );

        *self.state.write() = Some(Arc::new(Bundle {
            ar,
            ma,
            seasonal_ar,
            seasonal_ma,
            recent_values,
            recent_residuals,
            residual_std,
        }));
        Ok(())
    }

    /// Forecast forward from the retained state. The feature window itself
    /// is not consulted; repeated predicts between trains are identical.
    pub fn predict(&self, _features: &FeatureFrame) -> Result<Forecast, ModelError> {
        let bundle = self.state.read().clone().ok_or(ModelError::NotTrained)?;

        let rv = &bundle.recent_values;
        let last = match rv.last() {
            Some(&v) => v,
            None => {
                return Err(ModelError::InsufficientData {
                    required: 1,
                    actual: 0,
                })
            }
        };

        let p = self.params;
        let s = p.season_length;
        let n_steps = forecast_steps(self.horizon_seconds, self.step_seconds);

        let saturate =
            |v: f64| v.max(0.0).min(last * 2.0 + 100.0).min(PREDICTION_CEILING);

        // Step 0: fuse the fitted components into the last observation.
        let m = rv.len();
        let mut component = 0.0;
        for (i, &coef) in bundle.ar.iter().enumerate() {
            if i + 1 <= m {
                component += coef * rv[m - 1 - i];
            }
        }
        for (j, &coef) in bundle.seasonal_ar.iter().enumerate() {
            let lag = (j + 1) * s;
            if lag <= m {
                component += coef * rv[m - lag];
            }
        }
        let rr = &bundle.recent_residuals;
        let mr = rr.len();
        for (k, &coef) in bundle.ma.iter().enumerate() {
            if k + 1 <= mr {
                component += coef * rr[mr - 1 - k];
            }
        }
        for (j, &coef) in bundle.seasonal_ma.iter().enumerate() {
            let lag = (j + 1) * s;
            if lag <= mr {
                component += coef * rr[mr - lag];
            }
        }

        let mut points = Vec::with_capacity(n_steps);
        points.push(saturate(last + 0.1 * component));

        // Later steps: damped pull back toward the last observation, with a
        // seasonal echo once a full season is in the horizon.
        for t in 1..n_steps {
            let damp = 1.0 / (1.0 + 0.1 * t as f64);
            let mut pred = (0.9 * last + 0.1 * points[t - 1]) * damp + last * (1.0 - damp);
            if p.is_seasonal() && t >= s {
                pred += 0.3 * damp * (points[t - s] - last);
            }
            points.push(saturate(pred));
        }

        if points.is_empty() {
            return Err(ModelError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }

        // Bands widen with the horizon.
        let residual_std = bundle.residual_std;
        let quantiles =
            gaussian_quantiles(&points, |i| residual_std * (1.0 + 0.1 * i as f64).sqrt());

        Ok(Forecast {
            metric: self.metric.clone(),
            values: points,
            step_seconds: self.step_seconds,
            horizon_seconds: self.horizon_seconds,
            quantiles: Some(quantiles),
        })
    }
}

// =============================================================================
// Numerics
// =============================================================================

/// Lagged difference: out[t] = x[t+lag] - x[t].
fn difference(series: &[f64], lag: usize) -> Vec<f64> {
    if lag == 0 || series.len() <= lag {
        return Vec::new();
    }
    (lag..series.len()).map(|t| series[t] - series[t - lag]).collect()
}

/// Normalized autocorrelation function of an already-centered series at
/// lags 0..=max_lag. `None` when the series has (near-)zero variance.
fn autocorrelation(centered: &[f64], max_lag: usize) -> Option<Vec<f64>> {
    let n = centered.len();
    if n == 0 {
        return None;
    }
    let denom: f64 = centered.iter().map(|x| x * x).sum();
    if denom < f64::EPSILON {
        return None;
    }

    let acf = (0..=max_lag)
        .map(|lag| {
            if lag >= n {
                return 0.0;
            }
            let num: f64 = (lag..n).map(|t| centered[t] * centered[t - lag]).sum();
            num / denom
        })
        .collect();
    Some(acf)
}

/// Solve the Yule-Walker equations with the Levinson-Durbin recursion.
///
/// `acf` holds normalized autocorrelations at lags 0..=order. Returns
/// `None` on a zero-variance step or a non-positive updated variance, the
/// caller falls back to a conservative default.
fn levinson_durbin(acf: &[f64], order: usize) -> Option<Vec<f64>> {
    if order == 0 || acf.len() < order + 1 {
        return None;
    }

    let mut coeffs = vec![0.0_f64; order + 1];
    let mut error = acf[0];
    if error.abs() < f64::EPSILON {
        return None;
    }

    for k in 1..=order {
        let mut lambda = acf[k];
        for j in 1..k {
            lambda -= coeffs[j] * acf[k - j];
        }
        lambda /= error;

        let prev = coeffs.clone();
        coeffs[k] = lambda;
        for j in 1..k {
            coeffs[j] = prev[j] - lambda * prev[k - j];
        }

        error *= 1.0 - lambda * lambda;
        if error <= 0.0 {
            return None;
        }
    }

    Some(coeffs[1..=order].to_vec())
}

/// Fallback coefficient vector: `first` then zeros.
fn conservative_coeffs(order: usize, first: f64) -> Vec<f64> {
    let mut coeffs = vec![0.0; order];
    if let Some(c) = coeffs.first_mut() {
        *c = first;
    }
    coeffs
}

/// Sample standard deviation; zero for fewer than two points.
fn sample_std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    let variance =
        values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    variance.sqrt()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FeatureRow, FIELD_VALUE};
    use crate::planner::quantile_key;

    fn frame(values: &[f64]) -> FeatureFrame {
        let rows = values
            .iter()
            .map(|&v| {
                let mut r = FeatureRow::new();
                r.insert(FIELD_VALUE.to_string(), v);
                r
            })
            .collect();
        FeatureFrame::new(rows)
    }

    /// Deterministic xorshift noise so fits are reproducible.
    fn noisy_series(len: usize, base: f64, seed: u64) -> Vec<f64> {
        let mut v = Vec::with_capacity(len);
        let mut state = seed;
        for i in 0..len {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            let noise = (state as f64 / u64::MAX as f64 - 0.5) * 10.0;
            v.push(base + (i as f64).sin() * 5.0 + noise);
        }
        v
    }

    fn model(horizon: i64, step: i64, params: ArimaParams) -> ArimaModel {
        ArimaModel::new("rps", horizon, step, params).unwrap()
    }

    // ---- construction ----------------------------------------------------

    #[test]
    fn zero_orders_promote_to_one_one_one() {
        let m = model(300, 60, ArimaParams::non_seasonal(0, 1, 1));
        assert_eq!(m.params.p, 1);
        assert_eq!(m.params.d, 1);
        assert_eq!(m.params.q, 1);
    }

    #[test]
    fn excessive_differencing_rejected() {
        assert!(ArimaModel::new("rps", 300, 60, ArimaParams::non_seasonal(1, 3, 1)).is_err());
    }

    #[test]
    fn seasonal_differencing_above_one_rejected() {
        let mut params = ArimaParams::non_seasonal(1, 1, 1);
        params.seasonal_d = 2;
        params.season_length = 12;
        assert!(ArimaModel::new("rps", 300, 60, params).is_err());
    }

    #[test]
    fn seasonal_orders_require_season_length() {
        let mut params = ArimaParams::non_seasonal(1, 1, 1);
        params.seasonal_p = 1;
        assert!(ArimaModel::new("rps", 300, 60, params).is_err());
    }

    #[test]
    fn min_rows_non_seasonal_is_at_least_twenty() {
        let m = model(300, 60, ArimaParams::non_seasonal(1, 1, 1));
        assert_eq!(m.min_training_rows(), 20);
    }

    #[test]
    fn min_rows_seasonal_covers_two_seasons() {
        let mut params = ArimaParams::non_seasonal(1, 1, 1);
        params.seasonal_p = 1;
        params.season_length = 24;
        let m = model(300, 60, params);
        assert!(m.min_training_rows() >= 48);
    }

    // ---- train / predict -------------------------------------------------

    #[test]
    fn predict_before_train_is_not_trained() {
        let m = model(300, 60, ArimaParams::non_seasonal(1, 1, 1));
        assert_eq!(m.predict(&frame(&[1.0])).unwrap_err(), ModelError::NotTrained);
    }

    #[test]
    fn train_rejects_short_windows() {
        let m = model(300, 60, ArimaParams::non_seasonal(1, 1, 1));
        let err = m.train(&frame(&[5.0; 10])).unwrap_err();
        assert!(matches!(err, ModelError::InsufficientData { required: 20, .. }));
    }

    #[test]
    fn predict_length_matches_horizon_over_step() {
        let m = model(1800, 60, ArimaParams::non_seasonal(1, 1, 1));
        m.train(&frame(&noisy_series(120, 100.0, 42))).unwrap();
        let forecast = m.predict(&frame(&[])).unwrap();
        assert_eq!(forecast.values.len(), 30);
    }

    #[test]
    fn predictions_saturate_within_guard_rails() {
        let series = noisy_series(120, 100.0, 7);
        let last = *series.last().unwrap();
        let m = model(3600, 60, ArimaParams::non_seasonal(2, 1, 1));
        m.train(&frame(&series)).unwrap();
        for v in m.predict(&frame(&[])).unwrap().values {
            assert!(v >= 0.0);
            assert!(v <= last * 2.0 + 100.0 + 1e-9);
            assert!(v <= PREDICTION_CEILING);
        }
    }

    #[test]
    fn constant_series_stays_near_last_value() {
        // Differencing a constant gives all zeros: zero variance, so the AR
        // fit falls back to the conservative default and the forecast stays
        // close to the last observation.
        let m = model(600, 60, ArimaParams::non_seasonal(1, 1, 1));
        m.train(&frame(&[100.0; 40])).unwrap();
        let forecast = m.predict(&frame(&[])).unwrap();
        for v in forecast.values {
            assert!((90.0..=120.0).contains(&v), "prediction {v} drifted from 100");
        }
    }

    #[test]
    fn seasonal_fit_trains_and_predicts() {
        let mut params = ArimaParams::non_seasonal(1, 1, 1);
        params.seasonal_p = 1;
        params.seasonal_q = 1;
        params.season_length = 12;
        let m = model(1800, 60, params);
        assert_eq!(m.name(), "sarima");

        let series: Vec<f64> = (0..96)
            .map(|i| 100.0 + 30.0 * ((i % 12) as f64 / 12.0 * std::f64::consts::TAU).sin())
            .collect();
        m.train(&frame(&series)).unwrap();
        let forecast = m.predict(&frame(&[])).unwrap();
        assert_eq!(forecast.values.len(), 30);
        for v in forecast.values {
            assert!(v >= 0.0);
        }
    }

    #[test]
    fn quantile_bands_widen_with_horizon() {
        let m = model(1800, 60, ArimaParams::non_seasonal(1, 1, 1));
        m.train(&frame(&noisy_series(200, 100.0, 99))).unwrap();
        let forecast = m.predict(&frame(&[])).unwrap();
        let quantiles = forecast.quantiles.unwrap();
        let p95 = &quantiles[&quantile_key(0.95)];

        let early = p95[0] - forecast.values[0];
        let late = p95[29] - forecast.values[29];
        assert!(early > 0.0, "residual spread should be positive");
        assert!(late > early, "band should widen: early={early} late={late}");
    }

    #[test]
    fn repeated_predict_is_identical_between_trains() {
        let m = model(600, 60, ArimaParams::non_seasonal(1, 1, 1));
        m.train(&frame(&noisy_series(80, 50.0, 5))).unwrap();
        let a = m.predict(&frame(&[])).unwrap();
        let b = m.predict(&frame(&[])).unwrap();
        assert_eq!(a.values, b.values);
        assert_eq!(a.quantiles, b.quantiles);
    }

    #[test]
    fn degenerate_horizon_produces_one_prediction() {
        let m = model(30, 60, ArimaParams::non_seasonal(1, 1, 1));
        m.train(&frame(&noisy_series(40, 100.0, 3))).unwrap();
        assert_eq!(m.predict(&frame(&[])).unwrap().values.len(), 1);
    }

    // ---- numerics --------------------------------------------------------

    #[test]
    fn difference_first_order() {
        assert_eq!(difference(&[1.0, 3.0, 6.0, 10.0], 1), vec![2.0, 3.0, 4.0]);
        assert!(difference(&[1.0], 1).is_empty());
    }

    #[test]
    fn difference_seasonal_lag() {
        assert_eq!(difference(&[1.0, 2.0, 4.0, 8.0], 2), vec![3.0, 6.0]);
    }

    #[test]
    fn autocorrelation_of_flat_series_is_none() {
        assert!(autocorrelation(&[0.0; 30], 3).is_none());
    }

    #[test]
    fn autocorrelation_lag_zero_is_one() {
        let x: Vec<f64> = (0..50).map(|i| ((i * 7 % 13) as f64) - 6.0).collect();
        let centered: Vec<f64> = {
            let mean = x.iter().sum::<f64>() / x.len() as f64;
            x.iter().map(|v| v - mean).collect()
        };
        let acf = autocorrelation(&centered, 5).unwrap();
        assert!((acf[0] - 1.0).abs() < 1e-12);
        for &r in &acf {
            assert!(r.abs() <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn levinson_recovers_ar1_coefficient() {
        // An AR(1) process with phi = 0.8 has acf [1, 0.8, 0.64]; the
        // order-2 solution is [0.8, 0.0].
        let coeffs = levinson_durbin(&[1.0, 0.8, 0.64], 2).unwrap();
        assert!((coeffs[0] - 0.8).abs() < 1e-9);
        assert!(coeffs[1].abs() < 1e-9);
    }

    #[test]
    fn levinson_rejects_degenerate_input() {
        assert!(levinson_durbin(&[0.0, 0.5], 1).is_none());
        assert!(levinson_durbin(&[1.0], 1).is_none());
        // |r1| >= 1 drives the updated variance non-positive.
        assert!(levinson_durbin(&[1.0, 1.0], 1).is_none());
    }

    #[test]
    fn conservative_default_shape() {
        assert_eq!(conservative_coeffs(3, 0.5), vec![0.5, 0.0, 0.0]);
        assert!(conservative_coeffs(0, 0.5).is_empty());
    }
}
