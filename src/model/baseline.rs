// =============================================================================
// Seasonality Baseline — calendar-bucket forecast with trend extrapolation
// =============================================================================
//
// Training learns two seasonal tables from the feature window:
//
//   minute-of-hour (60 buckets) and hour-of-day (24 buckets)
//
// A bucket with at least two observations records mean, min, max, sample
// stddev, and count. The aggregate residual scale is the mean of the bucket
// stddevs, falling back to the overall stddev of the training series when no
// bucket qualifies.
//
// Prediction extrapolates from the last observed value:
//
//   base_t = last + trend*t + 0.5*momentum*t^2/60
//
// where trend is the per-point OLS slope over the last min(10, N) values
// divided by 60 (units per second assuming ~1-minute input spacing), and
// momentum is the trend difference between the recent and older halves of
// that window. Each step then blends base with the matching seasonal bucket
// according to the ratio seasonal/(base+1), and is clamped to >= 0.
// =============================================================================

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::frame::{FeatureFrame, FIELD_HOUR, FIELD_MINUTE};
use crate::model::{forecast_steps, gaussian_quantiles, Forecast, ModelError};

/// Fewest rows a training window may carry.
const MIN_TRAIN_ROWS: usize = 2;

/// Trend/momentum look-back window.
const TREND_WINDOW: usize = 10;

/// Per-bucket summary statistics.
#[derive(Debug, Clone, Copy)]
struct BucketStats {
    mean: f64,
    max: f64,
    std_dev: f64,
}

/// Seasonal table over a fixed number of calendar buckets.
#[derive(Debug, Clone)]
struct SeasonalTable {
    buckets: Vec<Option<BucketStats>>,
}

impl SeasonalTable {
    fn learn(size: usize, observations: &[Vec<f64>]) -> Self {
        let buckets = (0..size)
            .map(|b| {
                let obs = &observations[b];
                if obs.len() < 2 {
                    return None;
                }
                let n = obs.len() as f64;
                let mean = obs.iter().sum::<f64>() / n;
                let max = obs.iter().cloned().fold(f64::MIN, f64::max);
                let variance =
                    obs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
                Some(BucketStats {
                    mean,
                    max,
                    std_dev: variance.sqrt(),
                })
            })
            .collect();
        Self { buckets }
    }

    fn get(&self, bucket: usize) -> Option<BucketStats> {
        self.buckets.get(bucket).copied().flatten()
    }

    fn learned_count(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }
}

/// Immutable trained state, published whole on every successful train.
struct Bundle {
    minute: SeasonalTable,
    hour: SeasonalTable,
    residual_std: f64,
}

// =============================================================================
// BaselineModel
// =============================================================================

/// Seasonality-aware baseline forecaster.
pub struct BaselineModel {
    metric: String,
    horizon_seconds: i64,
    step_seconds: i64,
    state: RwLock<Option<Arc<Bundle>>>,
}

impl BaselineModel {
    pub fn new(metric: &str, horizon_seconds: i64, step_seconds: i64) -> Self {
        Self {
            metric: metric.to_string(),
            horizon_seconds,
            step_seconds,
            state: RwLock::new(None),
        }
    }

    /// Learn seasonal tables and the residual scale from the window.
    pub fn train(&self, features: &FeatureFrame) -> Result<(), ModelError> {
        let rows = features.rows();
        if rows.len() < MIN_TRAIN_ROWS {
            return Err(ModelError::InsufficientData {
                required: MIN_TRAIN_ROWS,
                actual: rows.len(),
            });
        }

        let mut minute_obs: Vec<Vec<f64>> = vec![Vec::new(); 60];
        let mut hour_obs: Vec<Vec<f64>> = vec![Vec::new(); 24];
        let mut values = Vec::with_capacity(rows.len());

        for row in rows {
            let value = match row.get(crate::frame::FIELD_VALUE) {
                Some(&v) => v,
                None => continue,
            };
            values.push(value);

            if let Some(&m) = row.get(FIELD_MINUTE) {
                let b = m as usize;
                if b < 60 {
                    minute_obs[b].push(value);
                }
            }
            if let Some(&h) = row.get(FIELD_HOUR) {
                let b = h as usize;
                if b < 24 {
                    hour_obs[b].push(value);
                }
            }
        }

        let minute = SeasonalTable::learn(60, &minute_obs);
        let hour = SeasonalTable::learn(24, &hour_obs);

        // Mean of bucket stddevs; overall stddev of the series if no bucket
        // accumulated enough observations.
        let bucket_stds: Vec<f64> = minute
            .buckets
            .iter()
            .chain(hour.buckets.iter())
            .filter_map(|b| b.map(|s| s.std_dev))
            .collect();
        let residual_std = if bucket_stds.is_empty() {
            sample_std_dev(&values)
        } else {
            bucket_stds.iter().sum::<f64>() / bucket_stds.len() as f64
        };

        debug!(
            metric = %self.metric,
            rows = rows.len(),
            minute_buckets = minute.learned_count(),
            hour_buckets = hour.learned_count(),
            residual_std = format!("{residual_std:.4}"),
            "baseline trained"
        );

        *self.state.write() = Some(Arc::new(Bundle {
            minute,
            hour,
            residual_std,
        }));
        Ok(())
    }

    /// Forecast `horizon/step` points forward from the latest value.
    pub fn predict(&self, features: &FeatureFrame) -> Result<Forecast, ModelError> {
        let bundle = self.state.read().clone().ok_or(ModelError::NotTrained)?;

        let values = features.values();
        let last = match values.last() {
            Some(&v) => v,
            None => {
                return Err(ModelError::InsufficientData {
                    required: 1,
                    actual: 0,
                })
            }
        };

        let window = &values[values.len().saturating_sub(TREND_WINDOW)..];
        // Per-point slope scaled to units per second (~1-minute spacing).
        let trend = ols_slope(window) / 60.0;
        let momentum = if window.len() >= 6 {
            let half = window.len() / 2;
            (ols_slope(&window[half..]) - ols_slope(&window[..half])) / 60.0
        } else {
            0.0
        };

        // Calendar position of the window's end; absent fields fall back to
        // the wall clock.
        let now = chrono::Utc::now();
        let current_minute = features
            .last_field(FIELD_MINUTE)
            .map_or_else(|| chrono::Timelike::minute(&now) as i64, |m| m as i64);
        let current_hour = features
            .last_field(FIELD_HOUR)
            .map_or_else(|| chrono::Timelike::hour(&now) as i64, |h| h as i64);

        let n_steps = forecast_steps(self.horizon_seconds, self.step_seconds);
        let step = if self.step_seconds > 0 {
            self.step_seconds
        } else {
            60
        };

        let mut points = Vec::with_capacity(n_steps);
        for i in 1..=n_steps as i64 {
            let t = (i * step) as f64;
            let base = last + trend * t + 0.5 * momentum * t * t / 60.0;

            let minutes_ahead = (t / 60.0) as i64;
            let hours_ahead = (t / 3600.0) as i64;
            let minute_bucket = ((current_minute + minutes_ahead).rem_euclid(60)) as usize;
            let hour_bucket = ((current_hour + hours_ahead).rem_euclid(24)) as usize;

            let seasonal = bundle
                .minute
                .get(minute_bucket)
                .or_else(|| bundle.hour.get(hour_bucket))
                .map(|b| {
                    if momentum > 0.0 && b.max > b.mean {
                        0.7 * b.mean + 0.3 * b.max
                    } else {
                        b.mean
                    }
                });

            let point = match seasonal {
                None => base,
                Some(s) => {
                    let r = s / (base + 1.0);
                    if r > 1.5 {
                        0.2 * base + 0.8 * s
                    } else if r > 1.2 {
                        0.3 * base + 0.7 * s
                    } else if r < 0.8 {
                        0.4 * base + 0.6 * s
                    } else {
                        0.5 * base + 0.5 * s
                    }
                }
            };

            points.push(point.max(0.0));
        }

        let quantiles = gaussian_quantiles(&points, |_| bundle.residual_std);

        Ok(Forecast {
            metric: self.metric.clone(),
            values: points,
            step_seconds: step,
            horizon_seconds: self.horizon_seconds,
            quantiles: Some(quantiles),
        })
    }
}

/// Per-point OLS slope over a series indexed 0..n. Fewer than two points
/// carry no trend.
fn ols_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }

    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = values.iter().sum::<f64>() / n as f64;

    let mut numerator = 0.0_f64;
    let mut denominator = 0.0_f64;
    for (i, &y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        numerator += dx * (y - y_mean);
        denominator += dx * dx;
    }

    if denominator.abs() < f64::EPSILON {
        return 0.0;
    }
    numerator / denominator
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
