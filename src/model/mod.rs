// =============================================================================
// Forecast models — shared contract and dispatch
// =============================================================================
//
// Every model learns from a FeatureFrame and produces a Forecast whose point
// series has exactly horizon/step entries, all non-negative. Models that
// estimate their own forecast error also publish quantile bands at the
// standard levels {0.50, 0.75, 0.90, 0.95}.
//
// Concurrency contract: `train` builds a fresh immutable state bundle and
// publishes it under a write lock; `predict` clones an Arc snapshot of the
// bundle under a read lock. Concurrent predicts after at least one train are
// therefore safe, and a predict never observes a half-built bundle.
// =============================================================================

mod arima;
mod baseline;
mod external;

pub use arima::{ArimaModel, ArimaParams};
pub use baseline::BaselineModel;
pub use external::ExternalPredictor;

use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::ModelConfig;
use crate::frame::FeatureFrame;
use crate::planner::quantile_key;

/// Quantile levels every error-estimating model publishes, paired with the
/// Gaussian z-score for each level.
pub const QUANTILE_Z: [(f64, f64); 4] = [
    (0.50, 0.0),
    (0.75, 0.674),
    (0.90, 1.282),
    (0.95, 1.645),
];

// =============================================================================
// Forecast
// =============================================================================

/// A horizon forecast for a single metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    /// Metric label the forecast refers to.
    pub metric: String,
    /// Point predictions, one per step. All non-negative.
    pub values: Vec<f64>,
    /// Interval between adjacent predictions, in seconds.
    pub step_seconds: i64,
    /// Total future duration covered, in seconds.
    pub horizon_seconds: i64,
    /// Optional quantile bands, keyed by formatted level (e.g. `"0.90"`).
    /// Every series has the same length as `values`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<BTreeMap<String, Vec<f64>>>,
}

/// Build the standard quantile map around a point series: each band is the
/// point prediction shifted by z times `spread(i)`, floored at zero.
pub(crate) fn gaussian_quantiles(
    points: &[f64],
    spread: impl Fn(usize) -> f64,
) -> BTreeMap<String, Vec<f64>> {
    let mut map = BTreeMap::new();
    for (level, z) in QUANTILE_Z {
        let series = points
            .iter()
            .enumerate()
            .map(|(i, &p)| (p + z * spread(i)).max(0.0))
            .collect();
        map.insert(quantile_key(level), series);
    }
    map
}

// =============================================================================
// Errors
// =============================================================================

/// Failures surfaced by model train/predict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// Predict was called before any successful train.
    NotTrained,
    /// The input carries fewer rows than the model requires.
    InsufficientData { required: usize, actual: usize },
    /// An external predictor failed (transport, status, or response shape).
    Predictor(String),
}

impl std::fmt::Display for ModelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotTrained => write!(f, "model has not been trained"),
            Self::InsufficientData { required, actual } => {
                write!(f, "insufficient data: need {required} rows, got {actual}")
            }
            Self::Predictor(msg) => write!(f, "external predictor failed: {msg}"),
        }
    }
}

impl std::error::Error for ModelError {}

// =============================================================================
// Dispatch
// =============================================================================

/// The model variants a workload can be bound to.
pub enum Model {
    Baseline(BaselineModel),
    Arima(ArimaModel),
    External(ExternalPredictor),
}

impl Model {
    /// Construct the model a workload configuration asks for.
    pub fn from_config(
        config: &ModelConfig,
        metric: &str,
        horizon_seconds: i64,
        step_seconds: i64,
    ) -> Result<Self> {
        match config {
            ModelConfig::Baseline => Ok(Self::Baseline(BaselineModel::new(
                metric,
                horizon_seconds,
                step_seconds,
            ))),
            ModelConfig::Arima { p, d, q } => {
                let params = ArimaParams::non_seasonal(*p, *d, *q);
                Ok(Self::Arima(ArimaModel::new(
                    metric,
                    horizon_seconds,
                    step_seconds,
                    params,
                )?))
            }
            ModelConfig::Sarima {
                p,
                d,
                q,
                seasonal_p,
                seasonal_d,
                seasonal_q,
                season_length,
            } => {
                let params = ArimaParams {
                    p: *p,
                    d: *d,
                    q: *q,
                    seasonal_p: *seasonal_p,
                    seasonal_d: *seasonal_d,
                    seasonal_q: *seasonal_q,
                    season_length: *season_length,
                };
                Ok(Self::Arima(ArimaModel::new(
                    metric,
                    horizon_seconds,
                    step_seconds,
                    params,
                )?))
            }
            ModelConfig::External { url } => Ok(Self::External(ExternalPredictor::new(
                metric,
                horizon_seconds,
                step_seconds,
                url.clone(),
            ))),
        }
    }

    /// Identifier used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Baseline(_) => "baseline",
            Self::Arima(m) => m.name(),
            Self::External(_) => "external",
        }
    }

    /// Learn model state from a feature window. Non-fatal to the pipeline
    /// on failure.
    pub async fn train(&self, features: &FeatureFrame) -> Result<(), ModelError> {
        match self {
            Self::Baseline(m) => m.train(features),
            Self::Arima(m) => m.train(features),
            Self::External(m) => m.train(features),
        }
    }

    /// Produce a horizon forecast from the feature window.
    pub async fn predict(&self, features: &FeatureFrame) -> Result<Forecast, ModelError> {
        match self {
            Self::Baseline(m) => m.predict(features),
            Self::Arima(m) => m.predict(features),
            Self::External(m) => m.predict(features).await,
        }
    }
}

/// Number of forecast steps for a horizon/step pair. Degenerate
/// configurations still produce a single prediction.
pub(crate) fn forecast_steps(horizon_seconds: i64, step_seconds: i64) -> usize {
    if step_seconds <= 0 || horizon_seconds <= 0 {
        return 1;
    }
    let n = horizon_seconds / step_seconds;
    if n <= 0 {
        1
    } else {
        n as usize
    }
}
