// =============================================================================
// External Predictor — bring-your-own-model over HTTP
// =============================================================================
//
// Delegates forecasting to an external service: the feature window is POSTed
// as JSON and the service answers with a point series (and optionally
// quantile bands). The predictor is always considered trained; `train` is a
// no-op because the remote side owns its own state.
//
// Response contract:
//
//   { "values": [number], "quantiles": { "<q>": [number] }? }
//
// The point series must have exactly horizon/step entries; negative entries
// are floored at zero to uphold the forecast invariant.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

use crate::frame::FeatureFrame;
use crate::model::{forecast_steps, Forecast, ModelError};

/// Deadline for one remote predict round-trip.
const REQUEST_TIMEOUT_SECS: u64 = 2;

#[derive(Debug, Serialize)]
struct PredictRequest<'a> {
    metric: &'a str,
    #[serde(rename = "stepSeconds")]
    step_seconds: i64,
    #[serde(rename = "horizonSeconds")]
    horizon_seconds: i64,
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    values: Vec<f64>,
    #[serde(default)]
    quantiles: Option<BTreeMap<String, Vec<f64>>>,
}

/// Forecast model backed by an external HTTP predictor.
pub struct ExternalPredictor {
    metric: String,
    horizon_seconds: i64,
    step_seconds: i64,
    url: String,
    client: reqwest::Client,
}

impl ExternalPredictor {
    pub fn new(metric: &str, horizon_seconds: i64, step_seconds: i64, url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            metric: metric.to_string(),
            horizon_seconds,
            step_seconds,
            url,
            client,
        }
    }

    /// The remote service owns its model state.
    pub fn train(&self, _features: &FeatureFrame) -> Result<(), ModelError> {
        Ok(())
    }

    /// POST the feature window and validate the returned forecast shape.
    pub async fn predict(&self, features: &FeatureFrame) -> Result<Forecast, ModelError> {
        let request = PredictRequest {
            metric: &self.metric,
            step_seconds: self.step_seconds,
            horizon_seconds: self.horizon_seconds,
            values: features.values(),
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| ModelError::Predictor(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ModelError::Predictor(format!(
                "predictor returned HTTP {status}"
            )));
        }

        let body: PredictResponse = response
            .json()
            .await
            .map_err(|e| ModelError::Predictor(format!("invalid response body: {e}")))?;

        let expected = forecast_steps(self.horizon_seconds, self.step_seconds);
        if body.values.len() != expected {
            return Err(ModelError::Predictor(format!(
                "predictor returned {} values, expected {expected}",
                body.values.len()
            )));
        }

        let values: Vec<f64> = body.values.iter().map(|v| v.max(0.0)).collect();

        // A quantile series that does not match the point series length
        // cannot be used by the planner; drop the whole map rather than
        // serve a half-valid band set.
        let quantiles = body.quantiles.filter(|map| {
            map.values().all(|series| series.len() == expected)
        });

        debug!(
            metric = %self.metric,
            url = %self.url,
            points = values.len(),
            quantiles = quantiles.is_some(),
            "external forecast received"
        );

        Ok(Forecast {
            metric: self.metric.clone(),
            values,
            step_seconds: self.step_seconds,
            horizon_seconds: self.horizon_seconds,
            quantiles,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_with_wire_field_names() {
        let req = PredictRequest {
            metric: "rps",
            step_seconds: 60,
            horizon_seconds: 300,
            values: vec![1.0, 2.0],
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["stepSeconds"], 60);
        assert_eq!(json["horizonSeconds"], 300);
        assert_eq!(json["metric"], "rps");
    }

    #[test]
    fn response_parses_without_quantiles() {
        let body: PredictResponse =
            serde_json::from_str(r#"{ "values": [1.0, 2.0, 3.0] }"#).unwrap();
        assert_eq!(body.values.len(), 3);
        assert!(body.quantiles.is_none());
    }

    #[test]
    fn response_parses_with_quantiles() {
        let body: PredictResponse = serde_json::from_str(
            r#"{ "values": [1.0], "quantiles": { "0.90": [2.0] } }"#,
        )
        .unwrap();
        let quantiles = body.quantiles.unwrap();
        assert_eq!(quantiles["0.90"], vec![2.0]);
    }

    #[test]
    fn train_is_a_no_op() {
        let predictor =
            ExternalPredictor::new("rps", 300, 60, "http://localhost:9000/predict".into());
        assert!(predictor.train(&FeatureFrame::default()).is_ok());
    }
}
