// =============================================================================
// Prometheus Source — range queries over the Prometheus HTTP API
// =============================================================================
//
// Issues GET /api/v1/query_range with the configured PromQL expression over
// the look-back window and flattens the matrix result into (ts, value)
// points. Series overlapping at a timestamp are summed into one row.
//
// VictoriaMetrics exposes the same query API; only the base URL differs.
// =============================================================================

use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::frame::DataFrame;
use crate::source::SourceError;

/// Deadline for one range-query round-trip.
const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default query resolution when the config leaves it unset.
const DEFAULT_STEP_SECONDS: i64 = 60;

#[derive(Debug, Deserialize)]
struct RangeResponse {
    status: String,
    #[serde(default)]
    data: Option<RangeData>,
}

#[derive(Debug, Deserialize)]
struct RangeData {
    #[serde(default)]
    result: Vec<RangeSeries>,
}

#[derive(Debug, Deserialize)]
struct RangeSeries {
    /// Pairs of [unix_seconds, "value"].
    #[serde(default)]
    values: Vec<(f64, String)>,
}

/// Source adapter for Prometheus-compatible metric backends.
pub struct PrometheusSource {
    base_url: String,
    query: String,
    step_seconds: i64,
    client: reqwest::Client,
}

impl PrometheusSource {
    pub fn new(base_url: &str, query: &str, step_seconds: i64) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            query: query.to_string(),
            step_seconds: if step_seconds > 0 {
                step_seconds
            } else {
                DEFAULT_STEP_SECONDS
            },
            client,
        }
    }

    /// Pull the query window ending at the current UTC second.
    #[instrument(skip(self), name = "prometheus::collect")]
    pub async fn collect(&self, window_seconds: i64) -> Result<DataFrame, SourceError> {
        let end = Utc::now().timestamp();
        let start = end - window_seconds.max(0);

        let url = format!("{}/api/v1/query_range", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("query", self.query.as_str()),
                ("start", &start.to_string()),
                ("end", &end.to_string()),
                ("step", &self.step_seconds.to_string()),
            ])
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("query_range request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "query_range returned HTTP {status}"
            )));
        }

        let body: RangeResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("invalid JSON: {e}")))?;

        if body.status != "success" {
            return Err(SourceError::Malformed(format!(
                "query status '{}'",
                body.status
            )));
        }

        let series = body.data.map(|d| d.result).unwrap_or_default();
        let frame = flatten_matrix(&series, start, end)?;

        debug!(rows = frame.len(), window_seconds, "prometheus window collected");
        Ok(frame)
    }
}

/// Sum matrix series into one row per timestamp, keeping only samples
/// strictly inside the (start, end] window.
fn flatten_matrix(
    series: &[RangeSeries],
    start: i64,
    end: i64,
) -> Result<DataFrame, SourceError> {
    let mut points: Vec<(i64, f64)> = Vec::new();

    for s in series {
        for (ts, raw) in &s.values {
            let ts = *ts as i64;
            if ts <= start || ts > end {
                continue;
            }
            let value: f64 = raw
                .parse()
                .map_err(|_| SourceError::Malformed(format!("non-numeric sample '{raw}'")))?;
            points.push((ts, value));
        }
    }

    let frame = DataFrame::from_points(points);
    if frame.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(frame)
}
