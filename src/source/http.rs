// =============================================================================
// HTTP Source — plain JSON metric feeds
// =============================================================================
//
// For services that expose their own load metric directly: GET the
// configured URL and expect a JSON array of { "ts": RFC3339, "value": n }
// objects. Samples outside the look-back window are discarded; duplicate
// timestamps are summed.
// =============================================================================

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::frame::DataFrame;
use crate::source::SourceError;

/// Deadline for one feed round-trip.
const REQUEST_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize)]
struct Sample {
    ts: String,
    value: f64,
}

/// Source adapter for ad-hoc JSON metric endpoints.
pub struct HttpSource {
    url: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpSource {
    pub fn new(url: &str, bearer_token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .expect("failed to build reqwest client");

        Self {
            url: url.to_string(),
            bearer_token,
            client,
        }
    }

    /// Pull the feed and keep samples inside the window ending now.
    #[instrument(skip(self), name = "http_source::collect")]
    pub async fn collect(&self, window_seconds: i64) -> Result<DataFrame, SourceError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("feed request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable(format!(
                "feed returned HTTP {status}"
            )));
        }

        let samples: Vec<Sample> = response
            .json()
            .await
            .map_err(|e| SourceError::Malformed(format!("invalid JSON: {e}")))?;

        let end = Utc::now().timestamp();
        let frame = windowed_frame(&samples, end - window_seconds.max(0), end)?;

        debug!(rows = frame.len(), window_seconds, "http feed collected");
        Ok(frame)
    }
}

/// Parse, filter to (start, end], merge and sort.
fn windowed_frame(samples: &[Sample], start: i64, end: i64) -> Result<DataFrame, SourceError> {
    let mut points = Vec::with_capacity(samples.len());

    for sample in samples {
        let ts = DateTime::parse_from_rfc3339(&sample.ts)
            .map_err(|_| SourceError::Malformed(format!("invalid timestamp '{}'", sample.ts)))?
            .with_timezone(&Utc)
            .timestamp();
        if ts <= start || ts > end {
            continue;
        }
        points.push((ts, sample.value));
    }

    let frame = DataFrame::from_points(points);
    if frame.is_empty() {
        return Err(SourceError::Empty);
    }
    Ok(frame)
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FIELD_VALUE;

    fn sample(ts: &str, value: f64) -> Sample {
        Sample {
            ts: ts.to_string(),
            value,
        }
    }

    #[test]
    fn windowed_frame_filters_and_merges() {
        let samples = vec![
            sample("1970-01-01T00:00:30Z", 1.0),  // before window
            sample("1970-01-01T00:01:00Z", 2.0),  // inside
            sample("1970-01-01T00:01:00Z", 3.0),  // duplicate ts: summed
            sample("1970-01-01T00:02:00Z", 4.0),  // at end: included
        ];
        let frame = windowed_frame(&samples, 30, 120).unwrap();
        assert_eq!(frame.len(), 2);
        let first = &frame.rows()[0];
        assert!((first[FIELD_VALUE].as_f64().unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn windowed_frame_rejects_bad_timestamp() {
        let samples = vec![sample("noonish", 1.0)];
        let err = windowed_frame(&samples, 0, 100).unwrap_err();
        assert!(matches!(err, SourceError::Malformed(_)));
    }

    #[test]
    fn windowed_frame_empty_is_an_error() {
        let err = windowed_frame(&[], 0, 100).unwrap_err();
        assert!(matches!(err, SourceError::Empty));
    }

    #[test]
    fn sample_deserializes_from_feed_shape() {
        let s: Sample =
            serde_json::from_str(r#"{ "ts": "2026-01-01T00:00:00Z", "value": 7.5 }"#).unwrap();
        assert_eq!(s.ts, "2026-01-01T00:00:00Z");
        assert!((s.value - 7.5).abs() < 1e-12);
    }
}
