// =============================================================================
// Tabular carriers — DataFrame and FeatureFrame
// =============================================================================
//
// Every stage of the forecast pipeline hands its successor one of two
// uniform row containers:
//
//   DataFrame    — raw rows from a source adapter; open maps from field
//                  name to JSON value. At minimum each row carries an
//                  RFC3339 `ts` string and a numeric `value`.
//   FeatureFrame — rows of named reals produced by the feature builder.
//
// Within one frame all rows share the same field schema and are ordered
// ascending by timestamp.
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, SecondsFormat};
use serde_json::Value;

/// Field name of the RFC3339 timestamp column in a [`DataFrame`].
pub const FIELD_TS: &str = "ts";
/// Field name of the observed metric column in both frame types.
pub const FIELD_VALUE: &str = "value";
/// Unix-seconds column added by the feature builder.
pub const FIELD_TIMESTAMP: &str = "timestamp";
/// Minute-of-hour (0–59) column added by the feature builder.
pub const FIELD_MINUTE: &str = "minute";
/// Hour-of-day (0–23) column added by the feature builder.
pub const FIELD_HOUR: &str = "hour";

/// A single raw row: an open map from field name to JSON value.
pub type Row = HashMap<String, Value>;

/// Ordered sequence of raw rows returned by a source adapter.
#[derive(Debug, Clone, Default)]
pub struct DataFrame {
    rows: Vec<Row>,
}

impl DataFrame {
    /// Wrap an already-ordered row set.
    pub fn new(rows: Vec<Row>) -> Self {
        Self { rows }
    }

    /// Build a frame from `(unix_seconds, value)` points.
    ///
    /// Points sharing a timestamp are summed into a single row (multiple
    /// series at the same instant are one aggregate observation) and the
    /// result is ordered ascending by timestamp.
    pub fn from_points(points: impl IntoIterator<Item = (i64, f64)>) -> Self {
        let mut merged: BTreeMap<i64, f64> = BTreeMap::new();
        for (ts, value) in points {
            *merged.entry(ts).or_insert(0.0) += value;
        }

        let rows = merged
            .into_iter()
            .filter_map(|(ts, value)| {
                let dt = DateTime::from_timestamp(ts, 0)?;
                let mut row = Row::new();
                row.insert(
                    FIELD_TS.to_string(),
                    Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
                );
                row.insert(FIELD_VALUE.to_string(), serde_json::json!(value));
                Some(row)
            })
            .collect();

        Self { rows }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A single feature row: field name to real number.
pub type FeatureRow = HashMap<String, f64>;

/// Ordered sequence of numeric feature rows. Row order is preserved from
/// the source [`DataFrame`].
#[derive(Debug, Clone, Default)]
pub struct FeatureFrame {
    rows: Vec<FeatureRow>,
}

impl FeatureFrame {
    pub fn new(rows: Vec<FeatureRow>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[FeatureRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// The `value` column in row order. Rows are guaranteed by the feature
    /// builder to carry `value`; a missing field contributes nothing.
    pub fn values(&self) -> Vec<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.get(FIELD_VALUE).copied())
            .collect()
    }

    /// Read a named field from the last row, if present.
    pub fn last_field(&self, field: &str) -> Option<f64> {
        self.rows.last().and_then(|r| r.get(field)).copied()
    }
}
