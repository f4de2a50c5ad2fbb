// =============================================================================
// Feature Builder — calendar enrichment of raw metric rows
// =============================================================================
//
// Turns a DataFrame from a source adapter into the FeatureFrame consumed by
// the forecast models. For each row:
//
//   ts (RFC3339)  ->  timestamp (unix seconds), minute (0-59), hour (0-23)
//
// Calendar buckets are derived in UTC. Rows lacking a numeric `value` are
// dropped. The builder is stateless and pure; row order is preserved.
// =============================================================================

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Timelike, Utc};

use crate::frame::{
    DataFrame, FeatureFrame, FeatureRow, FIELD_HOUR, FIELD_MINUTE, FIELD_TIMESTAMP, FIELD_TS,
    FIELD_VALUE,
};

/// Build a [`FeatureFrame`] from a raw [`DataFrame`].
///
/// Fails when a row carries a `value` but its `ts` field is missing or not
/// a parseable RFC3339 timestamp (a schema violation rather than a gap).
pub fn build_features(frame: &DataFrame) -> Result<FeatureFrame> {
    let mut rows = Vec::with_capacity(frame.len());

    for (idx, row) in frame.rows().iter().enumerate() {
        // Rows without a numeric value carry no observation — drop them.
        let value = match row.get(FIELD_VALUE).and_then(|v| v.as_f64()) {
            Some(v) => v,
            None => continue,
        };

        let ts = match row.get(FIELD_TS).and_then(|v| v.as_str()) {
            Some(s) => s,
            None => bail!("row {idx} has a value but no '{FIELD_TS}' field"),
        };

        let dt: DateTime<Utc> = DateTime::parse_from_rfc3339(ts)
            .with_context(|| format!("row {idx}: invalid RFC3339 timestamp '{ts}'"))?
            .with_timezone(&Utc);

        let mut out = FeatureRow::new();
        out.insert(FIELD_VALUE.to_string(), value);
        out.insert(FIELD_TIMESTAMP.to_string(), dt.timestamp() as f64);
        out.insert(FIELD_MINUTE.to_string(), f64::from(dt.minute()));
        out.insert(FIELD_HOUR.to_string(), f64::from(dt.hour()));
        rows.push(out);
    }

    Ok(FeatureFrame::new(rows))
}
