// =============================================================================
// Snapshot store — at most one current snapshot per workload
// =============================================================================
//
// A Snapshot is the per-tick artifact an external autoscaling controller
// reads: the point forecast, the desired-replica vector derived from it,
// and optional quantile bands. `put` atomically replaces the workload's
// current snapshot; `get_latest` reads it back exactly as stored.
//
// Workload names are validated at every boundary before the store is
// touched: one leading and one trailing alphanumeric, with alphanumerics,
// dashes and underscores in between, at most 253 characters total.
// =============================================================================

mod memory;

pub use memory::MemoryStore;

use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest accepted workload name.
const MAX_WORKLOAD_NAME_LEN: usize = 253;

/// The per-workload artifact combining forecast and desired replicas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub workload: String,
    pub metric: String,
    pub generated_at: DateTime<Utc>,
    pub step_seconds: i64,
    pub horizon_seconds: i64,
    pub values: Vec<f64>,
    pub desired_replicas: Vec<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantiles: Option<BTreeMap<String, Vec<f64>>>,
}

impl Snapshot {
    /// A snapshot is stale once its age strictly exceeds `stale_after`;
    /// exactly at the threshold it is still fresh.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: Duration) -> bool {
        now - self.generated_at > stale_after
    }
}

/// Check a workload name against `[A-Za-z0-9]([A-Za-z0-9_-]{0,251}[A-Za-z0-9])?`.
pub fn is_valid_workload_name(name: &str) -> bool {
    let bytes = name.as_bytes();
    if bytes.is_empty() || bytes.len() > MAX_WORKLOAD_NAME_LEN {
        return false;
    }
    if !bytes[0].is_ascii_alphanumeric() || !bytes[bytes.len() - 1].is_ascii_alphanumeric() {
        return false;
    }
    bytes[1..bytes.len() - 1]
        .iter()
        .all(|&b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// The store variants the engine can share across runners and the read
/// API. A TTL-capable remote backend would be a further variant behind the
/// same two operations.
pub enum SnapshotStore {
    Memory(MemoryStore),
}

impl SnapshotStore {
    /// Atomically replace the current snapshot for `snapshot.workload`.
    pub async fn put(&self, snapshot: Snapshot) -> Result<()> {
        if snapshot.workload.is_empty() {
            bail!("snapshot workload name must not be empty");
        }
        match self {
            Self::Memory(store) => store.put(snapshot),
        }
        Ok(())
    }

    /// Read the current snapshot for a workload, if one exists and has not
    /// expired.
    pub async fn get_latest(&self, workload: &str) -> Result<Option<Snapshot>> {
        Ok(match self {
            Self::Memory(store) => store.get_latest(workload),
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(workload: &str) -> Snapshot {
        let mut quantiles = BTreeMap::new();
        quantiles.insert("0.90".to_string(), vec![12.0, 14.0]);
        Snapshot {
            workload: workload.to_string(),
            metric: "requests_per_second".to_string(),
            generated_at: Utc::now(),
            step_seconds: 60,
            horizon_seconds: 120,
            values: vec![10.0, 11.0],
            desired_replicas: vec![2, 3],
            quantiles: Some(quantiles),
        }
    }

    #[test]
    fn valid_names() {
        for name in ["api", "a", "web-frontend", "queue_worker-2", "A9"] {
            assert!(is_valid_workload_name(name), "{name} should be valid");
        }
    }

    #[test]
    fn invalid_names() {
        for name in ["", "-api", "api-", "_x", "x_", "a b", "x/y", "café"] {
            assert!(!is_valid_workload_name(name), "{name} should be invalid");
        }
    }

    #[test]
    fn name_length_boundary() {
        let max: String = "a".repeat(253);
        assert!(is_valid_workload_name(&max));
        let too_long: String = "a".repeat(254);
        assert!(!is_valid_workload_name(&too_long));
    }

    #[test]
    fn staleness_threshold_is_strict() {
        let snap = snapshot("api");
        let stale_after = Duration::seconds(60);
        // Exactly at the threshold: fresh.
        assert!(!snap.is_stale(snap.generated_at + stale_after, stale_after));
        // Strictly beyond: stale.
        assert!(snap.is_stale(
            snap.generated_at + stale_after + Duration::seconds(1),
            stale_after
        ));
    }

    #[test]
    fn json_wire_shape() {
        let snap = snapshot("api");
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["workload"], "api");
        assert!(json["generatedAt"].is_string());
        assert_eq!(json["stepSeconds"], 60);
        assert_eq!(json["horizonSeconds"], 120);
        assert_eq!(json["desiredReplicas"][1], 3);
        assert_eq!(json["quantiles"]["0.90"][0], 12.0);
    }

    #[test]
    fn quantiles_omitted_when_absent() {
        let mut snap = snapshot("api");
        snap.quantiles = None;
        let json = serde_json::to_value(&snap).unwrap();
        assert!(json.get("quantiles").is_none());
    }

    #[test]
    fn serde_round_trip_preserves_everything() {
        let snap = snapshot("api");
        let json = serde_json::to_string(&snap).unwrap();
        let back: Snapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(snap, back);
    }

    #[tokio::test]
    async fn store_rejects_empty_workload_name() {
        let store = SnapshotStore::Memory(MemoryStore::new(None));
        assert!(store.put(snapshot("")).await.is_err());
    }

    #[tokio::test]
    async fn store_round_trip() {
        let store = SnapshotStore::Memory(MemoryStore::new(None));
        let snap = snapshot("api");
        store.put(snap.clone()).await.unwrap();
        let back = store.get_latest("api").await.unwrap().unwrap();
        assert_eq!(snap, back);
        assert!(store.get_latest("missing").await.unwrap().is_none());
    }
}
