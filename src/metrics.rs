// =============================================================================
// Observability — lock-free per-workload counters and gauges
// =============================================================================
//
// Every runner owns a handle into the registry and records tick outcomes,
// per-stage durations, and classified errors without taking a lock. The
// registry map itself is built once at startup from the configured workload
// set, so readers never contend with writers.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

// =============================================================================
// Error classification
// =============================================================================

/// Classification labels emitted alongside logs and counted per workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    CollectFailed,
    FeaturesBuildFailed,
    TrainFailed,
    PredictFailed,
    InvalidPolicy,
    StorePutFailed,
    PanicRecovered,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::CollectFailed,
        ErrorKind::FeaturesBuildFailed,
        ErrorKind::TrainFailed,
        ErrorKind::PredictFailed,
        ErrorKind::InvalidPolicy,
        ErrorKind::StorePutFailed,
        ErrorKind::PanicRecovered,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CollectFailed => "adapter.collect_failed",
            Self::FeaturesBuildFailed => "features.build_failed",
            Self::TrainFailed => "model.train_failed",
            Self::PredictFailed => "model.predict_failed",
            Self::InvalidPolicy => "capacity.invalid_policy",
            Self::StorePutFailed => "store.put_failed",
            Self::PanicRecovered => "runner.panic_recovered",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|&k| k == self).unwrap_or(0)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Pipeline stages
// =============================================================================

/// Timed pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Collect,
    Train,
    Predict,
    Store,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Collect, Stage::Train, Stage::Predict, Stage::Store];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Collect => "collect",
            Self::Train => "train",
            Self::Predict => "predict",
            Self::Store => "store",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|&s| s == self).unwrap_or(0)
    }
}

// =============================================================================
// Per-workload sink
// =============================================================================

/// Counters and gauges for one workload. All operations are single atomic
/// loads/stores.
pub struct WorkloadMetrics {
    ticks_total: AtomicU64,
    ticks_succeeded: AtomicU64,
    error_counts: [AtomicU64; ErrorKind::ALL.len()],
    stage_last_ms: [AtomicU64; Stage::ALL.len()],
    /// f64 bits of the first point prediction of the latest snapshot.
    predicted_value_bits: AtomicU64,
    desired_replicas: AtomicI64,
    /// Unix seconds of the last successful tick; -1 before the first.
    last_success_unix: AtomicI64,
}

impl WorkloadMetrics {
    fn new() -> Self {
        Self {
            ticks_total: AtomicU64::new(0),
            ticks_succeeded: AtomicU64::new(0),
            error_counts: std::array::from_fn(|_| AtomicU64::new(0)),
            stage_last_ms: std::array::from_fn(|_| AtomicU64::new(0)),
            predicted_value_bits: AtomicU64::new(0.0_f64.to_bits()),
            desired_replicas: AtomicI64::new(0),
            last_success_unix: AtomicI64::new(-1),
        }
    }

    pub fn tick_started(&self) {
        self.ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a successful tick: reset the forecast age and publish the
    /// head of the new forecast.
    pub fn tick_succeeded(&self, predicted_value: f64, desired_replicas: i64) {
        self.ticks_succeeded.fetch_add(1, Ordering::Relaxed);
        self.predicted_value_bits
            .store(predicted_value.to_bits(), Ordering::Relaxed);
        self.desired_replicas
            .store(desired_replicas, Ordering::Relaxed);
        self.last_success_unix
            .store(Utc::now().timestamp(), Ordering::Relaxed);
    }

    pub fn record_error(&self, kind: ErrorKind) {
        self.error_counts[kind.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stage_ms(&self, stage: Stage, millis: u64) {
        self.stage_last_ms[stage.index()].store(millis, Ordering::Relaxed);
    }

    pub fn error_count(&self, kind: ErrorKind) -> u64 {
        self.error_counts[kind.index()].load(Ordering::Relaxed)
    }

    pub fn ticks_succeeded(&self) -> u64 {
        self.ticks_succeeded.load(Ordering::Relaxed)
    }

    /// Seconds since the last successful tick; `None` before the first.
    pub fn forecast_age_seconds(&self) -> Option<i64> {
        let last = self.last_success_unix.load(Ordering::Relaxed);
        if last < 0 {
            return None;
        }
        Some((Utc::now().timestamp() - last).max(0))
    }

    fn to_json(&self) -> serde_json::Value {
        let errors: serde_json::Map<String, serde_json::Value> = ErrorKind::ALL
            .iter()
            .map(|&k| (k.as_str().to_string(), json!(self.error_count(k))))
            .collect();
        let stages: serde_json::Map<String, serde_json::Value> = Stage::ALL
            .iter()
            .map(|&s| {
                (
                    format!("{}_last_ms", s.as_str()),
                    json!(self.stage_last_ms[s.index()].load(Ordering::Relaxed)),
                )
            })
            .collect();

        json!({
            "ticks_total": self.ticks_total.load(Ordering::Relaxed),
            "ticks_succeeded": self.ticks_succeeded.load(Ordering::Relaxed),
            "errors": errors,
            "stages": stages,
            "predicted_value": f64::from_bits(
                self.predicted_value_bits.load(Ordering::Relaxed)
            ),
            "desired_replicas": self.desired_replicas.load(Ordering::Relaxed),
            "forecast_age_seconds": self.forecast_age_seconds(),
        })
    }
}

// =============================================================================
// Registry
// =============================================================================

/// Immutable map from workload name to its metrics sink.
pub struct MetricsRegistry {
    workloads: HashMap<String, Arc<WorkloadMetrics>>,
}

impl MetricsRegistry {
    /// Pre-register every configured workload.
    pub fn new(workload_names: impl IntoIterator<Item = String>) -> Self {
        let workloads = workload_names
            .into_iter()
            .map(|name| (name, Arc::new(WorkloadMetrics::new())))
            .collect();
        Self { workloads }
    }

    pub fn workload(&self, name: &str) -> Option<Arc<WorkloadMetrics>> {
        self.workloads.get(name).cloned()
    }

    /// Full dump for the metrics endpoint.
    pub fn to_json(&self) -> serde_json::Value {
        let map: serde_json::Map<String, serde_json::Value> = self
            .workloads
            .iter()
            .map(|(name, m)| (name.clone(), m.to_json()))
            .collect();
        json!({ "workloads": map })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_labels_match_taxonomy() {
        assert_eq!(ErrorKind::CollectFailed.as_str(), "adapter.collect_failed");
        assert_eq!(ErrorKind::PredictFailed.as_str(), "model.predict_failed");
        assert_eq!(ErrorKind::PanicRecovered.as_str(), "runner.panic_recovered");
        assert_eq!(ErrorKind::ALL.len(), 7);
    }

    #[test]
    fn counters_accumulate_per_kind() {
        let m = WorkloadMetrics::new();
        m.record_error(ErrorKind::CollectFailed);
        m.record_error(ErrorKind::CollectFailed);
        m.record_error(ErrorKind::TrainFailed);
        assert_eq!(m.error_count(ErrorKind::CollectFailed), 2);
        assert_eq!(m.error_count(ErrorKind::TrainFailed), 1);
        assert_eq!(m.error_count(ErrorKind::StorePutFailed), 0);
    }

    #[test]
    fn forecast_age_none_until_first_success() {
        let m = WorkloadMetrics::new();
        assert!(m.forecast_age_seconds().is_none());
        m.tick_succeeded(42.0, 3);
        let age = m.forecast_age_seconds().unwrap();
        assert!(age <= 1);
    }

    #[test]
    fn gauges_reflect_latest_tick() {
        let m = WorkloadMetrics::new();
        m.tick_succeeded(120.5, 4);
        let dump = m.to_json();
        assert!((dump["predicted_value"].as_f64().unwrap() - 120.5).abs() < 1e-12);
        assert_eq!(dump["desired_replicas"], 4);
        assert_eq!(dump["ticks_succeeded"], 1);
    }

    #[test]
    fn registry_only_knows_configured_workloads() {
        let registry = MetricsRegistry::new(["api".to_string(), "worker".to_string()]);
        assert!(registry.workload("api").is_some());
        assert!(registry.workload("ghost").is_none());
        let dump = registry.to_json();
        assert!(dump["workloads"]["api"].is_object());
        assert!(dump["workloads"]["worker"].is_object());
    }
}
