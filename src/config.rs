// =============================================================================
// Engine Configuration — workload bindings loaded at startup
// =============================================================================
//
// Central configuration hub for the Borealis engine. One entry per workload
// binds a metric source, a forecast model, and a capacity policy to a named
// scaling target.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash. All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
// =============================================================================

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::planner::Policy;
use crate::store::is_valid_workload_name;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_bind_addr() -> String {
    "0.0.0.0:8090".to_string()
}

fn default_metric() -> String {
    "requests_per_second".to_string()
}

fn default_horizon_seconds() -> i64 {
    300
}

fn default_step_seconds() -> i64 {
    60
}

fn default_window_seconds() -> i64 {
    3600
}

fn default_tick_interval_seconds() -> u64 {
    30
}

fn default_arima_order() -> usize {
    1
}

// =============================================================================
// Source / model selection
// =============================================================================

/// Which adapter a workload pulls its metric from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceConfig {
    /// Prometheus query API.
    Prometheus {
        url: String,
        query: String,
        #[serde(default = "default_step_seconds")]
        step_seconds: i64,
    },
    /// VictoriaMetrics speaks the same query API; only the URL differs.
    VictoriaMetrics {
        url: String,
        query: String,
        #[serde(default = "default_step_seconds")]
        step_seconds: i64,
    },
    /// Plain JSON feed of { ts, value } samples.
    Http {
        url: String,
        #[serde(default)]
        bearer_token: Option<String>,
    },
}

/// Which forecast model a workload trains each tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelConfig {
    Baseline,
    Arima {
        #[serde(default = "default_arima_order")]
        p: usize,
        #[serde(default = "default_arima_order")]
        d: usize,
        #[serde(default = "default_arima_order")]
        q: usize,
    },
    Sarima {
        #[serde(default = "default_arima_order")]
        p: usize,
        #[serde(default = "default_arima_order")]
        d: usize,
        #[serde(default = "default_arima_order")]
        q: usize,
        #[serde(default)]
        seasonal_p: usize,
        #[serde(default)]
        seasonal_d: usize,
        #[serde(default)]
        seasonal_q: usize,
        season_length: usize,
    },
    External {
        url: String,
    },
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::Baseline
    }
}

// =============================================================================
// WorkloadConfig
// =============================================================================

/// One scaling target: where its load comes from, how it is forecast, and
/// how the forecast turns into replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadConfig {
    /// Workload name; also the snapshot key.
    pub name: String,

    /// Metric label recorded in snapshots.
    #[serde(default = "default_metric")]
    pub metric: String,

    /// Total future duration covered by each forecast.
    #[serde(default = "default_horizon_seconds")]
    pub horizon_seconds: i64,

    /// Interval between adjacent forecast points.
    #[serde(default = "default_step_seconds")]
    pub step_seconds: i64,

    /// Look-back window pulled from the source each tick.
    #[serde(default = "default_window_seconds")]
    pub window_seconds: i64,

    /// Pipeline cadence for this workload.
    #[serde(default = "default_tick_interval_seconds")]
    pub tick_interval_seconds: u64,

    /// Snapshots older than this are marked stale by the read API.
    /// Defaults to twice the tick interval.
    #[serde(default)]
    pub stale_after_seconds: Option<u64>,

    pub source: SourceConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub policy: Policy,
}

impl WorkloadConfig {
    /// Effective staleness threshold for the read API.
    pub fn stale_after_seconds(&self) -> u64 {
        self.stale_after_seconds
            .unwrap_or(self.tick_interval_seconds.saturating_mul(2))
    }
}

// =============================================================================
// Config
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind address for the snapshot read API.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Optional TTL for stored snapshots, in seconds. 0 or absent keeps
    /// snapshots until overwritten.
    #[serde(default)]
    pub snapshot_ttl_seconds: u64,

    /// The workloads to forecast and plan for.
    #[serde(default)]
    pub workloads: Vec<WorkloadConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            snapshot_ttl_seconds: 0,
            workloads: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        info!(
            path = %path.display(),
            workloads = config.workloads.len(),
            bind_addr = %config.bind_addr,
            "config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "config saved (atomic)");
        Ok(())
    }

    /// Reject configurations the engine cannot start with: no workloads,
    /// invalid names, or non-positive core parameters.
    pub fn validate(&self) -> Result<()> {
        if self.workloads.is_empty() {
            bail!("at least one workload must be configured");
        }

        for w in &self.workloads {
            if !is_valid_workload_name(&w.name) {
                bail!("invalid workload name '{}'", w.name);
            }
            if w.policy.target_per_pod <= 0.0 {
                bail!("workload '{}': target_per_pod must be positive", w.name);
            }
            if w.step_seconds <= 0 {
                bail!("workload '{}': step_seconds must be positive", w.name);
            }
            if w.horizon_seconds <= 0 {
                bail!("workload '{}': horizon_seconds must be positive", w.name);
            }
            if w.window_seconds <= 0 {
                bail!("workload '{}': window_seconds must be positive", w.name);
            }
            if w.tick_interval_seconds == 0 {
                bail!("workload '{}': tick_interval_seconds must be positive", w.name);
            }
        }

        let mut names: Vec<&str> = self.workloads.iter().map(|w| w.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != self.workloads.len() {
            bail!("workload names must be unique");
        }

        Ok(())
    }
}
