// =============================================================================
// Shared Application State
// =============================================================================
//
// The read side's view of the engine: the immutable configuration, the
// snapshot store the runners write into, and the metrics registry. Wrapped
// in an Arc and handed to every API handler.
//
// There is deliberately no process-wide mutable state here: each runner
// owns its own pipeline state, and the store is the only object shared
// between the write and read paths.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use crate::config::{Config, WorkloadConfig};
use crate::metrics::MetricsRegistry;
use crate::store::SnapshotStore;

pub struct AppState {
    pub config: Config,
    pub store: Arc<SnapshotStore>,
    pub metrics: Arc<MetricsRegistry>,
    /// Instant when the engine was started. Used for uptime reporting.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: Config, store: Arc<SnapshotStore>, metrics: Arc<MetricsRegistry>) -> Self {
        Self {
            config,
            store,
            metrics,
            start_time: Instant::now(),
        }
    }

    /// Configuration entry for a workload, if one exists.
    pub fn workload_config(&self, name: &str) -> Option<&WorkloadConfig> {
        self.config.workloads.iter().find(|w| w.name == name)
    }
}
