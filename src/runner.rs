// =============================================================================
// Workload Runner — one forecast pipeline per scaling target
// =============================================================================
//
// Each runner owns an immutable binding (source, model, policy, shared
// store) plus the only piece of mutable pipeline state: the last emitted
// desired-replica count, used as `prev` for the next tick's change clamps.
//
// The run loop performs one immediate tick, then ticks on its own interval
// until the supervisor signals shutdown. Missed ticks are skipped, never
// queued: a slow tick simply delays to the next schedule.
//
// One tick: collect -> build features -> train -> predict -> plan -> store.
// Every stage has its own deadline and the whole tick a superseding 30 s
// deadline. Train failures are non-fatal; any other stage failure ends the
// tick without storing. A panic anywhere in the tick is recovered, counted,
// and terminates this runner only — the supervisor records the error while
// sibling workloads keep running.
// =============================================================================

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::WorkloadConfig;
use crate::features::build_features;
use crate::metrics::{ErrorKind, Stage, WorkloadMetrics};
use crate::model::Model;
use crate::planner::{plan, Policy};
use crate::source::Source;
use crate::store::{Snapshot, SnapshotStore};

/// Deadline for one whole tick.
const TICK_TIMEOUT: Duration = Duration::from_secs(30);
/// Per-stage budgets.
const COLLECT_TIMEOUT: Duration = Duration::from_secs(10);
const TRAIN_TIMEOUT: Duration = Duration::from_secs(5);
const PREDICT_TIMEOUT: Duration = Duration::from_secs(2);
const STORE_TIMEOUT: Duration = Duration::from_secs(2);

// =============================================================================
// WorkloadBinding
// =============================================================================

/// Everything a runner needs, fixed for its lifetime.
pub struct WorkloadBinding {
    pub name: String,
    pub metric: String,
    pub source: Source,
    pub model: Model,
    pub policy: Policy,
    pub store: Arc<SnapshotStore>,
    pub horizon_seconds: i64,
    pub step_seconds: i64,
    pub window_seconds: i64,
    pub tick_interval: Duration,
}

impl WorkloadBinding {
    /// Build the binding a workload configuration describes.
    pub fn from_config(config: &WorkloadConfig, store: Arc<SnapshotStore>) -> Result<Self> {
        let source = Source::from_config(&config.source);
        let model = Model::from_config(
            &config.model,
            &config.metric,
            config.horizon_seconds,
            config.step_seconds,
        )?;

        Ok(Self {
            name: config.name.clone(),
            metric: config.metric.clone(),
            source,
            model,
            policy: config.policy.clone(),
            store,
            horizon_seconds: config.horizon_seconds,
            step_seconds: config.step_seconds,
            window_seconds: config.window_seconds,
            tick_interval: Duration::from_secs(config.tick_interval_seconds),
        })
    }
}

// =============================================================================
// Runner
// =============================================================================

pub struct Runner {
    binding: WorkloadBinding,
    metrics: Arc<WorkloadMetrics>,
    /// Last emitted desired count; `prev` for the next plan.
    current_replicas: i64,
}

impl Runner {
    pub fn new(binding: WorkloadBinding, metrics: Arc<WorkloadMetrics>) -> Self {
        let current_replicas = binding.policy.min_replicas.max(0);
        Self {
            binding,
            metrics,
            current_replicas,
        }
    }

    pub fn name(&self) -> &str {
        &self.binding.name
    }

    /// Run until shutdown or a recovered panic. Ordinary tick failures are
    /// logged and retried on the next interval — the tick cadence is the
    /// retry cadence.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let name = self.binding.name.clone();
        let period = self.binding.tick_interval;

        info!(
            workload = %name,
            interval_ms = period.as_millis() as u64,
            model = self.binding.model.name(),
            source = self.binding.source.name(),
            "runner started"
        );

        // One immediate tick before the interval starts.
        self.guarded_tick().await?;

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!(workload = %name, "runner stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    self.guarded_tick().await?;
                }
            }
        }
    }

    /// One tick under the tick-wide deadline with panic recovery. Returns
    /// an error only for a recovered panic; the runner then terminates.
    async fn guarded_tick(&mut self) -> Result<()> {
        let name = self.binding.name.clone();

        match AssertUnwindSafe(timeout(TICK_TIMEOUT, self.tick()))
            .catch_unwind()
            .await
        {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => {
                warn!(workload = %name, error = %e, "tick failed");
                Ok(())
            }
            Ok(Err(_elapsed)) => {
                warn!(
                    workload = %name,
                    timeout_secs = TICK_TIMEOUT.as_secs(),
                    "tick deadline exceeded"
                );
                Ok(())
            }
            Err(panic) => {
                self.metrics.record_error(ErrorKind::PanicRecovered);
                let msg = panic_message(panic.as_ref());
                error!(
                    workload = %name,
                    kind = ErrorKind::PanicRecovered.as_str(),
                    panic = %msg,
                    "panic recovered; runner terminating"
                );
                Err(anyhow!("runner '{name}' panicked: {msg}"))
            }
        }
    }

    /// Count and label a fatal tick error.
    fn classified(&self, kind: ErrorKind, err: anyhow::Error) -> anyhow::Error {
        self.metrics.record_error(kind);
        err.context(kind.as_str())
    }

    /// One pass of the forecast pipeline.
    async fn tick(&mut self) -> Result<()> {
        self.metrics.tick_started();
        let binding = &self.binding;

        // ── 1. Collect ──────────────────────────────────────────────────
        let started = Instant::now();
        let frame = match timeout(
            COLLECT_TIMEOUT,
            binding.source.collect(binding.window_seconds),
        )
        .await
        {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                return Err(self.classified(ErrorKind::CollectFailed, anyhow::Error::new(e)))
            }
            Err(_) => {
                return Err(self.classified(
                    ErrorKind::CollectFailed,
                    anyhow!("collect timed out after {}s", COLLECT_TIMEOUT.as_secs()),
                ))
            }
        };
        self.metrics
            .record_stage_ms(Stage::Collect, started.elapsed().as_millis() as u64);

        // ── 2. Build features ───────────────────────────────────────────
        let features = match build_features(&frame) {
            Ok(f) => f,
            Err(e) => return Err(self.classified(ErrorKind::FeaturesBuildFailed, e)),
        };

        // ── 3. Train (non-fatal) ────────────────────────────────────────
        let started = Instant::now();
        match timeout(TRAIN_TIMEOUT, binding.model.train(&features)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_error(ErrorKind::TrainFailed);
                debug!(
                    workload = %binding.name,
                    kind = ErrorKind::TrainFailed.as_str(),
                    error = %e,
                    "training failed; predicting with previous state"
                );
            }
            Err(_) => {
                self.metrics.record_error(ErrorKind::TrainFailed);
                debug!(
                    workload = %binding.name,
                    kind = ErrorKind::TrainFailed.as_str(),
                    "training timed out; predicting with previous state"
                );
            }
        }
        self.metrics
            .record_stage_ms(Stage::Train, started.elapsed().as_millis() as u64);

        // ── 4. Predict ──────────────────────────────────────────────────
        let started = Instant::now();
        let forecast = match timeout(PREDICT_TIMEOUT, binding.model.predict(&features)).await {
            Ok(Ok(f)) => f,
            Ok(Err(e)) => {
                return Err(self.classified(ErrorKind::PredictFailed, anyhow::Error::new(e)))
            }
            Err(_) => {
                return Err(self.classified(
                    ErrorKind::PredictFailed,
                    anyhow!("predict timed out after {}s", PREDICT_TIMEOUT.as_secs()),
                ))
            }
        };
        self.metrics
            .record_stage_ms(Stage::Predict, started.elapsed().as_millis() as u64);

        // ── 5. Plan ─────────────────────────────────────────────────────
        let desired = plan(
            self.current_replicas,
            &forecast.values,
            binding.step_seconds,
            &binding.policy,
            forecast.quantiles.as_ref(),
        );

        // ── 6. Store ────────────────────────────────────────────────────
        let snapshot = Snapshot {
            workload: binding.name.clone(),
            metric: forecast.metric.clone(),
            generated_at: Utc::now(),
            step_seconds: binding.step_seconds,
            horizon_seconds: binding.horizon_seconds,
            values: forecast.values.clone(),
            desired_replicas: desired.clone(),
            quantiles: forecast.quantiles.clone(),
        };

        let started = Instant::now();
        match timeout(STORE_TIMEOUT, binding.store.put(snapshot)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(self.classified(ErrorKind::StorePutFailed, e)),
            Err(_) => {
                return Err(self.classified(
                    ErrorKind::StorePutFailed,
                    anyhow!("store timed out after {}s", STORE_TIMEOUT.as_secs()),
                ))
            }
        }
        self.metrics
            .record_stage_ms(Stage::Store, started.elapsed().as_millis() as u64);

        if let Some(&first) = desired.first() {
            self.current_replicas = first;
        }
        let predicted = forecast.values.first().copied().unwrap_or(0.0);
        self.metrics.tick_succeeded(predicted, self.current_replicas);

        debug!(
            workload = %binding.name,
            predicted = format!("{predicted:.2}"),
            desired = self.current_replicas,
            steps = forecast.values.len(),
            "tick complete"
        );
        Ok(())
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
