// =============================================================================
// Multi-workload Supervisor — fan-out, fan-in, first-error reporting
// =============================================================================
//
// Spawns one long-running task per workload runner and waits for all of
// them. Runners never communicate; isolation comes from disjoint bindings
// and independent tickers, with the shared snapshot store as the only
// common object. A runner that dies (recovered panic) takes nothing else
// down: its error is recorded and the siblings keep ticking until shutdown.
// =============================================================================

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{error, info};

use crate::runner::Runner;

pub struct Supervisor {
    runners: Vec<Runner>,
}

impl Supervisor {
    pub fn new(runners: Vec<Runner>) -> Self {
        Self { runners }
    }

    /// Run every workload until `shutdown` fires or a runner fails. All
    /// errors are logged; the first non-shutdown error is returned after
    /// every runner has stopped.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.runners.is_empty() {
            bail!("no workloads configured; at least one runner is required");
        }

        info!(count = self.runners.len(), "supervisor starting runners");

        let mut handles = Vec::with_capacity(self.runners.len());
        for runner in self.runners {
            let name = runner.name().to_string();
            handles.push((name, tokio::spawn(runner.run(shutdown.clone()))));
        }

        let mut first_error: Option<anyhow::Error> = None;
        for (name, handle) in handles {
            match handle.await {
                Ok(Ok(())) => {
                    info!(workload = %name, "runner stopped cleanly");
                }
                Ok(Err(e)) => {
                    error!(workload = %name, error = %e, "runner exited with error");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_err) => {
                    error!(workload = %name, error = %join_err, "runner task aborted");
                    if first_error.is_none() {
                        first_error = Some(
                            anyhow::Error::new(join_err)
                                .context(format!("runner '{name}' task aborted")),
                        );
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e).context("one or more runners failed"),
            None => Ok(()),
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::Utc;
    use tokio::time::Duration;

    use crate::frame::DataFrame;
    use crate::metrics::MetricsRegistry;
    use crate::model::{BaselineModel, Model};
    use crate::planner::Policy;
    use crate::runner::WorkloadBinding;
    use crate::source::{MockSource, Source, SourceError};
    use crate::store::{MemoryStore, SnapshotStore};

    fn synthetic_window(len: i64) -> DataFrame {
        let now = Utc::now().timestamp();
        let points = (0..len).map(|i| (now - 60 * (len - 1 - i), 100.0 + i as f64));
        DataFrame::from_points(points)
    }

    fn runner(name: &str, source: Source, store: &Arc<SnapshotStore>) -> Runner {
        let binding = WorkloadBinding {
            name: name.to_string(),
            metric: "requests_per_second".to_string(),
            source,
            model: Model::Baseline(BaselineModel::new("requests_per_second", 300, 60)),
            policy: Policy::default(),
            store: store.clone(),
            horizon_seconds: 300,
            step_seconds: 60,
            window_seconds: 1800,
            tick_interval: Duration::from_millis(40),
        };
        let registry = MetricsRegistry::new([name.to_string()]);
        Runner::new(binding, registry.workload(name).unwrap())
    }

    #[tokio::test]
    async fn empty_runner_set_is_a_config_error() {
        let (_tx, rx) = watch::channel(false);
        let err = Supervisor::new(Vec::new()).run(rx).await.unwrap_err();
        assert!(err.to_string().contains("at least one runner"));
    }

    #[tokio::test]
    async fn faulty_workload_does_not_starve_its_sibling() {
        let store = Arc::new(SnapshotStore::Memory(MemoryStore::new(None)));

        // Workload A: adapter permanently down. Workload B: healthy.
        let a = runner(
            "flaky",
            Source::Mock(MockSource::new(|_| {
                Err(SourceError::Unavailable("connection refused".into()))
            })),
            &store,
        );
        let b = runner(
            "steady",
            Source::Mock(MockSource::new(|_| Ok(synthetic_window(30)))),
            &store,
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Supervisor::new(vec![a, b]).run(rx));

        tokio::time::sleep(Duration::from_millis(150)).await;

        // B produced snapshots; A produced none; the supervisor is alive.
        assert!(store.get_latest("steady").await.unwrap().is_some());
        assert!(store.get_latest("flaky").await.unwrap().is_none());
        assert!(!handle.is_finished());

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor should stop promptly")
            .unwrap();
        // Adapter failures are retried per tick, not escalated.
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn panicking_runner_terminates_alone_and_is_reported() {
        let store = Arc::new(SnapshotStore::Memory(MemoryStore::new(None)));

        let a = runner(
            "doomed",
            Source::Mock(MockSource::new(|_| panic!("adapter exploded"))),
            &store,
        );
        let b = runner(
            "steady",
            Source::Mock(MockSource::new(|_| Ok(synthetic_window(30)))),
            &store,
        );

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Supervisor::new(vec![a, b]).run(rx));

        tokio::time::sleep(Duration::from_millis(150)).await;

        // The sibling kept producing snapshots after the panic.
        assert!(store.get_latest("steady").await.unwrap().is_some());
        assert!(!handle.is_finished(), "supervisor waits for all runners");

        tx.send(true).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("supervisor should stop promptly")
            .unwrap();

        // The panic surfaces as the first (and only) runner error.
        let err = result.unwrap_err();
        assert!(format!("{err:#}").contains("panicked"));
    }
}
