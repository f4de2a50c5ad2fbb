// =============================================================================
// Borealis Predictive Autoscaler — Main Entry Point
// =============================================================================
//
// Pulls recent load metrics for each configured workload, forecasts the
// short-horizon future, converts the forecast into desired replica counts
// under a capacity policy, and serves the resulting snapshots to external
// autoscaling controllers over HTTP.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod config;
mod features;
mod frame;
mod metrics;
mod model;
mod planner;
mod runner;
mod source;
mod state;
mod store;
mod supervisor;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::metrics::MetricsRegistry;
use crate::runner::{Runner, WorkloadBinding};
use crate::state::AppState;
use crate::store::{MemoryStore, SnapshotStore};
use crate::supervisor::Supervisor;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Borealis Predictive Autoscaler — Starting Up      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config_path =
        std::env::var("BOREALIS_CONFIG").unwrap_or_else(|_| "borealis.json".into());
    let mut config = Config::load(&config_path).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        Config::default()
    });

    // Override the bind address from env if available.
    if let Ok(addr) = std::env::var("BOREALIS_BIND_ADDR") {
        config.bind_addr = addr;
    }

    config.validate()?;

    let workload_names: Vec<String> =
        config.workloads.iter().map(|w| w.name.clone()).collect();
    info!(workloads = ?workload_names, "configured workloads");

    // ── 2. Build shared state ────────────────────────────────────────────
    let ttl = if config.snapshot_ttl_seconds > 0 {
        Some(Duration::from_secs(config.snapshot_ttl_seconds))
    } else {
        None
    };
    let store = Arc::new(SnapshotStore::Memory(MemoryStore::new(ttl)));
    let metrics = Arc::new(MetricsRegistry::new(workload_names.clone()));

    // ── 3. Build workload runners ────────────────────────────────────────
    let mut runners = Vec::with_capacity(config.workloads.len());
    for workload in &config.workloads {
        let binding = WorkloadBinding::from_config(workload, store.clone())?;
        let sink = metrics
            .workload(&workload.name)
            .expect("metrics pre-registered for every configured workload");
        info!(
            workload = %workload.name,
            source = binding.source.name(),
            model = binding.model.name(),
            horizon_seconds = workload.horizon_seconds,
            step_seconds = workload.step_seconds,
            "workload bound"
        );
        runners.push(Runner::new(binding, sink));
    }

    // ── 4. Start the API server ──────────────────────────────────────────
    let app_state = Arc::new(AppState::new(config.clone(), store.clone(), metrics.clone()));
    let bind_addr = config.bind_addr.clone();
    tokio::spawn(async move {
        let app = api::rest::router(app_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app).await.expect("API server failed");
    });

    // ── 5. Run the supervisor until shutdown ─────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut supervisor_handle = tokio::spawn(Supervisor::new(runners).run(shutdown_rx));

    info!("All subsystems running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            warn!("Shutdown signal received — stopping gracefully");
            let _ = shutdown_tx.send(true);
            match supervisor_handle.await {
                Ok(Ok(())) => info!("supervisor stopped cleanly"),
                Ok(Err(e)) => error!(error = %e, "supervisor reported an error"),
                Err(e) => error!(error = %e, "supervisor task failed"),
            }
        }
        result = &mut supervisor_handle => {
            match result {
                Ok(Ok(())) => warn!("all runners stopped"),
                Ok(Err(e)) => error!(error = %e, "supervisor exited with error"),
                Err(e) => error!(error = %e, "supervisor task failed"),
            }
        }
    }

    info!("Borealis shut down complete.");
    Ok(())
}
