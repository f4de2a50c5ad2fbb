// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// The read surface an external autoscaling controller polls. All endpoints
// live under `/api/v1/`. Snapshot reads validate the workload name before
// touching the store and mark snapshots stale once their age strictly
// exceeds the workload's threshold (default: twice its tick interval).
//
// CORS is configured permissively for development; tighten
// `allowed_origins` in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::{Duration, Utc};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::debug;

use crate::state::AppState;
use crate::store::is_valid_workload_name;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/workloads", get(workloads))
        .route("/api/v1/snapshots/:workload", get(snapshot))
        .route("/api/v1/metrics", get(metrics))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
    workloads: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.start_time.elapsed().as_secs(),
        workloads: state.config.workloads.len(),
    })
}

// =============================================================================
// Workload listing
// =============================================================================

#[derive(Serialize)]
struct WorkloadSummary {
    name: String,
    metric: String,
    horizon_seconds: i64,
    step_seconds: i64,
    tick_interval_seconds: u64,
}

async fn workloads(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let list: Vec<WorkloadSummary> = state
        .config
        .workloads
        .iter()
        .map(|w| WorkloadSummary {
            name: w.name.clone(),
            metric: w.metric.clone(),
            horizon_seconds: w.horizon_seconds,
            step_seconds: w.step_seconds,
            tick_interval_seconds: w.tick_interval_seconds,
        })
        .collect();
    Json(list)
}

// =============================================================================
// Snapshot read
// =============================================================================

async fn snapshot(
    State(state): State<Arc<AppState>>,
    Path(workload): Path<String>,
) -> impl IntoResponse {
    // Reject malformed names before any store access.
    if !is_valid_workload_name(&workload) {
        let body = serde_json::json!({ "error": "invalid workload name" });
        return (StatusCode::BAD_REQUEST, Json(body)).into_response();
    }

    let Some(workload_config) = state.workload_config(&workload) else {
        let body = serde_json::json!({ "error": "unknown workload" });
        return (StatusCode::NOT_FOUND, Json(body)).into_response();
    };

    match state.store.get_latest(&workload).await {
        Ok(Some(snap)) => {
            let stale_after = Duration::seconds(workload_config.stale_after_seconds() as i64);
            let stale = snap.is_stale(Utc::now(), stale_after);

            // Readers may still use a stale snapshot; it is marked, not
            // withheld.
            let mut body =
                serde_json::to_value(&snap).unwrap_or_else(|_| serde_json::json!({}));
            if let Some(map) = body.as_object_mut() {
                map.insert("stale".to_string(), serde_json::json!(stale));
            }

            debug!(workload = %workload, stale, "snapshot served");
            Json(body).into_response()
        }
        Ok(None) => {
            let body = serde_json::json!({ "error": "no snapshot for workload" });
            (StatusCode::NOT_FOUND, Json(body)).into_response()
        }
        Err(e) => {
            let body = serde_json::json!({ "error": format!("store read failed: {e}") });
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

// =============================================================================
// Metrics dump
// =============================================================================

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.to_json())
}
