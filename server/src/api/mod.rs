//! API Router and Application State
//!
//! Central routing configuration and shared state. The HTTP surface here is
//! operational: liveness, resilience status, and join-code resolution. The
//! quiz protocol itself rides the realtime transport.

pub mod error;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use qz_common::JoinCode;

use crate::alerts::AlertSink;
use crate::batcher::{AnswerBatcher, BatcherStats};
use crate::breaker::BreakerStatus;
use crate::cache::{CacheFacade, CacheStatus};
use crate::config::Config;
use crate::observability::{OpStats, PerfMonitor};
use crate::recovery::{RecoveryWorker, SessionRecoveryService, WorkerStats, WorkerStatus};
use crate::store::StoreFacade;

pub use error::ApiError;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Cache facade (sessions, participants, leaderboards, rate limits)
    pub cache: Arc<CacheFacade>,
    /// Breaker-wrapped durable store
    pub store: Arc<StoreFacade>,
    /// Write-behind answer batcher
    pub batcher: Arc<AnswerBatcher>,
    /// Pending-write recovery worker
    pub worker: Arc<RecoveryWorker>,
    /// Session recovery service
    pub session_recovery: Arc<SessionRecoveryService>,
    /// Operation timing sink
    pub perf: Arc<PerfMonitor>,
    /// Alert fan-out
    pub alerts: Arc<AlertSink>,
    /// Server configuration
    pub config: Arc<Config>,
}

/// Build the router with tracing and permissive CORS (operational surface).
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/status", get(status))
        .route("/api/status/breaker/reset", post(reset_breaker))
        .route("/api/joincode/{code}", get(resolve_join_code))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Liveness plus component health.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let store_ok = state.store.raw().ping().await.is_ok();
    let cache_ok = state.cache.ping().await.is_ok();
    Json(json!({
        "status": if store_ok && cache_ok { "ok" } else { "degraded" },
        "store": store_ok,
        "cache": cache_ok,
        "cacheFallbackMode": state.cache.fallback_mode(),
        "breaker": state.store.breaker().status(),
    }))
}

/// Operational snapshot of the resilience substrate.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusBody {
    breaker: BreakerStatus,
    cache: CacheStatus,
    store_unavailable: bool,
    pending_writes: i64,
    batcher: BatcherStats,
    batcher_buffer: usize,
    batcher_failed: usize,
    worker_status: WorkerStatus,
    worker: WorkerStats,
    perf: std::collections::HashMap<&'static str, OpStats>,
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusBody>, ApiError> {
    let pending = state.store.pending();
    Ok(Json(StatusBody {
        breaker: state.store.breaker().status(),
        cache: state.cache.status(),
        store_unavailable: pending.is_unavailable().await?,
        pending_writes: pending.count().await?,
        batcher: state.batcher.stats(),
        batcher_buffer: state.batcher.buffer_size(),
        batcher_failed: state.batcher.get_failed_answers().len(),
        worker_status: state.worker.status(),
        worker: state.worker.get_stats(),
        perf: state.perf.snapshot(),
    }))
}

/// Manually close the store breaker (operator action).
async fn reset_breaker(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.store.breaker().reset();
    Json(json!({ "success": true, "breaker": state.store.breaker().status() }))
}

/// Resolve a join code to its session id.
async fn resolve_join_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let code = JoinCode::new(code.to_uppercase());
    match state.cache.get_join_code(&code).await? {
        Some(session_id) => Ok(Json(json!({
            "success": true,
            "sessionId": session_id,
        }))),
        None => Err(ApiError::not_found()),
    }
}
