use crate::api::AppState;
use axum::{routing::get, Router, extract::State, http::StatusCode, Json};
use serde_json::{json, Value};
use std::sync::atomic::Ordering;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/readyz", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/_build", get(build_handler))
        .route("/_state", get(state_handler))
}

async fn health_handler() -> Json<Value> {
    Json(json!({"ok": true}))
}

async fn ready_handler(State(state): State<AppState>) -> (StatusCode, &'static str) {
    if state.draining.load(Ordering::SeqCst) {
        (StatusCode::SERVICE_UNAVAILABLE, "DRAINING")
    } else if state.readiness.load(Ordering::SeqCst) {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT_READY")
    }
}

async fn build_handler(State(state): State<AppState>) -> String {
    state.version.clone()
}

async fn metrics_handler(State(state): State<AppState>) -> (StatusCode, String) {
    let data = state.metrics.encode();
    (StatusCode::OK, String::from_utf8_lossy(&data).to_string())
}

async fn state_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let draining = state.draining.load(Ordering::SeqCst);
    let ready = state.readiness.load(Ordering::SeqCst) && !draining;
    let in_progress = state.metrics.jobs_in_progress.get().max(0);
    let max = state.max_concurrency as f64;
    let load = if max == 0.0 { 0.0 } else { (in_progress as f64 / max).clamp(0.0, 1.0) };
    let body = json!({
        "ready": ready,
        "draining": draining,
        "inProgress": in_progress,
        "queued": state.metrics.jobs_queued.get().max(0),
        "load": load,
    });
    let code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body))
}
