use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/live", get(liveness))
        .route("/ready", get(readiness))
        .route("/database", get(database_health))
}

fn probe_store(state: &AppState) -> (bool, u64) {
    let start = Instant::now();
    let healthy = state.store().get_profile("__health_check__").is_ok();
    (healthy, start.elapsed().as_micros() as u64)
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (healthy, _) = probe_store(&state);
    Json(serde_json::json!({
        "status": if healthy { "ok" } else { "degraded" },
        "uptimeSecs": state.uptime_secs(),
        "store": { "healthy": healthy },
    }))
}

pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

pub async fn readiness(State(state): State<AppState>) -> StatusCode {
    if probe_store(&state).0 {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

pub async fn database_health(State(state): State<AppState>) -> impl IntoResponse {
    let (healthy, latency_us) = probe_store(&state);
    let schema_version = crate::store::migrate::get_current_version(state.store()).ok();
    Json(serde_json::json!({
        "healthy": healthy,
        "latencyUs": latency_us,
        "schemaVersion": schema_version,
    }))
}
