use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::Router;
use serde::Deserialize;

use crate::evi::forecast::ForecastRequest;
use crate::evi::normalizer::SignalBatch;
use crate::evi::types::{ActivityEvent, ShockEvent};
use crate::extractors::JsonBody;
use crate::response::{created, ok, AppError};
use crate::state::AppState;

const DEFAULT_SNAPSHOT_LIMIT: usize = 50;
const MAX_SNAPSHOT_LIMIT: usize = 500;
const MAX_ACTIVITY_BATCH: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_orgs))
        .route("/:org_id/signals", post(ingest_signals))
        .route("/:org_id/activity", post(ingest_activity))
        .route("/:org_id/shocks", post(ingest_shock))
        .route("/:org_id/shocks/:shock_id/response", put(set_shock_response))
        .route("/:org_id/tick", post(manual_tick))
        .route("/:org_id/snapshots", get(list_snapshots))
        .route("/:org_id/snapshots/latest", get(latest_snapshot))
        .route("/:org_id/forecast", post(forecast))
}

async fn list_orgs(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.engine().list_org_ids()?))
}

async fn ingest_signals(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    JsonBody(batch): JsonBody<SignalBatch>,
) -> Result<impl IntoResponse, AppError> {
    if batch.signals.is_empty() {
        return Err(AppError::bad_request("EMPTY_BATCH", "signals must not be empty"));
    }
    let result = state.engine().ingest_signals(&org_id, &batch).await?;
    Ok(created(result))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityBatchRequest {
    events: Vec<ActivityEvent>,
}

async fn ingest_activity(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    JsonBody(req): JsonBody<ActivityBatchRequest>,
) -> Result<impl IntoResponse, AppError> {
    if req.events.len() > MAX_ACTIVITY_BATCH {
        return Err(AppError::bad_request(
            "BATCH_TOO_LARGE",
            &format!("at most {MAX_ACTIVITY_BATCH} events per batch"),
        ));
    }
    let result = state.engine().ingest_activity(&org_id, &req.events).await?;
    Ok(ok(result))
}

async fn ingest_shock(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    JsonBody(event): JsonBody<ShockEvent>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.engine().ingest_shock(&org_id, event).await?;
    Ok(created(snapshot))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ShockResponseRequest {
    active: bool,
    recovery_rate: Option<f64>,
}

async fn set_shock_response(
    State(state): State<AppState>,
    Path((org_id, shock_id)): Path<(String, String)>,
    JsonBody(req): JsonBody<ShockResponseRequest>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state
        .engine()
        .set_shock_response(&org_id, &shock_id, req.active, req.recovery_rate)
        .await?;
    Ok(ok(snapshot))
}

async fn manual_tick(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = state.engine().run_tick(&org_id, false).await?;
    Ok(created(snapshot))
}

#[derive(Debug, Deserialize)]
struct SnapshotListQuery {
    limit: Option<usize>,
}

async fn list_snapshots(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    Query(q): Query<SnapshotListQuery>,
) -> Result<impl IntoResponse, AppError> {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_SNAPSHOT_LIMIT)
        .clamp(1, MAX_SNAPSHOT_LIMIT);
    Ok(ok(state.engine().list_snapshots(&org_id, limit)?))
}

async fn latest_snapshot(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.engine().latest_snapshot(&org_id)?))
}

async fn forecast(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
    JsonBody(req): JsonBody<ForecastRequest>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.engine().forecast(&org_id, &req).await?))
}
