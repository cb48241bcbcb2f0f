use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;

use crate::extractors::JsonBody;
use crate::response::{created, ok, AppError};
use crate::state::AppState;

const MAX_REASON_LEN: usize = 1000;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/:org_id/gaming-flags", get(list_flags))
        .route("/:org_id/gaming-flags/:flag_id/override", post(override_flag))
        .route("/:org_id/quarantine", get(list_quarantine))
}

async fn list_flags(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.engine().list_flags(&org_id)?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideRequest {
    operator: String,
    reason: String,
}

async fn override_flag(
    State(state): State<AppState>,
    Path((org_id, flag_id)): Path<(String, String)>,
    JsonBody(req): JsonBody<OverrideRequest>,
) -> Result<impl IntoResponse, AppError> {
    let operator = req.operator.trim();
    let reason = req.reason.trim();
    if operator.is_empty() || reason.is_empty() {
        return Err(AppError::bad_request(
            "OVERRIDE_INCOMPLETE",
            "operator and reason are required",
        ));
    }
    if reason.len() > MAX_REASON_LEN {
        return Err(AppError::bad_request("OVERRIDE_REASON_TOO_LONG", "reason is too long"));
    }
    let record = state
        .engine()
        .override_flag(&org_id, &flag_id, operator, reason)
        .await?;
    Ok(created(record))
}

async fn list_quarantine(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    Ok(ok(state.engine().list_quarantine(&org_id)?))
}
