use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

use crate::evi::config::EviConfig;
use crate::evi::error::EngineError;
use crate::extractors::JsonBody;
use crate::response::{ok, AppError};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/config", get(get_config).put(put_config))
}

async fn get_config(State(state): State<AppState>) -> impl IntoResponse {
    ok(state.engine().get_config().await)
}

/// Swaps the engine tuning. Rejected configs leave the running one in place.
async fn put_config(
    State(state): State<AppState>,
    JsonBody(config): JsonBody<EviConfig>,
) -> Result<impl IntoResponse, AppError> {
    state
        .engine()
        .reload_config(config)
        .await
        .map_err(EngineError::InvalidConfig)?;
    Ok(ok(state.engine().get_config().await))
}
