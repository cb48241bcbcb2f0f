pub mod admin;
pub mod gaming;
pub mod health;
pub mod orgs;
pub mod realtime;

use axum::extract::DefaultBodyLimit;
use axum::Router;

use crate::middleware::request_id;
use crate::state::AppState;

/// Signal and activity batches stay well under this.
const MAX_BODY_SIZE: usize = 2 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    let org_routes = Router::new()
        .merge(orgs::router())
        .merge(gaming::router())
        .merge(realtime::router());

    let api_routes = Router::new()
        .nest("/orgs", org_routes)
        .nest("/admin", admin::router())
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE));

    Router::new()
        .nest("/api", api_routes)
        .nest("/health", health::router())
        .layer(axum::middleware::from_fn(request_id::request_id_middleware))
        .with_state(state)
}
