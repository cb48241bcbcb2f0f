use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures::Stream;
use tokio::sync::broadcast::error::RecvError;

use crate::response::AppError;
use crate::state::AppState;
use crate::store::keys;

const MAX_SSE_CONNECTIONS: usize = 512;

static SSE_CONNECTION_COUNT: AtomicUsize = AtomicUsize::new(0);

struct SseGuard;

impl Drop for SseGuard {
    fn drop(&mut self) {
        SSE_CONNECTION_COUNT.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn router() -> Router<AppState> {
    Router::new().route("/:org_id/events", get(snapshot_events))
}

/// Streams `SnapshotComputed` for one org as `snapshot_computed` events.
pub async fn snapshot_events(
    State(state): State<AppState>,
    Path(org_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    keys::org_prefix(&org_id)?;
    let current = SSE_CONNECTION_COUNT.fetch_add(1, Ordering::SeqCst);
    if current >= MAX_SSE_CONNECTIONS {
        SSE_CONNECTION_COUNT.fetch_sub(1, Ordering::SeqCst);
        return Err(AppError::too_many_requests("Too many SSE connections"));
    }
    let guard = SseGuard;

    // Subscribe before returning so nothing committed after the handshake is missed.
    let mut events = state.engine().subscribe();
    let mut shutdown_rx = state.shutdown_rx();

    let stream = async_stream::stream! {
        let _guard = guard;
        loop {
            tokio::select! {
                received = events.recv() => match received {
                    Ok(event) if event.org_id == org_id => {
                        match serde_json::to_string(&event) {
                            Ok(json) => {
                                yield Ok(Event::default()
                                    .event("snapshot_computed")
                                    .id(event.snapshot_id.clone())
                                    .data(json));
                            }
                            Err(e) => tracing::error!(error = %e, "Failed to encode snapshot event"),
                        }
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(org_id = %org_id, skipped, "SSE subscriber lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}
