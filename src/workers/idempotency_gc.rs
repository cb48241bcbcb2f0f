use chrono::Utc;

use crate::evi::engine::EviEngine;

pub async fn run(engine: &EviEngine) {
    match engine.sweep_idempotency_keys(Utc::now()).await {
        Ok(removed) => tracing::info!(removed, "idempotency_gc: done"),
        Err(e) => tracing::error!(error = %e, "idempotency_gc failed"),
    }
}
