use chrono::Utc;

use crate::evi::engine::EviEngine;

/// Daily tick for every known org. A missed day is absorbed by the next run
/// since decay is computed over the actual elapsed time.
pub async fn run(engine: &EviEngine) {
    tracing::debug!("decay_tick: start");
    match engine.tick_all(Utc::now()).await {
        Ok(summary) => tracing::info!(
            ticked = summary.ticked,
            failed = summary.failed,
            "decay_tick: done"
        ),
        Err(e) => tracing::error!(error = %e, "decay_tick failed"),
    }
}
