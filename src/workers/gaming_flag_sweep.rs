use std::collections::BTreeSet;

use chrono::{Duration, Utc};

use crate::evi::engine::EviEngine;

/// Matches the hourly sweep cron, with slack for a late firing.
const LOOKBACK_MINUTES: i64 = 90;

/// Re-ticks orgs whose gaming flags lapsed since the last sweep so the lifted
/// penalty shows up in a fresh snapshot instead of waiting for the daily tick.
pub async fn run(engine: &EviEngine) {
    let now = Utc::now();
    let expired = match engine.flags_expired_since(now, Duration::minutes(LOOKBACK_MINUTES)) {
        Ok(flags) => flags,
        Err(e) => {
            tracing::error!(error = %e, "gaming_flag_sweep failed");
            return;
        }
    };
    if expired.is_empty() {
        tracing::debug!("gaming_flag_sweep: nothing expired");
        return;
    }

    let orgs: BTreeSet<String> = expired.iter().map(|f| f.org_id.clone()).collect();
    for flag in &expired {
        tracing::info!(
            org_id = %flag.org_id,
            flag_id = %flag.id,
            pattern = flag.pattern_type.as_str(),
            "Gaming flag expired"
        );
    }
    let mut refreshed = 0usize;
    for org_id in &orgs {
        match engine.run_tick_at(org_id, true, now).await {
            Ok(_) => refreshed += 1,
            Err(e) => tracing::warn!(org_id = %org_id, error = %e, "Post-expiry tick failed"),
        }
    }
    tracing::info!(expired = expired.len(), refreshed, "gaming_flag_sweep: done");
}
