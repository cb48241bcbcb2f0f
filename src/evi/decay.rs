use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::evi::config::DecayConfig;
use crate::evi::types::{weeks_between, Anomaly, DecayState, SubMetric, SubMetricState};

/// `value × e^(−λ×Δt)` with Δt in weeks.
pub fn decayed_value(value: f64, lambda_per_week: f64, weeks: f64) -> f64 {
    value * (-lambda_per_week * weeks.max(0.0)).exp()
}

/// Decay state for a sub-metric seen for the first time.
pub fn initial_state(metric: SubMetric, anchored_at: DateTime<Utc>) -> DecayState {
    DecayState {
        metric,
        last_reinforced_at: None,
        anchored_at,
    }
}

/// Brings every stored sub-metric value current at `now`.
///
/// Each sub-metric decays over its own elapsed time since it was last anchored,
/// then is re-anchored at `now`. `rate_multiplier` scales every λ (1.5 while
/// negative momentum is flagged). A clock that runs backwards yields zero decay
/// plus a `ClockSkewAnomaly`; the anchor is left where it was.
pub fn advance(
    values: &mut BTreeMap<SubMetric, SubMetricState>,
    states: &mut BTreeMap<SubMetric, DecayState>,
    config: &DecayConfig,
    rate_multiplier: f64,
    now: DateTime<Utc>,
) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for (metric, sub) in values.iter_mut() {
        let state = states
            .entry(*metric)
            .or_insert_with(|| initial_state(*metric, sub.observed_at));

        let weeks = weeks_between(state.anchored_at, now);
        if weeks < 0.0 {
            let skew_secs = (state.anchored_at - now).num_seconds();
            tracing::warn!(
                metric = %metric.qualified_name(),
                skew_secs,
                "Clock skew detected, skipping decay"
            );
            anomalies.push(Anomaly::ClockSkewAnomaly {
                metric: Some(*metric),
                skew_secs,
            });
            continue;
        }

        let lambda = config.lambda_per_week(*metric) * rate_multiplier;
        sub.value = decayed_value(sub.value, lambda, weeks).clamp(0.0, 100.0);
        state.anchored_at = now;
    }

    anomalies
}

/// Resets the decay timer of a reinforced sub-metric.
pub fn mark_reinforced(
    states: &mut BTreeMap<SubMetric, DecayState>,
    metric: SubMetric,
    at: DateTime<Utc>,
) {
    let state = states
        .entry(metric)
        .or_insert_with(|| initial_state(metric, at));
    state.last_reinforced_at = Some(at);
}
