use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::evi::config::{ReinforcementConfig, WeightsConfig};
use crate::evi::decay;
use crate::evi::error::EngineError;
use crate::evi::types::{
    week_start, ActivityEvent, Component, ConsistencyStreak, DecayState, Pillar, SubMetric,
    SubMetricState,
};

/// `k × ln(1 + level × s)`
pub fn diminishing_delta(k: f64, s: f64, activity_level: f64) -> f64 {
    if activity_level <= 0.0 {
        return 0.0;
    }
    k * (1.0 + activity_level * s).ln()
}

/// `1 + bonus × (min(n, cap) − 1)`; one pillar earns no bonus.
pub fn cross_pillar_multiplier(distinct_pillars: usize, config: &ReinforcementConfig) -> f64 {
    let counted = distinct_pillars.min(config.cross_pillar_cap as usize);
    1.0 + config.cross_pillar_bonus * counted.saturating_sub(1) as f64
}

pub fn consistency_multiplier(consecutive_active_weeks: u32, config: &ReinforcementConfig) -> f64 {
    1.0 + config.consistency_step
        * consecutive_active_weeks.min(config.consistency_cap_weeks) as f64
}

/// Extends the streak with activity in `at`'s ISO week.
pub fn record_active_week(streak: &mut ConsistencyStreak, at: DateTime<Utc>) {
    let week = week_start(at);
    match streak.last_active_week {
        Some(last) if last == week => {}
        Some(last) if last + Duration::weeks(1) == week => {
            streak.consecutive_active_weeks += 1;
            streak.last_active_week = Some(week);
        }
        Some(last) if last > week => {}
        _ => {
            streak.consecutive_active_weeks = 1;
            streak.last_active_week = Some(week);
        }
    }
}

/// Resets the streak when a whole week has passed with no qualifying activity.
pub fn expire_idle_streak(streak: &mut ConsistencyStreak, now: DateTime<Utc>) -> bool {
    let Some(last) = streak.last_active_week else {
        return false;
    };
    let idle = week_start(now) > last + Duration::weeks(1);
    if idle && streak.consecutive_active_weeks > 0 {
        streak.consecutive_active_weeks = 0;
        return true;
    }
    false
}

pub fn validate_event(event: &ActivityEvent, org_id: &str) -> Result<(), EngineError> {
    if event.idempotency_key.trim().is_empty() {
        return Err(EngineError::InvalidActivityEvent(
            "idempotencyKey must not be empty".to_string(),
        ));
    }
    if event.org_id != org_id {
        return Err(EngineError::InvalidActivityEvent(format!(
            "event {} belongs to org {}",
            event.idempotency_key, event.org_id
        )));
    }
    if !event.magnitude.is_finite() || event.magnitude < 0.0 {
        return Err(EngineError::InvalidActivityEvent(format!(
            "event {} magnitude must be a finite value >= 0",
            event.idempotency_key
        )));
    }
    if event.pillars.is_empty() {
        return Err(EngineError::InvalidActivityEvent(format!(
            "event {} must name at least one pillar",
            event.idempotency_key
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentReinforcement {
    pub component: Component,
    pub activity_level: f64,
    pub base_delta: f64,
    pub applied_delta: f64,
    pub touched: Vec<SubMetric>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinforcementOutcome {
    pub applied_keys: Vec<String>,
    pub duplicate_keys: Vec<String>,
    pub distinct_pillars: usize,
    pub cross_pillar_multiplier: f64,
    pub consistency_multiplier: f64,
    pub components: Vec<ComponentReinforcement>,
}

impl ReinforcementOutcome {
    /// Latest timestamp among applied events that carry the PR pillar.
    pub fn latest_press_at(&self, events: &[ActivityEvent]) -> Option<DateTime<Utc>> {
        events
            .iter()
            .filter(|e| self.applied_keys.contains(&e.idempotency_key))
            .filter(|e| e.pillars.contains(&Pillar::Pr))
            .map(|e| e.timestamp)
            .max()
    }
}

/// Applies one activity batch to the sub-metric values.
///
/// Events whose key is in `processed` (or repeated within the batch) are skipped.
/// Values must already be brought current by the decay engine.
#[allow(clippy::too_many_arguments)]
pub fn apply_batch(
    events: &[ActivityEvent],
    processed: &HashSet<String>,
    values: &mut BTreeMap<SubMetric, SubMetricState>,
    decay_states: &mut BTreeMap<SubMetric, DecayState>,
    streak: &mut ConsistencyStreak,
    weights: &WeightsConfig,
    config: &ReinforcementConfig,
    now: DateTime<Utc>,
) -> ReinforcementOutcome {
    let mut outcome = ReinforcementOutcome {
        cross_pillar_multiplier: 1.0,
        consistency_multiplier: 1.0,
        ..ReinforcementOutcome::default()
    };

    let mut seen: HashSet<&str> = HashSet::new();
    let mut fresh: Vec<&ActivityEvent> = Vec::new();
    for event in events {
        let key = event.idempotency_key.as_str();
        if processed.contains(key) || !seen.insert(key) {
            outcome.duplicate_keys.push(key.to_string());
            continue;
        }
        fresh.push(event);
    }
    if fresh.is_empty() {
        return outcome;
    }

    let mut ordered = fresh.clone();
    ordered.sort_by_key(|e| e.timestamp);
    for event in &ordered {
        record_active_week(streak, event.timestamp);
    }

    let pillars: BTreeSet<Pillar> = fresh.iter().flat_map(|e| e.pillars.iter().copied()).collect();
    outcome.distinct_pillars = pillars.len();
    outcome.cross_pillar_multiplier = cross_pillar_multiplier(pillars.len(), config);
    outcome.consistency_multiplier = consistency_multiplier(streak.consecutive_active_weeks, config);
    let multiplier = outcome.cross_pillar_multiplier * outcome.consistency_multiplier;

    for component in Component::ALL {
        let mut level = 0.0;
        let mut touched: BTreeSet<SubMetric> = BTreeSet::new();
        for event in &fresh {
            let hits: Vec<SubMetric> = event
                .activity_type
                .reinforces()
                .iter()
                .copied()
                .filter(|m| m.component() == component)
                .collect();
            if !hits.is_empty() {
                level += event.magnitude;
                touched.extend(hits);
            }
        }
        if touched.is_empty() {
            continue;
        }

        let curve = config.curve(component);
        let base_delta = diminishing_delta(curve.k, curve.s, level);
        let delta = base_delta * multiplier;

        // Spread so the weighted component score rises by `delta`.
        let table = weights.table(component);
        let touched_weight: f64 = touched.iter().filter_map(|m| table.weight_of(*m)).sum();
        let per_metric = if touched_weight > 0.0 {
            delta / touched_weight
        } else {
            0.0
        };

        let mut applied = 0.0;
        for metric in &touched {
            let weight = table.weight_of(*metric).unwrap_or(0.0);
            let state = values.entry(*metric).or_insert(SubMetricState {
                value: 0.0,
                observed_at: now,
                stale: false,
            });
            let before = state.value;
            state.value = (state.value + per_metric).clamp(0.0, 100.0);
            applied += (state.value - before) * weight;

            let reinforced_at = fresh
                .iter()
                .filter(|e| e.activity_type.reinforces().contains(metric))
                .map(|e| e.timestamp)
                .max()
                .unwrap_or(now);
            decay::mark_reinforced(decay_states, *metric, reinforced_at);
        }

        outcome.components.push(ComponentReinforcement {
            component,
            activity_level: level,
            base_delta,
            applied_delta: applied,
            touched: touched.into_iter().collect(),
        });
    }

    outcome.applied_keys = fresh.iter().map(|e| e.idempotency_key.clone()).collect();
    outcome
}
