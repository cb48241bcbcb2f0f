use chrono::{DateTime, Utc};

use crate::evi::config::ShockConfig;
use crate::evi::error::EngineError;
use crate::evi::types::{
    days_between, ShockCategory, ShockContribution, ShockDirection, ShockEvent, ShockRecord,
    ShockState,
};

pub fn validate_event(event: &ShockEvent, org_id: &str) -> Result<(), EngineError> {
    if event.id.trim().is_empty() {
        return Err(EngineError::InvalidShockEvent("id must not be empty".to_string()));
    }
    if event.org_id != org_id {
        return Err(EngineError::InvalidShockEvent(format!(
            "shock {} belongs to org {}",
            event.id, event.org_id
        )));
    }
    if !event.magnitude_seed.is_finite() || !(0.0..=1.0).contains(&event.magnitude_seed) {
        return Err(EngineError::InvalidShockEvent(format!(
            "magnitudeSeed {} outside [0, 1]",
            event.magnitude_seed
        )));
    }
    if event.category == ShockCategory::Crisis && event.direction == ShockDirection::Positive {
        return Err(EngineError::InvalidShockEvent(
            "crisis shocks are always negative".to_string(),
        ));
    }
    if let Some(rate) = event.decay_rate {
        if !rate.is_finite() || rate <= 0.0 {
            return Err(EngineError::InvalidShockEvent(format!(
                "decayRate {rate} must be > 0"
            )));
        }
    }
    if let Some(rate) = event.recovery_rate {
        if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
            return Err(EngineError::InvalidShockEvent(format!(
                "recoveryRate {rate} outside (0, 1)"
            )));
        }
    }
    Ok(())
}

fn recovery_rate_for(event: &ShockEvent, config: &ShockConfig) -> f64 {
    event.recovery_rate.unwrap_or(if event.response_active {
        config.active_recovery_rate
    } else {
        config.passive_recovery_rate
    })
}

/// Resolves magnitude and rates from the category profile. The record starts
/// at full contribution as of the event's timestamp.
pub fn open(event: ShockEvent, config: &ShockConfig) -> Result<ShockRecord, EngineError> {
    let profile = config.profile(event.category);
    let magnitude = profile.min_magnitude
        + event.magnitude_seed * (profile.max_magnitude - profile.min_magnitude);
    let decay_rate = event.decay_rate.unwrap_or(profile.decay_rate);
    let recovery_rate = recovery_rate_for(&event, config);
    let contribution = match event.direction {
        ShockDirection::Positive => magnitude,
        ShockDirection::Negative => -magnitude,
    };

    Ok(ShockRecord {
        evaluated_at: event.timestamp,
        magnitude,
        decay_rate,
        recovery_rate,
        contribution,
        state: classify(contribution, magnitude, config),
        event,
    })
}

fn classify(contribution: f64, magnitude: f64, config: &ShockConfig) -> ShockState {
    let size = contribution.abs();
    if size < config.expiry_threshold {
        ShockState::Expired
    } else if size >= magnitude * config.active_fraction {
        ShockState::Active
    } else {
        ShockState::Decaying
    }
}

/// Advances a shock's contribution to `now` under its current rates.
pub fn advance(record: &mut ShockRecord, config: &ShockConfig, now: DateTime<Utc>) {
    if record.state == ShockState::Expired {
        return;
    }
    let days = days_between(record.evaluated_at, now);
    if days <= 0.0 {
        return;
    }

    record.contribution = match record.event.direction {
        ShockDirection::Positive => record.contribution * (-record.decay_rate * days).exp(),
        ShockDirection::Negative => record.contribution * (1.0 - record.recovery_rate).powf(days),
    };
    record.evaluated_at = now;

    let next = classify(record.contribution, record.magnitude, config);
    if next != record.state {
        tracing::debug!(
            shock_id = %record.event.id,
            from = ?record.state,
            to = ?next,
            contribution = record.contribution,
            "Shock state transition"
        );
    }
    record.state = next;
}

/// Toggles the response campaign. Contribution is brought current first so the
/// new recovery rate only applies from `now` on.
pub fn set_response(
    record: &mut ShockRecord,
    active: bool,
    recovery_rate: Option<f64>,
    config: &ShockConfig,
    now: DateTime<Utc>,
) -> Result<(), EngineError> {
    if let Some(rate) = recovery_rate {
        if !rate.is_finite() || rate <= 0.0 || rate >= 1.0 {
            return Err(EngineError::InvalidShockEvent(format!(
                "recoveryRate {rate} outside (0, 1)"
            )));
        }
    }
    advance(record, config, now);
    record.event.response_active = active;
    record.event.recovery_rate = recovery_rate;
    record.recovery_rate = recovery_rate_for(&record.event, config);
    Ok(())
}

/// Days until `|contribution|` falls under the expiry threshold, measured from the event.
pub fn predicted_expiry_days(record: &ShockRecord, config: &ShockConfig) -> f64 {
    let ratio = config.expiry_threshold / record.magnitude;
    if ratio >= 1.0 {
        return 0.0;
    }
    match record.event.direction {
        ShockDirection::Positive => -ratio.ln() / record.decay_rate,
        ShockDirection::Negative => ratio.ln() / (1.0 - record.recovery_rate).ln(),
    }
}

/// Sum of the live (non-expired) contributions, plus the per-shock breakdown.
pub fn overlay(records: &[ShockRecord]) -> (f64, Vec<ShockContribution>) {
    let live: Vec<ShockContribution> = records
        .iter()
        .filter(|r| r.state != ShockState::Expired)
        .map(|r| ShockContribution {
            shock_id: r.event.id.clone(),
            category: r.event.category,
            contribution: r.contribution,
            state: r.state,
        })
        .collect();
    let total = live.iter().map(|c| c.contribution).sum();
    (total, live)
}

/// A media shock within `window_days` before `at` corroborates a press surge.
pub fn has_media_corroboration(records: &[ShockRecord], at: DateTime<Utc>, window_days: i64) -> bool {
    records.iter().any(|r| {
        r.event.category.is_media()
            && r.event.direction == ShockDirection::Positive
            && r.event.timestamp <= at
            && (at - r.event.timestamp).num_days() <= window_days
    })
}
