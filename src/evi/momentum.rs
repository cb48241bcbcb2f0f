use chrono::{DateTime, Utc};

use crate::evi::config::MomentumConfig;
use crate::evi::types::{week_start, MomentumStatus, WeeklyPoint};

/// Records `evi` as the latest value of `at`'s ISO week.
pub fn record_week(history: &mut Vec<WeeklyPoint>, at: DateTime<Utc>, evi: f64, keep: usize) {
    let week = week_start(at);
    if let Some(last) = history.last_mut() {
        if last.week_start == week {
            last.evi = evi;
            return;
        }
        // out-of-order write for an older week
        if last.week_start > week {
            return;
        }
    }
    history.push(WeeklyPoint {
        week_start: week,
        evi,
    });
    if history.len() > keep {
        let excess = history.len() - keep;
        history.drain(..excess);
    }
}

fn deltas(history: &[WeeklyPoint]) -> Vec<f64> {
    history.windows(2).map(|w| w[1].evi - w[0].evi).collect()
}

/// Flags an accelerating decline: the last `window_weeks` deltas are all
/// negative and each drop is larger than the one before.
pub fn detect(history: &[WeeklyPoint], config: &MomentumConfig) -> MomentumStatus {
    let all = deltas(history);
    let weeks_in_decline = all.iter().rev().take_while(|d| **d < 0.0).count() as u32;

    let negative_momentum = all.len() >= config.window_weeks && {
        let recent = &all[all.len() - config.window_weeks..];
        recent.iter().all(|d| *d < 0.0)
            && recent.windows(2).all(|w| w[1].abs() > w[0].abs())
    };

    let reversal_effort_multiplier = if negative_momentum {
        1.0 + config.reversal_step * weeks_in_decline as f64
    } else {
        1.0
    };

    MomentumStatus {
        negative_momentum,
        weeks_in_decline,
        reversal_effort_multiplier,
    }
}

/// λ multiplier for the following ticks.
pub fn decay_rate_multiplier(status: &MomentumStatus, config: &MomentumConfig) -> f64 {
    if status.negative_momentum {
        1.0 + config.decay_boost
    } else {
        1.0
    }
}
