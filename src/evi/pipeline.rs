//! One org's scoring run over its own context object.
//!
//! Order: fresh signals anchored, decay to now, reinforcement, shock overlay,
//! negative-momentum bookkeeping, gaming penalty last, clamp. The caller works on
//! a copy of the stored context and commits it only when this returns `Ok`.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::evi::components;
use crate::evi::config::EviConfig;
use crate::evi::decay;
use crate::evi::error::EngineError;
use crate::evi::gaming;
use crate::evi::momentum;
use crate::evi::monitoring;
use crate::evi::normalizer::{self, SignalBatch};
use crate::evi::reinforcement;
use crate::evi::shock;
use crate::evi::types::*;

pub enum PipelineInput<'a> {
    Tick { scheduled: bool },
    Signals(&'a SignalBatch),
    Activity {
        events: &'a [ActivityEvent],
        processed: &'a HashSet<String>,
    },
    Shock(ShockEvent),
    ShockResponse {
        shock_id: &'a str,
        active: bool,
        recovery_rate: Option<f64>,
    },
}

impl PipelineInput<'_> {
    fn trigger(&self) -> SnapshotTrigger {
        match self {
            Self::Tick { scheduled: true } => SnapshotTrigger::ScheduledTick,
            Self::Tick { scheduled: false } => SnapshotTrigger::ManualTick,
            Self::Signals(_) => SnapshotTrigger::Signals,
            Self::Activity { .. } => SnapshotTrigger::Activity,
            Self::Shock(_) => SnapshotTrigger::Shock,
            Self::ShockResponse { .. } => SnapshotTrigger::ShockResponse,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub snapshot: EviSnapshot,
    pub new_flags: Vec<GamingFlag>,
    pub quarantined: Vec<QuarantinedSignal>,
    pub applied_keys: Vec<String>,
    pub duplicate_keys: Vec<String>,
}

pub fn run(
    ctx: &mut OrgContext,
    input: PipelineInput<'_>,
    config: &EviConfig,
    now: DateTime<Utc>,
) -> Result<PipelineRun, EngineError> {
    let trigger = input.trigger();
    let org_id = ctx.org_id().to_string();
    let mut anomalies = Vec::new();
    let mut new_flags = Vec::new();
    let mut quarantined = Vec::new();
    let mut applied_keys = Vec::new();
    let mut duplicate_keys = Vec::new();

    if let Some(last) = ctx.profile.last_tick_at {
        if now < last {
            let skew_secs = (last - now).num_seconds();
            tracing::warn!(org_id = %org_id, skew_secs, "Run timestamp precedes previous run");
            anomalies.push(Anomaly::ClockSkewAnomaly {
                metric: None,
                skew_secs,
            });
        }
    }

    // Signals land before decay so a value observed in the past decays up to now.
    if let PipelineInput::Signals(batch) = &input {
        let observed_at = batch.observed_at.unwrap_or(now);
        apply_signals(
            ctx,
            batch,
            observed_at,
            config,
            now,
            &mut anomalies,
            &mut new_flags,
            &mut quarantined,
        )?;
    }

    let rate_multiplier = momentum::decay_rate_multiplier(&ctx.profile.momentum, &config.momentum);
    anomalies.extend(decay::advance(
        &mut ctx.profile.sub_metrics,
        &mut ctx.decay_states,
        &config.decay,
        rate_multiplier,
        now,
    ));
    if reinforcement::expire_idle_streak(&mut ctx.profile.streak, now) {
        tracing::debug!(org_id = %org_id, "Consistency streak reset after idle week");
    }

    match input {
        PipelineInput::Tick { .. } | PipelineInput::Signals(_) => {}
        PipelineInput::Activity { events, processed } => {
            for event in events {
                reinforcement::validate_event(event, &org_id)?;
            }
            let outcome = reinforcement::apply_batch(
                events,
                processed,
                &mut ctx.profile.sub_metrics,
                &mut ctx.decay_states,
                &mut ctx.profile.streak,
                &config.weights,
                &config.reinforcement,
                now,
            );
            if let Some(at) = outcome.latest_press_at(events) {
                ctx.profile.last_press_corroboration_at =
                    Some(ctx.profile.last_press_corroboration_at.map_or(at, |prev| prev.max(at)));
            }
            for key in &outcome.duplicate_keys {
                anomalies.push(Anomaly::DuplicateActivity {
                    idempotency_key: key.clone(),
                });
            }
            applied_keys = outcome.applied_keys;
            duplicate_keys = outcome.duplicate_keys;
        }
        PipelineInput::Shock(event) => {
            shock::validate_event(&event, &org_id)?;
            if ctx.shocks.iter().any(|r| r.event.id == event.id) {
                return Err(EngineError::InvalidShockEvent(format!(
                    "shock {} already ingested",
                    event.id
                )));
            }
            let record = shock::open(event, &config.shocks)?;
            tracing::info!(
                org_id = %org_id,
                shock_id = %record.event.id,
                category = ?record.event.category,
                magnitude = record.magnitude,
                "Shock event opened"
            );
            ctx.shocks.push(record);
        }
        PipelineInput::ShockResponse {
            shock_id,
            active,
            recovery_rate,
        } => {
            let record = ctx
                .shocks
                .iter_mut()
                .find(|r| r.event.id == shock_id)
                .ok_or_else(|| EngineError::not_found("shock", shock_id))?;
            shock::set_response(record, active, recovery_rate, &config.shocks, now)?;
        }
    }

    for record in ctx.shocks.iter_mut() {
        shock::advance(record, &config.shocks, now);
    }

    let values = ctx.profile.values();
    let scores = components::score(&values, &config.weights)?;
    let (shock_overlay, shock_contributions) = shock::overlay(&ctx.shocks);
    let evi_before_penalty = (scores.composite + shock_overlay).clamp(0.0, 100.0);

    let active_flags = ctx.active_flags(now);
    let (penalty_multiplier, penalties) = gaming::penalty_multiplier(&active_flags);
    let active_gaming_flag_ids: Vec<String> = active_flags.iter().map(|f| f.id.clone()).collect();
    let evi = (evi_before_penalty * penalty_multiplier).clamp(0.0, 100.0);

    momentum::record_week(
        &mut ctx.profile.weekly_history,
        now,
        evi,
        config.momentum.history_weeks,
    );
    let status = momentum::detect(&ctx.profile.weekly_history, &config.momentum);
    if status.negative_momentum && !ctx.profile.momentum.negative_momentum {
        tracing::warn!(
            org_id = %org_id,
            weeks_in_decline = status.weeks_in_decline,
            "Negative momentum detected"
        );
    }
    ctx.profile.momentum = status.clone();
    ctx.profile.last_tick_at = Some(ctx.profile.last_tick_at.map_or(now, |last| last.max(now)));

    let stale_metrics: Vec<SubMetric> = ctx
        .profile
        .sub_metrics
        .iter()
        .filter(|(_, s)| s.stale)
        .map(|(m, _)| *m)
        .collect();

    let mut snapshot = EviSnapshot {
        id: Uuid::new_v4().to_string(),
        org_id: org_id.clone(),
        timestamp: now,
        evi,
        visibility: scores.visibility,
        authority: scores.authority,
        momentum: scores.momentum,
        active_shock_ids: shock_contributions.iter().map(|c| c.shock_id.clone()).collect(),
        active_gaming_flag_ids,
        trigger,
        provenance: Provenance {
            sub_metrics: values,
            stale_metrics,
            composite_before_overlay: scores.composite,
            shock_overlay,
            shocks: shock_contributions,
            evi_before_penalty,
            penalty_multiplier,
            penalties,
            momentum: status,
            decay_rate_multiplier: rate_multiplier,
            anomalies,
        },
    };

    let violations = monitoring::check_invariants(&snapshot);
    for violation in &violations {
        tracing::warn!(org_id = %org_id, violation = ?violation, "EVI invariant violated");
    }
    snapshot.provenance.anomalies.extend(violations);

    Ok(PipelineRun {
        snapshot,
        new_flags,
        quarantined,
        applied_keys,
        duplicate_keys,
    })
}

#[allow(clippy::too_many_arguments)]
fn apply_signals(
    ctx: &mut OrgContext,
    batch: &SignalBatch,
    observed_at: DateTime<Utc>,
    config: &EviConfig,
    now: DateTime<Utc>,
    anomalies: &mut Vec<Anomaly>,
    new_flags: &mut Vec<GamingFlag>,
    quarantined: &mut Vec<QuarantinedSignal>,
) -> Result<(), EngineError> {
    let org_id = ctx.org_id().to_string();
    let resolved = normalizer::resolve_batch(&ctx.profile, batch)?;

    if let Some(counters) = batch.volume {
        for flag in record_volume(ctx, counters, observed_at, config, now) {
            tracing::warn!(
                org_id = %org_id,
                flag_id = %flag.id,
                pattern = flag.pattern_type.as_str(),
                penalty_rate = flag.penalty_rate,
                expires_at = %flag.expires_at,
                "Gaming flag created"
            );
            ctx.flags.push(flag.clone());
            new_flags.push(flag);
        }
    }

    // Every live flag holds back its metrics, not only the ones raised by this batch.
    let mut held: BTreeMap<SubMetric, String> = BTreeMap::new();
    for flag in ctx.active_flags(now) {
        for metric in flag.pattern_type.implicated_metrics() {
            held.entry(*metric).or_insert_with(|| flag.id.clone());
        }
    }

    for (metric, (normalized, raw)) in &resolved.fresh {
        if let Some(flag_id) = held.get(metric) {
            let flag_id = flag_id.clone();
            quarantined.push(QuarantinedSignal {
                org_id: org_id.clone(),
                flag_id: flag_id.clone(),
                metric: *metric,
                raw_value: Some(*raw),
                quarantined_at: now,
            });
            anomalies.push(Anomaly::SignalQuarantined {
                metric: *metric,
                flag_id,
            });
            match ctx.profile.sub_metrics.get_mut(metric) {
                Some(state) => state.stale = true,
                None => {
                    return Err(EngineError::IncompleteComponentInput {
                        missing: vec![metric.qualified_name()],
                    })
                }
            }
            continue;
        }

        ctx.profile.sub_metrics.insert(
            *metric,
            SubMetricState {
                value: *normalized,
                observed_at,
                stale: false,
            },
        );
        ctx.decay_states
            .entry(*metric)
            .or_insert_with(|| decay::initial_state(*metric, observed_at))
            .anchored_at = observed_at;
    }

    for metric in &resolved.stale {
        if let Some(state) = ctx.profile.sub_metrics.get_mut(metric) {
            state.stale = true;
        }
    }
    anomalies.extend(resolved.anomalies);
    Ok(())
}

/// Rolls the weekly volume window and runs the anti-gaming comparison.
fn record_volume(
    ctx: &mut OrgContext,
    counters: VolumeCounters,
    observed_at: DateTime<Utc>,
    config: &EviConfig,
    now: DateTime<Utc>,
) -> Vec<GamingFlag> {
    let week = week_start(observed_at);
    let profile = &mut ctx.profile;
    match profile.current_volume.map(|c| c.week_start) {
        Some(current_week) if current_week == week => {
            if let Some(current) = profile.current_volume.as_mut() {
                current.counters = counters;
            }
        }
        // late batch for an already closed week
        Some(current_week) if current_week > week => return Vec::new(),
        _ => {
            profile.previous_volume = profile.current_volume.take();
            profile.current_volume = Some(VolumeObservation {
                week_start: week,
                counters,
            });
        }
    }

    let (Some(previous), Some(current)) = (profile.previous_volume, profile.current_volume) else {
        return Vec::new();
    };

    let window = Duration::days(config.gaming.corroboration_window_days);
    let corroborated = profile
        .last_press_corroboration_at
        .is_some_and(|at| at <= now && now - at <= window)
        || shock::has_media_corroboration(
            &ctx.shocks,
            now,
            config.gaming.corroboration_window_days,
        );

    let detections = gaming::detect(&previous, &current, corroborated, &config.gaming);
    let mut flags = Vec::new();
    for detection in detections {
        let already_flagged = ctx
            .active_flags(now)
            .iter()
            .any(|f| f.pattern_type == detection.pattern);
        if already_flagged {
            continue;
        }
        flags.push(gaming::create_flag(&detection, ctx.org_id(), now, &config.gaming));
    }
    flags
}
