use crate::evi::types::{Anomaly, EviSnapshot, SnapshotComputed};

/// Post-aggregation sanity checks. Violations are recorded on the snapshot and
/// logged; they never abort the tick.
pub fn check_invariants(snapshot: &EviSnapshot) -> Vec<Anomaly> {
    let mut violations = Vec::new();

    check_range(&mut violations, "evi", snapshot.evi, 0.0, 100.0);
    check_range(&mut violations, "visibility", snapshot.visibility, 0.0, 100.0);
    check_range(&mut violations, "authority", snapshot.authority, 0.0, 100.0);
    check_range(&mut violations, "momentum", snapshot.momentum, 0.0, 100.0);

    let p = &snapshot.provenance;
    check_range(&mut violations, "penalty_multiplier", p.penalty_multiplier, 0.0, 1.0);
    for penalty in &p.penalties {
        check_range(
            &mut violations,
            &format!("penalty_rate[{}]", penalty.flag_id),
            penalty.penalty_rate,
            0.1,
            0.5,
        );
    }
    for (metric, value) in &p.sub_metrics {
        check_range(&mut violations, &metric.qualified_name(), *value, 0.0, 100.0);
    }
    if p.momentum.reversal_effort_multiplier < 1.0 || p.momentum.reversal_effort_multiplier.is_nan() {
        violations.push(Anomaly::InvariantViolation {
            field: "reversal_effort_multiplier".to_string(),
            value: p.momentum.reversal_effort_multiplier,
            expected_range: ">= 1".to_string(),
        });
    }

    violations
}

fn check_range(violations: &mut Vec<Anomaly>, field: &str, value: f64, min: f64, max: f64) {
    if value.is_nan() || value < min || value > max {
        violations.push(Anomaly::InvariantViolation {
            field: field.to_string(),
            value,
            expected_range: format!("[{min}, {max}]"),
        });
    }
}

/// One structured log line per committed snapshot.
pub fn log_snapshot(snapshot: &EviSnapshot) {
    let event = SnapshotComputed::from(snapshot);
    let anomalies = snapshot.provenance.anomalies.len();
    if anomalies > 0 || !snapshot.active_gaming_flag_ids.is_empty() {
        tracing::warn!(
            org_id = %event.org_id,
            snapshot_id = %event.snapshot_id,
            evi = event.evi,
            trigger = event.trigger.as_str(),
            anomalies,
            gaming_flags = snapshot.active_gaming_flag_ids.len(),
            negative_momentum = event.negative_momentum,
            "EVI snapshot computed with warnings"
        );
    } else {
        tracing::info!(
            org_id = %event.org_id,
            snapshot_id = %event.snapshot_id,
            evi = event.evi,
            trigger = event.trigger.as_str(),
            negative_momentum = event.negative_momentum,
            "EVI snapshot computed"
        );
    }
}
