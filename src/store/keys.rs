use crate::evi::types::SubMetric;
use crate::store::StoreError;

const SEP: char = ':';

fn segment<'a>(field: &str, value: &'a str) -> Result<&'a str, StoreError> {
    if value.is_empty() {
        return Err(StoreError::Validation(format!("{field} must not be empty")));
    }
    if value.contains(SEP) {
        return Err(StoreError::Validation(format!(
            "{field} must not contain '{SEP}'"
        )));
    }
    Ok(value)
}

fn ts_segment(timestamp_ms: i64) -> String {
    format!("{:020}", timestamp_ms.max(0) as u64)
}

pub fn profile_key(org_id: &str) -> Result<String, StoreError> {
    Ok(segment("org_id", org_id)?.to_string())
}

/// `{org}:` prefix shared by every per-org tree.
pub fn org_prefix(org_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}{SEP}", segment("org_id", org_id)?))
}

/// Ascending by time within an org, so the newest snapshot is last.
pub fn snapshot_key(org_id: &str, timestamp_ms: i64, snapshot_id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}{SEP}{}{SEP}{}",
        segment("org_id", org_id)?,
        ts_segment(timestamp_ms),
        segment("snapshot_id", snapshot_id)?
    ))
}

pub fn decay_state_key(org_id: &str, metric: SubMetric) -> Result<String, StoreError> {
    Ok(format!(
        "{}{SEP}{}{SEP}{}",
        segment("org_id", org_id)?,
        metric.component().as_str(),
        metric.as_str()
    ))
}

pub fn shock_key(org_id: &str, shock_id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}{SEP}{}",
        segment("org_id", org_id)?,
        segment("shock_id", shock_id)?
    ))
}

pub fn gaming_flag_key(org_id: &str, flag_id: &str) -> Result<String, StoreError> {
    Ok(format!(
        "{}{SEP}{}",
        segment("org_id", org_id)?,
        segment("flag_id", flag_id)?
    ))
}

pub fn flag_override_key(org_id: &str, flag_id: &str) -> Result<String, StoreError> {
    gaming_flag_key(org_id, flag_id)
}

pub fn quarantine_key(
    org_id: &str,
    timestamp_ms: i64,
    flag_id: &str,
    metric: SubMetric,
) -> Result<String, StoreError> {
    Ok(format!(
        "{}{SEP}{}{SEP}{}{SEP}{}",
        segment("org_id", org_id)?,
        ts_segment(timestamp_ms),
        segment("flag_id", flag_id)?,
        metric.as_str()
    ))
}

/// Idempotency keys come from producers and may contain the separator; only
/// the org segment has to be clean for prefix scans.
pub fn processed_activity_key(org_id: &str, idempotency_key: &str) -> Result<String, StoreError> {
    if idempotency_key.is_empty() {
        return Err(StoreError::Validation(
            "idempotency_key must not be empty".to_string(),
        ));
    }
    Ok(format!("{}{SEP}{}", segment("org_id", org_id)?, idempotency_key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_keys_sort_by_time() {
        let older = snapshot_key("acme", 1_000, "b").unwrap();
        let newer = snapshot_key("acme", 2_000, "a").unwrap();
        assert!(older < newer);
        assert!(older.starts_with(&org_prefix("acme").unwrap()));
    }

    #[test]
    fn separator_in_org_is_rejected() {
        assert!(matches!(
            profile_key("ac:me"),
            Err(StoreError::Validation(_))
        ));
        assert!(shock_key("acme", "").is_err());
    }

    #[test]
    fn decay_key_names_component_and_sub_metric() {
        assert_eq!(
            decay_state_key("acme", SubMetric::PressCoverage).unwrap(),
            "acme:visibility:press_coverage"
        );
    }

    #[test]
    fn idempotency_key_may_contain_separator() {
        assert_eq!(
            processed_activity_key("acme", "pr:42").unwrap(),
            "acme:pr:42"
        );
    }
}
