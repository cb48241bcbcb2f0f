use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;

use crate::evi::types::{
    DecayState, EviSnapshot, GamingFlag, GamingFlagOverride, OrgContext, OrgVisibilityProfile,
    QuarantinedSignal, ShockRecord,
};
use crate::store::keys;
use crate::store::operations::activity::ProcessedActivity;
use crate::store::{Store, StoreError};

/// Everything one pipeline run writes. Committed in a single transaction.
pub struct OrgCommit<'a> {
    pub context: &'a OrgContext,
    pub snapshot: &'a EviSnapshot,
    pub new_flags: &'a [GamingFlag],
    pub quarantined: &'a [QuarantinedSignal],
    pub processed_keys: &'a [String],
}

impl Store {
    pub fn get_profile(&self, org_id: &str) -> Result<Option<OrgVisibilityProfile>, StoreError> {
        let key = keys::profile_key(org_id)?;
        match self.profiles.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    pub fn list_org_ids(&self) -> Result<Vec<String>, StoreError> {
        let mut ids = Vec::new();
        for item in self.profiles.iter() {
            let (key, _) = item?;
            ids.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(ids)
    }

    /// Loads an org's full working context, or a fresh one for an unknown org.
    pub fn load_org_context(&self, org_id: &str, now: DateTime<Utc>) -> Result<OrgContext, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        let profile = self
            .get_profile(org_id)?
            .unwrap_or_else(|| OrgVisibilityProfile::new(org_id, now));

        let decay_states: BTreeMap<_, _> =
            Self::scan_prefix_values::<DecayState>(&self.decay_states, &prefix)?
                .into_iter()
                .map(|state| (state.metric, state))
                .collect();
        let mut shocks: Vec<ShockRecord> = Self::scan_prefix_values(&self.shocks, &prefix)?;
        shocks.sort_by_key(|r| r.event.timestamp);
        let flags: Vec<GamingFlag> = Self::scan_prefix_values(&self.gaming_flags, &prefix)?;
        let overrides: Vec<GamingFlagOverride> =
            Self::scan_prefix_values(&self.flag_overrides, &prefix)?;

        Ok(OrgContext {
            profile,
            decay_states,
            shocks,
            flags,
            overrides,
        })
    }

    /// Atomically writes profile, decay states, shocks, new flags, quarantined
    /// signals, processed idempotency keys and the snapshot. Snapshots and flags
    /// are insert-only: an existing key aborts the whole commit.
    pub fn commit_org_run(&self, commit: &OrgCommit<'_>) -> Result<(), StoreError> {
        let ctx = commit.context;
        let org_id = ctx.org_id();

        let profile_entry = (keys::profile_key(org_id)?, Self::serialize(&ctx.profile)?);
        let snapshot_entry = (
            keys::snapshot_key(
                org_id,
                commit.snapshot.timestamp.timestamp_millis(),
                &commit.snapshot.id,
            )?,
            Self::serialize(commit.snapshot)?,
        );
        let decay_entries = ctx
            .decay_states
            .values()
            .map(|state| {
                Ok((
                    keys::decay_state_key(org_id, state.metric)?,
                    Self::serialize(state)?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let shock_entries = ctx
            .shocks
            .iter()
            .map(|record| {
                Ok((
                    keys::shock_key(org_id, &record.event.id)?,
                    Self::serialize(record)?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let flag_entries = commit
            .new_flags
            .iter()
            .map(|flag| Ok((keys::gaming_flag_key(org_id, &flag.id)?, Self::serialize(flag)?)))
            .collect::<Result<Vec<_>, StoreError>>()?;
        let quarantine_entries = commit
            .quarantined
            .iter()
            .map(|signal| {
                Ok((
                    keys::quarantine_key(
                        org_id,
                        signal.quarantined_at.timestamp_millis(),
                        &signal.flag_id,
                        signal.metric,
                    )?,
                    Self::serialize(signal)?,
                ))
            })
            .collect::<Result<Vec<_>, StoreError>>()?;
        let processed_marker = Self::serialize(&ProcessedActivity {
            processed_at: commit.snapshot.timestamp,
            snapshot_id: commit.snapshot.id.clone(),
        })?;
        let processed_entries = commit
            .processed_keys
            .iter()
            .map(|key| keys::processed_activity_key(org_id, key))
            .collect::<Result<Vec<_>, StoreError>>()?;

        (
            &self.profiles,
            &self.snapshots,
            &self.decay_states,
            &self.shocks,
            &self.gaming_flags,
            &self.quarantine,
            &self.processed_activity,
        )
            .transaction(
                |(tx_profiles, tx_snapshots, tx_decay, tx_shocks, tx_flags, tx_quarantine, tx_processed)| {
                    let (snap_key, snap_bytes) = &snapshot_entry;
                    if tx_snapshots.get(snap_key.as_bytes())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(StoreError::Conflict {
                            entity: "snapshot".to_string(),
                            key: snap_key.clone(),
                        }));
                    }
                    for (key, _) in &flag_entries {
                        if tx_flags.get(key.as_bytes())?.is_some() {
                            return Err(ConflictableTransactionError::Abort(StoreError::Conflict {
                                entity: "gaming_flag".to_string(),
                                key: key.clone(),
                            }));
                        }
                    }

                    tx_snapshots.insert(snap_key.as_bytes(), snap_bytes.as_slice())?;
                    tx_profiles.insert(profile_entry.0.as_bytes(), profile_entry.1.as_slice())?;
                    for (key, bytes) in &decay_entries {
                        tx_decay.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &shock_entries {
                        tx_shocks.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &flag_entries {
                        tx_flags.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for (key, bytes) in &quarantine_entries {
                        tx_quarantine.insert(key.as_bytes(), bytes.as_slice())?;
                    }
                    for key in &processed_entries {
                        tx_processed.insert(key.as_bytes(), processed_marker.as_slice())?;
                    }
                    Ok(())
                },
            )
            .map_err(|e: TransactionError<StoreError>| match e {
                TransactionError::Abort(inner) => inner,
                TransactionError::Storage(se) => StoreError::Sled(se),
            })?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use tempfile::tempdir;

    use super::*;
    use crate::evi::types::{MomentumStatus, Provenance, SnapshotTrigger, SubMetric};

    fn snapshot(org_id: &str, id: &str) -> EviSnapshot {
        EviSnapshot {
            id: id.to_string(),
            org_id: org_id.to_string(),
            timestamp: Utc::now(),
            evi: 50.0,
            visibility: 50.0,
            authority: 50.0,
            momentum: 50.0,
            active_shock_ids: vec![],
            active_gaming_flag_ids: vec![],
            trigger: SnapshotTrigger::ManualTick,
            provenance: Provenance {
                sub_metrics: BTreeMap::new(),
                stale_metrics: vec![],
                composite_before_overlay: 50.0,
                shock_overlay: 0.0,
                shocks: vec![],
                evi_before_penalty: 50.0,
                penalty_multiplier: 1.0,
                penalties: vec![],
                momentum: MomentumStatus::default(),
                decay_rate_multiplier: 1.0,
                anomalies: vec![],
            },
        }
    }

    #[test]
    fn commit_then_load_roundtrips_context() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let now = Utc::now();

        let mut ctx = OrgContext::new("acme", now);
        crate::evi::decay::mark_reinforced(&mut ctx.decay_states, SubMetric::Snippets, now);
        let snap = snapshot("acme", "s1");
        store
            .commit_org_run(&OrgCommit {
                context: &ctx,
                snapshot: &snap,
                new_flags: &[],
                quarantined: &[],
                processed_keys: &["k1".to_string()],
            })
            .unwrap();

        let loaded = store.load_org_context("acme", now).unwrap();
        assert_eq!(loaded.org_id(), "acme");
        assert!(loaded.decay_states.contains_key(&SubMetric::Snippets));
        assert_eq!(store.list_org_ids().unwrap(), vec!["acme".to_string()]);
        assert!(store.is_activity_processed("acme", "k1").unwrap());
    }

    #[test]
    fn snapshot_is_never_overwritten() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let ctx = OrgContext::new("acme", Utc::now());
        let snap = snapshot("acme", "s1");
        let commit = OrgCommit {
            context: &ctx,
            snapshot: &snap,
            new_flags: &[],
            quarantined: &[],
            processed_keys: &[],
        };
        store.commit_org_run(&commit).unwrap();
        assert!(matches!(
            store.commit_org_run(&commit),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn unknown_org_loads_fresh_context() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let ctx = store.load_org_context("new-org", Utc::now()).unwrap();
        assert!(ctx.profile.sub_metrics.is_empty());
        assert!(ctx.shocks.is_empty());
    }
}
