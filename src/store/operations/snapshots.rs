use crate::evi::types::EviSnapshot;
use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    pub fn latest_snapshot(&self, org_id: &str) -> Result<Option<EviSnapshot>, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        match self.snapshots.scan_prefix(prefix.as_bytes()).next_back() {
            Some(item) => {
                let (_, value) = item?;
                Ok(Some(Self::deserialize(&value)?))
            }
            None => Ok(None),
        }
    }

    /// Newest first.
    pub fn list_snapshots(&self, org_id: &str, limit: usize) -> Result<Vec<EviSnapshot>, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        let mut out = Vec::with_capacity(limit.min(256));
        for item in self.snapshots.scan_prefix(prefix.as_bytes()).rev().take(limit) {
            let (_, value) = item?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }

    pub fn count_snapshots(&self, org_id: &str) -> Result<usize, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        let mut count = 0usize;
        for item in self.snapshots.scan_prefix(prefix.as_bytes()) {
            let _ = item?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::evi::types::{MomentumStatus, OrgContext, Provenance, SnapshotTrigger};
    use crate::store::operations::context::OrgCommit;

    fn commit(store: &Store, ctx: &OrgContext, id: &str, offset_secs: i64, evi: f64) {
        let snap = EviSnapshot {
            id: id.to_string(),
            org_id: ctx.org_id().to_string(),
            timestamp: Utc::now() + Duration::seconds(offset_secs),
            evi,
            visibility: evi,
            authority: evi,
            momentum: evi,
            active_shock_ids: vec![],
            active_gaming_flag_ids: vec![],
            trigger: SnapshotTrigger::ScheduledTick,
            provenance: Provenance {
                sub_metrics: BTreeMap::new(),
                stale_metrics: vec![],
                composite_before_overlay: evi,
                shock_overlay: 0.0,
                shocks: vec![],
                evi_before_penalty: evi,
                penalty_multiplier: 1.0,
                penalties: vec![],
                momentum: MomentumStatus::default(),
                decay_rate_multiplier: 1.0,
                anomalies: vec![],
            },
        };
        store
            .commit_org_run(&OrgCommit {
                context: ctx,
                snapshot: &snap,
                new_flags: &[],
                quarantined: &[],
                processed_keys: &[],
            })
            .unwrap();
    }

    #[test]
    fn latest_and_listing_are_newest_first_and_org_scoped() {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("db").to_str().unwrap()).unwrap();
        let acme = OrgContext::new("acme", Utc::now());
        let globex = OrgContext::new("globex", Utc::now());

        commit(&store, &acme, "a1", 0, 40.0);
        commit(&store, &acme, "a2", 10, 45.0);
        commit(&store, &globex, "g1", 20, 90.0);

        let latest = store.latest_snapshot("acme").unwrap().unwrap();
        assert_eq!(latest.id, "a2");

        let listed = store.list_snapshots("acme", 10).unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a2", "a1"]);
        assert_eq!(store.count_snapshots("globex").unwrap(), 1);
        assert!(store.latest_snapshot("initech").unwrap().is_none());
    }
}
