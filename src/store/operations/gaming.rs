use chrono::{DateTime, Utc};

use crate::evi::types::{GamingFlag, GamingFlagOverride, QuarantinedSignal};
use crate::store::keys;
use crate::store::{Store, StoreError};

impl Store {
    pub fn list_gaming_flags(&self, org_id: &str) -> Result<Vec<GamingFlag>, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        let mut flags: Vec<GamingFlag> = Self::scan_prefix_values(&self.gaming_flags, &prefix)?;
        flags.sort_by_key(|f| f.created_at);
        Ok(flags)
    }

    pub fn get_gaming_flag(&self, org_id: &str, flag_id: &str) -> Result<Option<GamingFlag>, StoreError> {
        let key = keys::gaming_flag_key(org_id, flag_id)?;
        match self.gaming_flags.get(key.as_bytes())? {
            Some(raw) => Ok(Some(Self::deserialize(&raw)?)),
            None => Ok(None),
        }
    }

    /// Flags across all orgs whose expiry falls in `[from, to)`.
    pub fn gaming_flags_expiring_between(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<GamingFlag>, StoreError> {
        let mut out = Vec::new();
        for item in self.gaming_flags.iter() {
            let (_, value) = item?;
            let flag: GamingFlag = Self::deserialize(&value)?;
            if flag.expires_at >= from && flag.expires_at < to {
                out.push(flag);
            }
        }
        Ok(out)
    }

    pub fn list_flag_overrides(&self, org_id: &str) -> Result<Vec<GamingFlagOverride>, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        Self::scan_prefix_values(&self.flag_overrides, &prefix)
    }

    /// Stores a manual override. A flag can be overridden once; the flag record
    /// itself is left untouched.
    pub fn insert_flag_override(&self, record: &GamingFlagOverride) -> Result<(), StoreError> {
        let key = keys::flag_override_key(&record.org_id, &record.flag_id)?;
        let bytes = Self::serialize(record)?;
        match self
            .flag_overrides
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(bytes))?
        {
            Ok(()) => Ok(()),
            Err(_) => Err(StoreError::Conflict {
                entity: "gaming_flag_override".to_string(),
                key,
            }),
        }
    }

    /// Oldest first.
    pub fn list_quarantine(&self, org_id: &str) -> Result<Vec<QuarantinedSignal>, StoreError> {
        let prefix = keys::org_prefix(org_id)?;
        Self::scan_prefix_values(&self.quarantine, &prefix)
    }
}
