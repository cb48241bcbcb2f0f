use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::store::keys;
use crate::store::{Store, StoreError};

/// Marker stored per consumed idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedActivity {
    pub processed_at: DateTime<Utc>,
    pub snapshot_id: String,
}

impl Store {
    pub fn is_activity_processed(&self, org_id: &str, idempotency_key: &str) -> Result<bool, StoreError> {
        let key = keys::processed_activity_key(org_id, idempotency_key)?;
        Ok(self.processed_activity.contains_key(key.as_bytes())?)
    }

    /// Subset of `candidates` already consumed for this org.
    pub fn processed_activity_keys<'a, I>(&self, org_id: &str, candidates: I) -> Result<HashSet<String>, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut seen = HashSet::new();
        for candidate in candidates {
            if self.is_activity_processed(org_id, candidate)? {
                seen.insert(candidate.to_string());
            }
        }
        Ok(seen)
    }

    /// Drops idempotency markers processed before `cutoff`. Returns how many were removed.
    pub fn sweep_processed_activity(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut stale = Vec::new();
        for item in self.processed_activity.iter() {
            let (key, value) = item?;
            let marker: ProcessedActivity = match Self::deserialize(&value) {
                Ok(marker) => marker,
                Err(e) => {
                    tracing::warn!(key = %String::from_utf8_lossy(&key), error = %e, "Unreadable idempotency marker, removing");
                    stale.push(key);
                    continue;
                }
            };
            if marker.processed_at < cutoff {
                stale.push(key);
            }
        }

        let removed = stale.len();
        for key in stale {
            self.processed_activity.remove(key)?;
        }
        Ok(removed)
    }
}
