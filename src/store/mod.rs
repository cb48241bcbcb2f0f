pub mod keys;
pub mod migrate;
pub mod operations;
pub mod trees;

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::Db;
use thiserror::Error;

#[derive(Debug)]
pub struct Store {
    db: Db,
    pub profiles: sled::Tree,
    pub snapshots: sled::Tree,
    pub decay_states: sled::Tree,
    pub shocks: sled::Tree,
    pub gaming_flags: sled::Tree,
    pub flag_overrides: sled::Tree,
    pub quarantine: sled::Tree,
    pub processed_activity: sled::Tree,
    pub meta: sled::Tree,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found: entity={entity}, key={key}")]
    NotFound { entity: String, key: String },
    #[error("conflict: entity={entity}, key={key}")]
    Conflict { entity: String, key: String },
    #[error("validation error: {0}")]
    Validation(String),
    #[error("migration error at version {version}: {message}")]
    Migration { version: u32, message: String },
}

impl Store {
    pub fn open(sled_path: &str) -> Result<Self, StoreError> {
        let db = sled::open(sled_path)?;
        let profiles = db.open_tree(trees::PROFILES)?;
        let snapshots = db.open_tree(trees::SNAPSHOTS)?;
        let decay_states = db.open_tree(trees::DECAY_STATES)?;
        let shocks = db.open_tree(trees::SHOCKS)?;
        let gaming_flags = db.open_tree(trees::GAMING_FLAGS)?;
        let flag_overrides = db.open_tree(trees::FLAG_OVERRIDES)?;
        let quarantine = db.open_tree(trees::QUARANTINE)?;
        let processed_activity = db.open_tree(trees::PROCESSED_ACTIVITY)?;
        let meta = db.open_tree(trees::META)?;

        Ok(Self {
            db,
            profiles,
            snapshots,
            decay_states,
            shocks,
            gaming_flags,
            flag_overrides,
            quarantine,
            processed_activity,
            meta,
        })
    }

    pub fn run_migrations(&self) -> Result<(), StoreError> {
        migrate::run(self)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }

    pub fn raw_db(&self) -> &Db {
        &self.db
    }

    pub(crate) fn serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(value)?)
    }

    pub(crate) fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Decodes every value under `prefix` in `tree`.
    pub(crate) fn scan_prefix_values<T: DeserializeOwned>(
        tree: &sled::Tree,
        prefix: &str,
    ) -> Result<Vec<T>, StoreError> {
        let mut out = Vec::new();
        for item in tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item?;
            out.push(Self::deserialize(&value)?);
        }
        Ok(out)
    }
}
