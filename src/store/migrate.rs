use crate::evi::types::OrgVisibilityProfile;
use crate::store::{Store, StoreError};

const VERSION_KEY: &str = "_meta:version";

type MigrationFn = fn(&Store) -> Result<(), StoreError>;

fn migrations() -> Vec<(&'static str, MigrationFn)> {
    vec![
        ("001_initial", m001_initial),
        ("002_profile_reversal_multiplier", m002_profile_reversal_multiplier),
    ]
}

/// Applies every pending migration in order.
///
/// Each migration must be idempotent: the process can die after the migration
/// body ran but before its version was persisted. Versions only move forward.
pub fn run(store: &Store) -> Result<(), StoreError> {
    let current = get_current_version(store)?;

    for (index, (name, func)) in migrations().iter().enumerate() {
        let version = (index + 1) as u32;
        if version > current {
            tracing::info!(version, name, "Running migration");
            func(store)?;
            set_version(store, version)?;
            tracing::info!(version, name, "Migration complete");
        } else {
            tracing::debug!(version, name, "Migration already applied, skipping");
        }
    }

    Ok(())
}

pub fn get_current_version(store: &Store) -> Result<u32, StoreError> {
    match store.meta.get(VERSION_KEY.as_bytes())? {
        Some(raw) => {
            let bytes: [u8; 4] = raw.as_ref().try_into().map_err(|_| StoreError::Migration {
                version: 0,
                message: format!("malformed version marker ({} bytes)", raw.len()),
            })?;
            Ok(u32::from_be_bytes(bytes))
        }
        None => Ok(0),
    }
}

pub fn set_version(store: &Store, version: u32) -> Result<(), StoreError> {
    let current = get_current_version(store)?;
    if version < current {
        return Err(StoreError::Migration {
            version,
            message: format!("Refuse to downgrade from {current} to {version}"),
        });
    }

    store
        .meta
        .insert(VERSION_KEY.as_bytes(), &version.to_be_bytes())?;
    Ok(())
}

fn m001_initial(_store: &Store) -> Result<(), StoreError> {
    Ok(())
}

/// Profiles written before momentum tracking carried a zero multiplier.
fn m002_profile_reversal_multiplier(store: &Store) -> Result<(), StoreError> {
    for item in store.profiles.iter() {
        let (key, value) = item?;
        let mut profile: OrgVisibilityProfile = Store::deserialize(&value)?;
        if profile.momentum.reversal_effort_multiplier < 1.0 {
            profile.momentum.reversal_effort_multiplier = 1.0;
            store.profiles.insert(key, Store::serialize(&profile)?)?;
        }
    }
    Ok(())
}
