pub const PROFILES: &str = "org_profiles";
pub const SNAPSHOTS: &str = "evi_snapshots";
pub const DECAY_STATES: &str = "decay_states";
pub const SHOCKS: &str = "shock_records";
pub const GAMING_FLAGS: &str = "gaming_flags";
pub const FLAG_OVERRIDES: &str = "gaming_flag_overrides";
pub const QUARANTINE: &str = "quarantined_signals";
pub const PROCESSED_ACTIVITY: &str = "processed_activity";
pub const META: &str = "meta";
