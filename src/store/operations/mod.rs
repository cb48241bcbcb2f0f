pub mod activity;
pub mod context;
pub mod gaming;
pub mod snapshots;
