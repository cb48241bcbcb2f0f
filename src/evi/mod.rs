//! Earned Visibility Index engine: normalization, component scoring, decay,
//! reinforcement, shocks, momentum, anti-gaming and forecasting, composed by
//! [`pipeline::run`] and driven per org by [`engine::EviEngine`].

pub mod components;
pub mod config;
pub mod decay;
pub mod engine;
pub mod error;
pub mod forecast;
pub mod gaming;
pub mod momentum;
pub mod monitoring;
pub mod normalizer;
pub mod pipeline;
pub mod reinforcement;
pub mod shock;
pub mod types;
