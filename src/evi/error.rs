use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid signal range for {metric}: {value} outside {domain}")]
    InvalidSignalRange {
        metric: String,
        value: f64,
        domain: String,
    },
    #[error("incomplete component input, missing: {}", missing.join(", "))]
    IncompleteComponentInput { missing: Vec<String> },
    #[error("invalid shock event: {0}")]
    InvalidShockEvent(String),
    #[error("invalid activity event: {0}")]
    InvalidActivityEvent(String),
    #[error("forecast input invalid: {0}")]
    ForecastInputInvalid(String),
    #[error("forecast superseded for org={org_id}, horizon={horizon_weeks}")]
    ForecastSuperseded { org_id: String, horizon_weeks: u32 },
    #[error("not found: {entity} {key}")]
    NotFound { entity: String, key: String },
    #[error("invalid engine config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn not_found(entity: &str, key: &str) -> Self {
        Self::NotFound {
            entity: entity.to_string(),
            key: key.to_string(),
        }
    }

    /// Validation failures that abort only the affected org's run.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidSignalRange { .. }
                | Self::IncompleteComponentInput { .. }
                | Self::InvalidShockEvent(_)
                | Self::InvalidActivityEvent(_)
                | Self::ForecastInputInvalid(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_input_names_missing_keys() {
        let err = EngineError::IncompleteComponentInput {
            missing: vec!["visibility.snippets".into(), "momentum.sov_change".into()],
        };
        let msg = err.to_string();
        assert!(msg.contains("visibility.snippets"));
        assert!(msg.contains("momentum.sov_change"));
    }

    #[test]
    fn store_errors_are_not_input_errors() {
        let err = EngineError::from(StoreError::Validation("bad".into()));
        assert!(!err.is_input_error());
        assert!(EngineError::InvalidShockEvent("x".into()).is_input_error());
    }
}
