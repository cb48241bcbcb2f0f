use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evi::config::ForecastConfig;
use crate::evi::error::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    /// Counts in every band
    Confirmed,
    /// Counts in expected and high
    Planned,
    /// Counts in high only
    Opportunity,
}

fn default_lands_in_weeks() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedAction {
    pub id: String,
    pub status: ActionStatus,
    pub expected_driver_lift: Option<f64>,
    pub driver_weight: Option<f64>,
    pub success_probability: Option<f64>,
    #[serde(default = "default_lands_in_weeks")]
    pub lands_in_weeks: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastRequest {
    pub horizon_weeks: u32,
    #[serde(default)]
    pub actions: Vec<PlannedAction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastPoint {
    pub week: u32,
    pub low: f64,
    pub expected: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionContribution {
    pub action_id: String,
    pub status: ActionStatus,
    pub lands_in_weeks: u32,
    /// lift × weight × probability
    pub effect: f64,
    pub low: f64,
    pub expected: f64,
    pub high: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    pub org_id: String,
    pub base_snapshot_id: String,
    pub base_evi: f64,
    pub horizon_weeks: u32,
    pub success_rate: f64,
    pub generated_at: DateTime<Utc>,
    pub series: Vec<ForecastPoint>,
    pub breakdown: Vec<ActionContribution>,
}

fn required(value: Option<f64>, field: &str, action_id: &str) -> Result<f64, EngineError> {
    value.ok_or_else(|| {
        EngineError::ForecastInputInvalid(format!("action {action_id} is missing {field}"))
    })
}

fn unit_interval(value: f64, field: &str, action_id: &str) -> Result<f64, EngineError> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(EngineError::ForecastInputInvalid(format!(
            "action {action_id}: {field} {value} outside [0, 1]"
        )));
    }
    Ok(value)
}

/// `expected_driver_lift × driver_weight × success_probability`
pub fn action_effect(action: &PlannedAction) -> Result<f64, EngineError> {
    let id = action.id.as_str();
    let lift = required(action.expected_driver_lift, "expectedDriverLift", id)?;
    if !lift.is_finite() || lift < 0.0 {
        return Err(EngineError::ForecastInputInvalid(format!(
            "action {id}: expectedDriverLift {lift} must be a finite value >= 0"
        )));
    }
    let weight = unit_interval(required(action.driver_weight, "driverWeight", id)?, "driverWeight", id)?;
    let probability = unit_interval(
        required(action.success_probability, "successProbability", id)?,
        "successProbability",
        id,
    )?;
    Ok(lift * weight * probability)
}

pub fn validate_request(request: &ForecastRequest, config: &ForecastConfig) -> Result<(), EngineError> {
    if request.horizon_weeks == 0 || request.horizon_weeks > config.max_horizon_weeks {
        return Err(EngineError::ForecastInputInvalid(format!(
            "horizonWeeks must be in [1, {}]",
            config.max_horizon_weeks
        )));
    }
    let mut ids = HashSet::new();
    for action in &request.actions {
        if action.id.trim().is_empty() {
            return Err(EngineError::ForecastInputInvalid(
                "action id must not be empty".to_string(),
            ));
        }
        if !ids.insert(action.id.as_str()) {
            return Err(EngineError::ForecastInputInvalid(format!(
                "duplicate action id {}",
                action.id
            )));
        }
        action_effect(action)?;
    }
    Ok(())
}

/// Low/expected/high series for weeks `1..=horizon` from `base_evi`.
pub fn project(
    base_evi: f64,
    request: &ForecastRequest,
    config: &ForecastConfig,
) -> Result<(Vec<ForecastPoint>, Vec<ActionContribution>), EngineError> {
    validate_request(request, config)?;

    let mut breakdown = Vec::with_capacity(request.actions.len());
    for action in &request.actions {
        let effect = action_effect(action)?;
        let (low, expected, high) = match action.status {
            ActionStatus::Confirmed => (
                effect * config.confirmed_factor,
                effect * config.success_rate,
                effect * config.opportunity_factor,
            ),
            ActionStatus::Planned => (
                0.0,
                effect * config.success_rate,
                effect * config.opportunity_factor,
            ),
            ActionStatus::Opportunity => (0.0, 0.0, effect * config.opportunity_factor),
        };
        breakdown.push(ActionContribution {
            action_id: action.id.clone(),
            status: action.status,
            lands_in_weeks: action.lands_in_weeks,
            effect,
            low,
            expected,
            high,
        });
    }

    let series = (1..=request.horizon_weeks)
        .map(|week| {
            let landed = breakdown.iter().filter(|c| c.lands_in_weeks <= week);
            let (mut low, mut expected, mut high) = (
                base_evi * config.low_base_factor,
                base_evi * config.expected_base_factor,
                base_evi * config.high_base_factor,
            );
            for c in landed {
                low += c.low;
                expected += c.expected;
                high += c.high;
            }
            ForecastPoint {
                week,
                low: low.clamp(0.0, 100.0),
                expected: expected.clamp(0.0, 100.0),
                high: high.clamp(0.0, 100.0),
            }
        })
        .collect();

    Ok((series, breakdown))
}
