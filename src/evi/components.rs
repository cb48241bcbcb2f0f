use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::evi::config::WeightsConfig;
use crate::evi::error::EngineError;
use crate::evi::types::{Component, SubMetric};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentScores {
    pub visibility: f64,
    pub authority: f64,
    pub momentum: f64,
    pub composite: f64,
}

impl ComponentScores {
    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::Visibility => self.visibility,
            Component::Authority => self.authority,
            Component::Momentum => self.momentum,
        }
    }
}

fn missing_for(component: Component, values: &BTreeMap<SubMetric, f64>) -> Vec<String> {
    component
        .sub_metrics()
        .iter()
        .filter(|m| !values.contains_key(m))
        .map(|m| m.qualified_name())
        .collect()
}

fn weighted_sum(component: Component, values: &BTreeMap<SubMetric, f64>, weights: &WeightsConfig) -> f64 {
    let table = weights.table(component);
    component
        .sub_metrics()
        .iter()
        .map(|m| values.get(m).copied().unwrap_or(0.0) * table.weight_of(*m).unwrap_or(0.0))
        .sum()
}

/// `Σ(value_i × weight_i)` over one component's sub-metrics.
pub fn component_score(
    component: Component,
    values: &BTreeMap<SubMetric, f64>,
    weights: &WeightsConfig,
) -> Result<f64, EngineError> {
    let missing = missing_for(component, values);
    if !missing.is_empty() {
        return Err(EngineError::IncompleteComponentInput { missing });
    }
    Ok(weighted_sum(component, values, weights))
}

/// All three components plus the clamped composite. Every absent sub-metric is
/// reported, not just the first one found.
pub fn score(
    values: &BTreeMap<SubMetric, f64>,
    weights: &WeightsConfig,
) -> Result<ComponentScores, EngineError> {
    let missing: Vec<String> = Component::ALL
        .iter()
        .flat_map(|c| missing_for(*c, values))
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::IncompleteComponentInput { missing });
    }

    let visibility = weighted_sum(Component::Visibility, values, weights);
    let authority = weighted_sum(Component::Authority, values, weights);
    let momentum = weighted_sum(Component::Momentum, values, weights);
    let composite = (visibility * weights.visibility
        + authority * weights.authority
        + momentum * weights.momentum)
        .clamp(0.0, 100.0);

    Ok(ComponentScores {
        visibility,
        authority,
        momentum,
        composite,
    })
}
