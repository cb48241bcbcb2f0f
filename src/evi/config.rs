use serde::{Deserialize, Serialize};

use crate::evi::types::{Component, ShockCategory, SubMetric};

const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightEntry {
    pub metric: SubMetric,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightTable {
    pub entries: Vec<WeightEntry>,
}

impl WeightTable {
    fn from_pairs(pairs: &[(SubMetric, f64)]) -> Self {
        Self {
            entries: pairs
                .iter()
                .map(|(metric, weight)| WeightEntry {
                    metric: *metric,
                    weight: *weight,
                })
                .collect(),
        }
    }

    pub fn weight_of(&self, metric: SubMetric) -> Option<f64> {
        self.entries
            .iter()
            .find(|e| e.metric == metric)
            .map(|e| e.weight)
    }

    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|e| e.weight).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeightsConfig {
    pub visibility: f64,
    pub authority: f64,
    pub momentum: f64,
    pub visibility_table: WeightTable,
    pub authority_table: WeightTable,
    pub momentum_table: WeightTable,
}

impl WeightsConfig {
    pub fn top_level(&self, component: Component) -> f64 {
        match component {
            Component::Visibility => self.visibility,
            Component::Authority => self.authority,
            Component::Momentum => self.momentum,
        }
    }

    pub fn table(&self, component: Component) -> &WeightTable {
        match component {
            Component::Visibility => &self.visibility_table,
            Component::Authority => &self.authority_table,
            Component::Momentum => &self.momentum_table,
        }
    }
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            visibility: 0.40,
            authority: 0.35,
            momentum: 0.25,
            visibility_table: WeightTable::from_pairs(&[
                (SubMetric::AiPresence, 0.35),
                (SubMetric::PressCoverage, 0.25),
                (SubMetric::SerpCoverage, 0.25),
                (SubMetric::Snippets, 0.15),
            ]),
            authority_table: WeightTable::from_pairs(&[
                (SubMetric::CitationQuality, 0.30),
                (SubMetric::DomainAuthority, 0.25),
                (SubMetric::JournalistMatch, 0.20),
                (SubMetric::SchemaCoverage, 0.15),
                (SubMetric::EeatDensity, 0.10),
            ]),
            momentum_table: WeightTable::from_pairs(&[
                (SubMetric::CitationVelocity, 0.30),
                (SubMetric::SovChange, 0.25),
                (SubMetric::ContentVelocity, 0.20),
                (SubMetric::TopicGrowth, 0.15),
                (SubMetric::RankingTrajectory, 0.10),
            ]),
        }
    }
}

/// Weekly decay constants λ per sub-metric.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayConfig {
    pub ai_presence: f64,
    pub press_coverage: f64,
    pub serp_coverage: f64,
    pub snippets: f64,
    pub citation_quality: f64,
    pub domain_authority: f64,
    pub journalist_match: f64,
    pub schema_coverage: f64,
    pub eeat_density: f64,
    /// Shared by every momentum sub-metric.
    pub momentum: f64,
}

impl DecayConfig {
    pub fn lambda_per_week(&self, metric: SubMetric) -> f64 {
        match metric {
            SubMetric::AiPresence => self.ai_presence,
            SubMetric::PressCoverage => self.press_coverage,
            SubMetric::SerpCoverage => self.serp_coverage,
            SubMetric::Snippets => self.snippets,
            SubMetric::CitationQuality => self.citation_quality,
            SubMetric::DomainAuthority => self.domain_authority,
            SubMetric::JournalistMatch => self.journalist_match,
            SubMetric::SchemaCoverage => self.schema_coverage,
            SubMetric::EeatDensity => self.eeat_density,
            SubMetric::CitationVelocity
            | SubMetric::SovChange
            | SubMetric::ContentVelocity
            | SubMetric::TopicGrowth
            | SubMetric::RankingTrajectory => self.momentum,
        }
    }
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            ai_presence: 0.025,
            press_coverage: 0.10,
            serp_coverage: 0.05,
            snippets: 0.10,
            citation_quality: 0.015,
            domain_authority: 0.008,
            journalist_match: 0.05,
            schema_coverage: 0.05,
            eeat_density: 0.05,
            momentum: 0.20,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurveParams {
    pub k: f64,
    pub s: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReinforcementConfig {
    pub visibility: CurveParams,
    pub authority: CurveParams,
    pub momentum: CurveParams,
    pub cross_pillar_bonus: f64,
    pub cross_pillar_cap: u32,
    pub consistency_step: f64,
    pub consistency_cap_weeks: u32,
    #[serde(default = "default_idempotency_retention_days")]
    pub idempotency_retention_days: i64,
}

fn default_idempotency_retention_days() -> i64 {
    30
}

impl ReinforcementConfig {
    pub fn curve(&self, component: Component) -> CurveParams {
        match component {
            Component::Visibility => self.visibility,
            Component::Authority => self.authority,
            Component::Momentum => self.momentum,
        }
    }
}

impl Default for ReinforcementConfig {
    fn default() -> Self {
        Self {
            visibility: CurveParams { k: 6.0, s: 0.5 },
            authority: CurveParams { k: 4.0, s: 0.4 },
            momentum: CurveParams { k: 8.0, s: 0.6 },
            cross_pillar_bonus: 0.15,
            cross_pillar_cap: 3,
            consistency_step: 0.1,
            consistency_cap_weeks: 12,
            idempotency_retention_days: 30,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockProfile {
    pub min_magnitude: f64,
    pub max_magnitude: f64,
    /// λs, per day
    pub decay_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockConfig {
    pub tier1_media_win: ShockProfile,
    pub viral_coverage: ShockProfile,
    pub ai_citation_breakout: ShockProfile,
    pub crisis: ShockProfile,
    pub algorithm_update: ShockProfile,
    pub competitor_move: ShockProfile,
    pub passive_recovery_rate: f64,
    pub active_recovery_rate: f64,
    pub expiry_threshold: f64,
    /// Share of the initial magnitude below which an active shock becomes decaying.
    pub active_fraction: f64,
}

impl ShockConfig {
    pub fn profile(&self, category: ShockCategory) -> ShockProfile {
        match category {
            ShockCategory::Tier1MediaWin => self.tier1_media_win,
            ShockCategory::ViralCoverage => self.viral_coverage,
            ShockCategory::AiCitationBreakout => self.ai_citation_breakout,
            ShockCategory::Crisis => self.crisis,
            ShockCategory::AlgorithmUpdate => self.algorithm_update,
            ShockCategory::CompetitorMove => self.competitor_move,
        }
    }

    fn profiles(&self) -> [(&'static str, ShockProfile); 6] {
        [
            ("tier1MediaWin", self.tier1_media_win),
            ("viralCoverage", self.viral_coverage),
            ("aiCitationBreakout", self.ai_citation_breakout),
            ("crisis", self.crisis),
            ("algorithmUpdate", self.algorithm_update),
            ("competitorMove", self.competitor_move),
        ]
    }
}

impl Default for ShockConfig {
    fn default() -> Self {
        Self {
            tier1_media_win: ShockProfile {
                min_magnitude: 8.0,
                max_magnitude: 15.0,
                decay_rate: 0.05,
            },
            viral_coverage: ShockProfile {
                min_magnitude: 10.0,
                max_magnitude: 20.0,
                decay_rate: 0.15,
            },
            ai_citation_breakout: ShockProfile {
                min_magnitude: 5.0,
                max_magnitude: 12.0,
                decay_rate: 0.03,
            },
            crisis: ShockProfile {
                min_magnitude: 10.0,
                max_magnitude: 25.0,
                decay_rate: 0.06,
            },
            algorithm_update: ShockProfile {
                min_magnitude: 5.0,
                max_magnitude: 15.0,
                decay_rate: 0.04,
            },
            competitor_move: ShockProfile {
                min_magnitude: 3.0,
                max_magnitude: 8.0,
                decay_rate: 0.08,
            },
            passive_recovery_rate: 0.02,
            active_recovery_rate: 0.15,
            expiry_threshold: 0.1,
            active_fraction: 0.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumConfig {
    pub window_weeks: usize,
    pub decay_boost: f64,
    pub reversal_step: f64,
    pub history_weeks: usize,
}

impl Default for MomentumConfig {
    fn default() -> Self {
        Self {
            window_weeks: 3,
            decay_boost: 0.5,
            reversal_step: 0.2,
            history_weeks: 26,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingConfig {
    /// Week-over-week relative growth, 2.0 == +200%
    pub link_spike_threshold: f64,
    pub press_surge_threshold: f64,
    /// Relative drop of distinct domains per citation source, 0.5 == -50%
    pub diversity_collapse_threshold: f64,
    pub min_baseline_volume: u64,
    pub min_penalty: f64,
    pub max_penalty: f64,
    pub flag_duration_days: i64,
    pub corroboration_window_days: i64,
}

impl Default for GamingConfig {
    fn default() -> Self {
        Self {
            link_spike_threshold: 2.0,
            press_surge_threshold: 3.0,
            diversity_collapse_threshold: 0.5,
            min_baseline_volume: 5,
            min_penalty: 0.1,
            max_penalty: 0.5,
            flag_duration_days: 90,
            corroboration_window_days: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForecastConfig {
    pub low_base_factor: f64,
    pub expected_base_factor: f64,
    pub high_base_factor: f64,
    pub confirmed_factor: f64,
    pub success_rate: f64,
    pub opportunity_factor: f64,
    pub max_horizon_weeks: u32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            low_base_factor: 0.85,
            expected_base_factor: 0.92,
            high_base_factor: 0.98,
            confirmed_factor: 0.7,
            success_rate: 0.85,
            opportunity_factor: 1.2,
            max_horizon_weeks: 52,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EviConfig {
    pub weights: WeightsConfig,
    pub decay: DecayConfig,
    pub reinforcement: ReinforcementConfig,
    pub shocks: ShockConfig,
    #[serde(default)]
    pub momentum: MomentumConfig,
    #[serde(default)]
    pub gaming: GamingConfig,
    #[serde(default)]
    pub forecast: ForecastConfig,
}

impl EviConfig {
    pub fn from_env(env_config: &crate::config::EviEnvConfig) -> Self {
        let mut config = Self::default();
        config.forecast.success_rate = env_config.forecast_success_rate;
        config.reinforcement.idempotency_retention_days = env_config.idempotency_retention_days;
        config
    }

    pub fn validate(&self) -> Result<(), String> {
        let w = &self.weights;
        for (name, value) in [
            ("visibility", w.visibility),
            ("authority", w.authority),
            ("momentum", w.momentum),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("weights.{name} must be in [0,1]"));
            }
        }
        let top = w.visibility + w.authority + w.momentum;
        if (top - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(format!("top-level weights must sum to 1.0 (got {top:.4})"));
        }

        for component in Component::ALL {
            let table = w.table(component);
            for metric in component.sub_metrics() {
                if table.weight_of(*metric).is_none() {
                    return Err(format!(
                        "weights.{component} is missing {}",
                        metric.as_str()
                    ));
                }
            }
            for entry in &table.entries {
                if entry.metric.component() != component {
                    return Err(format!(
                        "weights.{component} contains foreign metric {}",
                        entry.metric.qualified_name()
                    ));
                }
                if !(0.0..=1.0).contains(&entry.weight) {
                    return Err(format!(
                        "weights.{component}.{} must be in [0,1]",
                        entry.metric
                    ));
                }
            }
            if table.entries.len() != component.sub_metrics().len() {
                return Err(format!("weights.{component} has duplicate entries"));
            }
            let sum = table.sum();
            if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
                return Err(format!(
                    "weights.{component} sub-weights must sum to 1.0 (got {sum:.4})"
                ));
            }
        }

        for metric in SubMetric::ALL {
            let lambda = self.decay.lambda_per_week(metric);
            if !lambda.is_finite() || lambda < 0.0 {
                return Err(format!(
                    "decay.{} must be a finite value >= 0",
                    metric.qualified_name()
                ));
            }
        }

        let r = &self.reinforcement;
        for component in Component::ALL {
            let curve = r.curve(component);
            if curve.k <= 0.0 || curve.s <= 0.0 {
                return Err(format!("reinforcement.{component} k and s must be > 0"));
            }
        }
        if !(0.0..=1.0).contains(&r.cross_pillar_bonus) {
            return Err("reinforcement.cross_pillar_bonus must be in [0,1]".to_string());
        }
        if r.cross_pillar_cap == 0 {
            return Err("reinforcement.cross_pillar_cap must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&r.consistency_step) {
            return Err("reinforcement.consistency_step must be in [0,1]".to_string());
        }
        if r.idempotency_retention_days <= 0 {
            return Err("reinforcement.idempotency_retention_days must be > 0".to_string());
        }

        let s = &self.shocks;
        for (name, profile) in s.profiles() {
            if profile.min_magnitude < 0.0 || profile.min_magnitude > profile.max_magnitude {
                return Err(format!("shocks.{name} magnitude range is invalid"));
            }
            if profile.decay_rate <= 0.0 {
                return Err(format!("shocks.{name}.decay_rate must be > 0"));
            }
        }
        if !(0.0..1.0).contains(&s.passive_recovery_rate) || s.passive_recovery_rate == 0.0 {
            return Err("shocks.passive_recovery_rate must be in (0,1)".to_string());
        }
        if !(0.0..1.0).contains(&s.active_recovery_rate) || s.active_recovery_rate == 0.0 {
            return Err("shocks.active_recovery_rate must be in (0,1)".to_string());
        }
        if s.expiry_threshold <= 0.0 {
            return Err("shocks.expiry_threshold must be > 0".to_string());
        }
        if !(0.0..=1.0).contains(&s.active_fraction) {
            return Err("shocks.active_fraction must be in [0,1]".to_string());
        }

        let m = &self.momentum;
        if m.window_weeks == 0 {
            return Err("momentum.window_weeks must be > 0".to_string());
        }
        if m.history_weeks <= m.window_weeks {
            return Err("momentum.history_weeks must exceed window_weeks".to_string());
        }
        if m.decay_boost < 0.0 || m.reversal_step < 0.0 {
            return Err("momentum.decay_boost and reversal_step must be >= 0".to_string());
        }

        let g = &self.gaming;
        if g.link_spike_threshold <= 0.0 || g.press_surge_threshold <= 0.0 {
            return Err("gaming spike thresholds must be > 0".to_string());
        }
        if !(0.0..1.0).contains(&g.diversity_collapse_threshold) {
            return Err("gaming.diversity_collapse_threshold must be in [0,1)".to_string());
        }
        if !(0.1..=0.5).contains(&g.min_penalty)
            || !(0.1..=0.5).contains(&g.max_penalty)
            || g.min_penalty > g.max_penalty
        {
            return Err("gaming penalties must satisfy 0.1 <= min <= max <= 0.5".to_string());
        }
        if g.flag_duration_days != 90 {
            return Err("gaming.flag_duration_days is fixed at 90".to_string());
        }
        if g.corroboration_window_days < 0 {
            return Err("gaming.corroboration_window_days must be >= 0".to_string());
        }

        let f = &self.forecast;
        if !(f.low_base_factor <= f.expected_base_factor
            && f.expected_base_factor <= f.high_base_factor)
        {
            return Err("forecast base factors must be ordered low <= expected <= high".to_string());
        }
        if f.low_base_factor < 0.0 || f.high_base_factor > 1.0 {
            return Err("forecast base factors must be in [0,1]".to_string());
        }
        if !(f.confirmed_factor <= f.success_rate && f.success_rate <= f.opportunity_factor) {
            return Err(
                "forecast factors must satisfy confirmed <= successRate <= opportunity".to_string(),
            );
        }
        if !(0.7..=1.2).contains(&f.success_rate) {
            return Err("forecast.success_rate must be in [0.7,1.2]".to_string());
        }
        if f.max_horizon_weeks == 0 {
            return Err("forecast.max_horizon_weeks must be > 0".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = EviConfig::default();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn unbalanced_top_level_weights_are_rejected() {
        let mut cfg = EviConfig::default();
        cfg.weights.momentum = 0.30;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("sum to 1.0"));
    }

    #[test]
    fn missing_sub_weight_is_rejected() {
        let mut cfg = EviConfig::default();
        cfg.weights.authority_table.entries.pop();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn flag_duration_cannot_be_shortened() {
        let mut cfg = EviConfig::default();
        cfg.gaming.flag_duration_days = 30;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn success_rate_outside_band_is_rejected() {
        let mut cfg = EviConfig::default();
        cfg.forecast.success_rate = 0.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn config_roundtrips_through_camel_case_json() {
        let cfg = EviConfig::default();
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json["reinforcement"]["crossPillarBonus"].is_number());
        let back: EviConfig = serde_json::from_value(json).unwrap();
        assert!(back.validate().is_ok());
    }
}
