use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const SECS_PER_WEEK: f64 = 604_800.0;
pub const SECS_PER_DAY: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    Visibility,
    Authority,
    Momentum,
}

impl Component {
    pub const ALL: [Component; 3] = [
        Component::Visibility,
        Component::Authority,
        Component::Momentum,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visibility => "visibility",
            Self::Authority => "authority",
            Self::Momentum => "momentum",
        }
    }

    pub fn sub_metrics(self) -> &'static [SubMetric] {
        match self {
            Self::Visibility => &[
                SubMetric::AiPresence,
                SubMetric::PressCoverage,
                SubMetric::SerpCoverage,
                SubMetric::Snippets,
            ],
            Self::Authority => &[
                SubMetric::CitationQuality,
                SubMetric::DomainAuthority,
                SubMetric::JournalistMatch,
                SubMetric::SchemaCoverage,
                SubMetric::EeatDensity,
            ],
            Self::Momentum => &[
                SubMetric::CitationVelocity,
                SubMetric::SovChange,
                SubMetric::ContentVelocity,
                SubMetric::TopicGrowth,
                SubMetric::RankingTrajectory,
            ],
        }
    }
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubMetric {
    AiPresence,
    PressCoverage,
    SerpCoverage,
    Snippets,
    CitationQuality,
    DomainAuthority,
    JournalistMatch,
    SchemaCoverage,
    EeatDensity,
    CitationVelocity,
    SovChange,
    ContentVelocity,
    TopicGrowth,
    RankingTrajectory,
}

impl SubMetric {
    pub const ALL: [SubMetric; 14] = [
        SubMetric::AiPresence,
        SubMetric::PressCoverage,
        SubMetric::SerpCoverage,
        SubMetric::Snippets,
        SubMetric::CitationQuality,
        SubMetric::DomainAuthority,
        SubMetric::JournalistMatch,
        SubMetric::SchemaCoverage,
        SubMetric::EeatDensity,
        SubMetric::CitationVelocity,
        SubMetric::SovChange,
        SubMetric::ContentVelocity,
        SubMetric::TopicGrowth,
        SubMetric::RankingTrajectory,
    ];

    pub fn component(self) -> Component {
        match self {
            Self::AiPresence | Self::PressCoverage | Self::SerpCoverage | Self::Snippets => {
                Component::Visibility
            }
            Self::CitationQuality
            | Self::DomainAuthority
            | Self::JournalistMatch
            | Self::SchemaCoverage
            | Self::EeatDensity => Component::Authority,
            Self::CitationVelocity
            | Self::SovChange
            | Self::ContentVelocity
            | Self::TopicGrowth
            | Self::RankingTrajectory => Component::Momentum,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AiPresence => "ai_presence",
            Self::PressCoverage => "press_coverage",
            Self::SerpCoverage => "serp_coverage",
            Self::Snippets => "snippets",
            Self::CitationQuality => "citation_quality",
            Self::DomainAuthority => "domain_authority",
            Self::JournalistMatch => "journalist_match",
            Self::SchemaCoverage => "schema_coverage",
            Self::EeatDensity => "eeat_density",
            Self::CitationVelocity => "citation_velocity",
            Self::SovChange => "sov_change",
            Self::ContentVelocity => "content_velocity",
            Self::TopicGrowth => "topic_growth",
            Self::RankingTrajectory => "ranking_trajectory",
        }
    }

    /// `component.sub_metric`, used in logs and error messages.
    pub fn qualified_name(self) -> String {
        format!("{}.{}", self.component().as_str(), self.as_str())
    }
}

impl fmt::Display for SubMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pillar {
    Pr,
    Content,
    Seo,
    AiSearch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    PressPlacement,
    AiCitation,
    ContentPublished,
    SeoImprovement,
    SchemaUpdate,
    BacklinkAcquired,
    TopicExpansion,
}

impl ActivityType {
    /// Sub-metrics whose decay timer this activity resets.
    pub fn reinforces(self) -> &'static [SubMetric] {
        match self {
            Self::PressPlacement => &[
                SubMetric::PressCoverage,
                SubMetric::JournalistMatch,
                SubMetric::SovChange,
            ],
            Self::AiCitation => &[
                SubMetric::AiPresence,
                SubMetric::CitationQuality,
                SubMetric::CitationVelocity,
            ],
            Self::ContentPublished => &[
                SubMetric::Snippets,
                SubMetric::EeatDensity,
                SubMetric::ContentVelocity,
            ],
            Self::SeoImprovement => &[SubMetric::SerpCoverage, SubMetric::RankingTrajectory],
            Self::SchemaUpdate => &[SubMetric::SchemaCoverage],
            Self::BacklinkAcquired => &[SubMetric::DomainAuthority],
            Self::TopicExpansion => &[SubMetric::TopicGrowth],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub idempotency_key: String,
    pub org_id: String,
    pub pillars: Vec<Pillar>,
    #[serde(rename = "type")]
    pub activity_type: ActivityType,
    pub magnitude: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockCategory {
    Tier1MediaWin,
    ViralCoverage,
    AiCitationBreakout,
    Crisis,
    AlgorithmUpdate,
    CompetitorMove,
}

impl ShockCategory {
    pub fn is_media(self) -> bool {
        matches!(self, Self::Tier1MediaWin | Self::ViralCoverage)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockDirection {
    Positive,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockEvent {
    pub id: String,
    pub org_id: String,
    pub category: ShockCategory,
    pub direction: ShockDirection,
    pub magnitude_seed: f64,
    /// Overrides the category's λs (per day) when present.
    #[serde(default)]
    pub decay_rate: Option<f64>,
    #[serde(default)]
    pub response_active: bool,
    /// Explicit daily recovery rate for negative shocks.
    #[serde(default)]
    pub recovery_rate: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShockState {
    Active,
    Decaying,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockRecord {
    pub event: ShockEvent,
    pub magnitude: f64,
    pub decay_rate: f64,
    pub recovery_rate: f64,
    pub contribution: f64,
    pub evaluated_at: DateTime<Utc>,
    pub state: ShockState,
}

/// Per (org, component, sub-component) decay bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayState {
    pub metric: SubMetric,
    pub last_reinforced_at: Option<DateTime<Utc>>,
    /// Instant the stored sub-metric value was last brought current.
    pub anchored_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubMetricState {
    pub value: f64,
    pub observed_at: DateTime<Utc>,
    #[serde(default)]
    pub stale: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyStreak {
    pub consecutive_active_weeks: u32,
    pub last_active_week: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyPoint {
    pub week_start: NaiveDate,
    pub evi: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MomentumStatus {
    pub negative_momentum: bool,
    pub weeks_in_decline: u32,
    pub reversal_effort_multiplier: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GamingPattern {
    BacklinkSpike,
    CitationSourceSpike,
    PressSurge,
    DiversityCollapse,
}

impl GamingPattern {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BacklinkSpike => "backlink_spike",
            Self::CitationSourceSpike => "citation_source_spike",
            Self::PressSurge => "press_surge",
            Self::DiversityCollapse => "diversity_collapse",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingFlag {
    pub id: String,
    pub org_id: String,
    pub pattern_type: GamingPattern,
    pub penalty_rate: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl GamingFlag {
    pub fn applies_at(&self, at: DateTime<Utc>) -> bool {
        self.created_at <= at && at < self.expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingFlagOverride {
    pub flag_id: String,
    pub org_id: String,
    pub operator: String,
    pub reason: String,
    pub overridden_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuarantinedSignal {
    pub org_id: String,
    pub flag_id: String,
    pub metric: SubMetric,
    pub raw_value: Option<f64>,
    pub quarantined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeCounters {
    pub backlinks: u64,
    pub citation_sources: u64,
    pub press_mentions: u64,
    pub distinct_citation_domains: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeObservation {
    pub week_start: NaiveDate,
    pub counters: VolumeCounters,
}

/// Per-tenant state container. Only the owning org's pipeline mutates it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrgVisibilityProfile {
    pub org_id: String,
    pub sub_metrics: BTreeMap<SubMetric, SubMetricState>,
    #[serde(default)]
    pub streak: ConsistencyStreak,
    #[serde(default)]
    pub weekly_history: Vec<WeeklyPoint>,
    #[serde(default)]
    pub momentum: MomentumStatus,
    /// Last completed week's volume counters, plus the running week's.
    #[serde(default)]
    pub previous_volume: Option<VolumeObservation>,
    #[serde(default)]
    pub current_volume: Option<VolumeObservation>,
    #[serde(default)]
    pub last_press_corroboration_at: Option<DateTime<Utc>>,
    pub last_tick_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl OrgVisibilityProfile {
    pub fn new(org_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            org_id: org_id.to_string(),
            sub_metrics: BTreeMap::new(),
            streak: ConsistencyStreak::default(),
            weekly_history: Vec::new(),
            momentum: MomentumStatus {
                reversal_effort_multiplier: 1.0,
                ..MomentumStatus::default()
            },
            previous_volume: None,
            current_volume: None,
            last_press_corroboration_at: None,
            last_tick_at: None,
            created_at: now,
        }
    }

    pub fn values(&self) -> BTreeMap<SubMetric, f64> {
        self.sub_metrics
            .iter()
            .map(|(metric, state)| (*metric, state.value))
            .collect()
    }
}

/// Everything one org's pipeline run reads and writes, loaded and committed as a unit.
#[derive(Debug, Clone)]
pub struct OrgContext {
    pub profile: OrgVisibilityProfile,
    pub decay_states: BTreeMap<SubMetric, DecayState>,
    pub shocks: Vec<ShockRecord>,
    pub flags: Vec<GamingFlag>,
    pub overrides: Vec<GamingFlagOverride>,
}

impl OrgContext {
    pub fn new(org_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            profile: OrgVisibilityProfile::new(org_id, now),
            decay_states: BTreeMap::new(),
            shocks: Vec::new(),
            flags: Vec::new(),
            overrides: Vec::new(),
        }
    }

    pub fn org_id(&self) -> &str {
        &self.profile.org_id
    }

    pub fn active_flags(&self, at: DateTime<Utc>) -> Vec<&GamingFlag> {
        self.flags
            .iter()
            .filter(|flag| flag.applies_at(at))
            .filter(|flag| !self.overrides.iter().any(|o| o.flag_id == flag.id))
            .collect()
    }
}

/// Non-fatal conditions recorded on the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Anomaly {
    #[serde(rename_all = "camelCase")]
    ClockSkewAnomaly {
        metric: Option<SubMetric>,
        skew_secs: i64,
    },
    #[serde(rename_all = "camelCase")]
    StaleSignalWarning { metric: SubMetric, last_observed_at: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    SignalQuarantined { metric: SubMetric, flag_id: String },
    #[serde(rename_all = "camelCase")]
    DuplicateActivity { idempotency_key: String },
    #[serde(rename_all = "camelCase")]
    InvariantViolation { field: String, value: f64, expected_range: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShockContribution {
    pub shock_id: String,
    pub category: ShockCategory,
    pub contribution: f64,
    pub state: ShockState,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamingPenaltyApplied {
    pub flag_id: String,
    pub pattern_type: GamingPattern,
    pub penalty_rate: f64,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    pub sub_metrics: BTreeMap<SubMetric, f64>,
    pub stale_metrics: Vec<SubMetric>,
    pub composite_before_overlay: f64,
    pub shock_overlay: f64,
    pub shocks: Vec<ShockContribution>,
    pub evi_before_penalty: f64,
    pub penalty_multiplier: f64,
    pub penalties: Vec<GamingPenaltyApplied>,
    pub momentum: MomentumStatus,
    pub decay_rate_multiplier: f64,
    pub anomalies: Vec<Anomaly>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotTrigger {
    ScheduledTick,
    ManualTick,
    Signals,
    Activity,
    Shock,
    ShockResponse,
}

impl SnapshotTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ScheduledTick => "scheduled_tick",
            Self::ManualTick => "manual_tick",
            Self::Signals => "signals",
            Self::Activity => "activity",
            Self::Shock => "shock",
            Self::ShockResponse => "shock_response",
        }
    }
}

/// Immutable, append-only score record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EviSnapshot {
    pub id: String,
    pub org_id: String,
    pub timestamp: DateTime<Utc>,
    pub evi: f64,
    pub visibility: f64,
    pub authority: f64,
    pub momentum: f64,
    pub active_shock_ids: Vec<String>,
    pub active_gaming_flag_ids: Vec<String>,
    pub trigger: SnapshotTrigger,
    pub provenance: Provenance,
}

/// Emitted after each committed snapshot for downstream subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotComputed {
    pub org_id: String,
    pub snapshot_id: String,
    pub timestamp: DateTime<Utc>,
    pub evi: f64,
    pub trigger: SnapshotTrigger,
    pub negative_momentum: bool,
}

impl From<&EviSnapshot> for SnapshotComputed {
    fn from(snapshot: &EviSnapshot) -> Self {
        Self {
            org_id: snapshot.org_id.clone(),
            snapshot_id: snapshot.id.clone(),
            timestamp: snapshot.timestamp,
            evi: snapshot.evi,
            trigger: snapshot.trigger,
            negative_momentum: snapshot.provenance.momentum.negative_momentum,
        }
    }
}

/// Monday of the ISO week containing `at`.
pub fn week_start(at: DateTime<Utc>) -> NaiveDate {
    let date = at.date_naive();
    date - Duration::days(date.weekday().num_days_from_monday() as i64)
}

/// Elapsed weeks between two instants; negative when `to` precedes `from`.
pub fn weeks_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0 / SECS_PER_WEEK
}

pub fn days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0 / SECS_PER_DAY
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn every_sub_metric_belongs_to_its_component_list() {
        for metric in SubMetric::ALL {
            assert!(metric.component().sub_metrics().contains(&metric));
        }
        let total: usize = Component::ALL.iter().map(|c| c.sub_metrics().len()).sum();
        assert_eq!(total, SubMetric::ALL.len());
    }

    #[test]
    fn week_start_is_monday() {
        // 2026-10-16 is a Friday
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 12, 0, 0).unwrap();
        assert_eq!(week_start(at), NaiveDate::from_ymd_opt(2026, 10, 12).unwrap());
    }

    #[test]
    fn sub_metric_serializes_as_snake_case_key() {
        let mut map = BTreeMap::new();
        map.insert(SubMetric::AiPresence, 1.0);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"ai_presence":1.0}"#);
    }
}
