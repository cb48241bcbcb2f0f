use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evi::error::EngineError;
use crate::evi::types::{Anomaly, OrgVisibilityProfile, SubMetric, VolumeCounters};

/// Declared valid domain of a raw sub-metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalDomain {
    /// 0..=100, passed through
    Percentage,
    /// 0..=1, scaled by 100
    Ratio,
    /// 0..=baseline, e.g. cited_queries against relevant_queries
    Count { baseline: f64 },
    Score { min: f64, max: f64 },
    /// Signed change in -span..=span, 50 means flat
    Change { span: f64 },
}

impl SignalDomain {
    pub fn default_for(metric: SubMetric) -> Self {
        match metric {
            SubMetric::AiPresence | SubMetric::SchemaCoverage => Self::Percentage,
            SubMetric::PressCoverage => Self::Count { baseline: 20.0 },
            SubMetric::SerpCoverage => Self::Count { baseline: 100.0 },
            SubMetric::Snippets => Self::Count { baseline: 25.0 },
            SubMetric::CitationQuality | SubMetric::JournalistMatch | SubMetric::EeatDensity => {
                Self::Ratio
            }
            SubMetric::DomainAuthority => Self::Score {
                min: 0.0,
                max: 100.0,
            },
            SubMetric::CitationVelocity | SubMetric::TopicGrowth => Self::Change { span: 100.0 },
            SubMetric::SovChange | SubMetric::RankingTrajectory => Self::Change { span: 50.0 },
            SubMetric::ContentVelocity => Self::Count { baseline: 8.0 },
        }
    }

    fn bounds(&self) -> Option<(f64, f64)> {
        match *self {
            Self::Percentage => Some((0.0, 100.0)),
            Self::Ratio => Some((0.0, 1.0)),
            Self::Count { baseline } if baseline > 0.0 && baseline.is_finite() => {
                Some((0.0, baseline))
            }
            Self::Score { min, max } if min.is_finite() && max.is_finite() && max > min => {
                Some((min, max))
            }
            Self::Change { span } if span > 0.0 && span.is_finite() => Some((-span, span)),
            _ => None,
        }
    }

    fn describe(&self) -> String {
        match self.bounds() {
            Some((lo, hi)) => format!("{self:?} [{lo}, {hi}]"),
            None => format!("{self:?} (malformed domain)"),
        }
    }

    fn scale(&self, value: f64) -> f64 {
        match *self {
            Self::Percentage => value,
            Self::Ratio => value * 100.0,
            Self::Count { baseline } => value / baseline * 100.0,
            Self::Score { min, max } => (value - min) / (max - min) * 100.0,
            Self::Change { span } => 50.0 + 50.0 * value / span,
        }
    }
}

/// One raw feed value. `value: None` means the provider had nothing this round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSignal {
    pub metric: SubMetric,
    pub value: Option<f64>,
    #[serde(default)]
    pub domain: Option<SignalDomain>,
    #[serde(default)]
    pub allow_out_of_range: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalBatch {
    pub signals: Vec<RawSignal>,
    #[serde(default)]
    pub volume: Option<VolumeCounters>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// Normalized view of a batch, validated as a whole before anything is applied.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSignals {
    /// metric -> (normalized, raw)
    pub fresh: BTreeMap<SubMetric, (f64, f64)>,
    /// metrics falling back to their last-known value
    pub stale: Vec<SubMetric>,
    pub anomalies: Vec<Anomaly>,
}

pub fn normalize(
    metric: SubMetric,
    value: f64,
    domain: SignalDomain,
    allow_out_of_range: bool,
) -> Result<f64, EngineError> {
    let out_of_range = || EngineError::InvalidSignalRange {
        metric: metric.qualified_name(),
        value,
        domain: domain.describe(),
    };

    if !value.is_finite() {
        return Err(out_of_range());
    }
    let (lo, hi) = domain.bounds().ok_or_else(out_of_range)?;

    let in_domain = if value < lo || value > hi {
        if !allow_out_of_range {
            return Err(out_of_range());
        }
        value.clamp(lo, hi)
    } else {
        value
    };

    Ok(domain.scale(in_domain).clamp(0.0, 100.0))
}

impl RawSignal {
    pub fn effective_domain(&self) -> SignalDomain {
        self.domain
            .unwrap_or_else(|| SignalDomain::default_for(self.metric))
    }
}

/// Validates every signal of the batch. Nothing in the profile is touched, so a
/// single bad value rejects the whole batch and the prior state stays intact.
pub fn resolve_batch(
    profile: &OrgVisibilityProfile,
    batch: &SignalBatch,
) -> Result<ResolvedSignals, EngineError> {
    let mut resolved = ResolvedSignals::default();
    let mut missing = Vec::new();

    for signal in &batch.signals {
        match signal.value {
            Some(raw) => {
                let normalized = normalize(
                    signal.metric,
                    raw,
                    signal.effective_domain(),
                    signal.allow_out_of_range,
                )?;
                resolved.stale.retain(|m| *m != signal.metric);
                resolved.anomalies.retain(|a| {
                    !matches!(a, Anomaly::StaleSignalWarning { metric, .. } if *metric == signal.metric)
                });
                resolved.fresh.insert(signal.metric, (normalized, raw));
            }
            None => {
                if resolved.fresh.contains_key(&signal.metric) {
                    continue;
                }
                match profile.sub_metrics.get(&signal.metric) {
                    Some(last_known) => {
                        if !resolved.stale.contains(&signal.metric) {
                            resolved.stale.push(signal.metric);
                            resolved.anomalies.push(Anomaly::StaleSignalWarning {
                                metric: signal.metric,
                                last_observed_at: last_known.observed_at,
                            });
                        }
                    }
                    None => missing.push(signal.metric.qualified_name()),
                }
            }
        }
    }

    if !missing.is_empty() {
        missing.sort();
        missing.dedup();
        return Err(EngineError::IncompleteComponentInput { missing });
    }

    Ok(resolved)
}
