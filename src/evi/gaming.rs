use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::evi::config::GamingConfig;
use crate::evi::types::{
    GamingFlag, GamingPattern, GamingPenaltyApplied, SubMetric, VolumeCounters, VolumeObservation,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub pattern: GamingPattern,
    /// Observed relative change (growth or drop), e.g. 2.5 == +250%
    pub observed: f64,
    pub threshold: f64,
    pub penalty_rate: f64,
}

impl GamingPattern {
    /// Raw signals held back when this pattern is flagged.
    pub fn implicated_metrics(self) -> &'static [SubMetric] {
        match self {
            Self::BacklinkSpike => &[SubMetric::DomainAuthority],
            Self::CitationSourceSpike => &[SubMetric::CitationQuality, SubMetric::AiPresence],
            Self::PressSurge => &[SubMetric::PressCoverage],
            Self::DiversityCollapse => &[SubMetric::CitationQuality],
        }
    }
}

/// `min + (max − min) × min(1, observed/threshold − 1)`
pub fn severity_penalty(observed: f64, threshold: f64, config: &GamingConfig) -> f64 {
    let excess = (observed / threshold - 1.0).clamp(0.0, 1.0);
    (config.min_penalty + (config.max_penalty - config.min_penalty) * excess)
        .clamp(config.min_penalty, config.max_penalty)
}

fn growth(previous: u64, current: u64, min_baseline: u64) -> Option<f64> {
    if previous < min_baseline || previous == 0 {
        return None;
    }
    Some((current as f64 - previous as f64) / previous as f64)
}

fn diversity(counters: &VolumeCounters) -> Option<f64> {
    if counters.citation_sources == 0 {
        return None;
    }
    Some(counters.distinct_citation_domains as f64 / counters.citation_sources as f64)
}

/// Week-over-week comparison of this week's counters against the previous week's.
/// `press_corroborated` is true when a press activity or media shock landed
/// within the corroboration window.
pub fn detect(
    previous: &VolumeObservation,
    current: &VolumeObservation,
    press_corroborated: bool,
    config: &GamingConfig,
) -> Vec<Detection> {
    let mut found = Vec::new();
    if current.week_start - previous.week_start != Duration::weeks(1) {
        return found;
    }
    let prev = &previous.counters;
    let cur = &current.counters;
    let min = config.min_baseline_volume;

    let mut push = |pattern: GamingPattern, observed: f64, threshold: f64| {
        found.push(Detection {
            pattern,
            observed,
            threshold,
            penalty_rate: severity_penalty(observed, threshold, config),
        });
    };

    if let Some(g) = growth(prev.backlinks, cur.backlinks, min) {
        if g > config.link_spike_threshold {
            push(GamingPattern::BacklinkSpike, g, config.link_spike_threshold);
        }
    }
    if let Some(g) = growth(prev.citation_sources, cur.citation_sources, min) {
        if g > config.link_spike_threshold {
            push(GamingPattern::CitationSourceSpike, g, config.link_spike_threshold);
        }
    }
    if let Some(g) = growth(prev.press_mentions, cur.press_mentions, min) {
        if g > config.press_surge_threshold && !press_corroborated {
            push(GamingPattern::PressSurge, g, config.press_surge_threshold);
        }
    }
    if prev.citation_sources >= min {
        if let (Some(before), Some(after)) = (diversity(prev), diversity(cur)) {
            if before > 0.0 {
                let drop = (before - after) / before;
                if drop > config.diversity_collapse_threshold {
                    push(
                        GamingPattern::DiversityCollapse,
                        drop,
                        config.diversity_collapse_threshold,
                    );
                }
            }
        }
    }

    found
}

pub fn create_flag(
    detection: &Detection,
    org_id: &str,
    now: DateTime<Utc>,
    config: &GamingConfig,
) -> GamingFlag {
    GamingFlag {
        id: Uuid::new_v4().to_string(),
        org_id: org_id.to_string(),
        pattern_type: detection.pattern,
        penalty_rate: detection.penalty_rate,
        created_at: now,
        expires_at: now + Duration::days(config.flag_duration_days),
    }
}

/// `Π(1 − penalty_rate_i)` over the given active flags.
pub fn penalty_multiplier(flags: &[&GamingFlag]) -> (f64, Vec<GamingPenaltyApplied>) {
    let mut multiplier = 1.0;
    let mut applied = Vec::with_capacity(flags.len());
    for flag in flags {
        multiplier *= 1.0 - flag.penalty_rate;
        applied.push(GamingPenaltyApplied {
            flag_id: flag.id.clone(),
            pattern_type: flag.pattern_type,
            penalty_rate: flag.penalty_rate,
            expires_at: flag.expires_at,
        });
    }
    (multiplier, applied)
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, TimeZone};

    use super::*;

    fn obs(week: NaiveDate, backlinks: u64, sources: u64, press: u64, domains: u64) -> VolumeObservation {
        VolumeObservation {
            week_start: week,
            counters: VolumeCounters {
                backlinks,
                citation_sources: sources,
                press_mentions: press,
                distinct_citation_domains: domains,
            },
        }
    }

    fn weeks() -> (NaiveDate, NaiveDate) {
        let w1 = NaiveDate::from_ymd_opt(2026, 10, 5).unwrap();
        (w1, w1 + Duration::weeks(1))
    }

    #[test]
    fn backlink_spike_over_200_percent_is_flagged() {
        let (w1, w2) = weeks();
        let cfg = GamingConfig::default();
        let found = detect(&obs(w1, 10, 10, 10, 8), &obs(w2, 35, 10, 10, 8), false, &cfg);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pattern, GamingPattern::BacklinkSpike);
        // +250% against a 200% threshold
        assert!((found[0].penalty_rate - (0.1 + 0.4 * 0.25)).abs() < 1e-9);
    }

    #[test]
    fn exactly_200_percent_is_not_a_spike() {
        let (w1, w2) = weeks();
        let found = detect(
            &obs(w1, 10, 10, 10, 8),
            &obs(w2, 30, 10, 10, 8),
            false,
            &GamingConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn press_surge_needs_missing_corroboration() {
        let (w1, w2) = weeks();
        let cfg = GamingConfig::default();
        let prev = obs(w1, 10, 10, 5, 8);
        let cur = obs(w2, 10, 10, 25, 8);
        assert_eq!(detect(&prev, &cur, false, &cfg)[0].pattern, GamingPattern::PressSurge);
        assert!(detect(&prev, &cur, true, &cfg).is_empty());
    }

    #[test]
    fn diversity_collapse_is_flagged() {
        let (w1, w2) = weeks();
        // 0.8 -> 0.3 domains per source, a 62.5% drop
        let found = detect(
            &obs(w1, 10, 10, 10, 8),
            &obs(w2, 10, 20, 10, 6),
            false,
            &GamingConfig::default(),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].pattern, GamingPattern::DiversityCollapse);
    }

    #[test]
    fn small_baseline_is_ignored() {
        let (w1, w2) = weeks();
        let found = detect(
            &obs(w1, 2, 2, 1, 2),
            &obs(w2, 40, 2, 30, 2),
            false,
            &GamingConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn non_adjacent_weeks_are_not_compared() {
        let (w1, _) = weeks();
        let found = detect(
            &obs(w1, 10, 10, 10, 8),
            &obs(w1 + Duration::weeks(3), 90, 10, 10, 8),
            false,
            &GamingConfig::default(),
        );
        assert!(found.is_empty());
    }

    #[test]
    fn penalty_is_bounded() {
        let cfg = GamingConfig::default();
        let barely = severity_penalty(2.0001, 2.0, &cfg);
        assert!((barely - (0.1 + 0.4 * 0.00005)).abs() < 1e-9);
        assert_eq!(severity_penalty(100.0, 2.0, &cfg), 0.5);
        assert_eq!(severity_penalty(1.0, 2.0, &cfg), 0.1);
    }

    #[test]
    fn flag_applies_at_89_days_not_91() {
        let cfg = GamingConfig::default();
        let t0 = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let detection = Detection {
            pattern: GamingPattern::BacklinkSpike,
            observed: 3.0,
            threshold: 2.0,
            penalty_rate: 0.3,
        };
        let flag = create_flag(&detection, "acme", t0, &cfg);
        assert!(flag.applies_at(t0 + Duration::days(89)));
        assert!(!flag.applies_at(t0 + Duration::days(90)));
        assert!(!flag.applies_at(t0 + Duration::days(91)));
    }

    #[test]
    fn penalties_multiply() {
        let t0 = Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap();
        let cfg = GamingConfig::default();
        let a = create_flag(
            &Detection {
                pattern: GamingPattern::BacklinkSpike,
                observed: 3.0,
                threshold: 2.0,
                penalty_rate: 0.2,
            },
            "acme",
            t0,
            &cfg,
        );
        let b = create_flag(
            &Detection {
                pattern: GamingPattern::PressSurge,
                observed: 4.0,
                threshold: 3.0,
                penalty_rate: 0.5,
            },
            "acme",
            t0,
            &cfg,
        );
        let (m, applied) = penalty_multiplier(&[&a, &b]);
        assert!((m - 0.4).abs() < 1e-9);
        assert_eq!(applied.len(), 2);
    }
}
