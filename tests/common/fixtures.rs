use chrono::{DateTime, Utc};
use serde_json::{json, Value};

pub const VISIBILITY: [&str; 4] = ["ai_presence", "press_coverage", "serp_coverage", "snippets"];
pub const AUTHORITY: [&str; 5] = [
    "citation_quality",
    "domain_authority",
    "journalist_match",
    "schema_coverage",
    "eeat_density",
];
pub const MOMENTUM: [&str; 5] = [
    "citation_velocity",
    "sov_change",
    "content_velocity",
    "topic_growth",
    "ranking_trajectory",
];

/// Every sub-metric as a percentage, uniform per component.
pub fn signal_batch(v: f64, a: f64, m: f64) -> Value {
    let mut signals = Vec::new();
    for (metrics, value) in [(&VISIBILITY[..], v), (&AUTHORITY[..], a), (&MOMENTUM[..], m)] {
        for metric in metrics {
            signals.push(json!({
                "metric": metric,
                "value": value,
                "domain": { "kind": "percentage" },
            }));
        }
    }
    json!({ "signals": signals })
}

pub fn signal_batch_with_volume(
    v: f64,
    a: f64,
    m: f64,
    observed_at: DateTime<Utc>,
    backlinks: u64,
) -> Value {
    let mut batch = signal_batch(v, a, m);
    batch["observedAt"] = json!(observed_at);
    batch["volume"] = json!({
        "backlinks": backlinks,
        "citationSources": 20,
        "pressMentions": 10,
        "distinctCitationDomains": 15,
    });
    batch
}

pub fn activity_event(org_id: &str, key: &str, kind: &str, pillars: &[&str], at: DateTime<Utc>) -> Value {
    json!({
        "idempotencyKey": key,
        "orgId": org_id,
        "pillars": pillars,
        "type": kind,
        "magnitude": 1.0,
        "timestamp": at,
    })
}

pub fn shock_event(org_id: &str, id: &str, category: &str, direction: &str, seed: f64) -> Value {
    json!({
        "id": id,
        "orgId": org_id,
        "category": category,
        "direction": direction,
        "magnitudeSeed": seed,
        "timestamp": Utc::now(),
    })
}
