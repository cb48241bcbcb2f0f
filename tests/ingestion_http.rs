mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use serde_json::json;

use common::app::spawn_test_app;
use common::fixtures::{activity_event, shock_event, signal_batch};
use common::http::{assert_json_error, assert_status_ok_json, call};

fn approx(value: &serde_json::Value, expected: f64, tol: f64) -> bool {
    value.as_f64().is_some_and(|v| (v - expected).abs() <= tol)
}

#[tokio::test]
async fn it_signals_produce_worked_example_snapshot() {
    let app = spawn_test_app().await;

    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let snapshot = &body["data"]["snapshot"];
    assert!(approx(&snapshot["evi"], 61.5, 1e-6), "{snapshot}");
    assert!(approx(&snapshot["visibility"], 70.0, 1e-6));
    assert_eq!(snapshot["trigger"], "signals");
    assert!(snapshot["provenance"]["subMetrics"].is_object());

    let (status, latest) = call(&app.app, Method::GET, "/api/orgs/acme/snapshots/latest", None).await;
    assert_status_ok_json(status, &latest);
    assert_eq!(latest["data"]["id"], snapshot["id"]);

    let (_, orgs) = call(&app.app, Method::GET, "/api/orgs", None).await;
    assert_eq!(orgs["data"], json!(["acme"]));
}

#[tokio::test]
async fn it_out_of_range_signal_is_422_and_keeps_previous_snapshot() {
    let app = spawn_test_app().await;
    let (_, first) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;

    let mut bad = signal_batch(70.0, 60.0, 50.0);
    bad["signals"][0]["value"] = json!(140.0);
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/acme/signals", Some(bad)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_json_error(&body, "INVALID_SIGNAL_RANGE");

    let (_, latest) = call(&app.app, Method::GET, "/api/orgs/acme/snapshots/latest", None).await;
    assert_eq!(latest["data"]["id"], first["data"]["snapshot"]["id"]);
}

#[tokio::test]
async fn it_first_batch_missing_metrics_is_incomplete() {
    let app = spawn_test_app().await;
    let batch = json!({
        "signals": [{ "metric": "snippets", "value": 40.0, "domain": { "kind": "percentage" } }]
    });
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/acme/signals", Some(batch)).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_json_error(&body, "INCOMPLETE_COMPONENT_INPUT");
    assert!(body["message"].as_str().unwrap().contains("ai_presence"));
}

#[tokio::test]
async fn it_replayed_activity_is_not_double_counted() {
    let app = spawn_test_app().await;
    call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;

    let batch = json!({
        "events": [
            activity_event("acme", "press-1", "press_placement", &["pr"], Utc::now()),
            activity_event("acme", "seo-1", "seo_improvement", &["seo"], Utc::now()),
        ]
    });
    let (status, first) = call(&app.app, Method::POST, "/api/orgs/acme/activity", Some(batch.clone())).await;
    assert_status_ok_json(status, &first);
    assert_eq!(first["data"]["appliedKeys"].as_array().unwrap().len(), 2);
    let first_evi = first["data"]["snapshot"]["evi"].as_f64().unwrap();
    assert!(first_evi > 61.5);

    let (status, replay) = call(&app.app, Method::POST, "/api/orgs/acme/activity", Some(batch)).await;
    assert_status_ok_json(status, &replay);
    assert!(replay["data"]["appliedKeys"].as_array().unwrap().is_empty());
    assert_eq!(replay["data"]["duplicateKeys"].as_array().unwrap().len(), 2);
    assert_eq!(replay["data"]["snapshot"]["id"], first["data"]["snapshot"]["id"]);

    let (_, listed) = call(&app.app, Method::GET, "/api/orgs/acme/snapshots?limit=10", None).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn it_activity_for_another_org_is_rejected() {
    let app = spawn_test_app().await;
    let batch = json!({
        "events": [activity_event("globex", "k1", "schema_update", &["seo"], Utc::now())]
    });
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/acme/activity", Some(batch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_error(&body, "INVALID_ACTIVITY_EVENT");
}

#[tokio::test]
async fn it_shock_overlay_and_response_campaign() {
    let app = spawn_test_app().await;
    call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;

    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/shocks",
        Some(shock_event("acme", "crisis-1", "crisis", "negative", 0.0)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(approx(&body["data"]["evi"], 51.5, 0.05), "{body}");
    assert_eq!(body["data"]["activeShockIds"], json!(["crisis-1"]));

    let (status, body) = call(
        &app.app,
        Method::PUT,
        "/api/orgs/acme/shocks/crisis-1/response",
        Some(json!({ "active": true })),
    )
    .await;
    assert_status_ok_json(status, &body);
    assert_eq!(body["data"]["trigger"], "shock_response");

    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/shocks",
        Some(shock_event("acme", "crisis-1", "crisis", "negative", 0.0)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_error(&body, "INVALID_SHOCK_EVENT");
}

#[tokio::test]
async fn it_positive_crisis_is_rejected() {
    let app = spawn_test_app().await;
    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/shocks",
        Some(shock_event("acme", "c1", "crisis", "positive", 0.5)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_error(&body, "INVALID_SHOCK_EVENT");
}

#[tokio::test]
async fn it_manual_tick_needs_known_org() {
    let app = spawn_test_app().await;
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/ghost/tick", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_json_error(&body, "NOT_FOUND");

    call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/acme/tick", None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["data"]["trigger"], "manual_tick");
    assert!(body["data"]["evi"].as_f64().unwrap() <= 61.5 + 1e-9);
}

#[tokio::test]
async fn it_malformed_body_uses_error_envelope() {
    let app = spawn_test_app().await;
    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(json!({ "signals": "nope" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_error(&body, "INVALID_REQUEST_BODY");
}
