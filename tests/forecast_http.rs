mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;

use common::app::spawn_test_app;
use common::fixtures::signal_batch;
use common::http::{assert_json_error, assert_status_ok_json, call};

async fn seeded() -> common::app::TestApp {
    let app = spawn_test_app().await;
    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    app
}

#[tokio::test]
async fn it_forecast_bands_are_ordered_per_week() {
    let app = seeded().await;
    let request = json!({
        "horizonWeeks": 8,
        "actions": [
            { "id": "launch", "status": "confirmed", "expectedDriverLift": 12.0, "driverWeight": 0.4, "successProbability": 1.0, "landsInWeeks": 2 },
            { "id": "pitch", "status": "planned", "expectedDriverLift": 20.0, "driverWeight": 0.3, "successProbability": 0.5 },
            { "id": "moonshot", "status": "opportunity", "expectedDriverLift": 30.0, "driverWeight": 0.5, "successProbability": 0.2, "landsInWeeks": 4 }
        ]
    });
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/acme/forecast", Some(request)).await;
    assert_status_ok_json(status, &body);

    let data = &body["data"];
    assert!((data["baseEvi"].as_f64().unwrap() - 61.5).abs() < 1e-6);
    let series = data["series"].as_array().unwrap();
    assert_eq!(series.len(), 8);
    for point in series {
        let low = point["low"].as_f64().unwrap();
        let expected = point["expected"].as_f64().unwrap();
        let high = point["high"].as_f64().unwrap();
        assert!(low <= expected && expected <= high, "{point}");
        assert!((0.0..=100.0).contains(&low) && high <= 100.0);
    }
    assert_eq!(data["breakdown"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn it_forecast_rejects_bad_horizon_and_duplicate_ids() {
    let app = seeded().await;

    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/forecast",
        Some(json!({ "horizonWeeks": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_error(&body, "FORECAST_INPUT_INVALID");

    let dup = json!({
        "horizonWeeks": 4,
        "actions": [
            { "id": "a", "status": "confirmed", "expectedDriverLift": 5.0, "driverWeight": 0.2, "successProbability": 1.0 },
            { "id": "a", "status": "planned", "expectedDriverLift": 5.0, "driverWeight": 0.2, "successProbability": 0.5 }
        ]
    });
    let (status, body) = call(&app.app, Method::POST, "/api/orgs/acme/forecast", Some(dup)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_json_error(&body, "FORECAST_INPUT_INVALID");
}

#[tokio::test]
async fn it_forecast_without_snapshot_is_not_found() {
    let app = spawn_test_app().await;
    let (status, body) = call(
        &app.app,
        Method::POST,
        "/api/orgs/nobody/forecast",
        Some(json!({ "horizonWeeks": 4 })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_json_error(&body, "NOT_FOUND");
}
