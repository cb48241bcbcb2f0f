mod common;

use std::time::Duration;

use axum::http::{Method, StatusCode};
use http_body_util::BodyExt;

use common::app::spawn_test_app;
use common::fixtures::signal_batch;
use common::http::{call, request};

#[tokio::test]
async fn it_sse_streams_snapshot_computed_for_the_org() {
    let app = spawn_test_app().await;

    let response = request(&app.app, Method::GET, "/api/orgs/acme/events", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    assert!(content_type.contains("text/event-stream"));

    // another org's snapshot must not reach this stream
    call(
        &app.app,
        Method::POST,
        "/api/orgs/globex/signals",
        Some(signal_batch(40.0, 40.0, 40.0)),
    )
    .await;
    let (_, created) = call(
        &app.app,
        Method::POST,
        "/api/orgs/acme/signals",
        Some(signal_batch(70.0, 60.0, 50.0)),
    )
    .await;
    let snapshot_id = created["data"]["snapshot"]["id"].as_str().unwrap().to_string();

    let mut body = response.into_body();
    let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
        .await
        .expect("event within timeout")
        .expect("stream open")
        .expect("frame ok");
    let bytes = frame.into_data().expect("data frame");
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("event: snapshot_computed"), "{text}");
    assert!(text.contains(&snapshot_id), "{text}");
    assert!(!text.contains("globex"), "{text}");
}

#[tokio::test]
async fn it_sse_rejects_invalid_org_id() {
    let app = spawn_test_app().await;
    let response = request(&app.app, Method::GET, "/api/orgs/a:b/events", None).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
