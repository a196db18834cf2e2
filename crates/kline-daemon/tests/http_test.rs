//! HTTP status endpoint tests.

mod integration;
use integration::common::{build_app, seeded_exchange, test_config, BTC};

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use kline_daemon::http::create_router;
use serde_json::Value;
use tower::ServiceExt;

async fn get(router: axum::Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, content_type, body.to_vec())
}

#[tokio::test]
async fn test_health_reports_idle_scheduler() {
    let (app, _store) = build_app(test_config(&[BTC]), seeded_exchange());

    let (status, _, body) = get(create_router(app.http_state()), "/health").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "idle");
    assert_eq!(json["scheduler_running"], false);
    assert_eq!(json["symbols"], 1);
}

#[tokio::test]
async fn test_stats_after_cycle() {
    let (app, _store) = build_app(test_config(&[BTC]), seeded_exchange());
    app.run_once().await;

    let (status, _, body) = get(create_router(app.http_state()), "/stats").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["cycles_started"], 1);
    assert_eq!(json["statistics"]["total_records_inserted"], 21);
    assert_eq!(json["store"]["candle_rows"], 20);
    assert!(json["rate_limiter"].is_object());
}

#[tokio::test]
async fn test_status_lists_registered_jobs() {
    let (app, _store) = build_app(test_config(&[BTC]), seeded_exchange());
    app.register_jobs().unwrap();

    let (status, _, body) = get(create_router(app.http_state()), "/status").await;
    assert_eq!(status, StatusCode::OK);

    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["running"], false);
    assert_eq!(json["jobs"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn test_metrics_uses_prometheus_content_type() {
    let (app, _store) = build_app(test_config(&[BTC]), seeded_exchange());
    app.run_once().await;

    let (status, content_type, body) = get(create_router(app.http_state()), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(content_type.unwrap().starts_with("text/plain; version=0.0.4"));
    assert!(String::from_utf8(body).unwrap().contains("kline_"));
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let (app, _store) = build_app(test_config(&[BTC]), seeded_exchange());

    let (status, _, _) = get(create_router(app.http_state()), "/nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
