use crate::helpers::{spawn_app, station, write_raw_forecast};
use axum::{
    body::{to_bytes, Body},
    http::{Request, StatusCode},
};
use hyper::Method;
use scoreboard::{ObservationInput, ObservationMode, SOURCE_NWS_CLI};
use serde_json::{from_slice, json, Value};
use time::macros::{date, datetime};
use tower::ServiceExt;

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("Failed to execute request.");
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

#[tokio::test]
async fn health_reports_ok() {
    let test_app = spawn_app().await;
    let (status, body) = get(&test_app.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn lists_stations() {
    let test_app = spawn_app().await;
    test_app
        .db
        .upsert_station(station("KMDW", "America/Chicago"))
        .await
        .unwrap();

    let (status, body) = get(&test_app.app, "/stations").await;
    assert_eq!(status, StatusCode::OK);
    let stations: Value = from_slice(&body).unwrap();
    assert_eq!(stations[0]["station_id"], "KMDW");
    assert_eq!(stations[0]["timezone"], "America/Chicago");
}

#[tokio::test]
async fn serves_errors_and_stats() {
    let test_app = spawn_app().await;
    let db = &test_app.db;
    db.upsert_station(station("KMDW", "America/Chicago"))
        .await
        .unwrap();
    write_raw_forecast(
        db,
        "OPEN_METEO",
        "KMDW",
        json!({
            "issued_at": "2026-01-31T12:00:00Z",
            "daily": [{"target_date": "2026-02-01", "high": 30.0, "low": 18.0}]
        }),
    )
    .await;
    db.upsert_observation(
        ObservationMode::Snapshot,
        ObservationInput {
            station_id: "KMDW".to_string(),
            date: date!(2026 - 02 - 01),
            source: SOURCE_NWS_CLI.to_string(),
            observed_high: Some(29.4),
            observed_low: Some(17.1),
            issued_at: None,
            raw_text: None,
            fetched_at: datetime!(2026-02-02 08:00 UTC),
        },
    )
    .await
    .unwrap();
    db.build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();
    db.update_stats_as_of(date!(2026 - 02 - 02), 14, None)
        .await
        .unwrap();

    let (status, body) = get(&test_app.app, "/errors?date=2026-02-01&station=KMDW").await;
    assert_eq!(status, StatusCode::OK);
    let errors: Value = from_slice(&body).unwrap();
    assert_eq!(errors.as_array().unwrap().len(), 2);

    let (status, body) = get(&test_app.app, "/stats?window_days=14&source=OPEN_METEO").await;
    assert_eq!(status, StatusCode::OK);
    let stats: Value = from_slice(&body).unwrap();
    let kinds: Vec<&str> = stats
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["kind"].as_str().unwrap())
        .collect();
    assert_eq!(kinds, vec!["both", "high", "low"]);

    let (_, body) = get(&test_app.app, "/stats?window_days=30").await;
    let stats: Value = from_slice(&body).unwrap();
    assert!(stats.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn rejects_malformed_date() {
    let test_app = spawn_app().await;
    let (status, body) = get(&test_app.app, "/errors?date=yesterday").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = from_slice(&body).unwrap();
    assert_eq!(error["code"], "bad_request");
}
