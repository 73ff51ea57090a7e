use axum::Router;
use scoreboard::{
    app, normalize_payload, AppState, Database, ForecastBatchItem, LeadTimeAnchors, Station,
};
use serde_json::Value;
use time::OffsetDateTime;

pub struct TestApp {
    pub app: Router,
    pub db: Database,
}

pub async fn spawn_app() -> TestApp {
    let db = Database::in_memory()
        .await
        .expect("Failed to open in-memory database");
    let app = app(AppState { db: db.clone() });
    TestApp { app, db }
}

pub fn station(id: &str, timezone: &str) -> Station {
    Station {
        station_id: id.to_string(),
        name: Some(format!("{} test station", id)),
        latitude: Some(41.78),
        longitude: Some(-87.75),
        timezone: Some(timezone.to_string()),
        state: Some("IL".to_string()),
        elevation_ft: None,
        is_active: Some(true),
    }
}

pub async fn write_raw_forecast(db: &Database, source: &str, station_id: &str, raw: Value) {
    let payload = normalize_payload(&raw).expect("payload should normalize");
    db.write_forecast_batch(
        vec![ForecastBatchItem {
            source: source.to_string(),
            station_id: station_id.to_string(),
            payload,
            fetched_at: OffsetDateTime::now_utc(),
        }],
        LeadTimeAnchors::default(),
    )
    .await
    .expect("forecast batch should write");
}
