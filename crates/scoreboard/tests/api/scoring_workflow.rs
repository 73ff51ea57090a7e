use crate::helpers::{spawn_app, station, write_raw_forecast};
use futures::future::join_all;
use scoreboard::{
    timestamps::parse_timestamp, ObservationInput, ObservationMode, SOURCE_NWS_CLI,
};
use serde_json::json;
use time::macros::{date, datetime};

fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

fn kmdw_observation() -> ObservationInput {
    ObservationInput {
        station_id: "KMDW".to_string(),
        date: date!(2026 - 02 - 01),
        source: SOURCE_NWS_CLI.to_string(),
        observed_high: Some(29.4),
        observed_low: Some(17.1),
        issued_at: Some(datetime!(2026-02-02 07:30 UTC)),
        raw_text: Some("MAXIMUM 29\nMINIMUM 17".to_string()),
        fetched_at: datetime!(2026-02-02 08:00 UTC),
    }
}

#[tokio::test]
async fn scores_forecast_against_official_report() {
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
    db.upsert_observation(ObservationMode::Snapshot, kmdw_observation())
        .await
        .unwrap();

    let written = db
        .build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();
    assert_eq!(written, 2);

    let errors = db.get_errors(date!(2026 - 02 - 01), None).await.unwrap();
    assert_eq!(errors.len(), 2);
    let high = errors.iter().find(|e| e.kind == "high").unwrap();
    let low = errors.iter().find(|e| e.kind == "low").unwrap();

    assert!(approx(high.error_f, 0.6), "{}", high.error_f);
    assert!(approx(low.error_f, 0.9), "{}", low.error_f);
    assert!(approx(low.abs_error_f, 0.9));
    assert_eq!(high.source, "OPEN_METEO");
    assert!(high.obs_run_id.is_some());
    // 15:00 CST on 02-01 is 33h after issuance, 06:00 CST is 24h
    assert!(approx(high.lead_hours, 33.0), "{}", high.lead_hours);
    assert!(approx(low.lead_hours, 24.0), "{}", low.lead_hours);
    assert_eq!(high.error_id, format!("{}:KMDW:2026-02-01:high", high.run_id));
}

#[tokio::test]
async fn rebuilding_errors_writes_nothing_new() {
    let test_app = spawn_app().await;
    let db = &test_app.db;
    db.upsert_station(station("KMDW", "America/Chicago"))
        .await
        .unwrap();
    write_raw_forecast(
        db,
        "NWS",
        "KMDW",
        json!({
            "issued_at": "2026-01-31T12:00:00Z",
            "daily": [{"target_date": "2026-02-01", "high": 30.0, "low": 18.0}]
        }),
    )
    .await;
    db.upsert_observation(ObservationMode::Snapshot, kmdw_observation())
        .await
        .unwrap();

    let mode = ObservationMode::Snapshot;
    assert_eq!(db.build_errors_for_date(mode, date!(2026 - 02 - 01)).await.unwrap(), 2);
    assert_eq!(db.build_errors_for_date(mode, date!(2026 - 02 - 01)).await.unwrap(), 0);
    assert_eq!(db.get_errors(date!(2026 - 02 - 01), None).await.unwrap().len(), 2);
}

#[tokio::test]
async fn partial_forecasts_and_unobserved_stations() {
    let test_app = spawn_app().await;
    let db = &test_app.db;
    db.upsert_station(station("KMDW", "America/Chicago"))
        .await
        .unwrap();
    db.upsert_station(station("KORD", "America/Chicago"))
        .await
        .unwrap();

    for station_id in ["KMDW", "KORD"] {
        write_raw_forecast(
            db,
            "WEATHERAPI",
            station_id,
            json!({
                "issued_at": "2026-01-31T12:00:00Z",
                "daily": [{"target_date": "2026-02-01", "high": 31.0}]
            }),
        )
        .await;
    }
    db.upsert_observation(ObservationMode::Snapshot, kmdw_observation())
        .await
        .unwrap();

    let written = db
        .build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();
    assert_eq!(written, 1);

    let errors = db.get_errors(date!(2026 - 02 - 01), Some("KMDW")).await.unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, "high");
    assert!(db
        .get_errors(date!(2026 - 02 - 01), Some("KORD"))
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn concurrent_run_registration_yields_one_run() {
    let test_app = spawn_app().await;
    let issued = parse_timestamp("2026-02-01T06:00:00Z").unwrap();

    let calls = (0..10).map(|_| {
        let db = test_app.db.clone();
        async move { db.get_or_create_run("OPEN_METEO", issued).await.unwrap() }
    });
    let ids = join_all(calls).await;

    assert!(ids.iter().all(|id| *id == ids[0]));
    assert_eq!(test_app.db.count_runs().await.unwrap(), 1);
}

#[tokio::test]
async fn stats_recompute_replaces_previous_rows() {
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
    db.upsert_observation(ObservationMode::Snapshot, kmdw_observation())
        .await
        .unwrap();
    db.build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();

    let as_of = date!(2026 - 02 - 02);
    assert_eq!(db.update_stats_as_of(as_of, 30, None).await.unwrap(), 3);
    assert_eq!(db.update_stats_as_of(as_of, 30, None).await.unwrap(), 3);

    let stats = db.get_stats(Some(30), None, None).await.unwrap();
    assert_eq!(stats.len(), 3);
    let both = stats.iter().find(|s| s.kind == "both").unwrap();
    assert_eq!(both.n, 1);
    assert!(approx(both.mae, 0.75), "{}", both.mae);
    assert_eq!(both.rmse, None);

    // the target date is outside a window that ends the day before it
    assert_eq!(
        db.update_stats_as_of(date!(2026 - 01 - 31), 30, None)
            .await
            .unwrap(),
        0
    );
    assert!(db.get_stats(Some(30), None, None).await.unwrap().is_empty());
}

#[tokio::test]
async fn stats_window_includes_its_first_day_only() {
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
    db.upsert_observation(ObservationMode::Snapshot, kmdw_observation())
        .await
        .unwrap();
    db.build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();

    let as_of = date!(2026 - 02 - 02);
    // 2026-02-01 is the first day of a two-day window ending 02-02
    assert_eq!(db.update_stats_as_of(as_of, 2, None).await.unwrap(), 3);
    // and one day before a one-day window
    assert_eq!(db.update_stats_as_of(as_of, 1, None).await.unwrap(), 0);
    assert!(db.get_stats(Some(1), None, None).await.unwrap().is_empty());
    assert_eq!(db.update_stats_as_of(as_of, 0, None).await.unwrap(), 0);

    // windows longer than the calendar start at its first day
    assert_eq!(db.update_stats_as_of(as_of, u32::MAX, None).await.unwrap(), 3);
}

#[tokio::test]
async fn station_filtered_stats_leave_other_stations() {
    let test_app = spawn_app().await;
    let db = &test_app.db;
    for station_id in ["KMDW", "KORD"] {
        db.upsert_station(station(station_id, "America/Chicago"))
            .await
            .unwrap();
        write_raw_forecast(
            db,
            "NWS",
            station_id,
            json!({
                "issued_at": "2026-01-31T12:00:00Z",
                "daily": [{"target_date": "2026-02-01", "high": 30.0, "low": 18.0}]
            }),
        )
        .await;
        let mut obs = kmdw_observation();
        obs.station_id = station_id.to_string();
        db.upsert_observation(ObservationMode::Snapshot, obs)
            .await
            .unwrap();
    }
    db.build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();

    let as_of = date!(2026 - 02 - 02);
    assert_eq!(db.update_stats_as_of(as_of, 7, None).await.unwrap(), 6);
    assert_eq!(db.update_stats_as_of(as_of, 7, Some("KORD")).await.unwrap(), 3);

    assert_eq!(db.get_stats(Some(7), None, None).await.unwrap().len(), 6);
    assert_eq!(db.get_stats(Some(7), Some("KMDW"), None).await.unwrap().len(), 3);
}
