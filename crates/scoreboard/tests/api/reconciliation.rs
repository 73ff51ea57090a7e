use crate::helpers::{spawn_app, station, write_raw_forecast};
use scoreboard::{
    ObservationInput, ObservationMode, ObservationOutcome, SOURCE_NWS_CLI, SOURCE_NWS_OBS_FALLBACK,
};
use serde_json::json;
use time::{macros::date, OffsetDateTime};

fn observation(source: &str, high: f64, low: f64) -> ObservationInput {
    ObservationInput {
        station_id: "KMDW".to_string(),
        date: date!(2026 - 02 - 01),
        source: source.to_string(),
        observed_high: Some(high),
        observed_low: Some(low),
        issued_at: None,
        raw_text: None,
        fetched_at: OffsetDateTime::now_utc(),
    }
}

#[tokio::test]
async fn latest_wins_scores_against_most_authoritative_source() {
    let test_app = spawn_app().await;
    let db = &test_app.db;
    let mode = ObservationMode::LatestWins;
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

    let outcomes = [
        db.upsert_observation(mode, observation(SOURCE_NWS_OBS_FALLBACK, 28.0, 19.0))
            .await
            .unwrap(),
        db.upsert_observation(mode, observation(SOURCE_NWS_CLI, 29.4, 17.1))
            .await
            .unwrap(),
        db.upsert_observation(mode, observation(SOURCE_NWS_OBS_FALLBACK, 27.0, 20.0))
            .await
            .unwrap(),
    ];
    assert_eq!(
        outcomes,
        [
            ObservationOutcome::Inserted,
            ObservationOutcome::Updated,
            ObservationOutcome::Retained
        ]
    );

    db.build_errors_for_date(mode, date!(2026 - 02 - 01))
        .await
        .unwrap();
    let errors = db.get_errors(date!(2026 - 02 - 01), None).await.unwrap();
    assert_eq!(errors.len(), 2);
    for error in &errors {
        assert_eq!(error.obs_run_id, None);
        let expected = if error.kind == "high" { 29.4 } else { 17.1 };
        assert_eq!(error.observed_f, expected);
    }
}

#[tokio::test]
async fn reset_clears_everything() {
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
            "daily": [{"target_date": "2026-02-01", "high": 30.0, "low": 18.0}],
            "hourly": {"time": ["2026-01-31T12:00"], "temperature_2m": [25.0]}
        }),
    )
    .await;
    db.upsert_observation(ObservationMode::Snapshot, observation(SOURCE_NWS_CLI, 29.4, 17.1))
        .await
        .unwrap();
    db.upsert_observation(ObservationMode::LatestWins, observation(SOURCE_NWS_CLI, 29.4, 17.1))
        .await
        .unwrap();
    db.build_errors_for_date(ObservationMode::Snapshot, date!(2026 - 02 - 01))
        .await
        .unwrap();
    db.update_stats_as_of(date!(2026 - 02 - 02), 30, None)
        .await
        .unwrap();

    db.reset_all().await.unwrap();

    assert_eq!(db.count_runs().await.unwrap(), 0);
    assert!(db.list_stations().await.unwrap().is_empty());
    assert!(db.get_errors(date!(2026 - 02 - 01), None).await.unwrap().is_empty());
    assert!(db.get_stats(None, None, None).await.unwrap().is_empty());
    for mode in [ObservationMode::Snapshot, ObservationMode::LatestWins] {
        assert!(db
            .scoring_observations(mode, date!(2026 - 02 - 01))
            .await
            .unwrap()
            .is_empty());
    }
}
