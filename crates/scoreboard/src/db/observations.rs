use anyhow::{Context, Result};
use log::{debug, info};
use sqlx::Row;
use time::Date;

use super::{
    source_authority, Database, ObservationInput, ObservationMode, ObservationOutcome,
    ScoringObservation,
};
use crate::timestamps::{format_date, format_timestamp, now_timestamp, truncate_to_hour};

impl Database {
    pub async fn upsert_observation(
        &self,
        mode: ObservationMode,
        input: ObservationInput,
    ) -> Result<ObservationOutcome> {
        match mode {
            ObservationMode::Snapshot => self.write_snapshot(input).await,
            ObservationMode::LatestWins => self.write_latest(input).await,
        }
    }

    async fn write_snapshot(&self, input: ObservationInput) -> Result<ObservationOutcome> {
        let pool = self.pool.clone();
        let run_at = input
            .issued_at
            .unwrap_or_else(|| truncate_to_hour(input.fetched_at));

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;

                let obs_run_id: i64 = sqlx::query_scalar(
                    "INSERT INTO observation_runs (source, run_at, authority, created_at)
                     VALUES (?, ?, ?, ?)
                     ON CONFLICT(source, run_at) DO UPDATE SET source = excluded.source
                     RETURNING obs_run_id",
                )
                .bind(&input.source)
                .bind(format_timestamp(run_at))
                .bind(source_authority(&input.source))
                .bind(now_timestamp())
                .fetch_one(&mut *tx)
                .await
                .with_context(|| format!("Failed to register observation run for {}", input.source))?;

                sqlx::query(
                    "INSERT INTO observations (
                        obs_run_id, station_id, date, observed_high, observed_low,
                        issued_at, raw_text, fetched_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(obs_run_id, station_id, date) DO UPDATE SET
                        observed_high = excluded.observed_high,
                        observed_low = excluded.observed_low,
                        issued_at = excluded.issued_at,
                        raw_text = excluded.raw_text,
                        fetched_at = excluded.fetched_at",
                )
                .bind(obs_run_id)
                .bind(&input.station_id)
                .bind(format_date(input.date))
                .bind(input.observed_high)
                .bind(input.observed_low)
                .bind(input.issued_at.map(format_timestamp))
                .bind(&input.raw_text)
                .bind(format_timestamp(input.fetched_at))
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
                debug!(
                    "snapshot {} for {} {} from {}",
                    obs_run_id, input.station_id, input.date, input.source
                );
                Ok(ObservationOutcome::Snapshot { obs_run_id })
            })
            .await
    }

    async fn write_latest(&self, input: ObservationInput) -> Result<ObservationOutcome> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                let date = format_date(input.date);
                let authority = source_authority(&input.source);

                let stored: Option<i64> = sqlx::query_scalar(
                    "SELECT authority FROM observations_latest WHERE station_id = ? AND date = ?",
                )
                .bind(&input.station_id)
                .bind(&date)
                .fetch_optional(&mut *tx)
                .await?;

                // Every SET expression sees the pre-update row, so the guard is
                // evaluated against the stored authority for each column.
                sqlx::query(
                    "INSERT INTO observations_latest (
                        station_id, date, observed_high, observed_low, source, authority,
                        issued_at, raw_text, fetched_at, last_seen_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    ON CONFLICT(station_id, date) DO UPDATE SET
                        observed_high = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.observed_high ELSE observations_latest.observed_high END,
                        observed_low = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.observed_low ELSE observations_latest.observed_low END,
                        source = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.source ELSE observations_latest.source END,
                        issued_at = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.issued_at ELSE observations_latest.issued_at END,
                        raw_text = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.raw_text ELSE observations_latest.raw_text END,
                        fetched_at = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.fetched_at ELSE observations_latest.fetched_at END,
                        authority = CASE WHEN excluded.authority >= observations_latest.authority
                            THEN excluded.authority ELSE observations_latest.authority END,
                        last_seen_at = excluded.last_seen_at",
                )
                .bind(&input.station_id)
                .bind(&date)
                .bind(input.observed_high)
                .bind(input.observed_low)
                .bind(&input.source)
                .bind(authority)
                .bind(input.issued_at.map(format_timestamp))
                .bind(&input.raw_text)
                .bind(format_timestamp(input.fetched_at))
                .bind(now_timestamp())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;

                let outcome = match stored {
                    None => ObservationOutcome::Inserted,
                    Some(existing) if authority >= existing => ObservationOutcome::Updated,
                    Some(existing) => {
                        info!(
                            "kept authority {} observation for {} {} over {} (authority {})",
                            existing, input.station_id, date, input.source, authority
                        );
                        ObservationOutcome::Retained
                    }
                };
                Ok(outcome)
            })
            .await
    }

    /// The observation each station is scored against on `date`. In snapshot
    /// mode that is the most authoritative snapshot, latest `run_at` first.
    pub async fn scoring_observations(
        &self,
        mode: ObservationMode,
        date: Date,
    ) -> Result<Vec<ScoringObservation>> {
        let rows = match mode {
            ObservationMode::Snapshot => {
                sqlx::query(
                    "SELECT o.station_id, o.obs_run_id, r.source, o.observed_high, o.observed_low
                     FROM observations o
                     JOIN observation_runs r ON r.obs_run_id = o.obs_run_id
                     WHERE o.date = ?
                     ORDER BY o.station_id, r.authority DESC, r.run_at DESC",
                )
                .bind(format_date(date))
                .fetch_all(&self.pool)
                .await?
            }
            ObservationMode::LatestWins => {
                sqlx::query(
                    "SELECT station_id, NULL AS obs_run_id, source, observed_high, observed_low
                     FROM observations_latest
                     WHERE date = ?
                     ORDER BY station_id",
                )
                .bind(format_date(date))
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut best: Vec<ScoringObservation> = Vec::new();
        for row in rows {
            let station_id: String = row.get("station_id");
            if best.last().is_some_and(|o| o.station_id == station_id) {
                continue;
            }
            best.push(ScoringObservation {
                station_id,
                obs_run_id: row.get("obs_run_id"),
                source: row.get("source"),
                observed_high: row.get("observed_high"),
                observed_low: row.get("observed_low"),
            });
        }
        Ok(best)
    }
}
