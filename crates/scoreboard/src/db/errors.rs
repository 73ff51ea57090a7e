use anyhow::Result;
use log::{debug, info};
use sqlx::Row;
use time::Date;

use super::{Database, ForecastErrorRow, Kind, ObservationMode};
use crate::timestamps::{format_date, now_timestamp};

pub fn error_id(run_id: i64, station_id: &str, target_date: &str, kind: Kind) -> String {
    format!("{}:{}:{}:{}", run_id, station_id, target_date, kind)
}

impl Database {
    /// Score every forecast targeting `target_date` against the observation
    /// chosen for its station. Existing error rows are left untouched, so the
    /// return value counts only rows written by this call.
    pub async fn build_errors_for_date(
        &self,
        mode: ObservationMode,
        target_date: Date,
    ) -> Result<u64> {
        let observations = self.scoring_observations(mode, target_date).await?;
        if observations.is_empty() {
            info!("no observations for {}, nothing to score", target_date);
            return Ok(0);
        }

        let pool = self.pool.clone();
        let date = format_date(target_date);

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                let created_at = now_timestamp();
                let mut inserted = 0;

                for obs in &observations {
                    let forecasts = sqlx::query(
                        "SELECT v.run_id, r.source, v.kind, v.value_f, v.lead_hours
                         FROM forecast_values v
                         JOIN forecast_runs r ON r.run_id = v.run_id
                         WHERE v.station_id = ? AND v.target_date = ?",
                    )
                    .bind(&obs.station_id)
                    .bind(&date)
                    .fetch_all(&mut *tx)
                    .await?;

                    for row in forecasts {
                        let kind: Kind = row.get::<String, _>("kind").parse()?;
                        let Some(observed_f) = obs.value(kind) else {
                            continue;
                        };
                        let run_id: i64 = row.get("run_id");
                        let forecast_f: f64 = row.get("value_f");
                        let error_f = forecast_f - observed_f;

                        let result = sqlx::query(
                            "INSERT INTO forecast_errors (
                                error_id, run_id, obs_run_id, station_id, source, target_date,
                                kind, lead_hours, forecast_f, observed_f, error_f, abs_error_f,
                                created_at
                            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                            ON CONFLICT(error_id) DO NOTHING",
                        )
                        .bind(error_id(run_id, &obs.station_id, &date, kind))
                        .bind(run_id)
                        .bind(obs.obs_run_id)
                        .bind(&obs.station_id)
                        .bind(row.get::<String, _>("source"))
                        .bind(&date)
                        .bind(kind.as_str())
                        .bind(row.get::<f64, _>("lead_hours"))
                        .bind(forecast_f)
                        .bind(observed_f)
                        .bind(error_f)
                        .bind(error_f.abs())
                        .bind(&created_at)
                        .execute(&mut *tx)
                        .await?;
                        inserted += result.rows_affected();
                    }
                }

                tx.commit().await?;
                debug!("scored {} with {} new error rows", date, inserted);
                Ok(inserted)
            })
            .await
    }

    pub async fn get_errors(
        &self,
        target_date: Date,
        station_id: Option<&str>,
    ) -> Result<Vec<ForecastErrorRow>> {
        let mut query = String::from(
            "SELECT error_id, run_id, obs_run_id, station_id, source, target_date, kind,
                    lead_hours, forecast_f, observed_f, error_f, abs_error_f
             FROM forecast_errors
             WHERE target_date = ?",
        );
        let mut bindings = vec![format_date(target_date)];

        if let Some(station_id) = station_id {
            query.push_str(" AND station_id = ?");
            bindings.push(station_id.to_string());
        }
        query.push_str(" ORDER BY station_id, source, kind, run_id");

        let mut q = sqlx::query(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| ForecastErrorRow {
                error_id: row.get("error_id"),
                run_id: row.get("run_id"),
                obs_run_id: row.get("obs_run_id"),
                station_id: row.get("station_id"),
                source: row.get("source"),
                target_date: row.get("target_date"),
                kind: row.get("kind"),
                lead_hours: row.get("lead_hours"),
                forecast_f: row.get("forecast_f"),
                observed_f: row.get("observed_f"),
                error_f: row.get("error_f"),
                abs_error_f: row.get("abs_error_f"),
            })
            .collect())
    }
}
