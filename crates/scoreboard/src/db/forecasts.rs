use anyhow::{Context, Result};
use log::{debug, warn};
use sqlx::{sqlite::SqliteConnection, Row};
use time::OffsetDateTime;

use super::{
    sqlite::get_or_create_run_tx, BatchWriteSummary, Database, ForecastBatchItem,
    ForecastRevision, Kind,
};
use crate::{
    lead_time::{lead_hours, LeadTimeAnchors},
    normalize::{Extras, ForecastPayload},
    timestamps::{format_date, format_timestamp},
};

/// A daily value with its lead time resolved, ready to insert.
struct PreparedValue<'a> {
    target_date: String,
    kind: Kind,
    value_f: f64,
    lead_hours: f64,
    extras: &'a Extras,
}

impl Database {
    /// Write every item in one transaction. An item whose station has no
    /// usable timezone is skipped and counted; database failures abort the
    /// whole batch.
    pub async fn write_forecast_batch(
        &self,
        items: Vec<ForecastBatchItem>,
        anchors: LeadTimeAnchors,
    ) -> Result<BatchWriteSummary> {
        let pool = self.pool.clone();

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;
                let mut summary = BatchWriteSummary::default();

                for item in &items {
                    match write_item(&mut tx, item, &anchors).await? {
                        Some(item_summary) => {
                            summary.items_written += 1;
                            summary.values_written += item_summary.values_written;
                            summary.hourly_written += item_summary.hourly_written;
                            summary.revisions_written += item_summary.revisions_written;
                        }
                        None => summary.items_skipped += 1,
                    }
                }

                tx.commit().await?;
                Ok(summary)
            })
            .await
    }

    pub async fn write_forecast(
        &self,
        source: &str,
        station_id: &str,
        payload: ForecastPayload,
        fetched_at: OffsetDateTime,
        anchors: LeadTimeAnchors,
    ) -> Result<BatchWriteSummary> {
        self.write_forecast_batch(
            vec![ForecastBatchItem {
                source: source.to_string(),
                station_id: station_id.to_string(),
                payload,
                fetched_at,
            }],
            anchors,
        )
        .await
    }

    pub async fn get_revisions(
        &self,
        station_id: &str,
        target_date: time::Date,
    ) -> Result<Vec<ForecastRevision>> {
        let rows = sqlx::query(
            "SELECT station_id, source, kind, target_date, issued_at,
                    prev_issued_at, prev_value_f, value_f, delta_f
             FROM forecast_revisions
             WHERE station_id = ? AND target_date = ?
             ORDER BY source, kind, issued_at",
        )
        .bind(station_id)
        .bind(format_date(target_date))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| ForecastRevision {
                station_id: row.get("station_id"),
                source: row.get("source"),
                kind: row.get("kind"),
                target_date: row.get("target_date"),
                issued_at: row.get("issued_at"),
                prev_issued_at: row.get("prev_issued_at"),
                prev_value_f: row.get("prev_value_f"),
                value_f: row.get("value_f"),
                delta_f: row.get("delta_f"),
            })
            .collect())
    }

    /// Stored daily value for one run/station/date/kind.
    pub async fn get_forecast_value(
        &self,
        run_id: i64,
        station_id: &str,
        target_date: time::Date,
        kind: Kind,
    ) -> Result<Option<f64>> {
        let value: Option<f64> = sqlx::query_scalar(
            "SELECT value_f FROM forecast_values
             WHERE run_id = ? AND station_id = ? AND target_date = ? AND kind = ?",
        )
        .bind(run_id)
        .bind(station_id)
        .bind(format_date(target_date))
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(value)
    }
}

async fn write_item(
    conn: &mut SqliteConnection,
    item: &ForecastBatchItem,
    anchors: &LeadTimeAnchors,
) -> Result<Option<BatchWriteSummary>> {
    let timezone =
        sqlx::query_scalar::<_, Option<String>>("SELECT timezone FROM stations WHERE station_id = ?")
            .bind(&item.station_id)
            .fetch_optional(&mut *conn)
            .await?
            .flatten();
    let Some(timezone) = timezone else {
        warn!(
            "skipping {} forecast for {}: station has no timezone",
            item.source, item.station_id
        );
        return Ok(None);
    };

    let issued_at = item.payload.issued_at;
    let mut prepared = Vec::new();
    for day in &item.payload.daily {
        for kind in Kind::ALL {
            let value = match kind {
                Kind::High => day.high_f,
                Kind::Low => day.low_f,
            };
            let Some(value_f) = value else { continue };
            let lead = match lead_hours(&timezone, issued_at, day.target_date, kind, anchors) {
                Ok(lead) => lead,
                Err(e) => {
                    warn!(
                        "skipping {} forecast for {}: {}",
                        item.source, item.station_id, e
                    );
                    return Ok(None);
                }
            };
            prepared.push(PreparedValue {
                target_date: format_date(day.target_date),
                kind,
                value_f,
                lead_hours: lead,
                extras: &day.extras,
            });
        }
    }

    let run_id = get_or_create_run_tx(conn, &item.source, issued_at).await?;
    let issued_text = format_timestamp(issued_at);
    let fetched_text = format_timestamp(item.fetched_at);
    let mut summary = BatchWriteSummary::default();

    for value in &prepared {
        sqlx::query(
            "INSERT INTO forecast_values (
                run_id, station_id, target_date, kind, value_f, lead_hours,
                dewpoint_f, humidity_pct, wind_speed_mph, wind_dir_deg,
                cloud_cover_pct, precip_prob_pct, fetched_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id, station_id, target_date, kind) DO UPDATE SET
                value_f = excluded.value_f,
                lead_hours = excluded.lead_hours,
                dewpoint_f = excluded.dewpoint_f,
                humidity_pct = excluded.humidity_pct,
                wind_speed_mph = excluded.wind_speed_mph,
                wind_dir_deg = excluded.wind_dir_deg,
                cloud_cover_pct = excluded.cloud_cover_pct,
                precip_prob_pct = excluded.precip_prob_pct,
                fetched_at = excluded.fetched_at",
        )
        .bind(run_id)
        .bind(&item.station_id)
        .bind(&value.target_date)
        .bind(value.kind.as_str())
        .bind(value.value_f)
        .bind(value.lead_hours)
        .bind(value.extras.dewpoint_f)
        .bind(value.extras.humidity_pct)
        .bind(value.extras.wind_speed_mph)
        .bind(value.extras.wind_dir_deg)
        .bind(value.extras.cloud_cover_pct)
        .bind(value.extras.precip_prob_pct)
        .bind(&fetched_text)
        .execute(&mut *conn)
        .await
        .with_context(|| format!("Failed to write forecast for {}", item.station_id))?;
        summary.values_written += 1;

        if record_revision(conn, item, &issued_text, value).await? {
            summary.revisions_written += 1;
        }
    }

    for hour in &item.payload.hourly {
        sqlx::query(
            "INSERT INTO forecast_hourly (
                run_id, station_id, valid_time, temperature_f, dewpoint_f,
                humidity_pct, wind_speed_mph, wind_dir_deg, cloud_cover_pct, precip_prob_pct
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(run_id, station_id, valid_time) DO UPDATE SET
                temperature_f = excluded.temperature_f,
                dewpoint_f = excluded.dewpoint_f,
                humidity_pct = excluded.humidity_pct,
                wind_speed_mph = excluded.wind_speed_mph,
                wind_dir_deg = excluded.wind_dir_deg,
                cloud_cover_pct = excluded.cloud_cover_pct,
                precip_prob_pct = excluded.precip_prob_pct",
        )
        .bind(run_id)
        .bind(&item.station_id)
        .bind(format_timestamp(hour.valid_time))
        .bind(hour.temperature_f)
        .bind(hour.extras.dewpoint_f)
        .bind(hour.extras.humidity_pct)
        .bind(hour.extras.wind_speed_mph)
        .bind(hour.extras.wind_dir_deg)
        .bind(hour.extras.cloud_cover_pct)
        .bind(hour.extras.precip_prob_pct)
        .execute(&mut *conn)
        .await?;
        summary.hourly_written += 1;
    }

    debug!(
        "wrote {} values, {} hourly rows for {} / {} (run {})",
        summary.values_written, summary.hourly_written, item.source, item.station_id, run_id
    );
    Ok(Some(summary))
}

/// Compare against the latest earlier issuance of the same key.
async fn record_revision(
    conn: &mut SqliteConnection,
    item: &ForecastBatchItem,
    issued_text: &str,
    value: &PreparedValue<'_>,
) -> Result<bool> {
    let previous = sqlx::query(
        "SELECT r.issued_at, v.value_f
         FROM forecast_values v
         JOIN forecast_runs r ON r.run_id = v.run_id
         WHERE r.source = ? AND v.station_id = ? AND v.target_date = ? AND v.kind = ?
           AND r.issued_at < ?
         ORDER BY r.issued_at DESC
         LIMIT 1",
    )
    .bind(&item.source)
    .bind(&item.station_id)
    .bind(&value.target_date)
    .bind(value.kind.as_str())
    .bind(issued_text)
    .fetch_optional(&mut *conn)
    .await?;

    let Some(previous) = previous else {
        return Ok(false);
    };
    let prev_issued_at: String = previous.get("issued_at");
    let prev_value_f: f64 = previous.get("value_f");

    sqlx::query(
        "INSERT INTO forecast_revisions (
            station_id, source, kind, target_date, issued_at,
            prev_issued_at, prev_value_f, value_f, delta_f
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(station_id, source, kind, target_date, issued_at) DO UPDATE SET
            prev_issued_at = excluded.prev_issued_at,
            prev_value_f = excluded.prev_value_f,
            value_f = excluded.value_f,
            delta_f = excluded.delta_f",
    )
    .bind(&item.station_id)
    .bind(&item.source)
    .bind(value.kind.as_str())
    .bind(&value.target_date)
    .bind(issued_text)
    .bind(&prev_issued_at)
    .bind(prev_value_f)
    .bind(value.value_f)
    .bind(value.value_f - prev_value_f)
    .execute(&mut *conn)
    .await?;
    Ok(true)
}
