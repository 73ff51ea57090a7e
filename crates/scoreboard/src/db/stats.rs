//! Rolling accuracy statistics per station, source and kind.

use anyhow::Result;
use log::info;
use serde::Serialize;
use sqlx::Row;
use std::collections::BTreeMap;
use time::{Date, Duration, OffsetDateTime};

use super::{DashboardStat, Database, Kind, StatKind};
use crate::timestamps::{format_date, now_timestamp};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorSummary {
    pub n: usize,
    pub bias: f64,
    pub mae: f64,
    pub rmse: f64,
    pub p10: f64,
    pub p50: f64,
    pub p90: f64,
}

/// Linear interpolation between closest ranks at fractional rank `(n - 1) * p`.
/// `sorted` must be ascending and non-empty.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = (sorted.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Summary of signed errors (`forecast - observed`). `None` when empty.
pub fn summarize(errors: &[f64]) -> Option<ErrorSummary> {
    if errors.is_empty() {
        return None;
    }
    let n = errors.len() as f64;
    let mut sorted = errors.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(ErrorSummary {
        n: errors.len(),
        bias: errors.iter().sum::<f64>() / n,
        mae: errors.iter().map(|e| e.abs()).sum::<f64>() / n,
        rmse: (errors.iter().map(|e| e * e).sum::<f64>() / n).sqrt(),
        p10: percentile(&sorted, 0.10),
        p50: percentile(&sorted, 0.50),
        p90: percentile(&sorted, 0.90),
    })
}

/// First day of a trailing window of `window_days` days ending at `as_of`.
/// Windows reaching past the earliest representable date start there.
pub fn window_start(as_of: Date, window_days: u32) -> Option<Date> {
    let span = window_days.checked_sub(1)?;
    Some(
        as_of
            .checked_sub(Duration::days(i64::from(span)))
            .unwrap_or(Date::MIN),
    )
}

impl Database {
    pub async fn update_stats(&self, window_days: u32, station: Option<&str>) -> Result<usize> {
        let today = OffsetDateTime::now_utc().date();
        self.update_stats_as_of(today, window_days, station).await
    }

    /// Recompute dashboard rows for errors in the `window_days` calendar days
    /// ending at `as_of`, both ends included. A zero-day window holds nothing.
    /// Rows previously written for the same window (and station, when given)
    /// are replaced wholesale.
    pub async fn update_stats_as_of(
        &self,
        as_of: Date,
        window_days: u32,
        station: Option<&str>,
    ) -> Result<usize> {
        let pool = self.pool.clone();
        let start = window_start(as_of, window_days).map(format_date);
        let end = format_date(as_of);
        let station = station.map(str::to_string);

        self.writer
            .execute(pool, move |pool| async move {
                let mut tx = pool.begin().await?;

                let mut query = String::from(
                    "SELECT station_id, source, kind, error_f
                     FROM forecast_errors
                     WHERE target_date >= ? AND target_date <= ?",
                );
                if station.is_some() {
                    query.push_str(" AND station_id = ?");
                }
                let mut q = sqlx::query(&query).bind(&start).bind(&end);
                if let Some(ref station) = station {
                    q = q.bind(station);
                }
                let rows = match start {
                    Some(_) => q.fetch_all(&mut *tx).await?,
                    None => Vec::new(),
                };

                let mut groups: BTreeMap<(String, String, Kind), Vec<f64>> = BTreeMap::new();
                for row in rows {
                    let kind: Kind = row.get::<String, _>("kind").parse()?;
                    groups
                        .entry((row.get("station_id"), row.get("source"), kind))
                        .or_default()
                        .push(row.get("error_f"));
                }

                let stats = build_stats(&groups, i64::from(window_days), &now_timestamp());

                let mut delete = String::from("DELETE FROM dashboard_stats WHERE window_days = ?");
                if station.is_some() {
                    delete.push_str(" AND station_id = ?");
                }
                let mut q = sqlx::query(&delete).bind(i64::from(window_days));
                if let Some(ref station) = station {
                    q = q.bind(station);
                }
                q.execute(&mut *tx).await?;

                for stat in &stats {
                    sqlx::query(
                        "INSERT INTO dashboard_stats (
                            station_id, source, kind, window_days, n,
                            bias, mae, rmse, p10, p50, p90, last_updated
                        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    )
                    .bind(&stat.station_id)
                    .bind(&stat.source)
                    .bind(&stat.kind)
                    .bind(stat.window_days)
                    .bind(stat.n)
                    .bind(stat.bias)
                    .bind(stat.mae)
                    .bind(stat.rmse)
                    .bind(stat.p10)
                    .bind(stat.p50)
                    .bind(stat.p90)
                    .bind(&stat.last_updated)
                    .execute(&mut *tx)
                    .await?;
                }

                tx.commit().await?;
                info!(
                    "dashboard stats refreshed: {} rows for {:?}..={} ({} days)",
                    stats.len(),
                    start,
                    end,
                    window_days
                );
                Ok(stats.len())
            })
            .await
    }

    pub async fn get_stats(
        &self,
        window_days: Option<u32>,
        station_id: Option<&str>,
        source: Option<&str>,
    ) -> Result<Vec<DashboardStat>> {
        let mut query = String::from(
            "SELECT station_id, source, kind, window_days, n, bias, mae, rmse,
                    p10, p50, p90, last_updated
             FROM dashboard_stats",
        );
        let mut conditions = Vec::new();
        let mut bindings: Vec<String> = Vec::new();

        if let Some(window_days) = window_days {
            conditions.push("window_days = ?");
            bindings.push(window_days.to_string());
        }
        if let Some(station_id) = station_id {
            conditions.push("station_id = ?");
            bindings.push(station_id.to_string());
        }
        if let Some(source) = source {
            conditions.push("source = ?");
            bindings.push(source.to_string());
        }
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(" ORDER BY station_id, source, kind, window_days");

        let mut q = sqlx::query(&query);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| DashboardStat {
                station_id: row.get("station_id"),
                source: row.get("source"),
                kind: row.get("kind"),
                window_days: row.get("window_days"),
                n: row.get("n"),
                bias: row.get("bias"),
                mae: row.get("mae"),
                rmse: row.get("rmse"),
                p10: row.get("p10"),
                p50: row.get("p50"),
                p90: row.get("p90"),
                last_updated: row.get("last_updated"),
            })
            .collect())
    }
}

fn build_stats(
    groups: &BTreeMap<(String, String, Kind), Vec<f64>>,
    window_days: i64,
    last_updated: &str,
) -> Vec<DashboardStat> {
    let mut stats = Vec::new();
    let mut per_kind: BTreeMap<(&str, &str), Vec<(Kind, ErrorSummary)>> = BTreeMap::new();

    for ((station_id, source, kind), errors) in groups {
        let Some(summary) = summarize(errors) else {
            continue;
        };
        stats.push(DashboardStat {
            station_id: station_id.clone(),
            source: source.clone(),
            kind: StatKind::from(*kind).as_str().to_string(),
            window_days,
            n: summary.n as i64,
            bias: Some(summary.bias),
            mae: summary.mae,
            rmse: Some(summary.rmse),
            p10: Some(summary.p10),
            p50: Some(summary.p50),
            p90: Some(summary.p90),
            last_updated: last_updated.to_string(),
        });
        per_kind
            .entry((station_id.as_str(), source.as_str()))
            .or_default()
            .push((*kind, summary));
    }

    for ((station_id, source), summaries) in per_kind {
        let high = summaries.iter().find(|(k, _)| *k == Kind::High);
        let low = summaries.iter().find(|(k, _)| *k == Kind::Low);
        if let (Some((_, high)), Some((_, low))) = (high, low) {
            stats.push(DashboardStat {
                station_id: station_id.to_string(),
                source: source.to_string(),
                kind: StatKind::Both.as_str().to_string(),
                window_days,
                n: high.n.min(low.n) as i64,
                bias: None,
                mae: (high.mae + low.mae) / 2.0,
                rmse: None,
                p10: None,
                p50: None,
                p90: None,
                last_updated: last_updated.to_string(),
            });
        }
    }

    stats
}
