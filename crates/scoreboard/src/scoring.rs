//! The nightly pass: build error rows for a date, then refresh the rollups.

use anyhow::{Context, Result};
use log::info;
use serde::Serialize;
use time::{Date, Duration, OffsetDateTime};

use crate::{Database, ObservationMode};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoringReport {
    pub target_date: Date,
    pub errors_written: u64,
    pub stat_rows: usize,
}

/// Yesterday in UTC, the default target of a scoring pass.
pub fn default_score_date() -> Date {
    (OffsetDateTime::now_utc() - Duration::days(1)).date()
}

pub async fn score_and_refresh(
    db: &Database,
    mode: ObservationMode,
    target_date: Date,
    window_days: u32,
) -> Result<ScoringReport> {
    let errors_written = db
        .build_errors_for_date(mode, target_date)
        .await
        .with_context(|| format!("failed to build errors for {}", target_date))?;
    let stat_rows = db
        .update_stats(window_days, None)
        .await
        .context("failed to refresh dashboard stats")?;

    info!(
        "scored {}: {} new error rows, {} stat rows ({} day window)",
        target_date, errors_written, stat_rows, window_days
    );
    Ok(ScoringReport {
        target_date,
        errors_written,
        stat_rows,
    })
}
