pub mod errors;
pub mod forecasts;
pub mod observations;
pub mod sqlite;
pub mod stats;

pub use sqlite::*;
pub use stats::{percentile, summarize, window_start, ErrorSummary};

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use time::{Date, OffsetDateTime};

use crate::normalize::ForecastPayload;

pub const SOURCE_NWS_CLI: &str = "NWS_CLI";
pub const SOURCE_NWS_OBS_FALLBACK: &str = "NWS_OBS_FALLBACK";

/// Ranking used when two observation sources disagree. Higher wins.
pub fn source_authority(source: &str) -> i64 {
    match source {
        SOURCE_NWS_CLI => 2,
        SOURCE_NWS_OBS_FALLBACK => 1,
        _ => 0,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    High,
    Low,
}

impl Kind {
    pub const ALL: [Kind; 2] = [Kind::High, Kind::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::High => "high",
            Kind::Low => "low",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Kind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "high" => Ok(Kind::High),
            "low" => Ok(Kind::Low),
            other => Err(anyhow::anyhow!("unknown measurement kind: {}", other)),
        }
    }
}

/// Kinds a dashboard row can be aggregated over; `Both` combines high and low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatKind {
    High,
    Low,
    Both,
}

impl StatKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatKind::High => "high",
            StatKind::Low => "low",
            StatKind::Both => "both",
        }
    }
}

impl From<Kind> for StatKind {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::High => StatKind::High,
            Kind::Low => StatKind::Low,
        }
    }
}

/// Which observation table the reconciler writes and the error builder reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ObservationMode {
    /// Every fetch is retained as its own observation run.
    #[default]
    Snapshot,
    /// One row per station/date, replaced only by an equal or more authoritative source.
    LatestWins,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub station_id: String,
    pub name: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub timezone: Option<String>,
    pub state: Option<String>,
    pub elevation_ft: Option<f64>,
    pub is_active: Option<bool>,
}

/// One station's payload from one provider, ready to be written.
#[derive(Debug, Clone)]
pub struct ForecastBatchItem {
    pub source: String,
    pub station_id: String,
    pub payload: ForecastPayload,
    pub fetched_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchWriteSummary {
    pub items_written: usize,
    pub items_skipped: usize,
    pub values_written: u64,
    pub hourly_written: u64,
    pub revisions_written: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObservationInput {
    pub station_id: String,
    pub date: Date,
    pub source: String,
    pub observed_high: Option<f64>,
    pub observed_low: Option<f64>,
    /// Product issuance time, when the source reports one.
    pub issued_at: Option<OffsetDateTime>,
    pub raw_text: Option<String>,
    pub fetched_at: OffsetDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservationOutcome {
    Snapshot { obs_run_id: i64 },
    Inserted,
    Updated,
    /// A less authoritative source tried to replace the stored row.
    Retained,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastErrorRow {
    pub error_id: String,
    pub run_id: i64,
    pub obs_run_id: Option<i64>,
    pub station_id: String,
    pub source: String,
    pub target_date: String,
    pub kind: String,
    pub lead_hours: f64,
    pub forecast_f: f64,
    pub observed_f: f64,
    pub error_f: f64,
    pub abs_error_f: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardStat {
    pub station_id: String,
    pub source: String,
    pub kind: String,
    pub window_days: i64,
    pub n: i64,
    pub bias: Option<f64>,
    pub mae: f64,
    pub rmse: Option<f64>,
    pub p10: Option<f64>,
    pub p50: Option<f64>,
    pub p90: Option<f64>,
    pub last_updated: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRevision {
    pub station_id: String,
    pub source: String,
    pub kind: String,
    pub target_date: String,
    pub issued_at: String,
    pub prev_issued_at: String,
    pub prev_value_f: f64,
    pub value_f: f64,
    pub delta_f: f64,
}

/// The observation a station/date is scored against.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringObservation {
    pub station_id: String,
    pub obs_run_id: Option<i64>,
    pub source: String,
    pub observed_high: Option<f64>,
    pub observed_low: Option<f64>,
}

impl ScoringObservation {
    pub fn value(&self, kind: Kind) -> Option<f64> {
        match kind {
            Kind::High => self.observed_high,
            Kind::Low => self.observed_low,
        }
    }
}
