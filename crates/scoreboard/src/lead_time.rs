//! Forecast lead time: hours from issuance to the local civil time a
//! measurement conventionally refers to.
//!
//! The anchors are a convention, not a standard. What matters is that every
//! provider is measured against the same anchors, so they are configured once
//! and shared by the whole batch.

use chrono::{LocalResult, NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::Kind;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum LeadTimeError {
    #[error("unknown timezone: {0}")]
    UnknownTimezone(String),
    #[error("invalid anchor hour {0} (expected 0-23)")]
    InvalidAnchor(u8),
    #[error("date {0} cannot be represented in the station timezone")]
    UnrepresentableDate(Date),
}

/// Local hour of day each kind is anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LeadTimeAnchors {
    pub high_hour: u8,
    pub low_hour: u8,
}

impl Default for LeadTimeAnchors {
    fn default() -> Self {
        Self {
            high_hour: 15,
            low_hour: 6,
        }
    }
}

impl LeadTimeAnchors {
    pub fn hour_for(&self, kind: Kind) -> u8 {
        match kind {
            Kind::High => self.high_hour,
            Kind::Low => self.low_hour,
        }
    }
}

pub fn parse_timezone(name: &str) -> Result<Tz, LeadTimeError> {
    name.trim()
        .parse::<Tz>()
        .map_err(|_| LeadTimeError::UnknownTimezone(name.to_string()))
}

/// Signed hours from `issued_at` to the anchor of `kind` on `target_date`,
/// resolved through the station's named zone so DST shifts are honoured.
pub fn lead_hours(
    tz_name: &str,
    issued_at: OffsetDateTime,
    target_date: Date,
    kind: Kind,
    anchors: &LeadTimeAnchors,
) -> Result<f64, LeadTimeError> {
    let tz = parse_timezone(tz_name)?;
    let anchor_unix = anchor_instant(&tz, target_date, anchors.hour_for(kind))?;
    let seconds = anchor_unix - issued_at.unix_timestamp();
    Ok(seconds as f64 / 3600.0)
}

/// UTC instants of local midnight starting `date` and the following day.
pub fn local_day_bounds(
    tz_name: &str,
    date: Date,
) -> Result<(OffsetDateTime, OffsetDateTime), LeadTimeError> {
    let tz = parse_timezone(tz_name)?;
    let next = date
        .next_day()
        .ok_or(LeadTimeError::UnrepresentableDate(date))?;
    let to_instant = |unix: i64| {
        OffsetDateTime::from_unix_timestamp(unix).map_err(|_| LeadTimeError::UnrepresentableDate(date))
    };
    Ok((
        to_instant(anchor_instant(&tz, date, 0)?)?,
        to_instant(anchor_instant(&tz, next, 0)?)?,
    ))
}

/// Unix seconds of `hour:00` local time on `date` in `tz`.
fn anchor_instant(tz: &Tz, date: Date, hour: u8) -> Result<i64, LeadTimeError> {
    let naive_date = NaiveDate::from_ymd_opt(
        date.year(),
        u32::from(u8::from(date.month())),
        u32::from(date.day()),
    )
    .ok_or(LeadTimeError::UnrepresentableDate(date))?;
    let naive_time =
        NaiveTime::from_hms_opt(u32::from(hour), 0, 0).ok_or(LeadTimeError::InvalidAnchor(hour))?;
    let local = naive_date.and_time(naive_time);

    match tz.from_local_datetime(&local) {
        LocalResult::Single(dt) => Ok(dt.timestamp()),
        // fall-back: the wall clock shows this hour twice, take the first
        LocalResult::Ambiguous(earliest, _) => Ok(earliest.timestamp()),
        // spring-forward gap: the hour does not exist, use the next one
        LocalResult::None => {
            let shifted = local + chrono::Duration::hours(1);
            match tz.from_local_datetime(&shifted) {
                LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Ok(dt.timestamp()),
                LocalResult::None => Err(LeadTimeError::UnrepresentableDate(date)),
            }
        }
    }
}
