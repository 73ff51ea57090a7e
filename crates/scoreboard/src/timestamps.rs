//! Canonical text forms for instants and calendar dates.
//!
//! Every instant the store keys on (run issuance, hourly valid times) goes
//! through [`parse_timestamp`] + [`format_timestamp`], so `2026-02-01T06:00Z`,
//! `2026-02-01T00:00:00-06:00` and `2026-02-01 06:00:00` all become the same
//! `2026-02-01T06:00:00Z` key.

use time::{
    format_description::well_known::Rfc3339, macros::format_description, Date, OffsetDateTime,
    PrimitiveDateTime, UtcOffset,
};

/// Parse an instant. Strings without an offset are taken as UTC.
/// Sub-second precision is dropped.
pub fn parse_timestamp(raw: &str) -> Option<OffsetDateTime> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(ts) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Some(to_whole_utc_seconds(ts));
    }

    let mut naive = trimmed.replacen(' ', "T", 1);
    if naive.ends_with('Z') || naive.ends_with('z') {
        naive.pop();
    }

    let parsed = PrimitiveDateTime::parse(
        &naive,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .or_else(|_| {
        PrimitiveDateTime::parse(
            &naive,
            format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]"),
        )
    })
    .or_else(|_| {
        PrimitiveDateTime::parse(&naive, format_description!("[year]-[month]-[day]T[hour]:[minute]"))
    })
    .ok()?;

    Some(to_whole_utc_seconds(parsed.assume_utc()))
}

fn to_whole_utc_seconds(ts: OffsetDateTime) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.replace_nanosecond(0).unwrap_or(utc)
}

/// `YYYY-MM-DDTHH:MM:SSZ` in UTC.
pub fn format_timestamp(ts: OffsetDateTime) -> String {
    let utc = ts.to_offset(UtcOffset::UTC);
    format!(
        "{}T{:02}:{:02}:{:02}Z",
        format_date(utc.date()),
        utc.hour(),
        utc.minute(),
        utc.second()
    )
}

/// Parse a `YYYY-MM-DD` calendar date.
pub fn parse_date(raw: &str) -> Option<Date> {
    Date::parse(raw.trim(), format_description!("[year]-[month]-[day]")).ok()
}

pub fn format_date(date: Date) -> String {
    format!(
        "{:04}-{:02}-{:02}",
        date.year(),
        u8::from(date.month()),
        date.day()
    )
}

/// Current time in canonical form, used for `fetched_at`/`updated_at` columns.
pub fn now_timestamp() -> String {
    format_timestamp(OffsetDateTime::now_utc())
}

/// Truncate to the top of the hour. Sources without their own issuance time
/// are keyed on the hour they were fetched in.
pub fn truncate_to_hour(ts: OffsetDateTime) -> OffsetDateTime {
    let utc = ts.to_offset(UtcOffset::UTC);
    utc.replace_time(time::Time::MIDNIGHT)
        + time::Duration::hours(i64::from(utc.hour()))
}
