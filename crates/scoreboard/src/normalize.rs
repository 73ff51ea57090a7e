//! Coerces raw provider payloads into the canonical [`ForecastPayload`].
//!
//! Structural problems (no `issued_at`, no `daily` list, a non-object
//! `hourly`) reject the whole payload. Anything row-level is dropped with a
//! warning so one bad day never costs a provider its whole run.

use log::warn;
use serde::Serialize;
use serde_json::{Map, Value};
use time::{Date, OffsetDateTime};

use crate::timestamps::{parse_date, parse_timestamp};

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("payload is not a JSON object")]
    NotAnObject,
    #[error("payload is missing a non-empty issued_at string")]
    MissingIssuedAt,
    #[error("issued_at is not a recognizable timestamp: {0}")]
    InvalidIssuedAt(String),
    #[error("payload is missing a daily (or rows) array")]
    MissingDaily,
    #[error("hourly must be an object of parallel arrays")]
    HourlyNotObject,
}

/// Optional per-day or per-hour weather variables alongside temperature.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Extras {
    pub dewpoint_f: Option<f64>,
    pub humidity_pct: Option<f64>,
    pub wind_speed_mph: Option<f64>,
    pub wind_dir_deg: Option<f64>,
    pub cloud_cover_pct: Option<f64>,
    pub precip_prob_pct: Option<f64>,
}

impl Extras {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let get = |key: &str| obj.get(key).and_then(coerce_f64);
        Self {
            dewpoint_f: get("dewpoint_f"),
            humidity_pct: get("humidity_pct"),
            wind_speed_mph: get("wind_speed_mph"),
            wind_dir_deg: get("wind_dir_deg"),
            cloud_cover_pct: get("cloud_cover_pct"),
            precip_prob_pct: get("precip_prob_pct"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyForecast {
    pub target_date: Date,
    pub high_f: Option<f64>,
    pub low_f: Option<f64>,
    pub extras: Extras,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyForecast {
    pub valid_time: OffsetDateTime,
    pub temperature_f: Option<f64>,
    pub extras: Extras,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastPayload {
    pub issued_at: OffsetDateTime,
    pub daily: Vec<DailyForecast>,
    pub hourly: Vec<HourlyForecast>,
}

pub fn normalize_payload(raw: &Value) -> Result<ForecastPayload, SchemaError> {
    let obj = raw.as_object().ok_or(SchemaError::NotAnObject)?;

    let issued_raw = obj
        .get("issued_at")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(SchemaError::MissingIssuedAt)?;
    let issued_at = parse_timestamp(issued_raw)
        .ok_or_else(|| SchemaError::InvalidIssuedAt(issued_raw.to_string()))?;

    let rows = obj
        .get("daily")
        .or_else(|| obj.get("rows"))
        .and_then(Value::as_array)
        .ok_or(SchemaError::MissingDaily)?;

    let daily = rows
        .iter()
        .enumerate()
        .filter_map(|(idx, row)| match normalize_row(row) {
            Ok(day) => Some(day),
            Err(reason) => {
                warn!("dropping daily row {}: {}", idx, reason);
                None
            }
        })
        .collect();

    let hourly = match obj.get("hourly") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Object(hourly)) => normalize_hourly(hourly),
        Some(_) => return Err(SchemaError::HourlyNotObject),
    };

    Ok(ForecastPayload {
        issued_at,
        daily,
        hourly,
    })
}

fn normalize_row(row: &Value) -> Result<DailyForecast, String> {
    let obj = row.as_object().ok_or("row is not an object")?;

    let date_raw = obj
        .get("target_date")
        .and_then(Value::as_str)
        .ok_or("missing target_date")?;
    let target_date = date_raw
        .get(..10)
        .and_then(parse_date)
        .ok_or_else(|| format!("invalid target_date {date_raw:?}"))?;

    let high_f = temperature(obj, &["high", "high_f"])?;
    let low_f = temperature(obj, &["low", "low_f"])?;
    if high_f.is_none() && low_f.is_none() {
        return Err(format!("no temperatures for {date_raw}"));
    }

    let extras = match obj.get("extras") {
        Some(Value::Object(extras)) => Extras::from_object(extras),
        _ => Extras::default(),
    };

    Ok(DailyForecast {
        target_date,
        high_f,
        low_f,
        extras,
    })
}

/// First present key wins; a present value that is not numeric rejects the row.
fn temperature(obj: &Map<String, Value>, keys: &[&str]) -> Result<Option<f64>, String> {
    let Some((key, value)) = keys
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()).map(|v| (*k, v)))
    else {
        return Ok(None);
    };
    coerce_f64(value)
        .map(Some)
        .ok_or_else(|| format!("{key} is not a finite number: {value}"))
}

/// Finite number or numeric string.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    parsed.is_finite().then_some(parsed)
}

const HOURLY_COLUMNS: [(&str, &str); 7] = [
    ("temperature_f", "temperature_2m"),
    ("dewpoint_f", "dew_point_2m"),
    ("humidity_pct", "relative_humidity_2m"),
    ("wind_speed_mph", "wind_speed_10m"),
    ("wind_dir_deg", "wind_direction_10m"),
    ("cloud_cover_pct", "cloud_cover"),
    ("precip_prob_pct", "precipitation_probability"),
];

fn normalize_hourly(hourly: &Map<String, Value>) -> Vec<HourlyForecast> {
    let times = match hourly.get("time").and_then(Value::as_array) {
        Some(times) if !times.is_empty() => times,
        _ => {
            warn!("hourly block has no time array, skipping hourly series");
            return Vec::new();
        }
    };

    let mut columns: Vec<(&str, &Vec<Value>)> = Vec::new();
    for (canonical, provider) in HOURLY_COLUMNS {
        let series = hourly
            .get(canonical)
            .and_then(Value::as_array)
            .or_else(|| hourly.get(provider).and_then(Value::as_array));
        if let Some(series) = series {
            if series.len() != times.len() {
                warn!(
                    "hourly {} has {} values for {} timestamps, skipping hourly series",
                    canonical,
                    series.len(),
                    times.len()
                );
                return Vec::new();
            }
            columns.push((canonical, series));
        }
    }

    let column = |name: &str, idx: usize| {
        columns
            .iter()
            .find(|(canonical, _)| *canonical == name)
            .and_then(|(_, series)| coerce_f64(&series[idx]))
    };

    times
        .iter()
        .enumerate()
        .filter_map(|(idx, raw)| {
            let valid_time = raw.as_str().and_then(parse_timestamp)?;
            Some(HourlyForecast {
                valid_time,
                temperature_f: column("temperature_f", idx),
                extras: Extras {
                    dewpoint_f: column("dewpoint_f", idx),
                    humidity_pct: column("humidity_pct", idx),
                    wind_speed_mph: column("wind_speed_mph", idx),
                    wind_dir_deg: column("wind_dir_deg", idx),
                    cloud_cover_pct: column("cloud_cover_pct", idx),
                    precip_prob_pct: column("precip_prob_pct", idx),
                },
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamps::format_timestamp;
    use serde_json::json;
    use time::macros::date;

    #[test]
    fn canonicalizes_issued_at_and_rows() {
        let raw = json!({
            "issued_at": "2026-02-01T00:00:00-06:00",
            "daily": [
                {"target_date": "2026-02-01", "high": 30.0, "low": "18"},
                {"target_date": "2026-02-02T00:00:00", "high_f": 33.5, "low_f": 20.1,
                 "extras": {"dewpoint_f": 12.0, "humidity_pct": "65", "mystery": 1.0}}
            ]
        });
        let payload = normalize_payload(&raw).unwrap();

        assert_eq!(format_timestamp(payload.issued_at), "2026-02-01T06:00:00Z");
        assert_eq!(payload.daily.len(), 2);
        assert_eq!(payload.daily[0].low_f, Some(18.0));
        assert_eq!(payload.daily[1].target_date, date!(2026 - 02 - 02));
        assert_eq!(payload.daily[1].extras.dewpoint_f, Some(12.0));
        assert_eq!(payload.daily[1].extras.humidity_pct, Some(65.0));
        assert!(payload.hourly.is_empty());
    }

    #[test]
    fn structural_failures_reject_payload() {
        assert_eq!(normalize_payload(&json!([])), Err(SchemaError::NotAnObject));
        assert_eq!(
            normalize_payload(&json!({"daily": []})),
            Err(SchemaError::MissingIssuedAt)
        );
        assert_eq!(
            normalize_payload(&json!({"issued_at": "  ", "daily": []})),
            Err(SchemaError::MissingIssuedAt)
        );
        assert_eq!(
            normalize_payload(&json!({"issued_at": 1700000000, "daily": []})),
            Err(SchemaError::MissingIssuedAt)
        );
        assert_eq!(
            normalize_payload(&json!({"issued_at": "soon", "daily": []})),
            Err(SchemaError::InvalidIssuedAt("soon".to_string()))
        );
        assert_eq!(
            normalize_payload(&json!({"issued_at": "2026-02-01T06:00:00Z", "daily": {}})),
            Err(SchemaError::MissingDaily)
        );
        assert_eq!(
            normalize_payload(
                &json!({"issued_at": "2026-02-01T06:00:00Z", "daily": [], "hourly": [1, 2]})
            ),
            Err(SchemaError::HourlyNotObject)
        );
    }

    #[test]
    fn bad_rows_are_dropped_not_fatal() {
        let raw = json!({
            "issued_at": "2026-02-01T06:00:00Z",
            "rows": [
                "not a row",
                {"high": 30.0},
                {"target_date": "02/01/2026", "high": 30.0},
                {"target_date": "2026-02-01"},
                {"target_date": "2026-02-02", "high": "warm", "low": 10.0},
                {"target_date": "2026-02-03", "high": null, "low": 11.0},
                {"target_date": "2026-02-04", "high": 40.0}
            ]
        });
        let payload = normalize_payload(&raw).unwrap();
        let dates: Vec<Date> = payload.daily.iter().map(|d| d.target_date).collect();
        assert_eq!(dates, vec![date!(2026 - 02 - 03), date!(2026 - 02 - 04)]);
        assert_eq!(payload.daily[0].high_f, None);
        assert_eq!(payload.daily[1].low_f, None);
    }

    #[test]
    fn empty_daily_is_valid() {
        let payload =
            normalize_payload(&json!({"issued_at": "2026-02-01 06:00", "daily": []})).unwrap();
        assert!(payload.daily.is_empty());
    }

    #[test]
    fn hourly_maps_provider_names() {
        let raw = json!({
            "issued_at": "2026-02-01T06:00:00Z",
            "daily": [],
            "hourly": {
                "time": ["2026-02-01T06:00", "bogus", "2026-02-01T08:00"],
                "temperature_2m": [20.0, 21.0, null],
                "relative_humidity_2m": [80, 81, 82],
                "precip_prob_pct": [10, 20, 30]
            }
        });
        let payload = normalize_payload(&raw).unwrap();
        assert_eq!(payload.hourly.len(), 2);
        assert_eq!(
            format_timestamp(payload.hourly[0].valid_time),
            "2026-02-01T06:00:00Z"
        );
        assert_eq!(payload.hourly[0].temperature_f, Some(20.0));
        assert_eq!(payload.hourly[0].extras.humidity_pct, Some(80.0));
        assert_eq!(payload.hourly[1].temperature_f, None);
        assert_eq!(payload.hourly[1].extras.precip_prob_pct, Some(30.0));
        assert_eq!(payload.hourly[1].extras.wind_dir_deg, None);
    }

    #[test]
    fn hourly_shape_mismatch_drops_series_only() {
        let raw = json!({
            "issued_at": "2026-02-01T06:00:00Z",
            "daily": [{"target_date": "2026-02-01", "high": 30.0}],
            "hourly": {
                "time": ["2026-02-01T06:00", "2026-02-01T07:00"],
                "temperature_2m": [20.0]
            }
        });
        let payload = normalize_payload(&raw).unwrap();
        assert!(payload.hourly.is_empty());
        assert_eq!(payload.daily.len(), 1);

        let no_time = json!({
            "issued_at": "2026-02-01T06:00:00Z",
            "daily": [],
            "hourly": {"temperature_2m": [20.0]}
        });
        assert!(normalize_payload(&no_time).unwrap().hourly.is_empty());
    }
}
