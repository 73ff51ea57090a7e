use async_trait::async_trait;
use scoreboard::{
    normalize::coerce_f64,
    timestamps::{format_date, format_timestamp, parse_timestamp, truncate_to_hour},
};
use serde_json::{json, Map, Value};
use std::{collections::BTreeMap, sync::Arc};
use time::{Duration, OffsetDateTime};

use super::{date_prefix, param_i64, param_str, FetchError, ProviderAdapter, ProviderParams};
use crate::{JsonFetcher, StationConfig};

const OPEN_METEO_URL: &str = "https://api.open-meteo.com/v1/forecast";

const HOURLY_VARIABLES: &str = "temperature_2m,dew_point_2m,relative_humidity_2m,wind_speed_10m,wind_direction_10m,cloud_cover,precipitation_probability";

/// Open-Meteo forecast endpoint. One provider entry per model, selected with
/// `params.model` (e.g. `gfs_seamless`, `ecmwf_ifs025`); without it the
/// blended "best match" forecast is returned.
pub struct OpenMeteo {
    fetcher: Arc<JsonFetcher>,
}

impl OpenMeteo {
    pub fn new(fetcher: Arc<JsonFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProviderAdapter for OpenMeteo {
    async fn fetch(
        &self,
        station: &StationConfig,
        params: &ProviderParams,
    ) -> Result<Value, FetchError> {
        let now = OffsetDateTime::now_utc();
        let start = now.date();
        let end = start + Duration::days(days_ahead(params));

        let mut query = vec![
            ("latitude", station.latitude.to_string()),
            ("longitude", station.longitude.to_string()),
            ("timezone", "UTC".to_string()),
            ("start_date", format_date(start)),
            ("end_date", format_date(end)),
            ("temperature_unit", "fahrenheit".to_string()),
            ("wind_speed_unit", "mph".to_string()),
            ("daily", "temperature_2m_max,temperature_2m_min".to_string()),
            ("hourly", HOURLY_VARIABLES.to_string()),
        ];
        if let Some(model) = param_str(params, "model").or_else(|| param_str(params, "models")) {
            query.push(("models", model.to_string()));
        }

        let body = self
            .fetcher
            .get_json(OPEN_METEO_URL, &query, "application/json")
            .await?;
        parse_open_meteo(&body, truncate_to_hour(now))
    }
}

/// `params.days_ahead`, default 3, clamped to 1..=7.
fn days_ahead(params: &ProviderParams) -> i64 {
    param_i64(params, "days_ahead").unwrap_or(3).clamp(1, 7)
}

/// Open-Meteo publishes no run time, so `issued_at` is the fetch hour.
pub fn parse_open_meteo(body: &Value, issued_at: OffsetDateTime) -> Result<Value, FetchError> {
    if body.get("error").and_then(Value::as_bool) == Some(true) {
        let reason = body
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        return Err(FetchError::Fatal(format!("open-meteo error: {}", reason)));
    }

    let mut daily = daily_rows(body);
    let hourly = body.get("hourly").and_then(Value::as_object);
    if daily.is_empty() {
        if let Some(hourly) = hourly {
            daily = daily_from_hourly(hourly);
        }
    }
    if daily.is_empty() {
        return Err(FetchError::NoData("open-meteo returned no daily values".into()));
    }

    let mut payload = json!({
        "issued_at": format_timestamp(issued_at),
        "daily": daily,
    });
    if let Some(hourly) = hourly.and_then(utc_hourly) {
        payload["hourly"] = Value::Object(hourly);
    }
    Ok(payload)
}

fn column<'a>(object: &'a Value, key: &str) -> &'a [Value] {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn daily_rows(body: &Value) -> Vec<Value> {
    let Some(daily) = body.get("daily") else {
        return Vec::new();
    };
    let dates = column(daily, "time");
    let highs = column(daily, "temperature_2m_max");
    let lows = column(daily, "temperature_2m_min");

    dates
        .iter()
        .zip(highs)
        .zip(lows)
        .filter_map(|((date, high), low)| {
            let date = date_prefix(date.as_str()?)?;
            let (high, low) = (coerce_f64(high)?, coerce_f64(low)?);
            Some(json!({"target_date": date, "high_f": high, "low_f": low}))
        })
        .collect()
}

fn daily_from_hourly(hourly: &Map<String, Value>) -> Vec<Value> {
    let times = hourly.get("time").and_then(Value::as_array);
    let temps = hourly.get("temperature_2m").and_then(Value::as_array);
    let (Some(times), Some(temps)) = (times, temps) else {
        return Vec::new();
    };

    let mut by_day: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for (time, temp) in times.iter().zip(temps) {
        let (Some(day), Some(temp)) = (time.as_str().and_then(date_prefix), coerce_f64(temp)) else {
            continue;
        };
        let entry = by_day.entry(day).or_insert((temp, temp));
        entry.0 = entry.0.max(temp);
        entry.1 = entry.1.min(temp);
    }

    by_day
        .into_iter()
        .map(|(day, (high, low))| json!({"target_date": day, "high_f": high, "low_f": low}))
        .collect()
}

/// Hourly times come back as `YYYY-MM-DDTHH:MM` in UTC; give them an explicit
/// zone. One unreadable time drops the whole series, since the columns are
/// aligned by index.
fn utc_hourly(hourly: &Map<String, Value>) -> Option<Map<String, Value>> {
    let times = hourly.get("time")?.as_array()?;
    if times.is_empty() {
        return None;
    }
    let utc_times = times
        .iter()
        .map(|t| {
            let raw = t.as_str()?;
            parse_timestamp(raw).map(|ts| Value::String(format_timestamp(ts)))
        })
        .collect::<Option<Vec<_>>>()?;

    let mut out = hourly.clone();
    out.insert("time".into(), Value::Array(utc_times));
    Some(out)
}
