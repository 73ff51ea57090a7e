use async_trait::async_trait;
use scoreboard::{
    normalize::coerce_f64,
    timestamps::{format_timestamp, parse_timestamp},
};
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};
use time::OffsetDateTime;

use super::{date_prefix, FetchError, ProviderAdapter, ProviderParams};
use crate::{JsonFetcher, StationConfig};

pub const NWS_API_URL: &str = "https://api.weather.gov";
pub const GEO_JSON: &str = "application/geo+json";

/// National Weather Service gridpoint forecast (12-hour periods).
pub struct Nws {
    fetcher: Arc<JsonFetcher>,
}

impl Nws {
    pub fn new(fetcher: Arc<JsonFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ProviderAdapter for Nws {
    async fn fetch(
        &self,
        station: &StationConfig,
        _params: &ProviderParams,
    ) -> Result<Value, FetchError> {
        let points_url = format!(
            "{}/points/{:.4},{:.4}",
            NWS_API_URL, station.latitude, station.longitude
        );
        let points = self.fetcher.get_json(&points_url, &[], GEO_JSON).await?;
        let forecast_url = points
            .pointer("/properties/forecast")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                FetchError::Fatal(format!("points response for {} has no forecast url", station.station_id))
            })?;

        let forecast = self.fetcher.get_json(forecast_url, &[], GEO_JSON).await?;
        parse_nws_forecast(&forecast, OffsetDateTime::now_utc())
    }
}

/// Periods are grouped by the local date of their start time; each date's
/// high/low is the max/min over its periods. `issued_at` is the forecast's
/// `updateTime` when present, so refetching an unchanged forecast lands in
/// the same run.
pub fn parse_nws_forecast(body: &Value, fetched_at: OffsetDateTime) -> Result<Value, FetchError> {
    let periods = body
        .pointer("/properties/periods")
        .and_then(Value::as_array)
        .filter(|periods| !periods.is_empty())
        .ok_or_else(|| FetchError::NoData("nws forecast returned no periods".into()))?;

    let mut by_day: BTreeMap<&str, (f64, f64)> = BTreeMap::new();
    for period in periods {
        let Some(day) = period
            .get("startTime")
            .and_then(Value::as_str)
            .and_then(date_prefix)
        else {
            continue;
        };
        let Some(temp) = period.get("temperature").and_then(coerce_f64) else {
            continue;
        };
        let temp = match period.get("temperatureUnit").and_then(Value::as_str) {
            Some("C") => temp * 9.0 / 5.0 + 32.0,
            _ => temp,
        };
        let entry = by_day.entry(day).or_insert((temp, temp));
        entry.0 = entry.0.max(temp);
        entry.1 = entry.1.min(temp);
    }

    let issued_at = ["/properties/updateTime", "/properties/updated", "/properties/generatedAt"]
        .iter()
        .find_map(|ptr| body.pointer(ptr).and_then(Value::as_str).and_then(parse_timestamp))
        .unwrap_or(fetched_at);

    let daily: Vec<Value> = by_day
        .into_iter()
        .map(|(day, (high, low))| json!({"target_date": day, "high": high, "low": low}))
        .collect();

    Ok(json!({
        "issued_at": format_timestamp(issued_at),
        "daily": daily,
    }))
}
