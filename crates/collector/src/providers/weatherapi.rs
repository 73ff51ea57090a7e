use async_trait::async_trait;
use scoreboard::{
    normalize::coerce_f64,
    timestamps::{format_timestamp, truncate_to_hour},
};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use time::OffsetDateTime;

use super::{date_prefix, param_i64, FetchError, ProviderAdapter, ProviderParams};
use crate::{JsonFetcher, StationConfig};

const WEATHERAPI_URL: &str = "https://api.weatherapi.com/v1/forecast.json";
pub const WEATHERAPI_KEY_ENV: &str = "WEATHERAPI_KEY";

/// WeatherAPI.com daily forecast. Needs an API key, read from the environment
/// when the registry is built.
pub struct WeatherApi {
    fetcher: Arc<JsonFetcher>,
    api_key: String,
}

impl WeatherApi {
    pub fn new(fetcher: Arc<JsonFetcher>, api_key: String) -> Self {
        Self { fetcher, api_key }
    }
}

#[async_trait]
impl ProviderAdapter for WeatherApi {
    async fn fetch(
        &self,
        station: &StationConfig,
        params: &ProviderParams,
    ) -> Result<Value, FetchError> {
        let days = param_i64(params, "days").unwrap_or(3).max(1);
        let query = [
            ("key", self.api_key.clone()),
            ("q", format!("{},{}", station.latitude, station.longitude)),
            ("days", days.to_string()),
            ("aqi", "no".to_string()),
            ("alerts", "no".to_string()),
        ];

        let body = self
            .fetcher
            .get_json(WEATHERAPI_URL, &query, "application/json")
            .await?;
        parse_weatherapi(&body, OffsetDateTime::now_utc())
    }
}

/// WeatherAPI publishes no issuance time (its timestamps are local wall
/// times), so the run is keyed on the hour of the fetch. Refetches within
/// that hour land in the same run.
pub fn parse_weatherapi(body: &Value, fetched_at: OffsetDateTime) -> Result<Value, FetchError> {
    if let Some(message) = body.pointer("/error/message").and_then(Value::as_str) {
        return Err(FetchError::Fatal(format!("weatherapi error: {}", message)));
    }

    let days = body
        .pointer("/forecast/forecastday")
        .and_then(Value::as_array)
        .filter(|days| !days.is_empty())
        .ok_or_else(|| FetchError::NoData("weatherapi returned no forecast days".into()))?;

    let daily: Vec<Value> = days
        .iter()
        .filter_map(|day| {
            let target_date = day.get("date").and_then(Value::as_str).and_then(date_prefix)?;
            let stats = day.get("day")?;
            let high = stats.get("maxtemp_f").and_then(coerce_f64)?;
            let low = stats.get("mintemp_f").and_then(coerce_f64)?;

            let mut extras = Map::new();
            for (from, to) in [
                ("avghumidity", "humidity_pct"),
                ("maxwind_mph", "wind_speed_mph"),
                ("daily_chance_of_rain", "precip_prob_pct"),
            ] {
                if let Some(value) = stats.get(from).and_then(coerce_f64) {
                    extras.insert(to.to_string(), json!(value));
                }
            }

            Some(json!({
                "target_date": target_date,
                "high": high,
                "low": low,
                "extras": extras,
            }))
        })
        .collect();

    Ok(json!({
        "issued_at": format_timestamp(truncate_to_hour(fetched_at)),
        "daily": daily,
    }))
}
