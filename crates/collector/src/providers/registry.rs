use scoreboard::parse_timezone;
use std::{collections::BTreeMap, env, sync::Arc};
use tokio::sync::Semaphore;

use super::{Nws, OpenMeteo, ProviderAdapter, ProviderParams, WeatherApi, WEATHERAPI_KEY_ENV};
use crate::{JsonFetcher, ProviderConfig, RetryPolicy, StationConfig};

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("provider {source_id}: unknown kind {kind:?}")]
    UnknownKind { source_id: String, kind: String },
    #[error("provider {source_id}: environment variable {var} is not set")]
    MissingCredential { source_id: String, var: String },
    #[error("station {station_id}: unknown timezone {timezone:?}")]
    UnknownTimezone {
        station_id: String,
        timezone: String,
    },
}

/// One configured source: the adapter plus everything the executor needs to
/// call it politely.
#[derive(Clone)]
pub struct ProviderEntry {
    pub source: String,
    pub adapter: Arc<dyn ProviderAdapter>,
    pub params: ProviderParams,
    pub in_flight: Arc<Semaphore>,
    pub retry: RetryPolicy,
}

impl ProviderEntry {
    pub fn new(
        source: impl Into<String>,
        adapter: Arc<dyn ProviderAdapter>,
        params: ProviderParams,
        max_in_flight: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            source: source.into(),
            adapter,
            params,
            in_flight: Arc::new(Semaphore::new(max_in_flight.max(1))),
            retry,
        }
    }
}

/// Enabled providers, built once at start. Disabled entries are left out
/// silently; broken ones are reported and left out.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    entries: Vec<ProviderEntry>,
}

impl ProviderRegistry {
    pub fn from_entries(entries: Vec<ProviderEntry>) -> Self {
        Self { entries }
    }

    pub fn from_config(
        providers: &BTreeMap<String, ProviderConfig>,
        fetcher: Arc<JsonFetcher>,
    ) -> (Self, Vec<ConfigError>) {
        Self::from_config_with_env(providers, fetcher, |var| env::var(var).ok())
    }

    pub fn from_config_with_env<F>(
        providers: &BTreeMap<String, ProviderConfig>,
        fetcher: Arc<JsonFetcher>,
        lookup_env: F,
    ) -> (Self, Vec<ConfigError>)
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut entries = Vec::new();
        let mut errors = Vec::new();

        for (source_id, config) in providers.iter().filter(|(_, c)| c.enabled) {
            match build_adapter(source_id, config, fetcher.clone(), &lookup_env) {
                Ok(adapter) => entries.push(ProviderEntry::new(
                    source_id.clone(),
                    adapter,
                    config.params.clone(),
                    config.max_in_flight,
                    RetryPolicy::new(config.max_attempts),
                )),
                Err(err) => errors.push(err),
            }
        }

        (Self { entries }, errors)
    }

    pub fn entries(&self) -> &[ProviderEntry] {
        &self.entries
    }

    pub fn sources(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.source.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn build_adapter<F>(
    source_id: &str,
    config: &ProviderConfig,
    fetcher: Arc<JsonFetcher>,
    lookup_env: &F,
) -> Result<Arc<dyn ProviderAdapter>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match config.kind.trim().to_lowercase().as_str() {
        "open_meteo" | "open-meteo" => Ok(Arc::new(OpenMeteo::new(fetcher))),
        "nws" => Ok(Arc::new(Nws::new(fetcher))),
        "weatherapi" => {
            let var = config
                .api_key_env
                .clone()
                .unwrap_or_else(|| WEATHERAPI_KEY_ENV.to_string());
            let api_key = lookup_env(&var)
                .filter(|key| !key.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingCredential {
                    source_id: source_id.to_string(),
                    var,
                })?;
            Ok(Arc::new(WeatherApi::new(fetcher, api_key)))
        }
        other => Err(ConfigError::UnknownKind {
            source_id: source_id.to_string(),
            kind: other.to_string(),
        }),
    }
}

/// Active stations whose timezone resolves; the rest are reported.
pub fn valid_stations(stations: &[StationConfig]) -> (Vec<StationConfig>, Vec<ConfigError>) {
    let mut valid = Vec::new();
    let mut errors = Vec::new();
    for station in stations.iter().filter(|s| s.is_active) {
        match parse_timezone(&station.timezone) {
            Ok(_) => valid.push(station.clone()),
            Err(_) => errors.push(ConfigError::UnknownTimezone {
                station_id: station.station_id.clone(),
                timezone: station.timezone.clone(),
            }),
        }
    }
    (valid, errors)
}
