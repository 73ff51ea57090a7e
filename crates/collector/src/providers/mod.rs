mod nws;
mod open_meteo;
mod registry;
mod weatherapi;

pub use nws::*;
pub use open_meteo::*;
pub use registry::*;
pub use weatherapi::*;

use async_trait::async_trait;
use std::{collections::BTreeMap, time::Duration};

use crate::StationConfig;

/// Free-form `params` table of a provider entry.
pub type ProviderParams = BTreeMap<String, serde_json::Value>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("transient failure: {0}")]
    Transient(String),
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },
    #[error("{0}")]
    Fatal(String),
    #[error("no usable data: {0}")]
    NoData(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_) | FetchError::RateLimited { .. })
    }
}

/// A forecast provider. Returns the raw payload the normalizer understands:
/// `{issued_at, daily: [...], hourly?: {...}}`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    async fn fetch(
        &self,
        station: &StationConfig,
        params: &ProviderParams,
    ) -> Result<serde_json::Value, FetchError>;
}

pub(crate) fn param_str<'a>(params: &'a ProviderParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

pub(crate) fn param_i64(params: &ProviderParams, key: &str) -> Option<i64> {
    params.get(key).and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

/// First ten characters of a timestamp-ish string, i.e. its calendar date.
pub(crate) fn date_prefix(raw: &str) -> Option<&str> {
    raw.get(..10).filter(|d| d.as_bytes().get(4) == Some(&b'-'))
}
