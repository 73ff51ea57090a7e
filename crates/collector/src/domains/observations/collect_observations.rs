use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use scoreboard::{
    local_day_bounds,
    normalize::coerce_f64,
    timestamps::{format_timestamp, parse_timestamp},
    Database, ObservationInput, ObservationMode, ObservationOutcome, SOURCE_NWS_CLI,
    SOURCE_NWS_OBS_FALLBACK,
};
use serde::Serialize;
use serde_json::Value;
use slog::{error, info, warn, Logger};
use std::sync::Arc;
use time::{Date, Duration, OffsetDateTime};
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{run_with_retry, FetchError, JsonFetcher, RetryPolicy, StationConfig, GEO_JSON, NWS_API_URL};

const LD_JSON: &str = "application/ld+json";
const MAX_CLI_PRODUCTS: usize = 6;

/// Observed extremes for one station and date.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservedDay {
    pub observed_high: f64,
    pub observed_low: f64,
    pub issued_at: Option<OffsetDateTime>,
    pub raw_text: Option<String>,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Identifier stored with the observation, which also fixes its authority.
    fn source_id(&self) -> &'static str;

    async fn observe(&self, station: &StationConfig, date: Date) -> Result<ObservedDay, FetchError>;
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Climate report site for a station: ICAO `KXXX` reports as `XXX`.
pub fn climate_site(station_id: &str) -> &str {
    match station_id.strip_prefix('K') {
        Some(site) if station_id.len() == 4 => site,
        _ => station_id,
    }
}

/// Reads max/min temperature out of an NWS Daily Climate Report (CLI).
pub struct ClimateReportParser {
    summary_date: Regex,
    maximum: Vec<Regex>,
    minimum: Vec<Regex>,
}

impl ClimateReportParser {
    pub fn new() -> Result<Self, regex::Error> {
        let value = r"(-?\d+(?:\.\d+)?)";
        Ok(Self {
            summary_date: Regex::new(r"(?i)CLIMATE SUMMARY FOR\s+([A-Z]+)\s+(\d{1,2})\s+(\d{4})")?,
            maximum: vec![
                // column layout: `  MAXIMUM         30    356 PM ...`
                Regex::new(&format!(
                    r"(?im)^\s*MAXIMUM(?:\s+TEMPERATURE)?(?:\s*:\s*|\s+-\s+|\s+){value}"
                ))?,
                Regex::new(&format!(r"(?i)MAX(?:IMUM)?\s+TEMP(?:ERATURE)?\s*[:\-]\s*{value}"))?,
                Regex::new(&format!(r"(?i)HIGH(?:\s+TEMPERATURE)?\s*[:\-]\s*{value}"))?,
            ],
            minimum: vec![
                Regex::new(&format!(
                    r"(?im)^\s*MINIMUM(?:\s+TEMPERATURE)?(?:\s*:\s*|\s+-\s+|\s+){value}"
                ))?,
                Regex::new(&format!(r"(?i)MIN(?:IMUM)?\s+TEMP(?:ERATURE)?\s*[:\-]\s*{value}"))?,
                Regex::new(&format!(r"(?i)LOW(?:\s+TEMPERATURE)?\s*[:\-]\s*{value}"))?,
            ],
        })
    }

    /// `(high, low)` in °F rounded to 0.1, or `None` when the report is for
    /// another date or either value is missing.
    pub fn parse(&self, text: &str, date: Date) -> Option<(f64, f64)> {
        if let Some(caps) = self.summary_date.captures(text) {
            let month = caps[1].to_uppercase();
            let day: u8 = caps[2].parse().ok()?;
            let year: i32 = caps[3].parse().ok()?;
            let target_month = date.month().to_string().to_uppercase();
            if month != target_month || day != date.day() || year != date.year() {
                return None;
            }
        }

        let first = |patterns: &[Regex]| {
            patterns.iter().find_map(|re| {
                re.captures(text)
                    .and_then(|caps| caps[1].parse::<f64>().ok())
            })
        };
        let high = first(&self.maximum)?;
        let low = first(&self.minimum)?;
        Some((round_tenth(high), round_tenth(low)))
    }
}

/// The official Daily Climate Report, newest product first.
pub struct NwsClimateReport {
    fetcher: Arc<JsonFetcher>,
    parser: ClimateReportParser,
}

impl NwsClimateReport {
    pub fn new(fetcher: Arc<JsonFetcher>) -> Result<Self, regex::Error> {
        Ok(Self {
            fetcher,
            parser: ClimateReportParser::new()?,
        })
    }
}

#[async_trait]
impl ObservationSource for NwsClimateReport {
    fn source_id(&self) -> &'static str {
        SOURCE_NWS_CLI
    }

    async fn observe(&self, station: &StationConfig, date: Date) -> Result<ObservedDay, FetchError> {
        let site = climate_site(&station.station_id);
        let listing_url = format!("{}/products/types/CLI/locations/{}", NWS_API_URL, site);
        let listing = self
            .fetcher
            .get_json(&listing_url, &[("limit", "25".to_string())], LD_JSON)
            .await?;

        let products = product_urls(&listing);
        if products.is_empty() {
            return Err(FetchError::NoData(format!("no CLI products for {}", site)));
        }

        for url in products.iter().take(MAX_CLI_PRODUCTS) {
            let product = self.fetcher.get_json(url, &[], LD_JSON).await?;
            let Some(text) = product.get("productText").and_then(Value::as_str) else {
                continue;
            };
            if let Some((high, low)) = self.parser.parse(text, date) {
                return Ok(ObservedDay {
                    observed_high: high,
                    observed_low: low,
                    issued_at: product
                        .get("issuanceTime")
                        .and_then(Value::as_str)
                        .and_then(parse_timestamp),
                    raw_text: Some(text.to_string()),
                });
            }
        }

        Err(FetchError::NoData(format!(
            "no CLI product for {} covers {}",
            site, date
        )))
    }
}

fn product_urls(listing: &Value) -> Vec<String> {
    let items = listing
        .get("@graph")
        .or_else(|| listing.get("items"))
        .and_then(Value::as_array);
    items
        .into_iter()
        .flatten()
        .filter_map(|item| {
            let id = item
                .get("@id")
                .or_else(|| item.get("id"))
                .and_then(Value::as_str)?
                .trim();
            match id {
                "" => None,
                url if url.starts_with("http") => Some(url.to_string()),
                id => Some(format!("{}/products/{}", NWS_API_URL, id)),
            }
        })
        .collect()
}

/// Max/min of the station's raw observations over its local calendar day.
pub struct NwsStationObservations {
    fetcher: Arc<JsonFetcher>,
}

impl NwsStationObservations {
    pub fn new(fetcher: Arc<JsonFetcher>) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl ObservationSource for NwsStationObservations {
    fn source_id(&self) -> &'static str {
        SOURCE_NWS_OBS_FALLBACK
    }

    async fn observe(&self, station: &StationConfig, date: Date) -> Result<ObservedDay, FetchError> {
        let (start, end) = local_day_bounds(&station.timezone, date)
            .map_err(|e| FetchError::Fatal(e.to_string()))?;
        let url = format!("{}/stations/{}/observations", NWS_API_URL, station.station_id);
        let query = [
            ("start", format_timestamp(start)),
            ("end", format_timestamp(end - Duration::seconds(1))),
            ("limit", "500".to_string()),
        ];
        let body = self.fetcher.get_json(&url, &query, GEO_JSON).await?;

        let (high, low) = station_extremes_f(&body).ok_or_else(|| {
            FetchError::NoData(format!("no temperatures for {} on {}", station.station_id, date))
        })?;
        Ok(ObservedDay {
            observed_high: high,
            observed_low: low,
            issued_at: None,
            raw_text: None,
        })
    }
}

/// Temperatures come in °C unless the unit code says otherwise.
pub fn station_extremes_f(body: &Value) -> Option<(f64, f64)> {
    let features = body.get("features")?.as_array()?;
    let temps: Vec<f64> = features
        .iter()
        .filter_map(|feature| {
            let temp = feature.pointer("/properties/temperature")?;
            let value = temp.get("value").and_then(coerce_f64)?;
            let unit = temp.get("unitCode").and_then(Value::as_str).unwrap_or("wmoUnit:degC");
            Some(if unit.ends_with("degF") {
                value
            } else {
                value * 9.0 / 5.0 + 32.0
            })
        })
        .collect();

    let high = temps.iter().copied().reduce(f64::max)?;
    let low = temps.iter().copied().reduce(f64::min)?;
    Some((round_tenth(high), round_tenth(low)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ObservationTally {
    pub recorded: usize,
    pub retained: usize,
    pub from_fallback: usize,
    pub failed: usize,
}

pub struct ObservationService {
    logger: Logger,
    db: Database,
    primary: Arc<dyn ObservationSource>,
    fallback: Arc<dyn ObservationSource>,
    mode: ObservationMode,
    retry: RetryPolicy,
    max_workers: usize,
}

impl ObservationService {
    pub fn new(
        logger: Logger,
        db: Database,
        primary: Arc<dyn ObservationSource>,
        fallback: Arc<dyn ObservationSource>,
        mode: ObservationMode,
        retry: RetryPolicy,
        max_workers: usize,
    ) -> Self {
        ObservationService {
            logger,
            db,
            primary,
            fallback,
            mode,
            retry,
            max_workers: max_workers.max(1),
        }
    }

    /// Observe every station for `date`, official report first, and record
    /// the results through the reconciler.
    pub async fn collect(
        &self,
        stations: &[StationConfig],
        date: Date,
    ) -> anyhow::Result<ObservationTally> {
        for station in stations {
            self.db
                .upsert_station(station.into())
                .await
                .with_context(|| format!("failed to upsert station {}", station.station_id))?;
        }

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();
        for station in stations {
            let workers = workers.clone();
            let station = station.clone();
            let sources = [self.primary.clone(), self.fallback.clone()];
            let retry = self.retry.clone();
            let logger = self.logger.clone();
            set.spawn(async move {
                let _worker = workers.acquire_owned().await;
                let fetched_at = OffsetDateTime::now_utc();
                let observed = observe_station(&logger, &sources, &retry, &station, date).await;
                (station.station_id, fetched_at, observed)
            });
        }

        let mut tally = ObservationTally::default();
        while let Some(joined) = set.join_next().await {
            let (station_id, fetched_at, observed) = match joined {
                Ok(result) => result,
                Err(err) => {
                    error!(self.logger, "observation task panicked: {}", err);
                    tally.failed += 1;
                    continue;
                }
            };
            let Some((source, day)) = observed else {
                tally.failed += 1;
                continue;
            };
            if source == SOURCE_NWS_OBS_FALLBACK {
                tally.from_fallback += 1;
            }

            let input = ObservationInput {
                station_id: station_id.clone(),
                date,
                source: source.to_string(),
                observed_high: Some(day.observed_high),
                observed_low: Some(day.observed_low),
                issued_at: day.issued_at,
                raw_text: day.raw_text,
                fetched_at,
            };
            let outcome = self
                .db
                .upsert_observation(self.mode, input)
                .await
                .with_context(|| format!("failed to record observation for {}", station_id))?;
            match outcome {
                ObservationOutcome::Retained => {
                    info!(
                        self.logger,
                        "{} {}: kept more authoritative stored observation", station_id, date
                    );
                    tally.retained += 1;
                }
                _ => {
                    info!(
                        self.logger,
                        "{} {}: high={} low={} ({})",
                        station_id,
                        date,
                        day.observed_high,
                        day.observed_low,
                        source
                    );
                    tally.recorded += 1;
                }
            }
        }

        info!(
            self.logger,
            "observation pass for {} done: recorded={} retained={} fallback={} failed={}",
            date,
            tally.recorded,
            tally.retained,
            tally.from_fallback,
            tally.failed
        );
        Ok(tally)
    }
}

/// First source that yields a value wins.
async fn observe_station(
    logger: &Logger,
    sources: &[Arc<dyn ObservationSource>],
    retry: &RetryPolicy,
    station: &StationConfig,
    date: Date,
) -> Option<(&'static str, ObservedDay)> {
    for source in sources {
        let label = format!("{} {}", station.station_id, source.source_id());
        let (result, _) =
            run_with_retry(retry, logger, &label, move || async move {
                source.observe(station, date).await
            })
            .await;
        match result {
            Ok(day) => return Some((source.source_id(), day)),
            Err(err) => warn!(logger, "{} {}: {}", label, date, err),
        }
    }
    error!(logger, "{} {}: no observation from any source", station.station_id, date);
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use slog::{o, Discard};
    use time::macros::{date, datetime};

    const CLI_TEXT: &str = "\
000
CDUS43 KLOT 020629
CLIMDW

CLIMATE REPORT
NATIONAL WEATHER SERVICE CHICAGO/ROMEOVILLE, IL
1229 AM CST MON FEB 2 2026

...................................

...THE CHICAGO MIDWAY CLIMATE SUMMARY FOR FEBRUARY 1 2026...

CLIMATE NORMAL PERIOD 1991 TO 2020

WEATHER ITEM   OBSERVED TIME   RECORD YEAR NORMAL DEPARTURE LAST
                VALUE   (LST)  VALUE       VALUE  FROM      YEAR
...................................................................
TEMPERATURE (F)
 YESTERDAY
  MAXIMUM         29    257 PM  62    1989  33     -4       41
  MINIMUM         17    658 AM -12    1951  19     -2       25
  AVERAGE         23                        26     -3       33
";

    fn parser() -> ClimateReportParser {
        ClimateReportParser::new().unwrap()
    }

    #[test]
    fn parses_columnar_climate_report() {
        assert_eq!(parser().parse(CLI_TEXT, date!(2026 - 02 - 01)), Some((29.0, 17.0)));
    }

    #[test]
    fn rejects_report_for_another_date() {
        assert_eq!(parser().parse(CLI_TEXT, date!(2026 - 02 - 02)), None);
    }

    #[test]
    fn parses_separator_forms_and_negatives() {
        let text = "MAXIMUM TEMPERATURE: 12.46\nMINIMUM -4\n";
        assert_eq!(parser().parse(text, date!(2026 - 02 - 01)), Some((12.5, -4.0)));

        let text = "HIGH - 30\nLOW: 18\n";
        assert_eq!(parser().parse(text, date!(2026 - 02 - 01)), Some((30.0, 18.0)));
    }

    #[test]
    fn missing_values_do_not_parse() {
        let text = "TEMPERATURE (F)\n  MAXIMUM         MM\n  MINIMUM         17\n";
        assert_eq!(parser().parse(text, date!(2026 - 02 - 01)), None);
    }

    #[test]
    fn climate_site_strips_icao_prefix() {
        assert_eq!(climate_site("KMDW"), "MDW");
        assert_eq!(climate_site("PHNL"), "PHNL");
        assert_eq!(climate_site("KJFKX"), "KJFKX");
    }

    #[test]
    fn product_listing_yields_urls() {
        let listing = json!({"@graph": [
            {"@id": "https://api.weather.gov/products/abc", "id": "abc"},
            {"id": "def"},
            {"id": ""}
        ]});
        assert_eq!(
            product_urls(&listing),
            vec![
                "https://api.weather.gov/products/abc".to_string(),
                format!("{}/products/def", NWS_API_URL),
            ]
        );
    }

    #[test]
    fn station_observations_convert_and_round() {
        let body = json!({"features": [
            {"properties": {"temperature": {"unitCode": "wmoUnit:degC", "value": -1.7}}},
            {"properties": {"temperature": {"unitCode": "wmoUnit:degC", "value": null}}},
            {"properties": {"temperature": {"unitCode": "wmoUnit:degC", "value": -8.3}}},
            {"properties": {"temperature": {"value": -5.0}}}
        ]});
        // -1.7C = 28.94F, -8.3C = 17.06F
        assert_eq!(station_extremes_f(&body), Some((28.9, 17.1)));
        assert_eq!(station_extremes_f(&json!({"features": []})), None);
    }

    fn station(id: &str) -> StationConfig {
        StationConfig {
            station_id: id.to_string(),
            name: None,
            latitude: 41.78,
            longitude: -87.75,
            timezone: "America/Chicago".to_string(),
            state: None,
            elevation_ft: None,
            is_active: true,
        }
    }

    fn day(high: f64, low: f64) -> ObservedDay {
        ObservedDay {
            observed_high: high,
            observed_low: low,
            issued_at: Some(datetime!(2026-02-02 06:29 UTC)),
            raw_text: None,
        }
    }

    #[tokio::test]
    async fn falls_back_per_station_and_tallies() {
        let mut cli = MockObservationSource::new();
        cli.expect_source_id().return_const(SOURCE_NWS_CLI);
        cli.expect_observe().returning(|station, _| match station.station_id.as_str() {
            "KMDW" => Ok(day(29.4, 17.1)),
            _ => Err(FetchError::NoData("no CLI".into())),
        });

        let mut obs = MockObservationSource::new();
        obs.expect_source_id().return_const(SOURCE_NWS_OBS_FALLBACK);
        obs.expect_observe().returning(|station, _| match station.station_id.as_str() {
            "KORD" => Ok(day(30.0, 16.0)),
            _ => Err(FetchError::Fatal("404 Not Found".into())),
        });

        let db = Database::in_memory().await.unwrap();
        let service = ObservationService::new(
            Logger::root(Discard, o!()),
            db.clone(),
            Arc::new(cli),
            Arc::new(obs),
            ObservationMode::Snapshot,
            RetryPolicy::immediate(2),
            4,
        );

        let tally = service
            .collect(
                &[station("KMDW"), station("KORD"), station("KBAD")],
                date!(2026 - 02 - 01),
            )
            .await
            .unwrap();
        assert_eq!(
            tally,
            ObservationTally {
                recorded: 2,
                retained: 0,
                from_fallback: 1,
                failed: 1,
            }
        );

        let scored = db
            .scoring_observations(ObservationMode::Snapshot, date!(2026 - 02 - 01))
            .await
            .unwrap();
        assert_eq!(scored.len(), 2);
        let midway = scored.iter().find(|o| o.station_id == "KMDW").unwrap();
        assert_eq!(midway.source, SOURCE_NWS_CLI);
        assert_eq!(midway.observed_high, Some(29.4));
    }

    #[tokio::test]
    async fn latest_wins_keeps_official_value() {
        let db = Database::in_memory().await.unwrap();

        let mut cli = MockObservationSource::new();
        cli.expect_source_id().return_const(SOURCE_NWS_CLI);
        cli.expect_observe().returning(|_, _| Ok(day(29.4, 17.1)));
        let mut unused = MockObservationSource::new();
        unused.expect_source_id().return_const(SOURCE_NWS_OBS_FALLBACK);

        let official = ObservationService::new(
            Logger::root(Discard, o!()),
            db.clone(),
            Arc::new(cli),
            Arc::new(unused),
            ObservationMode::LatestWins,
            RetryPolicy::immediate(1),
            1,
        );
        official.collect(&[station("KMDW")], date!(2026 - 02 - 01)).await.unwrap();

        let mut no_cli = MockObservationSource::new();
        no_cli.expect_source_id().return_const(SOURCE_NWS_CLI);
        no_cli
            .expect_observe()
            .returning(|_, _| Err(FetchError::NoData("not yet issued".into())));
        let mut obs = MockObservationSource::new();
        obs.expect_source_id().return_const(SOURCE_NWS_OBS_FALLBACK);
        obs.expect_observe().returning(|_, _| Ok(day(31.0, 15.0)));

        let fallback_only = ObservationService::new(
            Logger::root(Discard, o!()),
            db.clone(),
            Arc::new(no_cli),
            Arc::new(obs),
            ObservationMode::LatestWins,
            RetryPolicy::immediate(1),
            1,
        );
        let tally = fallback_only
            .collect(&[station("KMDW")], date!(2026 - 02 - 01))
            .await
            .unwrap();
        assert_eq!(tally.retained, 1);
        assert_eq!(tally.from_fallback, 1);

        let scored = db
            .scoring_observations(ObservationMode::LatestWins, date!(2026 - 02 - 01))
            .await
            .unwrap();
        assert_eq!(scored[0].source, SOURCE_NWS_CLI);
        assert_eq!(scored[0].observed_high, Some(29.4));
    }
}
