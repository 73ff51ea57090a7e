use anyhow::Context;
use scoreboard::{normalize_payload, Database, ForecastBatchItem, LeadTimeAnchors};
use serde::Serialize;
use slog::{error, info, warn, Logger};
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::{sync::Semaphore, task::JoinSet};

use crate::{run_with_retry, FetchError, ProviderEntry, ProviderRegistry, StationConfig};

/// Outcome counts of one forecast collection pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CollectionTally {
    pub succeeded: usize,
    pub failed: usize,
    pub empty: usize,
    pub rows_written: u64,
}

enum TaskOutcome {
    Fetched(ForecastBatchItem),
    Empty { label: String, reason: String },
    Failed { label: String, reason: String },
}

pub struct ForecastService {
    logger: Logger,
    db: Database,
    registry: ProviderRegistry,
    anchors: LeadTimeAnchors,
    max_workers: usize,
}

impl ForecastService {
    pub fn new(
        logger: Logger,
        db: Database,
        registry: ProviderRegistry,
        anchors: LeadTimeAnchors,
        max_workers: usize,
    ) -> Self {
        ForecastService {
            logger,
            db,
            registry,
            anchors,
            max_workers: max_workers.max(1),
        }
    }

    /// Fetch every (station, provider) pair concurrently, then write all
    /// usable payloads in one batch. One pair failing never affects another.
    pub async fn collect(&self, stations: &[StationConfig]) -> anyhow::Result<CollectionTally> {
        for station in stations {
            self.db
                .upsert_station(station.into())
                .await
                .with_context(|| format!("failed to upsert station {}", station.station_id))?;
        }

        let workers = Arc::new(Semaphore::new(self.max_workers));
        let mut set = JoinSet::new();
        for station in stations {
            for entry in self.registry.entries() {
                let workers = workers.clone();
                let entry = entry.clone();
                let station = station.clone();
                let logger = self.logger.clone();
                set.spawn(async move {
                    let _worker = workers.acquire_owned().await;
                    fetch_one(&logger, &entry, &station).await
                });
            }
        }
        info!(
            self.logger,
            "fetching {} station/provider pairs with {} workers",
            set.len(),
            self.max_workers
        );

        let mut tally = CollectionTally::default();
        let mut items = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(TaskOutcome::Fetched(item)) => items.push(item),
                Ok(TaskOutcome::Empty { label, reason }) => {
                    warn!(self.logger, "{}: no rows ({})", label, reason);
                    tally.empty += 1;
                }
                Ok(TaskOutcome::Failed { label, reason }) => {
                    error!(self.logger, "{}: {}", label, reason);
                    tally.failed += 1;
                }
                Err(err) => {
                    error!(self.logger, "fetch task panicked: {}", err);
                    tally.failed += 1;
                }
            }
        }

        if !items.is_empty() {
            let summary = self
                .db
                .write_forecast_batch(items, self.anchors)
                .await
                .context("failed to write forecast batch")?;
            tally.succeeded = summary.items_written;
            tally.failed += summary.items_skipped;
            tally.rows_written = summary.values_written + summary.hourly_written;
            info!(
                self.logger,
                "wrote {} daily values, {} hourly rows, {} revisions",
                summary.values_written,
                summary.hourly_written,
                summary.revisions_written
            );
        }

        info!(
            self.logger,
            "forecast pass done: succeeded={} failed={} empty={} rows_written={}",
            tally.succeeded,
            tally.failed,
            tally.empty,
            tally.rows_written
        );
        Ok(tally)
    }
}

async fn fetch_one(logger: &Logger, entry: &ProviderEntry, station: &StationConfig) -> TaskOutcome {
    let label = format!("{} {}", station.station_id, entry.source);
    let fetched_at = OffsetDateTime::now_utc();

    // the provider permit covers one call, never a backoff sleep
    let (result, attempts) = run_with_retry(&entry.retry, logger, &label, move || async move {
        let _permit = entry
            .in_flight
            .acquire()
            .await
            .map_err(|e| FetchError::Fatal(format!("provider limiter closed: {}", e)))?;
        entry.adapter.fetch(station, &entry.params).await
    })
    .await;

    let raw = match result {
        Ok(raw) => raw,
        Err(FetchError::NoData(reason)) => return TaskOutcome::Empty { label, reason },
        Err(err) => {
            return TaskOutcome::Failed {
                label,
                reason: format!("{} after {} attempt(s)", err, attempts),
            }
        }
    };

    let payload = match normalize_payload(&raw) {
        Ok(payload) => payload,
        Err(err) => {
            return TaskOutcome::Failed {
                label,
                reason: format!("malformed payload: {}", err),
            }
        }
    };
    if payload.daily.is_empty() && payload.hourly.is_empty() {
        return TaskOutcome::Empty {
            label,
            reason: "payload has no usable rows".to_string(),
        };
    }

    info!(
        logger,
        "{}: {} daily / {} hourly rows issued {}",
        label,
        payload.daily.len(),
        payload.hourly.len(),
        payload.issued_at
    );
    TaskOutcome::Fetched(ForecastBatchItem {
        source: entry.source.clone(),
        station_id: station.station_id.clone(),
        payload,
        fetched_at,
    })
}
