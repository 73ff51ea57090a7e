use anyhow::{anyhow, bail, Context};
use collector::{
    get_config_info, setup_logger, valid_stations, Command, ForecastService, JsonFetcher,
    NwsClimateReport, NwsStationObservations, ObservationService, ProviderRegistry, RetryPolicy,
};
use scoreboard::{default_score_date, score_and_refresh, timestamps::parse_date, Database};
use slog::{error, info, warn};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let config = get_config_info()?;
    let cli = config.settings.clone();
    let logger = setup_logger(&cli);

    info!(logger, "Forecast collector starting...");
    info!(logger, "  Data dir: {}", cli.data_dir());
    info!(logger, "  Max workers: {}", cli.max_workers());
    info!(logger, "  Observation mode: {:?}", cli.observation_mode());

    let (stations, station_errors) = valid_stations(&config.stations);
    for err in &station_errors {
        error!(logger, "skipping station: {}", err);
    }
    if stations.is_empty() {
        bail!("no usable stations configured");
    }

    let fetcher = Arc::new(JsonFetcher::new(
        logger.clone(),
        &cli.user_agent(),
        cli.timeout(),
    )?);
    let db = Database::new(&cli.data_dir())
        .await
        .map_err(|e| anyhow!("error setting up SQLite database: {}", e))?;

    let result = match cli.command.clone() {
        Some(Command::Forecasts) => {
            let (registry, provider_errors) =
                ProviderRegistry::from_config(&config.providers, fetcher.clone());
            for err in &provider_errors {
                error!(logger, "skipping provider: {}", err);
            }
            if registry.is_empty() {
                bail!("no usable providers configured");
            }
            info!(logger, "  Providers: {}", registry.sources().join(", "));

            let service = ForecastService::new(
                logger.clone(),
                db.clone(),
                registry,
                config.lead_time,
                cli.max_workers(),
            );
            service.collect(&stations).await.map(|tally| {
                if tally.succeeded == 0 {
                    warn!(logger, "no provider produced a usable forecast");
                }
            })
        }
        Some(Command::Observations { date, score }) => {
            let target_date = match date {
                Some(raw) => parse_date(&raw).ok_or_else(|| anyhow!("invalid --date: {}", raw))?,
                None => default_score_date(),
            };
            let service = ObservationService::new(
                logger.clone(),
                db.clone(),
                Arc::new(NwsClimateReport::new(fetcher.clone())?),
                Arc::new(NwsStationObservations::new(fetcher.clone())),
                cli.observation_mode(),
                RetryPolicy::default(),
                cli.max_workers(),
            );
            service.collect(&stations, target_date).await?;

            if score {
                let report =
                    score_and_refresh(&db, cli.observation_mode(), target_date, cli.window_days())
                        .await
                        .with_context(|| format!("scoring {} failed", target_date))?;
                info!(
                    logger,
                    "scored {}: {} new error rows, {} stat rows",
                    report.target_date,
                    report.errors_written,
                    report.stat_rows
                );
            }
            Ok(())
        }
        None => Err(anyhow!(
            "no command given, expected `forecasts` or `observations`"
        )),
    };

    db.checkpoint().await;
    result
}
