use anyhow::{anyhow, bail, Context};
use axum::serve;
use futures::TryFutureExt;
use log::{error, info};
use scoreboard::{
    app, build_app_state, default_score_date, get_config_info, get_log_level,
    timestamps::parse_date, setup_logger, Cli, Command, Database,
};
use std::{net::SocketAddr, str::FromStr};
use tokio::{net::TcpListener, signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = get_config_info()?;
    let log_level = get_log_level(&cli);

    setup_logger()
        .level(log_level)
        .level_for("scoreboard", log_level)
        .level_for("sqlx", log::LevelFilter::Warn)
        .level_for("http_response", log_level)
        .level_for("http_request", log_level)
        .apply()?;

    match cli.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => serve_api(&cli).await,
        Command::Score { date } => {
            let target_date = match date {
                Some(raw) => parse_date(&raw).ok_or_else(|| anyhow!("invalid --date: {}", raw))?,
                None => default_score_date(),
            };
            let db = Database::new(&cli.data_dir()).await?;
            let written = db
                .build_errors_for_date(cli.observation_mode(), target_date)
                .await
                .with_context(|| format!("scoring {} failed", target_date))?;
            info!("scored {}: {} new error rows", target_date, written);
            Ok(())
        }
        Command::Stats {
            window_days,
            station,
        } => {
            let window_days = window_days.unwrap_or_else(|| cli.window_days());
            let db = Database::new(&cli.data_dir()).await?;
            let rows = db.update_stats(window_days, station.as_deref()).await?;
            info!("wrote {} dashboard rows ({} day window)", rows, window_days);
            Ok(())
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("refusing to reset without --yes");
            }
            let db = Database::new(&cli.data_dir()).await?;
            db.reset_all().await?;
            db.checkpoint().await;
            Ok(())
        }
    }
}

async fn serve_api(cli: &Cli) -> anyhow::Result<()> {
    let data_dir = cli.data_dir();
    let socket_addr = SocketAddr::from_str(&format!("{}:{}", cli.host(), cli.port()))
        .map_err(|e| anyhow!("invalid address: {}", e))?;

    let listener = TcpListener::bind(socket_addr)
        .map_err(|e| anyhow!("error binding to socket: {}", e))
        .await?;

    info!("Forecast scoreboard starting...");
    info!("  Listen: http://{}", socket_addr);
    info!("  Data dir: {}", data_dir);
    info!("  Observation mode: {:?}", cli.observation_mode());

    let app_state = build_app_state(&data_dir).await.map_err(|e| {
        error!("error building app: {}", e);
        e
    })?;
    let db = app_state.db.clone();

    serve(
        listener,
        app(app_state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    db.checkpoint().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
