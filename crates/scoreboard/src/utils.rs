use clap::{Parser, Subcommand};
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};
use log::LevelFilter;
use scoreboard_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_DATA_DIR, DEFAULT_SCOREBOARD_PORT,
    DEFAULT_WINDOW_DAYS,
};
use std::env;
use time::{format_description::well_known::Iso8601, OffsetDateTime};

use crate::ObservationMode;

#[derive(Parser, Clone, Debug, serde::Deserialize, Default)]
#[command(
    author,
    version,
    about = "Forecast scoreboard - score forecasts against observations and serve the results"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $SCOREBOARD_CONFIG, ./scoreboard.toml,
    /// $XDG_CONFIG_HOME/forecast-scoreboard/scoreboard.toml, /etc/forecast-scoreboard/scoreboard.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "SCOREBOARD_LEVEL")]
    pub level: Option<String>,

    /// Directory holding scoreboard.sqlite
    #[arg(short, long, env = "SCOREBOARD_DATA_DIR")]
    pub data_dir: Option<String>,

    /// Host to listen on (use 0.0.0.0 for all interfaces)
    #[arg(long, env = "SCOREBOARD_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SCOREBOARD_PORT")]
    pub port: Option<String>,

    /// Observation table used for scoring: snapshot or latest_wins
    #[arg(long, value_enum, env = "SCOREBOARD_OBSERVATION_MODE")]
    pub observation_mode: Option<ObservationMode>,

    /// Default trailing window for stats, in days
    #[arg(long, env = "SCOREBOARD_WINDOW_DAYS")]
    pub window_days: Option<u32>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Build error rows for one target date
    Score {
        /// Target date (YYYY-MM-DD), defaults to yesterday UTC
        #[arg(long)]
        date: Option<String>,
    },
    /// Recompute dashboard stats over a trailing window
    Stats {
        #[arg(long)]
        window_days: Option<u32>,
        /// Restrict the recomputation to one station
        #[arg(long)]
        station: Option<String>,
    },
    /// Delete every stored row
    Reset {
        /// Required, the reset cannot be undone
        #[arg(long)]
        yes: bool,
    },
    /// Serve the read-only HTTP API (default)
    Serve,
}

impl Cli {
    pub fn host(&self) -> String {
        self.host.clone().unwrap_or_else(|| "127.0.0.1".to_string())
    }

    pub fn port(&self) -> String {
        self.port
            .clone()
            .unwrap_or_else(|| DEFAULT_SCOREBOARD_PORT.to_string())
    }

    pub fn data_dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
    }

    pub fn observation_mode(&self) -> ObservationMode {
        self.observation_mode.unwrap_or_default()
    }

    pub fn window_days(&self) -> u32 {
        self.window_days.unwrap_or(DEFAULT_WINDOW_DAYS)
    }
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> anyhow::Result<Cli> {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("SCOREBOARD_CONFIG", "scoreboard.toml")
    };

    let file_config: Cli = load_config(&source)?;

    // CLI args override file config (env vars are handled by clap)
    Ok(Cli {
        config: cli_args.config,
        level: cli_args.level.or(file_config.level),
        data_dir: cli_args.data_dir.or(file_config.data_dir),
        host: cli_args.host.or(file_config.host),
        port: cli_args.port.or(file_config.port),
        observation_mode: cli_args.observation_mode.or(file_config.observation_mode),
        window_days: cli_args.window_days.or(file_config.window_days),
        command: cli_args.command,
    })
}

pub fn get_log_level(cli: &Cli) -> LevelFilter {
    let level_str = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    match level_str.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => LevelFilter::Info,
    }
}

pub fn setup_logger() -> Dispatch {
    let colors = ColoredLevelConfig::new()
        .trace(Color::White)
        .debug(Color::Cyan)
        .info(Color::Blue)
        .warn(Color::Yellow)
        .error(Color::Magenta);

    fern::Dispatch::new()
        .format(move |out, message, record| {
            let timestamp = OffsetDateTime::now_utc()
                .format(&Iso8601::DEFAULT)
                .unwrap_or_default();
            out.finish(format_args!(
                "[{} {}] {}: {}",
                timestamp,
                colors.color(record.level()),
                record.target(),
                message
            ));
        })
        .chain(std::io::stdout())
}
