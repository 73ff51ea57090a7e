use clap::{Parser, Subcommand};
use scoreboard::{LeadTimeAnchors, ObservationMode, Station};
use scoreboard_core::{
    find_config_file, load_config, ConfigSource, DEFAULT_DATA_DIR, DEFAULT_WINDOW_DAYS,
};
use serde::Deserialize;
use slog::{o, Drain, Level, Logger};
use std::{collections::BTreeMap, env, time::Duration};

pub const DEFAULT_MAX_WORKERS: usize = 12;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

#[derive(Parser, Clone, Debug, Deserialize, Default)]
#[command(
    author,
    version,
    about = "Forecast collector - fetches provider forecasts and observations into the scoreboard"
)]
pub struct Cli {
    /// Path to config file (TOML format)
    /// Searched in order: this flag, $COLLECTOR_CONFIG, ./collector.toml,
    /// $XDG_CONFIG_HOME/forecast-scoreboard/collector.toml, /etc/forecast-scoreboard/collector.toml
    #[arg(short, long)]
    #[serde(skip)]
    pub config: Option<String>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short, long, env = "COLLECTOR_LEVEL")]
    pub level: Option<String>,

    /// Directory holding scoreboard.sqlite
    #[arg(short, long, env = "COLLECTOR_DATA_DIR")]
    pub data_dir: Option<String>,

    /// HTTP User-Agent header for provider requests (NWS requires one)
    #[arg(short, long, env = "COLLECTOR_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Upper bound on concurrent fetch tasks across all providers
    #[arg(short, long, env = "COLLECTOR_MAX_WORKERS")]
    pub max_workers: Option<usize>,

    /// Per-request timeout in seconds
    #[arg(short, long, env = "COLLECTOR_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Observation table written by the reconciler: snapshot or latest_wins
    #[arg(long, value_enum, env = "COLLECTOR_OBSERVATION_MODE")]
    pub observation_mode: Option<ObservationMode>,

    /// Stats window refreshed after `observations --score`
    #[arg(long, env = "COLLECTOR_WINDOW_DAYS")]
    pub window_days: Option<u32>,

    #[command(subcommand)]
    #[serde(skip)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Command {
    /// Fetch forecasts from every enabled provider for every station
    Forecasts,
    /// Fetch observed highs/lows for one date
    Observations {
        /// Observation date (YYYY-MM-DD), defaults to yesterday UTC
        #[arg(long)]
        date: Option<String>,
        /// Build error rows and refresh stats afterwards
        #[arg(long)]
        score: bool,
    },
}

impl Cli {
    pub fn data_dir(&self) -> String {
        self.data_dir
            .clone()
            .unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())
    }

    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!("forecast-scoreboard-collector/{}", env!("CARGO_PKG_VERSION"))
        })
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers.unwrap_or(DEFAULT_MAX_WORKERS).max(1)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(25))
    }

    pub fn observation_mode(&self) -> ObservationMode {
        self.observation_mode.unwrap_or_default()
    }

    pub fn window_days(&self) -> u32 {
        self.window_days.unwrap_or(DEFAULT_WINDOW_DAYS)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct StationConfig {
    pub station_id: String,
    pub name: Option<String>,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lon")]
    pub longitude: f64,
    pub timezone: String,
    pub state: Option<String>,
    pub elevation_ft: Option<f64>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

impl From<&StationConfig> for Station {
    fn from(station: &StationConfig) -> Self {
        Station {
            station_id: station.station_id.clone(),
            name: station.name.clone(),
            latitude: Some(station.latitude),
            longitude: Some(station.longitude),
            timezone: Some(station.timezone.clone()),
            state: station.state.clone(),
            elevation_ft: station.elevation_ft,
            is_active: Some(station.is_active),
        }
    }
}

/// One `[providers.<SOURCE_ID>]` table. The table key is the source id
/// stored with every run.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ProviderConfig {
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub params: BTreeMap<String, serde_json::Value>,
}

fn default_max_in_flight() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

/// Everything the collector reads from its TOML file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct CollectorConfig {
    #[serde(flatten)]
    pub settings: Cli,
    #[serde(default)]
    pub stations: Vec<StationConfig>,
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub lead_time: LeadTimeAnchors,
}

/// Load configuration from CLI args, config file, and environment
pub fn get_config_info() -> anyhow::Result<CollectorConfig> {
    let cli_args = Cli::parse();

    let source = if let Some(ref path) = cli_args.config {
        ConfigSource::Explicit(path.into())
    } else {
        find_config_file("COLLECTOR_CONFIG", "collector.toml")
    };

    let file_config: CollectorConfig = load_config(&source)?;
    Ok(merge_cli(cli_args, file_config))
}

/// CLI args override file config (env vars are handled by clap)
fn merge_cli(cli_args: Cli, file_config: CollectorConfig) -> CollectorConfig {
    let file = file_config.settings;
    CollectorConfig {
        settings: Cli {
            config: cli_args.config,
            level: cli_args.level.or(file.level),
            data_dir: cli_args.data_dir.or(file.data_dir),
            user_agent: cli_args.user_agent.or(file.user_agent),
            max_workers: cli_args.max_workers.or(file.max_workers),
            timeout_secs: cli_args.timeout_secs.or(file.timeout_secs),
            observation_mode: cli_args.observation_mode.or(file.observation_mode),
            window_days: cli_args.window_days.or(file.window_days),
            command: cli_args.command,
        },
        stations: file_config.stations,
        providers: file_config.providers,
        lead_time: file_config.lead_time,
    }
}

pub fn setup_logger(cli: &Cli) -> Logger {
    let level = cli
        .level
        .clone()
        .or_else(|| env::var("RUST_LOG").ok())
        .unwrap_or_default();
    let log_level = match level.to_lowercase().as_str() {
        "trace" => Level::Trace,
        "debug" => Level::Debug,
        "info" => Level::Info,
        "warn" => Level::Warning,
        "error" => Level::Error,
        _ => Level::Info,
    };

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::CompactFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    let drain = drain.filter_level(log_level).fuse();
    slog::Logger::root(drain, o!("version" => env!("CARGO_PKG_VERSION")))
}
