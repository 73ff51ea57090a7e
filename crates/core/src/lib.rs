//! Forecast Scoreboard Core Library
//!
//! Shared utilities for the scoreboard and collector services:
//! - Configuration discovery and loading (XDG-compliant)
//! - Defaults shared by both binaries

mod config;

pub use config::{find_config_file, load_config, ConfigSource};

/// Application name used for XDG paths
pub const APP_NAME: &str = "forecast-scoreboard";

/// Default port for the read API
pub const DEFAULT_SCOREBOARD_PORT: u16 = 9810;

/// Default trailing window for dashboard stats
pub const DEFAULT_WINDOW_DAYS: u32 = 30;

/// Default directory holding the SQLite database
pub const DEFAULT_DATA_DIR: &str = "./scoreboard_data";
