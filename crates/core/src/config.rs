//! Configuration loading utilities
//!
//! Both binaries resolve their settings from several sources, highest priority first:
//! 1. CLI arguments
//! 2. Environment variables (handled by clap)
//! 3. A TOML config file found in one of the standard locations
//! 4. Built-in defaults

use std::env;
use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use log::info;
use serde::de::DeserializeOwned;

use crate::APP_NAME;

/// Describes where a configuration was loaded from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    /// Explicit path provided via CLI or env var
    Explicit(PathBuf),
    /// Found in current working directory
    CurrentDir(PathBuf),
    /// Found in XDG config home (~/.config/forecast-scoreboard/)
    XdgConfig(PathBuf),
    /// Found in system config (/etc/forecast-scoreboard/)
    System(PathBuf),
    /// No config file found, using defaults
    Defaults,
}

impl ConfigSource {
    pub fn path(&self) -> Option<&PathBuf> {
        match self {
            ConfigSource::Explicit(p)
            | ConfigSource::CurrentDir(p)
            | ConfigSource::XdgConfig(p)
            | ConfigSource::System(p) => Some(p),
            ConfigSource::Defaults => None,
        }
    }
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.path() {
            Some(p) => write!(f, "{}", p.display()),
            None => write!(f, "(defaults)"),
        }
    }
}

/// Find a configuration file in standard locations
///
/// Search order:
/// 1. Environment variable (e.g. SCOREBOARD_CONFIG or COLLECTOR_CONFIG)
/// 2. Current directory (scoreboard.toml or collector.toml)
/// 3. XDG config home ($XDG_CONFIG_HOME/forecast-scoreboard/ or ~/.config/forecast-scoreboard/)
/// 4. System config (/etc/forecast-scoreboard/)
pub fn find_config_file(env_var: &str, filename: &str) -> ConfigSource {
    if let Ok(path) = env::var(env_var) {
        let p = PathBuf::from(&path);
        if p.exists() {
            return ConfigSource::Explicit(p);
        }
    }

    let local = PathBuf::from(filename);
    if local.exists() {
        return ConfigSource::CurrentDir(local);
    }

    let xdg_path = xdg_config_path(filename);
    if xdg_path.exists() {
        return ConfigSource::XdgConfig(xdg_path);
    }

    let system = PathBuf::from(format!("/etc/{}/{}", APP_NAME, filename));
    if system.exists() {
        return ConfigSource::System(system);
    }

    ConfigSource::Defaults
}

fn xdg_config_path(filename: &str) -> PathBuf {
    if let Ok(xdg_config) = env::var("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config).join(APP_NAME).join(filename)
    } else if let Ok(home) = env::var("HOME") {
        PathBuf::from(home)
            .join(".config")
            .join(APP_NAME)
            .join(filename)
    } else {
        PathBuf::from(format!(".config/{}/{}", APP_NAME, filename))
    }
}

/// Load and parse a TOML configuration file
///
/// Returns `T::default()` when no file was found. A file that exists but
/// cannot be read or parsed is an error, so a typo never silently falls
/// back to defaults.
pub fn load_config<T: DeserializeOwned + Default>(source: &ConfigSource) -> anyhow::Result<T> {
    let Some(path) = source.path() else {
        return Ok(T::default());
    };

    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: T = toml::from_str(&content)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    info!("Loaded config from: {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Sample {
        level: Option<String>,
        window_days: Option<u32>,
    }

    #[test]
    fn test_config_source_display() {
        let source = ConfigSource::CurrentDir(PathBuf::from("scoreboard.toml"));
        assert_eq!(format!("{}", source), "scoreboard.toml");

        let source = ConfigSource::Defaults;
        assert_eq!(format!("{}", source), "(defaults)");
    }

    #[test]
    fn defaults_when_no_file() {
        let loaded: Sample = load_config(&ConfigSource::Defaults).unwrap();
        assert_eq!(loaded, Sample::default());
    }

    #[test]
    fn parses_explicit_file() {
        let path = env::temp_dir().join(format!("scoreboard-core-test-{}.toml", std::process::id()));
        fs::write(&path, "level = \"debug\"\nwindow_days = 14\n").unwrap();

        let loaded: Sample = load_config(&ConfigSource::Explicit(path.clone())).unwrap();
        fs::remove_file(&path).unwrap();

        assert_eq!(loaded.level.as_deref(), Some("debug"));
        assert_eq!(loaded.window_days, Some(14));
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = env::temp_dir().join(format!("scoreboard-core-bad-{}.toml", std::process::id()));
        fs::write(&path, "window_days = [not toml").unwrap();

        let result: anyhow::Result<Sample> = load_config(&ConfigSource::Explicit(path.clone()));
        fs::remove_file(&path).unwrap();

        assert!(result.is_err());
    }
}
