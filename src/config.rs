// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2025 Jonathan D.A. Jewell
//! Configuration management
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `ROSTERSYSTEM_*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix
pub const ENV_PREFIX: &str = "ROSTERSYSTEM";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("org", "hyperpolymath", "rostersystem")
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Directory for persistent data (roster, LMS snapshot)
    pub data_dir: PathBuf,
    /// Directory for cached data
    pub cache_dir: PathBuf,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Quiet period before validation reruns, in milliseconds
    pub debounce_ms: u64,
    /// Age after which a linked group-set counts as stale, in hours
    pub stale_after_hours: i64,
    /// Undo steps kept per session
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: project_dirs()
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".rostersystem")),
            cache_dir: project_dirs()
                .map(|d| d.cache_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".rostersystem/cache")),
            log_level: "info".to_string(),
            debounce_ms: 200,
            stale_after_hours: crate::sync::DEFAULT_STALE_AFTER_HOURS,
            history_limit: 50,
        }
    }
}

impl Config {
    /// Staleness threshold as a duration
    #[must_use]
    pub fn stale_after(&self) -> chrono::Duration {
        chrono::Duration::hours(self.stale_after_hours)
    }
}

/// Default location of the configuration file
#[must_use]
pub fn default_config_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".rostersystem/config.toml"))
}

/// Load configuration from defaults, `path` (if it exists) and environment
pub fn load(path: Option<&Path>) -> Result<Config> {
    let defaults = Config::default();
    let path = path.map_or_else(default_config_path, Path::to_path_buf);

    let settings = config::Config::builder()
        .set_default("data_dir", defaults.data_dir.to_string_lossy().into_owned())?
        .set_default("cache_dir", defaults.cache_dir.to_string_lossy().into_owned())?
        .set_default("log_level", defaults.log_level)?
        .set_default("debounce_ms", defaults.debounce_ms)?
        .set_default("stale_after_hours", defaults.stale_after_hours)?
        .set_default("history_limit", u64::try_from(defaults.history_limit)?)?
        .add_source(config::File::from(path.as_path()).format(config::FileFormat::Toml).required(false))
        .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
        .build()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    settings
        .try_deserialize()
        .context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "debounce_ms = 50\nhistory_limit = 3\n").unwrap();
        let config = load(Some(&path)).unwrap();
        assert_eq!(config.debounce_ms, 50);
        assert_eq!(config.history_limit, 3);
        assert_eq!(config.stale_after_hours, 24);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = load(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.stale_after(), chrono::Duration::hours(24));
    }
}
