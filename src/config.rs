//! Layered configuration: built-in defaults, an optional TOML file, then
//! `MARKET_STORE__*` environment variables.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "market-store.toml";
pub const ENV_PREFIX: &str = "MARKET_STORE";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub indicators: IndicatorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path of the SQLite file; created on first open.
    pub path: PathBuf,
    /// How long SQLite itself waits on a lock before reporting busy.
    pub busy_timeout_ms: u64,
    /// Write-ahead logging lets readers proceed while a writer commits.
    pub wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/market.db"),
            busy_timeout_ms: 5_000,
            wal: true,
        }
    }
}

impl DatabaseConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt; a budget of 5 means at most 6 tries.
    pub max_retries: u32,
    pub base_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 100,
        }
    }
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Window sizes and thresholds for indicator derivation.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorConfig {
    pub ma_window: usize,
    pub rsi_period: usize,
    /// RSI above this is classified as a bearish signal.
    pub overbought: f64,
    /// RSI below this is classified as a bullish signal.
    pub oversold: f64,
    /// Added to the average loss so a loss-free window does not divide by zero.
    pub epsilon: f64,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_window: 7,
            rsi_period: 14,
            overbought: 70.0,
            oversold: 30.0,
            epsilon: 1e-9,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Fallback filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    /// Load configuration. A missing file is not an error; a malformed one is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_FILE));

        let settings = config::Config::builder()
            .add_source(config::File::from(file).required(path.is_some()))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", file.display()))?;

        settings
            .try_deserialize()
            .context("Invalid configuration values")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.retry.max_retries, 5);
        assert_eq!(cfg.database.busy_timeout(), Duration::from_secs(5));
        assert_eq!(cfg.indicators.ma_window, 7);
        assert_eq!(cfg.indicators.rsi_period, 14);
        assert_eq!(cfg.indicators.overbought, 70.0);
        assert_eq!(cfg.indicators.oversold, 30.0);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(
            &path,
            "[database]\npath = \"/tmp/other.db\"\n\n[retry]\nmax_retries = 2\n",
        )
        .unwrap();

        let cfg = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(cfg.database.path, PathBuf::from("/tmp/other.db"));
        assert_eq!(cfg.retry.max_retries, 2);
        // untouched sections keep their defaults
        assert_eq!(cfg.retry.base_delay_ms, 100);
        assert_eq!(cfg.indicators.rsi_period, 14);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(AppConfig::load(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
