//! Configuration management for the position guard.

use crate::{Error, Result};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::env;
use std::path::Path;

/// Infrastructure configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub market_data: MarketDataConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Ledger database. When unset the in-memory ledger is used.
    pub url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MarketDataConfig {
    pub base_url: String,
    pub request_timeout_secs: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.binance.com".to_string(),
            request_timeout_secs: 10,
        }
    }
}

/// Scheduling parameters for the monitoring loop.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Seconds between ticks.
    pub tick_interval_secs: u64,
    /// Upper bound on a single market-data call.
    pub fetch_timeout_secs: u64,
    /// Candle interval requested from market data (e.g. "15m").
    pub candle_interval: String,
    /// Candles requested per position per tick.
    pub candle_count: usize,
    /// Positions assessed concurrently within one tick.
    pub max_concurrency: usize,
    /// Exit fee as a fraction of notional.
    pub fee_rate: Decimal,
    /// Gateway attempts before a failed close is escalated.
    pub max_close_retries: u32,
    /// Base backoff between close attempts; doubles each retry.
    pub retry_delay_ms: u64,
    /// Apply the proposed trailing stop on LOW-risk holds.
    pub apply_trailing: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            fetch_timeout_secs: 10,
            candle_interval: "15m".to_string(),
            candle_count: 100,
            max_concurrency: 4,
            fee_rate: Decimal::new(1, 3), // 0.1%
            max_close_retries: 3,
            retry_delay_ms: 500,
            apply_trailing: false,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Config {
    /// Load configuration from environment variables.
    #[allow(clippy::result_large_err)]
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = MonitorConfig::default();
        let monitor = MonitorConfig {
            tick_interval_secs: env_parse("MONITOR_TICK_SECS").unwrap_or(defaults.tick_interval_secs),
            fetch_timeout_secs: env_parse("MONITOR_FETCH_TIMEOUT_SECS")
                .unwrap_or(defaults.fetch_timeout_secs),
            candle_interval: env::var("MONITOR_CANDLE_INTERVAL").unwrap_or(defaults.candle_interval),
            candle_count: env_parse("MONITOR_CANDLE_COUNT").unwrap_or(defaults.candle_count),
            max_concurrency: env_parse("MONITOR_MAX_CONCURRENCY").unwrap_or(defaults.max_concurrency),
            fee_rate: env_parse("MONITOR_FEE_RATE").unwrap_or(defaults.fee_rate),
            max_close_retries: env_parse("MONITOR_MAX_CLOSE_RETRIES").unwrap_or(defaults.max_close_retries),
            retry_delay_ms: env_parse("MONITOR_RETRY_DELAY_MS").unwrap_or(defaults.retry_delay_ms),
            apply_trailing: env_parse("MONITOR_APPLY_TRAILING").unwrap_or(defaults.apply_trailing),
        };
        monitor.validate()?;

        Ok(Self {
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").ok(),
                max_connections: env_parse("DATABASE_MAX_CONNECTIONS").unwrap_or(5),
            },
            market_data: MarketDataConfig {
                base_url: env::var("MARKET_DATA_URL")
                    .unwrap_or_else(|_| MarketDataConfig::default().base_url),
                request_timeout_secs: monitor.fetch_timeout_secs,
            },
            monitor,
        })
    }

    /// Load configuration for testing (with defaults).
    #[cfg(test)]
    pub fn test_config() -> Self {
        Self {
            database: DatabaseConfig {
                url: None,
                max_connections: 2,
            },
            market_data: MarketDataConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl MonitorConfig {
    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_secs == 0 {
            return Err(Error::Config {
                message: "tick interval must be at least one second".to_string(),
            });
        }
        if self.fetch_timeout_secs == 0 || self.fetch_timeout_secs >= self.tick_interval_secs * 2 {
            return Err(Error::Config {
                message: format!(
                    "fetch timeout {}s must be non-zero and shorter than two ticks ({}s)",
                    self.fetch_timeout_secs, self.tick_interval_secs
                ),
            });
        }
        if self.fee_rate < Decimal::ZERO || self.fee_rate >= Decimal::ONE {
            return Err(Error::Config {
                message: format!("fee rate {} must be in [0, 1)", self.fee_rate),
            });
        }
        if self.max_concurrency == 0 {
            return Err(Error::Config {
                message: "max_concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Load a settings struct from built-in defaults, an optional TOML file, and
/// `{prefix}__SECTION__KEY` environment overrides.
#[allow(clippy::result_large_err)]
pub fn load_layered<T: DeserializeOwned>(path: Option<&Path>, env_prefix: &str) -> Result<T> {
    let mut builder = config::Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(config::File::from(path).required(true));
    }
    let settings = builder
        .add_source(
            config::Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(settings.try_deserialize()?)
}
