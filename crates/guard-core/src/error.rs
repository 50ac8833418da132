//! Error types for the position guard.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Market data error for {symbol}: {message}")]
    MarketData { symbol: String, message: String },

    #[error("Timed out after {secs}s: {operation}")]
    Timeout { operation: String, secs: u64 },

    #[error("Insufficient data: need {needed} candles, have {available}")]
    InsufficientData { needed: usize, available: usize },

    #[error("Invalid position {symbol}: {message}")]
    InvalidPosition { symbol: String, message: String },

    #[error("Execution error: {message}")]
    Execution { message: String },

    #[error("Ledger error: {0}")]
    Ledger(String),

    #[error("Position already tracked for {0}")]
    DuplicatePosition(String),

    #[error("No tracked position for {0}")]
    NotTracked(String),
}

impl Error {
    pub fn market_data(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::MarketData {
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    pub fn invalid_position(symbol: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPosition {
            symbol: symbol.into(),
            message: message.into(),
        }
    }

    /// Recoverable data-fetch failures; the position is simply retried next tick.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Http(_) | Error::MarketData { .. } | Error::Timeout { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
