//! Market-data collaborator and its HTTP client.

pub mod rest;

pub use rest::RestMarketData;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::types::Candle;
use crate::Result;

/// Source of candles and live prices.
///
/// Implementations return an explicit error rather than stale or zero data.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Most recent `count` candles, ordered oldest-first.
    async fn get_recent_candles(&self, symbol: &str, interval: &str, count: usize) -> Result<Vec<Candle>>;

    /// Latest traded price.
    async fn get_live_price(&self, symbol: &str) -> Result<Decimal>;
}
