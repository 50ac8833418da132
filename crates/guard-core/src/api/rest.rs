//! REST client for a Binance-compatible klines/ticker API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration as StdDuration;
use tracing::warn;

use super::MarketData;
use crate::config::MarketDataConfig;
use crate::types::Candle;
use crate::{Error, Result};

/// Market data over HTTP. Single attempt per call; the monitor retries on the
/// next tick instead.
#[derive(Clone)]
pub struct RestMarketData {
    base_url: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

impl RestMarketData {
    #[allow(clippy::result_large_err)]
    pub fn new(config: &MarketDataConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .connect_timeout(StdDuration::from_secs(config.request_timeout_secs.min(5)))
            .build()?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, symbol: &str, url: &str) -> Result<T> {
        let response = self.http_client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::market_data(symbol, format!("HTTP {}", status)));
        }
        Ok(response.json().await?)
    }
}

fn parse_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => Decimal::from_str(s).ok(),
        serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Parse one kline row: `[open_time, open, high, low, close, volume, ...]`.
fn parse_kline(row: &[serde_json::Value]) -> Option<Candle> {
    if row.len() < 6 {
        return None;
    }
    let timestamp = DateTime::<Utc>::from_timestamp_millis(row[0].as_i64()?)?;
    Some(Candle::new(
        timestamp,
        parse_decimal(&row[1])?,
        parse_decimal(&row[2])?,
        parse_decimal(&row[3])?,
        parse_decimal(&row[4])?,
        parse_decimal(&row[5])?,
    ))
}

#[allow(clippy::result_large_err)]
fn parse_klines(symbol: &str, rows: Vec<Vec<serde_json::Value>>) -> Result<Vec<Candle>> {
    let total = rows.len();
    let candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| parse_kline(row))
        .filter(Candle::is_valid)
        .collect();

    if candles.is_empty() {
        return Err(Error::market_data(symbol, "no valid candles returned"));
    }
    if candles.len() < total {
        let dropped = total - candles.len();
        warn!(symbol, dropped, total, "Malformed klines in window, rejecting candle set");
        return Err(Error::market_data(
            symbol,
            format!("{} of {} klines malformed", dropped, total),
        ));
    }
    Ok(candles)
}

#[async_trait]
impl MarketData for RestMarketData {
    async fn get_recent_candles(&self, symbol: &str, interval: &str, count: usize) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url, symbol, interval, count
        );
        let rows: Vec<Vec<serde_json::Value>> = self.get_json(symbol, &url).await?;
        parse_klines(symbol, rows)
    }

    async fn get_live_price(&self, symbol: &str) -> Result<Decimal> {
        let url = format!("{}/api/v3/ticker/price?symbol={}", self.base_url, symbol);
        let ticker: TickerPrice = self.get_json(symbol, &url).await?;
        let price = Decimal::from_str(&ticker.price)
            .map_err(|e| Error::market_data(symbol, format!("bad price '{}': {}", ticker.price, e)))?;
        if price <= Decimal::ZERO {
            return Err(Error::market_data(symbol, "non-positive price"));
        }
        Ok(price)
    }
}
