//! Order gateway: where exits are sent, plus bounded close retries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use guard_core::types::{Fill, Side};
use guard_core::{Error, MarketData, Result};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// Executes market exits.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderGateway: Send + Sync {
    /// Close `quantity` units of a `side` position at market.
    async fn close_market(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<Fill>;
}

/// Paper-trading fill parameters.
#[derive(Debug, Clone)]
pub struct PaperConfig {
    /// Fee as a fraction of fill notional.
    pub fee_rate: Decimal,
    /// Adverse price slippage as a fraction of the live price.
    pub slippage: Decimal,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            fee_rate: Decimal::new(1, 3),  // 0.1%
            slippage: Decimal::new(5, 4), // 0.05%
        }
    }
}

/// Simulated gateway filling at the live price less slippage.
pub struct PaperGateway {
    market_data: Arc<dyn MarketData>,
    config: PaperConfig,
}

impl PaperGateway {
    pub fn new(market_data: Arc<dyn MarketData>, config: PaperConfig) -> Self {
        Self { market_data, config }
    }
}

#[async_trait]
impl OrderGateway for PaperGateway {
    async fn close_market(&self, symbol: &str, side: Side, quantity: Decimal) -> Result<Fill> {
        if quantity <= Decimal::ZERO {
            return Err(Error::Execution {
                message: format!("non-positive close quantity {} for {}", quantity, symbol),
            });
        }
        let live = self.market_data.get_live_price(symbol).await?;

        // Closing a long sells into the bid, closing a short buys the ask.
        let price = live * (Decimal::ONE - side.direction() * self.config.slippage);
        let fee = quantity * price * self.config.fee_rate;

        info!(
            symbol = %symbol,
            side = %side,
            price = %price,
            quantity = %quantity,
            fee = %fee,
            "[PAPER] Simulated market close"
        );

        Ok(Fill {
            symbol: symbol.to_string(),
            side,
            quantity,
            price,
            fee,
            timestamp: Utc::now(),
        })
    }
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// A close that exhausted its retries.
#[derive(Debug)]
pub struct CloseFailure {
    pub attempts: u32,
    pub last_error: Error,
}

impl RetryPolicy {
    fn delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }

    /// Send the close, retrying up to `max_attempts` times.
    pub async fn close(
        &self,
        gateway: &dyn OrderGateway,
        symbol: &str,
        side: Side,
        quantity: Decimal,
    ) -> std::result::Result<Fill, CloseFailure> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match gateway.close_market(symbol, side, quantity).await {
                Ok(fill) => return Ok(fill),
                Err(e) => {
                    attempt += 1;
                    if attempt >= attempts {
                        return Err(CloseFailure {
                            attempts: attempt,
                            last_error: e,
                        });
                    }
                    let delay = self.delay(attempt - 1);
                    warn!(
                        symbol = %symbol,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Close attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
