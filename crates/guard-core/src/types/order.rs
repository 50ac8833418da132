//! Exit fills and close reasons.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Why (part of) a position was exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    /// Composite risk reached HIGH.
    RiskClose,
    /// Price reached the active stop.
    StopLoss,
    /// Take-profit stage 1, 2 or 3.
    TakeProfit(u8),
    /// Operator-initiated.
    Manual,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::RiskClose => write!(f, "risk_close"),
            ExitReason::StopLoss => write!(f, "stop_loss"),
            ExitReason::TakeProfit(n) => write!(f, "take_profit_{}", n),
            ExitReason::Manual => write!(f, "manual"),
        }
    }
}

/// Result of a market exit order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    /// Side of the position being reduced.
    pub side: Side,
    pub quantity: Decimal,
    pub price: Decimal,
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}
