//! Risk assessment records.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::Error;

/// Coarse classification of the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

/// Action recommended for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskAction {
    Hold,
    AdjustSl,
    CloseNow,
}

macro_rules! str_enum {
    ($ty:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $s),+
                }
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                match s {
                    $($s => Ok($ty::$variant),)+
                    other => Err(Error::Ledger(format!(
                        "unknown {} '{}'",
                        stringify!($ty),
                        other
                    ))),
                }
            }
        }
    };
}

str_enum!(RiskLevel { Low => "LOW", Moderate => "MODERATE", High => "HIGH" });
str_enum!(RiskAction { Hold => "HOLD", AdjustSl => "ADJUST_SL", CloseNow => "CLOSE_NOW" });

/// The seven independent sub-scores, each 0-100.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FactorScores {
    pub price_action: f64,
    pub volume: f64,
    pub regime_change: f64,
    pub support_resistance: f64,
    pub time_decay: f64,
    pub correlation: f64,
    pub drawdown: f64,
}

impl FactorScores {
    /// Named view used for reasoning text and persistence.
    pub fn named(&self) -> [(&'static str, f64); 7] {
        [
            ("price_action", self.price_action),
            ("volume", self.volume),
            ("regime_change", self.regime_change),
            ("support_resistance", self.support_resistance),
            ("time_decay", self.time_decay),
            ("correlation", self.correlation),
            ("drawdown", self.drawdown),
        ]
    }
}

/// One evaluation of an open position. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub timestamp: DateTime<Utc>,
    pub composite_score: f64,
    pub factors: FactorScores,
    pub risk_level: RiskLevel,
    pub action: RiskAction,
    pub reasoning: String,
    /// Revised stop proposed by the assessor, if any.
    pub suggested_stop: Option<Decimal>,
    /// Price the assessment was made at.
    pub price: Decimal,
    pub unrealized_pnl_pct: Decimal,
}
