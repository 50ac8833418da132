//! Swing points and protective price levels.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::Side;

/// Direction of a swing turning point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwingKind {
    High,
    Low,
}

/// A locally significant turning point in a candle window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwingPoint {
    pub price: Decimal,
    /// Offset from the most recent bar (0 = latest).
    pub bars_ago: usize,
    pub kind: SwingKind,
    pub volume: Decimal,
    /// ATR at the bar, when enough history precedes it.
    pub atr: Option<Decimal>,
    /// Volume-weighted strength, 0-100.
    pub strength: f64,
}

/// Confidence label attached to a level set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Confidence::Low => write!(f, "LOW"),
            Confidence::Medium => write!(f, "MEDIUM"),
            Confidence::High => write!(f, "HIGH"),
        }
    }
}

/// Stop-loss and staged take-profit prices computed at entry.
///
/// Never mutated after creation; a recomputation produces a new set that
/// supersedes this one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelSet {
    pub side: Side,
    pub entry_price: Decimal,
    pub swing_high: Decimal,
    pub swing_low: Decimal,
    pub atr: Decimal,
    pub atr_multiplier: Decimal,
    pub stop_loss: Decimal,
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub tp3: Decimal,
    /// Signed percent moves from entry.
    pub stop_loss_pct: Decimal,
    pub tp1_pct: Decimal,
    pub tp2_pct: Decimal,
    pub tp3_pct: Decimal,
    pub confidence: Confidence,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

impl LevelSet {
    pub fn targets(&self) -> [Decimal; 3] {
        [self.tp1, self.tp2, self.tp3]
    }

    /// Stop strictly on the losing side, targets strictly on the winning side
    /// and ordered by distance from entry.
    pub fn is_well_formed(&self) -> bool {
        let e = self.entry_price;
        let dir = self.side.direction();
        let dist = |p: Decimal| (p - e) * dir;
        dist(self.stop_loss) < Decimal::ZERO
            && dist(self.tp1) > Decimal::ZERO
            && dist(self.tp1) < dist(self.tp2)
            && dist(self.tp2) < dist(self.tp3)
    }
}

/// The level set currently protecting a position, plus its live stop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveLevels {
    pub level_set: LevelSet,
    /// Current stop; starts at `level_set.stop_loss` and only tightens.
    pub stop_loss: Decimal,
    /// Number of take-profit stages already executed (0-3).
    pub targets_taken: u8,
}

impl ActiveLevels {
    pub fn new(level_set: LevelSet) -> Self {
        Self {
            stop_loss: level_set.stop_loss,
            level_set,
            targets_taken: 0,
        }
    }

    /// The next take-profit stage not yet executed, as (stage index, price).
    pub fn next_target(&self) -> Option<(usize, Decimal)> {
        let idx = self.targets_taken as usize;
        self.level_set.targets().get(idx).map(|p| (idx, *p))
    }
}
