//! Position tracking types for guarded positions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

use super::{ActiveLevels, Candle, Fill, LevelSet};
use crate::{Error, Result};

/// Direction of a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// +1 for long, -1 for short. Multiplying a price move by this yields a
    /// profit-signed move.
    pub fn direction(&self) -> Decimal {
        match self {
            Side::Long => Decimal::ONE,
            Side::Short => Decimal::NEGATIVE_ONE,
        }
    }

    /// Whether `candidate` sits closer to the winning side than `current`.
    pub fn is_tighter(&self, candidate: Decimal, current: Decimal) -> bool {
        match self {
            Side::Long => candidate > current,
            Side::Short => candidate < current,
        }
    }

    /// A bar moving against the position.
    pub fn is_adverse(&self, candle: &Candle) -> bool {
        match self {
            Side::Long => candle.is_bearish(),
            Side::Short => candle.is_bullish(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Long => "long",
            Side::Short => "short",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "long" | "buy" => Ok(Side::Long),
            "short" | "sell" => Ok(Side::Short),
            other => Err(Error::Config {
                message: format!("unknown side '{}'", other),
            }),
        }
    }
}

/// Lifecycle state. Closed is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionState {
    Open,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "open",
            PositionState::Closed => "closed",
        }
    }
}

impl FromStr for PositionState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(PositionState::Open),
            "closed" => Ok(PositionState::Closed),
            other => Err(Error::Ledger(format!("unknown position state '{}'", other))),
        }
    }
}

/// A position under automated protection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: Uuid,
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Notional size at entry (quote currency).
    pub notional: Decimal,
    /// Absent until a level set is attached.
    pub levels: Option<ActiveLevels>,
    /// Fraction of the original size still held, 0-1. Never increases.
    pub remaining_fraction: Decimal,
    /// Realized P&L net of exit fees.
    pub realized_pnl: Decimal,
    pub fees_paid: Decimal,
    /// Highest unrealized profit percent observed.
    pub peak_profit_pct: Decimal,
    pub state: PositionState,
    pub exit_time: Option<DateTime<Utc>>,
    pub last_updated: DateTime<Utc>,
}

impl Position {
    /// Create a new open position without protective levels.
    pub fn new(symbol: impl Into<String>, side: Side, entry_price: Decimal, notional: Decimal) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            entry_price,
            entry_time: now,
            notional,
            levels: None,
            remaining_fraction: Decimal::ONE,
            realized_pnl: Decimal::ZERO,
            fees_paid: Decimal::ZERO,
            peak_profit_pct: Decimal::ZERO,
            state: PositionState::Open,
            exit_time: None,
            last_updated: now,
        }
    }

    pub fn with_levels(mut self, level_set: LevelSet) -> Self {
        self.levels = Some(ActiveLevels::new(level_set));
        self
    }

    pub fn with_entry_time(mut self, entry_time: DateTime<Utc>) -> Self {
        self.entry_time = entry_time;
        self
    }

    pub fn is_open(&self) -> bool {
        self.state == PositionState::Open
    }

    /// Units bought at entry.
    pub fn quantity(&self) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.notional / self.entry_price
    }

    pub fn remaining_quantity(&self) -> Decimal {
        self.quantity() * self.remaining_fraction
    }

    /// Unrealized profit in percent of entry (positive = winning).
    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (price - self.entry_price) * self.side.direction() / self.entry_price * Decimal::ONE_HUNDRED
    }

    /// Unrealized P&L on the remaining size, before exit fees.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.side.direction() * self.remaining_quantity()
    }

    /// Track the best unrealized profit seen so far.
    pub fn record_peak(&mut self, pnl_pct: Decimal) {
        if pnl_pct > self.peak_profit_pct {
            self.peak_profit_pct = pnl_pct;
        }
    }

    pub fn stop_loss(&self) -> Option<Decimal> {
        self.levels.as_ref().map(|l| l.stop_loss)
    }

    pub fn hours_open(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.entry_time).num_hours().max(0)
    }

    /// Price has reached or crossed the active stop.
    pub fn stop_breached(&self, price: Decimal) -> bool {
        match (self.stop_loss(), self.side) {
            (Some(stop), Side::Long) => price <= stop,
            (Some(stop), Side::Short) => price >= stop,
            (None, _) => false,
        }
    }

    /// Move the stop to `candidate` if that is strictly tighter. Returns the
    /// previous stop when it moved.
    pub fn tighten_stop(&mut self, candidate: Decimal) -> Option<Decimal> {
        if !self.is_open() {
            return None;
        }
        let side = self.side;
        let levels = self.levels.as_mut()?;
        if !side.is_tighter(candidate, levels.stop_loss) {
            return None;
        }
        let previous = levels.stop_loss;
        levels.stop_loss = candidate;
        self.last_updated = Utc::now();
        Some(previous)
    }

    /// Attach a level set, superseding any active one. An existing stop is
    /// kept when it is tighter than the new set's stop.
    pub fn attach_levels(&mut self, level_set: LevelSet) {
        let mut next = ActiveLevels::new(level_set);
        if let Some(current) = self.levels.take() {
            if self.side.is_tighter(current.stop_loss, next.stop_loss) {
                next.stop_loss = current.stop_loss;
            }
            next.targets_taken = current.targets_taken;
        }
        self.levels = Some(next);
        self.last_updated = Utc::now();
    }

    /// Book an exit of `fraction` of the original size at the fill price.
    /// Returns the net realized P&L of this exit.
    #[allow(clippy::result_large_err)]
    pub fn realize_exit(&mut self, fraction: Decimal, fill: &Fill) -> Result<Decimal> {
        if !self.is_open() {
            return Err(Error::invalid_position(&self.symbol, "exit on a closed position"));
        }
        let fraction = fraction.min(self.remaining_fraction).max(Decimal::ZERO);
        let quantity = self.quantity() * fraction;
        let gross = (fill.price - self.entry_price) * self.side.direction() * quantity;
        let net = gross - fill.fee;

        self.remaining_fraction -= fraction;
        self.realized_pnl += net;
        self.fees_paid += fill.fee;
        self.last_updated = fill.timestamp;

        if self.remaining_fraction <= Decimal::ZERO {
            self.remaining_fraction = Decimal::ZERO;
            self.state = PositionState::Closed;
            self.exit_time = Some(fill.timestamp);
        }
        Ok(net)
    }

    /// Record that the next take-profit stage has executed.
    pub fn mark_target_taken(&mut self) {
        if let Some(levels) = self.levels.as_mut() {
            levels.targets_taken = (levels.targets_taken + 1).min(3);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Confidence;
    use rust_decimal_macros::dec;

    fn fill(price: Decimal, fee: Decimal) -> Fill {
        Fill {
            symbol: "BTCUSDT".to_string(),
            side: Side::Long,
            quantity: Decimal::ZERO,
            price,
            fee,
            timestamp: Utc::now(),
        }
    }

    fn long_at(entry: Decimal, stop: Decimal) -> Position {
        let mut p = Position::new("BTCUSDT", Side::Long, entry, dec!(1000));
        let ls = LevelSet {
            side: Side::Long,
            entry_price: entry,
            swing_high: entry * dec!(1.05),
            swing_low: entry * dec!(0.95),
            atr: dec!(1),
            atr_multiplier: dec!(2.5),
            stop_loss: stop,
            tp1: entry * dec!(1.06),
            tp2: entry * dec!(1.08),
            tp3: entry * dec!(1.13),
            stop_loss_pct: Decimal::ZERO,
            tp1_pct: Decimal::ZERO,
            tp2_pct: Decimal::ZERO,
            tp3_pct: Decimal::ZERO,
            confidence: Confidence::Medium,
            reasoning: String::new(),
            created_at: Utc::now(),
        };
        p.attach_levels(ls);
        p
    }

    fn short_at(entry: Decimal, stop: Decimal) -> Position {
        let mut ls = long_at(entry, stop).levels.unwrap().level_set;
        ls.side = Side::Short;
        ls.stop_loss = stop;
        ls.tp1 = entry * dec!(0.94);
        ls.tp2 = entry * dec!(0.92);
        ls.tp3 = entry * dec!(0.87);
        let mut p = Position::new("ETHUSDT", Side::Short, entry, dec!(1000));
        p.attach_levels(ls);
        p
    }

    #[test]
    fn test_pnl_pct_by_side() {
        let long = Position::new("X", Side::Long, dec!(100), dec!(1000));
        let short = Position::new("X", Side::Short, dec!(100), dec!(1000));
        assert_eq!(long.unrealized_pnl_pct(dec!(103)), dec!(3));
        assert_eq!(short.unrealized_pnl_pct(dec!(103)), dec!(-3));
        assert_eq!(long.quantity(), dec!(10));
    }

    #[test]
    fn test_stop_only_tightens_for_long() {
        let mut p = long_at(dec!(100), dec!(97));
        assert_eq!(p.tighten_stop(dec!(96)), None);
        assert_eq!(p.stop_loss(), Some(dec!(97)));
        assert_eq!(p.tighten_stop(dec!(99)), Some(dec!(97)));
        assert_eq!(p.stop_loss(), Some(dec!(99)));
    }

    #[test]
    fn test_stop_breach_by_side() {
        let p = long_at(dec!(100), dec!(97));
        assert!(p.stop_breached(dec!(97)));
        assert!(!p.stop_breached(dec!(97.5)));

        let short = short_at(dec!(100), dec!(103));
        assert!(short.stop_breached(dec!(103)));
        assert!(short.stop_breached(dec!(104)));
        assert!(!short.stop_breached(dec!(102.5)));
    }

    #[test]
    fn test_stop_only_tightens_for_short() {
        let mut p = short_at(dec!(100), dec!(103));
        assert_eq!(p.tighten_stop(dec!(104)), None);
        assert_eq!(p.tighten_stop(dec!(99.8)), Some(dec!(103)));
        assert_eq!(p.stop_loss(), Some(dec!(99.8)));
        assert_eq!(p.unrealized_pnl(dec!(95)), dec!(50));
    }

    #[test]
    fn test_partial_then_full_exit() {
        let mut p = long_at(dec!(100), dec!(97));
        let net = p.realize_exit(dec!(0.4), &fill(dec!(106), dec!(0.5))).unwrap();
        // 4 units * 6 = 24 gross, minus 0.5 fee
        assert_eq!(net, dec!(23.5));
        assert_eq!(p.remaining_fraction, dec!(0.6));
        assert!(p.is_open());

        p.realize_exit(Decimal::ONE, &fill(dec!(100), Decimal::ZERO)).unwrap();
        assert_eq!(p.remaining_fraction, Decimal::ZERO);
        assert_eq!(p.state, PositionState::Closed);
        assert!(p.exit_time.is_some());
        assert!(p.realize_exit(dec!(0.1), &fill(dec!(100), Decimal::ZERO)).is_err());
    }

    #[test]
    fn test_superseding_levels_keeps_tighter_stop() {
        let mut p = long_at(dec!(100), dec!(97));
        p.tighten_stop(dec!(99));
        let mut looser = p.levels.as_ref().unwrap().level_set.clone();
        looser.stop_loss = dec!(95);
        p.attach_levels(looser);
        assert_eq!(p.stop_loss(), Some(dec!(99)));
    }

    #[test]
    fn test_state_labels() {
        assert_eq!("open".parse::<PositionState>().unwrap(), PositionState::Open);
        assert_eq!(PositionState::Closed.as_str().parse::<PositionState>().unwrap(), PositionState::Closed);
        assert!("4".parse::<PositionState>().is_err());
    }

    #[test]
    fn test_peak_is_monotonic() {
        let mut p = Position::new("X", Side::Long, dec!(100), dec!(1000));
        p.record_peak(dec!(2));
        p.record_peak(dec!(1));
        assert_eq!(p.peak_profit_pct, dec!(2));
    }
}
