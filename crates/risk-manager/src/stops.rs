//! Stop tightening rules.
//!
//! A profit-% step function (breakeven, then locked profit) and an opt-in ATR
//! trail. Both only ever produce candidates; moving the live stop is the
//! caller's job and must stay monotonic.

use guard_core::types::Side;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lock `lock_pct` of profit once unrealized profit exceeds `trigger_pct`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopStep {
    pub trigger_pct: Decimal,
    pub lock_pct: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StopStepConfig {
    /// Evaluated in order; the first step whose trigger is exceeded wins.
    pub steps: Vec<StopStep>,
    /// Buffer beyond entry for the breakeven stop, percent.
    pub breakeven_buffer_pct: Decimal,
    /// Also trail this many ATRs behind price. Off unless configured.
    pub atr_trail_multiplier: Option<Decimal>,
}

impl Default for StopStepConfig {
    fn default() -> Self {
        Self {
            steps: vec![
                StopStep {
                    trigger_pct: Decimal::new(10, 0),
                    lock_pct: Decimal::new(5, 0),
                },
                StopStep {
                    trigger_pct: Decimal::new(5, 0),
                    lock_pct: Decimal::new(2, 0),
                },
                StopStep {
                    trigger_pct: Decimal::new(3, 0),
                    lock_pct: Decimal::new(2, 1), // breakeven + 0.2%
                },
            ],
            breakeven_buffer_pct: Decimal::new(2, 1),
            atr_trail_multiplier: None,
        }
    }
}

impl StopStepConfig {
    /// Price locking `pct` percent of profit from entry.
    pub fn lock_price(entry: Decimal, side: Side, pct: Decimal) -> Decimal {
        entry * (Decimal::ONE + side.direction() * pct / Decimal::ONE_HUNDRED)
    }

    /// Stop candidate for the current profit, or `None` below the first step.
    pub fn step_stop(&self, entry: Decimal, side: Side, pnl_pct: Decimal) -> Option<Decimal> {
        self.steps
            .iter()
            .find(|s| pnl_pct > s.trigger_pct)
            .map(|s| Self::lock_price(entry, side, s.lock_pct))
    }

    pub fn breakeven(&self, entry: Decimal, side: Side) -> Decimal {
        Self::lock_price(entry, side, self.breakeven_buffer_pct)
    }

    /// Trail `atr_trail_multiplier` ATRs behind the current price, when enabled.
    pub fn atr_trail(&self, price: Decimal, side: Side, atr: Decimal) -> Option<Decimal> {
        let multiplier = self.atr_trail_multiplier.filter(|m| *m > Decimal::ZERO)?;
        Some(price - side.direction() * atr * multiplier)
    }

    /// The step candidate, or the tighter of it and the ATR trail when that is
    /// enabled. Kept only when it sits on the losing side of `price` and beats
    /// `current`.
    pub fn trailing_candidate(
        &self,
        entry: Decimal,
        side: Side,
        price: Decimal,
        pnl_pct: Decimal,
        atr: Option<Decimal>,
        current: Option<Decimal>,
    ) -> Option<Decimal> {
        let step = self.step_stop(entry, side, pnl_pct);
        let trail = atr
            .filter(|a| *a > Decimal::ZERO)
            .and_then(|a| self.atr_trail(price, side, a));

        let best = match (step, trail) {
            (Some(a), Some(b)) => Some(if side.is_tighter(a, b) { a } else { b }),
            (a, b) => a.or(b),
        }?;

        let below_price = (price - best) * side.direction() > Decimal::ZERO;
        let improves = current.map_or(true, |c| side.is_tighter(best, c));
        (below_price && improves && best > Decimal::ZERO).then_some(best)
    }
}
