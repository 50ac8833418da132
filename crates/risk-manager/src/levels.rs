//! Protective level calculation.
//!
//! Turns a swing pair and ATR into a stop-loss and three staged take-profit
//! prices anchored at the entry price.

use chrono::{DateTime, Utc};
use guard_core::types::{Candle, Confidence, LevelSet, Side};
use guard_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::indicators;
use crate::swing::{SwingAnalysis, SwingDetector};

/// Standard Fibonacci ratios used for retracements and extensions.
pub const FIB_RATIOS: [Decimal; 10] = [
    Decimal::ZERO,
    Decimal::from_parts(236, 0, 0, false, 3),
    Decimal::from_parts(382, 0, 0, false, 3),
    Decimal::from_parts(5, 0, 0, false, 1),
    Decimal::from_parts(618, 0, 0, false, 3),
    Decimal::from_parts(786, 0, 0, false, 3),
    Decimal::ONE,
    Decimal::from_parts(1272, 0, 0, false, 3),
    Decimal::from_parts(1618, 0, 0, false, 3),
    Decimal::from_parts(2618, 0, 0, false, 3),
];

/// One row of the volatility table: ATR% below `below_pct` selects
/// `multiplier`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtrTier {
    pub below_pct: Decimal,
    pub multiplier: Decimal,
    pub confidence: Confidence,
}

/// Level calculator parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelConfig {
    pub atr_period: usize,
    /// Ascending by `below_pct`.
    pub tiers: Vec<AtrTier>,
    /// Used when ATR% exceeds every tier.
    pub top_multiplier: Decimal,
    pub top_confidence: Confidence,
    /// Stops closer than this (percent of entry) are rejected.
    pub min_stop_distance_pct: Decimal,
    /// Span used when the swing has no range, percent of entry.
    pub degenerate_span_pct: Decimal,
    /// Swing confidence below this caps the label at MEDIUM.
    pub weak_swing_confidence: f64,
    pub stop_retracements: [Decimal; 2],
    pub target_extensions: [Decimal; 3],
    /// Multipliers at or above this widen targets by `wide_nudges` ATR.
    pub wide_multiplier: Decimal,
    pub wide_nudges: [Decimal; 3],
    /// Multipliers at or below this shift targets by `tight_nudges` ATR.
    pub tight_multiplier: Decimal,
    pub tight_nudges: [Decimal; 3],
}

impl Default for LevelConfig {
    fn default() -> Self {
        Self {
            atr_period: 14,
            tiers: vec![
                AtrTier {
                    below_pct: Decimal::new(1, 0),
                    multiplier: Decimal::new(20, 1),
                    confidence: Confidence::High,
                },
                AtrTier {
                    below_pct: Decimal::new(2, 0),
                    multiplier: Decimal::new(25, 1),
                    confidence: Confidence::Medium,
                },
                AtrTier {
                    below_pct: Decimal::new(35, 1),
                    multiplier: Decimal::new(30, 1),
                    confidence: Confidence::Medium,
                },
            ],
            top_multiplier: Decimal::new(35, 1),
            top_confidence: Confidence::Low,
            min_stop_distance_pct: Decimal::new(5, 1), // 0.5%
            degenerate_span_pct: Decimal::new(2, 0),
            weak_swing_confidence: 40.0,
            stop_retracements: [FIB_RATIOS[4], FIB_RATIOS[5]],
            target_extensions: [FIB_RATIOS[7], FIB_RATIOS[8], FIB_RATIOS[9]],
            wide_multiplier: Decimal::new(30, 1),
            wide_nudges: [Decimal::new(25, 2), Decimal::new(5, 1), Decimal::ONE],
            tight_multiplier: Decimal::new(20, 1),
            tight_nudges: [Decimal::new(-25, 2), Decimal::new(-25, 2), Decimal::ZERO],
        }
    }
}

impl LevelConfig {
    /// Multiplier and confidence for an ATR expressed in percent of entry.
    pub fn multiplier_for(&self, atr_pct: Decimal) -> (Decimal, Confidence) {
        self.tiers
            .iter()
            .find(|t| atr_pct < t.below_pct)
            .map(|t| (t.multiplier, t.confidence))
            .unwrap_or((self.top_multiplier, self.top_confidence))
    }
}

/// Fibonacci levels over a leg anchored at entry, oriented by side.
#[derive(Debug, Clone, Copy)]
pub struct FibonacciGrid {
    pub entry: Decimal,
    pub span: Decimal,
    pub side: Side,
}

impl FibonacciGrid {
    pub fn retracement(&self, ratio: Decimal) -> Decimal {
        self.entry + self.side.direction() * (Decimal::ONE - ratio) * self.span
    }

    pub fn extension(&self, ratio: Decimal) -> Decimal {
        self.entry + self.side.direction() * ratio * self.span
    }

    /// (ratio, retracement, extension) for every standard ratio.
    pub fn levels(&self) -> Vec<(Decimal, Decimal, Decimal)> {
        FIB_RATIOS
            .iter()
            .map(|&r| (r, self.retracement(r), self.extension(r)))
            .collect()
    }
}

/// Everything the level math needs once candles have been reduced.
#[derive(Debug, Clone)]
pub struct LevelInputs {
    pub entry_price: Decimal,
    pub side: Side,
    pub swing_high: Decimal,
    pub swing_low: Decimal,
    pub swing_confidence: f64,
    pub fallback: bool,
    pub atr: Decimal,
}

impl LevelInputs {
    pub fn from_swing(entry_price: Decimal, side: Side, swing: &SwingAnalysis, atr: Decimal) -> Self {
        Self {
            entry_price,
            side,
            swing_high: swing.high(),
            swing_low: swing.low(),
            swing_confidence: swing.confidence,
            fallback: swing.fallback,
            atr,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LevelCalculator {
    detector: SwingDetector,
    config: LevelConfig,
}

impl LevelCalculator {
    pub fn new(detector: SwingDetector, config: LevelConfig) -> Self {
        Self { detector, config }
    }

    pub fn config(&self) -> &LevelConfig {
        &self.config
    }

    pub fn detector(&self) -> &SwingDetector {
        &self.detector
    }

    /// Compute a fresh level set for an entry from recent candles.
    #[allow(clippy::result_large_err)]
    pub fn calculate(&self, candles: &[Candle], entry_price: Decimal, side: Side) -> Result<LevelSet> {
        if entry_price <= Decimal::ZERO {
            return Err(Error::invalid_position(
                "",
                format!("non-positive entry price {}", entry_price),
            ));
        }
        let needed = self.detector.config().min_bars;
        let swing = self.detector.detect(candles).ok_or(Error::InsufficientData {
            needed,
            available: candles.len(),
        })?;
        let atr = indicators::atr(candles, self.config.atr_period).ok_or(Error::InsufficientData {
            needed: self.config.atr_period + 1,
            available: candles.len(),
        })?;

        let level_set = self.from_inputs(&LevelInputs::from_swing(entry_price, side, &swing, atr), Utc::now());
        info!(
            side = %side,
            entry = %entry_price,
            stop_loss = %level_set.stop_loss,
            tp1 = %level_set.tp1,
            tp2 = %level_set.tp2,
            tp3 = %level_set.tp3,
            confidence = %level_set.confidence,
            "Calculated protective levels"
        );
        Ok(level_set)
    }

    /// Pure level math.
    pub fn from_inputs(&self, inputs: &LevelInputs, created_at: DateTime<Utc>) -> LevelSet {
        let entry = inputs.entry_price;
        let side = inputs.side;
        let hundred = Decimal::ONE_HUNDRED;

        let atr_pct = inputs.atr / entry * hundred;
        let (multiplier, mut confidence) = self.config.multiplier_for(atr_pct);
        let offset = inputs.atr * multiplier;

        let degenerate = inputs.swing_high <= inputs.swing_low;
        let span = if degenerate {
            entry * self.config.degenerate_span_pct / hundred
        } else if inputs.swing_low < entry && entry < inputs.swing_high {
            match side {
                Side::Long => inputs.swing_high - entry,
                Side::Short => entry - inputs.swing_low,
            }
        } else {
            inputs.swing_high - inputs.swing_low
        };

        if degenerate || inputs.fallback {
            confidence = Confidence::Low;
        } else if inputs.swing_confidence < self.config.weak_swing_confidence {
            confidence = confidence.min(Confidence::Medium);
        }

        let grid = FibonacciGrid { entry, span, side };
        let (stop_loss, stop_source) = self.stop_loss(&grid, inputs, offset);
        let targets = self.targets(&grid, inputs.atr, multiplier);

        let pct = |p: Decimal| ((p - entry) / entry * hundred).round_dp(4);
        let reasoning = format!(
            "{} swing {}..{}{} with ATR {} ({}% of entry) -> {}x multiplier; stop {} from {}; \
             targets at fib 1.272/1.618/2.618 of a {} leg",
            if inputs.fallback { "fallback" } else { "fractal" },
            inputs.swing_low,
            inputs.swing_high,
            if degenerate { " (degenerate, minimum spread)" } else { "" },
            inputs.atr.round_dp(8),
            atr_pct.round_dp(2),
            multiplier,
            stop_loss.round_dp(8),
            stop_source,
            span.round_dp(8),
        );
        debug!(%reasoning, "Level reasoning");

        LevelSet {
            side,
            entry_price: entry,
            swing_high: inputs.swing_high,
            swing_low: inputs.swing_low,
            atr: inputs.atr,
            atr_multiplier: multiplier,
            stop_loss,
            tp1: targets[0],
            tp2: targets[1],
            tp3: targets[2],
            stop_loss_pct: pct(stop_loss),
            tp1_pct: pct(targets[0]),
            tp2_pct: pct(targets[1]),
            tp3_pct: pct(targets[2]),
            confidence,
            reasoning,
            created_at,
        }
    }

    /// First candidate far enough from entry wins: 61.8% retracement, 78.6%
    /// retracement, then the swing extreme, each pushed out by the ATR offset.
    fn stop_loss(&self, grid: &FibonacciGrid, inputs: &LevelInputs, offset: Decimal) -> (Decimal, &'static str) {
        let entry = grid.entry;
        let dir = grid.side.direction();
        let min_distance = entry * self.config.min_stop_distance_pct / Decimal::ONE_HUNDRED;
        let extreme = match grid.side {
            Side::Long => inputs.swing_low,
            Side::Short => inputs.swing_high,
        };

        let candidates = [
            (grid.retracement(self.config.stop_retracements[0]), "61.8% retracement"),
            (grid.retracement(self.config.stop_retracements[1]), "78.6% retracement"),
            (extreme, "swing extreme"),
        ];
        for (base, source) in candidates {
            let stop = base - dir * offset;
            if (entry - stop) * dir >= min_distance && stop > Decimal::ZERO {
                return (stop, source);
            }
        }

        let distance = offset.max(min_distance);
        let floor = entry - dir * distance;
        if floor > Decimal::ZERO {
            (floor, "minimum distance floor")
        } else {
            (entry - dir * min_distance, "minimum distance floor")
        }
    }

    fn targets(&self, grid: &FibonacciGrid, atr: Decimal, multiplier: Decimal) -> [Decimal; 3] {
        let ext = &self.config.target_extensions;
        let base = [grid.extension(ext[0]), grid.extension(ext[1]), grid.extension(ext[2])];

        let nudges = if multiplier >= self.config.wide_multiplier {
            self.config.wide_nudges
        } else if multiplier <= self.config.tight_multiplier {
            self.config.tight_nudges
        } else {
            return base;
        };

        let dir = grid.side.direction();
        let nudged = [
            base[0] + dir * nudges[0] * atr,
            base[1] + dir * nudges[1] * atr,
            base[2] + dir * nudges[2] * atr,
        ];
        let dist = |p: Decimal| (p - grid.entry) * dir;
        let ordered = dist(nudged[0]) > Decimal::ZERO
            && dist(nudged[0]) < dist(nudged[1])
            && dist(nudged[1]) < dist(nudged[2]);
        if ordered {
            nudged
        } else {
            base
        }
    }
}
