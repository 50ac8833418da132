//! Swing detection.
//!
//! Finds fractal turning points in a recent candle window and picks the most
//! recent high/low pair whose spread clears a noise threshold. When no pair
//! qualifies the window extremes are returned with a capped confidence.

use guard_core::types::{Candle, SwingKind, SwingPoint};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::indicators::{self, to_f64};

/// Swing detector parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SwingConfig {
    /// Bars on each side a fractal must exceed.
    pub wing: usize,
    /// Minimum high/low spread, percent of the latest close.
    pub min_spread_pct: Decimal,
    /// Windows shorter than this produce no swing.
    pub min_bars: usize,
    pub recency_weight: f64,
    pub volume_weight: f64,
    /// Upper bound on the confidence of a fallback (max/min) swing.
    pub fallback_confidence_cap: f64,
    pub atr_period: usize,
}

impl Default for SwingConfig {
    fn default() -> Self {
        Self {
            wing: 2,
            min_spread_pct: Decimal::new(2, 0), // 2%
            min_bars: 50,
            recency_weight: 0.6,
            volume_weight: 0.4,
            fallback_confidence_cap: 30.0,
            atr_period: 14,
        }
    }
}

/// Result of swing detection over one window.
#[derive(Debug, Clone, PartialEq)]
pub struct SwingAnalysis {
    pub swing_high: SwingPoint,
    pub swing_low: SwingPoint,
    /// Age of the older point of the pair.
    pub bars_ago: usize,
    /// 0-100.
    pub confidence: f64,
    /// True when no fractal pair cleared the noise filter.
    pub fallback: bool,
}

impl SwingAnalysis {
    pub fn high(&self) -> Decimal {
        self.swing_high.price
    }

    pub fn low(&self) -> Decimal {
        self.swing_low.price
    }

    /// High and low coincide (or are inverted): no usable range.
    pub fn is_degenerate(&self) -> bool {
        self.swing_high.price <= self.swing_low.price
    }
}

#[derive(Debug, Clone, Default)]
pub struct SwingDetector {
    config: SwingConfig,
}

impl SwingDetector {
    pub fn new(config: SwingConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SwingConfig {
        &self.config
    }

    /// Detect the working swing pair. `None` means "no swing found": too few
    /// bars or malformed candles. Callers skip the window in that case.
    pub fn detect(&self, candles: &[Candle]) -> Option<SwingAnalysis> {
        if candles.len() < self.config.min_bars.max(2 * self.config.wing + 1) {
            debug!(
                bars = candles.len(),
                needed = self.config.min_bars,
                "Not enough candles for swing detection"
            );
            return None;
        }
        if let Some(bad) = candles.iter().position(|c| !c.is_valid()) {
            debug!(index = bad, "Malformed candle in window, no swing");
            return None;
        }

        let points = self.fractals(candles);
        let reference = candles[candles.len() - 1].close;

        match self.best_pair(&points, reference) {
            Some((high, low)) => {
                let bars_ago = high.bars_ago.max(low.bars_ago);
                let confidence = self.blend(candles.len(), bars_ago, &high, &low);
                Some(SwingAnalysis {
                    swing_high: high,
                    swing_low: low,
                    bars_ago,
                    confidence,
                    fallback: false,
                })
            }
            None => Some(self.fallback(candles)),
        }
    }

    /// All fractal highs and lows in the window, newest first.
    pub fn fractals(&self, candles: &[Candle]) -> Vec<SwingPoint> {
        let wing = self.config.wing;
        let n = candles.len();
        let mut points = Vec::new();
        if wing == 0 || n < 2 * wing + 1 {
            return points;
        }

        let avg_volume = average_volume(candles);
        for i in (wing..n - wing).rev() {
            let neighbours = (i - wing..i).chain(i + 1..=i + wing);
            if neighbours.clone().all(|j| candles[i].high > candles[j].high) {
                points.push(self.point(candles, i, SwingKind::High, avg_volume));
            }
            if neighbours.into_iter().all(|j| candles[i].low < candles[j].low) {
                points.push(self.point(candles, i, SwingKind::Low, avg_volume));
            }
        }
        points
    }

    fn point(&self, candles: &[Candle], index: usize, kind: SwingKind, avg_volume: f64) -> SwingPoint {
        let bar = &candles[index];
        let volume = to_f64(bar.volume);
        let strength = if avg_volume > 0.0 {
            (50.0 * volume / avg_volume).min(100.0)
        } else {
            0.0
        };
        SwingPoint {
            price: match kind {
                SwingKind::High => bar.high,
                SwingKind::Low => bar.low,
            },
            bars_ago: candles.len() - 1 - index,
            kind,
            volume: bar.volume,
            atr: indicators::atr_at(candles, index, self.config.atr_period),
            strength,
        }
    }

    /// Walk back from the newest fractals and take the first high/low pair
    /// whose spread clears the noise threshold.
    fn best_pair(&self, points: &[SwingPoint], reference: Decimal) -> Option<(SwingPoint, SwingPoint)> {
        if reference <= Decimal::ZERO {
            return None;
        }
        let min_spread = reference * self.config.min_spread_pct / Decimal::ONE_HUNDRED;
        let highs = points.iter().filter(|p| p.kind == SwingKind::High);

        let mut best: Option<((usize, usize), &SwingPoint, &SwingPoint)> = None;
        for high in highs {
            for low in points.iter().filter(|p| p.kind == SwingKind::Low) {
                if high.price <= low.price || high.price - low.price < min_spread {
                    continue;
                }
                let key = (high.bars_ago.max(low.bars_ago), high.bars_ago + low.bars_ago);
                if best.as_ref().map_or(true, |(k, _, _)| key < *k) {
                    best = Some((key, high, low));
                }
            }
        }
        best.map(|(_, h, l)| (h.clone(), l.clone()))
    }

    fn blend(&self, window: usize, bars_ago: usize, high: &SwingPoint, low: &SwingPoint) -> f64 {
        let recency = 100.0 * (1.0 - bars_ago as f64 / window as f64);
        let volume = (high.strength + low.strength) / 2.0;
        (self.config.recency_weight * recency + self.config.volume_weight * volume).clamp(0.0, 100.0)
    }

    fn fallback(&self, candles: &[Candle]) -> SwingAnalysis {
        let avg_volume = average_volume(candles);
        let n = candles.len();

        // Latest index wins ties so the pair is as recent as possible.
        let hi = (0..n)
            .rev()
            .max_by(|&a, &b| candles[a].high.cmp(&candles[b].high).then(a.cmp(&b)))
            .unwrap_or(n - 1);
        let lo = (0..n)
            .rev()
            .min_by(|&a, &b| candles[a].low.cmp(&candles[b].low).then(b.cmp(&a)))
            .unwrap_or(n - 1);

        let high = self.point(candles, hi, SwingKind::High, avg_volume);
        let low = self.point(candles, lo, SwingKind::Low, avg_volume);
        let bars_ago = high.bars_ago.max(low.bars_ago);

        let confidence = if high.price <= low.price {
            0.0
        } else {
            (0.5 * self.blend(n, bars_ago, &high, &low)).min(self.config.fallback_confidence_cap)
        };
        debug!(
            high = %high.price,
            low = %low.price,
            confidence,
            "No qualifying fractal pair, using window extremes"
        );

        SwingAnalysis {
            swing_high: high,
            swing_low: low,
            bars_ago,
            confidence,
            fallback: true,
        }
    }
}

fn average_volume(candles: &[Candle]) -> f64 {
    indicators::mean(&indicators::volumes(candles)).unwrap_or(0.0)
}
