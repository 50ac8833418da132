//! The seven risk factors. Each returns a score capped to 0-100.

use guard_core::types::{Candle, Side, SwingKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::indicators::{self, to_f64};
use crate::swing::SwingDetector;

const ATR_PERIOD: usize = 14;
const ATR_AVERAGE_BARS: usize = 20;
const VOLUME_AVERAGE_BARS: usize = 20;
const VOLUME_SPIKE_RATIO: f64 = 3.0;
const DECLINE_BARS: usize = 5;
const ADX_PERIOD: usize = 14;
const ADX_LOOKBACK: usize = 5;
const ADX_STRONG: f64 = 25.0;
const ADX_DROP: f64 = 8.0;
const RSI_PERIOD: usize = 14;
const DIVERGENCE_BARS: usize = 10;
const STRUCTURE_LOOKBACK: usize = 30;

/// What counts as a broken support/resistance level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakConfirmation {
    /// The latest bar's extreme (or the live price) beyond the level suffices.
    #[default]
    Wick,
    /// Only the latest close counts.
    Close,
}

/// Market and position state a factor may look at.
#[derive(Debug, Clone, Copy)]
pub struct FactorContext<'a> {
    pub candles: &'a [Candle],
    pub side: Side,
    pub price: Decimal,
    pub stop_loss: Option<Decimal>,
    pub hours_open: i64,
    pub pnl_pct: Decimal,
    pub peak_profit_pct: Decimal,
}

/// Reference-asset correlation risk. The default implementation scores 0.
pub trait CorrelationFactor: Send + Sync {
    fn score(&self, ctx: &FactorContext<'_>) -> f64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoCorrelation;

impl CorrelationFactor for NoCorrelation {
    fn score(&self, _ctx: &FactorContext<'_>) -> f64 {
        0.0
    }
}

fn cap(score: f64) -> f64 {
    score.clamp(0.0, 100.0)
}

/// Volatility spike, stop proximity, reversal candles, weakening structure.
pub fn price_action(ctx: &FactorContext<'_>) -> f64 {
    let candles = ctx.candles;
    let mut score = 0.0;

    let atrs: Vec<f64> = indicators::atr_series(candles, ATR_PERIOD)
        .into_iter()
        .filter(|v| v.is_finite())
        .collect();
    if let Some(&current) = atrs.last() {
        let recent = &atrs[atrs.len().saturating_sub(ATR_AVERAGE_BARS)..];
        if let Some(avg) = indicators::mean(recent).filter(|a| *a > 0.0) {
            score += ((current / avg - 1.0) * 20.0).clamp(0.0, 20.0);
        }
    }

    if let Some(stop) = ctx.stop_loss {
        if ctx.price > Decimal::ZERO {
            let room = (ctx.price - stop) * ctx.side.direction() / ctx.price * Decimal::ONE_HUNDRED;
            if room < Decimal::new(5, 1) {
                score += 40.0;
            } else if room < Decimal::ONE {
                score += 20.0;
            }
        }
    }

    if let [.., prev, last] = candles {
        score += reversal_pattern(ctx.side, prev, last);
    }

    if candles.len() >= 6 {
        let recent = &candles[candles.len() - 3..];
        let prior = &candles[candles.len() - 6..candles.len() - 3];
        let weakening = match ctx.side {
            Side::Long => matches!((max_high(recent), max_high(prior)), (Some(r), Some(p)) if r < p),
            Side::Short => matches!((min_low(recent), min_low(prior)), (Some(r), Some(p)) if r > p),
        };
        if weakening {
            score += 10.0;
        }
    }

    cap(score)
}

fn max_high(candles: &[Candle]) -> Option<Decimal> {
    candles.iter().map(|c| c.high).max()
}

fn min_low(candles: &[Candle]) -> Option<Decimal> {
    candles.iter().map(|c| c.low).min()
}

/// Engulfing against the position scores 15, a rejection wick 10.
fn reversal_pattern(side: Side, prev: &Candle, last: &Candle) -> f64 {
    let engulfing = match side {
        Side::Long => {
            prev.is_bullish() && last.is_bearish() && last.open >= prev.close && last.close <= prev.open
        }
        Side::Short => {
            prev.is_bearish() && last.is_bullish() && last.open <= prev.close && last.close >= prev.open
        }
    };
    if engulfing && last.body() > prev.body() {
        return 15.0;
    }

    let body = last.body();
    let two = Decimal::TWO;
    let wick = match side {
        // Shooting star
        Side::Long => last.upper_wick() >= two * body && last.upper_wick() > two * last.lower_wick(),
        // Hammer
        Side::Short => last.lower_wick() >= two * body && last.lower_wick() > two * last.upper_wick(),
    };
    if wick && last.range() > Decimal::ZERO {
        10.0
    } else {
        0.0
    }
}

/// Adverse volume spike and fading participation.
pub fn volume(ctx: &FactorContext<'_>) -> f64 {
    let candles = ctx.candles;
    let volumes = indicators::volumes(candles);
    let n = volumes.len();
    let mut score = 0.0;

    if n > VOLUME_AVERAGE_BARS {
        let prior = &volumes[n - 1 - VOLUME_AVERAGE_BARS..n - 1];
        if let Some(avg) = indicators::mean(prior).filter(|a| *a > 0.0) {
            let last = &candles[n - 1];
            if volumes[n - 1] > VOLUME_SPIKE_RATIO * avg && ctx.side.is_adverse(last) {
                score += 30.0;
            }
        }
    }

    if n >= DECLINE_BARS && volumes[n - DECLINE_BARS..].windows(2).all(|w| w[1] < w[0]) {
        score += 15.0;
    }

    cap(score)
}

/// Collapsing trend strength, adverse momentum extreme, and divergence.
pub fn regime_change(ctx: &FactorContext<'_>) -> f64 {
    let candles = ctx.candles;
    let n = candles.len();
    let mut score = 0.0;

    let adx = indicators::adx(candles, ADX_PERIOD);
    if n > ADX_LOOKBACK {
        let now = adx[n - 1];
        let before = adx[n - 1 - ADX_LOOKBACK];
        if before.is_finite() && now.is_finite() && before >= ADX_STRONG && now <= before - ADX_DROP {
            score += 30.0;
        }
    }

    let closes = indicators::closes(candles);
    let rsi = indicators::rsi(&closes, RSI_PERIOD);
    if let Some(&current) = rsi.last().filter(|v| v.is_finite()) {
        let extreme = match ctx.side {
            Side::Long => current >= 70.0,
            Side::Short => current <= 30.0,
        };
        if extreme {
            score += 25.0;
        }

        if n > DIVERGENCE_BARS {
            let window = n - DIVERGENCE_BARS..n - 1;
            let prior_closes = &closes[window.clone()];
            let prior_rsi: Vec<f64> = rsi[window].iter().copied().filter(|v| v.is_finite()).collect();
            let last_close = closes[n - 1];
            if !prior_rsi.is_empty() {
                let diverging = match ctx.side {
                    Side::Long => {
                        let price_high = prior_closes.iter().all(|c| last_close > *c);
                        price_high && current < prior_rsi.iter().copied().fold(f64::MIN, f64::max)
                    }
                    Side::Short => {
                        let price_low = prior_closes.iter().all(|c| last_close < *c);
                        price_low && current > prior_rsi.iter().copied().fold(f64::MAX, f64::min)
                    }
                };
                if diverging {
                    score += 20.0;
                }
            }
        }
    }

    cap(score)
}

/// Structural level the position leans on: the most recent confirmed fractal
/// low (LONG) or high (SHORT) in the lookback, else the lookback extreme. The
/// latest bar is excluded so it can be measured against the level.
pub fn structural_level(candles: &[Candle], side: Side, detector: &SwingDetector) -> Option<Decimal> {
    if candles.len() < 2 {
        return None;
    }
    let end = candles.len() - 1;
    let window = &candles[end.saturating_sub(STRUCTURE_LOOKBACK)..end];
    let wanted = match side {
        Side::Long => SwingKind::Low,
        Side::Short => SwingKind::High,
    };
    detector
        .fractals(window)
        .into_iter()
        .find(|p| p.kind == wanted)
        .map(|p| p.price)
        .or_else(|| match side {
            Side::Long => window.iter().map(|c| c.low).min(),
            Side::Short => window.iter().map(|c| c.high).max(),
        })
}

/// Level broken by 1% or more scores 40; being tested scores 20.
pub fn support_resistance(ctx: &FactorContext<'_>, detector: &SwingDetector, policy: BreakConfirmation) -> f64 {
    let Some(last) = ctx.candles.last() else {
        return 0.0;
    };
    let Some(level) = structural_level(ctx.candles, ctx.side, detector) else {
        return 0.0;
    };
    if level <= Decimal::ZERO {
        return 0.0;
    }

    let probe = match (policy, ctx.side) {
        (BreakConfirmation::Wick, Side::Long) => last.low.min(ctx.price),
        (BreakConfirmation::Wick, Side::Short) => last.high.max(ctx.price),
        (BreakConfirmation::Close, _) => last.close,
    };
    // Positive when the probe is beyond the level against the position.
    let breach_pct = (level - probe) * ctx.side.direction() / level * Decimal::ONE_HUNDRED;

    if breach_pct >= Decimal::ONE {
        40.0
    } else if breach_pct > Decimal::ZERO || breach_pct.abs() <= Decimal::new(5, 1) {
        20.0
    } else {
        0.0
    }
}

/// Stale trades: open over a day without reaching 1% profit, or over three days.
pub fn time_decay(ctx: &FactorContext<'_>) -> f64 {
    let mut score = 0.0;
    if ctx.hours_open > 24 && ctx.peak_profit_pct < Decimal::ONE {
        score += 20.0;
    }
    if ctx.hours_open > 72 {
        score += 15.0;
    }
    cap(score)
}

/// Giveback from the best unrealized profit reached.
pub fn drawdown(ctx: &FactorContext<'_>) -> f64 {
    let peak = ctx.peak_profit_pct.max(ctx.pnl_pct);
    let giveback = to_f64(peak - ctx.pnl_pct);
    if giveback >= 5.0 {
        50.0
    } else if giveback >= 3.0 {
        30.0
    } else if giveback >= 1.5 {
        15.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::test_support::{candles, from_closes};
    use rust_decimal_macros::dec;

    fn ctx<'a>(candles: &'a [Candle], side: Side, price: Decimal) -> FactorContext<'a> {
        FactorContext {
            candles,
            side,
            price,
            stop_loss: None,
            hours_open: 1,
            pnl_pct: Decimal::ZERO,
            peak_profit_pct: Decimal::ZERO,
        }
    }

    #[test]
    fn test_time_decay_stacks() {
        let bars = from_closes(&[100.0; 5], 0.5, 10.0);
        let mut c = ctx(&bars, Side::Long, dec!(100));
        c.hours_open = 80;
        c.peak_profit_pct = dec!(0.5);
        assert_eq!(time_decay(&c), 35.0);

        c.peak_profit_pct = dec!(2);
        assert_eq!(time_decay(&c), 15.0);

        c.hours_open = 30;
        c.peak_profit_pct = dec!(0.5);
        assert_eq!(time_decay(&c), 20.0);
    }

    #[test]
    fn test_drawdown_thresholds() {
        let bars = from_closes(&[100.0; 5], 0.5, 10.0);
        let mut c = ctx(&bars, Side::Long, dec!(100));
        c.peak_profit_pct = dec!(6);
        c.pnl_pct = dec!(0.5);
        assert_eq!(drawdown(&c), 50.0);
        c.pnl_pct = dec!(2.5);
        assert_eq!(drawdown(&c), 30.0);
        c.pnl_pct = dec!(4.5);
        assert_eq!(drawdown(&c), 15.0);
        c.pnl_pct = dec!(5.5);
        assert_eq!(drawdown(&c), 0.0);
        // Current above recorded peak counts as the peak
        c.pnl_pct = dec!(8);
        assert_eq!(drawdown(&c), 0.0);
    }

    #[test]
    fn test_stop_proximity() {
        let bars = from_closes(&[100.0; 30], 0.5, 10.0);
        let mut c = ctx(&bars, Side::Long, dec!(100));
        c.stop_loss = Some(dec!(99.7));
        assert_eq!(price_action(&c), 40.0);
        c.stop_loss = Some(dec!(99.2));
        assert_eq!(price_action(&c), 20.0);
        c.stop_loss = Some(dec!(95));
        assert_eq!(price_action(&c), 0.0);
    }

    #[test]
    fn test_lower_highs_weaken_long_structure() {
        let mut rows = vec![(100.0, 100.5, 99.5, 100.0, 10.0); 27];
        rows.extend([(100.0, 100.3, 99.5, 100.0, 10.0); 3]);
        let bars = candles(&rows);
        assert_eq!(price_action(&ctx(&bars, Side::Long, dec!(100))), 10.0);
        assert_eq!(price_action(&ctx(&bars, Side::Short, dec!(100))), 0.0);
    }

    #[test]
    fn test_extremes_of_empty_window() {
        assert_eq!(max_high(&[]), None);
        assert_eq!(min_low(&[]), None);
        let bars = candles(&[(100.0, 101.0, 99.0, 100.0, 1.0), (100.0, 102.0, 98.5, 101.0, 1.0)]);
        assert_eq!(max_high(&bars), Some(dec!(102)));
        assert_eq!(min_low(&bars), Some(dec!(98.5)));
    }

    #[test]
    fn test_bearish_engulfing_hits_long_only() {
        let mut rows = vec![(100.0, 100.5, 99.5, 100.0, 10.0); 10];
        rows.push((100.0, 101.2, 99.8, 101.0, 10.0));
        rows.push((101.2, 101.4, 99.0, 99.5, 10.0));
        let bars = candles(&rows);
        assert_eq!(reversal_pattern(Side::Long, &bars[10], &bars[11]), 15.0);
        assert_eq!(reversal_pattern(Side::Short, &bars[10], &bars[11]), 0.0);
    }

    #[test]
    fn test_shooting_star() {
        let bars = candles(&[(100.0, 100.5, 99.5, 100.0, 1.0), (100.0, 103.0, 99.9, 100.2, 1.0)]);
        assert_eq!(reversal_pattern(Side::Long, &bars[0], &bars[1]), 10.0);
    }

    #[test]
    fn test_volume_spike_on_adverse_candle() {
        let mut rows = vec![(100.0, 100.5, 99.5, 100.0, 10.0); 25];
        rows.push((100.0, 100.2, 98.0, 98.5, 50.0));
        let bars = candles(&rows);
        assert_eq!(volume(&ctx(&bars, Side::Long, dec!(98.5))), 30.0);
        // Bearish bar is favourable for a short
        assert_eq!(volume(&ctx(&bars, Side::Short, dec!(98.5))), 0.0);
    }

    #[test]
    fn test_declining_volume() {
        let mut rows = vec![(100.0, 100.5, 99.5, 100.0, 10.0); 20];
        for v in [50.0, 40.0, 30.0, 20.0, 10.0] {
            rows.push((100.0, 100.5, 99.5, 100.0, v));
        }
        let bars = candles(&rows);
        assert_eq!(volume(&ctx(&bars, Side::Long, dec!(100))), 15.0);
    }

    #[test]
    fn test_overbought_rsi_is_adverse_for_long() {
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let bars = from_closes(&closes, 0.5, 10.0);
        let long = regime_change(&ctx(&bars, Side::Long, dec!(139)));
        let short = regime_change(&ctx(&bars, Side::Short, dec!(139)));
        assert!(long >= 25.0);
        assert_eq!(short, 0.0);
    }

    #[test]
    fn test_support_break_policies() {
        let mut rows = vec![(100.0, 100.5, 99.5, 100.0, 10.0); 40];
        rows[30] = (100.0, 100.5, 98.0, 100.0, 10.0);
        // Latest bar wicks 1.5% through the 98 fractal low, closes above it
        rows.push((99.0, 99.2, 96.5, 98.3, 10.0));
        let bars = candles(&rows);
        let detector = SwingDetector::default();

        assert_eq!(structural_level(&bars, Side::Long, &detector), Some(dec!(98)));
        let c = ctx(&bars, Side::Long, dec!(98.3));
        assert_eq!(support_resistance(&c, &detector, BreakConfirmation::Wick), 40.0);
        assert_eq!(support_resistance(&c, &detector, BreakConfirmation::Close), 20.0);
    }

    #[test]
    fn test_level_far_away_scores_zero() {
        let mut rows = vec![(100.0, 100.5, 99.5, 100.0, 10.0); 40];
        rows[30] = (100.0, 100.5, 90.0, 100.0, 10.0);
        rows.push((100.0, 100.5, 99.5, 100.0, 10.0));
        let bars = candles(&rows);
        let c = ctx(&bars, Side::Long, dec!(100));
        assert_eq!(support_resistance(&c, &SwingDetector::default(), BreakConfirmation::Wick), 0.0);
    }

    #[test]
    fn test_no_correlation_is_zero() {
        let bars = from_closes(&[100.0; 5], 0.5, 10.0);
        assert_eq!(NoCorrelation.score(&ctx(&bars, Side::Long, dec!(100))), 0.0);
    }
}
