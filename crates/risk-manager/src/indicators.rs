//! Technical indicators used by the swing detector, level calculator and
//! risk factors.
//!
//! Price-level math (ATR feeding stop distances) stays in `Decimal`; the
//! oscillators feeding 0-100 scores work on `f64` series with `NaN` warmup.

use guard_core::types::Candle;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

/// Average True Range: simple mean of the last `period` true ranges.
///
/// Needs `period + 1` candles so every true range has a previous close.
pub fn atr(candles: &[Candle], period: usize) -> Option<Decimal> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let start = candles.len() - period;
    let sum: Decimal = (start..candles.len())
        .map(|i| candles[i].true_range(Some(candles[i - 1].close)))
        .sum();
    Some(sum / Decimal::from(period))
}

/// ATR over the window ending at (and including) `index`.
pub fn atr_at(candles: &[Candle], index: usize, period: usize) -> Option<Decimal> {
    if index >= candles.len() {
        return None;
    }
    atr(&candles[..=index], period)
}

/// Rolling ATR series (same simple-mean definition), `NaN` during warmup.
pub fn atr_series(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < period + 1 {
        return result;
    }
    let tr: Vec<f64> = (0..n)
        .map(|i| {
            let prev = if i == 0 { None } else { Some(candles[i - 1].close) };
            to_f64(candles[i].true_range(prev))
        })
        .collect();

    let mut window: f64 = tr[1..=period].iter().sum();
    result[period] = window / period as f64;
    for i in (period + 1)..n {
        window += tr[i] - tr[i - period];
        result[i] = window / period as f64;
    }
    result
}

pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| to_f64(c.close)).collect()
}

pub fn volumes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| to_f64(c.volume)).collect()
}

/// Mean of the finite values in a slice.
pub fn mean(data: &[f64]) -> Option<f64> {
    let finite: Vec<f64> = data.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    Some(finite.iter().sum::<f64>() / finite.len() as f64)
}

/// Relative Strength Index with Wilder smoothing, `NaN` during warmup.
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    let n = data.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || n < 2 || period >= n {
        return result;
    }

    let mut gains = vec![0.0; n];
    let mut losses = vec![0.0; n];
    for i in 1..n {
        let change = data[i] - data[i - 1];
        if change > 0.0 {
            gains[i] = change;
        } else {
            losses[i] = -change;
        }
    }

    let rsi_from = |avg_gain: f64, avg_loss: f64| {
        if avg_loss == 0.0 {
            if avg_gain == 0.0 {
                50.0
            } else {
                100.0
            }
        } else {
            100.0 - 100.0 / (1.0 + avg_gain / avg_loss)
        }
    };

    let mut avg_gain: f64 = gains[1..=period].iter().sum::<f64>() / period as f64;
    let mut avg_loss: f64 = losses[1..=period].iter().sum::<f64>() / period as f64;
    result[period] = rsi_from(avg_gain, avg_loss);

    let alpha = 1.0 / period as f64;
    for i in (period + 1)..n {
        avg_gain = alpha * gains[i] + (1.0 - alpha) * avg_gain;
        avg_loss = alpha * losses[i] + (1.0 - alpha) * avg_loss;
        result[i] = rsi_from(avg_gain, avg_loss);
    }
    result
}

/// Average Directional Index (trend strength, 0-100), `NaN` during warmup.
///
/// Needs `2 * period` candles before the first value.
pub fn adx(candles: &[Candle], period: usize) -> Vec<f64> {
    let n = candles.len();
    let mut result = vec![f64::NAN; n];
    if period == 0 || 2 * period > n {
        return result;
    }

    let high: Vec<f64> = candles.iter().map(|c| to_f64(c.high)).collect();
    let low: Vec<f64> = candles.iter().map(|c| to_f64(c.low)).collect();
    let close = closes(candles);

    let mut plus_dm = vec![0.0; n];
    let mut minus_dm = vec![0.0; n];
    let mut tr = vec![0.0; n];
    for i in 1..n {
        let up_move = high[i] - high[i - 1];
        let down_move = low[i - 1] - low[i];
        if up_move > down_move && up_move > 0.0 {
            plus_dm[i] = up_move;
        }
        if down_move > up_move && down_move > 0.0 {
            minus_dm[i] = down_move;
        }
        let hl = high[i] - low[i];
        let hc = (high[i] - close[i - 1]).abs();
        let lc = (low[i] - close[i - 1]).abs();
        tr[i] = hl.max(hc).max(lc);
    }

    let p = period as f64;
    let mut s_plus: f64 = plus_dm[1..=period].iter().sum();
    let mut s_minus: f64 = minus_dm[1..=period].iter().sum();
    let mut s_tr: f64 = tr[1..=period].iter().sum();

    let mut dx = vec![0.0; n];
    for i in period..n {
        if i > period {
            s_plus = s_plus - s_plus / p + plus_dm[i];
            s_minus = s_minus - s_minus / p + minus_dm[i];
            s_tr = s_tr - s_tr / p + tr[i];
        }
        if s_tr > 0.0 {
            let plus_di = 100.0 * s_plus / s_tr;
            let minus_di = 100.0 * s_minus / s_tr;
            let di_sum = plus_di + minus_di;
            if di_sum > 0.0 {
                dx[i] = 100.0 * (plus_di - minus_di).abs() / di_sum;
            }
        }
    }

    let adx_start = 2 * period - 1;
    if adx_start < n {
        result[adx_start] = dx[period..=adx_start].iter().sum::<f64>() / p;
        for i in (adx_start + 1)..n {
            result[i] = (result[i - 1] * (p - 1.0) + dx[i]) / p;
        }
    }
    result
}
