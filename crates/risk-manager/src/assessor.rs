//! Multi-factor risk assessment and the HOLD / ADJUST_SL / CLOSE_NOW decision.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use guard_core::types::{Candle, FactorScores, Position, RiskAction, RiskAssessment, RiskLevel};
use guard_core::{Error, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::factors::{self, BreakConfirmation, CorrelationFactor, FactorContext, NoCorrelation};
use crate::indicators;
use crate::stops::StopStepConfig;
use crate::swing::{SwingConfig, SwingDetector};

/// Composite weights, one per factor. Must sum to 1.0.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub price_action: f64,
    pub volume: f64,
    pub regime_change: f64,
    pub support_resistance: f64,
    pub time_decay: f64,
    pub correlation: f64,
    pub drawdown: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            price_action: 0.25,
            volume: 0.15,
            regime_change: 0.20,
            support_resistance: 0.20,
            time_decay: 0.05,
            correlation: 0.05,
            drawdown: 0.10,
        }
    }
}

impl RiskWeights {
    fn as_array(&self) -> [f64; 7] {
        [
            self.price_action,
            self.volume,
            self.regime_change,
            self.support_resistance,
            self.time_decay,
            self.correlation,
            self.drawdown,
        ]
    }

    #[allow(clippy::result_large_err)]
    pub fn validate(&self) -> Result<()> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(Error::Config {
                message: "risk weights must be finite and non-negative".to_string(),
            });
        }
        let sum: f64 = weights.iter().sum();
        if (sum - 1.0).abs() > 1e-9 {
            return Err(Error::Config {
                message: format!("risk weights sum to {sum}, expected 1.0"),
            });
        }
        Ok(())
    }

    /// Weighted composite, clamped to 0-100. Sub-scores are capped first.
    pub fn composite(&self, scores: &FactorScores) -> f64 {
        let total: f64 = scores
            .named()
            .iter()
            .zip(self.as_array())
            .map(|((_, s), w)| s.clamp(0.0, 100.0) * w)
            .sum();
        total.clamp(0.0, 100.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AssessorConfig {
    pub weights: RiskWeights,
    pub break_confirmation: BreakConfirmation,
    /// Composite at or above this is MODERATE.
    pub moderate_threshold: f64,
    /// Composite at or above this is HIGH.
    pub high_threshold: f64,
    /// MODERATE risk with profit above this tightens the stop.
    pub adjust_profit_pct: Decimal,
    /// LOW risk with profit at or above this proposes a trailing stop.
    pub trail_profit_pct: Decimal,
    /// Factors above this are named in CLOSE_NOW reasoning.
    pub reasoning_factor_threshold: f64,
    pub atr_period: usize,
    pub swing: SwingConfig,
    pub stops: StopStepConfig,
}

impl Default for AssessorConfig {
    fn default() -> Self {
        Self {
            weights: RiskWeights::default(),
            break_confirmation: BreakConfirmation::default(),
            moderate_threshold: 30.0,
            high_threshold: 60.0,
            adjust_profit_pct: Decimal::new(2, 0),
            trail_profit_pct: Decimal::ONE,
            reasoning_factor_threshold: 50.0,
            atr_period: 14,
            swing: SwingConfig::default(),
            stops: StopStepConfig::default(),
        }
    }
}

impl AssessorConfig {
    pub fn classify(&self, composite: f64) -> RiskLevel {
        if composite >= self.high_threshold {
            RiskLevel::High
        } else if composite >= self.moderate_threshold {
            RiskLevel::Moderate
        } else {
            RiskLevel::Low
        }
    }
}

/// Stateless assessor. Identical inputs always produce an identical
/// assessment.
#[derive(Clone)]
pub struct RiskAssessor {
    config: AssessorConfig,
    detector: SwingDetector,
    correlation: Arc<dyn CorrelationFactor>,
}

impl Default for RiskAssessor {
    fn default() -> Self {
        Self::new(AssessorConfig::default())
    }
}

impl RiskAssessor {
    pub fn new(config: AssessorConfig) -> Self {
        Self {
            detector: SwingDetector::new(config.swing.clone()),
            config,
            correlation: Arc::new(NoCorrelation),
        }
    }

    /// Plug in a reference-asset correlation source.
    pub fn with_correlation(mut self, correlation: Arc<dyn CorrelationFactor>) -> Self {
        self.correlation = correlation;
        self
    }

    pub fn config(&self) -> &AssessorConfig {
        &self.config
    }

    /// Score every factor for a position at `price`.
    pub fn factors(&self, candles: &[Candle], position: &Position, price: Decimal, now: DateTime<Utc>) -> FactorScores {
        let ctx = FactorContext {
            candles,
            side: position.side,
            price,
            stop_loss: position.stop_loss(),
            hours_open: position.hours_open(now),
            pnl_pct: position.unrealized_pnl_pct(price),
            peak_profit_pct: position.peak_profit_pct,
        };
        FactorScores {
            price_action: factors::price_action(&ctx),
            volume: factors::volume(&ctx),
            regime_change: factors::regime_change(&ctx),
            support_resistance: factors::support_resistance(&ctx, &self.detector, self.config.break_confirmation),
            time_decay: factors::time_decay(&ctx),
            correlation: self.correlation.score(&ctx).clamp(0.0, 100.0),
            drawdown: factors::drawdown(&ctx),
        }
    }

    /// Full assessment from market data and position state.
    pub fn assess(&self, candles: &[Candle], position: &Position, price: Decimal, now: DateTime<Utc>) -> RiskAssessment {
        let scores = self.factors(candles, position, price, now);
        let atr = indicators::atr(candles, self.config.atr_period);
        self.decide(scores, position, price, atr, now)
    }

    /// Decision state machine over precomputed sub-scores.
    pub fn decide(
        &self,
        factors: FactorScores,
        position: &Position,
        price: Decimal,
        atr: Option<Decimal>,
        now: DateTime<Utc>,
    ) -> RiskAssessment {
        let composite = self.config.weights.composite(&factors);
        let level = self.config.classify(composite);
        let pnl_pct = position.unrealized_pnl_pct(price);
        let trailing = || {
            self.config.stops.trailing_candidate(
                position.entry_price,
                position.side,
                price,
                pnl_pct,
                atr,
                position.stop_loss(),
            )
        };

        let (action, suggested_stop, reasoning) = match level {
            RiskLevel::High => {
                let hot: Vec<String> = factors
                    .named()
                    .iter()
                    .filter(|(_, s)| *s > self.config.reasoning_factor_threshold)
                    .map(|(name, s)| format!("{name}={s:.1}"))
                    .collect();
                let detail = if hot.is_empty() {
                    "broad-based risk".to_string()
                } else {
                    hot.join(", ")
                };
                (
                    RiskAction::CloseNow,
                    None,
                    format!("HIGH risk ({composite:.1}): {detail}"),
                )
            }
            RiskLevel::Moderate if pnl_pct > self.config.adjust_profit_pct => {
                let stop = trailing();
                let reasoning = match stop {
                    Some(s) => format!(
                        "MODERATE risk ({composite:.1}) with {}% profit: tighten stop to {}",
                        pnl_pct.round_dp(2),
                        s.round_dp(8)
                    ),
                    None => format!(
                        "MODERATE risk ({composite:.1}) with {}% profit: lock in gains",
                        pnl_pct.round_dp(2)
                    ),
                };
                (RiskAction::AdjustSl, stop, reasoning)
            }
            RiskLevel::Moderate => (
                RiskAction::Hold,
                None,
                format!(
                    "MODERATE risk ({composite:.1}) at {}%: monitor closely",
                    pnl_pct.round_dp(2)
                ),
            ),
            RiskLevel::Low => {
                let stop = if pnl_pct >= self.config.trail_profit_pct {
                    trailing()
                } else {
                    None
                };
                let mut reasoning = format!("LOW risk ({composite:.1}): hold");
                if let Some(s) = stop {
                    reasoning.push_str(&format!(", optional trailing stop {}", s.round_dp(8)));
                }
                (RiskAction::Hold, stop, reasoning)
            }
        };

        debug!(
            symbol = %position.symbol,
            composite,
            level = %level,
            action = %action,
            "Assessment computed"
        );

        RiskAssessment {
            timestamp: now,
            composite_score: composite,
            factors,
            risk_level: level,
            action,
            reasoning,
            suggested_stop,
            price,
            unrealized_pnl_pct: pnl_pct,
        }
    }
}
