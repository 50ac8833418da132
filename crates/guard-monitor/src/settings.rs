//! Algorithm settings layered from defaults, an optional TOML file, and
//! `GUARD__`-prefixed environment variables.

use std::path::Path;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use guard_core::config::load_layered;
use guard_core::types::Side;
use risk_manager::{AssessorConfig, LevelCalculator, LevelConfig, RiskAssessor, SwingDetector};
use rust_decimal::Decimal;
use serde::Deserialize;
use trading_engine::{PaperConfig, TakeProfitConfig};

pub const ENV_PREFIX: &str = "GUARD";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GuardSettings {
    pub levels: LevelConfig,
    pub assessor: AssessorConfig,
    pub take_profit: TakeProfitConfig,
    pub max_history: usize,
    /// Paper-fill slippage as a fraction of the live price.
    pub slippage: Decimal,
}

impl Default for GuardSettings {
    fn default() -> Self {
        Self {
            levels: LevelConfig::default(),
            assessor: AssessorConfig::default(),
            take_profit: TakeProfitConfig::default(),
            max_history: 100,
            slippage: PaperConfig::default().slippage,
        }
    }
}

impl GuardSettings {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let settings: Self = load_layered(path, ENV_PREFIX).context("loading guard settings")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.assessor.weights.validate()?;
        if self.assessor.moderate_threshold > self.assessor.high_threshold {
            bail!(
                "moderate threshold {} exceeds high threshold {}",
                self.assessor.moderate_threshold,
                self.assessor.high_threshold
            );
        }
        let tp = &self.take_profit;
        if tp.tp1_fraction <= Decimal::ZERO
            || tp.tp2_fraction <= Decimal::ZERO
            || tp.tp1_fraction + tp.tp2_fraction >= Decimal::ONE
        {
            bail!("take-profit fractions must be positive and leave a remainder for tp3");
        }
        if self.levels.tiers.windows(2).any(|w| w[0].below_pct >= w[1].below_pct) {
            bail!("ATR tiers must be ascending");
        }
        Ok(())
    }

    pub fn assessor(&self) -> RiskAssessor {
        RiskAssessor::new(self.assessor.clone())
    }

    pub fn level_calculator(&self) -> LevelCalculator {
        LevelCalculator::new(SwingDetector::new(self.assessor.swing.clone()), self.levels.clone())
    }
}

/// A position to open at startup: `SYMBOL:SIDE:NOTIONAL`.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenRequest {
    pub symbol: String,
    pub side: Side,
    pub notional: Decimal,
}

impl FromStr for OpenRequest {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(':').collect();
        let [symbol, side, notional] = parts.as_slice() else {
            bail!("expected SYMBOL:SIDE:NOTIONAL, got '{}'", s);
        };
        let notional = Decimal::from_str(notional).with_context(|| format!("invalid notional '{}'", notional))?;
        if notional <= Decimal::ZERO {
            bail!("notional must be positive, got {}", notional);
        }
        Ok(Self {
            symbol: symbol.to_ascii_uppercase(),
            side: side.parse()?,
            notional,
        })
    }
}
