//! Risk Manager
//!
//! Swing detection, protective level calculation, and multi-factor risk
//! assessment for open positions.

pub mod assessor;
pub mod factors;
pub mod indicators;
pub mod levels;
pub mod stops;
pub mod swing;

pub use assessor::{AssessorConfig, RiskAssessor, RiskWeights};
pub use factors::{BreakConfirmation, CorrelationFactor, FactorContext, NoCorrelation};
pub use levels::{AtrTier, FibonacciGrid, LevelCalculator, LevelConfig, LevelInputs};
pub use stops::{StopStep, StopStepConfig};
pub use swing::{SwingAnalysis, SwingConfig, SwingDetector};
