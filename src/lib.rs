//! Position Guard: adaptive risk monitoring for open positions
//!
//! This is the root crate that provides benchmark and integration-test access
//! to the internal crates. For actual functionality, use them directly:
//!
//! - `guard-core`: Core types, collaborator traits, market-data client, ledgers
//! - `risk-manager`: Swing detection, protective levels, risk assessment
//! - `trading-engine`: Position lifecycle, exit execution, scheduler
//! - `guard-monitor`: The monitoring binary

// Re-export for benchmarks
pub use guard_core as core;
pub use risk_manager as risk;
pub use trading_engine as trading;
