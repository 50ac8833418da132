//! Guard Core Library
//!
//! Shared types, collaborator interfaces (market data, trade ledger), and
//! persistence for the position guard.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod types;

pub use api::MarketData;
pub use db::TradeLedger;
pub use error::{Error, Result};
