//! Core domain types for the position guard.

pub mod assessment;
pub mod candle;
pub mod levels;
pub mod order;
pub mod position;

pub use assessment::*;
pub use candle::*;
pub use levels::*;
pub use order::*;
pub use position::*;
