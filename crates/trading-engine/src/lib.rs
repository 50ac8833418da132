//! Trading Engine
//!
//! Position lifecycle management, exit execution with bounded retries, and the
//! periodic monitoring scheduler.

pub mod gateway;
pub mod lifecycle;
pub mod scheduler;

pub use gateway::{OrderGateway, PaperConfig, PaperGateway, RetryPolicy};
pub use lifecycle::{
    Escalation, LifecycleManager, ManagerConfig, ManagerStats, TakeProfitConfig, TickOutcome, TickSummary,
};
pub use scheduler::MonitorService;
