//! Trade-ledger collaborator and its storage backends.

pub mod memory;
pub mod positions;

pub use memory::InMemoryLedger;
pub use positions::PgTradeLedger;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::path::Path;
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::types::{ExitReason, Position, RiskAssessment};
use crate::{Error, Result};

/// Durable record of positions and their assessment audit trail.
///
/// Append/update-only while a position is open.
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait TradeLedger: Send + Sync {
    async fn record_open(&self, position: &Position) -> Result<()>;

    /// Persist current levels, remaining fraction and P&L.
    async fn record_update(&self, position: &Position) -> Result<()>;

    async fn record_close(&self, position: &Position, reason: ExitReason) -> Result<()>;

    /// Append one audit row keyed by (position id, assessment timestamp).
    async fn record_assessment(&self, position_id: Uuid, assessment: &RiskAssessment) -> Result<()>;

    async fn open_positions(&self) -> Result<Vec<Position>>;
}

/// Create a PostgreSQL connection pool.
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool> {
    let url = config.url.as_deref().ok_or_else(|| Error::Config {
        message: "DATABASE_URL not set".to_string(),
    })?;
    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .connect(url)
        .await?;

    Ok(pool)
}

/// Run database migrations from the migrations directory.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    let migrator = sqlx::migrate::Migrator::new(Path::new("./migrations")).await?;
    migrator.run(pool).await?;
    Ok(())
}
