//! PostgreSQL-backed trade ledger.

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use super::TradeLedger;
use crate::types::{ActiveLevels, ExitReason, Position, RiskAssessment, Side};
use crate::{Error, Result};

/// Repository for guarded positions and their assessment history.
pub struct PgTradeLedger {
    pool: PgPool,
}

impl PgTradeLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn side_code(side: Side) -> i16 {
        match side {
            Side::Long => 0,
            Side::Short => 1,
        }
    }

    async fn upsert(&self, position: &Position, close_reason: Option<ExitReason>) -> Result<()> {
        let levels_json = position
            .levels
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO guarded_positions (
                id, symbol, side, entry_price, entry_time, notional, levels,
                remaining_fraction, realized_pnl, fees_paid, peak_profit_pct,
                state, exit_time, close_reason, last_updated
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            ON CONFLICT (id) DO UPDATE SET
                levels = EXCLUDED.levels,
                remaining_fraction = EXCLUDED.remaining_fraction,
                realized_pnl = EXCLUDED.realized_pnl,
                fees_paid = EXCLUDED.fees_paid,
                peak_profit_pct = EXCLUDED.peak_profit_pct,
                state = EXCLUDED.state,
                exit_time = EXCLUDED.exit_time,
                close_reason = COALESCE(EXCLUDED.close_reason, guarded_positions.close_reason),
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(position.id)
        .bind(&position.symbol)
        .bind(Self::side_code(position.side))
        .bind(position.entry_price)
        .bind(position.entry_time)
        .bind(position.notional)
        .bind(levels_json)
        .bind(position.remaining_fraction)
        .bind(position.realized_pnl)
        .bind(position.fees_paid)
        .bind(position.peak_profit_pct)
        .bind(position.state.as_str())
        .bind(position.exit_time)
        .bind(close_reason.map(|r| r.to_string()))
        .bind(position.last_updated)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Convert a database row to a Position.
    #[allow(clippy::result_large_err)]
    fn row_to_position(r: &sqlx::postgres::PgRow) -> Result<Position> {
        let levels: Option<ActiveLevels> = r
            .try_get::<Option<String>, _>("levels")?
            .map(|s| serde_json::from_str(&s))
            .transpose()?;

        let side = match r.try_get::<i16, _>("side")? {
            0 => Side::Long,
            1 => Side::Short,
            other => return Err(Error::Ledger(format!("unknown side code {}", other))),
        };

        Ok(Position {
            id: r.try_get("id")?,
            symbol: r.try_get("symbol")?,
            side,
            entry_price: r.try_get("entry_price")?,
            entry_time: r.try_get("entry_time")?,
            notional: r.try_get("notional")?,
            levels,
            remaining_fraction: r.try_get("remaining_fraction")?,
            realized_pnl: r.try_get("realized_pnl")?,
            fees_paid: r.try_get("fees_paid")?,
            peak_profit_pct: r.try_get("peak_profit_pct")?,
            state: r.try_get::<String, _>("state")?.parse()?,
            exit_time: r.try_get("exit_time")?,
            last_updated: r.try_get("last_updated")?,
        })
    }

    /// Full audit trail for a position, oldest first.
    pub async fn assessments_for(&self, position_id: Uuid) -> Result<Vec<RiskAssessment>> {
        let rows = sqlx::query(
            r#"
            SELECT assessment
            FROM risk_assessments
            WHERE position_id = $1
            ORDER BY assessed_at ASC
            "#,
        )
        .bind(position_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| -> Result<RiskAssessment> {
                let raw: String = r.try_get("assessment")?;
                Ok(serde_json::from_str(&raw)?)
            })
            .collect()
    }
}

#[async_trait]
impl TradeLedger for PgTradeLedger {
    async fn record_open(&self, position: &Position) -> Result<()> {
        self.upsert(position, None).await
    }

    async fn record_update(&self, position: &Position) -> Result<()> {
        self.upsert(position, None).await
    }

    async fn record_close(&self, position: &Position, reason: ExitReason) -> Result<()> {
        self.upsert(position, Some(reason)).await
    }

    async fn record_assessment(&self, position_id: Uuid, assessment: &RiskAssessment) -> Result<()> {
        let raw = serde_json::to_string(assessment)?;

        sqlx::query(
            r#"
            INSERT INTO risk_assessments (
                position_id, assessed_at, composite_score, risk_level, action,
                suggested_stop, reasoning, assessment
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (position_id, assessed_at) DO NOTHING
            "#,
        )
        .bind(position_id)
        .bind(assessment.timestamp)
        .bind(assessment.composite_score)
        .bind(assessment.risk_level.as_str())
        .bind(assessment.action.as_str())
        .bind(assessment.suggested_stop)
        .bind(&assessment.reasoning)
        .bind(raw)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let rows = sqlx::query(
            r#"
            SELECT
                id, symbol, side, entry_price, entry_time, notional, levels,
                remaining_fraction, realized_pnl, fees_paid, peak_profit_pct,
                state, exit_time, last_updated
            FROM guarded_positions
            WHERE state = 'open'
            ORDER BY entry_time ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_position).collect()
    }
}
