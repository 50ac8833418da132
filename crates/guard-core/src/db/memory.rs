//! In-process ledger for paper trading and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::TradeLedger;
use crate::types::{ExitReason, Position, RiskAssessment};
use crate::Result;

/// Ledger held in memory; contents are lost on restart.
#[derive(Default)]
pub struct InMemoryLedger {
    positions: DashMap<Uuid, Position>,
    close_reasons: DashMap<Uuid, ExitReason>,
    assessments: DashMap<Uuid, Vec<RiskAssessment>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self, id: Uuid) -> Option<Position> {
        self.positions.get(&id).map(|p| p.clone())
    }

    pub fn assessments_for(&self, id: Uuid) -> Vec<RiskAssessment> {
        self.assessments.get(&id).map(|a| a.clone()).unwrap_or_default()
    }

    pub fn close_reason(&self, id: Uuid) -> Option<ExitReason> {
        self.close_reasons.get(&id).map(|r| *r)
    }
}

#[async_trait]
impl TradeLedger for InMemoryLedger {
    async fn record_open(&self, position: &Position) -> Result<()> {
        self.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn record_update(&self, position: &Position) -> Result<()> {
        self.positions.insert(position.id, position.clone());
        Ok(())
    }

    async fn record_close(&self, position: &Position, reason: ExitReason) -> Result<()> {
        self.positions.insert(position.id, position.clone());
        self.close_reasons.insert(position.id, reason);
        Ok(())
    }

    async fn record_assessment(&self, position_id: Uuid, assessment: &RiskAssessment) -> Result<()> {
        self.assessments
            .entry(position_id)
            .or_default()
            .push(assessment.clone());
        Ok(())
    }

    async fn open_positions(&self) -> Result<Vec<Position>> {
        let mut open: Vec<Position> = self
            .positions
            .iter()
            .filter(|e| e.value().is_open())
            .map(|e| e.value().clone())
            .collect();
        open.sort_by_key(|p| p.entry_time);
        Ok(open)
    }
}
