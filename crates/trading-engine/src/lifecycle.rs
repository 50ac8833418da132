//! Position lifecycle manager.
//!
//! Owns the open positions. Each tick fetches fresh market data per position,
//! obtains a risk assessment, executes the resulting action and retires
//! closed positions. One position's failure never aborts the tick for others.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use guard_core::config::MonitorConfig;
use guard_core::types::{Candle, ExitReason, LevelSet, Position, RiskAction, RiskAssessment, Side};
use guard_core::{Error, MarketData, Result, TradeLedger};
use risk_manager::{LevelCalculator, RiskAssessor};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::gateway::{OrderGateway, RetryPolicy};

/// Portion of the ORIGINAL size closed at each take-profit stage. The last
/// stage closes whatever remains.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TakeProfitConfig {
    pub tp1_fraction: Decimal,
    pub tp2_fraction: Decimal,
    /// Move the stop to breakeven plus buffer once tp1 fills.
    pub breakeven_after_tp1: bool,
}

impl Default for TakeProfitConfig {
    fn default() -> Self {
        Self {
            tp1_fraction: Decimal::new(4, 1), // 40%
            tp2_fraction: Decimal::new(3, 1), // 30%
            breakeven_after_tp1: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub candle_interval: String,
    pub candle_count: usize,
    /// Bound on each market-data call.
    pub fetch_timeout_secs: u64,
    /// Positions processed concurrently within a tick.
    pub max_concurrency: usize,
    /// In-memory assessments kept per position.
    pub max_history: usize,
    pub max_close_retries: u32,
    pub retry_delay_ms: u64,
    /// Apply the assessor's trailing-stop proposal on LOW-risk holds.
    pub apply_trailing_on_hold: bool,
    pub take_profit: TakeProfitConfig,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from(&MonitorConfig::default())
    }
}

impl From<&MonitorConfig> for ManagerConfig {
    fn from(monitor: &MonitorConfig) -> Self {
        Self {
            candle_interval: monitor.candle_interval.clone(),
            candle_count: monitor.candle_count,
            fetch_timeout_secs: monitor.fetch_timeout_secs,
            max_concurrency: monitor.max_concurrency,
            max_history: 100,
            max_close_retries: monitor.max_close_retries,
            retry_delay_ms: monitor.retry_delay_ms,
            apply_trailing_on_hold: monitor.apply_trailing,
            take_profit: TakeProfitConfig::default(),
        }
    }
}

impl ManagerConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_close_retries.max(1),
            base_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }
}

/// A close that could not be executed. Sent to the operator channel; the
/// position stays open and is re-evaluated next tick.
#[derive(Debug, Clone)]
pub struct Escalation {
    pub position_id: Uuid,
    pub symbol: String,
    pub reason: ExitReason,
    pub quantity: Decimal,
    pub attempts: u32,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

/// What happened to one position during a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Market data unavailable; retried next tick.
    Skipped,
    /// No active levels; excluded until levels are attached.
    Excluded,
    Held,
    StopAdjusted,
    PartiallyClosed,
    Closed,
    Escalated,
    /// Removed from tracking while the tick ran.
    Gone,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: usize,
    pub skipped: usize,
    pub excluded: usize,
    pub adjusted: usize,
    pub partial_exits: usize,
    pub closed: usize,
    pub escalated: usize,
}

impl TickSummary {
    fn record(&mut self, outcome: TickOutcome) {
        self.processed += 1;
        match outcome {
            TickOutcome::Skipped => self.skipped += 1,
            TickOutcome::Excluded => self.excluded += 1,
            TickOutcome::StopAdjusted => self.adjusted += 1,
            TickOutcome::PartiallyClosed => self.partial_exits += 1,
            TickOutcome::Closed => self.closed += 1,
            TickOutcome::Escalated => self.escalated += 1,
            TickOutcome::Held | TickOutcome::Gone => {}
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManagerStats {
    pub tracked: usize,
    pub closed: usize,
    pub realized_pnl: Decimal,
    pub fees_paid: Decimal,
}

#[derive(Debug, Clone)]
struct TrackedPosition {
    position: Position,
    history: VecDeque<RiskAssessment>,
}

/// Result of one exit attempt.
enum ExitResult {
    Filled,
    Escalated,
}

pub struct LifecycleManager {
    config: ManagerConfig,
    market_data: Arc<dyn MarketData>,
    ledger: Arc<dyn TradeLedger>,
    gateway: Arc<dyn OrderGateway>,
    assessor: RiskAssessor,
    levels: LevelCalculator,
    /// Open positions keyed by symbol.
    positions: DashMap<String, TrackedPosition>,
    /// Retired positions keyed by id.
    closed: DashMap<Uuid, Position>,
    /// Serializes ticks and out-of-band mutations of tracked positions.
    tick_lock: Mutex<()>,
    escalation_tx: mpsc::Sender<Escalation>,
    escalation_rx: Option<mpsc::Receiver<Escalation>>,
}

impl LifecycleManager {
    pub fn new(
        config: ManagerConfig,
        market_data: Arc<dyn MarketData>,
        ledger: Arc<dyn TradeLedger>,
        gateway: Arc<dyn OrderGateway>,
    ) -> Self {
        let (escalation_tx, escalation_rx) = mpsc::channel(256);
        Self {
            config,
            market_data,
            ledger,
            gateway,
            assessor: RiskAssessor::default(),
            levels: LevelCalculator::default(),
            positions: DashMap::new(),
            closed: DashMap::new(),
            tick_lock: Mutex::new(()),
            escalation_tx,
            escalation_rx: Some(escalation_rx),
        }
    }

    pub fn with_assessor(mut self, assessor: RiskAssessor) -> Self {
        self.assessor = assessor;
        self
    }

    pub fn with_level_calculator(mut self, levels: LevelCalculator) -> Self {
        self.levels = levels;
        self
    }

    /// Take the escalation receiver (can only be called once).
    pub fn take_escalation_receiver(&mut self) -> Option<mpsc::Receiver<Escalation>> {
        self.escalation_rx.take()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Begin tracking a newly opened position.
    pub async fn start_monitoring(&self, position: Position) -> Result<()> {
        if !position.is_open() {
            return Err(Error::invalid_position(&position.symbol, "cannot monitor a closed position"));
        }
        if position.entry_price <= Decimal::ZERO || position.notional <= Decimal::ZERO {
            return Err(Error::invalid_position(
                &position.symbol,
                "entry price and notional must be positive",
            ));
        }

        let symbol = position.symbol.clone();
        match self.positions.entry(symbol.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => return Err(Error::DuplicatePosition(symbol)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(TrackedPosition {
                    position: position.clone(),
                    history: VecDeque::new(),
                });
            }
        }

        if let Err(e) = self.ledger.record_open(&position).await {
            self.positions.remove(&symbol);
            return Err(e);
        }

        match position.levels.as_ref() {
            Some(levels) => info!(
                symbol = %symbol,
                side = %position.side,
                entry = %position.entry_price,
                stop_loss = %levels.stop_loss,
                tp1 = %levels.level_set.tp1,
                "Started monitoring position"
            ),
            None => warn!(
                symbol = %symbol,
                "Started monitoring position without levels; excluded from automated action until attached"
            ),
        }
        Ok(())
    }

    /// Seed levels from fresh candles and start monitoring a new entry.
    pub async fn open_position(
        &self,
        symbol: &str,
        side: Side,
        entry_price: Decimal,
        notional: Decimal,
    ) -> Result<Position> {
        let candles = self.fetch_candles(symbol).await?;
        let level_set = self.levels.calculate(&candles, entry_price, side)?;
        let position = Position::new(symbol, side, entry_price, notional).with_levels(level_set);
        self.start_monitoring(position.clone()).await?;
        Ok(position)
    }

    /// Remove a position from tracking without closing it.
    pub async fn stop_monitoring(&self, symbol: &str) -> Result<Position> {
        let _guard = self.tick_lock.lock().await;
        let (_, tracked) = self
            .positions
            .remove(symbol)
            .ok_or_else(|| Error::NotTracked(symbol.to_string()))?;
        info!(symbol = %symbol, "Stopped monitoring position");
        Ok(tracked.position)
    }

    /// Operator-initiated close of the full remaining size.
    pub async fn close_manually(&self, symbol: &str) -> Result<Position> {
        let _guard = self.tick_lock.lock().await;
        let mut position = self.snapshot(symbol).ok_or_else(|| Error::NotTracked(symbol.to_string()))?;
        let fraction = position.remaining_fraction;
        match self.exit(&mut position, fraction, ExitReason::Manual, "manual close").await {
            ExitResult::Filled => {
                self.write_back(position.clone(), None);
                self.retire_closed();
                Ok(position)
            }
            ExitResult::Escalated => Err(Error::Execution {
                message: format!("manual close of {} failed; escalated", symbol),
            }),
        }
    }

    /// Attach (or supersede) the level set of a tracked position.
    pub async fn attach_levels(&self, symbol: &str, level_set: LevelSet) -> Result<()> {
        let _guard = self.tick_lock.lock().await;
        self.attach_levels_locked(symbol, level_set).await
    }

    async fn attach_levels_locked(&self, symbol: &str, level_set: LevelSet) -> Result<()> {
        let updated = {
            let mut tracked = self
                .positions
                .get_mut(symbol)
                .ok_or_else(|| Error::NotTracked(symbol.to_string()))?;
            if level_set.side != tracked.position.side {
                return Err(Error::invalid_position(symbol, "level set side does not match position"));
            }
            let before = tracked.position.stop_loss();
            tracked.position.attach_levels(level_set);
            info!(
                symbol = %symbol,
                stop_before = ?before,
                stop_after = ?tracked.position.stop_loss(),
                "Attached levels"
            );
            tracked.position.clone()
        };
        self.persist_update(&updated).await;
        Ok(())
    }

    /// Recompute levels from fresh candles. The stop only adopts the new value
    /// when it is more favorable.
    pub async fn reseed_levels(&self, symbol: &str) -> Result<LevelSet> {
        let _guard = self.tick_lock.lock().await;
        let position = self.snapshot(symbol).ok_or_else(|| Error::NotTracked(symbol.to_string()))?;
        let candles = self.fetch_candles(symbol).await?;
        let level_set = self.levels.calculate(&candles, position.entry_price, position.side)?;
        self.attach_levels_locked(symbol, level_set.clone()).await?;
        Ok(level_set)
    }

    /// Re-track the ledger's open positions. Returns how many were added.
    pub async fn restore_from_ledger(&self) -> Result<usize> {
        let open = self.ledger.open_positions().await?;
        let mut restored = 0;
        for position in open.into_iter().filter(|p| p.is_open()) {
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.positions.entry(position.symbol.clone()) {
                debug!(symbol = %position.symbol, id = %position.id, "Restored position from ledger");
                slot.insert(TrackedPosition {
                    position,
                    history: VecDeque::new(),
                });
                restored += 1;
            }
        }
        info!(restored, "Restored open positions from ledger");
        Ok(restored)
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.snapshot(symbol)
    }

    pub fn closed_position(&self, id: Uuid) -> Option<Position> {
        self.closed.get(&id).map(|p| p.clone())
    }

    /// Recent assessments for a tracked position, oldest first.
    pub fn history(&self, symbol: &str) -> Vec<RiskAssessment> {
        self.positions
            .get(symbol)
            .map(|t| t.history.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn tracked_symbols(&self) -> Vec<String> {
        self.positions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn stats(&self) -> ManagerStats {
        let mut stats = ManagerStats {
            tracked: self.positions.len(),
            closed: self.closed.len(),
            ..Default::default()
        };
        for entry in self.closed.iter() {
            stats.realized_pnl += entry.realized_pnl;
            stats.fees_paid += entry.fees_paid;
        }
        stats
    }

    /// Process one monitoring cycle over every tracked position.
    pub async fn run_tick(&self) -> TickSummary {
        let _guard = self.tick_lock.lock().await;
        let symbols = self.tracked_symbols();
        let concurrency = self.config.max_concurrency.max(1);

        let outcomes: Vec<TickOutcome> = stream::iter(symbols)
            .map(|symbol| async move { self.process(&symbol).await })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut summary = TickSummary::default();
        for outcome in outcomes {
            summary.record(outcome);
        }
        self.retire_closed();

        debug!(?summary, "Tick complete");
        summary
    }

    async fn process(&self, symbol: &str) -> TickOutcome {
        let Some(mut position) = self.snapshot(symbol) else {
            return TickOutcome::Gone;
        };
        if !position.is_open() {
            return TickOutcome::Gone;
        }
        if position.levels.is_none() {
            error!(
                symbol = %symbol,
                id = %position.id,
                "Position has no active levels; excluded from automated action until levels are attached"
            );
            return TickOutcome::Excluded;
        }

        let (candles, price) = match tokio::try_join!(self.fetch_candles(symbol), self.fetch_price(symbol)) {
            Ok(data) => data,
            Err(e) if e.is_transient() => {
                warn!(symbol = %symbol, error = %e, "Market data unavailable, skipping position this tick");
                return TickOutcome::Skipped;
            }
            Err(e) => {
                error!(
                    symbol = %symbol,
                    id = %position.id,
                    error = %e,
                    "Market data rejected for position; excluded from automated action this tick"
                );
                return TickOutcome::Excluded;
            }
        };

        let now = Utc::now();
        let pnl_pct = position.unrealized_pnl_pct(price);
        position.record_peak(pnl_pct);

        let assessment = self.assessor.assess(&candles, &position, price, now);
        info!(
            symbol = %symbol,
            price = %price,
            pnl_pct = %pnl_pct.round_dp(4),
            score = assessment.composite_score,
            level = %assessment.risk_level,
            action = %assessment.action,
            reasoning = %assessment.reasoning,
            "Position assessed"
        );
        if let Err(e) = self.ledger.record_assessment(position.id, &assessment).await {
            warn!(symbol = %symbol, error = %e, "Failed to record assessment");
        }

        let outcome = self.apply(&mut position, &assessment, price).await;
        if matches!(
            outcome,
            TickOutcome::StopAdjusted | TickOutcome::PartiallyClosed | TickOutcome::Held
        ) {
            self.persist_update(&position).await;
        }
        self.write_back(position, Some(assessment));
        outcome
    }

    /// Execute the protective checks and the recommended action.
    async fn apply(&self, position: &mut Position, assessment: &RiskAssessment, price: Decimal) -> TickOutcome {
        if position.stop_breached(price) {
            let reasoning = format!("stop-loss hit at {}", price);
            return self.close_all(position, ExitReason::StopLoss, &reasoning).await;
        }
        if assessment.action == RiskAction::CloseNow {
            return self.close_all(position, ExitReason::RiskClose, &assessment.reasoning).await;
        }

        let mut outcome = TickOutcome::Held;
        match self.take_profits(position, price).await {
            Some(TickOutcome::Escalated) => return TickOutcome::Escalated,
            Some(TickOutcome::Closed) => return TickOutcome::Closed,
            Some(o) => outcome = o,
            None => {}
        }

        let candidate = match assessment.action {
            RiskAction::AdjustSl => assessment.suggested_stop.or_else(|| {
                self.assessor.config().stops.step_stop(
                    position.entry_price,
                    position.side,
                    assessment.unrealized_pnl_pct,
                )
            }),
            RiskAction::Hold if self.config.apply_trailing_on_hold => assessment.suggested_stop,
            _ => None,
        };
        if let Some(candidate) = candidate {
            if (price - candidate) * position.side.direction() > Decimal::ZERO {
                if let Some(before) = position.tighten_stop(candidate) {
                    info!(
                        symbol = %position.symbol,
                        stop_before = %before,
                        stop_after = %candidate,
                        reasoning = %assessment.reasoning,
                        "Stop tightened"
                    );
                    if outcome == TickOutcome::Held {
                        outcome = TickOutcome::StopAdjusted;
                    }
                }
            }
        }
        outcome
    }

    /// Execute every take-profit stage the price has reached.
    async fn take_profits(&self, position: &mut Position, price: Decimal) -> Option<TickOutcome> {
        let mut outcome = None;
        while let Some((stage, target)) = position.levels.as_ref().and_then(|l| l.next_target()) {
            if (price - target) * position.side.direction() < Decimal::ZERO {
                break;
            }
            let fraction = match stage {
                0 => self.config.take_profit.tp1_fraction,
                1 => self.config.take_profit.tp2_fraction,
                _ => position.remaining_fraction,
            }
            .min(position.remaining_fraction);

            let reason = ExitReason::TakeProfit(stage as u8 + 1);
            let reasoning = format!("take-profit {} reached at {}", stage + 1, price);
            match self.exit(position, fraction, reason, &reasoning).await {
                ExitResult::Filled => {
                    position.mark_target_taken();
                    if !position.is_open() {
                        return Some(TickOutcome::Closed);
                    }
                    outcome = Some(TickOutcome::PartiallyClosed);
                    if stage == 0 && self.config.take_profit.breakeven_after_tp1 {
                        let breakeven = self.assessor.config().stops.breakeven(position.entry_price, position.side);
                        if let Some(before) = position.tighten_stop(breakeven) {
                            info!(
                                symbol = %position.symbol,
                                stop_before = %before,
                                stop_after = %breakeven,
                                "Stop moved to breakeven after first target"
                            );
                        }
                    }
                }
                ExitResult::Escalated => return Some(TickOutcome::Escalated),
            }
        }
        outcome
    }

    async fn close_all(&self, position: &mut Position, reason: ExitReason, reasoning: &str) -> TickOutcome {
        let fraction = position.remaining_fraction;
        match self.exit(position, fraction, reason, reasoning).await {
            ExitResult::Filled if !position.is_open() => TickOutcome::Closed,
            ExitResult::Filled => TickOutcome::PartiallyClosed,
            ExitResult::Escalated => TickOutcome::Escalated,
        }
    }

    /// Send an exit for `fraction` of the original size and book the fill.
    async fn exit(&self, position: &mut Position, fraction: Decimal, reason: ExitReason, reasoning: &str) -> ExitResult {
        let quantity = position.quantity() * fraction;
        let policy = self.config.retry_policy();

        let fill = match policy
            .close(self.gateway.as_ref(), &position.symbol, position.side, quantity)
            .await
        {
            Ok(fill) => fill,
            Err(failure) => {
                self.escalate(position, reason, quantity, failure.attempts, &failure.last_error);
                return ExitResult::Escalated;
            }
        };

        let filled_fraction = if position.quantity() > Decimal::ZERO {
            (fill.quantity / position.quantity()).min(fraction)
        } else {
            fraction
        };
        let stop = position.stop_loss();
        match position.realize_exit(filled_fraction, &fill) {
            Ok(net) => info!(
                symbol = %position.symbol,
                reason = %reason,
                price = %fill.price,
                quantity = %fill.quantity,
                net_pnl = %net,
                fee = %fill.fee,
                remaining = %position.remaining_fraction,
                stop_loss = ?stop,
                reasoning = %reasoning,
                "Exit executed"
            ),
            Err(e) => error!(symbol = %position.symbol, error = %e, "Failed to book exit fill"),
        }

        if !position.is_open() {
            if let Err(e) = self.ledger.record_close(position, reason).await {
                warn!(symbol = %position.symbol, error = %e, "Failed to record close");
            }
        }
        ExitResult::Filled
    }

    fn escalate(&self, position: &Position, reason: ExitReason, quantity: Decimal, attempts: u32, err: &Error) {
        error!(
            symbol = %position.symbol,
            id = %position.id,
            reason = %reason,
            quantity = %quantity,
            attempts,
            error = %err,
            "Close failed after retries; escalating to operator"
        );
        let escalation = Escalation {
            position_id: position.id,
            symbol: position.symbol.clone(),
            reason,
            quantity,
            attempts,
            error: err.to_string(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.escalation_tx.try_send(escalation) {
            error!(symbol = %position.symbol, error = %e, "Escalation channel unavailable");
        }
    }

    async fn fetch_candles(&self, symbol: &str) -> Result<Vec<Candle>> {
        let secs = self.config.fetch_timeout().as_secs();
        tokio::time::timeout(
            self.config.fetch_timeout(),
            self.market_data
                .get_recent_candles(symbol, &self.config.candle_interval, self.config.candle_count),
        )
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("get_recent_candles({})", symbol),
            secs,
        })?
    }

    async fn fetch_price(&self, symbol: &str) -> Result<Decimal> {
        let secs = self.config.fetch_timeout().as_secs();
        let price = tokio::time::timeout(self.config.fetch_timeout(), self.market_data.get_live_price(symbol))
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("get_live_price({})", symbol),
                secs,
            })??;
        if price <= Decimal::ZERO {
            return Err(Error::market_data(symbol, format!("non-positive live price {}", price)));
        }
        Ok(price)
    }

    fn snapshot(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol).map(|t| t.position.clone())
    }

    /// Store a worker's result. A position removed mid-tick is not re-added.
    fn write_back(&self, position: Position, assessment: Option<RiskAssessment>) {
        let Some(mut tracked) = self.positions.get_mut(&position.symbol) else {
            return;
        };
        if tracked.position.id != position.id {
            return;
        }
        tracked.position = position;
        if let Some(assessment) = assessment {
            tracked.history.push_back(assessment);
            while tracked.history.len() > self.config.max_history {
                tracked.history.pop_front();
            }
        }
    }

    async fn persist_update(&self, position: &Position) {
        if let Err(e) = self.ledger.record_update(position).await {
            warn!(symbol = %position.symbol, error = %e, "Failed to persist position update");
        }
    }

    fn retire_closed(&self) {
        let done: Vec<String> = self
            .positions
            .iter()
            .filter(|t| !t.position.is_open())
            .map(|t| t.key().clone())
            .collect();
        for symbol in done {
            if let Some((_, tracked)) = self.positions.remove(&symbol) {
                info!(
                    symbol = %symbol,
                    realized_pnl = %tracked.position.realized_pnl,
                    fees = %tracked.position.fees_paid,
                    "Position retired"
                );
                self.closed.insert(tracked.position.id, tracked.position);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::gateway::MockOrderGateway;
    use chrono::TimeZone;
    use guard_core::api::MockMarketData;
    use guard_core::types::{Confidence, Fill};
    use rust_decimal_macros::dec;

    pub fn flat_candles(n: usize) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                Candle::new(
                    start + chrono::Duration::minutes(15 * i as i64),
                    dec!(100),
                    dec!(100.5),
                    dec!(99.5),
                    dec!(100),
                    dec!(10),
                )
            })
            .collect()
    }

    pub fn long_levels() -> LevelSet {
        LevelSet {
            side: Side::Long,
            entry_price: dec!(100),
            swing_high: dec!(105),
            swing_low: dec!(95),
            atr: dec!(1),
            atr_multiplier: dec!(2.5),
            stop_loss: dec!(97),
            tp1: dec!(106.36),
            tp2: dec!(108.09),
            tp3: dec!(113.09),
            stop_loss_pct: dec!(-3),
            tp1_pct: dec!(6.36),
            tp2_pct: dec!(8.09),
            tp3_pct: dec!(13.09),
            confidence: Confidence::Medium,
            reasoning: "test levels".to_string(),
            created_at: Utc::now(),
        }
    }

    pub fn long_position(symbol: &str) -> Position {
        Position::new(symbol, Side::Long, dec!(100), dec!(1000)).with_levels(long_levels())
    }

    pub fn short_levels() -> LevelSet {
        LevelSet {
            side: Side::Short,
            stop_loss: dec!(103),
            tp1: dec!(93.64),
            tp2: dec!(91.91),
            tp3: dec!(86.91),
            stop_loss_pct: dec!(3),
            tp1_pct: dec!(-6.36),
            tp2_pct: dec!(-8.09),
            tp3_pct: dec!(-13.09),
            ..long_levels()
        }
    }

    pub fn short_position(symbol: &str) -> Position {
        Position::new(symbol, Side::Short, dec!(100), dec!(1000)).with_levels(short_levels())
    }

    /// Market data returning flat candles and the given prices in turn
    /// (the last price repeats).
    pub fn market(prices: Vec<Decimal>) -> MockMarketData {
        let mut market = MockMarketData::new();
        market
            .expect_get_recent_candles()
            .returning(|_, _, count| Ok(flat_candles(count)));
        let mut i = 0;
        market.expect_get_live_price().returning(move |_| {
            let price = prices[i.min(prices.len() - 1)];
            i += 1;
            Ok(price)
        });
        market
    }

    /// Gateway filling every close at `price` without fees.
    pub fn filling_gateway(price: Decimal) -> MockOrderGateway {
        let mut gateway = MockOrderGateway::new();
        gateway.expect_close_market().returning(move |symbol, side, quantity| {
            Ok(Fill {
                symbol: symbol.to_string(),
                side,
                quantity,
                price,
                fee: Decimal::ZERO,
                timestamp: Utc::now(),
            })
        });
        gateway
    }

    pub fn test_config() -> ManagerConfig {
        ManagerConfig {
            retry_delay_ms: 0,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::gateway::MockOrderGateway;
    use async_trait::async_trait;
    use guard_core::api::MockMarketData;
    use guard_core::db::InMemoryLedger;
    use guard_core::types::Fill;
    use risk_manager::AssessorConfig;
    use rust_decimal_macros::dec;

    fn manager(market: MockMarketData, gateway: MockOrderGateway, ledger: Arc<InMemoryLedger>) -> LifecycleManager {
        LifecycleManager::new(test_config(), Arc::new(market), ledger, Arc::new(gateway))
    }

    fn assessor(moderate: f64, high: f64) -> RiskAssessor {
        RiskAssessor::new(AssessorConfig {
            moderate_threshold: moderate,
            high_threshold: high,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_duplicate_symbol_rejected() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(MockMarketData::new(), MockOrderGateway::new(), ledger.clone());

        mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap();
        let err = mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap_err();
        assert!(matches!(err, Error::DuplicatePosition(s) if s == "BTCUSDT"));
        assert_eq!(mgr.tracked_symbols().len(), 1);
    }

    #[tokio::test]
    async fn test_stop_hit_closes_and_retires() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market(vec![dec!(96.5)]), filling_gateway(dec!(96.5)), ledger.clone());
        let position = long_position("BTCUSDT");
        let id = position.id;
        mgr.start_monitoring(position).await.unwrap();

        let summary = mgr.run_tick().await;
        assert_eq!(summary.closed, 1);
        assert!(mgr.position("BTCUSDT").is_none());

        let closed = mgr.closed_position(id).unwrap();
        assert!(!closed.is_open());
        assert_eq!(closed.remaining_fraction, Decimal::ZERO);
        assert_eq!(closed.realized_pnl, dec!(-35));
        assert_eq!(ledger.close_reason(id), Some(ExitReason::StopLoss));
        assert_eq!(ledger.assessments_for(id).len(), 1);

        let stats = mgr.stats();
        assert_eq!(stats.tracked, 0);
        assert_eq!(stats.closed, 1);
        assert_eq!(stats.realized_pnl, dec!(-35));
    }

    #[tokio::test]
    async fn test_fetch_failure_isolated_to_one_position() {
        let mut market = MockMarketData::new();
        market.expect_get_recent_candles().returning(|symbol, _, count| {
            if symbol == "ETHUSDT" {
                Err(Error::market_data(symbol, "exchange unavailable"))
            } else {
                Ok(flat_candles(count))
            }
        });
        market.expect_get_live_price().returning(|_| Ok(dec!(101)));

        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market, MockOrderGateway::new(), ledger);
        mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap();
        mgr.start_monitoring(long_position("ETHUSDT")).await.unwrap();

        let summary = mgr.run_tick().await;
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.skipped, 1);
        assert_eq!(mgr.history("BTCUSDT").len(), 1);
        assert!(mgr.history("ETHUSDT").is_empty());
        assert!(mgr.position("ETHUSDT").unwrap().is_open());
    }

    #[tokio::test]
    async fn test_non_transient_fetch_error_excludes_position() {
        let mut market = MockMarketData::new();
        market
            .expect_get_recent_candles()
            .returning(|symbol, _, _| Err(Error::invalid_position(symbol, "symbol not listed")));
        market.expect_get_live_price().returning(|_| Ok(dec!(101)));

        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market, MockOrderGateway::new(), ledger);
        mgr.start_monitoring(long_position("DELISTED")).await.unwrap();

        let summary = mgr.run_tick().await;
        assert_eq!(summary.excluded, 1);
        assert_eq!(summary.skipped, 0);
        assert!(mgr.history("DELISTED").is_empty());
        assert!(mgr.position("DELISTED").unwrap().is_open());
    }

    struct StalledMarket;

    #[async_trait]
    impl MarketData for StalledMarket {
        async fn get_recent_candles(&self, _symbol: &str, _interval: &str, count: usize) -> Result<Vec<Candle>> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(flat_candles(count))
        }

        async fn get_live_price(&self, _symbol: &str) -> Result<Decimal> {
            Ok(dec!(100))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_market_data_times_out() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = LifecycleManager::new(
            test_config(),
            Arc::new(StalledMarket),
            ledger,
            Arc::new(MockOrderGateway::new()),
        );
        mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap();

        let summary = mgr.run_tick().await;
        assert_eq!(summary.skipped, 1);
        assert!(mgr.position("BTCUSDT").unwrap().is_open());
    }

    #[tokio::test]
    async fn test_high_risk_closes_now() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market(vec![dec!(101)]), filling_gateway(dec!(101)), ledger.clone())
            .with_assessor(assessor(0.0, 0.0));
        let position = long_position("BTCUSDT");
        let id = position.id;
        mgr.start_monitoring(position).await.unwrap();

        let summary = mgr.run_tick().await;
        assert_eq!(summary.closed, 1);
        assert_eq!(ledger.close_reason(id), Some(ExitReason::RiskClose));
        assert_eq!(mgr.closed_position(id).unwrap().realized_pnl, dec!(10));
    }

    #[tokio::test]
    async fn test_failed_close_escalates_and_stays_open() {
        let mut gateway = MockOrderGateway::new();
        gateway.expect_close_market().times(3).returning(|_, _, _| {
            Err(Error::Execution {
                message: "exchange rejected order".to_string(),
            })
        });
        let ledger = Arc::new(InMemoryLedger::new());
        let mut mgr = manager(market(vec![dec!(101)]), gateway, ledger).with_assessor(assessor(0.0, 0.0));
        let mut escalations = mgr.take_escalation_receiver().unwrap();
        assert!(mgr.take_escalation_receiver().is_none());

        mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap();
        let summary = mgr.run_tick().await;
        assert_eq!(summary.escalated, 1);

        let escalation = escalations.try_recv().unwrap();
        assert_eq!(escalation.symbol, "BTCUSDT");
        assert_eq!(escalation.reason, ExitReason::RiskClose);
        assert_eq!(escalation.attempts, 3);
        assert_eq!(escalation.quantity, dec!(10));

        let position = mgr.position("BTCUSDT").unwrap();
        assert!(position.is_open());
        assert_eq!(position.remaining_fraction, Decimal::ONE);
    }

    #[tokio::test]
    async fn test_first_target_takes_partial_and_moves_to_breakeven() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market(vec![dec!(107)]), filling_gateway(dec!(107)), ledger.clone());
        let position = long_position("BTCUSDT");
        let id = position.id;
        mgr.start_monitoring(position).await.unwrap();

        let summary = mgr.run_tick().await;
        assert_eq!(summary.partial_exits, 1);

        let position = mgr.position("BTCUSDT").unwrap();
        assert_eq!(position.remaining_fraction, dec!(0.6));
        assert_eq!(position.realized_pnl, dec!(28));
        assert_eq!(position.stop_loss(), Some(dec!(100.2)));
        assert_eq!(position.levels.as_ref().unwrap().targets_taken, 1);
        assert_eq!(position.peak_profit_pct, dec!(7));
        assert_eq!(ledger.close_reason(id), None);
        assert_eq!(ledger.position(id).unwrap().remaining_fraction, dec!(0.6));
    }

    #[tokio::test]
    async fn test_stop_only_tightens_across_ticks() {
        let ledger = Arc::new(InMemoryLedger::new());
        let prices = vec![dec!(104), dec!(106), dec!(105), dec!(111)];
        let mgr = manager(market(prices), filling_gateway(dec!(111)), ledger).with_assessor(assessor(0.0, 101.0));
        mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap();

        let mut stops = vec![mgr.position("BTCUSDT").unwrap().stop_loss().unwrap()];
        for _ in 0..4 {
            mgr.run_tick().await;
            stops.push(mgr.position("BTCUSDT").unwrap().stop_loss().unwrap());
        }

        assert_eq!(
            stops,
            vec![dec!(97), dec!(100.2), dec!(102), dec!(102), dec!(105)]
        );
        let position = mgr.position("BTCUSDT").unwrap();
        assert_eq!(position.remaining_fraction, dec!(0.3));
        assert!(mgr
            .history("BTCUSDT")
            .iter()
            .all(|a| a.action == RiskAction::AdjustSl));
    }

    #[tokio::test]
    async fn test_short_takes_profit_then_stops_out_at_breakeven() {
        let mut gateway = MockOrderGateway::new();
        let fills = vec![dec!(93), dec!(99.9)];
        let mut n = 0;
        gateway.expect_close_market().times(2).returning(move |symbol, side, quantity| {
            let price = fills[n];
            n += 1;
            Ok(Fill {
                symbol: symbol.to_string(),
                side,
                quantity,
                price,
                fee: Decimal::ZERO,
                timestamp: Utc::now(),
            })
        });
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market(vec![dec!(93), dec!(96), dec!(99.9)]), gateway, ledger.clone())
            .with_assessor(assessor(101.0, 102.0));
        let position = short_position("ETHUSDT");
        let id = position.id;
        mgr.start_monitoring(position).await.unwrap();

        let mut stops = vec![dec!(103)];
        let summary = mgr.run_tick().await;
        assert_eq!(summary.partial_exits, 1);
        let position = mgr.position("ETHUSDT").unwrap();
        assert_eq!(position.remaining_fraction, dec!(0.6));
        assert_eq!(position.realized_pnl, dec!(28));
        assert_eq!(position.peak_profit_pct, dec!(7));
        stops.push(position.stop_loss().unwrap());

        mgr.run_tick().await;
        stops.push(mgr.position("ETHUSDT").unwrap().stop_loss().unwrap());
        assert_eq!(stops, vec![dec!(103), dec!(99.8), dec!(99.8)]);
        assert!(stops.windows(2).all(|w| w[1] <= w[0]));

        let summary = mgr.run_tick().await;
        assert_eq!(summary.closed, 1);
        assert!(mgr.position("ETHUSDT").is_none());
        let closed = mgr.closed_position(id).unwrap();
        // 7 per unit on 4 units at tp1, then 0.1 per unit on the last 6
        assert_eq!(closed.realized_pnl, dec!(28.6));
        assert_eq!(ledger.close_reason(id), Some(ExitReason::StopLoss));
        assert_eq!(ledger.assessments_for(id).len(), 3);
    }

    #[tokio::test]
    async fn test_missing_levels_excluded_until_attached() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market(vec![dec!(101)]), MockOrderGateway::new(), ledger);
        let bare = Position::new("BTCUSDT", Side::Long, dec!(100), dec!(1000));
        mgr.start_monitoring(bare).await.unwrap();

        assert_eq!(mgr.run_tick().await.excluded, 1);
        assert!(mgr.history("BTCUSDT").is_empty());

        mgr.attach_levels("BTCUSDT", long_levels()).await.unwrap();
        let summary = mgr.run_tick().await;
        assert_eq!(summary.excluded, 0);
        assert_eq!(mgr.history("BTCUSDT").len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_capped() {
        let ledger = Arc::new(InMemoryLedger::new());
        let config = ManagerConfig {
            max_history: 2,
            ..test_config()
        };
        let mgr = LifecycleManager::new(
            config,
            Arc::new(market(vec![dec!(101)])),
            ledger.clone(),
            Arc::new(MockOrderGateway::new()),
        );
        let position = long_position("BTCUSDT");
        let id = position.id;
        mgr.start_monitoring(position).await.unwrap();
        for _ in 0..3 {
            mgr.run_tick().await;
        }
        assert_eq!(mgr.history("BTCUSDT").len(), 2);
        assert_eq!(ledger.assessments_for(id).len(), 3);
    }

    #[tokio::test]
    async fn test_stop_monitoring_removes_tracking() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(MockMarketData::new(), MockOrderGateway::new(), ledger);
        mgr.start_monitoring(long_position("BTCUSDT")).await.unwrap();

        let removed = mgr.stop_monitoring("BTCUSDT").await.unwrap();
        assert!(removed.is_open());
        assert!(matches!(
            mgr.stop_monitoring("BTCUSDT").await,
            Err(Error::NotTracked(_))
        ));
        assert_eq!(mgr.run_tick().await, TickSummary::default());
    }

    #[tokio::test]
    async fn test_manual_close() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(MockMarketData::new(), filling_gateway(dec!(102)), ledger.clone());
        let position = long_position("BTCUSDT");
        let id = position.id;
        mgr.start_monitoring(position).await.unwrap();

        let closed = mgr.close_manually("BTCUSDT").await.unwrap();
        assert!(!closed.is_open());
        assert_eq!(closed.realized_pnl, dec!(20));
        assert_eq!(ledger.close_reason(id), Some(ExitReason::Manual));
        assert_eq!(mgr.stats().closed, 1);
    }

    #[tokio::test]
    async fn test_restore_from_ledger() {
        let ledger = Arc::new(InMemoryLedger::new());
        ledger.record_open(&long_position("BTCUSDT")).await.unwrap();
        ledger.record_open(&long_position("ETHUSDT")).await.unwrap();

        let mgr = manager(MockMarketData::new(), MockOrderGateway::new(), ledger);
        assert_eq!(mgr.restore_from_ledger().await.unwrap(), 2);
        assert_eq!(mgr.restore_from_ledger().await.unwrap(), 0);
        assert_eq!(mgr.stats().tracked, 2);
    }

    #[tokio::test]
    async fn test_open_and_reseed_levels() {
        let ledger = Arc::new(InMemoryLedger::new());
        let mgr = manager(market(vec![dec!(100)]), MockOrderGateway::new(), ledger);

        let opened = mgr.open_position("BTCUSDT", Side::Long, dec!(100), dec!(1000)).await.unwrap();
        let seeded_stop = opened.stop_loss().unwrap();
        assert!(seeded_stop < dec!(100));

        let level_set = mgr.reseed_levels("BTCUSDT").await.unwrap();
        assert!(level_set.is_well_formed());
        let position = mgr.position("BTCUSDT").unwrap();
        assert_eq!(position.stop_loss(), Some(level_set.stop_loss.max(seeded_stop)));
    }
}
