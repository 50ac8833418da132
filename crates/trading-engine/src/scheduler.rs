//! Periodic driver for the lifecycle manager with graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::lifecycle::LifecycleManager;

/// Runs `run_tick` on a fixed interval until the shutdown signal flips.
///
/// A tick in flight when shutdown is requested runs to completion; no new
/// tick starts afterwards.
pub struct MonitorService {
    manager: Arc<LifecycleManager>,
    tick_interval: Duration,
}

impl MonitorService {
    pub fn new(manager: Arc<LifecycleManager>, tick_interval: Duration) -> Self {
        Self {
            manager,
            tick_interval,
        }
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(self.run(shutdown))
    }

    /// Main run loop.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            tick_secs = self.tick_interval.as_secs(),
            positions = self.manager.tracked_symbols().len(),
            "Starting position monitor"
        );

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut ticks: u64 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown sender dropped, stopping monitor");
                        break;
                    }
                }
                _ = ticker.tick() => {
                    ticks += 1;
                    let summary = self.manager.run_tick().await;
                    info!(
                        tick = ticks,
                        processed = summary.processed,
                        skipped = summary.skipped,
                        adjusted = summary.adjusted,
                        closed = summary.closed,
                        escalated = summary.escalated,
                        "Monitor tick finished"
                    );
                }
            }
        }

        let stats = self.manager.stats();
        info!(
            ticks,
            tracked = stats.tracked,
            closed = stats.closed,
            realized_pnl = %stats.realized_pnl,
            "Position monitor stopped"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockOrderGateway;
    use crate::lifecycle::test_support::{long_position, market, test_config};
    use guard_core::db::InMemoryLedger;
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn test_ticks_until_shutdown() {
        let ledger = Arc::new(InMemoryLedger::new());
        let manager = Arc::new(crate::LifecycleManager::new(
            test_config(),
            Arc::new(market(vec![dec!(101)])),
            ledger.clone(),
            Arc::new(MockOrderGateway::new()),
        ));
        let position = long_position("BTCUSDT");
        let id = position.id;
        manager.start_monitoring(position).await.unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = MonitorService::new(manager.clone(), Duration::from_secs(30)).spawn(shutdown_rx);

        // First tick fires immediately, then one every 30s.
        tokio::time::sleep(Duration::from_secs(65)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap().unwrap();

        let ticks = manager.history("BTCUSDT").len();
        assert_eq!(ticks, 3);
        assert_eq!(ledger.assessments_for(id).len(), 3);

        // No tick runs after shutdown.
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(manager.history("BTCUSDT").len(), ticks);
    }

    #[tokio::test]
    async fn test_dropped_sender_stops_service() {
        let manager = Arc::new(crate::LifecycleManager::new(
            test_config(),
            Arc::new(market(vec![dec!(101)])),
            Arc::new(InMemoryLedger::new()),
            Arc::new(MockOrderGateway::new()),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = MonitorService::new(manager, Duration::from_secs(3600)).spawn(shutdown_rx);
        drop(shutdown_tx);
        assert!(handle.await.unwrap().is_ok());
    }
}
