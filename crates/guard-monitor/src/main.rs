//! Position Guard Monitor
//!
//! Re-evaluates open positions on a fixed schedule: assesses risk, tightens
//! stops, takes staged profits, and closes positions that turn dangerous.

mod settings;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use guard_core::api::RestMarketData;
use guard_core::config::Config;
use guard_core::db::{self, InMemoryLedger, PgTradeLedger};
use guard_core::{MarketData, TradeLedger};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trading_engine::{LifecycleManager, ManagerConfig, MonitorService, PaperConfig, PaperGateway};

use settings::{GuardSettings, OpenRequest};

const HEALTH_FILE: &str = "/tmp/guard-monitor.healthy";

#[derive(Debug, Parser)]
#[command(name = "guard-monitor", version, about = "Adaptive position risk monitor")]
struct Cli {
    /// TOML file with algorithm settings (overridable by GUARD__* variables).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Open a paper position at the live price, e.g. BTCUSDT:long:1000.
    #[arg(long = "open", value_name = "SYMBOL:SIDE:NOTIONAL")]
    open: Vec<OpenRequest>,
}

fn touch_health_file() {
    let _ = std::fs::write(HEALTH_FILE, format!("{}", chrono::Utc::now().timestamp()));
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "guard_monitor=info,trading_engine=info,risk_manager=info,guard_core=warn,hyper=warn".into()
    });
    let json = std::env::var("LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn build_ledger(config: &Config) -> Result<Arc<dyn TradeLedger>> {
    if config.database.url.is_none() {
        warn!("DATABASE_URL not set, using in-memory ledger (positions are lost on restart)");
        return Ok(Arc::new(InMemoryLedger::new()));
    }
    let pool = db::create_pool(&config.database).await.context("connecting to ledger database")?;
    db::run_migrations(&pool).await.context("running ledger migrations")?;
    info!("Connected to ledger database");
    Ok(Arc::new(PgTradeLedger::new(pool)))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    info!("Starting Position Guard Monitor");
    touch_health_file();

    let config = Config::from_env().context("loading environment configuration")?;
    let settings = GuardSettings::load(cli.config.as_deref())?;

    let market_data: Arc<dyn MarketData> = Arc::new(RestMarketData::new(&config.market_data)?);
    let ledger = build_ledger(&config).await?;
    let gateway = Arc::new(PaperGateway::new(
        market_data.clone(),
        PaperConfig {
            fee_rate: config.monitor.fee_rate,
            slippage: settings.slippage,
        },
    ));

    let mut manager_config = ManagerConfig::from(&config.monitor);
    manager_config.take_profit = settings.take_profit.clone();
    manager_config.max_history = settings.max_history;

    let mut manager = LifecycleManager::new(manager_config, market_data.clone(), ledger, gateway)
        .with_assessor(settings.assessor())
        .with_level_calculator(settings.level_calculator());

    if let Some(mut escalations) = manager.take_escalation_receiver() {
        tokio::spawn(async move {
            while let Some(e) = escalations.recv().await {
                error!(
                    symbol = %e.symbol,
                    position_id = %e.position_id,
                    reason = %e.reason,
                    quantity = %e.quantity,
                    attempts = e.attempts,
                    error = %e.error,
                    "OPERATOR ACTION REQUIRED: position could not be closed"
                );
            }
        });
    }

    let manager = Arc::new(manager);
    let restored = manager.restore_from_ledger().await.context("restoring open positions")?;

    for request in &cli.open {
        let opened = async {
            let price = market_data.get_live_price(&request.symbol).await?;
            manager
                .open_position(&request.symbol, request.side, price, request.notional)
                .await
        }
        .await;
        match opened {
            Ok(position) => info!(
                symbol = %position.symbol,
                entry = %position.entry_price,
                stop_loss = ?position.stop_loss(),
                "Opened paper position"
            ),
            Err(e) => error!(symbol = %request.symbol, error = %e, "Failed to open position"),
        }
    }

    info!(
        restored,
        tracked = manager.tracked_symbols().len(),
        tick_secs = config.monitor.tick_interval_secs,
        "Monitor ready"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let service = MonitorService::new(
        manager.clone(),
        Duration::from_secs(config.monitor.tick_interval_secs),
    )
    .spawn(shutdown_rx);

    tokio::signal::ctrl_c().await.context("listening for Ctrl-C")?;
    info!("Shutdown requested, finishing in-flight tick");
    let _ = shutdown_tx.send(true);
    service.await.context("monitor task panicked")??;

    let stats = manager.stats();
    info!(
        tracked = stats.tracked,
        closed = stats.closed,
        realized_pnl = %stats.realized_pnl,
        fees = %stats.fees_paid,
        "Position Guard Monitor stopped"
    );
    Ok(())
}
