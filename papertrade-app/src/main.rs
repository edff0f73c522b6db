//! Paper Trading Daemon
//!
//! Runs a demo strategy against a synthetic market feed, records the session
//! under `output_dir` and streams events to dashboards over WebSocket.
//!
//! Environment overrides:
//! - `PAPERTRADE_STRATEGY`      strategy name recorded with the session
//! - `PAPERTRADE_CAPITAL`       initial capital
//! - `PAPERTRADE_OUTPUT_DIR`    session output root
//! - `PAPERTRADE_BIND`          dashboard bind address
//! - `PAPERTRADE_FEED_MS`       synthetic bar interval in milliseconds
//! - `PAPERTRADE_SEED`          seed for the feed and execution sampler

mod feed;
mod strategy;

use anyhow::{Context, Result};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use papertrade_core::{DashboardServer, PaperTradingConfig, RandomSampler, Symbol, TradingDaemon};

use crate::feed::SyntheticFeed;
use crate::strategy::SmaCrossover;

fn env_override<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", key, raw, e)),
        Err(_) => Ok(None),
    }
}

fn load_config() -> Result<PaperTradingConfig> {
    let mut config = PaperTradingConfig {
        strategy_name: "sma_crossover".to_string(),
        ..Default::default()
    };

    if let Some(name) = env_override::<String>("PAPERTRADE_STRATEGY")? {
        config.strategy_name = name;
    }
    if let Some(capital) = env_override("PAPERTRADE_CAPITAL")? {
        config.initial_capital = capital;
    }
    if let Some(dir) = env_override::<String>("PAPERTRADE_OUTPUT_DIR")? {
        config.recorder.output_dir = dir.into();
    }
    if let Some(addr) = env_override("PAPERTRADE_BIND")? {
        config.broadcast.bind_address = addr;
    }

    config.validate().context("invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("🚀 Starting paper trading daemon");

    let config = load_config()?;
    let seed = env_override::<u64>("PAPERTRADE_SEED")?;
    let feed_interval = Duration::from_millis(env_override("PAPERTRADE_FEED_MS")?.unwrap_or(1000));

    let strategy = SmaCrossover::new(config.strategy_name.clone(), 5, 20, 10.0);
    let sampler = match seed {
        Some(seed) => RandomSampler::seeded(seed),
        None => RandomSampler::new(),
    };
    let broadcast = config.broadcast.clone();
    let mut daemon = TradingDaemon::new(config, Box::new(strategy))?.with_sampler(Box::new(sampler));

    // Dashboard server lives until the daemon has stopped
    let (server_stop, server_stopped) = oneshot::channel::<()>();
    let server = DashboardServer::new(daemon.bus(), broadcast);
    let (addr, serving) = server
        .bind_with_shutdown(async move {
            let _ = server_stopped.await;
        })
        .context("failed to bind dashboard server")?;
    let server_task = tokio::spawn(serving);
    info!("📊 Dashboard stream at ws://{}/ws", addr);

    let market = SyntheticFeed::new(
        vec![
            (Symbol::new("GOLDGUINEA"), 72_000.0),
            (Symbol::new("NIFTY"), 24_000.0),
            (Symbol::new("CRUDEOIL"), 6_500.0),
        ],
        feed_interval,
    )
    .with_seed(seed)
    .spawn();

    info!("System is running. Press Ctrl+C to stop.");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("🛑 Shutdown signal received...");
    };

    let outcome = daemon.run(market, shutdown).await;

    let _ = server_stop.send(());
    if let Err(e) = server_task.await {
        error!("Dashboard server task failed: {}", e);
    }

    let record = outcome?;
    info!(
        "✅ Session {} finalized in {}",
        record.session_id,
        record.session_dir.display()
    );
    if let Some(account) = daemon.account() {
        info!(
            "💰 Final equity {:.2} (cash {:.2}, max drawdown {:.2}%)",
            account.equity,
            account.cash_balance,
            account.max_drawdown_seen * 100.0
        );
    }

    Ok(())
}
