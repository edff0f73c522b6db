#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use papertrade_core::config::{ExecutionConfig, RiskLimits};
use papertrade_core::paper_trading::{CommissionModel, ExecutionModel, RiskMonitor};
use papertrade_core::{
    Bar, CommissionConfig, Ledger, MarketUpdate, OrderIntent, PaperBroker, PaperTradingConfig,
    ScriptedSampler, Strategy, StrategyContext, StrategyOutput, Symbol, TradingDaemon,
};

pub fn symbol() -> Symbol {
    Symbol::new("NIFTY")
}

pub fn update(price: f64) -> MarketUpdate {
    MarketUpdate::new(symbol(), "1m", Bar::flat(price, 100.0, Utc::now()))
}

pub fn broker(
    sampler: ScriptedSampler,
    execution: ExecutionConfig,
    commission: CommissionConfig,
    limits: RiskLimits,
    initial_capital: f64,
) -> Arc<PaperBroker> {
    Arc::new(PaperBroker::new(
        ExecutionModel::new(execution, Box::new(sampler)),
        CommissionModel::new(commission),
        Arc::new(Mutex::new(Ledger::new(initial_capital, 1.0))),
        Arc::new(RiskMonitor::new(limits)),
    ))
}

/// Emits one queued intent per market update, then nothing.
pub struct ScriptedStrategy {
    intents: VecDeque<Option<OrderIntent>>,
}

impl ScriptedStrategy {
    pub fn new(intents: Vec<Option<OrderIntent>>) -> Self {
        Self {
            intents: intents.into(),
        }
    }
}

#[async_trait]
impl Strategy for ScriptedStrategy {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn on_market_update(
        &mut self,
        _update: &MarketUpdate,
        _context: &StrategyContext,
    ) -> anyhow::Result<StrategyOutput> {
        Ok(StrategyOutput {
            intent: self.intents.pop_front().flatten(),
            ..StrategyOutput::default()
        })
    }
}

pub fn session_config(dir: &Path) -> PaperTradingConfig {
    let mut config = PaperTradingConfig {
        strategy_name: "scripted".to_string(),
        shutdown_timeout: 2.0,
        ..PaperTradingConfig::default()
    };
    config.recorder.output_dir = dir.to_path_buf();
    config.recorder.fsync = false;
    config
}

pub fn daemon(config: PaperTradingConfig, intents: Vec<Option<OrderIntent>>) -> TradingDaemon {
    TradingDaemon::new(config, Box::new(ScriptedStrategy::new(intents)))
        .unwrap()
        .with_sampler(Box::new(ScriptedSampler::fixed(Duration::from_millis(100), 0.0)))
}
