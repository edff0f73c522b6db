//! Trading daemon
//!
//! Drives one paper trading session:
//! market update -> strategy -> order intent -> broker -> {risk, recorder, bus}.
//!
//! ```text
//! STOPPED -> STARTING -> RUNNING -> (HALTED | STOPPING) -> STOPPED
//! ```

pub mod strategy;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::PaperTradingConfig;
use crate::error::{DaemonError, RecorderError, SubmitRejection};
use crate::events::{BarData, DashboardEvent, EventBus, EventPayload, SnapshotData, TradeData};
use crate::market::{MarketUpdate, Symbol};
use crate::paper_trading::ledger::QTY_EPSILON;
use crate::paper_trading::{
    Account, BrokerEvent, CommissionModel, ExecutionModel, ExecutionSampler, Ledger, OrderHandle,
    PaperBroker, Position, RandomSampler, RiskEvent, RiskLimitState, RiskMonitor,
};
use crate::recorder::{SessionRecord, SessionRecorder};

pub use strategy::{MarketFeed, OrderIntent, Strategy, StrategyContext, StrategyOutput};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Starting,
    Running,
    Halted,
    Stopping,
}

impl DaemonState {
    fn can_transition_to(self, next: DaemonState) -> bool {
        use DaemonState::*;
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Halted)
                | (Running, Stopping)
                | (Halted, Stopping)
                | (Stopping, Stopped)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DaemonState::Stopped => "stopped",
            DaemonState::Starting => "starting",
            DaemonState::Running => "running",
            DaemonState::Halted => "halted",
            DaemonState::Stopping => "stopping",
        }
    }
}

impl fmt::Display for DaemonState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Components owned by one session
struct Session {
    broker: Arc<PaperBroker>,
    risk: Arc<RiskMonitor>,
    ledger: Arc<Mutex<Ledger>>,
    recorder: SessionRecorder,
    trading_day: Option<NaiveDate>,
}

/// Trading daemon
pub struct TradingDaemon {
    config: PaperTradingConfig,
    strategy: Box<dyn Strategy>,
    sampler: Option<Box<dyn ExecutionSampler>>,
    bus: Arc<EventBus>,
    state: RwLock<DaemonState>,
    session: Option<Session>,
    broker_events: Option<mpsc::UnboundedReceiver<BrokerEvent>>,
    last_record: Option<SessionRecord>,
}

impl TradingDaemon {
    pub fn new(config: PaperTradingConfig, strategy: Box<dyn Strategy>) -> Result<Self, DaemonError> {
        config.validate()?;
        let bus = Arc::new(EventBus::new(config.broadcast.queue_capacity));

        Ok(Self {
            config,
            strategy,
            sampler: None,
            bus,
            state: RwLock::new(DaemonState::Stopped),
            session: None,
            broker_events: None,
            last_record: None,
        })
    }

    /// Replace the RNG-backed execution sampler used by the next session.
    pub fn with_sampler(mut self, sampler: Box<dyn ExecutionSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.bus)
    }

    pub fn state(&self) -> DaemonState {
        *self.state.read()
    }

    pub fn config(&self) -> &PaperTradingConfig {
        &self.config
    }

    fn transition(&self, next: DaemonState) -> Result<(), DaemonError> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(DaemonError::InvalidTransition {
                from: *state,
                to: next,
            });
        }
        info!("Daemon {} -> {}", *state, next);
        *state = next;
        Ok(())
    }

    /// STOPPED -> STARTING -> RUNNING: build the session components and open
    /// the session record.
    pub fn start(&mut self) -> Result<(), DaemonError> {
        self.transition(DaemonState::Starting)?;

        match self.open_session() {
            Ok(session) => {
                self.session = Some(session);
                self.transition(DaemonState::Running)?;
                self.refresh_snapshot();
                info!("🚀 Paper trading session started for {}", self.strategy.name());
                Ok(())
            }
            Err(e) => {
                error!("Failed to start session: {}", e);
                *self.state.write() = DaemonState::Stopped;
                Err(e)
            }
        }
    }

    fn open_session(&mut self) -> Result<Session, DaemonError> {
        let config = &self.config;
        let ledger = Arc::new(Mutex::new(Ledger::new(
            config.initial_capital,
            config.margin_requirement,
        )));
        let risk = Arc::new(RiskMonitor::new(config.risk_limits.clone()));
        let sampler = self
            .sampler
            .take()
            .unwrap_or_else(|| Box::new(RandomSampler::new()));

        let broker = Arc::new(PaperBroker::new(
            ExecutionModel::new(config.execution.clone(), sampler),
            CommissionModel::new(config.commission.clone()),
            Arc::clone(&ledger),
            Arc::clone(&risk),
        ));
        self.broker_events = broker.subscribe();

        let snapshot = serde_json::to_value(config).map_err(RecorderError::from)?;
        let recorder = SessionRecorder::open(&config.recorder, &config.strategy_name, snapshot)?;

        Ok(Session {
            broker,
            risk,
            ledger,
            recorder,
            trading_day: None,
        })
    }

    /// Run the session until `shutdown` resolves or the feed ends, then stop.
    ///
    /// Every step error is a recorder failure or a lost session, and both are
    /// fatal: the daemon moves to STOPPING, shuts down and the failure is
    /// returned.
    pub async fn run<F, S>(&mut self, mut feed: F, shutdown: S) -> Result<SessionRecord, DaemonError>
    where
        F: MarketFeed,
        S: Future<Output = ()>,
    {
        if self.state() == DaemonState::Stopped {
            self.start()?;
        }

        let period = self.config.recorder.snapshot_interval();
        let mut snapshot_timer = tokio::time::interval_at(Instant::now() + period, period);
        snapshot_timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            let step = tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown requested");
                    break;
                }
                Some(event) = next_broker_event(&mut self.broker_events) => {
                    self.handle_broker_event(event)
                }
                update = feed.next_update() => match update {
                    Some(update) => self.handle_market_update(update).await,
                    None => {
                        info!("Market feed ended");
                        break;
                    }
                },
                _ = snapshot_timer.tick() => self.write_snapshot(),
            };

            if let Err(e) = step {
                error!("❌ Fatal session error: {}", e);
                if let Err(stop_error) = self.stop().await {
                    error!("Shutdown after fatal error failed: {}", stop_error);
                }
                return Err(e);
            }
        }

        self.stop().await
    }

    /// Mark, publish chart state, consult the strategy and act on its intent.
    pub async fn handle_market_update(&mut self, update: MarketUpdate) -> Result<(), DaemonError> {
        let (broker, risk) = {
            let session = self.session.as_mut().ok_or(DaemonError::NotStarted)?;
            roll_trading_day(session, update.bar.timestamp)?;
            (Arc::clone(&session.broker), Arc::clone(&session.risk))
        };

        let price = update.reference_price();
        let mark = broker.update_price(&update.symbol, price);
        self.recorder_mut()?.record_mark(&update.symbol, price, &mark)?;
        let (account, position) = (mark.account, mark.position);

        self.bus.publish(DashboardEvent::new(EventPayload::BarUpdate(BarData {
            symbol: update.symbol.clone(),
            timeframe: update.timeframe.clone(),
            bar: update.bar.clone(),
        })));
        if let Some(position) = position.as_ref().filter(|p| !p.is_flat()) {
            self.bus.publish(DashboardEvent::new(EventPayload::PositionUpdate {
                account: account.clone(),
                position: Some(position.clone()),
            }));
        }
        self.refresh_snapshot();

        let context = StrategyContext {
            account,
            position,
            halted: risk.is_halted(),
        };
        let output = match self.strategy.on_market_update(&update, &context).await {
            Ok(output) => output,
            Err(e) => {
                warn!("Strategy {} failed on {}: {}", self.strategy.name(), update.symbol, e);
                return Ok(());
            }
        };

        if let Some(indicators) = output.indicators {
            self.bus
                .publish(DashboardEvent::new(EventPayload::IndicatorUpdate(indicators)));
        }
        if let Some(signal) = output.signal {
            info!(
                "📈 Signal {} {} @ {:.2}",
                signal.direction, signal.symbol, signal.entry_price
            );
            self.bus
                .publish(DashboardEvent::new(EventPayload::SignalGenerated(signal)));
        }
        if let Some(intent) = output.intent {
            match self.submit_intent(intent) {
                Ok(handle) => debug!("Submitted order {}", handle.id()),
                Err(rejection) => warn!("Order intent refused ({}): {}", rejection.reason(), rejection),
            }
        }
        Ok(())
    }

    /// Gate an intent on risk state and forward it to the broker.
    pub fn submit_intent(&self, intent: OrderIntent) -> Result<OrderHandle, SubmitRejection> {
        let state = self.state();
        let Some(session) = self.session.as_ref() else {
            return Err(SubmitRejection::NotRunning(state));
        };

        // Orders still working on flat instruments hold a position slot too
        let (opens_new_position, pending_openings) = {
            let ledger = session.ledger.lock();
            let is_flat = |symbol: &Symbol| ledger.net_quantity(symbol).abs() < QTY_EPSILON;
            let pending: HashSet<Symbol> = session
                .broker
                .open_orders()
                .into_iter()
                .map(|order| order.symbol)
                .filter(|symbol| is_flat(symbol))
                .collect();
            (
                is_flat(&intent.symbol) && !pending.contains(&intent.symbol),
                pending.len(),
            )
        };
        session.risk.check_submission(opens_new_position, pending_openings)?;
        if state != DaemonState::Running {
            return Err(SubmitRejection::NotRunning(state));
        }

        Ok(session.broker.submit(intent.into_order()))
    }

    fn recorder_mut(&mut self) -> Result<&mut SessionRecorder, DaemonError> {
        self.session
            .as_mut()
            .map(|s| &mut s.recorder)
            .ok_or(DaemonError::NotStarted)
    }

    fn handle_broker_event(&mut self, event: BrokerEvent) -> Result<(), DaemonError> {
        match event {
            BrokerEvent::OrderUpdated(order) => {
                self.recorder_mut()?.record_order(&order)?;
            }
            BrokerEvent::FillApplied { fill, order, effect } => {
                // Dashboards hear about the fill even when the write fails
                let recorded = self.recorder_mut().and_then(|recorder| {
                    recorder.record_order(&order)?;
                    recorder.record_fill(&fill, &effect)?;
                    Ok(())
                });

                self.bus.publish(DashboardEvent::new(EventPayload::TradeExecuted(TradeData {
                    order_id: fill.order_id.clone(),
                    fill_id: fill.fill_id.clone(),
                    symbol: fill.symbol.clone(),
                    side: fill.side,
                    quantity: fill.quantity,
                    price: fill.price,
                    commission: fill.commission,
                    realized_pnl: effect.realized_pnl,
                })));
                self.bus.publish(DashboardEvent::new(EventPayload::PositionUpdate {
                    account: effect.account,
                    position: Some(effect.position),
                }));
                self.refresh_snapshot();
                recorded?;
            }
            BrokerEvent::Risk(RiskEvent::Halted {
                reason,
                daily_pnl,
                drawdown,
                ..
            }) => {
                if self.state() == DaemonState::Running {
                    self.transition(DaemonState::Halted)?;
                }
                let cancelled = self.broker().map(|b| b.cancel_all()).unwrap_or(0);
                warn!("🛑 Session halted ({}); {} orders cancelled", reason, cancelled);
                self.bus.publish(DashboardEvent::new(EventPayload::RiskHalt {
                    reason,
                    daily_pnl,
                    drawdown,
                }));
                self.refresh_snapshot();
            }
            BrokerEvent::Risk(RiskEvent::BreakEvenAdvisory(advisory)) => {
                self.bus
                    .publish(DashboardEvent::new(EventPayload::RiskAdvisory(advisory)));
            }
        }
        Ok(())
    }

    /// Periodic snapshot: durable file plus a broadcast frame.
    fn write_snapshot(&mut self) -> Result<(), DaemonError> {
        let session = self.session.as_mut().ok_or(DaemonError::NotStarted)?;
        let (account, positions) = {
            let ledger = session.ledger.lock();
            (ledger.account().clone(), ledger.positions())
        };
        session.recorder.record_snapshot(&account, &positions)?;

        if let Some(snapshot) = self.snapshot() {
            self.bus.publish(DashboardEvent::new(EventPayload::Snapshot(snapshot)));
        }
        Ok(())
    }

    /// Current account/position/risk view, as sent to (re)connecting clients.
    pub fn snapshot(&self) -> Option<SnapshotData> {
        let session = self.session.as_ref()?;
        let ledger = session.ledger.lock();
        Some(SnapshotData {
            account: ledger.account().clone(),
            positions: ledger.positions(),
            risk: session.risk.state(),
            daemon_state: self.state().to_string(),
        })
    }

    fn refresh_snapshot(&self) {
        if let Some(snapshot) = self.snapshot() {
            self.bus.update_snapshot(snapshot);
        }
    }

    /// RUNNING/HALTED -> STOPPING -> STOPPED: wait for in-flight orders, cancel
    /// the rest, flush the recorder, disconnect subscribers and finalize the
    /// session record.
    ///
    /// Shutdown always runs to the end. The first failure along the way,
    /// starting with recording the drained broker events, is what it returns.
    pub async fn stop(&mut self) -> Result<SessionRecord, DaemonError> {
        if self.state() != DaemonState::Stopping {
            self.transition(DaemonState::Stopping)?;
        }
        let broker = match self.session.as_ref() {
            Some(session) => Arc::clone(&session.broker),
            None => return Err(DaemonError::NotStarted),
        };

        if !broker.wait_idle(self.config.shutdown_timeout()).await {
            warn!(
                "{} orders still in flight after {:?}",
                broker.in_flight_count(),
                self.config.shutdown_timeout()
            );
        }
        let cancelled = broker.cancel_all();
        if cancelled > 0 {
            info!("Cancelled {} open orders on shutdown", cancelled);
        }

        let mut drain_error = None;
        let mut events = self.broker_events.take();
        if let Some(receiver) = events.as_mut() {
            while let Ok(event) = receiver.try_recv() {
                if let Err(e) = self.handle_broker_event(event) {
                    error!("Failed to record event during shutdown: {}", e);
                    drain_error.get_or_insert(e);
                }
            }
        }

        let snapshot_result = self.write_snapshot();
        self.bus.close_all();

        let finalized = match self.session.as_mut() {
            Some(session) => session.recorder.finalize().map_err(DaemonError::from),
            None => Err(DaemonError::NotStarted),
        };
        *self.state.write() = DaemonState::Stopped;
        info!("Daemon stopping -> stopped");

        if let Some(e) = drain_error {
            return Err(e);
        }
        snapshot_result?;
        let record = finalized?;
        self.last_record = Some(record.clone());
        Ok(record)
    }

    pub fn broker(&self) -> Option<&Arc<PaperBroker>> {
        self.session.as_ref().map(|s| &s.broker)
    }

    pub fn account(&self) -> Option<Account> {
        self.session.as_ref().map(|s| s.ledger.lock().account().clone())
    }

    pub fn positions(&self) -> Vec<Position> {
        self.session
            .as_ref()
            .map(|s| s.ledger.lock().positions())
            .unwrap_or_default()
    }

    pub fn risk_state(&self) -> Option<RiskLimitState> {
        self.session.as_ref().map(|s| s.risk.state())
    }

    /// Record of the last finalized session
    pub fn session_record(&self) -> Option<&SessionRecord> {
        self.last_record.as_ref()
    }
}

async fn next_broker_event(
    events: &mut Option<mpsc::UnboundedReceiver<BrokerEvent>>,
) -> Option<BrokerEvent> {
    match events {
        Some(receiver) => receiver.recv().await,
        None => std::future::pending().await,
    }
}

/// Daily P&L is measured per calendar day of the market data.
fn roll_trading_day(session: &mut Session, timestamp: DateTime<Utc>) -> Result<(), RecorderError> {
    let day = timestamp.date_naive();
    match session.trading_day {
        Some(current) if current == day => {}
        Some(_) => {
            let sequence = session.ledger.lock().reset_day();
            info!("New trading day {}", day);
            session.trading_day = Some(day);
            session.recorder.record_day_roll(sequence, timestamp)?;
        }
        None => session.trading_day = Some(day),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{Bar, Side, Symbol};
    use crate::paper_trading::ScriptedSampler;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Emits one queued intent per update
    struct ScriptedStrategy {
        intents: VecDeque<Option<OrderIntent>>,
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
            let intent = self.intents.pop_front().flatten();
            Ok(StrategyOutput {
                intent,
                ..StrategyOutput::default()
            })
        }
    }

    fn daemon(dir: &std::path::Path, intents: Vec<Option<OrderIntent>>) -> TradingDaemon {
        let mut config = PaperTradingConfig::default();
        config.recorder.output_dir = dir.to_path_buf();
        config.recorder.fsync = false;
        config.shutdown_timeout = 1.0;
        let strategy = ScriptedStrategy {
            intents: intents.into(),
        };
        TradingDaemon::new(config, Box::new(strategy))
            .unwrap()
            .with_sampler(Box::new(ScriptedSampler::fixed(Duration::from_millis(100), 0.0)))
    }

    fn update(price: f64) -> MarketUpdate {
        MarketUpdate::new(Symbol::new("NIFTY"), "1m", Bar::flat(price, 100.0, Utc::now()))
    }

    #[test]
    fn test_state_transitions() {
        use DaemonState::*;
        assert!(Stopped.can_transition_to(Starting));
        assert!(Running.can_transition_to(Halted));
        assert!(Halted.can_transition_to(Stopping));
        assert!(!Halted.can_transition_to(Running));
        assert!(!Stopped.can_transition_to(Running));
        assert_eq!(Halted.to_string(), "halted");
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_requires_running_session() {
        let tmp = tempfile::tempdir().unwrap();
        let daemon = daemon(tmp.path(), vec![]);
        let intent = OrderIntent::market(Symbol::new("NIFTY"), Side::Buy, 1.0);
        assert_eq!(
            daemon.submit_intent(intent).err(),
            Some(SubmitRejection::NotRunning(DaemonState::Stopped))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_until_feed_ends() {
        let tmp = tempfile::tempdir().unwrap();
        let mut daemon = daemon(
            tmp.path(),
            vec![Some(OrderIntent::market(Symbol::new("NIFTY"), Side::Buy, 2.0)), None],
        );
        let subscriber = daemon.bus().subscribe();

        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(update(100.0)).unwrap();
        let feeder = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            tx.send(update(101.0)).unwrap();
        });

        let record = daemon.run(rx, std::future::pending::<()>()).await.unwrap();
        feeder.await.unwrap();

        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(record.end_time.is_some());
        assert_eq!(daemon.positions()[0].net_quantity, 2.0);

        let kinds: Vec<&str> = std::iter::from_fn(|| subscriber.try_recv())
            .map(|e| e.kind())
            .collect();
        assert!(kinds.contains(&"trade_executed"));
        assert_eq!(kinds.last(), Some(&"connection"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_returns_drain_failure_after_finalizing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut daemon = daemon(
            tmp.path(),
            vec![Some(OrderIntent::market(Symbol::new("NIFTY"), Side::Buy, 2.0))],
        );
        let subscriber = daemon.bus().subscribe();
        daemon.start().unwrap();
        daemon.handle_market_update(update(100.0)).await.unwrap();

        let session = daemon.session.as_mut().unwrap();
        let session_dir = session.recorder.session_dir().to_path_buf();
        session.recorder.break_trades_log().unwrap();

        // The fill lands while stop() waits for the order, and its write fails
        let result = daemon.stop().await;
        assert!(
            matches!(result, Err(DaemonError::Recorder(RecorderError::Io { .. }))),
            "{:?}",
            result
        );
        assert_eq!(daemon.state(), DaemonState::Stopped);
        assert!(session_dir.join(crate::recorder::SUMMARY_FILE).exists());
        assert!(daemon.session_record().is_none());

        let kinds: Vec<&str> = std::iter::from_fn(|| subscriber.try_recv())
            .map(|e| e.kind())
            .collect();
        assert!(kinds.contains(&"trade_executed"));
        assert_eq!(kinds.last(), Some(&"connection"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_working_orders_hold_position_slots() {
        let tmp = tempfile::tempdir().unwrap();
        let mut daemon = daemon(tmp.path(), vec![]);
        daemon.config.risk_limits.max_open_positions = 2;
        daemon.start().unwrap();

        let broker = Arc::clone(daemon.broker().unwrap());
        for name in ["A", "B", "C"] {
            broker.update_price(&Symbol::new(name), 100.0);
        }
        let buy = |name: &str| OrderIntent::market(Symbol::new(name), Side::Buy, 1.0);

        // Neither order has filled yet
        daemon.submit_intent(buy("A")).unwrap();
        daemon.submit_intent(buy("B")).unwrap();
        assert_eq!(broker.ledger().lock().open_positions_count(), 0);

        assert_eq!(
            daemon.submit_intent(buy("C")).err(),
            Some(SubmitRejection::PositionLimit { open: 2, limit: 2 })
        );
        // Adding to an instrument that already holds a slot is fine
        assert!(daemon.submit_intent(buy("A")).is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_marks_are_recorded_for_replay() {
        let tmp = tempfile::tempdir().unwrap();
        let mut daemon = daemon(
            tmp.path(),
            vec![Some(OrderIntent::market(Symbol::new("NIFTY"), Side::Buy, 10.0)), None, None],
        );

        let (tx, rx) = mpsc::unbounded_channel();
        let feeder = tokio::spawn(async move {
            for price in [100.0, 90.0, 120.0] {
                tx.send(update(price)).unwrap();
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        });
        let record = daemon.run(rx, std::future::pending::<()>()).await.unwrap();
        feeder.await.unwrap();

        let rebuilt = crate::recorder::replay::rebuild(&record.session_dir).unwrap();
        let live = daemon.account().unwrap();
        assert_eq!(rebuilt.account(), &live);
        assert_eq!(rebuilt.positions(), daemon.positions());
        assert!(live.max_drawdown_seen > 0.0);
    }
}
