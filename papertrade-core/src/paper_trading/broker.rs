//! Paper broker: simulated order execution
//!
//! Orders are validated synchronously on submit and then resolved by a deferred
//! task after a sampled latency. Every state change that touches money happens
//! while the session ledger is locked, and the matching events are emitted before
//! the lock is released, so subscribers observe fills in the order they were
//! applied.
//!
//! Lock order is always ledger first, then the order maps. No `DashMap` guard is
//! held while the ledger is being acquired.

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::commission::CommissionModel;
use super::ledger::{FillEffect, Ledger, MarkEffect, QTY_EPSILON};
use super::risk_monitor::{RiskEvent, RiskMonitor};
use super::sampler::ExecutionModel;
use crate::error::{ModifyRejection, RejectReason, ValidationError};
use crate::market::{Side, Symbol};

/// Order type
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Market,
    Limit,
    /// Stop-limit: once the stop price is reached, rests as a limit order
    StopLoss,
    /// Once the stop price is reached, executes as a market order
    StopLossMarket,
}

impl OrderType {
    pub fn is_stop(&self) -> bool {
        matches!(self, OrderType::StopLoss | OrderType::StopLossMarket)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
            OrderType::StopLossMarket => write!(f, "STOP_LOSS_MARKET"),
        }
    }
}

/// Order status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Acked,
    PartiallyFilled,
    Filled,
    Rejected,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Rejected | OrderStatus::Cancelled
        )
    }
}

/// Order structure
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub order_type: OrderType,
    pub quantity: f64,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
    /// Stop orders: the stop price has been reached
    pub triggered: bool,
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub average_fill_price: f64,
    pub commission: f64,
    pub reject_reason: Option<RejectReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub filled_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn market(symbol: Symbol, side: Side, quantity: f64) -> Self {
        Self::new(symbol, side, OrderType::Market, quantity, None)
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: f64, limit_price: f64) -> Self {
        Self::new(symbol, side, OrderType::Limit, quantity, Some(limit_price))
    }

    pub fn stop_market(symbol: Symbol, side: Side, quantity: f64, stop_price: f64) -> Self {
        Self::new(symbol, side, OrderType::StopLossMarket, quantity, None).with_stop(stop_price)
    }

    pub fn stop_limit(symbol: Symbol, side: Side, quantity: f64, stop_price: f64, limit_price: f64) -> Self {
        Self::new(symbol, side, OrderType::StopLoss, quantity, Some(limit_price)).with_stop(stop_price)
    }

    pub fn with_stop(mut self, stop_price: f64) -> Self {
        self.stop_price = Some(stop_price);
        self
    }

    pub fn new(
        symbol: Symbol,
        side: Side,
        order_type: OrderType,
        quantity: f64,
        limit_price: Option<f64>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: format!("ORD_{}_{}", now.timestamp_millis(), nanoid::nanoid!(8)),
            symbol,
            side,
            order_type,
            quantity,
            limit_price,
            stop_price: None,
            triggered: false,
            status: OrderStatus::New,
            filled_quantity: 0.0,
            average_fill_price: 0.0,
            commission: 0.0,
            reject_reason: None,
            created_at: now,
            updated_at: now,
            filled_at: None,
        }
    }

    pub fn remaining_quantity(&self) -> f64 {
        (self.quantity - self.filled_quantity).max(0.0)
    }

    /// Whether `mark` crosses the limit price. Orders without one always are.
    pub fn is_marketable(&self, mark: f64) -> bool {
        match self.order_type {
            OrderType::Market | OrderType::StopLossMarket => true,
            OrderType::Limit | OrderType::StopLoss => match (self.limit_price, self.side) {
                (Some(limit), Side::Buy) => mark <= limit,
                (Some(limit), Side::Sell) => mark >= limit,
                (None, _) => false,
            },
        }
    }

    /// Stop orders: whether the stop has fired or `mark` reaches it. Buy stops
    /// fire at or above the stop price, sell stops at or below.
    pub fn is_triggered_at(&self, mark: f64) -> bool {
        if !self.order_type.is_stop() || self.triggered {
            return true;
        }
        match (self.stop_price, self.side) {
            (Some(stop), Side::Buy) => mark >= stop,
            (Some(stop), Side::Sell) => mark <= stop,
            (None, _) => false,
        }
    }

    /// Whether a new mark lets a resting order make progress
    fn wakes_on(&self, mark: f64) -> bool {
        match self.order_type {
            OrderType::Market => false,
            OrderType::Limit => self.is_marketable(mark),
            OrderType::StopLossMarket => self.is_triggered_at(mark),
            OrderType::StopLoss if self.triggered => self.is_marketable(mark),
            OrderType::StopLoss => self.is_triggered_at(mark),
        }
    }

    fn apply_fill(&mut self, quantity: f64, price: f64, commission: f64, timestamp: DateTime<Utc>) {
        let previous = self.filled_quantity;
        self.filled_quantity = (previous + quantity).min(self.quantity);
        self.average_fill_price = if previous > 0.0 {
            (self.average_fill_price * previous + price * quantity) / self.filled_quantity
        } else {
            price
        };
        self.commission += commission;
        self.updated_at = timestamp;

        if self.remaining_quantity() < QTY_EPSILON {
            self.status = OrderStatus::Filled;
            self.filled_at = Some(timestamp);
        } else {
            self.status = OrderStatus::PartiallyFilled;
        }
    }

    fn reject(&mut self, reason: RejectReason) {
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason);
        self.updated_at = Utc::now();
    }

    fn cancel(&mut self) {
        self.status = OrderStatus::Cancelled;
        self.updated_at = Utc::now();
    }
}

/// One execution against an order
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub fill_id: String,
    pub order_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub price: f64,
    pub quantity: f64,
    pub commission: f64,
    /// Adverse slippage fraction applied to the reference price (zero for limits)
    pub slippage_applied: f64,
    pub timestamp: DateTime<Utc>,
}

/// Broker output, in application order
#[derive(Clone, Debug)]
pub enum BrokerEvent {
    OrderUpdated(Order),
    FillApplied {
        fill: Fill,
        order: Order,
        effect: FillEffect,
    },
    Risk(RiskEvent),
}

/// Observer for one submitted order
pub struct OrderHandle {
    order_id: String,
    receiver: watch::Receiver<Order>,
}

impl OrderHandle {
    pub fn id(&self) -> &str {
        &self.order_id
    }

    pub fn current(&self) -> Order {
        self.receiver.borrow().clone()
    }

    /// Resolve once the order reaches FILLED, REJECTED or CANCELLED.
    pub async fn wait_terminal(&mut self) -> Order {
        loop {
            {
                let order = self.receiver.borrow_and_update();
                if order.status.is_terminal() {
                    return order.clone();
                }
            }
            if self.receiver.changed().await.is_err() {
                return self.receiver.borrow().clone();
            }
        }
    }
}

/// What woke an order up
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    /// Scheduled latency elapsed
    Delay,
    /// New price mark for a resting order
    Mark,
}

/// Order statistics
#[derive(Default, Clone, Debug, Serialize, Deserialize)]
pub struct OrderStatistics {
    pub total_orders: u64,
    pub open_orders: u64,
    pub filled_orders: u64,
    pub rejected_orders: u64,
    pub cancelled_orders: u64,
    pub fills: u64,
    pub fill_rate: f64,
    pub avg_fill_time_ms: f64,
}

/// Paper broker
pub struct PaperBroker {
    orders: DashMap<String, Order>,
    watchers: DashMap<String, watch::Sender<Order>>,
    /// Orders with a pending deferred execution
    scheduled: DashSet<String>,
    known_instruments: DashSet<Symbol>,
    marks: DashMap<Symbol, f64>,
    ledger: Arc<Mutex<Ledger>>,
    risk: Arc<RiskMonitor>,
    execution: ExecutionModel,
    commission: CommissionModel,
    order_counter: AtomicU64,
    fill_counter: AtomicU64,
    event_sender: mpsc::UnboundedSender<BrokerEvent>,
    event_receiver: Mutex<Option<mpsc::UnboundedReceiver<BrokerEvent>>>,
}

impl PaperBroker {
    pub fn new(
        execution: ExecutionModel,
        commission: CommissionModel,
        ledger: Arc<Mutex<Ledger>>,
        risk: Arc<RiskMonitor>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        Self {
            orders: DashMap::new(),
            watchers: DashMap::new(),
            scheduled: DashSet::new(),
            known_instruments: DashSet::new(),
            marks: DashMap::new(),
            ledger,
            risk,
            execution,
            commission,
            order_counter: AtomicU64::new(0),
            fill_counter: AtomicU64::new(0),
            event_sender: tx,
            event_receiver: Mutex::new(Some(rx)),
        }
    }

    /// Take the event stream. Only the first caller gets it.
    pub fn subscribe(&self) -> Option<mpsc::UnboundedReceiver<BrokerEvent>> {
        self.event_receiver.lock().take()
    }

    /// Make an instrument tradable before its first price arrives.
    pub fn register_instrument(&self, symbol: Symbol) {
        self.known_instruments.insert(symbol);
    }

    /// Submit a new order
    ///
    /// Structural problems reject synchronously and the returned handle is
    /// already terminal. Otherwise the order is ACKED and resolves after the
    /// sampled execution delay.
    pub fn submit(self: &Arc<Self>, mut order: Order) -> OrderHandle {
        self.order_counter.fetch_add(1, Ordering::Relaxed);
        let order_id = order.id.clone();

        if let Err(e) = self.validate(&order) {
            warn!("Order {} rejected: {}", order_id, e);
            order.reject(RejectReason::Validation(e));
            let (_, receiver) = watch::channel(order.clone());
            self.orders.insert(order_id.clone(), order.clone());
            let _ = self.event_sender.send(BrokerEvent::OrderUpdated(order));
            return OrderHandle { order_id, receiver };
        }

        order.status = OrderStatus::Acked;
        order.updated_at = Utc::now();
        let (sender, receiver) = watch::channel(order.clone());
        {
            // Acked must be emitted before any fill of this order can be
            let _ledger = self.ledger.lock();
            self.orders.insert(order_id.clone(), order.clone());
            self.watchers.insert(order_id.clone(), sender);
            let _ = self.event_sender.send(BrokerEvent::OrderUpdated(order.clone()));
        }

        debug!(
            "Order {} acked: {} {} {} @ {:?}",
            order_id, order.side, order.quantity, order.symbol, order.limit_price
        );

        let delay = self.execution.sample_delay();
        self.schedule(&order_id, delay);

        OrderHandle { order_id, receiver }
    }

    fn validate(&self, order: &Order) -> Result<(), ValidationError> {
        if !(order.quantity > 0.0 && order.quantity.is_finite()) {
            return Err(ValidationError::InvalidQuantity(order.quantity));
        }
        if !order.symbol.validate() {
            return Err(ValidationError::InvalidSymbol(order.symbol.0.clone()));
        }
        if !self.known_instruments.contains(&order.symbol) {
            return Err(ValidationError::UnknownInstrument(order.symbol.clone()));
        }
        if !self
            .execution
            .config()
            .allowed_order_types
            .contains(&order.order_type)
        {
            return Err(ValidationError::OrderTypeNotAllowed(order.order_type.to_string()));
        }
        let positive = |price: Option<f64>| matches!(price, Some(p) if p > 0.0 && p.is_finite());
        if matches!(order.order_type, OrderType::Limit | OrderType::StopLoss) && !positive(order.limit_price) {
            return Err(ValidationError::MissingLimitPrice);
        }
        if order.order_type.is_stop() && !positive(order.stop_price) {
            return Err(ValidationError::MissingStopPrice);
        }
        Ok(())
    }

    fn schedule(self: &Arc<Self>, order_id: &str, delay: Duration) {
        self.scheduled.insert(order_id.to_string());
        let broker = Arc::clone(self);
        let order_id = order_id.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            broker.execute_step(&order_id, Trigger::Delay);
        });
    }

    /// Resolve one step of an order. Runs entirely under the ledger lock.
    fn execute_step(self: &Arc<Self>, order_id: &str, trigger: Trigger) {
        let mut ledger = self.ledger.lock();
        if trigger == Trigger::Delay {
            self.scheduled.remove(order_id);
        }

        let Some(mut order) = self.orders.get(order_id).map(|o| o.clone()) else {
            return;
        };
        if order.status.is_terminal() {
            return;
        }
        if trigger == Trigger::Mark && self.scheduled.contains(order_id) {
            return;
        }

        if self.risk.is_halted() {
            order.cancel();
            info!("Order {} cancelled: trading halted", order_id);
            self.commit(order);
            return;
        }

        let reference = self.marks.get(&order.symbol).map(|p| *p);
        if order.order_type.is_stop() && !order.triggered {
            match reference.filter(|mark| order.is_triggered_at(*mark)) {
                Some(mark) => {
                    order.triggered = true;
                    order.updated_at = Utc::now();
                    info!("Order {} stop {:?} triggered at {:.2}", order_id, order.stop_price, mark);
                    self.commit(order.clone());
                }
                None => {
                    debug!("Order {} waiting for stop {:?}", order_id, order.stop_price);
                    return;
                }
            }
        }

        let first_execution = order.filled_quantity <= 0.0;
        if first_execution && trigger == Trigger::Delay && !self.execution.sample_fills() {
            info!("Order {} rejected: simulated no-fill", order_id);
            order.reject(RejectReason::NoFill);
            self.commit(order);
            return;
        }

        let (price, slippage) = match (order.order_type, reference) {
            (OrderType::Market | OrderType::StopLossMarket, Some(mark)) => {
                let slippage = self.execution.sample_slippage();
                let price = mark * (1.0 + order.side.multiplier() * slippage);
                (self.execution.round_price(price), slippage)
            }
            (OrderType::Market | OrderType::StopLossMarket, None) => {
                warn!("Order {} rejected: no reference price for {}", order_id, order.symbol);
                order.reject(RejectReason::NoReferencePrice);
                self.commit(order);
                return;
            }
            (OrderType::Limit | OrderType::StopLoss, Some(mark)) if order.is_marketable(mark) => {
                let limit = order.limit_price.unwrap_or(mark);
                (self.execution.round_price(limit), 0.0)
            }
            (OrderType::Limit | OrderType::StopLoss, _) => {
                debug!("Order {} resting at {:?}", order_id, order.limit_price);
                return;
            }
        };

        let remaining = order.remaining_quantity();
        let quantity = match self.execution.sample_partial() {
            Some(fraction) if first_execution => remaining * fraction,
            _ => remaining,
        };

        let commission = self
            .commission
            .calculate(order.side, price, quantity, first_execution);
        let timestamp = Utc::now();
        let effect = ledger.apply_fill(&order.symbol, order.side, quantity, price, commission, timestamp);
        order.apply_fill(quantity, price, commission, timestamp);
        self.fill_counter.fetch_add(1, Ordering::Relaxed);

        let fill = Fill {
            fill_id: format!("FIL_{}_{}", timestamp.timestamp_millis(), nanoid::nanoid!(8)),
            order_id: order.id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            price,
            quantity,
            commission,
            slippage_applied: slippage,
            timestamp,
        };

        info!(
            "💰 Fill {} {} {:.4} {} @ {:.2} (commission {:.2})",
            order.id, order.side, quantity, order.symbol, price, commission
        );

        let partial = order.status == OrderStatus::PartiallyFilled;
        self.orders.insert(order.id.clone(), order.clone());
        self.notify_watcher(&order);
        let _ = self.event_sender.send(BrokerEvent::FillApplied {
            fill,
            order: order.clone(),
            effect: effect.clone(),
        });

        let risk_events = self.risk.on_fill(&effect);
        self.emit_risk_events(risk_events);

        if partial && !self.risk.is_halted() {
            let delay = self.execution.sample_delay();
            self.schedule(&order.id, delay);
        }
    }

    /// Store an order state change and announce it. Callers hold the ledger lock.
    fn commit(&self, order: Order) {
        self.orders.insert(order.id.clone(), order.clone());
        self.notify_watcher(&order);
        let _ = self.event_sender.send(BrokerEvent::OrderUpdated(order));
    }

    fn notify_watcher(&self, order: &Order) {
        if order.status.is_terminal() {
            if let Some((_, sender)) = self.watchers.remove(&order.id) {
                let _ = sender.send(order.clone());
            }
        } else if let Some(sender) = self.watchers.get(&order.id) {
            let _ = sender.send(order.clone());
        }
    }

    /// Forward risk events; a halt cancels every open order in the same
    /// critical section. Callers hold the ledger lock.
    fn emit_risk_events(&self, events: Vec<RiskEvent>) {
        for event in events {
            let halted = matches!(event, RiskEvent::Halted { .. });
            let _ = self.event_sender.send(BrokerEvent::Risk(event));
            if halted {
                let cancelled = self.cancel_open_locked();
                warn!("Risk halt cancelled {} open orders", cancelled);
            }
        }
    }

    /// Mark an instrument to market and re-check its resting orders.
    pub fn update_price(self: &Arc<Self>, symbol: &Symbol, price: f64) -> MarkEffect {
        self.known_instruments.insert(symbol.clone());
        self.marks.insert(symbol.clone(), price);

        let effect = {
            let mut ledger = self.ledger.lock();
            let effect = ledger.mark(symbol, price, Utc::now());
            let risk_events = self.risk.on_mark(&effect.account, effect.position.as_ref());
            self.emit_risk_events(risk_events);
            effect
        };

        // Collect first: execute_step writes back into `orders`
        let resting: Vec<String> = self
            .orders
            .iter()
            .filter(|entry| {
                let order = entry.value();
                order.symbol == *symbol && !order.status.is_terminal() && order.wakes_on(price)
            })
            .map(|entry| entry.key().clone())
            .collect();

        for order_id in resting {
            self.execute_step(&order_id, Trigger::Mark);
        }

        effect
    }

    /// Amend an open order.
    ///
    /// `price` replaces the limit price of LIMIT and STOP_LOSS orders and the
    /// stop price of STOP_LOSS_MARKET orders. The new quantity must stay above
    /// what has already filled. A resting order that the amendment makes
    /// executable at the current mark is executed straight away.
    pub fn modify(
        self: &Arc<Self>,
        order_id: &str,
        quantity: Option<f64>,
        price: Option<f64>,
    ) -> Result<Order, ModifyRejection> {
        let order = {
            let _ledger = self.ledger.lock();
            let mut order = self
                .orders
                .get(order_id)
                .map(|o| o.clone())
                .ok_or_else(|| ModifyRejection::UnknownOrder(order_id.to_string()))?;
            if order.status.is_terminal() {
                return Err(ModifyRejection::NotOpen(order.status));
            }

            if let Some(quantity) = quantity {
                if !(quantity.is_finite() && quantity - order.filled_quantity > QTY_EPSILON) {
                    return Err(ModifyRejection::Invalid(ValidationError::InvalidQuantity(quantity)));
                }
                order.quantity = quantity;
            }
            if let Some(price) = price {
                if !(price > 0.0 && price.is_finite()) {
                    return Err(ModifyRejection::Invalid(ValidationError::InvalidPrice(price)));
                }
                match order.order_type {
                    OrderType::Market => return Err(ModifyRejection::NoPriceToAmend),
                    OrderType::Limit | OrderType::StopLoss => order.limit_price = Some(price),
                    OrderType::StopLossMarket => order.stop_price = Some(price),
                }
            }

            order.updated_at = Utc::now();
            info!(
                "Order {} modified: qty {} limit {:?} stop {:?}",
                order_id, order.quantity, order.limit_price, order.stop_price
            );
            self.commit(order.clone());
            order
        };

        let executable = self
            .mark_price(&order.symbol)
            .map_or(false, |mark| order.wakes_on(mark));
        if executable && !self.scheduled.contains(order_id) {
            self.execute_step(order_id, Trigger::Mark);
        }
        Ok(self.get_order(order_id).unwrap_or(order))
    }

    /// Cancel an order that has not reached a terminal state.
    pub fn cancel(&self, order_id: &str) -> bool {
        let _ledger = self.ledger.lock();
        self.cancel_locked(order_id)
    }

    /// Cancel every open order. Returns how many were cancelled.
    pub fn cancel_all(&self) -> usize {
        let _ledger = self.ledger.lock();
        self.cancel_open_locked()
    }

    fn cancel_locked(&self, order_id: &str) -> bool {
        let Some(mut order) = self.orders.get(order_id).map(|o| o.clone()) else {
            return false;
        };
        if order.status.is_terminal() {
            return false;
        }
        order.cancel();
        self.scheduled.remove(order_id);
        info!("Order {} cancelled", order_id);
        self.commit(order);
        true
    }

    fn cancel_open_locked(&self) -> usize {
        let open: Vec<String> = self
            .orders
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .map(|entry| entry.key().clone())
            .collect();
        open.iter().filter(|id| self.cancel_locked(id)).count()
    }

    /// Orders waiting on a scheduled execution. Resting limits are not counted.
    pub fn in_flight_count(&self) -> usize {
        self.scheduled.len()
    }

    /// Wait until no execution is pending, up to `timeout`.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        let wait = async {
            while !self.scheduled.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }

    pub fn get_order(&self, order_id: &str) -> Option<Order> {
        self.orders.get(order_id).map(|o| o.clone())
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.orders
            .iter()
            .filter(|entry| !entry.value().status.is_terminal())
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn mark_price(&self, symbol: &Symbol) -> Option<f64> {
        self.marks.get(symbol).map(|p| *p)
    }

    pub fn ledger(&self) -> &Arc<Mutex<Ledger>> {
        &self.ledger
    }

    pub fn risk(&self) -> &Arc<RiskMonitor> {
        &self.risk
    }

    /// Get order statistics
    pub fn get_statistics(&self) -> OrderStatistics {
        let mut stats = OrderStatistics {
            total_orders: self.order_counter.load(Ordering::Relaxed),
            fills: self.fill_counter.load(Ordering::Relaxed),
            ..OrderStatistics::default()
        };

        let mut fill_times = Vec::new();
        for entry in self.orders.iter() {
            let order = entry.value();
            match order.status {
                OrderStatus::Filled => {
                    stats.filled_orders += 1;
                    if let Some(filled_at) = order.filled_at {
                        fill_times.push((filled_at - order.created_at).num_milliseconds() as f64);
                    }
                }
                OrderStatus::Rejected => stats.rejected_orders += 1,
                OrderStatus::Cancelled => stats.cancelled_orders += 1,
                _ => stats.open_orders += 1,
            }
        }

        if stats.total_orders > 0 {
            stats.fill_rate = (stats.filled_orders as f64 / stats.total_orders as f64) * 100.0;
        }
        if !fill_times.is_empty() {
            stats.avg_fill_time_ms = fill_times.iter().sum::<f64>() / fill_times.len() as f64;
        }

        stats
    }
}
