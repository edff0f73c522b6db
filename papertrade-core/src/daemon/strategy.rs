//! Strategy and market feed seams
//!
//! Signal generation lives outside this crate. The daemon calls a [`Strategy`]
//! once per market update and acts on the intent it returns.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::events::{IndicatorData, SignalData};
use crate::market::{MarketUpdate, Side, Symbol};
use crate::paper_trading::{Account, Order, OrderType, Position};

/// Order the strategy wants placed
#[derive(Clone, Debug, PartialEq)]
pub struct OrderIntent {
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub order_type: OrderType,
    pub limit_price: Option<f64>,
    pub stop_price: Option<f64>,
}

impl OrderIntent {
    fn new(symbol: Symbol, side: Side, quantity: f64, order_type: OrderType) -> Self {
        Self {
            symbol,
            side,
            quantity,
            order_type,
            limit_price: None,
            stop_price: None,
        }
    }

    pub fn market(symbol: Symbol, side: Side, quantity: f64) -> Self {
        Self::new(symbol, side, quantity, OrderType::Market)
    }

    pub fn limit(symbol: Symbol, side: Side, quantity: f64, limit_price: f64) -> Self {
        Self {
            limit_price: Some(limit_price),
            ..Self::new(symbol, side, quantity, OrderType::Limit)
        }
    }

    pub fn stop_market(symbol: Symbol, side: Side, quantity: f64, stop_price: f64) -> Self {
        Self {
            stop_price: Some(stop_price),
            ..Self::new(symbol, side, quantity, OrderType::StopLossMarket)
        }
    }

    pub fn stop_limit(symbol: Symbol, side: Side, quantity: f64, stop_price: f64, limit_price: f64) -> Self {
        Self {
            limit_price: Some(limit_price),
            stop_price: Some(stop_price),
            ..Self::new(symbol, side, quantity, OrderType::StopLoss)
        }
    }

    pub fn into_order(self) -> Order {
        let mut order = Order::new(
            self.symbol,
            self.side,
            self.order_type,
            self.quantity,
            self.limit_price,
        );
        order.stop_price = self.stop_price;
        order
    }
}

/// What the strategy sees besides the update itself
#[derive(Clone, Debug)]
pub struct StrategyContext {
    pub account: Account,
    /// Position in the updated instrument, if one was ever opened
    pub position: Option<Position>,
    pub halted: bool,
}

/// Strategy output for one market update
#[derive(Clone, Debug, Default)]
pub struct StrategyOutput {
    pub intent: Option<OrderIntent>,
    pub indicators: Option<IndicatorData>,
    pub signal: Option<SignalData>,
}

impl StrategyOutput {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_intent(mut self, intent: OrderIntent) -> Self {
        self.intent = Some(intent);
        self
    }
}

/// Pluggable signal generator
#[async_trait]
pub trait Strategy: Send {
    fn name(&self) -> &str;

    async fn on_market_update(
        &mut self,
        update: &MarketUpdate,
        context: &StrategyContext,
    ) -> anyhow::Result<StrategyOutput>;
}

/// Source of market updates. `None` means the feed has ended.
#[async_trait]
pub trait MarketFeed: Send {
    async fn next_update(&mut self) -> Option<MarketUpdate>;
}

#[async_trait]
impl MarketFeed for mpsc::Receiver<MarketUpdate> {
    async fn next_update(&mut self) -> Option<MarketUpdate> {
        self.recv().await
    }
}

#[async_trait]
impl MarketFeed for mpsc::UnboundedReceiver<MarketUpdate> {
    async fn next_update(&mut self) -> Option<MarketUpdate> {
        self.recv().await
    }
}
