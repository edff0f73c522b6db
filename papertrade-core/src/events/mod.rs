//! Dashboard events
//!
//! Every frame sent to a dashboard client is one [`DashboardEvent`], serialized
//! as `{"type": ..., "data": ..., "timestamp": ...}`.

pub mod bus;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::market::{Bar, Side, Symbol};
use crate::paper_trading::{Account, BreakEvenAdvisory, HaltReason, Position, RiskLimitState};

pub use bus::{ConnectionId, EventBus, Subscriber};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BarData {
    pub symbol: Symbol,
    pub timeframe: String,
    #[serde(flatten)]
    pub bar: Bar,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndicatorData {
    pub symbol: Symbol,
    pub price: f64,
    pub values: BTreeMap<String, f64>,
    pub trend: Option<String>,
    pub counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalData {
    pub symbol: Symbol,
    pub direction: Side,
    pub entry_price: f64,
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeData {
    pub order_id: String,
    pub fill_id: String,
    pub symbol: Symbol,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub realized_pnl: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub account: Account,
    pub positions: Vec<Position>,
    pub risk: RiskLimitState,
    pub daemon_state: String,
}

/// Event payload, tagged by `type` with its body under `data`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    Connection { status: ConnectionStatus },
    BarUpdate(BarData),
    IndicatorUpdate(IndicatorData),
    SignalGenerated(SignalData),
    TradeExecuted(TradeData),
    RiskHalt {
        reason: HaltReason,
        daily_pnl: f64,
        drawdown: f64,
    },
    Snapshot(SnapshotData),
    ResyncRequired { dropped: u64 },
    PositionUpdate {
        account: Account,
        position: Option<Position>,
    },
    RiskAdvisory(BreakEvenAdvisory),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardEvent {
    #[serde(flatten)]
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

impl DashboardEvent {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
        }
    }

    pub fn connection(status: ConnectionStatus) -> Self {
        Self::new(EventPayload::Connection { status })
    }

    pub fn resync_required(dropped: u64) -> Self {
        Self::new(EventPayload::ResyncRequired { dropped })
    }

    /// Wire name of the event type
    pub fn kind(&self) -> &'static str {
        match &self.payload {
            EventPayload::Connection { .. } => "connection",
            EventPayload::BarUpdate(_) => "bar_update",
            EventPayload::IndicatorUpdate(_) => "indicator_update",
            EventPayload::SignalGenerated(_) => "signal_generated",
            EventPayload::TradeExecuted(_) => "trade_executed",
            EventPayload::RiskHalt { .. } => "risk_halt",
            EventPayload::Snapshot(_) => "snapshot",
            EventPayload::ResyncRequired { .. } => "resync_required",
            EventPayload::PositionUpdate { .. } => "position_update",
            EventPayload::RiskAdvisory(_) => "risk_advisory",
        }
    }

    /// Critical events are never dropped under backpressure.
    pub fn is_critical(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::TradeExecuted(_)
                | EventPayload::RiskHalt { .. }
                | EventPayload::Connection { .. }
        )
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
