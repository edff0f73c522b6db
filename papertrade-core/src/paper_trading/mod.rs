//! Paper trading execution core
//!
//! Simulated broker with latency, slippage and commission, the session ledger it
//! books fills into, and the risk monitor that can halt the session.

pub mod broker;
pub mod commission;
pub mod ledger;
pub mod risk_monitor;
pub mod sampler;

pub use broker::{
    BrokerEvent, Fill, Order, OrderHandle, OrderStatistics, OrderStatus, OrderType, PaperBroker,
};
pub use commission::{CommissionConfig, CommissionModel};
pub use ledger::{Account, FillEffect, Ledger, MarkEffect, Position};
pub use risk_monitor::{BreakEvenAdvisory, HaltReason, RiskEvent, RiskLimitState, RiskMonitor};
pub use sampler::{ExecutionModel, ExecutionSampler, RandomSampler, ScriptedSampler};
