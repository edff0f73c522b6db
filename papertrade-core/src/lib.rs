//! Paper Trading Core
//!
//! Simulated order execution for trading strategies, with risk enforcement, a
//! durable session record and a live event stream for dashboards. Can be used
//! as a library or through the `papertrade-daemon` binary.

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod events;
pub mod market;
pub mod paper_trading;
pub mod recorder;

// Re-export main types for easy access
pub use api::DashboardServer;
pub use config::{BroadcastConfig, ExecutionConfig, PaperTradingConfig, RecorderConfig, RiskLimits};
pub use daemon::{
    DaemonState, MarketFeed, OrderIntent, Strategy, StrategyContext, StrategyOutput, TradingDaemon,
};
pub use error::{
    ConfigError, DaemonError, ModifyRejection, RecorderError, RejectReason, SubmitRejection,
    ValidationError,
};
pub use events::{DashboardEvent, EventBus, EventPayload, Subscriber};
pub use market::{Bar, MarketUpdate, Side, Symbol};
pub use paper_trading::{
    Account, CommissionConfig, Fill, HaltReason, Ledger, Order, OrderHandle, OrderStatus,
    OrderType, PaperBroker, Position, RandomSampler, ScriptedSampler,
};
pub use recorder::{SessionRecord, SessionRecorder};
