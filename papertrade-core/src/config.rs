//! Paper trading configuration
//!
//! Every tunable in the system lives here with its documented default. The struct
//! is serde-deserializable so the caller can source it from anywhere; this crate
//! never reads configuration files itself.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::paper_trading::commission::CommissionConfig;
use crate::paper_trading::OrderType;

/// Order execution simulation parameters
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Lower bound of the simulated broker latency, seconds
    pub execution_delay_min: f64,
    /// Upper bound of the simulated broker latency, seconds
    pub execution_delay_max: f64,
    /// Adverse slippage lower bound as a fraction of the reference price
    pub slippage_min: f64,
    /// Adverse slippage upper bound as a fraction of the reference price
    pub slippage_max: f64,
    /// Probability that a resolving order fills at all
    pub fill_probability: f64,
    /// Probability that the first execution of an order is partial
    pub partial_fill_probability: f64,
    /// Fill prices are rounded to this many decimals
    pub price_decimals: Option<u32>,
    pub allowed_order_types: Vec<OrderType>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            execution_delay_min: 0.1,
            execution_delay_max: 0.5,
            slippage_min: 0.0,
            slippage_max: 0.02,
            fill_probability: 0.98,
            partial_fill_probability: 0.0,
            price_decimals: Some(2),
            allowed_order_types: vec![
                OrderType::Market,
                OrderType::Limit,
                OrderType::StopLoss,
                OrderType::StopLossMarket,
            ],
        }
    }
}

impl ExecutionConfig {
    pub fn delay_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_secs_f64(self.execution_delay_min),
            Duration::from_secs_f64(self.execution_delay_max),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.execution_delay_min >= 0.0 && self.execution_delay_min.is_finite()) {
            return Err(ConfigError::invalid("execution_delay_min", "must be >= 0"));
        }
        if !(self.execution_delay_max >= self.execution_delay_min && self.execution_delay_max.is_finite()) {
            return Err(ConfigError::invalid(
                "execution_delay_max",
                "must be finite and >= execution_delay_min",
            ));
        }
        if !(0.0..1.0).contains(&self.slippage_min) || self.slippage_max < self.slippage_min || self.slippage_max >= 1.0 {
            return Err(ConfigError::invalid(
                "slippage_max",
                "slippage bounds must satisfy 0 <= min <= max < 1",
            ));
        }
        if !(0.0..=1.0).contains(&self.fill_probability) {
            return Err(ConfigError::invalid("fill_probability", "must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.partial_fill_probability) {
            return Err(ConfigError::invalid("partial_fill_probability", "must be within [0, 1]"));
        }
        if self.allowed_order_types.is_empty() {
            return Err(ConfigError::invalid("allowed_order_types", "at least one order type"));
        }
        Ok(())
    }
}

/// Risk limits enforced by the risk monitor
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RiskLimits {
    /// Session halts once daily P&L reaches minus this amount
    pub max_daily_loss: f64,
    /// New positions are refused once this many are open
    pub max_open_positions: usize,
    /// Session halts once drawdown from peak equity reaches this fraction
    pub max_drawdown_limit: f64,
    /// Favorable move (fraction of entry) that triggers the break-even advisory
    pub breakeven_shift_pct: f64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_daily_loss: 50_000.0,
            max_open_positions: 10,
            max_drawdown_limit: 0.15,
            breakeven_shift_pct: 0.02,
        }
    }
}

impl RiskLimits {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.max_daily_loss > 0.0) {
            return Err(ConfigError::invalid("max_daily_loss", "must be > 0"));
        }
        if self.max_open_positions == 0 {
            return Err(ConfigError::invalid("max_open_positions", "must be >= 1"));
        }
        if !(self.max_drawdown_limit > 0.0 && self.max_drawdown_limit <= 1.0) {
            return Err(ConfigError::invalid("max_drawdown_limit", "must be within (0, 1]"));
        }
        if !(self.breakeven_shift_pct > 0.0) {
            return Err(ConfigError::invalid("breakeven_shift_pct", "must be > 0"));
        }
        Ok(())
    }
}

/// Session recorder settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecorderConfig {
    pub output_dir: PathBuf,
    /// Seconds between live snapshots
    pub update_frequency: f64,
    /// fsync every appended record
    pub fsync: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("runlogs/papertrading"),
            update_frequency: 5.0,
            fsync: true,
        }
    }
}

impl RecorderConfig {
    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_secs_f64(self.update_frequency)
    }
}

/// Dashboard broadcast settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BroadcastConfig {
    pub bind_address: SocketAddr,
    /// Per-subscriber outbound queue capacity
    pub queue_capacity: usize,
    /// Seconds without inbound traffic before a connection is dropped
    pub idle_timeout: f64,
    /// Seconds between server pings
    pub ping_interval: f64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8765)),
            queue_capacity: 256,
            idle_timeout: 60.0,
            ping_interval: 15.0,
        }
    }
}

impl BroadcastConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.idle_timeout)
    }

    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs_f64(self.ping_interval)
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PaperTradingConfig {
    pub strategy_name: String,
    pub initial_capital: f64,
    /// Fraction of gross exposure reported as margin used
    pub margin_requirement: f64,
    pub execution: ExecutionConfig,
    pub commission: CommissionConfig,
    pub risk_limits: RiskLimits,
    pub recorder: RecorderConfig,
    pub broadcast: BroadcastConfig,
    /// Seconds the daemon waits for in-flight orders on shutdown
    pub shutdown_timeout: f64,
}

impl Default for PaperTradingConfig {
    fn default() -> Self {
        Self {
            strategy_name: "unknown_strategy".to_string(),
            initial_capital: 1_000_000.0,
            margin_requirement: 1.0,
            execution: ExecutionConfig::default(),
            commission: CommissionConfig::default(),
            risk_limits: RiskLimits::default(),
            recorder: RecorderConfig::default(),
            broadcast: BroadcastConfig::default(),
            shutdown_timeout: 5.0,
        }
    }
}

impl PaperTradingConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.shutdown_timeout)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.initial_capital > 0.0 && self.initial_capital.is_finite()) {
            return Err(ConfigError::invalid("initial_capital", "must be positive"));
        }
        if !(self.margin_requirement >= 0.0) {
            return Err(ConfigError::invalid("margin_requirement", "must be >= 0"));
        }
        if !(self.shutdown_timeout >= 0.0 && self.shutdown_timeout.is_finite()) {
            return Err(ConfigError::invalid("shutdown_timeout", "must be >= 0"));
        }
        if !(self.recorder.update_frequency > 0.0) {
            return Err(ConfigError::invalid("update_frequency", "must be > 0"));
        }
        if self.broadcast.queue_capacity == 0 {
            return Err(ConfigError::invalid("queue_capacity", "must be >= 1"));
        }
        if !(self.broadcast.idle_timeout > 0.0 && self.broadcast.ping_interval > 0.0) {
            return Err(ConfigError::invalid("idle_timeout", "timeouts must be > 0"));
        }
        self.execution.validate()?;
        self.commission.validate()?;
        self.risk_limits.validate()?;
        Ok(())
    }
}
