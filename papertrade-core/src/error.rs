//! Error types for the paper trading core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::daemon::DaemonState;
use crate::market::Symbol;
use crate::paper_trading::risk_monitor::HaltReason;
use crate::paper_trading::OrderStatus;

/// Structural problems with an order, detected synchronously on submit
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("quantity must be positive and finite, got {0}")]
    InvalidQuantity(f64),

    #[error("invalid instrument symbol: {0:?}")]
    InvalidSymbol(String),

    #[error("unknown instrument: {0}")]
    UnknownInstrument(Symbol),

    #[error("order type {0} is not allowed")]
    OrderTypeNotAllowed(String),

    #[error("limit order requires a positive limit price")]
    MissingLimitPrice,

    #[error("stop order requires a positive stop price")]
    MissingStopPrice,

    #[error("price must be positive and finite, got {0}")]
    InvalidPrice(f64),
}

/// Why an order ended in REJECTED
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "code", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    #[error("validation failed: {0}")]
    Validation(ValidationError),

    #[error("simulated no-fill")]
    NoFill,

    #[error("no reference price for market order")]
    NoReferencePrice,
}

impl RejectReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NoFill => "NO_FILL",
            Self::NoReferencePrice => "NO_REFERENCE_PRICE",
        }
    }
}

/// Submission refused by the daemon before the order reaches the broker
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SubmitRejection {
    #[error("trading halted: {0}")]
    Halted(HaltReason),

    #[error("open position limit reached: {open}/{limit}")]
    PositionLimit { open: usize, limit: usize },

    #[error("daemon is not accepting orders while {0}")]
    NotRunning(DaemonState),
}

impl SubmitRejection {
    /// Machine-readable reason, distinct from broker reject codes.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Halted(reason) => reason.as_str(),
            Self::PositionLimit { .. } => "position_limit",
            Self::NotRunning(_) => "not_running",
        }
    }
}

/// Why an order amendment was refused
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModifyRejection {
    #[error("unknown order: {0}")]
    UnknownOrder(String),

    #[error("order is no longer open ({0:?})")]
    NotOpen(OrderStatus),

    #[error("market orders have no price to amend")]
    NoPriceToAmend,

    #[error("invalid amendment: {0}")]
    Invalid(ValidationError),
}

/// Durable-write failures in the session recorder
#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("malformed record in {path} at line {line}: {message}")]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("session already finalized")]
    Finalized,
}

impl RecorderError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid configuration value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            message: message.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("session recorder failure: {0}")]
    Recorder(#[from] RecorderError),

    #[error("invalid daemon transition from {from} to {to}")]
    InvalidTransition { from: DaemonState, to: DaemonState },

    #[error("daemon has no active session")]
    NotStarted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_codes_are_distinct_from_halt_reasons() {
        assert_eq!(RejectReason::NoFill.code(), "NO_FILL");
        assert_eq!(
            RejectReason::Validation(ValidationError::MissingLimitPrice).code(),
            "VALIDATION"
        );
        let halted = SubmitRejection::Halted(HaltReason::DailyLossLimit);
        assert_eq!(halted.reason(), "daily_loss_limit");
        let limit = SubmitRejection::PositionLimit { open: 3, limit: 3 };
        assert_eq!(limit.reason(), "position_limit");
    }

    #[test]
    fn test_reject_reason_serialization() {
        let json = serde_json::to_value(RejectReason::NoFill).unwrap();
        assert_eq!(json["code"], "NO_FILL");

        let json = serde_json::to_value(RejectReason::Validation(
            ValidationError::InvalidQuantity(-1.0),
        ))
        .unwrap();
        assert_eq!(json["code"], "VALIDATION");
        assert_eq!(json["detail"]["kind"], "invalid_quantity");
    }
}
