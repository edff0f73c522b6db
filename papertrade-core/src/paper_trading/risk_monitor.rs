//! Risk monitor: account limits and session halt
//!
//! Evaluated on every fill and every mark, inside the broker's fill critical
//! section. A halt is one-way: once `halted` is set nothing resets it for the
//! rest of the session.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::ledger::{Account, FillEffect, Position};
use crate::config::RiskLimits;
use crate::error::SubmitRejection;
use crate::market::{Side, Symbol};

/// Why trading was halted
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HaltReason {
    DailyLossLimit,
    #[serde(rename = "max_drawdown_limit")]
    MaxDrawdown,
}

impl HaltReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HaltReason::DailyLossLimit => "daily_loss_limit",
            HaltReason::MaxDrawdown => "max_drawdown_limit",
        }
    }
}

impl fmt::Display for HaltReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Risk state as seen by the daemon and dashboard
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskLimitState {
    pub daily_loss_limit: f64,
    pub position_limit: usize,
    pub drawdown_limit: f64,
    pub open_positions_count: usize,
    pub daily_pnl: f64,
    pub current_drawdown: f64,
    pub halted: bool,
    pub halt_reason: Option<HaltReason>,
    pub halted_at: Option<DateTime<Utc>>,
}

/// Break-even advisory payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BreakEvenAdvisory {
    pub symbol: Symbol,
    /// Side of the order that would close the position
    pub exit_side: Side,
    pub net_quantity: f64,
    pub entry_price: f64,
    pub last_price: f64,
    pub favorable_move: f64,
    /// Suggested stop: the entry price
    pub suggested_stop: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RiskEvent {
    Halted {
        reason: HaltReason,
        daily_pnl: f64,
        drawdown: f64,
        timestamp: DateTime<Utc>,
    },
    BreakEvenAdvisory(BreakEvenAdvisory),
}

/// Risk monitor
pub struct RiskMonitor {
    limits: RiskLimits,
    state: RwLock<RiskLimitState>,
    /// Symbol -> opened_at of the position episode that already got an advisory
    advised: Mutex<HashMap<Symbol, Option<DateTime<Utc>>>>,
}

impl RiskMonitor {
    pub fn new(limits: RiskLimits) -> Self {
        let state = RiskLimitState {
            daily_loss_limit: limits.max_daily_loss,
            position_limit: limits.max_open_positions,
            drawdown_limit: limits.max_drawdown_limit,
            open_positions_count: 0,
            daily_pnl: 0.0,
            current_drawdown: 0.0,
            halted: false,
            halt_reason: None,
            halted_at: None,
        };
        Self {
            limits,
            state: RwLock::new(state),
            advised: Mutex::new(HashMap::new()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Recompute after a fill.
    pub fn on_fill(&self, effect: &FillEffect) -> Vec<RiskEvent> {
        let mut events = Vec::new();
        {
            let mut state = self.state.write();
            state.open_positions_count = effect.open_positions;
        }
        if let Some(event) = self.evaluate_account(&effect.account) {
            events.push(event);
        }
        if let Some(event) = self.check_break_even(&effect.position) {
            events.push(event);
        }
        events
    }

    /// Recompute after a price mark.
    pub fn on_mark(&self, account: &Account, position: Option<&Position>) -> Vec<RiskEvent> {
        let mut events = Vec::new();
        if let Some(event) = self.evaluate_account(account) {
            events.push(event);
        }
        if let Some(event) = position.and_then(|p| self.check_break_even(p)) {
            events.push(event);
        }
        events
    }

    fn evaluate_account(&self, account: &Account) -> Option<RiskEvent> {
        let mut state = self.state.write();
        state.daily_pnl = account.daily_pnl;
        state.current_drawdown = account.current_drawdown();

        if state.halted {
            return None;
        }

        let reason = if account.daily_pnl <= -self.limits.max_daily_loss {
            HaltReason::DailyLossLimit
        } else if state.current_drawdown >= self.limits.max_drawdown_limit {
            HaltReason::MaxDrawdown
        } else {
            return None;
        };

        let now = Utc::now();
        state.halted = true;
        state.halt_reason = Some(reason);
        state.halted_at = Some(now);

        tracing::warn!(
            "🛑 Trading halted: {} (daily P&L {:.2}, drawdown {:.2}%)",
            reason,
            account.daily_pnl,
            state.current_drawdown * 100.0
        );

        Some(RiskEvent::Halted {
            reason,
            daily_pnl: account.daily_pnl,
            drawdown: state.current_drawdown,
            timestamp: now,
        })
    }

    fn check_break_even(&self, position: &Position) -> Option<RiskEvent> {
        let mut advised = self.advised.lock();
        if position.is_flat() {
            advised.remove(&position.symbol);
            return None;
        }

        let favorable = position.favorable_move();
        if favorable < self.limits.breakeven_shift_pct {
            return None;
        }
        if advised.get(&position.symbol) == Some(&position.opened_at) {
            return None;
        }
        advised.insert(position.symbol.clone(), position.opened_at);

        let exit_side = if position.net_quantity > 0.0 { Side::Sell } else { Side::Buy };
        tracing::info!(
            "Break-even advisory for {}: {:.2}% in favor, stop to {:.2}",
            position.symbol,
            favorable * 100.0,
            position.average_price
        );

        Some(RiskEvent::BreakEvenAdvisory(BreakEvenAdvisory {
            symbol: position.symbol.clone(),
            exit_side,
            net_quantity: position.net_quantity,
            entry_price: position.average_price,
            last_price: position.last_price,
            favorable_move: favorable,
            suggested_stop: position.average_price,
        }))
    }

    /// Pre-submission gate. `opens_new_position` is true when the order would
    /// take a flat instrument to a non-zero position; `pending_openings` counts
    /// the other flat instruments that already have an open order working.
    pub fn check_submission(&self, opens_new_position: bool, pending_openings: usize) -> Result<(), SubmitRejection> {
        let state = self.state.read();
        if let Some(reason) = state.halt_reason.filter(|_| state.halted) {
            return Err(SubmitRejection::Halted(reason));
        }
        let committed = state.open_positions_count + pending_openings;
        if opens_new_position && committed >= self.limits.max_open_positions {
            return Err(SubmitRejection::PositionLimit {
                open: committed,
                limit: self.limits.max_open_positions,
            });
        }
        Ok(())
    }

    pub fn is_halted(&self) -> bool {
        self.state.read().halted
    }

    pub fn halt_reason(&self) -> Option<HaltReason> {
        self.state.read().halt_reason
    }

    pub fn state(&self) -> RiskLimitState {
        self.state.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::paper_trading::ledger::Ledger;

    fn limits() -> RiskLimits {
        RiskLimits {
            max_daily_loss: 1_000.0,
            max_open_positions: 2,
            max_drawdown_limit: 0.5,
            breakeven_shift_pct: 0.02,
        }
    }

    #[test]
    fn test_daily_loss_halts_once() {
        let monitor = RiskMonitor::new(limits());
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let symbol = Symbol::new("NIFTY");
        let now = Utc::now();

        let effect = ledger.apply_fill(&symbol, Side::Buy, 100.0, 100.0, 0.0, now);
        assert!(monitor.on_fill(&effect).is_empty());

        ledger.mark(&symbol, 89.0, now);
        let events = monitor.on_mark(ledger.account(), ledger.position(&symbol));
        assert!(matches!(
            events.as_slice(),
            [RiskEvent::Halted { reason: HaltReason::DailyLossLimit, .. }]
        ));
        assert!(monitor.is_halted());

        // Recovery does not resume trading, and the halt is not re-emitted
        ledger.mark(&symbol, 120.0, now);
        let events = monitor.on_mark(ledger.account(), ledger.position(&symbol));
        assert!(events.iter().all(|e| !matches!(e, RiskEvent::Halted { .. })));
        assert_eq!(monitor.halt_reason(), Some(HaltReason::DailyLossLimit));
        assert_eq!(
            monitor.check_submission(false, 0),
            Err(SubmitRejection::Halted(HaltReason::DailyLossLimit))
        );
    }

    #[test]
    fn test_drawdown_halt() {
        let monitor = RiskMonitor::new(RiskLimits {
            max_daily_loss: 1_000_000.0,
            max_drawdown_limit: 0.1,
            ..limits()
        });
        let mut ledger = Ledger::new(10_000.0, 1.0);
        let symbol = Symbol::new("CRUDEOIL");
        let now = Utc::now();

        ledger.apply_fill(&symbol, Side::Buy, 100.0, 100.0, 0.0, now);
        ledger.mark(&symbol, 89.0, now);
        let events = monitor.on_mark(ledger.account(), None);
        assert!(matches!(
            events.as_slice(),
            [RiskEvent::Halted { reason: HaltReason::MaxDrawdown, .. }]
        ));
        assert_eq!(HaltReason::MaxDrawdown.as_str(), "max_drawdown_limit");
    }

    #[test]
    fn test_position_limit_only_blocks_new_positions() {
        let monitor = RiskMonitor::new(limits());
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let now = Utc::now();

        ledger.apply_fill(&Symbol::new("A"), Side::Buy, 1.0, 10.0, 0.0, now);
        let effect = ledger.apply_fill(&Symbol::new("B"), Side::Sell, 1.0, 10.0, 0.0, now);
        monitor.on_fill(&effect);

        assert_eq!(
            monitor.check_submission(true, 0),
            Err(SubmitRejection::PositionLimit { open: 2, limit: 2 })
        );
        assert!(monitor.check_submission(false, 0).is_ok());
    }

    #[test]
    fn test_pending_openings_count_toward_position_limit() {
        let monitor = RiskMonitor::new(limits());
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let effect = ledger.apply_fill(&Symbol::new("A"), Side::Buy, 1.0, 10.0, 0.0, Utc::now());
        monitor.on_fill(&effect);

        assert!(monitor.check_submission(true, 0).is_ok());
        assert_eq!(
            monitor.check_submission(true, 1),
            Err(SubmitRejection::PositionLimit { open: 2, limit: 2 })
        );
        assert!(monitor.check_submission(false, 1).is_ok());
    }

    #[test]
    fn test_break_even_advisory_fires_once_per_episode() {
        let monitor = RiskMonitor::new(limits());
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let symbol = Symbol::new("GOLD");
        let now = Utc::now();

        ledger.apply_fill(&symbol, Side::Buy, 1.0, 100.0, 0.0, now);
        ledger.mark(&symbol, 101.0, now);
        assert!(monitor.on_mark(ledger.account(), ledger.position(&symbol)).is_empty());

        ledger.mark(&symbol, 102.5, now);
        let events = monitor.on_mark(ledger.account(), ledger.position(&symbol));
        match events.as_slice() {
            [RiskEvent::BreakEvenAdvisory(advisory)] => {
                assert_eq!(advisory.exit_side, Side::Sell);
                assert_eq!(advisory.suggested_stop, 100.0);
            }
            other => panic!("unexpected events: {:?}", other),
        }

        ledger.mark(&symbol, 104.0, now);
        assert!(monitor.on_mark(ledger.account(), ledger.position(&symbol)).is_empty());

        // Close and reopen: a new episode re-arms the advisory
        let effect = ledger.apply_fill(&symbol, Side::Sell, 1.0, 104.0, 0.0, now);
        monitor.on_fill(&effect);
        ledger.apply_fill(&symbol, Side::Buy, 1.0, 100.0, 0.0, Utc::now());
        ledger.mark(&symbol, 103.0, now);
        assert_eq!(monitor.on_mark(ledger.account(), ledger.position(&symbol)).len(), 1);
    }
}
