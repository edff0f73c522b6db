//! Session ledger: net positions and the account they roll up into
//!
//! The ledger is the single owned aggregate of financial state for a session.
//! Only the broker's fill-application step mutates positions; marks update
//! unrealized P&L and the account figures derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::market::{Side, Symbol};

/// Quantities closer to zero than this are treated as flat.
pub const QTY_EPSILON: f64 = 1e-9;

/// Net position in one instrument
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed: long > 0, short < 0
    pub net_quantity: f64,
    /// Volume-weighted entry price of the open quantity
    pub average_price: f64,
    /// Price P&L booked by quantity-reducing fills, before commission
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub commission_paid: f64,
    pub last_price: f64,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Position {
    fn new(symbol: Symbol, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol,
            net_quantity: 0.0,
            average_price: 0.0,
            realized_pnl: 0.0,
            unrealized_pnl: 0.0,
            commission_paid: 0.0,
            last_price: 0.0,
            opened_at: None,
            updated_at: timestamp,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.net_quantity.abs() < QTY_EPSILON
    }

    /// Realized P&L after all commission paid on this instrument
    pub fn net_realized_pnl(&self) -> f64 {
        self.realized_pnl - self.commission_paid
    }

    /// Favorable move of the last mark relative to entry, as a fraction
    pub fn favorable_move(&self) -> f64 {
        if self.is_flat() || self.average_price <= 0.0 {
            return 0.0;
        }
        let direction = self.net_quantity.signum();
        direction * (self.last_price - self.average_price) / self.average_price
    }

    pub fn market_value(&self) -> f64 {
        self.net_quantity * self.last_price
    }

    fn mark(&mut self, price: f64) {
        self.last_price = price;
        self.unrealized_pnl = if self.is_flat() {
            0.0
        } else {
            (price - self.average_price) * self.net_quantity
        };
    }

    /// Apply a fill. Returns the realized P&L it booked and the quantity it closed.
    fn apply(
        &mut self,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
        timestamp: DateTime<Utc>,
    ) -> (f64, f64) {
        let signed = side.multiplier() * quantity;
        let current = self.net_quantity;
        let mut realized = 0.0;
        let mut closing = 0.0;

        if current.abs() < QTY_EPSILON || current.signum() == signed.signum() {
            // Opening or adding: blend into the volume-weighted entry
            let open_qty = current.abs();
            self.average_price = (self.average_price * open_qty + price * quantity) / (open_qty + quantity);
            self.net_quantity = current + signed;
            if open_qty < QTY_EPSILON {
                self.opened_at = Some(timestamp);
            }
        } else {
            // Reducing, closing or flipping
            closing = quantity.min(current.abs());
            realized = (price - self.average_price) * closing * current.signum();
            self.realized_pnl += realized;

            let remaining = current + signed;
            if remaining.abs() < QTY_EPSILON {
                self.net_quantity = 0.0;
                self.average_price = 0.0;
                self.opened_at = None;
            } else if remaining.signum() != current.signum() {
                // Flipped through zero: the excess opens at the fill price
                self.net_quantity = remaining;
                self.average_price = price;
                self.opened_at = Some(timestamp);
            } else {
                self.net_quantity = remaining;
            }
        }

        self.commission_paid += commission;
        self.updated_at = timestamp;
        self.mark(price);
        (realized, closing)
    }
}

/// Account figures for the session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub initial_capital: f64,
    pub cash_balance: f64,
    /// cash + market value of open positions
    pub equity: f64,
    pub margin_used: f64,
    /// equity change since the start of the trading day
    pub daily_pnl: f64,
    pub peak_equity: f64,
    /// Worst peak-to-trough decline seen, as a fraction of peak
    pub max_drawdown_seen: f64,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    fn new(initial_capital: f64) -> Self {
        Self {
            initial_capital,
            cash_balance: initial_capital,
            equity: initial_capital,
            margin_used: 0.0,
            daily_pnl: 0.0,
            peak_equity: initial_capital,
            max_drawdown_seen: 0.0,
            updated_at: Utc::now(),
        }
    }

    /// Current decline from peak equity, as a fraction
    pub fn current_drawdown(&self) -> f64 {
        if self.peak_equity <= 0.0 {
            return 0.0;
        }
        ((self.peak_equity - self.equity) / self.peak_equity).max(0.0)
    }

    pub fn total_pnl(&self) -> f64 {
        self.equity - self.initial_capital
    }
}

/// Result of applying one fill to the ledger
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FillEffect {
    pub position: Position,
    pub account: Account,
    /// Realized price P&L booked by this fill (zero for opening fills)
    pub realized_pnl: f64,
    /// Quantity of the prior position this fill closed
    pub closed_quantity: f64,
    pub open_positions: usize,
    /// Ledger mutation counter after this fill
    pub sequence: u64,
}

/// Result of marking one instrument to market
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarkEffect {
    pub position: Option<Position>,
    pub account: Account,
    pub timestamp: DateTime<Utc>,
    /// Ledger mutation counter after this mark
    pub sequence: u64,
}

/// Positions plus account for one session
///
/// Every mutation (fill, mark, day roll) bumps `sequence`, so a recorded
/// session can be replayed in exactly the order it was applied.
#[derive(Clone, Debug)]
pub struct Ledger {
    positions: BTreeMap<Symbol, Position>,
    account: Account,
    margin_requirement: f64,
    day_start_equity: f64,
    sequence: u64,
}

impl Ledger {
    pub fn new(initial_capital: f64, margin_requirement: f64) -> Self {
        Self {
            positions: BTreeMap::new(),
            account: Account::new(initial_capital),
            margin_requirement,
            day_start_equity: initial_capital,
            sequence: 0,
        }
    }

    /// Apply one fill: position, cash and derived account figures change together.
    pub fn apply_fill(
        &mut self,
        symbol: &Symbol,
        side: Side,
        quantity: f64,
        price: f64,
        commission: f64,
        timestamp: DateTime<Utc>,
    ) -> FillEffect {
        let position = self
            .positions
            .entry(symbol.clone())
            .or_insert_with(|| Position::new(symbol.clone(), timestamp));
        let (realized, closed) = position.apply(side, quantity, price, commission, timestamp);
        let position = position.clone();

        let notional = price * quantity;
        match side {
            Side::Buy => self.account.cash_balance -= notional + commission,
            Side::Sell => self.account.cash_balance += notional - commission,
        }
        self.recompute(timestamp);
        self.sequence += 1;

        FillEffect {
            position,
            account: self.account.clone(),
            realized_pnl: realized,
            closed_quantity: closed,
            open_positions: self.open_positions_count(),
            sequence: self.sequence,
        }
    }

    /// Mark an instrument to market.
    pub fn mark(&mut self, symbol: &Symbol, price: f64, timestamp: DateTime<Utc>) -> MarkEffect {
        let position = self.positions.get_mut(symbol).map(|position| {
            position.mark(price);
            position.clone()
        });
        self.recompute(timestamp);
        self.sequence += 1;

        MarkEffect {
            position,
            account: self.account.clone(),
            timestamp,
            sequence: self.sequence,
        }
    }

    fn recompute(&mut self, timestamp: DateTime<Utc>) {
        let market_value: f64 = self.positions.values().map(Position::market_value).sum();
        let gross_exposure: f64 = self
            .positions
            .values()
            .map(|p| p.market_value().abs())
            .sum();

        let account = &mut self.account;
        account.equity = account.cash_balance + market_value;
        account.margin_used = gross_exposure * self.margin_requirement;
        account.daily_pnl = account.equity - self.day_start_equity;
        if account.equity > account.peak_equity {
            account.peak_equity = account.equity;
        }
        account.max_drawdown_seen = account.max_drawdown_seen.max(account.current_drawdown());
        account.updated_at = timestamp;
    }

    /// Start a new trading day: daily P&L is measured from current equity.
    /// Returns the sequence number of the roll.
    pub fn reset_day(&mut self) -> u64 {
        self.day_start_equity = self.account.equity;
        self.account.daily_pnl = 0.0;
        self.sequence += 1;
        self.sequence
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    pub fn position(&self, symbol: &Symbol) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// All positions ever opened this session, flat ones included
    pub fn positions(&self) -> Vec<Position> {
        self.positions.values().cloned().collect()
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.positions.values().filter(|p| !p.is_flat()).cloned().collect()
    }

    pub fn open_positions_count(&self) -> usize {
        self.positions.values().filter(|p| !p.is_flat()).count()
    }

    pub fn net_quantity(&self, symbol: &Symbol) -> f64 {
        self.positions.get(symbol).map(|p| p.net_quantity).unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    #[test]
    fn test_position_lifecycle() {
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let symbol = Symbol::new("GOLDGUINEA");
        let now = Utc::now();

        let effect = ledger.apply_fill(&symbol, Side::Buy, 10.0, 100.0, 20.0, now);
        assert_eq!(effect.position.net_quantity, 10.0);
        assert_eq!(effect.position.average_price, 100.0);
        assert_eq!(effect.realized_pnl, 0.0);
        assert_eq!(effect.account.cash_balance, 100_000.0 - 1_000.0 - 20.0);
        assert_eq!(effect.open_positions, 1);

        let marked = ledger.mark(&symbol, 110.0, now);
        assert_eq!(marked.position.unwrap().unrealized_pnl, 100.0);
        assert_eq!(marked.sequence, 2);
        assert!(approx(ledger.account().equity, 100_000.0 - 20.0 + 100.0));

        let effect = ledger.apply_fill(&symbol, Side::Sell, 10.0, 110.0, 20.0, now);
        assert!(effect.position.is_flat());
        assert_eq!(effect.realized_pnl, 100.0);
        assert_eq!(effect.closed_quantity, 10.0);
        assert_eq!(effect.position.net_realized_pnl(), 60.0);
        assert_eq!(effect.open_positions, 0);
        assert!(approx(effect.account.cash_balance, 100_060.0));
    }

    #[test]
    fn test_vwap_on_adds_and_realized_on_reduce() {
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let symbol = Symbol::new("NIFTY");
        let now = Utc::now();

        ledger.apply_fill(&symbol, Side::Buy, 10.0, 100.0, 0.0, now);
        let effect = ledger.apply_fill(&symbol, Side::Buy, 30.0, 104.0, 0.0, now);
        assert!(approx(effect.position.average_price, 103.0));
        assert_eq!(effect.position.realized_pnl, 0.0);

        let effect = ledger.apply_fill(&symbol, Side::Sell, 20.0, 108.0, 0.0, now);
        assert_eq!(effect.position.net_quantity, 20.0);
        assert!(approx(effect.realized_pnl, 100.0));
        // Average entry is unchanged by a reduction
        assert!(approx(effect.position.average_price, 103.0));
    }

    #[test]
    fn test_vwap_does_not_depend_on_fill_order() {
        let symbol = Symbol::new("GOLDGUINEA");
        let now = Utc::now();
        let fills = [(10.0, 100.0), (5.0, 106.0), (20.0, 98.5), (7.0, 101.25)];
        let total_qty: f64 = fills.iter().map(|(q, _)| q).sum();
        let vwap = fills.iter().map(|(q, p)| q * p).sum::<f64>() / total_qty;

        for order in [[0, 1, 2, 3], [3, 2, 1, 0], [2, 0, 3, 1], [1, 3, 0, 2]] {
            let mut ledger = Ledger::new(1_000_000.0, 1.0);
            for index in order {
                let (quantity, price) = fills[index];
                ledger.apply_fill(&symbol, Side::Buy, quantity, price, 0.0, now);
            }
            let position = ledger.position(&symbol).unwrap();
            assert_eq!(position.net_quantity, total_qty);
            assert!(approx(position.average_price, vwap), "{:?}: {}", order, position.average_price);
            assert!(approx(ledger.account().cash_balance, 1_000_000.0 - vwap * total_qty));
        }
    }

    #[test]
    fn test_short_and_flip() {
        let mut ledger = Ledger::new(100_000.0, 1.0);
        let symbol = Symbol::new("CRUDEOIL");
        let now = Utc::now();

        ledger.apply_fill(&symbol, Side::Sell, 5.0, 200.0, 0.0, now);
        assert_eq!(ledger.net_quantity(&symbol), -5.0);

        // Buy 8: closes 5 short at a 10 profit each, opens 3 long at 190
        let effect = ledger.apply_fill(&symbol, Side::Buy, 8.0, 190.0, 0.0, now);
        assert!(approx(effect.realized_pnl, 50.0));
        assert_eq!(effect.position.net_quantity, 3.0);
        assert_eq!(effect.position.average_price, 190.0);
    }

    #[test]
    fn test_drawdown_and_daily_pnl() {
        let mut ledger = Ledger::new(10_000.0, 0.5);
        let symbol = Symbol::new("BANKNIFTY");
        let now = Utc::now();

        ledger.apply_fill(&symbol, Side::Buy, 10.0, 100.0, 0.0, now);
        ledger.mark(&symbol, 150.0, now);
        assert!(approx(ledger.account().peak_equity, 10_500.0));
        assert!(approx(ledger.account().margin_used, 750.0));

        ledger.mark(&symbol, 45.0, now);
        let account = ledger.account();
        assert!(approx(account.equity, 9_450.0));
        assert!(approx(account.daily_pnl, -550.0));
        assert!(approx(account.current_drawdown(), 0.1));
        assert!(approx(account.max_drawdown_seen, 0.1));

        ledger.reset_day();
        assert_eq!(ledger.account().daily_pnl, 0.0);
        ledger.mark(&symbol, 40.0, now);
        assert!(approx(ledger.account().daily_pnl, -50.0));
    }
}
