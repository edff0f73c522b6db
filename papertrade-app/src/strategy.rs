//! Moving-average crossover demo strategy

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

use papertrade_core::events::{IndicatorData, SignalData};
use papertrade_core::{
    MarketUpdate, OrderIntent, Side, Strategy, StrategyContext, StrategyOutput, Symbol,
};

#[derive(Default)]
struct SymbolState {
    closes: VecDeque<f64>,
    /// Last observed sign of fast - slow
    above: Option<bool>,
    signals: u64,
}

/// Goes long when the fast SMA crosses above the slow one and short on the
/// opposite cross. Existing exposure is reversed in a single order.
pub struct SmaCrossover {
    name: String,
    fast: usize,
    slow: usize,
    quantity: f64,
    state: HashMap<Symbol, SymbolState>,
}

impl SmaCrossover {
    pub fn new(name: impl Into<String>, fast: usize, slow: usize, quantity: f64) -> Self {
        Self {
            name: name.into(),
            fast: fast.max(1),
            slow: slow.max(fast + 1),
            quantity,
            state: HashMap::new(),
        }
    }
}

fn mean(values: impl Iterator<Item = f64>, n: usize) -> f64 {
    values.sum::<f64>() / n as f64
}

#[async_trait]
impl Strategy for SmaCrossover {
    fn name(&self) -> &str {
        &self.name
    }

    async fn on_market_update(
        &mut self,
        update: &MarketUpdate,
        context: &StrategyContext,
    ) -> anyhow::Result<StrategyOutput> {
        let (fast_n, slow_n) = (self.fast, self.slow);
        let state = self.state.entry(update.symbol.clone()).or_default();
        let close = update.reference_price();

        state.closes.push_back(close);
        if state.closes.len() > slow_n {
            state.closes.pop_front();
        }
        if state.closes.len() < slow_n {
            return Ok(StrategyOutput::none());
        }

        let fast = mean(state.closes.iter().rev().take(fast_n).copied(), fast_n);
        let slow = mean(state.closes.iter().copied(), slow_n);
        let above = fast > slow;
        let crossed = state.above.map_or(false, |prev| prev != above);
        state.above = Some(above);

        let mut indicators = IndicatorData {
            symbol: update.symbol.clone(),
            price: close,
            trend: Some(if above { "up" } else { "down" }.to_string()),
            ..Default::default()
        };
        indicators.values.insert(format!("sma_{}", fast_n), fast);
        indicators.values.insert(format!("sma_{}", slow_n), slow);

        let mut output = StrategyOutput {
            indicators: Some(indicators),
            ..Default::default()
        };
        if !crossed {
            return Ok(output);
        }

        state.signals += 1;
        let direction = if above { Side::Buy } else { Side::Sell };
        if let Some(indicators) = output.indicators.as_mut() {
            indicators.counts.insert("signals".to_string(), state.signals);
        }
        output.signal = Some(SignalData {
            symbol: update.symbol.clone(),
            direction,
            entry_price: close,
            reason: Some(format!("sma_{} crossed {} sma_{}", fast_n, if above { "above" } else { "below" }, slow_n)),
        });

        if context.halted {
            debug!("Trading halted, signal on {} not acted on", update.symbol);
            return Ok(output);
        }

        // Reverse any exposure against the signal, then open the new side
        let net = context.position.as_ref().map_or(0.0, |p| p.net_quantity);
        let against = match direction {
            Side::Buy => (-net).max(0.0),
            Side::Sell => net.max(0.0),
        };
        let already_with = net * direction.multiplier() > 0.0;
        let quantity = if already_with { against } else { against + self.quantity };
        if quantity > 0.0 {
            output = output.with_intent(OrderIntent::market(update.symbol.clone(), direction, quantity));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use papertrade_core::{Account, Bar};

    fn context(net: f64) -> StrategyContext {
        let mut position = None;
        if net != 0.0 {
            position = Some(papertrade_core::Position {
                symbol: Symbol::new("DEMO"),
                net_quantity: net,
                average_price: 100.0,
                realized_pnl: 0.0,
                unrealized_pnl: 0.0,
                commission_paid: 0.0,
                last_price: 100.0,
                opened_at: Some(Utc::now()),
                updated_at: Utc::now(),
            });
        }
        StrategyContext {
            account: Account {
                initial_capital: 100_000.0,
                cash_balance: 100_000.0,
                equity: 100_000.0,
                margin_used: 0.0,
                daily_pnl: 0.0,
                peak_equity: 100_000.0,
                max_drawdown_seen: 0.0,
                updated_at: Utc::now(),
            },
            position,
            halted: false,
        }
    }

    fn update(price: f64) -> MarketUpdate {
        MarketUpdate::new(Symbol::new("DEMO"), "1s", Bar::flat(price, 100.0, Utc::now()))
    }

    #[test]
    fn test_quiet_until_slow_window_fills() {
        let mut strategy = SmaCrossover::new("sma", 2, 4, 1.0);
        for price in [100.0, 101.0, 102.0] {
            let output =
                tokio_test::block_on(strategy.on_market_update(&update(price), &context(0.0))).unwrap();
            assert!(output.indicators.is_none());
            assert!(output.intent.is_none());
        }
        let output = tokio_test::block_on(strategy.on_market_update(&update(103.0), &context(0.0))).unwrap();
        let indicators = output.indicators.unwrap();
        assert_eq!(indicators.values["sma_2"], 102.5);
        assert_eq!(indicators.values["sma_4"], 101.5);
        assert_eq!(indicators.trend.as_deref(), Some("up"));
        assert!(output.signal.is_none());
    }

    #[tokio::test]
    async fn test_crossover_reverses_short() {
        let mut strategy = SmaCrossover::new("sma", 2, 3, 5.0);
        for price in [100.0, 99.0, 98.0, 97.0] {
            let output = strategy.on_market_update(&update(price), &context(0.0)).await.unwrap();
            assert!(output.intent.is_none());
        }

        let output = strategy.on_market_update(&update(103.0), &context(-5.0)).await.unwrap();
        let intent = output.intent.expect("cross up should trade");
        assert_eq!(intent.side, Side::Buy);
        assert_eq!(intent.quantity, 10.0);
        assert_eq!(output.signal.unwrap().direction, Side::Buy);
    }
}
