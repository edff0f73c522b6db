//! Synthetic market feed
//!
//! Random-walk bars for a fixed set of instruments, one bar per instrument per
//! tick. Used when no live data source is wired in.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

use papertrade_core::{Bar, MarketUpdate, Symbol};

pub struct SyntheticFeed {
    instruments: Vec<(Symbol, f64)>,
    interval: Duration,
    /// Max relative move per bar
    volatility: f64,
    seed: Option<u64>,
}

impl SyntheticFeed {
    pub fn new(instruments: Vec<(Symbol, f64)>, interval: Duration) -> Self {
        Self {
            instruments,
            interval,
            volatility: 0.002,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Spawn the generator. The feed ends when the receiver is dropped.
    pub fn spawn(self) -> mpsc::Receiver<MarketUpdate> {
        let (tx, rx) = mpsc::channel(1024);

        tokio::spawn(async move {
            let mut rng = match self.seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_entropy(),
            };
            let mut prices: Vec<f64> = self.instruments.iter().map(|(_, p)| *p).collect();
            let mut ticker = tokio::time::interval(self.interval);
            let timeframe = format!("{}s", self.interval.as_secs().max(1));

            info!("📡 Synthetic feed started for {} instruments", self.instruments.len());

            loop {
                ticker.tick().await;
                let now = Utc::now();

                for ((symbol, _), price) in self.instruments.iter().zip(prices.iter_mut()) {
                    let open = *price;
                    let close = (open * (1.0 + rng.gen_range(-self.volatility..self.volatility)))
                        .max(0.01);
                    let wick = open.max(close) * rng.gen_range(0.0..self.volatility / 2.0);
                    let bar = Bar {
                        timestamp: now,
                        open,
                        high: open.max(close) + wick,
                        low: (open.min(close) - wick).max(0.01),
                        close,
                        volume: rng.gen_range(100.0..5000.0_f64).round(),
                    };
                    *price = close;

                    if tx
                        .send(MarketUpdate::new(symbol.clone(), timeframe.clone(), bar))
                        .await
                        .is_err()
                    {
                        debug!("Feed receiver dropped, stopping generator");
                        return;
                    }
                }
            }
        });

        rx
    }
}
