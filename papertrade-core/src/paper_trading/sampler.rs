//! Execution sampling: latency, fill rolls and slippage
//!
//! The broker never touches a random number generator directly. Every stochastic
//! decision goes through an [`ExecutionSampler`], so tests can swap in a
//! [`ScriptedSampler`] and get exact, repeatable fills.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::time::Duration;

use crate::config::ExecutionConfig;

/// Source of the random draws used by the order simulator
pub trait ExecutionSampler: Send + Sync {
    /// Latency before an order resolves, uniform in `[min, max]`
    fn execution_delay(&self, min: Duration, max: Duration) -> Duration;

    /// Fill roll in `[0, 1)`; the order fills when the roll is below `fill_probability`
    fn fill_roll(&self) -> f64;

    /// Adverse slippage fraction, uniform in `[min, max]`
    fn slippage(&self, min: f64, max: f64) -> f64;

    /// Roll in `[0, 1)` compared against `partial_fill_probability`
    fn partial_roll(&self) -> f64;

    /// Share of the remaining quantity filled by a partial execution, in `(0, 1)`
    fn partial_fraction(&self) -> f64;
}

/// Seedable RNG-backed sampler used outside of tests
pub struct RandomSampler {
    rng: Mutex<StdRng>,
}

impl RandomSampler {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionSampler for RandomSampler {
    fn execution_delay(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        self.rng.lock().gen_range(min..=max)
    }

    fn fill_roll(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn slippage(&self, min: f64, max: f64) -> f64 {
        if max <= min {
            return min;
        }
        self.rng.lock().gen_range(min..=max)
    }

    fn partial_roll(&self) -> f64 {
        self.rng.lock().gen::<f64>()
    }

    fn partial_fraction(&self) -> f64 {
        self.rng.lock().gen_range(0.25..0.75)
    }
}

/// Deterministic sampler replaying queued values
///
/// Each queue is consumed front to back; once empty, the fallback value is
/// returned. Scripted delays and slippage ignore the configured bounds.
pub struct ScriptedSampler {
    delays: Mutex<VecDeque<Duration>>,
    fill_rolls: Mutex<VecDeque<f64>>,
    slippages: Mutex<VecDeque<f64>>,
    partial_rolls: Mutex<VecDeque<f64>>,
    fallback_delay: Duration,
    fallback_slippage: f64,
    partial_fraction: f64,
}

impl ScriptedSampler {
    /// Always fills, after `delay`, with `slippage` applied.
    pub fn fixed(delay: Duration, slippage: f64) -> Self {
        Self {
            delays: Mutex::new(VecDeque::new()),
            fill_rolls: Mutex::new(VecDeque::new()),
            slippages: Mutex::new(VecDeque::new()),
            partial_rolls: Mutex::new(VecDeque::new()),
            fallback_delay: delay,
            fallback_slippage: slippage,
            partial_fraction: 0.5,
        }
    }

    pub fn with_delays(self, delays: impl IntoIterator<Item = Duration>) -> Self {
        self.delays.lock().extend(delays);
        self
    }

    pub fn with_fill_rolls(self, rolls: impl IntoIterator<Item = f64>) -> Self {
        self.fill_rolls.lock().extend(rolls);
        self
    }

    pub fn with_slippages(self, slippages: impl IntoIterator<Item = f64>) -> Self {
        self.slippages.lock().extend(slippages);
        self
    }

    pub fn with_partial_rolls(self, rolls: impl IntoIterator<Item = f64>) -> Self {
        self.partial_rolls.lock().extend(rolls);
        self
    }

    pub fn with_partial_fraction(mut self, fraction: f64) -> Self {
        self.partial_fraction = fraction;
        self
    }
}

impl ExecutionSampler for ScriptedSampler {
    fn execution_delay(&self, _min: Duration, _max: Duration) -> Duration {
        self.delays.lock().pop_front().unwrap_or(self.fallback_delay)
    }

    fn fill_roll(&self) -> f64 {
        self.fill_rolls.lock().pop_front().unwrap_or(0.0)
    }

    fn slippage(&self, _min: f64, _max: f64) -> f64 {
        self.slippages.lock().pop_front().unwrap_or(self.fallback_slippage)
    }

    fn partial_roll(&self) -> f64 {
        // 1.0 never falls below a probability in [0, 1]
        self.partial_rolls.lock().pop_front().unwrap_or(1.0)
    }

    fn partial_fraction(&self) -> f64 {
        self.partial_fraction
    }
}

/// Execution model: configured ranges plus the sampler that draws from them
pub struct ExecutionModel {
    config: ExecutionConfig,
    sampler: Box<dyn ExecutionSampler>,
}

impl ExecutionModel {
    pub fn new(config: ExecutionConfig, sampler: Box<dyn ExecutionSampler>) -> Self {
        Self { config, sampler }
    }

    pub fn config(&self) -> &ExecutionConfig {
        &self.config
    }

    pub fn sample_delay(&self) -> Duration {
        let (min, max) = self.config.delay_bounds();
        self.sampler.execution_delay(min, max)
    }

    pub fn sample_fills(&self) -> bool {
        self.sampler.fill_roll() < self.config.fill_probability
    }

    pub fn sample_slippage(&self) -> f64 {
        self.sampler
            .slippage(self.config.slippage_min, self.config.slippage_max)
    }

    /// Fraction of the remaining quantity to fill now, or `None` for a full fill.
    pub fn sample_partial(&self) -> Option<f64> {
        if self.sampler.partial_roll() < self.config.partial_fill_probability {
            Some(self.sampler.partial_fraction().clamp(0.01, 0.99))
        } else {
            None
        }
    }

    pub fn round_price(&self, price: f64) -> f64 {
        match self.config.price_decimals {
            Some(decimals) => round_to(price, decimals),
            None => price,
        }
    }
}

pub(crate) fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_sampler_respects_bounds() {
        let sampler = RandomSampler::seeded(7);
        let min = Duration::from_millis(100);
        let max = Duration::from_millis(500);
        for _ in 0..200 {
            let delay = sampler.execution_delay(min, max);
            assert!(delay >= min && delay <= max);
            let slip = sampler.slippage(0.0, 0.02);
            assert!((0.0..=0.02).contains(&slip));
            let roll = sampler.fill_roll();
            assert!((0.0..1.0).contains(&roll));
        }
        assert_eq!(sampler.slippage(0.01, 0.01), 0.01);
    }

    #[test]
    fn test_seeded_samplers_repeat() {
        let a = RandomSampler::seeded(42);
        let b = RandomSampler::seeded(42);
        for _ in 0..10 {
            assert_eq!(a.fill_roll(), b.fill_roll());
        }
    }

    #[test]
    fn test_scripted_sampler_replays_then_falls_back() {
        let sampler = ScriptedSampler::fixed(Duration::from_millis(200), 0.01)
            .with_delays([Duration::from_millis(50)])
            .with_fill_rolls([0.99]);

        assert_eq!(
            sampler.execution_delay(Duration::ZERO, Duration::ZERO),
            Duration::from_millis(50)
        );
        assert_eq!(
            sampler.execution_delay(Duration::ZERO, Duration::ZERO),
            Duration::from_millis(200)
        );
        assert_eq!(sampler.fill_roll(), 0.99);
        assert_eq!(sampler.fill_roll(), 0.0);
        assert_eq!(sampler.slippage(0.0, 0.02), 0.01);
    }

    #[test]
    fn test_execution_model_decisions() {
        let sampler = ScriptedSampler::fixed(Duration::from_millis(10), 0.01)
            .with_fill_rolls([0.99, 0.5])
            .with_partial_rolls([0.0]);
        let config = ExecutionConfig {
            partial_fill_probability: 0.5,
            ..ExecutionConfig::default()
        };
        let model = ExecutionModel::new(config, Box::new(sampler));

        assert!(!model.sample_fills());
        assert!(model.sample_fills());
        assert_eq!(model.sample_partial(), Some(0.5));
        assert_eq!(model.sample_partial(), None);
        assert_eq!(model.round_price(100.0 * 1.01), 101.0);
    }
}
