//! Market data primitives shared by the broker, the strategy seam and the dashboard stream

pub mod types;

pub use types::{Bar, MarketUpdate, Side, Symbol};
