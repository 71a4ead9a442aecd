//! The favorite-lay strategy: qualification, staking, outcome simulation and
//! the backtest replay that ties them together. Nothing in here does I/O.

pub mod backtest;
pub mod metrics;
pub mod qualification;
pub mod rules;
pub mod simulator;
pub mod staking;

pub use backtest::BacktestEngine;
pub use rules::{StakeManagement, StrategyRules};
pub use simulator::SeededSource;

/// Round a money or percentage value to 2 decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
