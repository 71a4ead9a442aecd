//! Outcome simulation for backtest lay bets.
//!
//! This is a deliberately crude stand-in for real settlement data: a biased
//! coin whose bias drifts with the favorite's price. It is not calibrated and
//! must not be read as a forecast of race outcomes.
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::db::models::BetResult;

/// Baseline chance that a lay on the favorite wins (the favorite gets beaten).
const BASE_LAY_WIN_PROB: f64 = 0.67;
/// Shift in lay win probability per unit of decimal odds away from evens-money 2.0.
const ODDS_SLOPE: f64 = 0.02;
const MIN_LAY_WIN_PROB: f64 = 0.55;
const MAX_LAY_WIN_PROB: f64 = 0.75;

/// Source of uniform draws in `[0, 1)`.
///
/// Each backtest run owns its own source, so runs never share random state.
pub trait UniformSource {
    fn next_uniform(&mut self) -> f64;
}

/// Reproducible source backed by a seeded `StdRng`.
#[derive(Debug, Clone)]
pub struct SeededSource {
    seed: u64,
    rng: StdRng,
}

impl SeededSource {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Seeded from OS entropy; the chosen seed is kept so the run can be replayed.
    pub fn from_entropy() -> Self {
        Self::new(rand::thread_rng().gen())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }
}

impl UniformSource for SeededSource {
    fn next_uniform(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }
}

/// Probability that a lay on a favorite priced at `odds` wins.
///
/// Longer-priced favorites are beaten more often, so the probability rises
/// with the odds, bounded to [0.55, 0.75].
pub fn lay_win_probability(odds: f64) -> f64 {
    (BASE_LAY_WIN_PROB + (odds - 2.0) * ODDS_SLOPE).clamp(MIN_LAY_WIN_PROB, MAX_LAY_WIN_PROB)
}

/// Draw a settled result for a lay at `odds`. Never returns `Void`.
pub fn simulate_lay_result(odds: f64, source: &mut dyn UniformSource) -> BetResult {
    if source.next_uniform() < lay_win_probability(odds) {
        BetResult::Won
    } else {
        BetResult::Lost
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::UniformSource;

    /// Replays a fixed list of draws, cycling when exhausted.
    pub struct ScriptedSource {
        draws: Vec<f64>,
        next: usize,
    }

    impl ScriptedSource {
        pub fn new(draws: Vec<f64>) -> Self {
            Self { draws, next: 0 }
        }
    }

    impl UniformSource for ScriptedSource {
        fn next_uniform(&mut self) -> f64 {
            let value = self.draws[self.next % self.draws.len()];
            self.next += 1;
            value
        }
    }
}
