//! Stake sizing for lay bets.
//!
//! A lay stake is the backer's stake we accept; our exposure is the liability
//! `stake × (odds − 1)`. Stakes start as a percentage of the current bankroll,
//! scaled by a condition multiplier, and are then cut back whenever the
//! liability would exceed the bankroll's liability cap.

use chrono::Datelike;

use crate::db::models::{BetResult, Race};
use crate::error::{StrategyError, StrategyResult};

use super::round2;
use super::rules::{StakeManagement, StrategyRules};

/// Stake and liability for one lay, both rounded to pennies.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaySizing {
    pub stake: f64,
    pub liability: f64,
}

/// Composite stake multiplier from going, track shape, month and handicap status.
///
/// Each factor defaults to 1.0 when its table has no entry. The handicap factor
/// only applies when handicaps are allowed through qualification.
pub fn stake_multiplier(race: &Race, rules: &StrategyRules) -> f64 {
    let going = rules.going_adjustments.get(&race.going).copied().unwrap_or(1.0);
    let track = rules
        .track_adjustments
        .get(&race.track_direction)
        .copied()
        .unwrap_or(1.0);
    let month = rules
        .monthly_adjustments
        .get(&race.race_date.month())
        .copied()
        .unwrap_or(1.0);
    let handicap = if race.is_handicap && !rules.exclude_handicaps {
        rules.handicap_stake_multiplier
    } else {
        1.0
    };
    going * track * month * handicap
}

/// Size a lay at decimal `odds` against `bankroll`.
///
/// # Errors
/// `PreconditionViolation` when `odds <= 1.0`; such a price has no liability
/// and the cap cannot be solved for a stake.
pub fn size_lay_stake(
    bankroll: f64,
    odds: f64,
    multiplier: f64,
    stake_management: &StakeManagement,
) -> StrategyResult<LaySizing> {
    if odds.is_nan() || odds <= 1.0 {
        return Err(StrategyError::PreconditionViolation(format!(
            "lay odds must be greater than 1.0, got {}",
            odds
        )));
    }

    let mut stake = bankroll * (stake_management.base_stake_percent / 100.0) * multiplier;
    let mut liability = stake * (odds - 1.0);
    let max_liability = bankroll * (stake_management.max_liability_percent / 100.0);

    if liability > max_liability {
        stake = max_liability / (odds - 1.0);
        liability = max_liability;
    }

    Ok(LaySizing {
        stake: round2(stake),
        liability: round2(liability),
    })
}

/// Settled P/L for the layer: keep the backer's stake on a win, pay the
/// liability on a loss, nothing on a void.
pub fn lay_profit_loss(sizing: LaySizing, result: BetResult) -> f64 {
    match result {
        BetResult::Won => sizing.stake,
        BetResult::Lost => -sizing.liability,
        BetResult::Void => 0.0,
    }
}
