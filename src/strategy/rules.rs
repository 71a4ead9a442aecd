use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::db::models::{GoingCondition, RaceType, TrackDirection};
use crate::error::{StrategyError, StrategyResult};

/// Qualification rules and condition multipliers for the favorite-lay strategy.
///
/// Multiplier tables only need the keys that deviate from neutral; a missing
/// key multiplies by 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyRules {
    pub min_odds: f64,
    pub max_odds: f64,
    pub min_runners: u32,
    pub max_runners: u32,
    pub allowed_race_types: Vec<RaceType>,
    pub exclude_handicaps: bool,
    /// Applied to handicaps only when they are not excluded
    pub handicap_stake_multiplier: f64,
    pub going_adjustments: HashMap<GoingCondition, f64>,
    pub track_adjustments: HashMap<TrackDirection, f64>,
    /// Keyed by calendar month, 1 = January
    pub monthly_adjustments: HashMap<u32, f64>,
    /// Reserved: the race data carries no amateur/apprentice marker yet.
    pub exclude_amateur_races: bool,
    /// Reserved, see `exclude_amateur_races`.
    pub exclude_apprentice_races: bool,
}

impl Default for StrategyRules {
    fn default() -> Self {
        Self {
            min_odds: 2.0,
            max_odds: 4.5,
            min_runners: 6,
            max_runners: 20,
            allowed_race_types: vec![
                RaceType::Flat,
                RaceType::Hurdle,
                RaceType::Chase,
                RaceType::NationalHuntFlat,
            ],
            exclude_handicaps: false,
            handicap_stake_multiplier: 0.7,
            going_adjustments: HashMap::from([
                (GoingCondition::Firm, 0.8),
                (GoingCondition::GoodToFirm, 0.9),
                (GoingCondition::Good, 1.0),
                (GoingCondition::GoodToSoft, 1.0),
                (GoingCondition::Soft, 1.2),
                (GoingCondition::Heavy, 1.2),
                (GoingCondition::Standard, 1.0),
                (GoingCondition::Slow, 1.0),
            ]),
            track_adjustments: HashMap::from([(TrackDirection::Figure8, 1.15)]),
            monthly_adjustments: HashMap::from([(1, 0.9), (2, 0.9), (3, 0.9), (12, 0.85)]),
            exclude_amateur_races: true,
            exclude_apprentice_races: true,
        }
    }
}

impl StrategyRules {
    pub fn validate(&self) -> StrategyResult<()> {
        if self.min_odds < 1.01 {
            return Err(invalid(format!("min_odds must be >= 1.01, got {}", self.min_odds)));
        }
        if self.max_odds > 20.0 {
            return Err(invalid(format!("max_odds must be <= 20.0, got {}", self.max_odds)));
        }
        if self.min_odds > self.max_odds {
            return Err(invalid(format!(
                "min_odds {} exceeds max_odds {}",
                self.min_odds, self.max_odds
            )));
        }
        if self.min_runners < 2 {
            return Err(invalid(format!("min_runners must be >= 2, got {}", self.min_runners)));
        }
        if self.max_runners > 40 {
            return Err(invalid(format!("max_runners must be <= 40, got {}", self.max_runners)));
        }
        if self.min_runners > self.max_runners {
            return Err(invalid(format!(
                "min_runners {} exceeds max_runners {}",
                self.min_runners, self.max_runners
            )));
        }
        if !(0.0..=2.0).contains(&self.handicap_stake_multiplier) {
            return Err(invalid(format!(
                "handicap_stake_multiplier must be between 0.0 and 2.0, got {}",
                self.handicap_stake_multiplier
            )));
        }
        let tables = self
            .going_adjustments
            .values()
            .chain(self.track_adjustments.values())
            .chain(self.monthly_adjustments.values());
        for factor in tables {
            if !factor.is_finite() || *factor <= 0.0 {
                return Err(invalid(format!("adjustment factors must be positive, got {}", factor)));
            }
        }
        if let Some(month) = self.monthly_adjustments.keys().find(|m| !(1..=12).contains(*m)) {
            return Err(invalid(format!("monthly_adjustments has invalid month {}", month)));
        }
        Ok(())
    }
}

/// Bankroll-relative staking limits.
///
/// Loss limits and the Kelly settings are carried for the risk-control and
/// live-staking layers; the backtest sizing formula does not read them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakeManagement {
    pub base_stake_percent: f64,
    pub max_liability_percent: f64,
    pub daily_loss_limit_percent: f64,
    pub weekly_loss_limit_percent: f64,
    pub use_kelly_criterion: bool,
    pub kelly_fraction: f64,
}

impl Default for StakeManagement {
    fn default() -> Self {
        Self {
            base_stake_percent: 0.5,
            max_liability_percent: 2.0,
            daily_loss_limit_percent: 5.0,
            weekly_loss_limit_percent: 10.0,
            use_kelly_criterion: true,
            kelly_fraction: 0.25,
        }
    }
}

impl StakeManagement {
    pub fn validate(&self) -> StrategyResult<()> {
        check_range("base_stake_percent", self.base_stake_percent, 0.01, 10.0)?;
        check_range("max_liability_percent", self.max_liability_percent, 0.1, 20.0)?;
        check_range("daily_loss_limit_percent", self.daily_loss_limit_percent, 0.5, 50.0)?;
        check_range("weekly_loss_limit_percent", self.weekly_loss_limit_percent, 1.0, 100.0)?;
        check_range("kelly_fraction", self.kelly_fraction, 0.01, 1.0)?;
        Ok(())
    }
}

fn check_range(name: &str, value: f64, min: f64, max: f64) -> StrategyResult<()> {
    if !(min..=max).contains(&value) {
        return Err(invalid(format!(
            "{} must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

fn invalid(msg: String) -> StrategyError {
    StrategyError::InvalidConfiguration(msg)
}
