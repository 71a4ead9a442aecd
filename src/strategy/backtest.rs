use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

use crate::db::models::{
    Bet, BetResult, BetStatus, DailyPerformance, Race, Runner, StrategyPerformance,
};
use crate::error::{StrategyError, StrategyResult};

use super::metrics::{max_drawdown, percent, sharpe_ratio};
use super::qualification::{evaluate_race, find_favorite};
use super::rules::{StakeManagement, StrategyRules};
use super::simulator::{simulate_lay_result, UniformSource};
use super::staking::{lay_profit_loss, LaySizing};

pub const BACKTEST_STRATEGY_ID: &str = "backtest";

/// Everything a backtest run produces.
#[derive(Debug, Clone, PartialEq)]
pub struct BacktestOutcome {
    /// Settled bets in replay order
    pub bets: Vec<Bet>,
    pub performance: StrategyPerformance,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
}

#[derive(Debug, Clone, Default)]
struct DayTotals {
    bets: u32,
    won: u32,
    lost: u32,
    turnover: f64,
    liability: f64,
    profit_loss: f64,
}

/// Replays the favorite-lay strategy over historical races.
///
/// A run is one sequential pass with a running bankroll: every stake is sized
/// against the bankroll left after all earlier bets settled. Races are taken in
/// the order given; callers sort them chronologically.
pub struct BacktestEngine {
    rules: StrategyRules,
    stake_management: StakeManagement,
}

impl BacktestEngine {
    /// Build an engine, rejecting out-of-range configuration up front.
    pub fn new(rules: StrategyRules, stake_management: StakeManagement) -> StrategyResult<Self> {
        rules.validate()?;
        stake_management.validate()?;
        Ok(Self {
            rules,
            stake_management,
        })
    }

    pub fn run(
        &self,
        races: &[Race],
        runners: &[Runner],
        initial_bankroll: f64,
        source: &mut dyn UniformSource,
    ) -> StrategyResult<BacktestOutcome> {
        if !initial_bankroll.is_finite() || initial_bankroll <= 0.0 {
            return Err(StrategyError::InvalidConfiguration(format!(
                "initial_bankroll must be positive, got {}",
                initial_bankroll
            )));
        }

        let mut runners_by_race: HashMap<&str, Vec<Runner>> = HashMap::new();
        for runner in runners {
            runners_by_race
                .entry(runner.race_id.as_str())
                .or_default()
                .push(runner.clone());
        }

        let mut bankroll = initial_bankroll;
        let mut bets: Vec<Bet> = Vec::new();
        let mut days: BTreeMap<NaiveDate, DayTotals> = BTreeMap::new();

        for race in races {
            let Some(race_runners) = runners_by_race.get(race.id.as_str()) else {
                debug!("Race {} skipped: no runners", race.id);
                continue;
            };
            let Some(favorite) = find_favorite(race_runners) else {
                debug!("Race {} skipped: no favorite flagged", race.id);
                continue;
            };

            let Some(qualifying) = evaluate_race(
                race,
                favorite,
                &self.rules,
                &self.stake_management,
                bankroll,
            )?
            else {
                continue;
            };
            let Some(odds) = favorite.bsp_odds else {
                continue;
            };

            let sizing = LaySizing {
                stake: qualifying.suggested_stake,
                liability: qualifying.suggested_liability,
            };
            let result = simulate_lay_result(odds, source);
            let profit_loss = lay_profit_loss(sizing, result);
            bankroll += profit_loss;

            debug!(
                "Race {} {}: lay {} @ {:.2} stake {:.2} liability {:.2} -> {} ({:+.2}), bank {:.2}",
                race.id,
                race.course_name,
                favorite.horse_name,
                odds,
                sizing.stake,
                sizing.liability,
                result,
                profit_loss,
                bankroll
            );

            let placed_at = race.scheduled_at();
            bets.push(Bet {
                id: format!("bt_{}", bets.len() + 1),
                race_id: race.id.clone(),
                runner_id: favorite.id.clone(),
                strategy_id: BACKTEST_STRATEGY_ID.to_string(),
                bet_type: "lay".to_string(),
                odds,
                stake: sizing.stake,
                liability: sizing.liability,
                status: BetStatus::Settled,
                result: Some(result),
                profit_loss: Some(profit_loss),
                placed_at,
                settled_at: Some(placed_at),
            });

            let day = days.entry(race.race_date).or_default();
            day.bets += 1;
            day.turnover += sizing.stake;
            day.liability += sizing.liability;
            day.profit_loss += profit_loss;
            match result {
                BetResult::Won => day.won += 1,
                BetResult::Lost => day.lost += 1,
                BetResult::Void => {}
            }
        }

        let performance = summarize(&bets, &days, initial_bankroll, bankroll);
        info!(
            "Backtest complete: {} races, {} bets, P/L {:.2}, ROI {:.2}%, max DD {:.2}%",
            races.len(),
            performance.total_bets,
            performance.total_profit_loss,
            performance.roi,
            performance.max_drawdown
        );

        Ok(BacktestOutcome {
            bets,
            performance,
            initial_bankroll,
            final_bankroll: bankroll,
        })
    }
}

/// One-shot helper: validate the configuration and run a single backtest.
#[cfg(test)]
pub(crate) fn run_backtest(
    races: &[Race],
    runners: &[Runner],
    rules: &StrategyRules,
    stake_management: &StakeManagement,
    initial_bankroll: f64,
    source: &mut dyn UniformSource,
) -> StrategyResult<BacktestOutcome> {
    BacktestEngine::new(rules.clone(), stake_management.clone())?.run(
        races,
        runners,
        initial_bankroll,
        source,
    )
}

fn summarize(
    bets: &[Bet],
    days: &BTreeMap<NaiveDate, DayTotals>,
    initial_bankroll: f64,
    final_bankroll: f64,
) -> StrategyPerformance {
    let total_bets = bets.len() as u32;
    let won_bets = count_result(bets, BetResult::Won);
    let lost_bets = count_result(bets, BetResult::Lost);
    let total_turnover: f64 = bets.iter().map(|b| b.stake).sum();
    let total_liability: f64 = bets.iter().map(|b| b.liability).sum();
    let total_profit_loss = final_bankroll - initial_bankroll;

    let mut equity_curve = Vec::with_capacity(bets.len() + 1);
    let mut running = initial_bankroll;
    equity_curve.push(running);
    for bet in bets {
        running += bet.profit_loss.unwrap_or(0.0);
        equity_curve.push(running);
    }

    let mut daily_performance = Vec::with_capacity(days.len());
    let mut running_bank = initial_bankroll;
    for (date, day) in days {
        let starting_bank = running_bank;
        running_bank += day.profit_loss;
        daily_performance.push(DailyPerformance {
            date: *date,
            total_bets: day.bets,
            won_bets: day.won,
            lost_bets: day.lost,
            turnover: day.turnover,
            liability: day.liability,
            profit_loss: day.profit_loss,
            roi: percent(day.profit_loss, day.turnover),
            starting_bank,
            ending_bank: running_bank,
        });
    }

    StrategyPerformance {
        strategy_id: BACKTEST_STRATEGY_ID.to_string(),
        total_bets,
        won_bets,
        lost_bets,
        win_rate: percent(won_bets as f64, total_bets as f64),
        total_turnover,
        total_liability,
        total_profit_loss,
        roi: percent(total_profit_loss, total_turnover),
        max_drawdown: max_drawdown(&equity_curve),
        sharpe_ratio: sharpe_ratio(bets),
        daily_performance,
    }
}

fn count_result(bets: &[Bet], result: BetResult) -> u32 {
    bets.iter().filter(|b| b.result == Some(result)).count() as u32
}
