use std::collections::HashMap;

use crate::db::models::{QualifyingRace, Race, Runner, TrackDirection};
use crate::error::StrategyResult;

use super::rules::{StakeManagement, StrategyRules};
use super::staking::{size_lay_stake, stake_multiplier};

pub const MAX_SCORE: f64 = 100.0;

const ODDS_PENALTY: f64 = 30.0;
const TOO_FEW_RUNNERS_PENALTY: f64 = 25.0;
const TOO_MANY_RUNNERS_PENALTY: f64 = 15.0;
const RACE_TYPE_PENALTY: f64 = 40.0;
const HANDICAP_PENALTY: f64 = 35.0;

/// Outcome of checking one race against the rules.
#[derive(Debug, Clone, PartialEq)]
pub struct Qualification {
    pub qualifies: bool,
    /// Failed checks in evaluation order, or advisory notes when qualifying
    pub reasons: Vec<String>,
    /// 0–100; a qualifying race always scores 100
    pub score: f64,
}

/// Check a race and its market favorite against the strategy rules.
///
/// A favorite without a BSP fails immediately with score 0. Every other check
/// runs independently and subtracts its penalty, so a race can collect several
/// reasons. The race qualifies only when no check failed.
pub fn evaluate(race: &Race, favorite: &Runner, rules: &StrategyRules) -> Qualification {
    let Some(odds) = favorite.bsp_odds else {
        return Qualification {
            qualifies: false,
            reasons: vec!["No BSP odds available".to_string()],
            score: 0.0,
        };
    };

    let mut reasons = Vec::new();
    let mut score = MAX_SCORE;

    if odds < rules.min_odds {
        reasons.push(format!("Odds {:.2} below minimum {}", odds, rules.min_odds));
        score -= ODDS_PENALTY;
    }
    if odds > rules.max_odds {
        reasons.push(format!("Odds {:.2} above maximum {}", odds, rules.max_odds));
        score -= ODDS_PENALTY;
    }

    if race.number_of_runners < rules.min_runners {
        reasons.push(format!(
            "Only {} runners (minimum: {})",
            race.number_of_runners, rules.min_runners
        ));
        score -= TOO_FEW_RUNNERS_PENALTY;
    }
    if race.number_of_runners > rules.max_runners {
        reasons.push(format!(
            "{} runners exceeds maximum of {}",
            race.number_of_runners, rules.max_runners
        ));
        score -= TOO_MANY_RUNNERS_PENALTY;
    }

    if !rules.allowed_race_types.contains(&race.race_type) {
        reasons.push(format!("Race type {} not allowed", race.race_type));
        score -= RACE_TYPE_PENALTY;
    }

    if race.is_handicap && rules.exclude_handicaps {
        reasons.push("Handicap races excluded".to_string());
        score -= HANDICAP_PENALTY;
    }

    let qualifies = reasons.is_empty();
    if qualifies {
        reasons.push("All criteria met".to_string());
        // Advisory only; the uplift itself comes from the multiplier tables.
        if race.going.is_testing() {
            reasons.push(format!("{} going (+20% stake)", race.going.label()));
        }
        if race.track_direction == TrackDirection::Figure8 {
            reasons.push("Figure-8 track (+15% stake)".to_string());
        }
    }

    Qualification {
        qualifies,
        reasons,
        score: score.max(0.0),
    }
}

/// Run qualification and, for a qualifying race, size the lay against `bankroll`.
///
/// Returns `Ok(None)` for races that do not qualify.
pub fn evaluate_race(
    race: &Race,
    favorite: &Runner,
    rules: &StrategyRules,
    stake_management: &StakeManagement,
    bankroll: f64,
) -> StrategyResult<Option<QualifyingRace>> {
    let Qualification {
        qualifies,
        reasons,
        score,
    } = evaluate(race, favorite, rules);
    if !qualifies {
        return Ok(None);
    }
    // Qualification guarantees a price.
    let Some(odds) = favorite.bsp_odds else {
        return Ok(None);
    };

    let multiplier = stake_multiplier(race, rules);
    let sizing = size_lay_stake(bankroll, odds, multiplier, stake_management)?;

    Ok(Some(QualifyingRace {
        race: race.clone(),
        favorite: favorite.clone(),
        qualification_score: score,
        adjusted_stake_multiplier: multiplier,
        suggested_stake: sizing.stake,
        suggested_liability: sizing.liability,
        reasons,
    }))
}

/// First runner flagged as favorite, in input order.
pub fn find_favorite(runners: &[Runner]) -> Option<&Runner> {
    runners.iter().find(|r| r.is_favorite)
}

/// Every race whose favorite qualifies, in input order, each sized on its own
/// against `bankroll` with no compounding between races.
pub fn qualifying_races(
    races: &[Race],
    runners: &[Runner],
    rules: &StrategyRules,
    stake_management: &StakeManagement,
    bankroll: f64,
) -> StrategyResult<Vec<QualifyingRace>> {
    let mut runners_by_race: HashMap<&str, Vec<&Runner>> = HashMap::new();
    for runner in runners {
        runners_by_race
            .entry(runner.race_id.as_str())
            .or_default()
            .push(runner);
    }

    let mut qualifying = Vec::new();
    for race in races {
        let favorite = runners_by_race
            .get(race.id.as_str())
            .and_then(|rs| rs.iter().copied().find(|r| r.is_favorite));
        let Some(favorite) = favorite else {
            continue;
        };
        if let Some(q) = evaluate_race(race, favorite, rules, stake_management, bankroll)? {
            qualifying.push(q);
        }
    }
    Ok(qualifying)
}


#[cfg(test)]
mod tests {
    use super::fixtures::{race, runner};
    use super::*;
    use crate::db::models::{GoingCondition, RaceType};
    use approx::assert_relative_eq;

    fn flat_only_rules() -> StrategyRules {
        StrategyRules {
            min_odds: 2.0,
            max_odds: 4.5,
            min_runners: 6,
            max_runners: 20,
            allowed_race_types: vec![RaceType::Flat],
            exclude_handicaps: true,
            ..StrategyRules::default()
        }
    }

    #[test]
    fn test_missing_odds_fails_immediately() {
        let mut r = race("r1", "2024-06-01");
        // Would also fail other checks; missing odds must short-circuit them.
        r.number_of_runners = 2;
        r.race_type = RaceType::Chase;
        let fav = runner("f", "r1", None, true);

        let q = evaluate(&r, &fav, &flat_only_rules());
        assert!(!q.qualifies);
        assert_eq!(q.score, 0.0);
        assert_eq!(q.reasons, vec!["No BSP odds available".to_string()]);
    }

    #[test]
    fn test_reference_race_qualifies() {
        let r = race("r1", "2024-06-01");
        let fav = runner("f", "r1", Some(3.0), true);

        let q = evaluate(&r, &fav, &flat_only_rules());
        assert!(q.qualifies);
        assert_eq!(q.score, MAX_SCORE);
        assert_eq!(q.reasons, vec!["All criteria met".to_string()]);
    }

    #[test]
    fn test_penalties_accumulate() {
        let mut r = race("r1", "2024-06-01");
        r.number_of_runners = 4;
        r.race_type = RaceType::Hurdle;
        r.is_handicap = true;
        let fav = runner("f", "r1", Some(1.5), true);

        let q = evaluate(&r, &fav, &flat_only_rules());
        assert!(!q.qualifies);
        assert_eq!(q.reasons.len(), 4);
        assert_eq!(q.reasons[0], "Odds 1.50 below minimum 2");
        assert_eq!(q.reasons[1], "Only 4 runners (minimum: 6)");
        assert_eq!(q.reasons[2], "Race type hurdle not allowed");
        assert_eq!(q.reasons[3], "Handicap races excluded");
        // 100 - 30 - 25 - 40 - 35 clamps at zero
        assert_eq!(q.score, 0.0);
    }

    #[test]
    fn test_single_failure_score() {
        let mut r = race("r1", "2024-06-01");
        r.number_of_runners = 24;
        let fav = runner("f", "r1", Some(5.0), true);

        let q = evaluate(&r, &fav, &flat_only_rules());
        assert!(!q.qualifies);
        assert_relative_eq!(q.score, 55.0, epsilon = 1e-9);
        assert_eq!(q.reasons[0], "Odds 5.00 above maximum 4.5");
        assert_eq!(q.reasons[1], "24 runners exceeds maximum of 20");
    }

    #[test]
    fn test_advisory_notes_on_qualifying_race() {
        let mut r = race("r1", "2024-06-01");
        r.going = GoingCondition::Heavy;
        r.track_direction = TrackDirection::Figure8;
        let fav = runner("f", "r1", Some(3.0), true);

        let q = evaluate(&r, &fav, &flat_only_rules());
        assert!(q.qualifies);
        assert_eq!(q.score, MAX_SCORE);
        assert_eq!(
            q.reasons,
            vec![
                "All criteria met".to_string(),
                "Heavy going (+20% stake)".to_string(),
                "Figure-8 track (+15% stake)".to_string(),
            ]
        );
    }

    #[test]
    fn test_handicap_allowed_when_not_excluded() {
        let mut r = race("r1", "2024-06-01");
        r.is_handicap = true;
        let fav = runner("f", "r1", Some(3.0), true);
        let rules = StrategyRules {
            exclude_handicaps: false,
            ..flat_only_rules()
        };
        assert!(evaluate(&r, &fav, &rules).qualifies);
    }

    #[test]
    fn test_evaluate_race_builds_qualifying_race() {
        let r = race("r1", "2024-06-01");
        let fav = runner("f", "r1", Some(3.0), true);
        let qr = evaluate_race(&r, &fav, &flat_only_rules(), &StakeManagement::default(), 100_000.0)
            .unwrap()
            .expect("race should qualify");

        assert_eq!(qr.race.id, "r1");
        assert_eq!(qr.favorite.id, "f");
        assert_relative_eq!(qr.adjusted_stake_multiplier, 1.0, epsilon = 1e-12);
        // 0.5% of 100k = 500, liability 1000 is under the 2% cap of 2000
        assert_relative_eq!(qr.suggested_stake, 500.0, epsilon = 1e-9);
        assert_relative_eq!(qr.suggested_liability, 1000.0, epsilon = 1e-9);
    }

    #[test]
    fn test_evaluate_race_none_when_not_qualifying() {
        let r = race("r1", "2024-06-01");
        let fav = runner("f", "r1", Some(8.0), true);
        let out =
            evaluate_race(&r, &fav, &flat_only_rules(), &StakeManagement::default(), 100_000.0);
        assert_eq!(out, Ok(None));
    }

    #[test]
    fn test_qualifying_races_groups_by_race() {
        let mut soft = race("r3", "2024-06-03");
        soft.going = GoingCondition::Soft;
        let races = vec![race("r1", "2024-06-01"), race("r2", "2024-06-02"), soft];
        // Interleaved on purpose: grouping must not depend on input order.
        let runners = vec![
            runner("r3_a", "r3", Some(3.0), true),
            runner("r1_b", "r1", Some(6.0), false),
            runner("r2_a", "r2", None, true),
            runner("r1_a", "r1", Some(3.0), true),
        ];

        let out = qualifying_races(
            &races,
            &runners,
            &flat_only_rules(),
            &StakeManagement::default(),
            100_000.0,
        )
        .unwrap();
        let ids: Vec<&str> = out.iter().map(|q| q.race.id.as_str()).collect();
        assert_eq!(ids, vec!["r1", "r3"]);
        assert_eq!(out[0].favorite.id, "r1_a");
        // Each race sized against the same bankroll: 500 x 1.2 on soft going
        assert_relative_eq!(out[0].suggested_stake, 500.0, epsilon = 1e-9);
        assert_relative_eq!(out[1].suggested_stake, 600.0, epsilon = 1e-9);
    }

    #[test]
    fn test_first_flagged_favorite_wins() {
        let runners = vec![
            runner("a", "r1", Some(6.0), false),
            runner("b", "r1", Some(3.0), true),
            runner("c", "r1", Some(2.5), true),
        ];
        assert_eq!(find_favorite(&runners).map(|r| r.id.as_str()), Some("b"));
        assert!(find_favorite(&runners[..1]).is_none());
    }
}
