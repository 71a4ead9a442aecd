//! Performance statistics over a settled bet sequence.

use crate::db::models::Bet;

use super::round2;

/// Assumed betting cadence used to annualise the per-bet Sharpe ratio:
/// roughly 7 qualifying races a day over a 300-day racing year.
pub const BETS_PER_DAY: f64 = 7.0;
pub const RACING_DAYS_PER_YEAR: f64 = 300.0;

/// Maximum peak-to-trough decline of an equity curve, in percent of the peak.
///
/// Returns 0 for curves with fewer than two points.
pub fn max_drawdown(equity_curve: &[f64]) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    let mut peak = equity_curve[0];
    let mut max_dd = 0.0f64;
    for &value in equity_curve {
        if value > peak {
            peak = value;
        }
        if peak <= 0.0 {
            continue;
        }
        let dd = (peak - value) / peak * 100.0;
        if dd > max_dd {
            max_dd = dd;
        }
    }
    round2(max_dd)
}

/// Annualised Sharpe-like ratio of per-bet returns (`profit_loss / stake`).
///
/// Uses the population standard deviation and no risk-free rate. Bets with a
/// zero stake are ignored; fewer than two usable returns, or a flat return
/// series, give 0.
pub fn sharpe_ratio(bets: &[Bet]) -> f64 {
    let returns: Vec<f64> = bets
        .iter()
        .filter(|b| b.stake > 0.0)
        .map(|b| b.profit_loss.unwrap_or(0.0) / b.stake)
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
    let std_dev = variance.sqrt();
    if std_dev == 0.0 {
        return 0.0;
    }

    let annualisation = (BETS_PER_DAY * RACING_DAYS_PER_YEAR).sqrt();
    round2(mean / std_dev * annualisation)
}

/// `part / whole` as a percentage, 0 when `whole` is zero.
pub fn percent(part: f64, whole: f64) -> f64 {
    if whole == 0.0 {
        0.0
    } else {
        part / whole * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{BetResult, BetStatus};
    use approx::assert_relative_eq;
    use chrono::NaiveDate;

    fn bet(stake: f64, pl: f64) -> Bet {
        let at = NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(14, 30, 0)
            .unwrap();
        Bet {
            id: "bt_1".into(),
            race_id: "r1".into(),
            runner_id: "f".into(),
            strategy_id: "backtest".into(),
            bet_type: "lay".into(),
            odds: 3.0,
            stake,
            liability: stake * 2.0,
            status: BetStatus::Settled,
            result: Some(if pl >= 0.0 { BetResult::Won } else { BetResult::Lost }),
            profit_loss: Some(pl),
            placed_at: at,
            settled_at: Some(at),
        }
    }

    #[test]
    fn test_drawdown_reference_curve() {
        assert_relative_eq!(
            max_drawdown(&[100_000.0, 90_000.0, 95_000.0, 80_000.0]),
            20.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_drawdown_increasing_curve_is_zero() {
        assert_eq!(max_drawdown(&[100.0, 101.0, 150.0, 150.5]), 0.0);
    }

    #[test]
    fn test_drawdown_short_curves() {
        assert_eq!(max_drawdown(&[]), 0.0);
        assert_eq!(max_drawdown(&[100.0]), 0.0);
    }

    #[test]
    fn test_drawdown_uses_latest_peak() {
        // Peak moves to 120 before the fall to 90: 25%
        assert_relative_eq!(max_drawdown(&[100.0, 95.0, 120.0, 90.0, 110.0]), 25.0, epsilon = 1e-9);
    }

    #[test]
    fn test_sharpe_needs_two_returns() {
        assert_eq!(sharpe_ratio(&[]), 0.0);
        assert_eq!(sharpe_ratio(&[bet(100.0, 100.0)]), 0.0);
        // Zero-stake bets are not usable returns
        assert_eq!(sharpe_ratio(&[bet(100.0, 100.0), bet(0.0, 0.0)]), 0.0);
    }

    #[test]
    fn test_sharpe_flat_returns_is_zero() {
        assert_eq!(sharpe_ratio(&[bet(100.0, 100.0), bet(50.0, 50.0)]), 0.0);
    }

    #[test]
    fn test_sharpe_value() {
        // Returns +1, -2: mean -0.5, population std 1.5
        let bets = [bet(100.0, 100.0), bet(100.0, -200.0)];
        let expected = (-0.5f64 / 1.5 * (2100.0f64).sqrt() * 100.0).round() / 100.0;
        assert_relative_eq!(sharpe_ratio(&bets), expected, epsilon = 1e-9);
        assert_relative_eq!(sharpe_ratio(&bets), -15.28, epsilon = 1e-9);
    }

    #[test]
    fn test_percent_zero_denominator() {
        assert_eq!(percent(5.0, 0.0), 0.0);
        assert_relative_eq!(percent(1.0, 4.0), 25.0);
    }
}
