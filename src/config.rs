use clap::Parser;

use crate::strategy::StakeManagement;

/// Lay strategy backtesting service for UK & Ireland horse racing
#[derive(Parser, Debug, Clone)]
#[command(name = "lay-backtest", version, about)]
pub struct Config {
    /// HTTP API listen address
    #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:8000")]
    pub dashboard_addr: String,

    /// SQLite database path (historical races, runners and stored backtests)
    #[arg(long, env = "DATABASE_PATH", default_value = "lay_strategy.db")]
    pub database_path: String,

    /// Bankroll used for qualifying-race stake suggestions and as the
    /// default backtest starting bank
    #[arg(long, env = "INITIAL_BANKROLL", default_value = "100000.0")]
    pub initial_bankroll: f64,

    /// Default base stake as a percent of bankroll
    #[arg(long, env = "BASE_STAKE_PERCENT", default_value = "0.5")]
    pub base_stake_percent: f64,

    /// Default liability cap as a percent of bankroll
    #[arg(long, env = "MAX_LIABILITY_PERCENT", default_value = "2.0")]
    pub max_liability_percent: f64,

    /// Fixed seed for backtest outcome simulation. When unset every run draws
    /// its own seed and reports it with the result.
    #[arg(long, env = "BACKTEST_SEED")]
    pub seed: Option<u64>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.initial_bankroll.is_nan() || self.initial_bankroll < 100.0 {
            anyhow::bail!("initial_bankroll must be at least 100.0");
        }
        self.stake_management()
            .validate()
            .map_err(|e| anyhow::anyhow!("stake settings: {}", e))?;
        Ok(())
    }

    /// Default stake management with the configured percentages applied.
    pub fn stake_management(&self) -> StakeManagement {
        StakeManagement {
            base_stake_percent: self.base_stake_percent,
            max_liability_percent: self.max_liability_percent,
            ..StakeManagement::default()
        }
    }
}
