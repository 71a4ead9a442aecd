use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::strategy::rules::{StakeManagement, StrategyRules};

/// Text-backed enums are stored in SQLite and sent over JSON using the same
/// lowercase names, so one table of names drives `as_str`, `Display` and `FromStr`.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => {
                        let expected: Vec<&str> = $name::ALL.iter().map(|v| v.as_str()).collect();
                        Err(format!(
                            "unknown {} value: {} (expected one of: {})",
                            stringify!($name),
                            other,
                            expected.join(", ")
                        ))
                    }
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceType {
    Flat,
    Hurdle,
    Chase,
    NationalHuntFlat,
    HuntersChase,
}

text_enum!(RaceType {
    Flat => "flat",
    Hurdle => "hurdle",
    Chase => "chase",
    NationalHuntFlat => "national_hunt_flat",
    HuntersChase => "hunters_chase",
});

/// Track surface condition, firmest to softest, then all-weather surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GoingCondition {
    Firm,
    GoodToFirm,
    Good,
    GoodToSoft,
    Soft,
    Heavy,
    Standard,
    Slow,
}

text_enum!(GoingCondition {
    Firm => "firm",
    GoodToFirm => "good_to_firm",
    Good => "good",
    GoodToSoft => "good_to_soft",
    Soft => "soft",
    Heavy => "heavy",
    Standard => "standard",
    Slow => "slow",
});

impl GoingCondition {
    /// Soft and heavy ground attract a stake uplift in the default rules.
    pub fn is_testing(&self) -> bool {
        matches!(self, GoingCondition::Soft | GoingCondition::Heavy)
    }

    /// Human label, e.g. `good_to_soft` -> `Good To Soft`.
    pub fn label(&self) -> String {
        self.as_str()
            .split('_')
            .map(|word| {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Country {
    #[serde(rename = "UK")]
    Uk,
    #[serde(rename = "IRE")]
    Ire,
}

text_enum!(Country {
    Uk => "UK",
    Ire => "IRE",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackDirection {
    Left,
    Right,
    Straight,
    Figure8,
}

text_enum!(TrackDirection {
    Left => "left",
    Right => "right",
    Straight => "straight",
    Figure8 => "figure8",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetStatus {
    Pending,
    Matched,
    Settled,
    Cancelled,
    Voided,
}

text_enum!(BetStatus {
    Pending => "pending",
    Matched => "matched",
    Settled => "settled",
    Cancelled => "cancelled",
    Voided => "voided",
});

/// Outcome of a lay bet from the layer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetResult {
    Won,
    Lost,
    Void,
}

text_enum!(BetResult {
    Won => "won",
    Lost => "lost",
    Void => "void",
});

/// Race times travel as `HH:MM`, the format used by the racing data feeds.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%H:%M";

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveTime::parse_from_str(&raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(serde::de::Error::custom)
    }
}

/// A historical race card entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    /// Betfair event ID
    pub event_id: String,
    /// Betfair win market ID
    pub market_id: String,
    pub event_name: String,
    pub course_name: String,
    pub race_date: NaiveDate,
    #[serde(with = "hhmm")]
    pub race_time: NaiveTime,
    pub race_type: RaceType,
    pub race_class: i32,
    /// e.g. "2m 4f"
    pub distance: String,
    pub going: GoingCondition,
    /// Declared field size, at least 1
    pub number_of_runners: u32,
    pub country: Country,
    pub track_direction: TrackDirection,
    pub is_handicap: bool,
}

impl Race {
    /// Scheduled off time; backtest bets are placed and settled at this instant.
    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.race_date.and_time(self.race_time)
    }
}

/// A horse declared in a race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Runner {
    pub id: String,
    pub race_id: String,
    pub selection_id: i64,
    pub horse_name: String,
    pub jockey: String,
    pub trainer: String,
    pub age: u32,
    /// e.g. "11-4"
    pub weight: String,
    pub draw: Option<u32>,
    /// Betfair starting price (decimal). `None` means no market formed.
    pub bsp_odds: Option<f64>,
    /// Finishing position, unknown before the result
    pub position: Option<u32>,
    pub is_favorite: bool,
    /// Industry starting price as quoted, e.g. "5/2"
    pub sp: String,
}

/// A race that passed qualification, with its favorite and suggested sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifyingRace {
    #[serde(flatten)]
    pub race: Race,
    pub favorite: Runner,
    pub qualification_score: f64,
    pub adjusted_stake_multiplier: f64,
    pub suggested_stake: f64,
    pub suggested_liability: f64,
    pub reasons: Vec<String>,
}

/// A lay wager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    /// `bt_<n>` for backtest bets
    pub id: String,
    pub race_id: String,
    pub runner_id: String,
    pub strategy_id: String,
    /// Always "lay" for this strategy
    pub bet_type: String,
    pub odds: f64,
    /// Backer's stake accepted by the layer
    pub stake: f64,
    /// Amount owed if the selection wins: stake * (odds - 1)
    pub liability: f64,
    pub status: BetStatus,
    pub result: Option<BetResult>,
    pub profit_loss: Option<f64>,
    pub placed_at: NaiveDateTime,
    pub settled_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyPerformance {
    pub date: NaiveDate,
    pub total_bets: u32,
    pub won_bets: u32,
    pub lost_bets: u32,
    pub turnover: f64,
    pub liability: f64,
    pub profit_loss: f64,
    /// Percent of turnover
    pub roi: f64,
    pub starting_bank: f64,
    pub ending_bank: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyPerformance {
    pub strategy_id: String,
    pub total_bets: u32,
    pub won_bets: u32,
    pub lost_bets: u32,
    /// Percent
    pub win_rate: f64,
    pub total_turnover: f64,
    pub total_liability: f64,
    pub total_profit_loss: f64,
    /// Percent of turnover
    pub roi: f64,
    /// Percent of peak bankroll
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
    pub daily_performance: Vec<DailyPerformance>,
}

/// Id of the built-in strategy, always available and never stored.
pub const DEFAULT_STRATEGY_ID: &str = "default";

/// A named strategy: qualification rules plus staking policy.
///
/// Inline configurations sent with a backtest carry no id or timestamps;
/// stored strategies always have all three.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: StrategyRules,
    #[serde(default)]
    pub stake_management: StakeManagement,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            id: Some(DEFAULT_STRATEGY_ID.into()),
            name: "Smart Favorite Lay".into(),
            description: "Lay favorites at BSP 2.0-4.5 with condition-adjusted staking".into(),
            rules: StrategyRules::default(),
            stake_management: StakeManagement::default(),
            is_active: true,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Body for creating a stored strategy
#[derive(Debug, Clone, Deserialize)]
pub struct NewStrategy {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub rules: StrategyRules,
    #[serde(default)]
    pub stake_management: StakeManagement,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

impl NewStrategy {
    pub fn into_config(self, id: String, now: DateTime<Utc>) -> StrategyConfig {
        StrategyConfig {
            id: Some(id),
            name: self.name,
            description: self.description,
            rules: self.rules,
            stake_management: self.stake_management,
            is_active: self.is_active,
            created_at: Some(now),
            updated_at: Some(now),
        }
    }
}

/// Partial update of a stored strategy; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StrategyUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: Option<StrategyRules>,
    pub stake_management: Option<StakeManagement>,
    pub is_active: Option<bool>,
}

impl StrategyUpdate {
    pub fn apply(self, config: &mut StrategyConfig, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            config.name = name;
        }
        if let Some(description) = self.description {
            config.description = description;
        }
        if let Some(rules) = self.rules {
            config.rules = rules;
        }
        if let Some(stake_management) = self.stake_management {
            config.stake_management = stake_management;
        }
        if let Some(is_active) = self.is_active {
            config.is_active = is_active;
        }
        config.updated_at = Some(now);
    }
}

/// A stored backtest run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub id: String,
    pub strategy_config: StrategyConfig,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub performance: StrategyPerformance,
    pub qualifying_races: usize,
    pub total_races_analyzed: usize,
    /// Seed of the outcome source; replaying with it reproduces the run.
    pub seed: u64,
    pub bets: Vec<Bet>,
    pub created_at: DateTime<Utc>,
}

/// Summary row for listing stored backtests without their bets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSummary {
    pub id: String,
    pub strategy_name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_bankroll: f64,
    pub final_bankroll: f64,
    pub total_bets: u32,
    pub roi: f64,
    pub created_at: DateTime<Utc>,
}
