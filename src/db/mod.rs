use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

pub mod models;
use models::*;

/// SQLite's default host-parameter limit is generous, but race id lists for
/// long backtests are not; IN-lists are chunked to this size.
const IN_CLAUSE_CHUNK: usize = 500;

/// Thread-safe SQLite connection pool (single connection with mutex)
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

/// Optional filters for browsing races
#[derive(Debug, Clone, Default)]
pub struct RaceFilter {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub country: Option<Country>,
    pub race_type: Option<RaceType>,
    pub course: Option<String>,
}

impl RaceFilter {
    fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        if let Some(start) = self.start_date {
            clauses.push("race_date >= ?");
            values.push(start.to_string());
        }
        if let Some(end) = self.end_date {
            clauses.push("race_date <= ?");
            values.push(end.to_string());
        }
        if let Some(country) = self.country {
            clauses.push("country = ?");
            values.push(country.as_str().to_string());
        }
        if let Some(race_type) = self.race_type {
            clauses.push("race_type = ?");
            values.push(race_type.as_str().to_string());
        }
        if let Some(course) = &self.course {
            clauses.push("course_name = ?");
            values.push(course.clone());
        }
        if clauses.is_empty() {
            (String::new(), values)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), values)
        }
    }
}

/// Rows written and rows rejected by an import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSummary {
    pub imported: usize,
    pub errors: usize,
}

impl Database {
    /// Open (or create) the SQLite database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    // ── Import ────────────────────────────────────────────────────────────────

    /// Upsert historical races. Races declaring no runners are rejected.
    pub fn import_races(&self, races: &[Race]) -> Result<ImportSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();
        for race in races {
            if race.number_of_runners == 0 {
                warn!("Rejected race {}: number_of_runners must be at least 1", race.id);
                summary.errors += 1;
                continue;
            }
            let written = tx.execute(
                "INSERT INTO races (
                    id, event_id, market_id, event_name, course_name,
                    race_date, race_time, race_type, race_class, distance,
                    going, number_of_runners, country, track_direction, is_handicap
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)
                 ON CONFLICT(id) DO UPDATE SET
                    event_id=excluded.event_id,
                    market_id=excluded.market_id,
                    event_name=excluded.event_name,
                    course_name=excluded.course_name,
                    race_date=excluded.race_date,
                    race_time=excluded.race_time,
                    race_type=excluded.race_type,
                    race_class=excluded.race_class,
                    distance=excluded.distance,
                    going=excluded.going,
                    number_of_runners=excluded.number_of_runners,
                    country=excluded.country,
                    track_direction=excluded.track_direction,
                    is_handicap=excluded.is_handicap",
                params![
                    race.id,
                    race.event_id,
                    race.market_id,
                    race.event_name,
                    race.course_name,
                    race.race_date,
                    race.race_time,
                    race.race_type.as_str(),
                    race.race_class,
                    race.distance,
                    race.going.as_str(),
                    race.number_of_runners,
                    race.country.as_str(),
                    race.track_direction.as_str(),
                    race.is_handicap,
                ],
            );
            match written {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    warn!("Rejected race {}: {}", race.id, e);
                    summary.errors += 1;
                }
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    /// Upsert runners. A runner whose race is unknown is rejected.
    pub fn import_runners(&self, runners: &[Runner]) -> Result<ImportSummary> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut summary = ImportSummary::default();
        for runner in runners {
            let written = tx.execute(
                "INSERT INTO runners (
                    id, race_id, selection_id, horse_name, jockey, trainer,
                    age, weight, draw, bsp_odds, position, is_favorite, sp
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                 ON CONFLICT(id) DO UPDATE SET
                    race_id=excluded.race_id,
                    selection_id=excluded.selection_id,
                    horse_name=excluded.horse_name,
                    jockey=excluded.jockey,
                    trainer=excluded.trainer,
                    age=excluded.age,
                    weight=excluded.weight,
                    draw=excluded.draw,
                    bsp_odds=excluded.bsp_odds,
                    position=excluded.position,
                    is_favorite=excluded.is_favorite,
                    sp=excluded.sp",
                params![
                    runner.id,
                    runner.race_id,
                    runner.selection_id,
                    runner.horse_name,
                    runner.jockey,
                    runner.trainer,
                    runner.age,
                    runner.weight,
                    runner.draw,
                    runner.bsp_odds,
                    runner.position,
                    runner.is_favorite,
                    runner.sp,
                ],
            );
            match written {
                Ok(_) => summary.imported += 1,
                Err(e) => {
                    warn!("Rejected runner {} (race {}): {}", runner.id, runner.race_id, e);
                    summary.errors += 1;
                }
            }
        }
        tx.commit()?;
        Ok(summary)
    }

    // ── Races ─────────────────────────────────────────────────────────────────

    /// List races, newest first (paginated)
    pub fn list_races(&self, filter: &RaceFilter, limit: i64, offset: i64) -> Result<Vec<Race>> {
        let conn = self.conn()?;
        let (where_clause, values) = filter.where_clause();
        let sql = format!(
            "SELECT {RACE_COLUMNS} FROM races {where_clause}
             ORDER BY race_date DESC, race_time DESC, id DESC LIMIT {limit} OFFSET {offset}"
        );
        let mut stmt = conn.prepare(&sql)?;
        let races = stmt
            .query_map(params_from_iter(values.iter()), map_race)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(races)
    }

    pub fn count_races(&self, filter: &RaceFilter) -> Result<i64> {
        let conn = self.conn()?;
        let (where_clause, values) = filter.where_clause();
        let sql = format!("SELECT COUNT(*) FROM races {where_clause}");
        let count = conn.query_row(&sql, params_from_iter(values.iter()), |r| r.get(0))?;
        Ok(count)
    }

    /// Races between two dates inclusive, in chronological replay order
    pub fn races_for_backtest(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<Race>> {
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {RACE_COLUMNS} FROM races
             WHERE race_date >= ?1 AND race_date <= ?2
             ORDER BY race_date ASC, race_time ASC, id ASC"
        );
        let mut stmt = conn.prepare(&sql)?;
        let races = stmt
            .query_map(params![start, end], map_race)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(races)
    }

    pub fn get_race(&self, id: &str) -> Result<Option<Race>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {RACE_COLUMNS} FROM races WHERE id = ?1");
        let race = conn.query_row(&sql, params![id], map_race).optional()?;
        Ok(race)
    }

    /// Distinct course names, alphabetical
    pub fn list_courses(&self) -> Result<Vec<String>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT DISTINCT course_name FROM races ORDER BY course_name")?;
        let courses = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(courses)
    }

    // ── Runners ───────────────────────────────────────────────────────────────

    /// Runners for the given races; within a race the favorite comes first,
    /// then shortest price.
    pub fn runners_for_races(&self, race_ids: &[String]) -> Result<Vec<Runner>> {
        let conn = self.conn()?;
        let mut runners = Vec::new();
        for chunk in race_ids.chunks(IN_CLAUSE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let sql = format!(
                "SELECT {RUNNER_COLUMNS} FROM runners
                 WHERE race_id IN ({placeholders})
                 ORDER BY race_id, is_favorite DESC, bsp_odds ASC, id ASC"
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(params_from_iter(chunk.iter()), map_runner)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            runners.extend(rows);
        }
        Ok(runners)
    }

    // ── Backtests ─────────────────────────────────────────────────────────────

    pub fn insert_backtest(&self, result: &BacktestResult) -> Result<()> {
        let body = serde_json::to_string(result)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO backtests (
                id, strategy_name, start_date, end_date, initial_bankroll,
                final_bankroll, total_bets, roi, created_at, result_json
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                result.id,
                result.strategy_config.name,
                result.start_date,
                result.end_date,
                result.initial_bankroll,
                result.final_bankroll,
                result.performance.total_bets,
                result.performance.roi,
                result.created_at,
                body,
            ],
        )?;
        Ok(())
    }

    /// Stored backtests, newest first
    pub fn list_backtests(&self, limit: i64) -> Result<Vec<BacktestSummary>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, strategy_name, start_date, end_date, initial_bankroll,
                    final_bankroll, total_bets, roi, created_at
             FROM backtests ORDER BY created_at DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit], |row| {
                Ok(BacktestSummary {
                    id: row.get(0)?,
                    strategy_name: row.get(1)?,
                    start_date: row.get(2)?,
                    end_date: row.get(3)?,
                    initial_bankroll: row.get(4)?,
                    final_bankroll: row.get(5)?,
                    total_bets: row.get(6)?,
                    roi: row.get(7)?,
                    created_at: row.get(8)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn get_backtest(&self, id: &str) -> Result<Option<BacktestResult>> {
        let conn = self.conn()?;
        let body: Option<String> = conn
            .query_row(
                "SELECT result_json FROM backtests WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    // ── Strategies ────────────────────────────────────────────────────────────

    /// Store a new strategy. It must already carry its id and timestamps.
    pub fn insert_strategy(&self, strategy: &StrategyConfig) -> Result<()> {
        let row = StrategyRow::from_config(strategy)?;
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO strategies (
                id, name, description, rules_json, stake_management_json,
                is_active, created_at, updated_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                row.id,
                strategy.name,
                strategy.description,
                row.rules_json,
                row.stake_management_json,
                strategy.is_active,
                row.created_at,
                row.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Stored strategies, oldest first
    pub fn list_strategies(&self) -> Result<Vec<StrategyConfig>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies ORDER BY created_at, id");
        let mut stmt = conn.prepare(&sql)?;
        let strategies = stmt
            .query_map([], map_strategy)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(strategies)
    }

    pub fn get_strategy(&self, id: &str) -> Result<Option<StrategyConfig>> {
        let conn = self.conn()?;
        let sql = format!("SELECT {STRATEGY_COLUMNS} FROM strategies WHERE id = ?1");
        let strategy = conn.query_row(&sql, params![id], map_strategy).optional()?;
        Ok(strategy)
    }

    /// Overwrite a stored strategy. Returns false when no row has its id.
    pub fn update_strategy(&self, strategy: &StrategyConfig) -> Result<bool> {
        let row = StrategyRow::from_config(strategy)?;
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE strategies SET
                name = ?2, description = ?3, rules_json = ?4,
                stake_management_json = ?5, is_active = ?6, updated_at = ?7
             WHERE id = ?1",
            params![
                row.id,
                strategy.name,
                strategy.description,
                row.rules_json,
                row.stake_management_json,
                strategy.is_active,
                row.updated_at,
            ],
        )?;
        Ok(changed > 0)
    }

    /// Returns false when no row has this id.
    pub fn delete_strategy(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let changed = conn.execute("DELETE FROM strategies WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const RACE_COLUMNS: &str = "id, event_id, market_id, event_name, course_name,
    race_date, race_time, race_type, race_class, distance,
    going, number_of_runners, country, track_direction, is_handicap";

const RUNNER_COLUMNS: &str = "id, race_id, selection_id, horse_name, jockey, trainer,
    age, weight, draw, bsp_odds, position, is_favorite, sp";

/// Read a TEXT column into one of the text-backed enums.
fn text_column<T>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, e.into())
    })
}

fn map_race(row: &rusqlite::Row) -> rusqlite::Result<Race> {
    Ok(Race {
        id: row.get(0)?,
        event_id: row.get(1)?,
        market_id: row.get(2)?,
        event_name: row.get(3)?,
        course_name: row.get(4)?,
        race_date: row.get(5)?,
        race_time: row.get(6)?,
        race_type: text_column(row, 7)?,
        race_class: row.get(8)?,
        distance: row.get(9)?,
        going: text_column(row, 10)?,
        number_of_runners: row.get(11)?,
        country: text_column(row, 12)?,
        track_direction: text_column(row, 13)?,
        is_handicap: row.get(14)?,
    })
}

const STRATEGY_COLUMNS: &str = "id, name, description, rules_json, stake_management_json,
    is_active, created_at, updated_at";

/// Column values of a stored strategy that need checking or encoding first.
struct StrategyRow<'a> {
    id: &'a str,
    rules_json: String,
    stake_management_json: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl<'a> StrategyRow<'a> {
    fn from_config(strategy: &'a StrategyConfig) -> Result<Self> {
        let (Some(id), Some(created_at), Some(updated_at)) =
            (strategy.id.as_deref(), strategy.created_at, strategy.updated_at)
        else {
            return Err(anyhow!(
                "strategy '{}' is missing its id or timestamps",
                strategy.name
            ));
        };
        Ok(Self {
            id,
            rules_json: serde_json::to_string(&strategy.rules)?,
            stake_management_json: serde_json::to_string(&strategy.stake_management)?,
            created_at,
            updated_at,
        })
    }
}

/// Read a TEXT column holding a JSON document.
fn json_column<T: DeserializeOwned>(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn map_strategy(row: &rusqlite::Row) -> rusqlite::Result<StrategyConfig> {
    Ok(StrategyConfig {
        id: Some(row.get(0)?),
        name: row.get(1)?,
        description: row.get(2)?,
        rules: json_column(row, 3)?,
        stake_management: json_column(row, 4)?,
        is_active: row.get(5)?,
        created_at: Some(row.get(6)?),
        updated_at: Some(row.get(7)?),
    })
}

fn map_runner(row: &rusqlite::Row) -> rusqlite::Result<Runner> {
    Ok(Runner {
        id: row.get(0)?,
        race_id: row.get(1)?,
        selection_id: row.get(2)?,
        horse_name: row.get(3)?,
        jockey: row.get(4)?,
        trainer: row.get(5)?,
        age: row.get(6)?,
        weight: row.get(7)?,
        draw: row.get(8)?,
        bsp_odds: row.get(9)?,
        position: row.get(10)?,
        is_favorite: row.get(11)?,
        sp: row.get(12)?,
    })
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS races (
    id                TEXT    PRIMARY KEY,
    event_id          TEXT    NOT NULL,
    market_id         TEXT    NOT NULL,
    event_name        TEXT    NOT NULL,
    course_name       TEXT    NOT NULL,
    race_date         TEXT    NOT NULL,
    race_time         TEXT    NOT NULL,
    race_type         TEXT    NOT NULL,
    race_class        INTEGER NOT NULL,
    distance          TEXT    NOT NULL,
    going             TEXT    NOT NULL,
    number_of_runners INTEGER NOT NULL CHECK (number_of_runners >= 1),
    country           TEXT    NOT NULL,
    track_direction   TEXT    NOT NULL,
    is_handicap       INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS runners (
    id           TEXT    PRIMARY KEY,
    race_id      TEXT    NOT NULL,
    selection_id INTEGER NOT NULL,
    horse_name   TEXT    NOT NULL,
    jockey       TEXT    NOT NULL,
    trainer      TEXT    NOT NULL,
    age          INTEGER NOT NULL,
    weight       TEXT    NOT NULL,
    draw         INTEGER,
    bsp_odds     REAL,
    position     INTEGER,
    is_favorite  INTEGER NOT NULL DEFAULT 0,
    sp           TEXT    NOT NULL,
    FOREIGN KEY (race_id) REFERENCES races(id)
);

CREATE TABLE IF NOT EXISTS backtests (
    id               TEXT    PRIMARY KEY,
    strategy_name    TEXT    NOT NULL,
    start_date       TEXT    NOT NULL,
    end_date         TEXT    NOT NULL,
    initial_bankroll REAL    NOT NULL,
    final_bankroll   REAL    NOT NULL,
    total_bets       INTEGER NOT NULL,
    roi              REAL    NOT NULL,
    created_at       TEXT    NOT NULL,
    result_json      TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS strategies (
    id                    TEXT    PRIMARY KEY,
    name                  TEXT    NOT NULL,
    description           TEXT    NOT NULL DEFAULT '',
    rules_json            TEXT    NOT NULL,
    stake_management_json TEXT    NOT NULL,
    is_active             INTEGER NOT NULL DEFAULT 1,
    created_at            TEXT    NOT NULL,
    updated_at            TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_races_date ON races(race_date, race_time);
CREATE INDEX IF NOT EXISTS idx_races_course ON races(course_name);
CREATE INDEX IF NOT EXISTS idx_runners_race ON runners(race_id);
CREATE INDEX IF NOT EXISTS idx_backtests_created ON backtests(created_at);
"#;
