use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};

use crate::db::models::{
    BacktestResult, BacktestSummary, Country, NewStrategy, QualifyingRace, Race, RaceType,
    Runner, StrategyConfig, StrategyUpdate, DEFAULT_STRATEGY_ID,
};
use crate::db::{Database, ImportSummary, RaceFilter};
use crate::error::StrategyError;
use crate::strategy::qualification::qualifying_races;
use crate::strategy::{BacktestEngine, SeededSource, StakeManagement};

/// Smallest bankroll a backtest may start from
pub const MIN_BACKTEST_BANKROLL: f64 = 100.0;
const DEFAULT_PAGE_SIZE: u32 = 50;
const DEFAULT_QUALIFYING_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 100;
const BACKTEST_LIST_LIMIT: i64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    /// Bankroll for qualifying-race stake suggestions and the default backtest bank
    pub initial_bankroll: f64,
    pub stake_management: StakeManagement,
    /// Fixed simulation seed; requests may still supply their own
    pub seed: Option<u64>,
}

impl AppState {
    /// The built-in strategy, staked with the configured percentages.
    fn default_strategy(&self) -> StrategyConfig {
        StrategyConfig {
            stake_management: self.stake_management.clone(),
            ..StrategyConfig::default()
        }
    }

    /// The built-in strategy or a stored one.
    fn resolve_strategy(&self, id: &str) -> Result<StrategyConfig, ApiError> {
        if id == DEFAULT_STRATEGY_ID {
            return Ok(self.default_strategy());
        }
        self.db
            .get_strategy(id)?
            .ok_or_else(|| ApiError::not_found(format!("strategy {} not found", id)))
    }
}

/// Build the Axum router for the backtesting API.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/races", get(races_handler))
        .route("/api/races/qualifying", get(qualifying_default_handler))
        .route("/api/races/qualifying/:strategy_id", get(qualifying_handler))
        .route("/api/races/:id", get(race_handler))
        .route("/api/courses", get(courses_handler))
        .route(
            "/api/strategies",
            get(list_strategies_handler).post(create_strategy_handler),
        )
        .route(
            "/api/strategies/:id",
            get(strategy_handler)
                .put(update_strategy_handler)
                .delete(delete_strategy_handler),
        )
        .route("/api/backtest", post(backtest_handler))
        .route("/api/backtest/results", get(backtest_results_handler))
        .route("/api/backtest/results/:id", get(backtest_result_handler))
        .route("/api/data/import", post(import_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

// ── Envelope ──────────────────────────────────────────────────────────────────

/// Every response body, success or failure, uses this envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            timestamp: Utc::now(),
        })
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        error!("Request failed: {:#}", e);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: e.to_string(),
        }
    }
}

impl From<StrategyError> for ApiError {
    fn from(e: StrategyError) -> Self {
        let status = if e.is_configuration_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::UNPROCESSABLE_ENTITY
        };
        warn!("Strategy rejected request: {}", e);
        Self {
            status,
            message: e.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(self.message),
            timestamp: Utc::now(),
        };
        (self.status, Json(body)).into_response()
    }
}

// ── Handlers ──────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /health
async fn health_handler() -> ApiResult<Health> {
    Ok(ApiResponse::ok(Health {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct RacesQuery {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub country: Option<Country>,
    pub race_type: Option<RaceType>,
    pub course: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: i64,
}

/// GET /api/races?start_date&end_date&country&race_type&course&page&page_size
async fn races_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<RacesQuery>,
) -> ApiResult<Page<Race>> {
    let (page, page_size) = check_paging(q.page, q.page_size, DEFAULT_PAGE_SIZE)?;

    let filter = RaceFilter {
        start_date: q.start_date,
        end_date: q.end_date,
        country: q.country,
        race_type: q.race_type,
        course: q.course,
    };
    let total = state.db.count_races(&filter)?;
    let offset = (page as i64 - 1) * page_size as i64;
    let items = state.db.list_races(&filter, page_size as i64, offset)?;

    Ok(ApiResponse::ok(Page {
        items,
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }))
}

fn total_pages(total: i64, page_size: u32) -> i64 {
    let size = page_size as i64;
    (total + size - 1) / size
}

/// GET /api/races/:id
async fn race_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Race> {
    match state.db.get_race(&id)? {
        Some(race) => Ok(ApiResponse::ok(race)),
        None => Err(ApiError::not_found(format!("race {} not found", id))),
    }
}

#[derive(Debug, Deserialize)]
pub struct QualifyingQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

/// GET /api/races/qualifying?start_date&end_date&page&page_size
async fn qualifying_default_handler(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QualifyingQuery>,
) -> ApiResult<Page<QualifyingRace>> {
    let strategy = state.default_strategy();
    qualifying_page(&state, strategy, q).await
}

/// GET /api/races/qualifying/:strategy_id?start_date&end_date&page&page_size
async fn qualifying_handler(
    State(state): State<Arc<AppState>>,
    Path(strategy_id): Path<String>,
    Query(q): Query<QualifyingQuery>,
) -> ApiResult<Page<QualifyingRace>> {
    let strategy = state.resolve_strategy(&strategy_id)?;
    qualifying_page(&state, strategy, q).await
}

/// Each race is judged independently against the configured bankroll; nothing
/// compounds between races here.
async fn qualifying_page(
    state: &AppState,
    strategy: StrategyConfig,
    q: QualifyingQuery,
) -> ApiResult<Page<QualifyingRace>> {
    check_date_range(q.start_date, q.end_date)?;
    let (page, page_size) = check_paging(q.page, q.page_size, DEFAULT_QUALIFYING_PAGE_SIZE)?;
    strategy.rules.validate()?;
    strategy.stake_management.validate()?;

    let db = state.db.clone();
    let bankroll = state.initial_bankroll;
    let (start, end) = (q.start_date, q.end_date);
    let task = move || -> Result<Vec<QualifyingRace>, ApiError> {
        let (races, runners) = load_card(&db, start, end)?;
        Ok(qualifying_races(
            &races,
            &runners,
            &strategy.rules,
            &strategy.stake_management,
            bankroll,
        )?)
    };
    let qualifying = tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| anyhow::anyhow!("qualifying task failed: {}", e))??;

    Ok(ApiResponse::ok(paginate(qualifying, page, page_size)))
}

/// GET /api/courses
async fn courses_handler(State(state): State<Arc<AppState>>) -> ApiResult<Vec<String>> {
    Ok(ApiResponse::ok(state.db.list_courses()?))
}

/// GET /api/strategies
///
/// The built-in strategy first, then stored ones oldest first.
async fn list_strategies_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<StrategyConfig>> {
    let mut strategies = vec![state.default_strategy()];
    strategies.extend(state.db.list_strategies()?);
    Ok(ApiResponse::ok(strategies))
}

/// GET /api/strategies/:id
async fn strategy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StrategyConfig> {
    Ok(ApiResponse::ok(state.resolve_strategy(&id)?))
}

/// POST /api/strategies
async fn create_strategy_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewStrategy>,
) -> ApiResult<StrategyConfig> {
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("strategy name must not be empty"));
    }
    req.rules.validate()?;
    req.stake_management.validate()?;

    let now = Utc::now();
    let strategy = req.into_config(new_id("strat", now), now);
    state.db.insert_strategy(&strategy)?;
    info!("Strategy '{}' created", strategy.name);
    Ok(ApiResponse::ok(strategy))
}

/// PUT /api/strategies/:id
async fn update_strategy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<StrategyUpdate>,
) -> ApiResult<StrategyConfig> {
    reject_builtin(&id)?;
    let mut strategy = state
        .db
        .get_strategy(&id)?
        .ok_or_else(|| ApiError::not_found(format!("strategy {} not found", id)))?;
    update.apply(&mut strategy, Utc::now());
    if strategy.name.trim().is_empty() {
        return Err(ApiError::bad_request("strategy name must not be empty"));
    }
    strategy.rules.validate()?;
    strategy.stake_management.validate()?;

    if !state.db.update_strategy(&strategy)? {
        return Err(ApiError::not_found(format!("strategy {} not found", id)));
    }
    info!("Strategy {} updated", id);
    Ok(ApiResponse::ok(strategy))
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

/// DELETE /api/strategies/:id
async fn delete_strategy_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Deleted> {
    reject_builtin(&id)?;
    if !state.db.delete_strategy(&id)? {
        return Err(ApiError::not_found(format!("strategy {} not found", id)));
    }
    info!("Strategy {} deleted", id);
    Ok(ApiResponse::ok(Deleted { id, deleted: true }))
}

#[derive(Debug, Deserialize)]
pub struct BacktestRequest {
    /// Inline configuration; takes precedence over `strategy_id`
    #[serde(default)]
    pub strategy_config: Option<StrategyConfig>,
    #[serde(default)]
    pub strategy_id: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_bankroll: Option<f64>,
    pub seed: Option<u64>,
}

/// POST /api/backtest
async fn backtest_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BacktestRequest>,
) -> ApiResult<BacktestResult> {
    check_date_range(req.start_date, req.end_date)?;
    let initial_bankroll = req.initial_bankroll.unwrap_or(state.initial_bankroll);
    if initial_bankroll.is_nan() || initial_bankroll < MIN_BACKTEST_BANKROLL {
        return Err(ApiError::bad_request(format!(
            "initial_bankroll must be at least {}",
            MIN_BACKTEST_BANKROLL
        )));
    }
    let strategy_config = match (req.strategy_config, req.strategy_id.as_deref()) {
        (Some(config), _) => config,
        (None, Some(id)) => state.resolve_strategy(id)?,
        (None, None) => state.default_strategy(),
    };
    let engine = BacktestEngine::new(
        strategy_config.rules.clone(),
        strategy_config.stake_management.clone(),
    )?;

    let (races, runners) = load_card(&state.db, req.start_date, req.end_date)?;
    info!(
        "Backtesting '{}' over {} races ({} to {})",
        strategy_config.name,
        races.len(),
        req.start_date,
        req.end_date
    );

    let mut source = match req.seed.or(state.seed) {
        Some(seed) => SeededSource::new(seed),
        None => SeededSource::from_entropy(),
    };
    let seed = source.seed();
    let total_races_analyzed = races.len();

    let outcome = tokio::task::spawn_blocking(move || {
        engine.run(&races, &runners, initial_bankroll, &mut source)
    })
    .await
    .map_err(|e| anyhow::anyhow!("backtest task failed: {}", e))??;

    let created_at = Utc::now();
    let result = BacktestResult {
        id: new_id("bt", created_at),
        strategy_config,
        start_date: req.start_date,
        end_date: req.end_date,
        initial_bankroll: outcome.initial_bankroll,
        final_bankroll: outcome.final_bankroll,
        qualifying_races: outcome.bets.len(),
        total_races_analyzed,
        seed,
        performance: outcome.performance,
        bets: outcome.bets,
        created_at,
    };
    state.db.insert_backtest(&result)?;
    info!(
        "Backtest {} stored: {} bets, ROI {:.2}%, seed {}",
        result.id, result.performance.total_bets, result.performance.roi, seed
    );

    Ok(ApiResponse::ok(result))
}

/// GET /api/backtest/results
async fn backtest_results_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<BacktestSummary>> {
    Ok(ApiResponse::ok(state.db.list_backtests(BACKTEST_LIST_LIMIT)?))
}

/// GET /api/backtest/results/:id
async fn backtest_result_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<BacktestResult> {
    match state.db.get_backtest(&id)? {
        Some(result) => Ok(ApiResponse::ok(result)),
        None => Err(ApiError::not_found(format!("backtest {} not found", id))),
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportRequest {
    #[serde(default)]
    pub races: Vec<Race>,
    #[serde(default)]
    pub runners: Vec<Runner>,
}

/// POST /api/data/import
async fn import_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ImportRequest>,
) -> ApiResult<ImportSummary> {
    let races = state.db.import_races(&req.races)?;
    let runners = state.db.import_runners(&req.runners)?;
    let summary = ImportSummary {
        imported: races.imported + runners.imported,
        errors: races.errors + runners.errors,
    };
    info!(
        "Imported {} races and {} runners ({} rejected)",
        races.imported, runners.imported, summary.errors
    );
    Ok(ApiResponse::ok(summary))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn new_id(prefix: &str, now: DateTime<Utc>) -> String {
    format!("{}_{}_{:08x}", prefix, now.timestamp_millis(), rand::random::<u32>())
}

fn reject_builtin(id: &str) -> Result<(), ApiError> {
    if id == DEFAULT_STRATEGY_ID {
        return Err(ApiError::bad_request("the built-in strategy cannot be modified"));
    }
    Ok(())
}

/// Resolve `page`/`page_size` query values, 1-based with page_size in 1..=100.
fn check_paging(
    page: Option<u32>,
    page_size: Option<u32>,
    default_size: u32,
) -> Result<(u32, u32), ApiError> {
    let page = page.unwrap_or(1);
    let page_size = page_size.unwrap_or(default_size);
    if page == 0 {
        return Err(ApiError::bad_request("page must be at least 1"));
    }
    if page_size == 0 || page_size > MAX_PAGE_SIZE {
        return Err(ApiError::bad_request(format!(
            "page_size must be between 1 and {}",
            MAX_PAGE_SIZE
        )));
    }
    Ok((page, page_size))
}

/// Slice an in-memory result list into one page.
fn paginate<T>(items: Vec<T>, page: u32, page_size: u32) -> Page<T> {
    let total = items.len() as i64;
    let offset = (page as usize - 1) * page_size as usize;
    let items = items
        .into_iter()
        .skip(offset)
        .take(page_size as usize)
        .collect();
    Page {
        items,
        total,
        page,
        page_size,
        total_pages: total_pages(total, page_size),
    }
}

fn check_date_range(start: NaiveDate, end: NaiveDate) -> Result<(), ApiError> {
    if start > end {
        return Err(ApiError::bad_request(format!(
            "start_date {} is after end_date {}",
            start, end
        )));
    }
    Ok(())
}

/// Races in replay order plus all their runners.
fn load_card(
    db: &Database,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<(Vec<Race>, Vec<Runner>)> {
    let races = db.races_for_backtest(start, end)?;
    let ids: Vec<String> = races.iter().map(|r| r.id.clone()).collect();
    let runners = db.runners_for_races(&ids)?;
    Ok((races, runners))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::qualification::fixtures::{race, runner};

    fn state() -> Arc<AppState> {
        let db = Database::open(":memory:").unwrap();
        let races = vec![
            race("r1", "2024-06-01"),
            race("r2", "2024-06-02"),
            race("r3", "2024-06-03"),
        ];
        let runners = vec![
            runner("r1_a", "r1", Some(3.0), true),
            runner("r2_a", "r2", Some(8.0), true),
            runner("r3_a", "r3", Some(2.5), true),
        ];
        db.import_races(&races).unwrap();
        db.import_runners(&runners).unwrap();
        Arc::new(AppState {
            db,
            initial_bankroll: 100_000.0,
            stake_management: StakeManagement::default(),
            seed: Some(42),
        })
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn request(bankroll: Option<f64>) -> BacktestRequest {
        BacktestRequest {
            strategy_config: None,
            strategy_id: None,
            start_date: date("2024-06-01"),
            end_date: date("2024-06-03"),
            initial_bankroll: bankroll,
            seed: None,
        }
    }

    #[test]
    fn test_total_pages() {
        assert_eq!(total_pages(0, 50), 0);
        assert_eq!(total_pages(50, 50), 1);
        assert_eq!(total_pages(51, 50), 2);
    }

    #[test]
    fn test_strategy_error_status() {
        let config: ApiError = StrategyError::InvalidConfiguration("x".into()).into();
        assert_eq!(config.status, StatusCode::BAD_REQUEST);
        let pre: ApiError = StrategyError::PreconditionViolation("x".into()).into();
        assert_eq!(pre.status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn test_races_pagination() {
        let query = RacesQuery {
            page: Some(2),
            page_size: Some(2),
            ..RacesQuery::default()
        };
        let Json(resp) = races_handler(State(state()), Query(query)).await.unwrap();
        let page = resp.data.unwrap();
        assert!(resp.success);
        assert_eq!(page.total, 3);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].id, "r1");
    }

    #[tokio::test]
    async fn test_page_size_bounds() {
        let query = RacesQuery {
            page_size: Some(101),
            ..RacesQuery::default()
        };
        let err = races_handler(State(state()), Query(query)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_race_is_404() {
        let err = race_handler(State(state()), Path("nope".into())).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    fn qualifying_query(page: Option<u32>, page_size: Option<u32>) -> QualifyingQuery {
        QualifyingQuery {
            start_date: date("2024-06-01"),
            end_date: date("2024-06-03"),
            page,
            page_size,
        }
    }

    fn short_price_strategy() -> NewStrategy {
        let mut config = StrategyConfig::default();
        config.rules.max_odds = 2.8;
        NewStrategy {
            name: "Short price".into(),
            description: String::new(),
            rules: config.rules,
            stake_management: StakeManagement::default(),
            is_active: true,
        }
    }

    #[tokio::test]
    async fn test_qualifying_races() {
        let Json(resp) = qualifying_default_handler(State(state()), Query(qualifying_query(None, None)))
            .await
            .unwrap();
        let page = resp.data.unwrap();
        let ids: Vec<String> = page.items.into_iter().map(|q| q.race.id).collect();
        // r2's favorite at 8.0 is outside the odds band
        assert_eq!(ids, vec!["r1".to_string(), "r3".to_string()]);
        assert_eq!(page.total, 2);
        assert_eq!(page.page_size, 20);
    }

    #[tokio::test]
    async fn test_qualifying_pages() {
        let Json(resp) = qualifying_handler(
            State(state()),
            Path(DEFAULT_STRATEGY_ID.to_string()),
            Query(qualifying_query(Some(2), Some(1))),
        )
        .await
        .unwrap();
        let page = resp.data.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(page.total_pages, 2);
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.items[0].race.id, "r3");
    }

    #[tokio::test]
    async fn test_qualifying_with_stored_strategy() {
        let state = state();
        let Json(created) =
            create_strategy_handler(State(state.clone()), Json(short_price_strategy()))
                .await
                .unwrap();
        let id = created.data.unwrap().id.unwrap();

        let Json(resp) = qualifying_handler(
            State(state.clone()),
            Path(id),
            Query(qualifying_query(None, None)),
        )
        .await
        .unwrap();
        let ids: Vec<String> = resp.data.unwrap().items.into_iter().map(|q| q.race.id).collect();
        // r1 at 3.0 is now above the 2.8 maximum
        assert_eq!(ids, vec!["r3".to_string()]);

        let err = qualifying_handler(
            State(state),
            Path("strat_missing".into()),
            Query(qualifying_query(None, None)),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_strategy_lifecycle() {
        let state = state();
        let Json(created) =
            create_strategy_handler(State(state.clone()), Json(short_price_strategy()))
                .await
                .unwrap();
        let created = created.data.unwrap();
        let id = created.id.clone().unwrap();
        assert!(created.created_at.is_some());

        let Json(list) = list_strategies_handler(State(state.clone())).await.unwrap();
        let ids: Vec<Option<String>> = list.data.unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![Some(DEFAULT_STRATEGY_ID.to_string()), Some(id.clone())]);

        let update = StrategyUpdate {
            description: Some("tighter band".into()),
            ..StrategyUpdate::default()
        };
        let Json(updated) =
            update_strategy_handler(State(state.clone()), Path(id.clone()), Json(update))
                .await
                .unwrap();
        let updated = updated.data.unwrap();
        assert_eq!(updated.description, "tighter band");
        assert_eq!(updated.name, "Short price");
        assert_eq!(updated.rules.max_odds, 2.8);

        let Json(fetched) = strategy_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert_eq!(fetched.data.unwrap(), updated);

        let Json(deleted) = delete_strategy_handler(State(state.clone()), Path(id.clone()))
            .await
            .unwrap();
        assert!(deleted.data.unwrap().deleted);
        let err = strategy_handler(State(state), Path(id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_strategy_validation() {
        let state = state();
        let mut bad = short_price_strategy();
        bad.rules.min_odds = 4.0;
        bad.rules.max_odds = 3.0;
        let err = create_strategy_handler(State(state.clone()), Json(bad))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = delete_strategy_handler(State(state.clone()), Path(DEFAULT_STRATEGY_ID.into()))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = update_strategy_handler(
            State(state),
            Path("strat_missing".into()),
            Json(StrategyUpdate::default()),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_backtest_by_strategy_id() {
        let state = state();
        let Json(created) =
            create_strategy_handler(State(state.clone()), Json(short_price_strategy()))
                .await
                .unwrap();
        let mut req = request(None);
        req.strategy_id = created.data.unwrap().id;
        let Json(resp) = backtest_handler(State(state), Json(req)).await.unwrap();
        let result = resp.data.unwrap();
        assert_eq!(result.strategy_config.name, "Short price");
        assert_eq!(result.qualifying_races, 1);
    }

    #[tokio::test]
    async fn test_backtest_persists_and_replays() {
        let state = state();
        let Json(resp) = backtest_handler(State(state.clone()), Json(request(None)))
            .await
            .unwrap();
        let first = resp.data.unwrap();
        assert_eq!(first.seed, 42);
        assert_eq!(first.total_races_analyzed, 3);
        assert_eq!(first.qualifying_races, 2);
        assert_eq!(first.initial_bankroll, 100_000.0);

        let Json(stored) = backtest_result_handler(State(state.clone()), Path(first.id.clone()))
            .await
            .unwrap();
        assert_eq!(stored.data.unwrap().bets, first.bets);

        let Json(again) = backtest_handler(State(state.clone()), Json(request(None)))
            .await
            .unwrap();
        assert_eq!(again.data.unwrap().bets, first.bets);

        let Json(list) = backtest_results_handler(State(state)).await.unwrap();
        assert_eq!(list.data.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_backtest_rejects_small_bankroll() {
        let err = backtest_handler(State(state()), Json(request(Some(50.0))))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_backtest_rejects_invalid_rules() {
        let mut req = request(None);
        let mut config = StrategyConfig::default();
        config.rules.min_odds = 5.0;
        config.rules.max_odds = 3.0;
        req.strategy_config = Some(config);
        let err = backtest_handler(State(state()), Json(req)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_import_counts_rejections() {
        let state = state();
        let req = ImportRequest {
            races: vec![race("r9", "2024-07-01")],
            runners: vec![
                runner("r9_a", "r9", Some(3.0), true),
                runner("orphan", "missing", Some(3.0), true),
            ],
        };
        let Json(resp) = import_handler(State(state.clone()), Json(req)).await.unwrap();
        assert_eq!(resp.data.unwrap(), ImportSummary { imported: 2, errors: 1 });
        assert!(state.db.get_race("r9").unwrap().is_some());
    }
}
