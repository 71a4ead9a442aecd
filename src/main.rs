use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use tracing::info;

mod api;
mod config;
mod db;
mod error;
mod strategy;

use api::AppState;
use config::Config;
use db::{Database, RaceFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    // Open database
    let db = Database::open(&config.database_path)?;
    let stored_races = db.count_races(&RaceFilter::default())?;
    info!(
        "Database opened: {} ({} races stored)",
        config.database_path, stored_races
    );

    match config.seed {
        Some(seed) => info!("Backtests use fixed seed {}", seed),
        None => info!("Backtests draw a fresh seed per run"),
    }

    let state = AppState {
        db,
        initial_bankroll: config.initial_bankroll,
        stake_management: config.stake_management(),
        seed: config.seed,
    };
    let app = api::router(state);
    let addr: SocketAddr = config.dashboard_addr.parse()?;
    info!("API listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await?;

    Ok(())
}
