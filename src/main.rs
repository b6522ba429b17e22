mod api;
mod cache;
mod clock;
mod config;
mod db;
mod diff;
mod error;
mod notify;
mod types;
mod upstream;
mod watcher;

#[cfg(test)]
mod testutil;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::api::{router, ApiState};
use crate::clock::SystemClock;
use crate::config::Config;
use crate::db::SqliteStateStore;
use crate::error::Result;
use crate::notify::LogNotifier;
use crate::upstream::{HttpLeagueApi, UpstreamClient};
use crate::watcher::{Registry, WatcherDeps};

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let store = Arc::new(SqliteStateStore::connect(&cfg.db_path).await?);
    info!("Database ready at {}", cfg.db_path);

    // --- Upstream ---
    let league_api = Arc::new(HttpLeagueApi::new(&cfg.api_url, &cfg.session_token)?);
    if !league_api.has_session_token() {
        warn!("X_SESSION_TOKEN is empty; requests will be rejected until POST /auth sets one");
    }
    let client = Arc::new(UpstreamClient::from_config(Arc::clone(&league_api) as _, &cfg));

    // --- Watchers ---
    let health = Arc::new(HealthState::new());
    let latency = Arc::new(LatencyStats::new());
    let deps = Arc::new(WatcherDeps {
        client: Arc::clone(&client),
        store,
        notifier: Arc::new(LogNotifier::new()),
        clock: Arc::new(SystemClock),
        policy: cfg.poll,
        latency: Arc::clone(&latency),
        health: Arc::clone(&health),
    });
    let registry = Arc::new(Registry::new(deps));
    let resumed = registry.resume_all().await?;
    info!(
        resumed,
        poll_secs = cfg.poll.poll_secs,
        max_poll_secs = cfg.poll.max_poll_secs,
        max_stale_polls = cfg.poll.max_stale_polls,
        "watchers resumed from {}",
        cfg.db_path,
    );

    // --- HTTP API server ---
    let app = router(ApiState {
        registry: Arc::clone(&registry),
        client,
        league_api,
        health,
        latency,
    });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("API listening on {bind_addr}");
    let served = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    registry.shutdown().await;
    served?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
