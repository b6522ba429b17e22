use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::error::AppError;
use crate::types::Subscription;
use crate::upstream::{HttpLeagueApi, UpstreamClient};
use crate::watcher::{Registry, WatcherSummary};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<Registry>,
    pub client: Arc<UpstreamClient>,
    pub league_api: Arc<HttpLeagueApi>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/stats/latency", get(get_stats_latency))
        .route("/watchers", get(list_watchers).post(create_watcher))
        .route("/watchers/:chat_id/:league", delete(delete_watcher))
        .route("/auth", post(refresh_auth))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct WatchRequest {
    pub chat_id: String,
    pub league: String,
}

#[derive(Deserialize)]
pub struct AuthRequest {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct WatchResponse {
    pub chat_id: String,
    pub league: String,
    pub created: bool,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_secs: u64,
    pub active_watchers: u64,
    pub auth_paused: u64,
    pub cycles: u64,
    pub failed_cycles: u64,
    pub cached_entries: usize,
    pub has_session_token: bool,
}

#[derive(Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let health = &state.health;
    let status = if health.auth_paused() > 0 { "degraded" } else { "ok" };
    Json(HealthResponse {
        status,
        uptime_secs: health.uptime_secs(),
        active_watchers: health.active_watchers(),
        auth_paused: health.auth_paused(),
        cycles: health.cycles(),
        failed_cycles: health.failed_cycles(),
        cached_entries: state.client.cached_entries(),
        has_session_token: state.league_api.has_session_token(),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50_ms, p95_ms, p99_ms) = state.latency.percentiles();
    Json(LatencyResponse { samples: state.latency.len(), p50_ms, p95_ms, p99_ms })
}

async fn list_watchers(State(state): State<ApiState>) -> Json<Vec<WatcherSummary>> {
    Json(state.registry.list().await)
}

async fn create_watcher(
    State(state): State<ApiState>,
    Json(req): Json<WatchRequest>,
) -> Result<(StatusCode, Json<WatchResponse>), AppError> {
    let subscription = Subscription::parse(&req.chat_id, &req.league)?;
    let (chat_id, league) = (subscription.chat_id.clone(), subscription.league.clone());

    let created = state.registry.watch(subscription).await?;
    let status = if created { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(WatchResponse { chat_id, league, created })))
}

async fn delete_watcher(
    State(state): State<ApiState>,
    Path((chat_id, league)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let removed = state.registry.unwatch(&Subscription::new(chat_id, league)).await?;
    Ok(if removed { StatusCode::NO_CONTENT } else { StatusCode::NOT_FOUND })
}

async fn refresh_auth(
    State(state): State<ApiState>,
    Json(req): Json<AuthRequest>,
) -> Result<StatusCode, AppError> {
    if req.token.trim().is_empty() {
        return Err(AppError::BadRequest("token must not be empty".to_string()));
    }
    state.league_api.set_session_token(&req.token);
    state.client.invalidate_all();
    state.registry.credentials_refreshed();
    Ok(StatusCode::NO_CONTENT)
}
