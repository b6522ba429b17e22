pub mod client;
pub mod http;

use async_trait::async_trait;

use crate::error::UpstreamError;
use crate::types::{RankingEntry, Round, TeamRoster};

pub use client::{RetryPolicy, UpstreamClient};
pub use http::HttpLeagueApi;

/// Raw league API reads. Idempotent and side-effect free from the watcher's view.
#[async_trait]
pub trait LeagueApi: Send + Sync {
    async fn fetch_rounds(&self, league: &str) -> Result<Vec<Round>, UpstreamError>;

    async fn fetch_ranking(&self, league: &str, round_id: &str) -> Result<Vec<RankingEntry>, UpstreamError>;

    async fn fetch_roster(&self, round_id: &str, team_id: &str) -> Result<TeamRoster, UpstreamError>;
}
