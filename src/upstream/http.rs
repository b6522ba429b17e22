use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::{Result, UpstreamError};
use crate::types::{RankingEntry, RosterEntry, Round, RoundStatus, TeamRoster};
use crate::upstream::LeagueApi;

const SESSION_HEADER: &str = "x-session-token";
const USER_AGENT: &str = "fantasy-watcher/0.1";
/// How much of an error body is kept in error messages.
const ERROR_BODY_PREVIEW: usize = 180;

/// reqwest-backed league API.
pub struct HttpLeagueApi {
    client: reqwest::Client,
    base_url: String,
    session_token: RwLock<String>,
}

impl HttpLeagueApi {
    pub fn new(base_url: &str, session_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session_token: RwLock::new(session_token.to_string()),
        })
    }

    /// Replace the session credential. Takes effect on the next request.
    pub fn set_session_token(&self, token: &str) {
        if let Ok(mut current) = self.session_token.write() {
            *current = token.trim().to_string();
        }
    }

    pub fn has_session_token(&self) -> bool {
        self.session_token.read().map(|t| !t.is_empty()).unwrap_or(false)
    }

    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> std::result::Result<T, UpstreamError> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self.client.get(&url).query(query);
        let token = self.session_token.read().map(|t| t.clone()).unwrap_or_default();
        if !token.is_empty() {
            req = req.header(SESSION_HEADER, token);
        }

        debug!(url = %url, "league API request");
        let resp = req.send().await.map_err(|e| classify_transport(&url, e))?;
        let status = resp.status();
        if !status.is_success() {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after);
            let body = resp.text().await.unwrap_or_default();
            let err = classify_status(status, &url, &body, retry_after);
            warn!(url = %url, status = status.as_u16(), kind = err.kind(), "league API failure");
            return Err(err);
        }

        let envelope: Envelope<T> = resp.json().await.map_err(|e| {
            if e.is_decode() {
                UpstreamError::Unknown(format!("undecodable body from {url}: {e}"))
            } else {
                classify_transport(&url, e)
            }
        })?;
        Ok(envelope.data)
    }
}

#[async_trait]
impl LeagueApi for HttpLeagueApi {
    async fn fetch_rounds(&self, league: &str) -> std::result::Result<Vec<Round>, UpstreamError> {
        let rounds: Vec<WireRound> = self.get_data(&format!("/leagues/{league}/rounds"), &[]).await?;
        Ok(rounds.into_iter().map(Round::from).collect())
    }

    async fn fetch_ranking(
        &self,
        league: &str,
        round_id: &str,
    ) -> std::result::Result<Vec<RankingEntry>, UpstreamError> {
        let rows: Vec<WireRankingRow> = self
            .get_data(
                &format!("/leagues/{league}/ranking"),
                &[("roundId", round_id), ("orderBy", "split_score")],
            )
            .await?;
        Ok(rows.into_iter().enumerate().map(|(i, row)| row.into_entry(i)).collect())
    }

    async fn fetch_roster(
        &self,
        round_id: &str,
        team_id: &str,
    ) -> std::result::Result<TeamRoster, UpstreamError> {
        let roster: WireRoster = self
            .get_data(&format!("/rosters/per-round/{round_id}/{team_id}"), &[])
            .await?;
        Ok(roster.into_team(team_id))
    }
}

fn classify_transport(url: &str, e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        UpstreamError::Transient(format!("{url}: {e}"))
    } else {
        UpstreamError::Unknown(format!("{url}: {e}"))
    }
}

fn classify_status(
    status: StatusCode,
    url: &str,
    body: &str,
    retry_after: Option<Duration>,
) -> UpstreamError {
    let preview: String = body.chars().take(ERROR_BODY_PREVIEW).collect();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            UpstreamError::AuthExpired(format!("HTTP {} :: {preview}", status.as_u16()))
        }
        StatusCode::NOT_FOUND => UpstreamError::NotFound(url.to_string()),
        StatusCode::TOO_MANY_REQUESTS => UpstreamError::RateLimited { retry_after },
        s if s.is_server_error() => {
            UpstreamError::Transient(format!("HTTP {} for {url} :: {preview}", s.as_u16()))
        }
        s => UpstreamError::Unknown(format!("HTTP {} for {url} :: {preview}", s.as_u16())),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date form is ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Wire types — every payload is wrapped in {"data": ...}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRound {
    id: String,
    #[serde(default)]
    name: Option<String>,
    status: RoundStatus,
    #[serde(default)]
    index_in_split: Option<i64>,
    #[serde(default)]
    market_opens_at: Option<DateTime<Utc>>,
    #[serde(default)]
    market_closes_at: Option<DateTime<Utc>>,
}

impl From<WireRound> for Round {
    fn from(w: WireRound) -> Self {
        Round {
            name: w.name.unwrap_or_else(|| w.id.clone()),
            id: w.id,
            status: w.status,
            index_in_split: w.index_in_split,
            market_opens_at: w.market_opens_at,
            market_closes_at: w.market_closes_at,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRankingRow {
    #[serde(default)]
    rank: Option<u32>,
    #[serde(default)]
    score: Option<f64>,
    user_team: WireUserTeam,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireUserTeam {
    id: String,
    name: String,
    #[serde(default)]
    owner_name: Option<String>,
}

impl WireRankingRow {
    /// Rows without a rank fall back to their position in the response.
    fn into_entry(self, position: usize) -> RankingEntry {
        RankingEntry {
            team_id: self.user_team.id,
            team_name: self.user_team.name,
            owner_name: self.user_team.owner_name,
            rank: self.rank.unwrap_or(position as u32 + 1),
            score: self.score.unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoster {
    #[serde(default)]
    round_roster: Option<WireRoundRoster>,
    #[serde(default)]
    roster_players: Vec<WireRosterPlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRoundRoster {
    #[serde(default)]
    points_partial: Option<f64>,
    #[serde(default)]
    points: Option<f64>,
}

impl WireRoster {
    fn into_team(self, team_id: &str) -> TeamRoster {
        TeamRoster {
            team_id: team_id.to_string(),
            round_points: self.round_roster.and_then(|r| r.points_partial.or(r.points)),
            players: self.roster_players.into_iter().map(RosterEntry::from).collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireRosterPlayer {
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    points_partial: Option<f64>,
    #[serde(default)]
    points: Option<f64>,
    #[serde(default)]
    round_esports_player: Option<WireEsportsPlayer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEsportsPlayer {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    pro_player: Option<WireProPlayer>,
}

#[derive(Debug, Deserialize)]
struct WireProPlayer {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl From<WireRosterPlayer> for RosterEntry {
    fn from(w: WireRosterPlayer) -> Self {
        let role = w.role.unwrap_or_else(|| "unknown".to_string());
        let esports = w.round_esports_player;
        let pro = esports.as_ref().and_then(|e| e.pro_player.as_ref());
        let player_name = pro.and_then(|p| p.name.clone());
        let player_id = pro
            .and_then(|p| p.id.clone())
            .or_else(|| esports.as_ref().and_then(|e| e.id.clone()))
            .or_else(|| player_name.clone())
            .unwrap_or_else(|| role.clone());
        RosterEntry {
            player_id,
            player_name,
            role,
            // Live rounds report partial points; settled rounds only `points`.
            score: w.points_partial.or(w.points).unwrap_or(0.0),
        }
    }
}
