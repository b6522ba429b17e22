use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// One chat watching one league.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub chat_id: String,
    pub league: String,
}

impl Subscription {
    /// Joins the two parts in `key()`; never allowed inside either part.
    pub const KEY_SEPARATOR: char = ':';

    pub fn new(chat_id: impl Into<String>, league: impl Into<String>) -> Self {
        Self { chat_id: chat_id.into(), league: league.into() }
    }

    /// Trimmed, non-empty parts that keep `key()` unambiguous.
    pub fn parse(chat_id: &str, league: &str) -> Result<Self> {
        let (chat_id, league) = (chat_id.trim(), league.trim());
        if chat_id.is_empty() || league.is_empty() {
            return Err(AppError::BadRequest("chat_id and league are required".to_string()));
        }
        if chat_id.contains(Self::KEY_SEPARATOR) || league.contains(Self::KEY_SEPARATOR) {
            return Err(AppError::BadRequest(format!(
                "chat_id and league must not contain '{}'",
                Self::KEY_SEPARATOR
            )));
        }
        Ok(Self::new(chat_id, league))
    }

    /// Stable key used as the persistence primary key.
    pub fn key(&self) -> String {
        format!("{}{}{}", self.chat_id, Self::KEY_SEPARATOR, self.league)
    }
}

impl std::fmt::Display for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.chat_id, self.league)
    }
}

/// Opaque handle returned by the notifier; used to edit the live message in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageRef(pub String);

impl std::fmt::Display for MessageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Phase
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    /// No active round; waiting for a market to open.
    PreMarket,
    /// Round open for roster changes, not yet live.
    MarketOpen,
    /// Round in progress; scores changing.
    Live,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::PreMarket => "PRE_MARKET",
            Phase::MarketOpen => "MARKET_OPEN",
            Phase::Live => "LIVE",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Rounds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundStatus {
    #[serde(alias = "not_started")]
    Upcoming,
    #[serde(alias = "open")]
    MarketOpen,
    #[serde(alias = "locked", alias = "live")]
    InProgress,
    #[serde(alias = "finished")]
    Completed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RoundStatus::Upcoming => "upcoming",
            RoundStatus::MarketOpen => "market_open",
            RoundStatus::InProgress => "in_progress",
            RoundStatus::Completed => "completed",
            RoundStatus::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    pub id: String,
    pub name: String,
    pub status: RoundStatus,
    pub index_in_split: Option<i64>,
    pub market_opens_at: Option<DateTime<Utc>>,
    pub market_closes_at: Option<DateTime<Utc>>,
}

/// The round a watcher should follow: the in-progress round with the highest
/// split index, otherwise the round whose market closes last.
pub fn pick_current_round(rounds: &[Round]) -> Option<&Round> {
    let in_progress = rounds
        .iter()
        .filter(|r| r.status == RoundStatus::InProgress)
        .max_by_key(|r| r.index_in_split.unwrap_or(-1));
    if in_progress.is_some() {
        return in_progress;
    }
    rounds.iter().max_by_key(|r| r.market_closes_at)
}

// ---------------------------------------------------------------------------
// Ranking / roster rows as returned by the league API
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingEntry {
    pub team_id: String,
    pub team_name: String,
    pub owner_name: Option<String>,
    pub rank: u32,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub player_id: String,
    pub player_name: Option<String>,
    pub role: String,
    pub score: f64,
}

// ---------------------------------------------------------------------------
// Snapshots — immutable copies of the last successful poll, used for diffing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankingSnapshot {
    pub round_id: String,
    /// Sorted by (rank, team_id); index = ordinal position.
    pub entries: Vec<RankingEntry>,
}

impl RankingSnapshot {
    pub fn new(round_id: impl Into<String>, mut entries: Vec<RankingEntry>) -> Self {
        entries.sort_by(|a, b| a.rank.cmp(&b.rank).then_with(|| a.team_id.cmp(&b.team_id)));
        Self { round_id: round_id.into(), entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamRoster {
    pub team_id: String,
    /// The team's own total for the round (`roundRoster`), partial while live.
    #[serde(default)]
    pub round_points: Option<f64>,
    pub players: Vec<RosterEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterSnapshot {
    pub round_id: String,
    pub teams: Vec<TeamRoster>,
}

impl RosterSnapshot {
    pub fn new(round_id: impl Into<String>, mut teams: Vec<TeamRoster>) -> Self {
        teams.sort_by(|a, b| a.team_id.cmp(&b.team_id));
        Self { round_id: round_id.into(), teams }
    }

    pub fn round_points(&self, team_id: &str) -> Option<f64> {
        self.teams
            .binary_search_by(|t| t.team_id.as_str().cmp(team_id))
            .ok()
            .and_then(|i| self.teams[i].round_points)
    }
}
