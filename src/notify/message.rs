use std::fmt::{self, Write as _};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::diff::{PlayerDelta, Trend};

/// One row of a standings board.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StandingLine {
    pub position: usize,
    pub team_name: String,
    pub owner_name: Option<String>,
    /// Split score from the ranking; ordering and trends follow it.
    pub score: f64,
    /// The team's points in this round alone, when its roster was read.
    pub round_points: Option<f64>,
    pub trend: Trend,
}

/// Content handed to the notifier. Rendered as plain text via `Display`;
/// chat-specific markup is the transport's business.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    MarketOpened {
        league: String,
        round_name: String,
        closes_at: DateTime<Utc>,
    },
    ReminderDue {
        league: String,
        round_name: String,
        hours_before: i64,
        closes_at: DateTime<Utc>,
    },
    RoundLive {
        league: String,
        round_name: String,
    },
    LiveStandings {
        league: String,
        round_name: String,
        ranking_changed: bool,
        standings: Vec<StandingLine>,
        player_moves: Vec<PlayerDelta>,
        as_of: DateTime<Utc>,
    },
    RoundCompleted {
        league: String,
        round_name: String,
        standings: Vec<StandingLine>,
    },
    LeagueUnavailable {
        league: String,
        detail: String,
    },
    AuthExpired {
        league: String,
        detail: String,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::MarketOpened { .. } => "market_opened",
            Notification::ReminderDue { .. } => "reminder_due",
            Notification::RoundLive { .. } => "round_live",
            Notification::LiveStandings { .. } => "live_standings",
            Notification::RoundCompleted { .. } => "round_completed",
            Notification::LeagueUnavailable { .. } => "league_unavailable",
            Notification::AuthExpired { .. } => "auth_expired",
        }
    }
}

fn write_standings(f: &mut fmt::Formatter<'_>, standings: &[StandingLine]) -> fmt::Result {
    for line in standings {
        let owner = line.owner_name.as_deref().unwrap_or("—");
        let mut row = format!("{:>2}. {} ({owner}) {:.2}", line.position, line.team_name, line.score);
        if let Some(points) = line.round_points {
            let _ = write!(row, " [round {points:.2}]");
        }
        let arrow = line.trend.arrow();
        if !arrow.is_empty() {
            let _ = write!(row, " {arrow}");
        }
        writeln!(f, "{row}")?;
    }
    Ok(())
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notification::MarketOpened { league, round_name, closes_at } => write!(
                f,
                "Market OPEN for {league}\nRound: {round_name}\nCloses: {}",
                closes_at.format("%Y-%m-%d %H:%M UTC"),
            ),
            Notification::ReminderDue { league, round_name, hours_before, closes_at } => write!(
                f,
                "Reminder: {league} market closes in {hours_before}h ({})\nRound: {round_name}. Last chance to change your team!",
                closes_at.format("%Y-%m-%d %H:%M UTC"),
            ),
            Notification::RoundLive { league, round_name } => {
                write!(f, "Market closed. {league} {round_name} is live, following the games now.")
            }
            Notification::LiveStandings { league, round_name, ranking_changed, standings, player_moves, as_of } => {
                if *ranking_changed {
                    writeln!(f, "RANKING CHANGED!")?;
                }
                writeln!(f, "{league} — {round_name}")?;
                write_standings(f, standings)?;
                if !player_moves.is_empty() {
                    let ups = player_moves.iter().filter(|m| m.trend() == Trend::Up).count();
                    let downs = player_moves.iter().filter(|m| m.trend() == Trend::Down).count();
                    writeln!(f, "Players moved: {ups} ↑ {downs} ↓")?;
                }
                write!(f, "Updated {}", as_of.format("%H:%M:%S UTC"))
            }
            Notification::RoundCompleted { league, round_name, standings } => {
                writeln!(f, "ROUND COMPLETED: {league} {round_name}")?;
                write_standings(f, standings)?;
                write!(f, "Final scores above.")
            }
            Notification::LeagueUnavailable { league, detail } => {
                write!(f, "League {league} is unavailable ({detail}). Waiting for the next round.")
            }
            Notification::AuthExpired { league, detail } => write!(
                f,
                "League API rejected our credentials while watching {league} ({detail}). Polling is paused until the token is refreshed.",
            ),
        }
    }
}
