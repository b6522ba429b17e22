use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{RankingSnapshot, RosterSnapshot};

/// Scores closer than this are the same score.
const SCORE_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trend {
    Up,
    Down,
    Flat,
}

impl Trend {
    fn between(previous: f64, current: f64) -> Self {
        if current - previous > SCORE_EPSILON {
            Trend::Up
        } else if previous - current > SCORE_EPSILON {
            Trend::Down
        } else {
            Trend::Flat
        }
    }

    pub fn arrow(&self) -> &'static str {
        match self {
            Trend::Up => "↑",
            Trend::Down => "↓",
            Trend::Flat => "",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreDelta {
    pub team_id: String,
    pub previous: f64,
    pub current: f64,
}

impl ScoreDelta {
    pub fn trend(&self) -> Trend {
        Trend::between(self.previous, self.current)
    }
}

/// Ordinal positions are 1-based; `None` means the team was absent on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankMove {
    pub team_id: String,
    pub from: Option<usize>,
    pub to: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerDelta {
    pub team_id: String,
    pub player_id: String,
    pub role: String,
    pub previous: f64,
    pub current: f64,
}

impl PlayerDelta {
    pub fn trend(&self) -> Trend {
        Trend::between(self.previous, self.current)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RankingChange {
    Unchanged,
    ScoresChanged { deltas: Vec<ScoreDelta> },
    /// Takes priority over score changes; `deltas` carries any score moves too.
    RanksChanged { moves: Vec<RankMove>, deltas: Vec<ScoreDelta> },
}

/// Compare two ranking snapshots.
///
/// No previous snapshot means `Unchanged`: the first sample is a baseline, not news.
pub fn diff_ranking(prev: Option<&RankingSnapshot>, curr: &RankingSnapshot) -> RankingChange {
    let Some(prev) = prev else {
        return RankingChange::Unchanged;
    };

    let prev_pos: HashMap<&str, usize> = ordinal_positions(prev);
    let curr_pos: HashMap<&str, usize> = ordinal_positions(curr);

    let mut moves: Vec<RankMove> = curr
        .entries
        .iter()
        .filter_map(|e| {
            let to = curr_pos.get(e.team_id.as_str()).copied();
            let from = prev_pos.get(e.team_id.as_str()).copied();
            (from != to).then(|| RankMove { team_id: e.team_id.clone(), from, to })
        })
        .collect();
    moves.extend(
        prev.entries
            .iter()
            .filter(|e| !curr_pos.contains_key(e.team_id.as_str()))
            .map(|e| RankMove {
                team_id: e.team_id.clone(),
                from: prev_pos.get(e.team_id.as_str()).copied(),
                to: None,
            }),
    );

    let prev_scores: HashMap<&str, f64> =
        prev.entries.iter().map(|e| (e.team_id.as_str(), e.score)).collect();
    let deltas: Vec<ScoreDelta> = curr
        .entries
        .iter()
        .filter_map(|e| {
            let previous = *prev_scores.get(e.team_id.as_str())?;
            ((e.score - previous).abs() > SCORE_EPSILON).then(|| ScoreDelta {
                team_id: e.team_id.clone(),
                previous,
                current: e.score,
            })
        })
        .collect();

    if !moves.is_empty() {
        RankingChange::RanksChanged { moves, deltas }
    } else if !deltas.is_empty() {
        RankingChange::ScoresChanged { deltas }
    } else {
        RankingChange::Unchanged
    }
}

fn ordinal_positions(snapshot: &RankingSnapshot) -> HashMap<&str, usize> {
    snapshot
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| (e.team_id.as_str(), i + 1))
        .collect()
}

/// Per-player score moves, for in-place arrow annotations only.
pub fn diff_roster(prev: Option<&RosterSnapshot>, curr: &RosterSnapshot) -> Vec<PlayerDelta> {
    let Some(prev) = prev else {
        return Vec::new();
    };

    let previous: HashMap<(&str, &str), f64> = prev
        .teams
        .iter()
        .flat_map(|t| t.players.iter().map(move |p| ((t.team_id.as_str(), p.player_id.as_str()), p.score)))
        .collect();

    curr.teams
        .iter()
        .flat_map(|t| t.players.iter().map(move |p| (t, p)))
        .filter_map(|(team, player)| {
            let before = *previous.get(&(team.team_id.as_str(), player.player_id.as_str()))?;
            ((player.score - before).abs() > SCORE_EPSILON).then(|| PlayerDelta {
                team_id: team.team_id.clone(),
                player_id: player.player_id.clone(),
                role: player.role.clone(),
                previous: before,
                current: player.score,
            })
        })
        .collect()
}
