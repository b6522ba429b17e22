use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::config::REMINDER_OFFSETS_HOURS;
use crate::diff::{diff_ranking, diff_roster, RankingChange, ScoreDelta, Trend};
use crate::error::UpstreamError;
use crate::notify::{Notification, StandingLine};
use crate::types::{Phase, RankingSnapshot, Round, RoundStatus, RosterSnapshot};
use crate::watcher::reminders::ReminderSchedule;
use crate::watcher::state::WatcherState;

/// What one poll saw upstream.
#[derive(Debug, Clone, Default)]
pub struct Observation {
    pub round: Option<Round>,
    /// Present only when the round is live.
    pub ranking: Option<RankingSnapshot>,
    pub rosters: Option<RosterSnapshot>,
    /// Ranking of the round being left, fetched on the way out of LIVE.
    pub final_ranking: Option<RankingSnapshot>,
}

/// Which reads a poll needs beyond the round list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchPlan {
    pub live: bool,
    pub final_ranking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Standalone,
    /// Starts a new live message; later edits target it.
    LiveNew,
    /// Edits the live message in place (or starts one if there is none).
    LiveEdit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub notification: Notification,
    pub delivery: Delivery,
}

/// How the interval should react to this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Changed,
    Unchanged,
    /// Not a live poll; the interval stays at base.
    Idle,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub state: WatcherState,
    pub effects: Vec<Outbound>,
    pub verdict: Verdict,
}

impl Transition {
    fn noop(state: &WatcherState) -> Self {
        let verdict = if state.phase == Phase::Live { Verdict::Unchanged } else { Verdict::Idle };
        Self { state: state.clone(), effects: Vec::new(), verdict }
    }
}

/// Phase implied by a round. `None` for a status we cannot interpret.
pub fn phase_for(round: Option<&Round>) -> Option<Phase> {
    let Some(round) = round else {
        return Some(Phase::PreMarket);
    };
    match round.status {
        RoundStatus::InProgress => Some(Phase::Live),
        RoundStatus::MarketOpen if round.market_closes_at.is_some() => Some(Phase::MarketOpen),
        RoundStatus::MarketOpen | RoundStatus::Upcoming | RoundStatus::Completed => Some(Phase::PreMarket),
        RoundStatus::Unknown => None,
    }
}

pub fn plan(state: &WatcherState, round: Option<&Round>) -> FetchPlan {
    match phase_for(round) {
        Some(Phase::Live) => FetchPlan {
            live: true,
            final_ranking: state.phase == Phase::Live && state.round_id() != round.map(|r| r.id.as_str()),
        },
        Some(_) => FetchPlan { live: false, final_ranking: state.phase == Phase::Live },
        None => FetchPlan::default(),
    }
}

/// Next state and effects for a successful poll. Pure.
pub fn advance(state: &WatcherState, obs: Observation, now: DateTime<Utc>) -> Transition {
    let Some(target) = phase_for(obs.round.as_ref()) else {
        warn!(
            subscription = %state.subscription,
            status = ?obs.round.as_ref().map(|r| r.status),
            "unrecognised round status, staying in {}",
            state.phase,
        );
        return Transition::noop(state);
    };

    let mut next = state.clone();
    let mut effects = Vec::new();
    let league = state.subscription.league.clone();
    let switching_round = obs.round.as_ref().map(|r| r.id.as_str()) != state.round_id();

    if state.phase == Phase::Live && (target != Phase::Live || switching_round) {
        let standings_from = obs.final_ranking.as_ref().or(state.last_ranking.as_ref());
        if let Some(ranking) = standings_from {
            effects.push(Outbound {
                notification: Notification::RoundCompleted {
                    league: league.clone(),
                    round_name: state.round_name().to_string(),
                    standings: standings(ranking, &[], state.last_roster.as_ref()),
                },
                delivery: Delivery::Standalone,
            });
        }
        if let Some(final_ranking) = obs.final_ranking {
            next.last_ranking = Some(final_ranking);
        }
        next.last_roster = None;
        next.live_message = None;
    }

    if let Some(round) = &obs.round {
        next.round = Some(round.clone());
    }

    let verdict = match (target, obs.round) {
        (Phase::MarketOpen, Some(round)) => {
            market_open(&mut next, &round, now, &mut effects);
            Verdict::Idle
        }
        (Phase::Live, Some(round)) => {
            let entering = state.phase != Phase::Live || switching_round;
            live(&mut next, &round, obs.ranking, obs.rosters, entering, now, &mut effects)
        }
        _ => Verdict::Idle,
    };
    next.phase = target;

    Transition { state: next, effects, verdict }
}

fn market_open(next: &mut WatcherState, round: &Round, now: DateTime<Utc>, effects: &mut Vec<Outbound>) {
    let Some(closes_at) = round.market_closes_at else {
        return;
    };
    let league = next.subscription.league.clone();
    let same_round = matches!(&next.reminders, Some(s) if s.round_id == round.id);
    if !same_round {
        next.reminders = Some(ReminderSchedule::new(round.id.clone(), closes_at, REMINDER_OFFSETS_HOURS));
    }
    let Some(schedule) = next.reminders.as_mut() else {
        return;
    };
    if schedule.closes_at != closes_at {
        schedule.move_close(closes_at);
    }

    if !schedule.market_open_announced {
        schedule.market_open_announced = true;
        effects.push(Outbound {
            notification: Notification::MarketOpened {
                league: league.clone(),
                round_name: round.name.clone(),
                closes_at,
            },
            delivery: Delivery::Standalone,
        });
    }
    if let Some(reminder) = schedule.take_due(now) {
        effects.push(Outbound {
            notification: Notification::ReminderDue {
                league,
                round_name: round.name.clone(),
                hours_before: reminder.offset_hours,
                closes_at,
            },
            delivery: Delivery::Standalone,
        });
    }
}

fn live(
    next: &mut WatcherState,
    round: &Round,
    ranking: Option<RankingSnapshot>,
    rosters: Option<RosterSnapshot>,
    entering: bool,
    now: DateTime<Utc>,
    effects: &mut Vec<Outbound>,
) -> Verdict {
    let league = next.subscription.league.clone();

    if entering {
        effects.push(Outbound {
            notification: Notification::RoundLive { league: league.clone(), round_name: round.name.clone() },
            delivery: Delivery::Standalone,
        });
        next.live_message = None;
        next.last_ranking = None;
        next.last_roster = None;
    }

    // An empty board is not an observation; tracking waits for real rows.
    let Some(ranking) = ranking.filter(|r| !r.is_empty()) else {
        return if entering { Verdict::Changed } else { Verdict::Unchanged };
    };

    if next.last_ranking.is_none() {
        // The first live sample is the baseline board, not a diff.
        effects.push(Outbound {
            notification: Notification::LiveStandings {
                league,
                round_name: round.name.clone(),
                ranking_changed: false,
                standings: standings(&ranking, &[], rosters.as_ref()),
                player_moves: Vec::new(),
                as_of: now,
            },
            delivery: Delivery::LiveNew,
        });
        next.last_ranking = Some(ranking);
        next.last_roster = rosters;
        return Verdict::Changed;
    }

    let change = diff_ranking(next.last_ranking.as_ref(), &ranking);
    let player_moves = rosters
        .as_ref()
        .map(|r| diff_roster(next.last_roster.as_ref(), r))
        .unwrap_or_default();

    let verdict = match &change {
        RankingChange::Unchanged => Verdict::Unchanged,
        RankingChange::ScoresChanged { deltas } | RankingChange::RanksChanged { deltas, .. } => {
            let ranking_changed = matches!(change, RankingChange::RanksChanged { .. });
            if let RankingChange::RanksChanged { moves, .. } = &change {
                debug!(subscription = %next.subscription, moved = moves.len(), "ranking changed");
            }
            effects.push(Outbound {
                notification: Notification::LiveStandings {
                    league,
                    round_name: round.name.clone(),
                    ranking_changed,
                    standings: standings(&ranking, deltas, rosters.as_ref().or(next.last_roster.as_ref())),
                    player_moves,
                    as_of: now,
                },
                delivery: if ranking_changed { Delivery::LiveNew } else { Delivery::LiveEdit },
            });
            Verdict::Changed
        }
    };

    next.last_ranking = Some(ranking);
    if rosters.is_some() {
        next.last_roster = rosters;
    }
    verdict
}

fn standings(ranking: &RankingSnapshot, deltas: &[ScoreDelta], rosters: Option<&RosterSnapshot>) -> Vec<StandingLine> {
    let trends: HashMap<&str, Trend> = deltas.iter().map(|d| (d.team_id.as_str(), d.trend())).collect();
    ranking
        .entries
        .iter()
        .enumerate()
        .map(|(i, e)| StandingLine {
            position: i + 1,
            team_name: e.team_name.clone(),
            owner_name: e.owner_name.clone(),
            score: e.score,
            round_points: rosters.and_then(|r| r.round_points(&e.team_id)),
            trend: trends.get(e.team_id.as_str()).copied().unwrap_or(Trend::Flat),
        })
        .collect()
}

/// Next state and effects for a poll that failed after retries.
pub fn on_failure(state: &WatcherState, err: &UpstreamError) -> Transition {
    let league = state.subscription.league.clone();
    match err {
        UpstreamError::NotFound(detail) => {
            let already_reset =
                state.phase == Phase::PreMarket && state.round.is_none() && state.last_ranking.is_none();
            let mut next = state.clone();
            next.phase = Phase::PreMarket;
            next.round = None;
            next.last_ranking = None;
            next.last_roster = None;
            next.live_message = None;
            // Fired flags outlive the outage; a different round replaces the schedule anyway.
            let effects = if already_reset {
                Vec::new()
            } else {
                vec![Outbound {
                    notification: Notification::LeagueUnavailable { league, detail: detail.clone() },
                    delivery: Delivery::Standalone,
                }]
            };
            Transition { state: next, effects, verdict: Verdict::Idle }
        }
        UpstreamError::AuthExpired(detail) => Transition {
            state: state.clone(),
            effects: vec![Outbound {
                notification: Notification::AuthExpired { league, detail: detail.clone() },
                delivery: Delivery::Standalone,
            }],
            verdict: Verdict::Idle,
        },
        UpstreamError::RateLimited { .. } | UpstreamError::Transient(_) | UpstreamError::Unknown(_) => {
            Transition::noop(state)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;
    use crate::config::PollPolicy;
    use crate::testutil::{entry, round};
    use crate::types::{RosterEntry, Subscription, TeamRoster};

    fn close() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 7, 18, 0, 0).unwrap()
    }

    fn fresh() -> WatcherState {
        WatcherState::new(Subscription::new("42", "lta-sul"), &PollPolicy::default())
    }

    fn seen(r: Round) -> Observation {
        Observation { round: Some(r), ..Observation::default() }
    }

    fn live_obs(rows: &[(&str, u32, f64)]) -> Observation {
        let entries = rows.iter().map(|(id, rank, score)| entry(id, *rank, *score)).collect();
        Observation {
            round: Some(round("r1", RoundStatus::InProgress, 1, Some(close()))),
            ranking: Some(RankingSnapshot::new("r1", entries)),
            ..Observation::default()
        }
    }

    fn kinds(t: &Transition) -> Vec<&'static str> {
        t.effects.iter().map(|o| o.notification.kind()).collect()
    }

    #[test]
    fn status_maps_to_phase() {
        assert_eq!(phase_for(None), Some(Phase::PreMarket));
        let upcoming = round("r1", RoundStatus::Upcoming, 1, Some(close()));
        assert_eq!(phase_for(Some(&upcoming)), Some(Phase::PreMarket));
        let open_without_close = round("r1", RoundStatus::MarketOpen, 1, None);
        assert_eq!(phase_for(Some(&open_without_close)), Some(Phase::PreMarket));
        let open = round("r1", RoundStatus::MarketOpen, 1, Some(close()));
        assert_eq!(phase_for(Some(&open)), Some(Phase::MarketOpen));
        let live = round("r1", RoundStatus::InProgress, 1, Some(close()));
        assert_eq!(phase_for(Some(&live)), Some(Phase::Live));
        let odd = round("r1", RoundStatus::Unknown, 1, Some(close()));
        assert_eq!(phase_for(Some(&odd)), None);
    }

    #[test]
    fn full_round_walks_every_phase() {
        let t0 = close() - Duration::hours(48);
        let s = fresh();

        let t = advance(&s, seen(round("r1", RoundStatus::Upcoming, 1, None)), t0);
        assert_eq!(t.state.phase, Phase::PreMarket);
        assert!(t.effects.is_empty());

        let t = advance(&t.state, seen(round("r1", RoundStatus::MarketOpen, 1, Some(close()))), t0);
        assert_eq!(t.state.phase, Phase::MarketOpen);
        assert_eq!(kinds(&t), vec!["market_opened"]);
        assert_eq!(t.state.reminders.as_ref().unwrap().pending(), 2);

        let t = advance(&t.state, live_obs(&[("a", 1, 0.0), ("b", 2, 0.0)]), close());
        assert_eq!(t.state.phase, Phase::Live);
        assert_eq!(kinds(&t), vec!["round_live", "live_standings"]);
        assert_eq!(t.verdict, Verdict::Changed);

        let final_board = RankingSnapshot::new("r1", vec![entry("a", 1, 80.0), entry("b", 2, 60.0)]);
        let done = Observation {
            round: Some(round("r1", RoundStatus::Completed, 1, Some(close()))),
            final_ranking: Some(final_board.clone()),
            ..Observation::default()
        };
        let t = advance(&t.state, done, close() + Duration::hours(4));
        assert_eq!(t.state.phase, Phase::PreMarket);
        assert_eq!(kinds(&t), vec!["round_completed"]);
        assert_eq!(t.state.last_ranking, Some(final_board));
        assert_eq!(t.state.last_roster, None);
        assert_eq!(t.state.live_message, None);
    }

    #[test]
    fn market_open_is_announced_once() {
        let open = round("r1", RoundStatus::MarketOpen, 1, Some(close()));
        let t0 = close() - Duration::hours(72);
        let t = advance(&fresh(), seen(open.clone()), t0);
        assert_eq!(kinds(&t), vec!["market_opened"]);
        let t = advance(&t.state, seen(open), t0 + Duration::minutes(1));
        assert!(t.effects.is_empty());
    }

    #[test]
    fn reminder_fires_from_market_open_self_loop() {
        let open = round("r1", RoundStatus::MarketOpen, 1, Some(close()));
        let mut s = advance(&fresh(), seen(open.clone()), close() - Duration::hours(30)).state;

        let mut fired = Vec::new();
        let mut at = close() - Duration::hours(30);
        while at < close() + Duration::hours(1) {
            let t = advance(&s, seen(open.clone()), at);
            for o in &t.effects {
                if let Notification::ReminderDue { hours_before, .. } = o.notification {
                    fired.push(hours_before);
                }
            }
            s = t.state;
            at += Duration::minutes(10);
        }
        assert_eq!(fired, vec![24, 1]);
    }

    #[test]
    fn new_round_replaces_the_schedule() {
        let t0 = close() - Duration::hours(72);
        let s = advance(&fresh(), seen(round("r1", RoundStatus::MarketOpen, 1, Some(close()))), t0).state;
        let next_close = close() + Duration::days(7);
        let t = advance(&s, seen(round("r2", RoundStatus::MarketOpen, 2, Some(next_close))), t0);
        assert_eq!(kinds(&t), vec!["market_opened"]);
        assert_eq!(t.state.reminders.as_ref().unwrap().round_id, "r2");
    }

    #[test]
    fn live_rank_change_starts_new_message_and_scores_edit() {
        let s = advance(&fresh(), live_obs(&[("a", 1, 10.0), ("b", 2, 5.0)]), close()).state;

        let t = advance(&s, live_obs(&[("a", 1, 12.0), ("b", 2, 5.0)]), close());
        assert_eq!(t.verdict, Verdict::Changed);
        assert_eq!(t.effects.len(), 1);
        assert_eq!(t.effects[0].delivery, Delivery::LiveEdit);

        let t = advance(&t.state, live_obs(&[("b", 1, 20.0), ("a", 2, 12.0)]), close());
        assert_eq!(t.effects[0].delivery, Delivery::LiveNew);
        match &t.effects[0].notification {
            Notification::LiveStandings { ranking_changed, standings, .. } => {
                assert!(ranking_changed);
                assert_eq!(standings[0].team_name, "B");
                assert_eq!(standings[0].trend, Trend::Up);
            }
            other => panic!("unexpected {other:?}"),
        }

        let t = advance(&t.state, live_obs(&[("b", 1, 20.0), ("a", 2, 12.0)]), close());
        assert_eq!(t.verdict, Verdict::Unchanged);
        assert!(t.effects.is_empty());
    }

    #[test]
    fn empty_first_live_board_is_not_a_baseline() {
        let t = advance(&fresh(), live_obs(&[]), close());
        assert_eq!(kinds(&t), vec!["round_live"]);
        assert_eq!(t.state.last_ranking, None);

        let t = advance(&t.state, live_obs(&[]), close());
        assert!(t.effects.is_empty());
        assert_eq!(t.verdict, Verdict::Unchanged);

        let t = advance(&t.state, live_obs(&[("a", 1, 10.0), ("b", 2, 5.0)]), close());
        assert_eq!(t.verdict, Verdict::Changed);
        assert_eq!(t.effects.len(), 1);
        assert_eq!(t.effects[0].delivery, Delivery::LiveNew);
        match &t.effects[0].notification {
            Notification::LiveStandings { ranking_changed, standings, .. } => {
                assert!(!ranking_changed);
                assert!(standings.iter().all(|l| l.trend == Trend::Flat));
            }
            other => panic!("unexpected {other:?}"),
        }

        let t = advance(&t.state, live_obs(&[("a", 1, 12.0), ("b", 2, 5.0)]), close());
        assert_eq!(t.effects[0].delivery, Delivery::LiveEdit);
    }

    #[test]
    fn board_shows_round_points_next_to_split_score() {
        let team = |id: &str, points: f64| TeamRoster {
            team_id: id.to_string(),
            round_points: Some(points),
            players: vec![RosterEntry {
                player_id: format!("{id}-mid"),
                player_name: None,
                role: "mid".to_string(),
                score: points,
            }],
        };
        let with_rosters = |rows: &[(&str, u32, f64)], a: f64, b: f64| Observation {
            rosters: Some(RosterSnapshot::new("r1", vec![team("a", a), team("b", b)])),
            ..live_obs(rows)
        };

        let s = advance(&fresh(), with_rosters(&[("a", 1, 100.0), ("b", 2, 90.0)], 0.0, 0.0), close()).state;

        // Round points move but the split order holds: edit in place.
        let t = advance(&s, with_rosters(&[("a", 1, 104.0), ("b", 2, 92.0)], 4.0, 2.0), close());
        assert_eq!(t.effects[0].delivery, Delivery::LiveEdit);
        match &t.effects[0].notification {
            Notification::LiveStandings { ranking_changed, standings, .. } => {
                assert!(!ranking_changed);
                assert_eq!(standings[0].score, 104.0);
                assert_eq!(standings[0].round_points, Some(4.0));
                assert_eq!(standings[1].round_points, Some(2.0));
            }
            other => panic!("unexpected {other:?}"),
        }

        // The split order flips: a new message flagged as a ranking change.
        let t = advance(&t.state, with_rosters(&[("b", 1, 110.0), ("a", 2, 105.0)], 1.0, 20.0), close());
        assert_eq!(t.effects[0].delivery, Delivery::LiveNew);
        match &t.effects[0].notification {
            Notification::LiveStandings { ranking_changed, standings, .. } => {
                assert!(ranking_changed);
                assert_eq!(standings[0].team_name, "B");
                assert_eq!(standings[0].round_points, Some(20.0));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_status_keeps_phase() {
        let s = advance(&fresh(), live_obs(&[("a", 1, 10.0)]), close()).state;
        let t = advance(&s, seen(round("r1", RoundStatus::Unknown, 1, Some(close()))), close());
        assert_eq!(t.state, s);
        assert_eq!(t.verdict, Verdict::Unchanged);
    }

    #[test]
    fn plan_fetches_final_ranking_when_leaving_live() {
        let s = advance(&fresh(), live_obs(&[("a", 1, 10.0)]), close()).state;
        let done = round("r1", RoundStatus::Completed, 1, Some(close()));
        assert_eq!(plan(&s, Some(&done)), FetchPlan { live: false, final_ranking: true });
        let still = round("r1", RoundStatus::InProgress, 1, Some(close()));
        assert_eq!(plan(&s, Some(&still)), FetchPlan { live: true, final_ranking: false });
        assert_eq!(plan(&fresh(), Some(&still)), FetchPlan { live: true, final_ranking: false });
    }

    #[test]
    fn not_found_resets_with_single_notice() {
        let s = advance(&fresh(), live_obs(&[("a", 1, 10.0)]), close()).state;
        let err = UpstreamError::NotFound("league gone".to_string());

        let t = on_failure(&s, &err);
        assert_eq!(t.state.phase, Phase::PreMarket);
        assert_eq!(t.state.last_ranking, None);
        assert_eq!(kinds(&t), vec!["league_unavailable"]);

        let again = on_failure(&t.state, &err);
        assert!(again.effects.is_empty());
    }

    #[test]
    fn reminders_survive_a_brief_not_found() {
        let open = round("r1", RoundStatus::MarketOpen, 1, Some(close()));
        let t = advance(&fresh(), seen(open.clone()), close() - Duration::hours(30));
        assert_eq!(kinds(&t), vec!["market_opened"]);
        let t = advance(&t.state, seen(open.clone()), close() - Duration::hours(23));
        assert_eq!(kinds(&t), vec!["reminder_due"]);

        let t = on_failure(&t.state, &UpstreamError::NotFound("league".to_string()));
        assert_eq!(kinds(&t), vec!["league_unavailable"]);
        assert_eq!(t.state.phase, Phase::PreMarket);

        let t = advance(&t.state, seen(open), close() - Duration::hours(22));
        assert_eq!(t.state.phase, Phase::MarketOpen);
        assert!(t.effects.is_empty(), "got {:?}", kinds(&t));
        assert_eq!(t.state.reminders.as_ref().unwrap().pending(), 1);
    }

    #[test]
    fn transient_failure_is_a_noop_poll() {
        let s = advance(&fresh(), live_obs(&[("a", 1, 10.0)]), close()).state;
        let t = on_failure(&s, &UpstreamError::Transient("timeout".to_string()));
        assert_eq!(t.state, s);
        assert_eq!(t.verdict, Verdict::Unchanged);

        let idle = on_failure(&fresh(), &UpstreamError::Unknown("bad body".to_string()));
        assert_eq!(idle.verdict, Verdict::Idle);
    }
}
