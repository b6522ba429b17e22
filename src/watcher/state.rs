use serde::{Deserialize, Serialize};

use crate::config::PollPolicy;
use crate::types::{MessageRef, Phase, RankingSnapshot, Round, RosterSnapshot, Subscription};
use crate::watcher::reminders::ReminderSchedule;

/// Everything a watcher needs to resume after a restart. Persisted whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherState {
    pub subscription: Subscription,
    pub phase: Phase,
    /// Round the watcher is following; `None` while nothing is scheduled.
    pub round: Option<Round>,
    pub last_ranking: Option<RankingSnapshot>,
    pub last_roster: Option<RosterSnapshot>,
    pub reminders: Option<ReminderSchedule>,
    /// The live standings message edited in place during LIVE.
    pub live_message: Option<MessageRef>,
    pub consecutive_stale_polls: u32,
    pub current_interval_secs: u64,
}

impl WatcherState {
    pub fn new(subscription: Subscription, policy: &PollPolicy) -> Self {
        Self {
            subscription,
            phase: Phase::PreMarket,
            round: None,
            last_ranking: None,
            last_roster: None,
            reminders: None,
            live_message: None,
            consecutive_stale_polls: 0,
            current_interval_secs: policy.poll_secs,
        }
    }

    pub fn round_name(&self) -> &str {
        self.round.as_ref().map_or("", |r| r.name.as_str())
    }

    pub fn round_id(&self) -> Option<&str> {
        self.round.as_ref().map(|r| r.id.as_str())
    }
}
