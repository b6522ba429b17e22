use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    pub offset_hours: i64,
    pub due_at: DateTime<Utc>,
    pub fired: bool,
}

/// Pre-close reminders for one round. Each offset fires at most once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderSchedule {
    pub round_id: String,
    pub closes_at: DateTime<Utc>,
    pub market_open_announced: bool,
    /// Ordered by `due_at`, earliest first.
    pub reminders: Vec<Reminder>,
}

impl ReminderSchedule {
    pub fn new(round_id: impl Into<String>, closes_at: DateTime<Utc>, offsets_hours: &[i64]) -> Self {
        let mut reminders: Vec<Reminder> = offsets_hours
            .iter()
            .map(|&offset_hours| Reminder {
                offset_hours,
                due_at: closes_at - Duration::hours(offset_hours),
                fired: false,
            })
            .collect();
        reminders.sort_by_key(|r| r.due_at);
        reminders.dedup_by_key(|r| r.offset_hours);
        Self { round_id: round_id.into(), closes_at, market_open_announced: false, reminders }
    }

    /// Upstream moved the close time. Due times follow it; fired flags stay.
    pub fn move_close(&mut self, closes_at: DateTime<Utc>) {
        self.closes_at = closes_at;
        for r in &mut self.reminders {
            r.due_at = closes_at - Duration::hours(r.offset_hours);
        }
        self.reminders.sort_by_key(|r| r.due_at);
    }

    /// Marks every reminder due at `now` as fired and returns the one to send.
    ///
    /// Nothing fires once the market has closed. When several are due together
    /// only the latest is returned; the rest are consumed silently.
    pub fn take_due(&mut self, now: DateTime<Utc>) -> Option<Reminder> {
        if now >= self.closes_at {
            return None;
        }
        let mut latest = None;
        for r in self.reminders.iter_mut().filter(|r| !r.fired && r.due_at <= now) {
            r.fired = true;
            latest = Some(r.clone());
        }
        latest
    }

    pub fn pending(&self) -> usize {
        self.reminders.iter().filter(|r| !r.fired).count()
    }
}
