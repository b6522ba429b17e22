use tracing::debug;

use crate::config::PollPolicy;
use crate::types::Phase;
use crate::watcher::phase::Verdict;
use crate::watcher::state::WatcherState;

/// Recompute the wait before the next cycle.
///
/// Only unchanged LIVE polls back off. Any change, and every other phase,
/// snaps back to the base interval.
pub fn reschedule(state: &mut WatcherState, verdict: Verdict, policy: &PollPolicy) {
    match verdict {
        Verdict::Unchanged if state.phase == Phase::Live => {
            state.consecutive_stale_polls += 1;
            if state.consecutive_stale_polls >= policy.max_stale_polls {
                let grown = (state.current_interval_secs as f64 * policy.backoff_multiplier).round() as u64;
                let next = policy.clamp_interval(grown);
                debug!(
                    subscription = %state.subscription,
                    stale_polls = state.consecutive_stale_polls,
                    interval_secs = next,
                    "no change, backing off",
                );
                state.current_interval_secs = next;
                state.consecutive_stale_polls = 0;
            } else {
                state.current_interval_secs = policy.clamp_interval(state.current_interval_secs);
            }
        }
        _ => {
            state.consecutive_stale_polls = 0;
            state.current_interval_secs = policy.poll_secs;
        }
    }
}
