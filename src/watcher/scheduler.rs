use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::try_join_all;
use futures_util::FutureExt;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::clock::Clock;
use crate::config::PollPolicy;
use crate::db::StateStore;
use crate::error::UpstreamError;
use crate::notify::{Notifier, NotifyMode};
use crate::types::{pick_current_round, RankingSnapshot, RosterSnapshot};
use crate::upstream::UpstreamClient;
use crate::watcher::backoff;
use crate::watcher::phase::{self, Delivery, Observation, Outbound, Transition, Verdict};
use crate::watcher::state::WatcherState;

/// Collaborators shared by every watcher task.
pub struct WatcherDeps {
    pub client: Arc<UpstreamClient>,
    pub store: Arc<dyn StateStore>,
    pub notifier: Arc<dyn Notifier>,
    pub clock: Arc<dyn Clock>,
    pub policy: PollPolicy,
    pub latency: Arc<LatencyStats>,
    pub health: Arc<HealthState>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Applied(Verdict),
    /// Cancelled while polling; nothing was applied.
    Discarded,
    /// Upstream rejected the credentials; polling must wait for new ones.
    AuthPaused,
}

/// One subscription's poll loop. Owns its state; cycles run strictly in sequence.
pub struct Watcher {
    state: WatcherState,
    last_saved: Option<WatcherState>,
    deps: Arc<WatcherDeps>,
    cancel: CancellationToken,
    credentials: watch::Receiver<u64>,
    status: watch::Sender<WatcherState>,
}

impl Watcher {
    /// `state` is expected to be persisted already (fresh watch or resumed row).
    pub fn new(
        state: WatcherState,
        deps: Arc<WatcherDeps>,
        cancel: CancellationToken,
        credentials: watch::Receiver<u64>,
    ) -> Self {
        let (status, _) = watch::channel(state.clone());
        Self { last_saved: Some(state.clone()), state, deps, cancel, credentials, status }
    }

    pub fn state(&self) -> &WatcherState {
        &self.state
    }

    /// Latest state after each applied cycle, for read-only observers.
    pub fn status(&self) -> watch::Receiver<WatcherState> {
        self.status.subscribe()
    }

    pub async fn run(mut self) {
        let sub = self.state.subscription.clone();
        info!(subscription = %sub, phase = %self.state.phase, "watcher started");

        loop {
            match AssertUnwindSafe(self.step()).catch_unwind().await {
                Ok(CycleOutcome::Discarded) => break,
                Ok(CycleOutcome::AuthPaused) => {
                    if !self.wait_for_credentials().await {
                        break;
                    }
                    continue;
                }
                Ok(CycleOutcome::Applied(_)) => {}
                Err(_) => {
                    error!(subscription = %sub, "poll cycle panicked; state left as before the cycle");
                    self.deps.health.record_cycle(true);
                }
            }

            let wait = Duration::from_secs(self.state.current_interval_secs);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!(subscription = %sub, "watcher stopped");
    }

    /// One poll-diff-transition-notify-persist cycle.
    pub async fn step(&mut self) -> CycleOutcome {
        let started = Instant::now();
        let _ = self.credentials.borrow_and_update();

        let observed = self.observe().await;
        if self.cancel.is_cancelled() {
            debug!(subscription = %self.state.subscription, "cancelled mid-poll, discarding result");
            return CycleOutcome::Discarded;
        }

        let now = self.deps.clock.now();
        let (transition, failure) = match observed {
            Ok(obs) => (phase::advance(&self.state, obs, now), None),
            Err(err) => {
                match &err {
                    UpstreamError::Unknown(detail) => error!(
                        subscription = %self.state.subscription,
                        "poll failed with unexpected upstream error: {detail}",
                    ),
                    other => warn!(
                        subscription = %self.state.subscription,
                        kind = other.kind(),
                        "poll failed: {other}",
                    ),
                }
                (phase::on_failure(&self.state, &err), Some(err))
            }
        };

        let Transition { state: mut next, effects, verdict } = transition;
        if next.phase != self.state.phase {
            info!(
                subscription = %next.subscription,
                from = %self.state.phase,
                to = %next.phase,
                round = next.round_id().unwrap_or("-"),
                "phase transition",
            );
        }

        for outbound in effects {
            self.deliver(&mut next, outbound).await;
        }
        backoff::reschedule(&mut next, verdict, &self.deps.policy);

        self.state = next;
        self.status.send_replace(self.state.clone());
        self.persist().await;

        self.deps.latency.record(started.elapsed());
        self.deps.health.record_cycle(failure.is_some());
        debug!(
            subscription = %self.state.subscription,
            phase = %self.state.phase,
            interval_secs = self.state.current_interval_secs,
            stale_polls = self.state.consecutive_stale_polls,
            "cycle complete",
        );

        match failure {
            Some(UpstreamError::AuthExpired(_)) => CycleOutcome::AuthPaused,
            _ => CycleOutcome::Applied(verdict),
        }
    }

    async fn observe(&self) -> Result<Observation, UpstreamError> {
        let client = &self.deps.client;
        let league = self.state.subscription.league.as_str();

        let rounds = client.get_rounds(league).await?;
        let round = pick_current_round(&rounds).cloned();
        let plan = phase::plan(&self.state, round.as_ref());
        let mut obs = Observation { round, ..Observation::default() };

        if plan.final_ranking {
            if let Some(left) = self.state.round_id() {
                obs.final_ranking = match client.get_final_ranking(league, left).await {
                    Ok(entries) => Some(RankingSnapshot::new(left, entries)),
                    Err(err @ UpstreamError::AuthExpired(_)) => return Err(err),
                    Err(err) => {
                        warn!(subscription = %self.state.subscription, round = left, "final ranking unavailable: {err}");
                        None
                    }
                };
            }
        }

        if plan.live {
            if let Some(round) = &obs.round {
                let entries = client.get_ranking(league, &round.id).await?;
                let ranking = RankingSnapshot::new(round.id.clone(), entries);
                obs.rosters = self.fetch_rosters(&round.id, &ranking).await?;
                obs.ranking = Some(ranking);
            }
        }

        Ok(obs)
    }

    /// Rosters only annotate the board, so anything but an auth failure just drops them.
    async fn fetch_rosters(
        &self,
        round_id: &str,
        ranking: &RankingSnapshot,
    ) -> Result<Option<RosterSnapshot>, UpstreamError> {
        let client = &self.deps.client;
        let fetches = ranking.entries.iter().map(|e| client.get_roster(round_id, &e.team_id));
        match try_join_all(fetches).await {
            Ok(teams) => Ok(Some(RosterSnapshot::new(round_id, teams))),
            Err(err @ UpstreamError::AuthExpired(_)) => Err(err),
            Err(err) => {
                warn!(subscription = %self.state.subscription, round = round_id, "rosters unavailable: {err}");
                Ok(None)
            }
        }
    }

    async fn deliver(&self, next: &mut WatcherState, outbound: Outbound) {
        let sub = &next.subscription;
        let notifier = &self.deps.notifier;
        let content = &outbound.notification;

        match outbound.delivery {
            Delivery::Standalone => {
                if let Err(e) = notifier.notify(sub, content, NotifyMode::NewMessage).await {
                    warn!(subscription = %sub, kind = content.kind(), "notify failed: {e}");
                }
            }
            Delivery::LiveNew => {
                let sent = notifier.notify(sub, content, NotifyMode::NewMessage).await;
                next.live_message = match sent {
                    Ok(message_ref) => Some(message_ref),
                    Err(e) => {
                        warn!(subscription = %sub, "live message not sent: {e}");
                        None
                    }
                };
            }
            Delivery::LiveEdit => {
                let edited = match next.live_message.clone() {
                    Some(existing) => {
                        match notifier.notify(sub, content, NotifyMode::EditMessage(existing)).await {
                            Ok(message_ref) => Some(message_ref),
                            Err(e) => {
                                debug!(subscription = %sub, "edit failed, sending a new live message: {e}");
                                None
                            }
                        }
                    }
                    None => None,
                };
                next.live_message = match edited {
                    Some(message_ref) => Some(message_ref),
                    None => match notifier.notify(sub, content, NotifyMode::NewMessage).await {
                        Ok(message_ref) => Some(message_ref),
                        Err(e) => {
                            warn!(subscription = %sub, "live message not sent: {e}");
                            None
                        }
                    },
                };
            }
        }
    }

    /// Writes the state if it moved since the last successful save. A failed
    /// write is retried on the next cycle; memory stays authoritative meanwhile.
    async fn persist(&mut self) {
        if self.last_saved.as_ref() == Some(&self.state) {
            return;
        }
        match self.deps.store.save(&self.state).await {
            Ok(()) => self.last_saved = Some(self.state.clone()),
            Err(e) => error!(subscription = %self.state.subscription, "failed to persist watcher state: {e}"),
        }
    }

    /// Blocks until credentials are refreshed. `false` if cancelled first.
    async fn wait_for_credentials(&mut self) -> bool {
        info!(subscription = %self.state.subscription, "polling paused until credentials are refreshed");
        self.deps.health.inc_auth_paused();
        let resumed = tokio::select! {
            _ = self.cancel.cancelled() => false,
            changed = self.credentials.changed() => changed.is_ok(),
        };
        self.deps.health.dec_auth_paused();
        if resumed {
            info!(subscription = %self.state.subscription, "credentials refreshed, resuming");
        }
        resumed
    }
}
