use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::types::{Phase, Subscription};
use crate::watcher::scheduler::{Watcher, WatcherDeps};
use crate::watcher::state::WatcherState;

struct WatcherHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
    status: watch::Receiver<WatcherState>,
}

impl WatcherHandle {
    async fn stop(self, subscription: &Subscription) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            error!(subscription = %subscription, "watcher task ended abnormally: {e}");
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatcherSummary {
    pub chat_id: String,
    pub league: String,
    pub phase: Phase,
    pub round_id: Option<String>,
    pub interval_secs: u64,
    pub stale_polls: u32,
}

impl From<&WatcherState> for WatcherSummary {
    fn from(s: &WatcherState) -> Self {
        Self {
            chat_id: s.subscription.chat_id.clone(),
            league: s.subscription.league.clone(),
            phase: s.phase,
            round_id: s.round_id().map(str::to_string),
            interval_secs: s.current_interval_secs,
            stale_polls: s.consecutive_stale_polls,
        }
    }
}

/// Process-wide table of running watchers.
///
/// All mutations happen under one lock that is held until a stopped task has
/// fully exited, so a subscription can never have two schedulers at once.
pub struct Registry {
    deps: Arc<WatcherDeps>,
    watchers: Mutex<HashMap<Subscription, WatcherHandle>>,
    credentials: watch::Sender<u64>,
}

impl Registry {
    pub fn new(deps: Arc<WatcherDeps>) -> Self {
        let (credentials, _) = watch::channel(0);
        Self { deps, watchers: Mutex::new(HashMap::new()), credentials }
    }

    /// Start watching. `false` if the subscription is already running.
    pub async fn watch(&self, subscription: Subscription) -> Result<bool> {
        let mut watchers = self.watchers.lock().await;
        if watchers.contains_key(&subscription) {
            return Ok(false);
        }
        let state = WatcherState::new(subscription.clone(), &self.deps.policy);
        self.deps.store.save(&state).await?;
        let handle = self.spawn(state);
        watchers.insert(subscription.clone(), handle);
        self.deps.health.set_active_watchers(watchers.len());
        info!(subscription = %subscription, active = watchers.len(), "watch started");
        Ok(true)
    }

    /// Stop and forget a subscription. `false` if it was not running.
    pub async fn unwatch(&self, subscription: &Subscription) -> Result<bool> {
        let mut watchers = self.watchers.lock().await;
        let Some(handle) = watchers.remove(subscription) else {
            return Ok(false);
        };
        handle.stop(subscription).await;
        self.deps.store.remove(subscription).await?;
        self.deps.health.set_active_watchers(watchers.len());
        info!(subscription = %subscription, active = watchers.len(), "watch stopped");
        Ok(true)
    }

    /// Restart one watcher per persisted row, from its saved phase and snapshots.
    pub async fn resume_all(&self) -> Result<usize> {
        let persisted = self.deps.store.load_all().await?;
        let mut watchers = self.watchers.lock().await;
        let mut resumed = 0;
        for (_, mut state) in persisted {
            if watchers.contains_key(&state.subscription) {
                continue;
            }
            state.current_interval_secs = self.deps.policy.clamp_interval(state.current_interval_secs);
            let subscription = state.subscription.clone();
            info!(subscription = %subscription, phase = %state.phase, "resuming watcher");
            watchers.insert(subscription, self.spawn(state));
            resumed += 1;
        }
        self.deps.health.set_active_watchers(watchers.len());
        Ok(resumed)
    }

    pub async fn list(&self) -> Vec<WatcherSummary> {
        let watchers = self.watchers.lock().await;
        let mut out: Vec<WatcherSummary> =
            watchers.values().map(|h| WatcherSummary::from(&*h.status.borrow())).collect();
        out.sort_by(|a, b| (&a.chat_id, &a.league).cmp(&(&b.chat_id, &b.league)));
        out
    }

    /// Wake every watcher paused on expired credentials.
    pub fn credentials_refreshed(&self) {
        self.credentials.send_modify(|generation| *generation += 1);
        info!("credentials refreshed");
    }

    /// Stop every watcher and wait for them. Persisted rows are kept for the next start.
    pub async fn shutdown(&self) {
        let mut watchers = self.watchers.lock().await;
        let drained: Vec<(Subscription, WatcherHandle)> = watchers.drain().collect();
        for (_, handle) in &drained {
            handle.cancel.cancel();
        }
        for (subscription, handle) in drained {
            handle.stop(&subscription).await;
        }
        self.deps.health.set_active_watchers(0);
        info!("all watchers stopped");
    }

    fn spawn(&self, state: WatcherState) -> WatcherHandle {
        let cancel = CancellationToken::new();
        let watcher = Watcher::new(state, Arc::clone(&self.deps), cancel.clone(), self.credentials.subscribe());
        let status = watcher.status();
        let task = tokio::spawn(watcher.run());
        WatcherHandle { cancel, task, status }
    }
}
