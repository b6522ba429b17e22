//! Fakes shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::clock::ManualClock;
use crate::config::PollPolicy;
use crate::db::{SqliteStateStore, StateStore};
use crate::error::{AppError, Result, UpstreamError};
use crate::notify::{Notification, Notifier, NotifyMode};
use crate::types::{MessageRef, RankingEntry, RosterEntry, Round, RoundStatus, Subscription, TeamRoster};
use crate::upstream::{LeagueApi, RetryPolicy, UpstreamClient};
use crate::watcher::{Watcher, WatcherDeps, WatcherState};

pub fn round(id: &str, status: RoundStatus, index: i64, closes_at: Option<DateTime<Utc>>) -> Round {
    Round {
        id: id.to_string(),
        name: format!("Round {id}"),
        status,
        index_in_split: Some(index),
        market_opens_at: None,
        market_closes_at: closes_at,
    }
}

/// Ranking row whose display name is the upper-cased id.
pub fn entry(team_id: &str, rank: u32, score: f64) -> RankingEntry {
    RankingEntry {
        team_id: team_id.to_string(),
        team_name: team_id.to_uppercase(),
        owner_name: None,
        rank,
        score,
    }
}

pub async fn sqlite_store() -> SqliteStateStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    SqliteStateStore::from_pool(pool).await.unwrap()
}

// ---------------------------------------------------------------------------
// League API
// ---------------------------------------------------------------------------

#[derive(Default)]
struct FakeData {
    rounds: HashMap<String, Vec<Round>>,
    rankings: HashMap<(String, String), Vec<RankingEntry>>,
    rosters: HashMap<(String, String), Vec<RosterEntry>>,
    round_points: HashMap<(String, String), f64>,
    round_failures: HashMap<String, VecDeque<UpstreamError>>,
    ranking_failures: HashMap<String, VecDeque<UpstreamError>>,
    fail_every: HashMap<String, u32>,
    rounds_calls: HashMap<String, u32>,
}

/// Scripted league API. Unknown leagues have no rounds; unknown rankings and
/// rosters are empty.
#[derive(Default)]
pub struct FakeLeagueApi {
    data: Mutex<FakeData>,
    latency: Duration,
    gate: Mutex<Option<Arc<Notify>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl FakeLeagueApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn set_rounds(&self, league: &str, rounds: Vec<Round>) {
        self.data.lock().unwrap().rounds.insert(league.to_string(), rounds);
    }

    pub fn set_ranking(&self, league: &str, round_id: &str, entries: Vec<RankingEntry>) {
        self.data
            .lock()
            .unwrap()
            .rankings
            .insert((league.to_string(), round_id.to_string()), entries);
    }

    pub fn set_roster(&self, round_id: &str, team_id: &str, players: Vec<RosterEntry>) {
        self.data
            .lock()
            .unwrap()
            .rosters
            .insert((round_id.to_string(), team_id.to_string()), players);
    }

    pub fn set_round_points(&self, round_id: &str, team_id: &str, points: f64) {
        self.data
            .lock()
            .unwrap()
            .round_points
            .insert((round_id.to_string(), team_id.to_string()), points);
    }

    /// Queue a failure for the next rounds call of `league`.
    pub fn fail_next(&self, league: &str, err: UpstreamError) {
        self.data
            .lock()
            .unwrap()
            .round_failures
            .entry(league.to_string())
            .or_default()
            .push_back(err);
    }

    pub fn fail_ranking_next(&self, league: &str, err: UpstreamError) {
        self.data
            .lock()
            .unwrap()
            .ranking_failures
            .entry(league.to_string())
            .or_default()
            .push_back(err);
    }

    /// Every `n`th rounds call for `league` fails with `Transient`.
    pub fn fail_every(&self, league: &str, n: u32) {
        self.data.lock().unwrap().fail_every.insert(league.to_string(), n);
    }

    /// Rounds calls block until the returned gate is notified.
    pub fn hold_rounds(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    pub fn rounds_calls(&self, league: &str) -> u32 {
        self.data.lock().unwrap().rounds_calls.get(league).copied().unwrap_or(0)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        InFlight(&self.in_flight)
    }
}

#[async_trait]
impl LeagueApi for FakeLeagueApi {
    async fn fetch_rounds(&self, league: &str) -> std::result::Result<Vec<Round>, UpstreamError> {
        let _guard = self.enter().await;
        let call = {
            let mut data = self.data.lock().unwrap();
            let calls = data.rounds_calls.entry(league.to_string()).or_default();
            *calls += 1;
            *calls
        };

        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut data = self.data.lock().unwrap();
        if let Some(err) = data.round_failures.get_mut(league).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        if let Some(&every) = data.fail_every.get(league) {
            if call % every == 0 {
                return Err(UpstreamError::Transient(format!("scripted failure on call {call}")));
            }
        }
        Ok(data.rounds.get(league).cloned().unwrap_or_default())
    }

    async fn fetch_ranking(
        &self,
        league: &str,
        round_id: &str,
    ) -> std::result::Result<Vec<RankingEntry>, UpstreamError> {
        let _guard = self.enter().await;
        let mut data = self.data.lock().unwrap();
        if let Some(err) = data.ranking_failures.get_mut(league).and_then(|q| q.pop_front()) {
            return Err(err);
        }
        Ok(data
            .rankings
            .get(&(league.to_string(), round_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_roster(
        &self,
        round_id: &str,
        team_id: &str,
    ) -> std::result::Result<TeamRoster, UpstreamError> {
        let _guard = self.enter().await;
        let data = self.data.lock().unwrap();
        let key = (round_id.to_string(), team_id.to_string());
        Ok(TeamRoster {
            team_id: team_id.to_string(),
            round_points: data.round_points.get(&key).copied(),
            players: data.rosters.get(&key).cloned().unwrap_or_default(),
        })
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Sent {
    pub subscription: Subscription,
    pub notification: Notification,
    pub mode: NotifyMode,
    pub message_ref: MessageRef,
}

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Sent>>,
    next_ref: AtomicU64,
    fail_edits: AtomicBool,
    panic_next: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn kinds(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|s| s.notification.kind()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|s| s.notification.kind() == kind).count()
    }

    pub fn sent_to(&self, subscription: &Subscription) -> usize {
        self.sent.lock().unwrap().iter().filter(|s| &s.subscription == subscription).count()
    }

    pub fn fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::SeqCst);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        subscription: &Subscription,
        content: &Notification,
        mode: NotifyMode,
    ) -> Result<MessageRef> {
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("notifier transport crashed");
        }
        let message_ref = match &mode {
            NotifyMode::EditMessage(_) if self.fail_edits.load(Ordering::SeqCst) => {
                return Err(AppError::Notify("message to edit not found".to_string()));
            }
            NotifyMode::EditMessage(existing) => existing.clone(),
            NotifyMode::NewMessage => MessageRef((self.next_ref.fetch_add(1, Ordering::SeqCst) + 1).to_string()),
        };
        self.sent.lock().unwrap().push(Sent {
            subscription: subscription.clone(),
            notification: content.clone(),
            mode,
            message_ref: message_ref.clone(),
        });
        Ok(message_ref)
    }
}

// ---------------------------------------------------------------------------
// State store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStateStore {
    rows: Mutex<HashMap<String, WatcherState>>,
    fail_saves: AtomicBool,
    saves: AtomicU64,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    pub fn saves(&self) -> u64 {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn get(&self, subscription: &Subscription) -> Option<WatcherState> {
        self.rows.lock().unwrap().get(&subscription.key()).cloned()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn load_all(&self) -> Result<HashMap<String, WatcherState>> {
        Ok(self.rows.lock().unwrap().clone())
    }

    async fn save(&self, state: &WatcherState) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(AppError::Io(std::io::Error::other("disk full")));
        }
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.rows.lock().unwrap().insert(state.subscription.key(), state.clone());
        Ok(())
    }

    async fn remove(&self, subscription: &Subscription) -> Result<()> {
        self.rows.lock().unwrap().remove(&subscription.key());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Watcher harness
// ---------------------------------------------------------------------------

pub fn test_policy() -> PollPolicy {
    PollPolicy { poll_secs: 30, max_stale_polls: 3, backoff_multiplier: 2.0, max_poll_secs: 240 }
}

/// Deps with no retries, no caching and no retry delay, so each step hits the fake once.
pub fn test_deps(
    api: Arc<FakeLeagueApi>,
    notifier: Arc<RecordingNotifier>,
    store: Arc<dyn StateStore>,
    clock: Arc<ManualClock>,
) -> Arc<WatcherDeps> {
    let retry = RetryPolicy { max_attempts: 1, base_delay: Duration::ZERO, max_delay: Duration::from_secs(1) };
    let client = UpstreamClient::new(api, 16, retry, Duration::ZERO, Duration::ZERO);
    Arc::new(WatcherDeps {
        client: Arc::new(client),
        store,
        notifier,
        clock,
        policy: test_policy(),
        latency: Arc::new(LatencyStats::new()),
        health: Arc::new(HealthState::new()),
    })
}

pub struct Harness {
    pub api: Arc<FakeLeagueApi>,
    pub notifier: Arc<RecordingNotifier>,
    pub store: Arc<MemoryStateStore>,
    pub clock: Arc<ManualClock>,
    pub deps: Arc<WatcherDeps>,
    credentials: watch::Sender<u64>,
}

impl Harness {
    pub fn new(now: DateTime<Utc>) -> Self {
        let store = Arc::new(MemoryStateStore::new());
        Self::build(now, Arc::clone(&store), store)
    }

    /// Watchers persist to `store`; `self.store` stays empty.
    pub fn with_store(now: DateTime<Utc>, store: Arc<dyn StateStore>) -> Self {
        Self::build(now, Arc::new(MemoryStateStore::new()), store)
    }

    fn build(now: DateTime<Utc>, memory: Arc<MemoryStateStore>, store: Arc<dyn StateStore>) -> Self {
        let api = Arc::new(FakeLeagueApi::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new(now));
        let deps = test_deps(Arc::clone(&api), Arc::clone(&notifier), store, Arc::clone(&clock));
        let (credentials, _) = watch::channel(0);
        Self { api, notifier, store: memory, clock, deps, credentials }
    }

    pub fn watcher(&self, subscription: Subscription) -> Watcher {
        self.watcher_with_cancel(subscription, CancellationToken::new())
    }

    pub fn watcher_with_cancel(&self, subscription: Subscription, cancel: CancellationToken) -> Watcher {
        let state = WatcherState::new(subscription, &self.deps.policy);
        Watcher::new(state, Arc::clone(&self.deps), cancel, self.credentials.subscribe())
    }

    pub fn resume(&self, state: WatcherState) -> Watcher {
        Watcher::new(state, Arc::clone(&self.deps), CancellationToken::new(), self.credentials.subscribe())
    }

    pub fn refresh_credentials(&self) {
        self.credentials.send_modify(|v| *v += 1);
    }
}
