use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::cache::TtlCache;
use crate::config::{Config, RETRY_BASE_DELAY_MS, RETRY_MAX_DELAY_MS};
use crate::error::UpstreamError;
use crate::types::{RankingEntry, Round, TeamRoster};
use crate::upstream::LeagueApi;

/// Bounded exponential backoff for rate-limited and transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::config::UPSTREAM_MAX_ATTEMPTS,
            base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt + 1`. `None` means waiting is pointless:
    /// the server asked for longer than we are willing to block a poll cycle.
    pub fn delay_for(&self, attempt: u32, err: &UpstreamError) -> Option<Duration> {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        match err {
            UpstreamError::RateLimited { retry_after: Some(hint) } if *hint > self.max_delay => None,
            UpstreamError::RateLimited { retry_after: Some(hint) } => Some(exp.max(*hint)),
            _ => Some(exp),
        }
    }
}

/// Typed, cached, retrying access to the league API.
///
/// Every read goes through a single-flight cache, and every attempt holds a
/// permit from one shared semaphore so many watchers polling at once cannot
/// stampede the upstream.
pub struct UpstreamClient {
    api: Arc<dyn LeagueApi>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    short_ttl: Duration,
    long_ttl: Duration,
    rounds: TtlCache<Vec<Round>>,
    rankings: TtlCache<Vec<RankingEntry>>,
    rosters: TtlCache<TeamRoster>,
}

impl UpstreamClient {
    pub fn new(
        api: Arc<dyn LeagueApi>,
        max_concurrency: usize,
        retry: RetryPolicy,
        short_ttl: Duration,
        long_ttl: Duration,
    ) -> Self {
        Self {
            api,
            permits: Arc::new(Semaphore::new(max_concurrency.max(1))),
            retry,
            short_ttl,
            long_ttl,
            rounds: TtlCache::new(),
            rankings: TtlCache::new(),
            rosters: TtlCache::new(),
        }
    }

    pub fn from_config(api: Arc<dyn LeagueApi>, cfg: &Config) -> Self {
        let retry = RetryPolicy { max_attempts: cfg.upstream_max_attempts, ..RetryPolicy::default() };
        Self::new(
            api,
            cfg.upstream_max_concurrency,
            retry,
            cfg.poll.short_ttl(),
            Duration::from_secs(cfg.cache_long_ttl_secs),
        )
    }

    pub async fn get_rounds(&self, league: &str) -> Result<Vec<Round>, UpstreamError> {
        let api = Arc::clone(&self.api);
        let league_owned = league.to_string();
        let call = move || {
            let api = Arc::clone(&api);
            let league = league_owned.clone();
            async move { api.fetch_rounds(&league).await }
        };
        let (permits, retry) = (Arc::clone(&self.permits), self.retry);
        let what = format!("rounds {league}");
        self.rounds
            .get(&format!("rounds:{league}"), self.short_ttl, move || {
                with_retry(call, permits, retry, what)
            })
            .await
    }

    /// Live ranking for a round; short TTL.
    pub async fn get_ranking(&self, league: &str, round_id: &str) -> Result<Vec<RankingEntry>, UpstreamError> {
        self.ranking_with_ttl(format!("ranking:{league}:{round_id}"), league, round_id, self.short_ttl)
            .await
    }

    /// Ranking of a finished round; cached for hours.
    pub async fn get_final_ranking(
        &self,
        league: &str,
        round_id: &str,
    ) -> Result<Vec<RankingEntry>, UpstreamError> {
        self.ranking_with_ttl(format!("final:{league}:{round_id}"), league, round_id, self.long_ttl)
            .await
    }

    async fn ranking_with_ttl(
        &self,
        key: String,
        league: &str,
        round_id: &str,
        ttl: Duration,
    ) -> Result<Vec<RankingEntry>, UpstreamError> {
        let api = Arc::clone(&self.api);
        let (league_owned, round_owned) = (league.to_string(), round_id.to_string());
        let call = move || {
            let api = Arc::clone(&api);
            let (league, round_id) = (league_owned.clone(), round_owned.clone());
            async move { api.fetch_ranking(&league, &round_id).await }
        };
        let (permits, retry) = (Arc::clone(&self.permits), self.retry);
        let what = format!("ranking {league}/{round_id}");
        self.rankings
            .get(&key, ttl, move || with_retry(call, permits, retry, what))
            .await
    }

    pub async fn get_roster(&self, round_id: &str, team_id: &str) -> Result<TeamRoster, UpstreamError> {
        let api = Arc::clone(&self.api);
        let (round_owned, team_owned) = (round_id.to_string(), team_id.to_string());
        let call = move || {
            let api = Arc::clone(&api);
            let (round_id, team_id) = (round_owned.clone(), team_owned.clone());
            async move { api.fetch_roster(&round_id, &team_id).await }
        };
        let (permits, retry) = (Arc::clone(&self.permits), self.retry);
        let what = format!("roster {round_id}/{team_id}");
        self.rosters
            .get(&format!("roster:{round_id}:{team_id}"), self.short_ttl, move || {
                with_retry(call, permits, retry, what)
            })
            .await
    }

    /// Forget everything cached, e.g. after the session token changed.
    pub fn invalidate_all(&self) {
        self.rounds.invalidate("");
        self.rankings.invalidate("");
        self.rosters.invalidate("");
    }

    pub fn cached_entries(&self) -> usize {
        self.rounds.len() + self.rankings.len() + self.rosters.len()
    }
}

async fn with_retry<T, F, Fut>(
    call: F,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
    what: String,
) -> Result<T, UpstreamError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let mut attempt = 1u32;
    loop {
        let result = {
            let _permit = permits
                .acquire()
                .await
                .map_err(|_| UpstreamError::Unknown("upstream semaphore closed".to_string()))?;
            call().await
        };

        let err = match result {
            Ok(value) => {
                if attempt > 1 {
                    debug!(what = %what, attempt, "upstream call recovered");
                }
                return Ok(value);
            }
            Err(err) => err,
        };

        if !err.is_retryable() || attempt >= retry.max_attempts {
            return Err(err);
        }
        let Some(delay) = retry.delay_for(attempt, &err) else {
            return Err(err);
        };
        warn!(
            what = %what,
            attempt,
            max_attempts = retry.max_attempts,
            kind = err.kind(),
            "upstream call failed, retrying in {}ms",
            delay.as_millis(),
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}
