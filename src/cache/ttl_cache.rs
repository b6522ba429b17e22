use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::trace;

use crate::error::UpstreamError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, UpstreamError>>>;

enum Slot<V> {
    Ready { value: V, expires_at: Instant },
    /// At most one upstream call per key; later callers clone and await this.
    InFlight { fetch: SharedFetch<V>, ttl: Duration },
}

enum Lookup<V> {
    Hit(V),
    Wait(SharedFetch<V>),
}

/// Single-flight, TTL-bounded memoization over upstream reads.
///
/// Failures are handed to every concurrent waiter and never cached.
/// Time comes from `tokio::time::Instant` so paused-clock tests can expire entries.
pub struct TtlCache<V> {
    entries: DashMap<String, Slot<V>>,
}

impl<V> TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    pub async fn get<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Result<V, UpstreamError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        let pending = match self.lookup_or_start(key, ttl, fetch) {
            Lookup::Hit(value) => return Ok(value),
            Lookup::Wait(pending) => pending,
        };

        let result = pending.clone().await;
        // Every waiter settles, so a dropped leader cannot leave the slot stuck in flight.
        self.settle(key, &pending, &result);
        result
    }

    fn lookup_or_start<F, Fut>(&self, key: &str, ttl: Duration, fetch: F) -> Lookup<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
    {
        let now = Instant::now();
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existing = match occupied.get() {
                    Slot::Ready { value, expires_at } if now < *expires_at => {
                        trace!(key, "cache hit");
                        Some(Lookup::Hit(value.clone()))
                    }
                    Slot::InFlight { fetch, .. } => {
                        trace!(key, "joining in-flight fetch");
                        Some(Lookup::Wait(fetch.clone()))
                    }
                    Slot::Ready { .. } => None,
                };
                match existing {
                    Some(lookup) => lookup,
                    None => {
                        let shared = start(fetch());
                        occupied.insert(Slot::InFlight { fetch: shared.clone(), ttl });
                        Lookup::Wait(shared)
                    }
                }
            }
            Entry::Vacant(vacant) => {
                let shared = start(fetch());
                vacant.insert(Slot::InFlight { fetch: shared.clone(), ttl });
                Lookup::Wait(shared)
            }
        }
    }

    fn settle(&self, key: &str, pending: &SharedFetch<V>, result: &Result<V, UpstreamError>) {
        let Entry::Occupied(mut occupied) = self.entries.entry(key.to_string()) else {
            // Invalidated while in flight; do not resurrect.
            return;
        };
        let ttl = match occupied.get() {
            Slot::InFlight { fetch, ttl } if fetch.ptr_eq(pending) => *ttl,
            _ => return,
        };
        match result {
            Ok(value) => {
                occupied.insert(Slot::Ready {
                    value: value.clone(),
                    expires_at: Instant::now() + ttl,
                });
            }
            Err(_) => {
                occupied.remove();
            }
        }
    }

    /// Drop every entry whose key starts with `prefix`.
    pub fn invalidate(&self, prefix: &str) {
        self.entries.retain(|k, _| !k.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// A panicking fetch becomes an `Unknown` failure instead of poisoning the shared slot.
fn start<V, Fut>(fetch: Fut) -> SharedFetch<V>
where
    V: Clone + Send + Sync + 'static,
    Fut: Future<Output = Result<V, UpstreamError>> + Send + 'static,
{
    AssertUnwindSafe(fetch)
        .catch_unwind()
        .map(|outcome| {
            outcome.unwrap_or_else(|_| Err(UpstreamError::Unknown("upstream fetch panicked".to_string())))
        })
        .boxed()
        .shared()
}

impl<V> Default for TtlCache<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
