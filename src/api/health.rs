//! Shared health counters for the /health endpoint.
//! Updated by the registry and every watcher cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared health metrics. Updated by watchers, read by API.
pub struct HealthState {
    started_at: Instant,
    /// Schedulers currently running.
    pub active_watchers: AtomicU64,
    /// Completed poll cycles across all watchers.
    pub cycles: AtomicU64,
    /// Cycles that ended in an upstream failure or a caught panic.
    pub failed_cycles: AtomicU64,
    /// Watchers currently paused on expired credentials.
    pub auth_paused: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self {
            started_at: Instant::now(),
            active_watchers: AtomicU64::new(0),
            cycles: AtomicU64::new(0),
            failed_cycles: AtomicU64::new(0),
            auth_paused: AtomicU64::new(0),
        }
    }
}

impl HealthState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active_watchers(&self, n: usize) {
        self.active_watchers.store(n as u64, Ordering::Relaxed);
    }

    pub fn record_cycle(&self, failed: bool) {
        self.cycles.fetch_add(1, Ordering::Relaxed);
        if failed {
            self.failed_cycles.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn inc_auth_paused(&self) {
        self.auth_paused.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_auth_paused(&self) {
        self.auth_paused.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub fn active_watchers(&self) -> u64 {
        self.active_watchers.load(Ordering::Relaxed)
    }

    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn auth_paused(&self) -> u64 {
        self.auth_paused.load(Ordering::Relaxed)
    }
}
