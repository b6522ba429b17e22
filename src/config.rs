use std::time::Duration;

use crate::error::{AppError, Result};

pub const LTA_API_URL: &str = "https://api.ltafantasy.com";

/// Base polling interval (seconds) for every phase.
pub const POLL_SECS: u64 = 30;

/// Consecutive unchanged LIVE polls before the interval is multiplied.
pub const MAX_STALE_POLLS: u32 = 12;

pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Upper bound for the adaptive interval (seconds).
pub const MAX_POLL_SECS: u64 = 900;

/// Short cache TTL as a fraction of the poll interval. Keeps two polls of the
/// same league from sharing a read while letting concurrent subscribers share one.
pub const SHORT_TTL_FRACTION: f64 = 0.8;

/// Final (completed-round) data barely changes; cached for hours.
pub const CACHE_LONG_TTL_SECS: u64 = 6 * 3600;

/// Reminder offsets before market close, in hours.
pub const REMINDER_OFFSETS_HOURS: &[i64] = &[24, 1];

/// Upstream retry backoff: first delay and cap, in milliseconds.
pub const RETRY_BASE_DELAY_MS: u64 = 500;
pub const RETRY_MAX_DELAY_MS: u64 = 8_000;

pub const UPSTREAM_MAX_ATTEMPTS: u32 = 4;
pub const UPSTREAM_MAX_CONCURRENCY: usize = 8;

/// Request timeout for league API calls (seconds).
pub const HTTP_TIMEOUT_SECS: u64 = 25;

/// Adaptive polling parameters shared by every scheduler.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollPolicy {
    pub poll_secs: u64,
    pub max_stale_polls: u32,
    pub backoff_multiplier: f64,
    pub max_poll_secs: u64,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            poll_secs: POLL_SECS,
            max_stale_polls: MAX_STALE_POLLS,
            backoff_multiplier: BACKOFF_MULTIPLIER,
            max_poll_secs: MAX_POLL_SECS,
        }
    }
}

impl PollPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.poll_secs == 0 {
            return Err(AppError::Config("POLL_SECS must be greater than zero".to_string()));
        }
        if self.max_poll_secs < self.poll_secs {
            return Err(AppError::Config(format!(
                "MAX_POLL_SECS ({}) must be >= POLL_SECS ({})",
                self.max_poll_secs, self.poll_secs
            )));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(AppError::Config("BACKOFF_MULTIPLIER must be >= 1.0".to_string()));
        }
        if self.max_stale_polls == 0 {
            return Err(AppError::Config("MAX_STALE_POLLS must be greater than zero".to_string()));
        }
        Ok(())
    }

    pub fn clamp_interval(&self, secs: u64) -> u64 {
        secs.clamp(self.poll_secs, self.max_poll_secs)
    }

    /// TTL for volatile ranking/roster reads.
    pub fn short_ttl(&self) -> Duration {
        Duration::from_secs_f64(self.poll_secs as f64 * SHORT_TTL_FRACTION)
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    /// Upstream session credential (X_SESSION_TOKEN). May be empty until set via /auth.
    pub session_token: String,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub poll: PollPolicy,
    /// Max in-flight league API calls across all subscriptions (UPSTREAM_MAX_CONCURRENCY)
    pub upstream_max_concurrency: usize,
    /// Attempts per call for rate-limited/transient failures (UPSTREAM_MAX_ATTEMPTS)
    pub upstream_max_attempts: u32,
    pub cache_long_ttl_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let poll = PollPolicy {
            poll_secs: std::env::var("POLL_SECS")
                .unwrap_or_else(|_| POLL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(POLL_SECS),
            max_stale_polls: std::env::var("MAX_STALE_POLLS")
                .unwrap_or_else(|_| MAX_STALE_POLLS.to_string())
                .parse::<u32>()
                .unwrap_or(MAX_STALE_POLLS),
            backoff_multiplier: std::env::var("BACKOFF_MULTIPLIER")
                .unwrap_or_else(|_| BACKOFF_MULTIPLIER.to_string())
                .parse::<f64>()
                .unwrap_or(BACKOFF_MULTIPLIER),
            max_poll_secs: std::env::var("MAX_POLL_SECS")
                .unwrap_or_else(|_| MAX_POLL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(MAX_POLL_SECS),
        };
        poll.validate()?;

        Ok(Self {
            api_url: std::env::var("LTA_API_URL")
                .map(|s| s.trim().trim_end_matches('/').to_string())
                .unwrap_or_else(|_| LTA_API_URL.to_string()),
            session_token: std::env::var("X_SESSION_TOKEN")
                .unwrap_or_default()
                .trim()
                .to_string(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "watcher.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            poll,
            upstream_max_concurrency: std::env::var("UPSTREAM_MAX_CONCURRENCY")
                .unwrap_or_else(|_| UPSTREAM_MAX_CONCURRENCY.to_string())
                .parse::<usize>()
                .unwrap_or(UPSTREAM_MAX_CONCURRENCY)
                .max(1),
            upstream_max_attempts: std::env::var("UPSTREAM_MAX_ATTEMPTS")
                .unwrap_or_else(|_| UPSTREAM_MAX_ATTEMPTS.to_string())
                .parse::<u32>()
                .unwrap_or(UPSTREAM_MAX_ATTEMPTS)
                .max(1),
            cache_long_ttl_secs: std::env::var("CACHE_LONG_TTL_SECS")
                .unwrap_or_else(|_| CACHE_LONG_TTL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(CACHE_LONG_TTL_SECS),
        })
    }
}
