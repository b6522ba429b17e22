use std::time::Duration;

use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Notify error: {0}")]
    Notify(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(UpstreamError::AuthExpired(_)) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Failure taxonomy for league API reads.
///
/// `Clone` so one failed single-flight fetch can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    /// Session credential rejected (401/403). Retrying with the same token cannot help.
    #[error("auth expired: {0}")]
    AuthExpired(String),

    /// League or round vanished (404).
    #[error("not found: {0}")]
    NotFound(String),

    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Timeouts, connection resets, 5xx.
    #[error("transient: {0}")]
    Transient(String),

    #[error("unknown: {0}")]
    Unknown(String),
}

impl UpstreamError {
    /// Only rate limiting and transient failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UpstreamError::RateLimited { .. } | UpstreamError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::AuthExpired(_) => "auth_expired",
            UpstreamError::NotFound(_) => "not_found",
            UpstreamError::RateLimited { .. } => "rate_limited",
            UpstreamError::Transient(_) => "transient",
            UpstreamError::Unknown(_) => "unknown",
        }
    }
}
