//! Error taxonomy for the bridge core.
//!
//! Every failure here is scoped to one user, one external group or one risk
//! signal. None of them is fatal to the process; callers report them.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single call to an external service (game platform, OAuth
/// provider or chat platform).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalError {
    #[error("rate limited by external platform")]
    RateLimited { retry_after: Option<Duration> },

    #[error("external call timed out")]
    Timeout,

    #[error("auth error")]
    Unauthorized,

    /// The resource exists but the caller may not see it (private inventory,
    /// missing API key scope).
    #[error("access restricted")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed response: {0}")]
    Decode(String),
}

impl ExternalError {
    /// Map a non-success HTTP status onto the taxonomy.
    pub fn from_status(status: u16, retry_after: Option<Duration>) -> Self {
        match status {
            401 => ExternalError::Unauthorized,
            403 => ExternalError::Forbidden,
            404 => ExternalError::NotFound,
            408 | 504 => ExternalError::Timeout,
            429 => ExternalError::RateLimited { retry_after },
            other => ExternalError::Status(other),
        }
    }

    /// Whether a bounded retry of the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExternalError::RateLimited { .. } | ExternalError::Transport(_) => true,
            ExternalError::Status(code) => *code >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ExternalError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ExternalError::Timeout
        } else if err.is_decode() {
            ExternalError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            ExternalError::from_status(status.as_u16(), None)
        } else {
            ExternalError::Transport(err.to_string())
        }
    }
}

/// Backend failure of one of the persistent stores.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("storage error: {0}")]
pub struct StoreError(pub String);

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Verification tokens are single use and short lived.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// Unknown, already consumed, or past its TTL. Not retryable: the user has
    /// to start linking again.
    #[error("link expired or already used")]
    NotFound,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("account is not linked; run verification first")]
    NotLinked,

    #[error("amount must be greater than zero (got {0})")]
    InvalidAmount(i64),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RankError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The chat platform could not confirm or apply the privilege.
    #[error("privilege gateway failed: {0}")]
    Gateway(ExternalError),

    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Only failures that leave nothing to score. Individual signals never end
/// up here; they degrade to unavailable instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RiskError {
    #[error("unknown external account {0}")]
    UnknownUser(String),

    #[error("username lookup failed: {0}")]
    Lookup(ExternalError),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LicenseError {
    #[error("unknown license key")]
    UnknownKey,

    #[error("license is not active")]
    Inactive,

    #[error("license already bound to the maximum of {max_guilds} guild(s)")]
    GuildLimitReached { max_guilds: i32 },

    #[error(transparent)]
    Storage(#[from] StoreError),
}
