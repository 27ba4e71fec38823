use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::teams::TeamEntry;
use crate::db::models::TeamRecord;

/// Failure class preserved for operator diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    RateLimited,
    NotFound,
    Timeout,
    Malformed,
}

/// A classified per-team fetch failure.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Upstream answered 429; `retry_after` carries its `Retry-After` hint.
    #[error("rate limited: {detail}")]
    RateLimited {
        detail: String,
        retry_after: Option<Duration>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// No usable response in time (timeout, connection failure, 5xx).
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl FetchFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchFailure::RateLimited { .. } => FailureKind::RateLimited,
            FetchFailure::NotFound(_) => FailureKind::NotFound,
            FetchFailure::Timeout(_) => FailureKind::Timeout,
            FetchFailure::Malformed(_) => FailureKind::Malformed,
        }
    }

    /// A missing team will still be missing on the next attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, FetchFailure::NotFound(_))
    }
}

/// Terminal result of fetching one team, after retries.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Success(TeamRecord),
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success(_))
    }
}

/// Trait that every upstream team-data source must implement.
///
/// One call is one attempt; retry, rate limiting and timeouts are applied by
/// the caller.
#[async_trait]
pub trait TeamFetcher: Send + Sync {
    async fn fetch_team(&self, team: &TeamEntry) -> Result<TeamRecord, FetchFailure>;

    /// Human-readable name for logging.
    fn name(&self) -> &str;
}
