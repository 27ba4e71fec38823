pub mod http;
pub mod provider;
pub mod retry;
pub mod teams;

pub use http::HttpTeamFetcher;
pub use provider::{FailureKind, FetchFailure, FetchOutcome, TeamFetcher};
pub use retry::{RateLimiter, RetryPolicy};
pub use teams::{load_team_map, TeamEntry};

use futures_util::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Dispatch settings for one cycle's fetches.
pub struct FetchSettings {
    /// Maximum fetches in flight
    pub concurrency: usize,
    /// Applies to each individual attempt
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub limiter: Arc<RateLimiter>,
}

/// Fetch a single team, retrying retryable failures under the policy.
/// Always terminates with a `FetchOutcome`; failures are data.
pub async fn fetch_with_retry(
    fetcher: &dyn TeamFetcher,
    team: &TeamEntry,
    settings: &FetchSettings,
) -> FetchOutcome {
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        settings.limiter.acquire().await;

        let result = match tokio::time::timeout(settings.timeout, fetcher.fetch_team(team)).await {
            Ok(result) => result,
            Err(_) => Err(FetchFailure::Timeout(format!(
                "{} gave no response within {:?}",
                team.label(),
                settings.timeout
            ))),
        };

        let failure = match result {
            Ok(record) => {
                debug!("Fetched {} on attempt {}", team.label(), attempt);
                return FetchOutcome::Success(record);
            }
            Err(failure) => failure,
        };

        if !failure.is_retryable() || !settings.retry.should_retry(attempt) {
            warn!(
                "[{}] {} failed after {} attempt(s): {}",
                fetcher.name(),
                team.label(),
                attempt,
                failure
            );
            return FetchOutcome::Failure(failure);
        }

        match &failure {
            FetchFailure::RateLimited { retry_after, .. } => {
                let delay = retry_after.unwrap_or_else(|| settings.retry.backoff(attempt));
                warn!(
                    "[{}] {} rate limited, holding dispatch for {:?}",
                    fetcher.name(),
                    team.label(),
                    delay
                );
                settings.limiter.defer(delay).await;
            }
            _ => {
                let delay = settings.retry.backoff(attempt);
                warn!(
                    "[{}] {} attempt {} failed ({}), retrying in {:?}",
                    fetcher.name(),
                    team.label(),
                    attempt,
                    failure,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Fetch every configured team through a bounded pool.
///
/// Results come back in team-map order regardless of completion order, keyed
/// by each entry's team key. Entries without a key are skipped (the team map
/// loader rejects them, so this only matters for hand-built lists).
pub async fn fetch_all(
    fetcher: Arc<dyn TeamFetcher>,
    teams: &[TeamEntry],
    settings: &FetchSettings,
) -> Vec<(String, FetchOutcome)> {
    info!(
        "Fetching {} team(s) via {} (concurrency={}, timeout={:?}, attempts={})",
        teams.len(),
        fetcher.name(),
        settings.concurrency,
        settings.timeout,
        settings.retry.max_attempts
    );

    stream::iter(teams.iter().filter_map(|t| t.key().map(|k| (k.to_string(), t))))
        .map(|(key, team)| {
            let fetcher = Arc::clone(&fetcher);
            async move {
                let outcome = fetch_with_retry(fetcher.as_ref(), team, settings).await;
                (key, outcome)
            }
        })
        .buffered(settings.concurrency.max(1))
        .collect()
        .await
}
