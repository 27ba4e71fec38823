use rand::Rng;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Bounded-attempt retry schedule with capped exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one (at least 1)
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Adds up to 25% random spread so concurrent retries do not line up
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(1200),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);
        if self.jitter && !delay.is_zero() {
            let spread = delay.as_millis() as u64 / 4;
            let extra = rand::thread_rng().gen_range(0..=spread);
            (delay + Duration::from_millis(extra)).min(self.max_delay)
        } else {
            delay
        }
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

/// Fixed-spacing gate shared by all concurrent fetches of a cycle.
///
/// Each `acquire` reserves the next start slot; a rate-limit response pushes
/// the next slot out for everyone.
pub struct RateLimiter {
    spacing: Duration,
    next_allowed: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(spacing: Duration) -> Self {
        RateLimiter {
            spacing,
            next_allowed: Mutex::new(Instant::now()),
        }
    }

    /// Wait for this caller's start slot.
    pub async fn acquire(&self) {
        let wait = {
            let mut next = self.next_allowed.lock().await;
            let now = Instant::now();
            let start = (*next).max(now);
            *next = start + self.spacing;
            start - now
        };
        if !wait.is_zero() {
            tokio::time::sleep(wait).await;
        }
    }

    /// Hold all callers back for at least `delay` from now.
    pub async fn defer(&self, delay: Duration) {
        let mut next = self.next_allowed.lock().await;
        let until = Instant::now() + delay;
        if until > *next {
            *next = until;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(500),
            jitter: false,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let p = policy();
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(500));
        assert_eq!(p.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let p = RetryPolicy {
            jitter: true,
            ..policy()
        };
        for _ in 0..50 {
            let d = p.backoff(2);
            assert!(d >= Duration::from_millis(200));
            assert!(d <= Duration::from_millis(250));
        }
    }

    #[test]
    fn test_attempt_bound() {
        let p = policy();
        assert!(p.should_retry(3));
        assert!(!p.should_retry(4));
    }

    #[tokio::test]
    async fn test_rate_limiter_spaces_starts() {
        let limiter = RateLimiter::new(Duration::from_millis(30));
        let started = Instant::now();
        limiter.acquire().await;
        limiter.acquire().await;
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_rate_limiter_defer_pushes_next_slot() {
        let limiter = RateLimiter::new(Duration::ZERO);
        limiter.defer(Duration::from_millis(40)).await;
        let started = Instant::now();
        limiter.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(35));
    }
}
