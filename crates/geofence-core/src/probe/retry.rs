//! Bounded retry policy shared by every probe.

use std::future::Future;
use std::time::Duration;

/// How many times a probe is attempted, how long each attempt may take and how
/// long to wait between failed attempts.
///
/// A policy always makes at least one attempt, and a full run never takes
/// longer than [`RetryPolicy::max_duration`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    timeout: Duration,
    backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy. Zero attempts is raised to one.
    #[must_use]
    pub const fn new(attempts: u32, timeout: Duration, backoff: Duration) -> Self {
        Self {
            attempts: if attempts == 0 { 1 } else { attempts },
            timeout,
            backoff,
        }
    }

    /// Number of attempts.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Per-attempt timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Upper bound on the time a full [`run`](Self::run) can take.
    #[must_use]
    pub fn max_duration(&self) -> Duration {
        self.timeout.saturating_mul(self.attempts)
            + self.backoff.saturating_mul(self.attempts.saturating_sub(1))
    }

    /// Run `attempt` until it reports success or the attempts are exhausted.
    ///
    /// Each attempt receives its zero-based index and is cut off after the
    /// per-attempt timeout; a timed-out attempt counts as a failure.
    pub async fn run<F, Fut>(&self, mut attempt: F) -> bool
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = bool>,
    {
        for n in 0..self.attempts {
            if n > 0 && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff).await;
            }
            match tokio::time::timeout(self.timeout, attempt(n)).await {
                Ok(true) => return true,
                Ok(false) => {}
                Err(_) => tracing::trace!(attempt = n, "probe attempt timed out"),
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_zero_attempts_is_one() {
        let policy = RetryPolicy::new(0, Duration::from_secs(1), Duration::ZERO);
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn test_max_duration() {
        let policy = RetryPolicy::new(3, Duration::from_secs(2), Duration::from_millis(500));
        assert_eq!(policy.max_duration(), Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_stops_at_first_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(1), Duration::ZERO);

        let ok = policy
            .run(|n| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move { n == 2 }
            })
            .await;

        assert!(ok);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(4, Duration::from_secs(1), Duration::ZERO);

        let ok = policy
            .run(|_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { false }
            })
            .await;

        assert!(!ok);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_attempt_is_cut_off() {
        let policy = RetryPolicy::new(2, Duration::from_millis(100), Duration::from_millis(10));
        let started = tokio::time::Instant::now();

        let ok = policy
            .run(|_| async {
                std::future::pending::<()>().await;
                true
            })
            .await;

        assert!(!ok);
        assert!(started.elapsed() <= policy.max_duration() + Duration::from_millis(1));
    }
}
