//! Explicit retry policy for fallible async calls.
//!
//! A [`RetryPolicy`] wraps a single operation and re-invokes it with a fixed
//! backoff while the error is classified as retryable by the caller. There is
//! no hidden control flow: the caller decides what counts as transient.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Bounded retry with fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first. Values below 1 act as 1.
    pub max_attempts: u32,
    /// Delay between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy with the given attempt count and backoff.
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// A policy that runs the operation exactly once.
    #[must_use]
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Run `op` until it succeeds, the error is not retryable, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the last error produced by `op`.
    pub async fn run<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max_attempts && retryable(&e) => {
                    tracing::debug!(
                        attempt,
                        max_attempts,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(self.backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    enum TestError {
        Transient,
        Fatal,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{self:?}")
        }
    }

    fn is_transient(e: &TestError) -> bool {
        *e == TestError::Transient
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::new(3, Duration::from_secs(5));
        let mut calls = 0;

        let result = policy
            .run(
                |attempt| {
                    calls += 1;
                    async move {
                        if attempt < 3 {
                            Err(TestError::Transient)
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                is_transient,
            )
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_at_max_attempts() {
        let policy = RetryPolicy::new(2, Duration::from_secs(1));
        let mut calls = 0;

        let result: Result<(), _> = policy
            .run(
                |_| {
                    calls += 1;
                    async { Err(TestError::Transient) }
                },
                is_transient,
            )
            .await;

        assert_eq!(result, Err(TestError::Transient));
        assert_eq!(calls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_fatal_errors() {
        let policy = RetryPolicy::default();
        let mut calls = 0;

        let result: Result<(), _> = policy
            .run(
                |_| {
                    calls += 1;
                    async { Err(TestError::Fatal) }
                },
                is_transient,
            )
            .await;

        assert_eq!(result, Err(TestError::Fatal));
        assert_eq!(calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_backoff_between_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_secs(10));
        let start = tokio::time::Instant::now();

        let _: Result<(), _> = policy
            .run(|_| async { Err(TestError::Transient) }, is_transient)
            .await;

        assert_eq!(start.elapsed(), Duration::from_secs(20));
    }

    #[test]
    fn zero_attempts_runs_once() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .unwrap();
        let mut calls = 0;
        let _: Result<(), _> = rt.block_on(policy.run(
            |_| {
                calls += 1;
                async { Err(TestError::Transient) }
            },
            is_transient,
        ));
        assert_eq!(calls, 1);
    }
}
