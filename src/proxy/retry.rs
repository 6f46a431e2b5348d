//! Retry policy around a single upstream call

use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry with a caller-supplied retryable predicate
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }

    /// Upper bound on the wall time of a fully retried call, saturating at
    /// `Duration::MAX`
    pub fn total_budget(&self, per_attempt: Duration) -> Duration {
        per_attempt
            .checked_mul(self.max_attempts)
            .and_then(|attempts| {
                self.delay
                    .checked_mul(self.max_attempts - 1)
                    .and_then(|delays| attempts.checked_add(delays))
            })
            .unwrap_or(Duration::MAX)
    }

    /// Run `op` with attempt numbers starting at 1 until it succeeds, fails
    /// with an error `retryable` rejects, or attempts run out. On exhaustion
    /// the last error is returned together with the number of attempts made.
    pub async fn run<T, E, F, Fut, P, N>(
        &self,
        mut op: F,
        retryable: P,
        mut on_retry: N,
    ) -> Result<T, (E, u32)>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
        N: FnMut(u32, &E),
    {
        let mut attempt = 1;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts && retryable(&e) => {
                    on_retry(attempt, &e);
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err((e, attempt)),
            }
        }
    }
}
