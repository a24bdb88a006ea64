use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Bounded retry with a fixed pause between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff: Duration::from_millis(200) }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_millis: u64) -> Self {
        Self { max_attempts, backoff: Duration::from_millis(backoff_millis) }
    }

    /// Effective attempt budget. A zero budget still gets one try.
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub async fn pause(&self) {
        if !self.backoff.is_zero() {
            tokio::time::sleep(self.backoff).await;
        }
    }

    pub async fn run<T, E, F, Fut>(&self, operation: &'static str, call: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(operation, |_| true, call).await
    }

    /// Runs `call` until it succeeds, returns an error `retryable` refuses,
    /// or the budget runs out. The last error is returned on exhaustion.
    pub async fn run_if<T, E, R, F, Fut>(
        &self,
        operation: &'static str,
        retryable: R,
        mut call: F,
    ) -> Result<T, E>
    where
        E: Display,
        R: Fn(&E) -> bool,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let max_attempts = self.attempts();
        let mut attempt = 1;
        loop {
            match call(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) if attempt < max_attempts && retryable(&error) => {
                    warn!(
                        event_name = "retry.attempt_failed",
                        operation,
                        attempt,
                        max_attempts,
                        error = %error,
                        "operation failed; retrying"
                    );
                    self.pause().await;
                    attempt += 1;
                }
                Err(error) => {
                    if retryable(&error) {
                        warn!(
                            event_name = "retry.exhausted",
                            operation,
                            attempt,
                            max_attempts,
                            error = %error,
                            "retry budget exhausted"
                        );
                    }
                    return Err(error);
                }
            }
        }
    }
}
