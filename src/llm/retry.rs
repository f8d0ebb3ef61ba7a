use std::{future::Future, time::Duration};

use tracing::warn;

use crate::error::Result;

/// Backoff settings for transient provider errors (429, 5xx, timeouts).
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    fn next_delay(&self, current: Duration) -> Duration {
        let multiplier = f64::from(self.backoff_multiplier.max(1.0));
        Duration::from_secs_f64(current.as_secs_f64() * multiplier).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or the
/// retry budget runs out. A server-provided delay wins over the backoff schedule.
pub async fn execute_with_retry<T, Op, Fut>(policy: &RetryPolicy, mut operation: Op) -> Result<T>
where
    Op: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    let mut delay = policy.initial_delay;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) if attempt < policy.max_retries && error.is_retryable() => {
                attempt += 1;
                let wait = error
                    .retry_delay()
                    .map(Duration::from_secs)
                    .map_or(delay, |hint| hint.min(policy.max_delay));
                warn!(
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = wait.as_millis() as u64,
                    error = %error,
                    "Transient provider error; retrying"
                );
                tokio::time::sleep(wait).await;
                delay = policy.next_delay(delay);
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RefineError;
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    fn instant() -> RetryPolicy {
        RetryPolicy::default()
            .with_max_retries(2)
            .with_initial_delay(Duration::ZERO)
            .with_max_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let value = execute_with_retry(&instant(), || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(RefineError::Api {
                        status: 503,
                        body: "overloaded".into(),
                    })
                } else {
                    Ok("done")
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(value, "done");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_fast() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<()> = execute_with_retry(&instant(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RefineError::Api {
                    status: 401,
                    body: "bad key".into(),
                })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = attempts.clone();
        let result: Result<()> = execute_with_retry(&instant(), || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(RefineError::RateLimited { retry_after_secs: 0 })
            }
        })
        .await;
        assert!(matches!(result, Err(RefineError::RateLimited { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }
}
