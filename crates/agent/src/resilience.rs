use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Timeout and retry budget for one outbound integration call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub timeout: Duration,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            timeout: Duration::from_secs(30),
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(timeout_secs: u64, max_retries: u32) -> Self {
        Self { max_retries, timeout: Duration::from_secs(timeout_secs.max(1)), ..Self::default() }
    }

    pub fn without_delay(mut self) -> Self {
        self.base_delay = Duration::ZERO;
        self
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let multiplier = 1_u32 << exponent;
        self.base_delay.saturating_mul(multiplier).min(self.max_delay)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttemptError<E> {
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Failed(E),
}

/// Runs `call` under the policy timeout, retrying failures and timeouts until the retry budget
/// is spent. The last error is returned.
pub async fn retry_with_timeout<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &'static str,
    mut call: F,
) -> Result<T, AttemptError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 0;
    loop {
        let failure = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(error)) => AttemptError::Failed(error),
            Err(_) => AttemptError::Timeout(policy.timeout),
        };

        if attempt >= policy.max_retries {
            return Err(failure);
        }
        attempt += 1;
        warn!(operation, attempt, max_retries = policy.max_retries, error = %failure, "retrying");

        let delay = policy.backoff(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
