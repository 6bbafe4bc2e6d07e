//! Bounded retry with exponential backoff for external calls

use crate::{AgentError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further retry
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Bound on each single attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(5),
            attempt_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Run `operation`, retrying transient failures.
    ///
    /// Each attempt is bounded by `attempt_timeout`; an attempt that runs out
    /// of time is dropped and counts as a transient failure. Non-transient
    /// errors return immediately.
    pub async fn run<T, F, Fut>(&self, label: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut backoff = self.initial_backoff;
        let mut attempt = 0;

        loop {
            let outcome = match tokio::time::timeout(self.attempt_timeout, operation()).await {
                Ok(outcome) => outcome,
                Err(_) => Err(AgentError::Timeout {
                    operation: label.to_string(),
                    after: self.attempt_timeout,
                }),
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        "{} failed ({}); retry {}/{} in {:?}",
                        label, err, attempt, self.max_retries, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.max_backoff);
                }
                Err(err) => {
                    debug!("{} failed after {} retries: {}", label, attempt, err);
                    return Err(err);
                }
            }
        }
    }
}
