//! Bounded retry with a fixed backoff schedule.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Retry schedule with an explicit list of delays.
///
/// An operation is tried once, then once more after each delay in order, so
/// `delays.len() + 1` attempts at most. Used to wait for resolved files to
/// settle on disk before staging them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedBackoff {
    delays: Vec<Duration>,
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::from_millis(&[100, 250, 500, 1000])
    }
}

impl FixedBackoff {
    pub fn new(delays: Vec<Duration>) -> Self {
        Self { delays }
    }

    pub fn from_millis(delays_ms: &[u64]) -> Self {
        Self::new(delays_ms.iter().copied().map(Duration::from_millis).collect())
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self::new(vec![])
    }

    pub fn delays(&self) -> &[Duration] {
        &self.delays
    }

    pub fn max_attempts(&self) -> usize {
        self.delays.len() + 1
    }

    /// Run `operation` until it succeeds or the schedule is exhausted. The
    /// closure receives the zero-based attempt number. The last error is
    /// returned unchanged.
    pub async fn retry<F, Fut, T, E>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let mut attempt = 0;
        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => match self.delays.get(attempt) {
                    Some(&delay) => {
                        warn!(
                            attempt = attempt + 1,
                            max_attempts = self.max_attempts(),
                            error = %err,
                            ?delay,
                            "Attempt failed, retrying"
                        );
                        sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(attempts = attempt + 1, error = %err, "Retries exhausted");
                        return Err(err);
                    }
                },
            }
        }
    }
}
