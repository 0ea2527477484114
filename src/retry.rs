/// Retry policy for register operations
///
/// A policy is a plain value `{max_attempts, backoff}` consumed by
/// [`RetryPolicy::run`], which drives any async operation. The transport
/// never sleeps or loops itself, so the policy can be tested without a
/// network.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;

use crate::error::ProbeError;

/// Fixed pause between two attempts of one operation
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(100);

/// Bounded retry with a fixed backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

/// Successful result and the number of attempts it took
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Every attempt failed
#[derive(Debug, Clone, PartialEq)]
pub struct Exhausted {
    pub attempts: u32,
    /// `None` only when the policy allows zero attempts
    pub last_error: Option<ProbeError>,
}

impl Exhausted {
    pub fn last_error_message(&self) -> String {
        match &self.last_error {
            Some(error) => error.to_string(),
            None => "no attempt allowed by retry policy".to_string(),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self { max_attempts, backoff }
    }

    /// Run `operation` until it succeeds or the budget is spent
    ///
    /// The closure receives the 1-based attempt number. Attempts are strictly
    /// sequential; the backoff is awaited between two attempts, not after the
    /// last one.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<Attempted<T>, Exhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, ProbeError>>,
    {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            match operation(attempt).await {
                Ok(value) => return Ok(Attempted { value, attempts: attempt }),
                Err(error) => {
                    last_error = Some(error);
                    if attempt < self.max_attempts {
                        sleep(self.backoff).await;
                    }
                }
            }
        }
        Err(Exhausted {
            attempts: self.max_attempts,
            last_error,
        })
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF)
    }
}
