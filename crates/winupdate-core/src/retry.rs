//! Fixed-delay retry bounded by a wall-clock budget.
//!
//! The budget is measured from the first attempt. An attempt that is still
//! running when the budget runs out, or when the caller cancels, is dropped.
//! A new attempt is never started if the delay before it would overrun the
//! budget.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Delay between attempts used when nothing else is configured.
pub const DEFAULT_DELAY: Duration = Duration::from_secs(5);

// Stand-in deadline for budgets too large to add to `Instant::now()`.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub delay: Duration,
    pub budget: Duration,
}

impl RetryPolicy {
    pub fn new(delay: Duration, budget: Duration) -> Self {
        Self { delay, budget }
    }
}

#[derive(Debug)]
pub enum RetryError<E> {
    TimedOut { attempts: u32, last_error: Option<E> },
    Cancelled { attempts: u32, last_error: Option<E> },
}

impl<E> RetryError<E> {
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::TimedOut { attempts, .. } | RetryError::Cancelled { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::TimedOut { last_error, .. } | RetryError::Cancelled { last_error, .. } => {
                last_error.as_ref()
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let outcome = if self.is_cancelled() {
            "cancelled"
        } else {
            "timed out"
        };
        write!(f, "{outcome} after {} attempts", self.attempts())?;
        if let Some(e) = self.last_error() {
            write!(f, ": {e}")?;
        }
        Ok(())
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for RetryError<E> {}

/// Run `action` until it succeeds, `policy.budget` elapses, or `cancel` fires.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut action: F,
) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let start = Instant::now();
    let deadline = start
        .checked_add(policy.budget)
        .unwrap_or_else(|| start + FAR_FUTURE);
    let mut attempts = 0u32;
    let mut last_error: Option<E> = None;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled {
                attempts,
                last_error,
            });
        }

        attempts += 1;
        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, last_error });
            }
            () = tokio::time::sleep_until(deadline) => {
                return Err(RetryError::TimedOut { attempts, last_error });
            }
            res = action() => res,
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) => {
                warn!(attempt = attempts, error = %e, "retryable action failed");
                last_error = Some(e);
            }
        }

        let overruns = Instant::now()
            .checked_add(policy.delay)
            .map_or(true, |next| next > deadline);
        if overruns {
            return Err(RetryError::TimedOut {
                attempts,
                last_error,
            });
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(RetryError::Cancelled { attempts, last_error });
            }
            () = tokio::time::sleep(policy.delay) => {}
        }
    }
}
