//! Retry-with-backoff combinator for reconciliation steps
//!
//! Every fetch and persist step goes through [`with_retry`]: each attempt is
//! bounded by the policy timeout, transient failures (including timeouts)
//! are retried after `backoff.delay(attempt)`, anything else fails fast.
//!
//! Work that keeps running after its future is dropped (blocking-pool
//! writes) must claim the [`Attempt`] with [`Attempt::begin_commit`] before
//! making anything durable. A timed-out attempt is abandoned only if it has
//! not been claimed; a claimed one is awaited to completion instead.

use std::future::Future;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::error::{EngineError, Result};

/// Delay before the next attempt, as a function of the attempt just failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry immediately
    None,
    /// Wait `attempt x step`
    Linear(Duration),
}

impl Backoff {
    pub fn delay(&self, attempt: u32) -> Duration {
        match self {
            Backoff::None => Duration::ZERO,
            Backoff::Linear(step) => step.saturating_mul(attempt),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, at least one is always made
    pub attempts: u32,
    /// Upper bound on a single attempt
    pub timeout: Duration,
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration, backoff: Backoff) -> Self {
        Self {
            attempts,
            timeout,
            backoff,
        }
    }
}

const PENDING: u8 = 0;
const COMMITTING: u8 = 1;
const ABANDONED: u8 = 2;

/// Handle on one attempt, shared between the retry loop and the work it runs
#[derive(Debug, Clone)]
pub struct Attempt {
    number: u32,
    state: Arc<AtomicU8>,
}

impl Attempt {
    pub fn new(number: u32) -> Self {
        Self {
            number,
            state: Arc::new(AtomicU8::new(PENDING)),
        }
    }

    /// An attempt no retry loop will abandon, for direct callers
    pub fn detached() -> Self {
        Self::new(1)
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    /// Claim the attempt for a durable commit.
    ///
    /// Returns false once the attempt has been abandoned; the caller must
    /// then roll back.
    pub fn begin_commit(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, COMMITTING, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == COMMITTING,
        }
    }

    pub fn is_abandoned(&self) -> bool {
        self.state.load(Ordering::Acquire) == ABANDONED
    }

    /// Abandon unless already claimed; true when the attempt is abandoned
    pub(crate) fn abandon(&self) -> bool {
        match self
            .state
            .compare_exchange(PENDING, ABANDONED, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => current == ABANDONED,
        }
    }
}

/// Run `op` under `policy`, returning the first success or the last error
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, op_name: &str, mut op: F) -> Result<T>
where
    F: FnMut(Attempt) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        let handle = Attempt::new(attempt);
        let fut = op(handle.clone());
        tokio::pin!(fut);

        let result = match tokio::time::timeout(policy.timeout, fut.as_mut()).await {
            Ok(result) => result,
            Err(_) if handle.abandon() => Err(EngineError::Timeout(format!(
                "{} exceeded {}ms",
                op_name,
                policy.timeout.as_millis()
            ))),
            Err(_) => {
                // already committing; its outcome is the attempt's outcome
                debug!(op = op_name, attempt, "Timed out while committing, awaiting commit");
                fut.await
            }
        };

        match result {
            Ok(value) => {
                if attempt > 1 {
                    info!(op = op_name, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if e.is_transient() && attempt < attempts => {
                let delay = policy.backoff.delay(attempt);
                warn!(
                    op = op_name,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if e.is_transient() {
                    error!(op = op_name, attempts, error = %e, "Failed after all retries");
                } else {
                    error!(op = op_name, attempt, error = %e, "Failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}
