//! Idempotent assertion/retry engine.
//!
//! The platform's removal and creation operations are asynchronous
//! relative to their own completion signal: a deleted VM can stay
//! enumerable for a while, a created directory can take a moment to become
//! visible. Every "did the remote side converge yet" check in the engine
//! goes through the single combinator here, so the retry budget and
//! backoff policy are defined once.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// How long to keep re-checking a convergence condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryBudget {
    pub max_attempts: u32,
    pub interval: Duration,
}

impl RetryBudget {
    /// Creates a budget.
    #[must_use]
    pub const fn new(max_attempts: u32, interval: Duration) -> Self {
        Self { max_attempts, interval }
    }
}

impl Default for RetryBudget {
    /// 6 attempts at 5-second intervals, roughly a 30-second ceiling.
    fn default() -> Self {
        Self::new(6, Duration::from_secs(5))
    }
}

/// Drive a remote condition to convergence.
///
/// Checks `probe`; if it already holds, returns `Ok(true)` immediately and
/// `converge` is never invoked. Otherwise runs `converge` (which must be
/// idempotent), sleeps, and re-checks, up to the budget. `Ok(false)` means
/// the budget ran out with the condition still unmet — the caller must
/// report that, never treat it as success.
///
/// # Errors
/// Propagates the first fault from either closure; faults are not part of
/// the retry loop.
pub async fn assert_until<P, PF, A, AF>(
    budget: RetryBudget,
    mut probe: P,
    mut converge: A,
) -> Result<bool, EngineError>
where
    P: FnMut() -> PF,
    PF: Future<Output = Result<bool, EngineError>>,
    A: FnMut() -> AF,
    AF: Future<Output = Result<(), EngineError>>,
{
    for attempt in 1..=budget.max_attempts {
        if probe().await? {
            return Ok(true);
        }
        converge().await?;
        if attempt < budget.max_attempts {
            tokio::time::sleep(budget.interval).await;
        }
    }
    // One last look after the final converge call.
    probe().await
}

/// Wait for a condition someone else is driving: `assert_until` with a
/// no-op converge action.
pub async fn poll_until<P, PF>(budget: RetryBudget, probe: P) -> Result<bool, EngineError>
where
    P: FnMut() -> PF,
    PF: Future<Output = Result<bool, EngineError>>,
{
    assert_until(budget, probe, || std::future::ready(Ok(()))).await
}
