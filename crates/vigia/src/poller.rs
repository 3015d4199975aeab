//! Condition polling.
//!
//! Every wait in the harness goes through [`Poller`]: evaluate, and if not yet
//! satisfied sleep one interval and evaluate again, until the deadline. The
//! last sleep is clamped so one final attempt runs exactly at the deadline,
//! which puts every timeout inside `[timeout, timeout + interval)`.
//!
//! Retryable errors (stale handles, cardinality misses, transient driver
//! hiccups) count as "not yet". Anything else aborts the poll.
//!
//! Each attempt is itself bounded by the time left, so a driver call that
//! never returns still ends the poll at the deadline.

use crate::config::WaitPolicy;
use crate::result::{HarnessError, HarnessResult};
use async_trait::async_trait;
use serde::Serialize;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const NOT_YET: &str = "predicate returned false";
const STALLED: &str = "attempt did not complete";

/// An idempotent, side-effect-free check against the browser
#[async_trait]
pub trait Condition: Send + Sync {
    /// Label used in timeout messages
    fn label(&self) -> String;

    /// Evaluate once
    async fn evaluate(&self) -> HarnessResult<bool>;
}

/// Outcome of a polled check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    /// Whether the condition held before the deadline
    pub ok: bool,
    /// Condition label
    pub label: String,
    /// Number of evaluations
    pub attempts: u32,
    /// Time spent polling
    pub elapsed: Duration,
    /// Last failure, when not ok
    pub diagnostic: Option<String>,
}

impl MatchResult {
    /// Turn a failed match into an assertion error, for use inside retried blocks.
    pub fn ensure(self) -> HarnessResult<Self> {
        if self.ok {
            Ok(self)
        } else {
            Err(HarnessError::assertion(format!(
                "{}: {}",
                self.label,
                self.diagnostic.as_deref().unwrap_or(NOT_YET)
            )))
        }
    }
}

struct Outcome<T> {
    value: Option<T>,
    attempts: u32,
    elapsed: Duration,
    last_error: Option<HarnessError>,
    stalled: bool,
}

impl<T> Outcome<T> {
    fn last_failure(&self) -> String {
        if self.stalled {
            return STALLED.to_string();
        }
        self.last_error
            .as_ref()
            .map_or_else(|| NOT_YET.to_string(), ToString::to_string)
    }
}

/// Polls conditions with a bounded timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    timeout: Duration,
    interval: Duration,
}

impl Default for Poller {
    fn default() -> Self {
        Self::from_policy(&WaitPolicy::global())
    }
}

impl Poller {
    /// Create a poller
    #[must_use]
    pub fn new(timeout: Duration, interval: Duration) -> Self {
        Self {
            timeout,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Implicit-wait poller for a policy
    #[must_use]
    pub fn from_policy(policy: &WaitPolicy) -> Self {
        Self::new(policy.timeout(), policy.interval())
    }

    /// Short existence-probe poller for a policy
    #[must_use]
    pub fn probe(policy: &WaitPolicy) -> Self {
        Self::new(policy.probe(), policy.interval())
    }

    /// Override the timeout
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Override the interval
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Configured timeout
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Configured interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> HarnessResult<Outcome<T>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<Option<T>>>,
    {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut attempts = 0;
        let mut last_error = None;

        loop {
            attempts += 1;
            // the attempt at the deadline still gets one interval
            let budget = deadline.saturating_duration_since(Instant::now());
            let budget = if budget.is_zero() { self.interval } else { budget };
            let Ok(attempt) = timeout(budget, op()).await else {
                tracing::warn!(label, attempts, ?budget, "attempt did not complete");
                return Ok(Outcome {
                    value: None,
                    attempts,
                    elapsed: start.elapsed(),
                    last_error,
                    stalled: true,
                });
            };
            match attempt {
                Ok(Some(value)) => {
                    return Ok(Outcome {
                        value: Some(value),
                        attempts,
                        elapsed: start.elapsed(),
                        last_error: None,
                        stalled: false,
                    });
                }
                Ok(None) => last_error = None,
                Err(e) if e.is_retryable() => {
                    tracing::debug!(label, attempts, error = %e, "retrying");
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Outcome {
                    value: None,
                    attempts,
                    elapsed: now - start,
                    last_error,
                    stalled: false,
                });
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }

    fn timeout_error<T>(&self, label: &str, outcome: Outcome<T>) -> HarnessError {
        let last_failure = outcome.last_failure();
        let cause = if outcome.stalled { None } else { outcome.last_error };
        HarnessError::Timeout {
            label: label.to_string(),
            elapsed: outcome.elapsed,
            timeout: self.timeout,
            last_failure,
            cause: cause.map(Box::new),
        }
    }

    /// Evaluate `predicate` until it holds or the timeout passes.
    ///
    /// A missed deadline is a `MatchResult` with `ok == false`; only
    /// non-retryable errors are returned as `Err`.
    pub async fn check<F, Fut>(&self, label: &str, mut predicate: F) -> HarnessResult<MatchResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<bool>>,
    {
        let outcome = self
            .run(label, || {
                let fut = predicate();
                async move { fut.await.map(|ok| ok.then_some(())) }
            })
            .await?;
        let ok = outcome.value.is_some();
        Ok(MatchResult {
            ok,
            label: label.to_string(),
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            diagnostic: (!ok).then(|| outcome.last_failure()),
        })
    }

    /// Like [`check`](Self::check) but a missed deadline is a `Timeout` error.
    pub async fn wait_until<F, Fut>(&self, label: &str, mut predicate: F) -> HarnessResult<MatchResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<bool>>,
    {
        let outcome = self
            .run(label, || {
                let fut = predicate();
                async move { fut.await.map(|ok| ok.then_some(())) }
            })
            .await?;
        if outcome.value.is_none() {
            return Err(self.timeout_error(label, outcome));
        }
        Ok(MatchResult {
            ok: true,
            label: label.to_string(),
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            diagnostic: None,
        })
    }

    /// Wait until `present` stops holding.
    ///
    /// `NotFound` and `StaleReference` from the predicate count as absent.
    pub async fn wait_until_absent<F, Fut>(
        &self,
        label: &str,
        mut present: F,
    ) -> HarnessResult<MatchResult>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<bool>>,
    {
        let outcome = self
            .run(label, || {
                let fut = present();
                async move {
                    match fut.await {
                        Ok(still_there) => Ok((!still_there).then_some(())),
                        Err(e) if e.is_absence() => Ok(Some(())),
                        Err(e) => Err(e),
                    }
                }
            })
            .await?;
        if outcome.value.is_none() {
            let mut err = self.timeout_error(label, outcome);
            if let HarnessError::Timeout { last_failure, .. } = &mut err {
                if last_failure == NOT_YET {
                    *last_failure = "still present".to_string();
                }
            }
            return Err(err);
        }
        Ok(MatchResult {
            ok: true,
            label: label.to_string(),
            attempts: outcome.attempts,
            elapsed: outcome.elapsed,
            diagnostic: None,
        })
    }

    /// Repeat `op` until it returns a value, retrying retryable errors.
    pub async fn retry<T, F, Fut>(&self, label: &str, mut op: F) -> HarnessResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = HarnessResult<T>>,
    {
        let mut outcome = self
            .run(label, || {
                let fut = op();
                async move { fut.await.map(Some) }
            })
            .await?;
        match outcome.value.take() {
            Some(value) => Ok(value),
            None => Err(self.timeout_error(label, outcome)),
        }
    }

    /// Poll a [`Condition`] until it holds; `Timeout` on a missed deadline.
    pub async fn wait_for(&self, condition: &dyn Condition) -> HarnessResult<MatchResult> {
        let label = condition.label();
        self.wait_until(&label, || condition.evaluate()).await
    }
}

/// Retry a block under the default poller until it stops failing.
///
/// The usual shape for cross-context checks: one actor changes something and
/// the block asserts the other actor eventually sees it.
pub async fn try_until_success<T, F, Fut>(op: F) -> HarnessResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = HarnessResult<T>>,
{
    Poller::default().retry("block to succeed", op).await
}
