use crate::runtime::telemetry::duration_to_millis;
use crate::scope::Scope;
use anyhow::Result;
use std::fmt;
use std::future::{pending, Future};
use std::time::Duration;
use tokio::time::{sleep, sleep_until, Instant};

/// Convenience value for callers without non-retriable patterns.
pub const NO_PATTERNS: &[&str] = &[];

const DEFAULT_MAX_DURATION_SECS: u64 = 30;
const DEFAULT_INITIAL_INTERVAL_MS: u64 = 100;
const DEFAULT_MAX_INTERVAL_MS: u64 = 1_000;
const DEFAULT_INTERVAL_INCREMENT_MS: u64 = 100;

/// Linear backoff schedule bounded by a total duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_duration: Duration,
    initial_interval: Duration,
    max_interval: Duration,
    interval_increment: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_MAX_DURATION_SECS),
            Duration::from_millis(DEFAULT_INITIAL_INTERVAL_MS),
            Duration::from_millis(DEFAULT_MAX_INTERVAL_MS),
            Duration::from_millis(DEFAULT_INTERVAL_INCREMENT_MS),
        )
    }
}

impl RetryPolicy {
    /// `max_interval` is raised to `initial_interval` when configured below it.
    pub fn new(
        max_duration: Duration,
        initial_interval: Duration,
        max_interval: Duration,
        interval_increment: Duration,
    ) -> Self {
        Self {
            max_duration,
            initial_interval,
            max_interval: max_interval.max(initial_interval),
            interval_increment,
        }
    }

    /// Total time budget for one retry call.
    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn initial_interval(&self) -> Duration {
        self.initial_interval
    }

    pub fn max_interval(&self) -> Duration {
        self.max_interval
    }

    pub fn interval_increment(&self) -> Duration {
        self.interval_increment
    }

    /// Interval to wait after the next failure, given the one just used.
    pub fn next_interval(&self, current: Duration) -> Duration {
        current
            .saturating_add(self.interval_increment)
            .min(self.max_interval)
    }
}

/// Context attached to the last operation error when the retry budget runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryExhausted {
    pub elapsed: Duration,
    pub attempts: usize,
}

impl fmt::Display for RetryExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "operation timed out after {:?} ({} attempts)",
            self.elapsed, self.attempts
        )
    }
}

/// Calls `operation` until it succeeds, the policy's `max_duration` elapses,
/// `scope` ends, or the error matches one of `non_retriable` (case-insensitive
/// substring of the rendered error chain).
///
/// * A non-retriable error is returned as-is.
/// * Scope cancellation or deadline returns the [`ScopeError`](crate::ScopeError)
///   converted into [`anyhow::Error`], without extra context.
/// * Budget exhaustion returns the last error wrapped with [`RetryExhausted`].
pub async fn retry_with_backoff<T, F, Fut, P>(
    scope: &Scope,
    policy: &RetryPolicy,
    mut operation: F,
    non_retriable: &[P],
) -> Result<T>
where
    F: FnMut(Scope) -> Fut,
    Fut: Future<Output = Result<T>>,
    P: AsRef<str>,
{
    let started = Instant::now();
    let deadline = started.checked_add(policy.max_duration);
    let mut interval = policy.initial_interval;
    let mut attempt = 0usize;

    loop {
        attempt += 1;

        let err = match scope.run(operation(scope.clone())).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(reason) => return Err(reason.into()),
        };

        if is_non_retriable(&err, non_retriable) {
            tracing::debug!(attempt, error = %err, "non-retriable error; giving up");
            return Err(err);
        }

        let budget = async {
            match deadline {
                Some(deadline) => sleep_until(deadline).await,
                None => pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            reason = scope.done() => return Err(reason.into()),
            _ = budget => {
                let exhausted = RetryExhausted {
                    elapsed: started.elapsed(),
                    attempts: attempt,
                };
                tracing::warn!(
                    attempt,
                    elapsed_ms = duration_to_millis(exhausted.elapsed),
                    error = %err,
                    "retry budget exhausted"
                );
                return Err(err.context(exhausted));
            }
            _ = sleep(interval) => {
                tracing::warn!(
                    attempt,
                    backoff_ms = duration_to_millis(interval),
                    error = %err,
                    "operation failed; retrying"
                );
                interval = policy.next_interval(interval);
            }
        }
    }
}

fn is_non_retriable<P: AsRef<str>>(err: &anyhow::Error, patterns: &[P]) -> bool {
    if patterns.is_empty() {
        return false;
    }

    let rendered = format!("{err:#}").to_lowercase();
    patterns
        .iter()
        .any(|pattern| rendered.contains(&pattern.as_ref().to_lowercase()))
}
