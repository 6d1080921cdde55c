//! Three-state circuit breaker.
//!
//! ```text
//! Closed   -> Open:     consecutive failures reach the threshold
//! Open     -> HalfOpen: first admission after the reset timeout
//! HalfOpen -> Closed:   two consecutive successful probes
//! HalfOpen -> Open:     any failed probe
//! ```
//!
//! Half-open admits every caller; concurrent probes are not limited to one.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const DEFAULT_FAILURE_THRESHOLD: usize = 5;
const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(60);
const HALF_OPEN_SUCCESS_THRESHOLD: usize = 2;

pub type StateChangeHook = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;
pub type ErrorHook = Arc<dyn Fn(&dyn fmt::Display) + Send + Sync>;

/// Represents the current state of the circuit breaker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(label)
    }
}

/// Snapshot of breaker internals for observability.
#[derive(Debug, Copy, Clone)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: usize,
    pub consecutive_successes: usize,
    pub last_failure_at: Option<Instant>,
}

/// Rejection returned while the breaker is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker is open")]
pub struct CircuitOpen;

/// Outcome of a guarded call: either a rejection or the operation's own error.
#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    #[error("{}", CircuitOpen)]
    Open,
    #[error("{0}")]
    Operation(E),
}

impl<E> CircuitBreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, CircuitBreakerError::Open)
    }

    /// Returns the operation error, if the call was admitted.
    pub fn into_operation(self) -> Option<E> {
        match self {
            CircuitBreakerError::Open => None,
            CircuitBreakerError::Operation(err) => Some(err),
        }
    }
}

impl CircuitBreakerError<anyhow::Error> {
    /// Flattens into `anyhow`; the rejection downcasts to [`CircuitOpen`].
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            CircuitBreakerError::Open => CircuitOpen.into(),
            CircuitBreakerError::Operation(err) => err,
        }
    }
}

/// Breaker parameters. Zero values fall back to the defaults when the breaker
/// is built; they are never rejected.
#[derive(Clone, Default)]
pub struct CircuitBreakerConfig {
    failure_threshold: usize,
    reset_timeout: Duration,
    on_state_change: Option<StateChangeHook>,
    on_error: Option<ErrorHook>,
}

impl CircuitBreakerConfig {
    pub fn failure_threshold(mut self, threshold: usize) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Invoked with `(from, to)` on every real state change.
    pub fn on_state_change<F>(mut self, hook: F) -> Self
    where
        F: Fn(CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Arc::new(hook));
        self
    }

    /// Invoked with the raw error of every failed call.
    pub fn on_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&dyn fmt::Display) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for CircuitBreakerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerConfig")
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("on_state_change", &self.on_state_change.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: usize,
    consecutive_successes: usize,
    last_failure_at: Option<Instant>,
}

type Transition = Option<(CircuitState, CircuitState)>;

impl BreakerState {
    fn transition(&mut self, next: CircuitState) -> Transition {
        if self.state == next {
            return None;
        }
        let previous = self.state;
        self.state = next;
        self.consecutive_failures = 0;
        self.consecutive_successes = 0;
        Some((previous, next))
    }
}

/// Cloneable handle; clones share the same state.
#[derive(Clone)]
pub struct CircuitBreaker {
    state: Arc<Mutex<BreakerState>>,
    failure_threshold: usize,
    reset_timeout: Duration,
    on_state_change: Option<StateChangeHook>,
    on_error: Option<ErrorHook>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.get_state())
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .finish()
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let failure_threshold = if config.failure_threshold == 0 {
            DEFAULT_FAILURE_THRESHOLD
        } else {
            config.failure_threshold
        };
        let reset_timeout = if config.reset_timeout.is_zero() {
            DEFAULT_RESET_TIMEOUT
        } else {
            config.reset_timeout
        };

        Self {
            state: Arc::new(Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
            })),
            failure_threshold,
            reset_timeout,
            on_state_change: config.on_state_change,
            on_error: config.on_error,
        }
    }

    pub fn failure_threshold(&self) -> usize {
        self.failure_threshold
    }

    pub fn reset_timeout(&self) -> Duration {
        self.reset_timeout
    }

    pub fn get_state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let guard = self.lock();
        CircuitBreakerSnapshot {
            state: guard.state,
            consecutive_failures: guard.consecutive_failures,
            consecutive_successes: guard.consecutive_successes,
            last_failure_at: guard.last_failure_at,
        }
    }

    /// Runs `operation` if the breaker admits it and records the outcome.
    /// The operation's error is handed back unchanged inside
    /// [`CircuitBreakerError::Operation`].
    pub async fn execute<T, E, F, Fut>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::Open);
        }

        let outcome = operation().await;
        self.record(&outcome);
        outcome.map_err(CircuitBreakerError::Operation)
    }

    /// Blocking counterpart of [`CircuitBreaker::execute`].
    pub fn call<T, E, F>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        if !self.allow_request() {
            return Err(CircuitBreakerError::Open);
        }

        let outcome = operation();
        self.record(&outcome);
        outcome.map_err(CircuitBreakerError::Operation)
    }

    fn allow_request(&self) -> bool {
        let (admitted, transition) = {
            let mut guard = self.lock();
            match guard.state {
                CircuitState::Closed | CircuitState::HalfOpen => (true, None),
                CircuitState::Open => {
                    let cooled_down = guard
                        .last_failure_at
                        .map_or(true, |at| at.elapsed() > self.reset_timeout);
                    if cooled_down {
                        (true, guard.transition(CircuitState::HalfOpen))
                    } else {
                        (false, None)
                    }
                }
            }
        };

        self.notify_transition(transition);
        if admitted {
            tracing::trace!(breaker_state = %self.get_state(), "circuit breaker admitted call");
        } else {
            tracing::debug!("circuit breaker open; rejecting call");
        }
        admitted
    }

    fn record<T, E: fmt::Display>(&self, outcome: &Result<T, E>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(err) => self.record_failure(err),
        }
    }

    fn record_success(&self) {
        let transition = {
            let mut guard = self.lock();
            match guard.state {
                CircuitState::HalfOpen => {
                    guard.consecutive_successes += 1;
                    if guard.consecutive_successes >= HALF_OPEN_SUCCESS_THRESHOLD {
                        guard.transition(CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Closed => {
                    guard.consecutive_failures = 0;
                    None
                }
                CircuitState::Open => None,
            }
        };

        self.notify_transition(transition);
    }

    fn record_failure(&self, err: &dyn fmt::Display) {
        let transition = {
            let mut guard = self.lock();
            guard.consecutive_failures = guard.consecutive_failures.saturating_add(1);
            guard.last_failure_at = Some(Instant::now());

            match guard.state {
                CircuitState::Closed if guard.consecutive_failures >= self.failure_threshold => {
                    guard.transition(CircuitState::Open)
                }
                CircuitState::HalfOpen => guard.transition(CircuitState::Open),
                _ => None,
            }
        };

        self.notify_transition(transition);
        if let Some(hook) = &self.on_error {
            hook(err);
        }
    }

    // Hooks run after the lock is released so they may call back into the breaker.
    fn notify_transition(&self, transition: Transition) {
        let Some((previous, next)) = transition else {
            return;
        };

        match next {
            CircuitState::Closed => {
                tracing::info!(previous = %previous, next = %next, "circuit breaker state changed")
            }
            _ => tracing::warn!(previous = %previous, next = %next, "circuit breaker state changed"),
        }

        if let Some(hook) = &self.on_state_change {
            hook(previous, next);
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
