//! Cancellable scopes threaded through every suspending call.
//!
//! A [`Scope`] pairs a [`CancellationToken`] with an optional deadline. Child
//! scopes inherit both: cancelling a parent cancels its children, and a child
//! deadline can only tighten the one it inherited.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

/// Terminal signal of a [`Scope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ScopeError {
    #[error("scope cancelled")]
    Cancelled,
    #[error("scope deadline exceeded")]
    DeadlineExceeded,
}

/// Deadline plus cancellation token.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Scope {
    /// Creates a root scope with no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing token, e.g. a process-wide shutdown token.
    pub fn from_token(token: CancellationToken) -> Self {
        Self {
            token,
            deadline: None,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Child scope cancelled together with `self`, sharing its deadline.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Child scope whose deadline is at most `timeout` from now.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline, candidate) {
            (Some(inherited), Some(candidate)) => Some(inherited.min(candidate)),
            (Some(inherited), None) => Some(inherited),
            (None, candidate) => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Cancels this scope and every scope derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns the terminal signal if the scope already ended. Cancellation
    /// takes precedence over an elapsed deadline.
    pub fn error(&self) -> Option<ScopeError> {
        if self.token.is_cancelled() {
            return Some(ScopeError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ScopeError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the scope is cancelled or its deadline passes.
    pub async fn done(&self) -> ScopeError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    biased;
                    _ = self.token.cancelled() => ScopeError::Cancelled,
                    _ = sleep_until(deadline) => ScopeError::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                ScopeError::Cancelled
            }
        }
    }

    /// Drives `future` until it completes or the scope ends, whichever comes first.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, ScopeError> {
        if let Some(err) = self.error() {
            return Err(err);
        }

        tokio::select! {
            biased;
            reason = self.done() => Err(reason),
            output = future => Ok(output),
        }
    }
}
