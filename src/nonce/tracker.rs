use crate::nonce::record::{SequenceRecord, SequenceSource};
use crate::runtime::config::NonceTrackerConfig;
use crate::runtime::telemetry::duration_to_millis;
use crate::scope::{Scope, ScopeError};
use anyhow::{anyhow, Context, Result};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Failure of a tracker refetch.
#[derive(Debug, thiserror::Error)]
pub enum NonceError {
    /// A refetch already happened within the configured interval; retry later.
    #[error(
        "failed to force refetch: {elapsed:?} since last refetch, force refetch interval {interval:?}"
    )]
    Throttled { elapsed: Duration, interval: Duration },
    /// The refetch timeout elapsed or the caller's scope ended first.
    #[error(transparent)]
    Scope(#[from] ScopeError),
    /// The remote source itself failed.
    #[error(transparent)]
    Fetch(anyhow::Error),
}

#[derive(Debug)]
struct TrackerState {
    record: SequenceRecord,
    last_refetch_at: Option<Instant>,
    first_increment: bool,
}

/// Lock-guarded sequence tracker for one account.
///
/// Construction performs no fetch; call [`NonceTracker::force_refetch`] (or
/// use [`NonceTracker::with_initial_refetch`]) before handing out sequences.
pub struct NonceTracker {
    state: Mutex<TrackerState>,
    source: Arc<dyn SequenceSource>,
    config: NonceTrackerConfig,
}

impl fmt::Debug for NonceTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NonceTracker")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl NonceTracker {
    pub fn new<S: SequenceSource>(source: S, config: NonceTrackerConfig) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                record: SequenceRecord::default(),
                last_refetch_at: None,
                first_increment: true,
            }),
            source: Arc::new(source),
            config,
        }
    }

    /// Builds a tracker and performs the initial refetch.
    pub async fn with_initial_refetch<S: SequenceSource>(
        scope: &Scope,
        source: S,
        config: NonceTrackerConfig,
    ) -> Result<Self> {
        let tracker = Self::new(source, config);
        tracker
            .force_refetch(scope)
            .await
            .context("failed to force refetch sequence for new tracker")?;
        Ok(tracker)
    }

    pub fn config(&self) -> &NonceTrackerConfig {
        &self.config
    }

    /// Returns the next sequence to use. The first call after construction
    /// returns the stored record as-is; every later call increments it first.
    pub async fn increment_and_get(&self) -> SequenceRecord {
        let mut state = self.state.lock().await;
        if state.first_increment {
            state.first_increment = false;
        } else {
            state.record.sequence = state.record.sequence.saturating_add(1);
        }
        tracing::trace!(sequence = state.record.sequence, "handing out sequence");
        state.record
    }

    /// Resynchronises the stored record from the remote source.
    ///
    /// Fails with [`NonceError::Throttled`] when the previous successful
    /// refetch is not older than the configured interval. Otherwise the fetch
    /// races the refetch timeout and `scope`; on any failure the stored record
    /// is left untouched.
    pub async fn force_refetch(&self, scope: &Scope) -> Result<SequenceRecord, NonceError> {
        let mut state = self.state.lock().await;

        let interval = self.config.force_refetch_interval();
        if let Some(last_refetch_at) = state.last_refetch_at {
            let elapsed = last_refetch_at.elapsed();
            if elapsed <= interval {
                tracing::warn!(
                    elapsed_ms = duration_to_millis(elapsed),
                    interval_ms = duration_to_millis(interval),
                    "sequence refetch throttled"
                );
                return Err(NonceError::Throttled { elapsed, interval });
            }
        }

        let record = self.refetch(scope).await?;
        state.record = record;
        state.last_refetch_at = Some(Instant::now());

        tracing::debug!(
            sequence = record.sequence,
            account_number = record.account_number,
            "sequence refetched"
        );
        Ok(record)
    }

    // Caller holds the state lock.
    async fn refetch(&self, scope: &Scope) -> Result<SequenceRecord, NonceError> {
        let fetch_scope = scope.with_timeout(self.config.refetch_timeout());
        let source = self.source.clone();
        let task_scope = fetch_scope.clone();
        let mut handle = tokio::spawn(async move { source.fetch(task_scope).await });

        let joined = tokio::select! {
            biased;
            reason = fetch_scope.done() => {
                fetch_scope.cancel();
                handle.abort();
                tracing::warn!(error = %reason, "sequence refetch did not complete");
                return Err(reason.into());
            }
            joined = &mut handle => joined,
        };

        match joined {
            Ok(Ok(record)) => Ok(record),
            Ok(Err(err)) => Err(NonceError::Fetch(err)),
            Err(join_err) => Err(NonceError::Fetch(anyhow!(
                "sequence fetch task failed: {join_err}"
            ))),
        }
    }

    /// Time of the last successful refetch, `None` before the first one.
    pub async fn last_refetch_time(&self) -> Option<Instant> {
        self.state.lock().await.last_refetch_at
    }

    /// Overwrites the stored sequence number, bypassing refetch throttling.
    /// The account number and the first-increment flag are unchanged.
    pub async fn force_update_nonce(&self, sequence: u64) {
        let mut state = self.state.lock().await;
        tracing::debug!(
            previous = state.record.sequence,
            sequence,
            "sequence updated out-of-band"
        );
        state.record.sequence = sequence;
    }

    pub async fn current_nonce(&self) -> SequenceRecord {
        self.state.lock().await.record
    }
}
