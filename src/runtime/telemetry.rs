use crate::scope::Scope;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing_subscriber::EnvFilter;

/// Reporter interval applied by `ProcessorConfigBuilder::with_default_metrics`.
pub const DEFAULT_METRICS_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_LOG_FILTER: &str = "info";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Installs a `fmt` subscriber filtered by `RUST_LOG` (default `info`).
///
/// Only the first call does anything. An application that already installed
/// its own global subscriber keeps it.
pub fn init_tracing() {
    TRACING_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
        let installed = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init();
        if installed.is_err() {
            tracing::debug!("global tracing subscriber already set; keeping it");
        }
    });
}

/// Whole milliseconds for log fields, saturating at `u64::MAX`.
pub(crate) fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Rolling counters kept by an [`AsyncProcessor`](crate::AsyncProcessor).
#[derive(Default, Debug)]
pub struct ProcessorTelemetry {
    submitted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    timed_out: AtomicU64,
    discarded: AtomicU64,
}

impl ProcessorTelemetry {
    pub fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// A timeout also counts as a failure.
    pub fn record_timeout(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProcessorTelemetrySnapshot {
        ProcessorTelemetrySnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ProcessorTelemetrySnapshot {
    pub submitted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub discarded: u64,
}

impl ProcessorTelemetrySnapshot {
    pub fn processed(&self) -> u64 {
        self.succeeded.saturating_add(self.failed)
    }
}

/// Spawns a background task that periodically logs throughput, queue depth, and
/// outcome counters until `scope` ends.
pub fn spawn_metrics_reporter<D>(
    telemetry: Arc<ProcessorTelemetry>,
    queue_depth: D,
    scope: Scope,
    interval: Duration,
) -> JoinHandle<()>
where
    D: Fn() -> usize + Send + 'static,
{
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut last_snapshot = telemetry.snapshot();
        let mut last_tick = Instant::now();

        loop {
            tokio::select! {
                _ = scope.done() => {
                    tracing::debug!(target: "chainward::metrics", "metrics reporter shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    let current = telemetry.snapshot();
                    let processed_delta = current.processed().saturating_sub(last_snapshot.processed());
                    let elapsed = last_tick.elapsed().as_secs_f64();
                    let throughput = if elapsed <= f64::EPSILON {
                        0.0
                    } else {
                        processed_delta as f64 / elapsed
                    };

                    tracing::info!(
                        target: "chainward::metrics",
                        throughput = format!("{throughput:.2}"),
                        queue_depth = queue_depth(),
                        submitted = current.submitted,
                        rejected = current.rejected,
                        succeeded = current.succeeded,
                        failed = current.failed,
                        timed_out = current.timed_out,
                        discarded = current.discarded,
                        "processor metrics snapshot"
                    );

                    last_snapshot = current;
                    last_tick = Instant::now();
                }
            }
        }
    })
}
