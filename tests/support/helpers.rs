use std::future::Future;
use std::time::Duration;

use anyhow::{bail, Result};
use chainward::{ProcessorConfig, RetryPolicy, WorkResult};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};

pub fn init_tracing() {
    chainward::init_tracing();
}

/// Retry schedule short enough for tests but long enough to cross a breaker trip.
pub fn fast_retry_policy() -> RetryPolicy {
    RetryPolicy::new(
        Duration::from_secs(2),
        Duration::from_millis(5),
        Duration::from_millis(20),
        Duration::from_millis(5),
    )
}

pub fn retrying_config(capacity: usize, patterns: &[&str]) -> Result<ProcessorConfig> {
    patterns
        .iter()
        .fold(
            ProcessorConfig::builder()
                .queue_capacity(capacity)
                .item_timeout(Duration::from_secs(3))
                .retry_policy(fast_retry_policy()),
            |builder, pattern| builder.non_retriable_pattern(*pattern),
        )
        .build()
}

/// Reads results until the processor closes its output queue.
pub async fn drain_results<R>(rx: &mut mpsc::Receiver<WorkResult<R>>) -> Result<Vec<WorkResult<R>>> {
    let mut results = Vec::new();
    loop {
        match timeout(Duration::from_secs(5), rx.recv()).await {
            Ok(Some(result)) => results.push(result),
            Ok(None) => return Ok(results),
            Err(_) => bail!("output queue did not close; got {} results", results.len()),
        }
    }
}

pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + limit;
    loop {
        if condition().await {
            return Ok(());
        }
        if Instant::now() >= deadline {
            bail!("condition not met within {:?}", limit);
        }
        sleep(Duration::from_millis(5)).await;
    }
}
