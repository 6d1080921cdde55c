use super::types::{ProcessorError, RequestProcessor, WorkItem, WorkResult};
use crate::resilience::backoff::retry_with_backoff;
use crate::runtime::config::ProcessorConfig;
use crate::runtime::telemetry::{duration_to_millis, ProcessorTelemetry};
use crate::scope::{Scope, ScopeError};
use anyhow::Result;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub(super) struct WorkerParams<T, R> {
    pub processor: Arc<dyn RequestProcessor<T, R>>,
    pub config: ProcessorConfig,
    pub telemetry: Arc<ProcessorTelemetry>,
    pub input: mpsc::Receiver<WorkItem<T>>,
    pub output: mpsc::Sender<WorkResult<R>>,
    pub lifetime: Scope,
    pub drain: CancellationToken,
}

/// The single consumer of the input queue.
pub(super) struct Worker<T, R> {
    processor: Arc<dyn RequestProcessor<T, R>>,
    config: ProcessorConfig,
    telemetry: Arc<ProcessorTelemetry>,
    input: mpsc::Receiver<WorkItem<T>>,
    output: mpsc::Sender<WorkResult<R>>,
    lifetime: Scope,
    drain: CancellationToken,
}

impl<T, R> Worker<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub(super) fn new(params: WorkerParams<T, R>) -> Self {
        let WorkerParams {
            processor,
            config,
            telemetry,
            input,
            output,
            lifetime,
            drain,
        } = params;

        Self {
            processor,
            config,
            telemetry,
            input,
            output,
            lifetime,
            drain,
        }
    }

    /// Processes items until `drain` fires, then closes the input queue and
    /// works through whatever was already admitted before returning.
    pub(super) async fn run(mut self) {
        tracing::info!(
            queue_capacity = self.config.queue_capacity(),
            "async processor worker started"
        );

        loop {
            let next = tokio::select! {
                biased;
                _ = self.drain.cancelled() => None,
                item = self.input.recv() => item,
            };

            match next {
                Some(item) => self.process(item).await,
                None => break,
            }
        }

        self.input.close();
        let mut drained = 0usize;
        while let Some(item) = self.input.recv().await {
            drained += 1;
            self.process(item).await;
        }

        tracing::info!(drained, "async processor worker stopped");
    }

    async fn process(&self, item: WorkItem<T>) {
        let started = Instant::now();
        let id = item.id.clone();
        tracing::trace!(
            id = %id,
            queue_wait_ms = duration_to_millis(item.created_at.elapsed()),
            "processing item"
        );

        let scope = self.lifetime.with_timeout(self.config.item_timeout());
        let outcome = match self.config.retry_policy() {
            Some(policy) => {
                retry_with_backoff(
                    &scope,
                    policy,
                    |attempt_scope| self.attempt(attempt_scope, item.clone()),
                    self.config.non_retriable_patterns(),
                )
                .await
            }
            None => match scope.run(self.attempt(scope.clone(), item)).await {
                Ok(outcome) => outcome,
                Err(reason) => Err(reason.into()),
            },
        };

        let elapsed = started.elapsed();
        self.record(&id, &outcome, elapsed);
        self.deliver(WorkResult {
            id,
            outcome,
            elapsed,
        })
        .await;
    }

    async fn attempt(&self, scope: Scope, item: WorkItem<T>) -> Result<R> {
        let processor = &self.processor;
        let outcome = AssertUnwindSafe(async move { processor.process(scope, item).await })
            .catch_unwind()
            .await;

        match outcome {
            Ok(outcome) => outcome,
            Err(panic_payload) => {
                let panic_msg = panic_message(panic_payload.as_ref());
                tracing::error!(panic = %panic_msg, "request processor panicked");
                Err(ProcessorError::Panicked(panic_msg).into())
            }
        }
    }

    fn record(&self, id: &str, outcome: &Result<R>, elapsed: Duration) {
        let elapsed_ms = duration_to_millis(elapsed);
        match outcome {
            Ok(_) => {
                self.telemetry.record_success();
                tracing::debug!(id, elapsed_ms, "item processed");
            }
            Err(err) => {
                if err.downcast_ref::<ScopeError>() == Some(&ScopeError::DeadlineExceeded) {
                    self.telemetry.record_timeout();
                } else {
                    self.telemetry.record_failure();
                }
                tracing::debug!(id, elapsed_ms, error = %err, "item failed");
            }
        }
    }

    // Waits for room in the output queue until shutdown begins. After that a
    // result that does not fit is dropped so `stop` never waits on a reader.
    async fn deliver(&self, result: WorkResult<R>) {
        let id = result.id.clone();
        let delivered = tokio::select! {
            biased;
            sent = self.output.send(result) => sent.is_ok(),
            _ = self.lifetime.token().cancelled() => false,
            _ = self.drain.cancelled() => false,
        };

        if !delivered {
            self.telemetry.record_discarded();
            tracing::debug!(id = %id, "output queue unavailable during shutdown; result discarded");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
