use super::types::{FnProcessor, ProcessorError, RequestProcessor, WorkItem, WorkResult};
use super::worker::{Worker, WorkerParams};
use crate::runtime::config::ProcessorConfig;
use crate::runtime::telemetry::{
    spawn_metrics_reporter, ProcessorTelemetry, ProcessorTelemetrySnapshot,
};
use crate::scope::Scope;
use anyhow::{bail, Result};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Bounded queue in front of a single background worker.
///
/// Items are processed one at a time in submission order. Every admitted item
/// yields exactly one [`WorkResult`] on the queue returned by
/// [`results`](Self::results), unless the consumer went away or the processor
/// was [aborted](Self::abort).
pub struct AsyncProcessor<T, R> {
    config: ProcessorConfig,
    processor: Arc<dyn RequestProcessor<T, R>>,
    telemetry: Arc<ProcessorTelemetry>,
    lifetime: Scope,
    drain: CancellationToken,
    reporter_scope: Scope,
    input_tx: mpsc::Sender<WorkItem<T>>,
    input_rx: Option<mpsc::Receiver<WorkItem<T>>>,
    output_tx: Option<mpsc::Sender<WorkResult<R>>>,
    output_rx: Option<mpsc::Receiver<WorkResult<R>>>,
    worker: Option<JoinHandle<()>>,
    reporter: Option<JoinHandle<()>>,
}

impl<T, R> AsyncProcessor<T, R>
where
    T: Clone + Send + Sync + 'static,
    R: Send + 'static,
{
    pub fn new(config: ProcessorConfig, processor: impl RequestProcessor<T, R>) -> Self {
        let capacity = config.queue_capacity();
        let (input_tx, input_rx) = mpsc::channel(capacity);
        let (output_tx, output_rx) = mpsc::channel(capacity);

        Self {
            config,
            processor: Arc::new(processor),
            telemetry: Arc::new(ProcessorTelemetry::default()),
            lifetime: Scope::new(),
            drain: CancellationToken::new(),
            reporter_scope: Scope::new(),
            input_tx,
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            output_rx: Some(output_rx),
            worker: None,
            reporter: None,
        }
    }

    /// Builds a processor around a plain async closure.
    pub fn with_fn<F, Fut>(config: ProcessorConfig, process_fn: F) -> Self
    where
        F: Fn(Scope, WorkItem<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Self::new(config, FnProcessor::new(process_fn))
    }

    /// Launches the worker. Calling it again while running is a no-op; a
    /// stopped processor cannot be restarted.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (Some(input), Some(output)) = (self.input_rx.take(), self.output_tx.take()) else {
            bail!("processor already stopped; create a new one");
        };

        let worker = Worker::new(WorkerParams {
            processor: self.processor.clone(),
            config: self.config.clone(),
            telemetry: self.telemetry.clone(),
            input,
            output,
            lifetime: self.lifetime.clone(),
            drain: self.drain.clone(),
        });
        self.worker = Some(tokio::spawn(worker.run()));

        if let Some(interval) = self.config.metrics_interval() {
            let probe = self.input_tx.clone();
            self.reporter = Some(spawn_metrics_reporter(
                self.telemetry.clone(),
                move || probe.max_capacity().saturating_sub(probe.capacity()),
                self.reporter_scope.clone(),
                interval,
            ));
        }

        Ok(())
    }

    /// Enqueues `item` without waiting. Returns `false` when the queue is full
    /// or the processor is shutting down.
    pub fn submit(&self, item: WorkItem<T>) -> bool {
        if self.drain.is_cancelled() {
            self.telemetry.record_rejected();
            tracing::debug!(id = %item.id, "processor shutting down; item rejected");
            return false;
        }

        match self.input_tx.try_send(item) {
            Ok(()) => {
                self.telemetry.record_submitted();
                true
            }
            Err(TrySendError::Full(item)) => {
                self.telemetry.record_rejected();
                tracing::debug!(id = %item.id, "input queue full; item rejected");
                false
            }
            Err(TrySendError::Closed(item)) => {
                self.telemetry.record_rejected();
                tracing::debug!(id = %item.id, "input queue closed; item rejected");
                false
            }
        }
    }

    /// Hands out the output queue. Only the first call returns it.
    pub fn results(&mut self) -> Option<mpsc::Receiver<WorkResult<R>>> {
        self.output_rx.take()
    }

    /// Stops admitting items, waits until every queued item has been processed,
    /// then closes the output queue.
    pub async fn stop(&mut self) {
        self.drain.cancel();

        if let Some(worker) = self.worker.take() {
            if let Err(err) = worker.await {
                tracing::warn!(error = %err, "async processor worker terminated abnormally");
            }
        } else {
            self.answer_unstarted();
        }

        self.output_tx = None;
        self.reporter_scope.cancel();
        if let Some(reporter) = self.reporter.take() {
            let _ = reporter.await;
        }
    }

    /// Cancels in-flight and queued work. Affected items complete with
    /// [`ScopeError::Cancelled`](crate::ScopeError::Cancelled); results nobody
    /// can receive are discarded. Follow with [`stop`](Self::stop) to wait for
    /// the worker.
    pub fn abort(&self) {
        tracing::warn!("async processor aborted");
        self.lifetime.cancel();
        self.drain.cancel();
    }

    /// Items waiting in the input queue.
    pub fn queue_depth(&self) -> usize {
        self.input_tx
            .max_capacity()
            .saturating_sub(self.input_tx.capacity())
    }

    pub fn telemetry(&self) -> ProcessorTelemetrySnapshot {
        self.telemetry.snapshot()
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    // Without a worker, queued items still get exactly one result each.
    fn answer_unstarted(&mut self) {
        let Some(mut input) = self.input_rx.take() else {
            return;
        };
        input.close();

        let mut answered = 0usize;
        while let Ok(item) = input.try_recv() {
            answered += 1;
            self.telemetry.record_failure();
            let result = WorkResult {
                id: item.id,
                outcome: Err(ProcessorError::NotStarted.into()),
                elapsed: Duration::ZERO,
            };

            let delivered = self
                .output_tx
                .as_ref()
                .is_some_and(|output| output.try_send(result).is_ok());
            if !delivered {
                self.telemetry.record_discarded();
            }
        }

        if answered > 0 {
            tracing::warn!(answered, "processor stopped before start; queued items rejected");
        }
    }
}

impl<T, R> Drop for AsyncProcessor<T, R> {
    fn drop(&mut self) {
        self.drain.cancel();
        self.reporter_scope.cancel();
    }
}
