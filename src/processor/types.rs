use crate::scope::Scope;
use anyhow::Result;
use futures::future::BoxFuture;
use std::future::Future;
use std::time::{Duration, Instant};

pub type ProcessFuture<R> = BoxFuture<'static, Result<R>>;

/// Unit of work submitted to an [`AsyncProcessor`](crate::AsyncProcessor).
///
/// Ids are chosen by the caller and should be unique; the processor does not
/// enforce it.
#[derive(Debug, Clone)]
pub struct WorkItem<T> {
    pub id: String,
    pub payload: T,
    pub created_at: Instant,
}

impl<T> WorkItem<T> {
    pub fn new(id: impl Into<String>, payload: T) -> Self {
        Self {
            id: id.into(),
            payload,
            created_at: Instant::now(),
        }
    }
}

/// Outcome of one processed item, paired with the originating item's id.
#[derive(Debug)]
pub struct WorkResult<R> {
    pub id: String,
    pub outcome: Result<R>,
    pub elapsed: Duration,
}

impl<R> WorkResult<R> {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn value(&self) -> Option<&R> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        self.outcome.as_ref().err()
    }
}

/// Failures produced by the processor itself rather than by `process`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessorError {
    #[error("request processor panicked: {0}")]
    Panicked(String),
    #[error("processor stopped before it was started")]
    NotStarted,
}

/// Processing logic run by the worker.
///
/// With a retry policy configured, `process` may run several times for the
/// same item, so it must be safe to repeat.
pub trait RequestProcessor<T, R>: Send + Sync + 'static {
    fn process(&self, scope: Scope, item: WorkItem<T>) -> ProcessFuture<R>;
}

/// Adapter that turns a closure into a [`RequestProcessor`].
pub struct FnProcessor<F> {
    process_fn: F,
}

impl<F> FnProcessor<F> {
    pub fn new(process_fn: F) -> Self {
        Self { process_fn }
    }
}

impl<T, R, F, Fut> RequestProcessor<T, R> for FnProcessor<F>
where
    F: Fn(Scope, WorkItem<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
{
    fn process(&self, scope: Scope, item: WorkItem<T>) -> ProcessFuture<R> {
        Box::pin((self.process_fn)(scope, item))
    }
}
