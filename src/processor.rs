//! Bounded-queue request processing on a single background worker.
//!
//! ```text
//! submit() -> input queue (bounded, try_send) -> worker (one item at a time)
//!          -> [per-item deadline, optional backoff retry] -> output queue
//! ```
//!
//! Items are processed strictly in arrival order with at most one `process`
//! call in flight. `stop()` closes the input queue, lets the worker drain
//! everything already queued, and then closes the output queue.

mod handle;
pub mod types;
mod worker;

pub use handle::AsyncProcessor;
pub use types::{FnProcessor, ProcessFuture, ProcessorError, RequestProcessor, WorkItem, WorkResult};
