//! Sequence (nonce) tracking for a single signing account.
//!
//! The tracker hands out monotonically increasing sequence numbers and
//! coordinates throttled, timeout-bounded resynchronisation against a remote
//! [`SequenceSource`].

pub mod record;
pub mod tracker;

pub use record::{SequenceFuture, SequenceRecord, SequenceSource};
pub use tracker::{NonceError, NonceTracker};
