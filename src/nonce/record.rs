use crate::scope::Scope;
use anyhow::Result;
use core::future::Future;
use core::pin::Pin;

pub type SequenceFuture = Pin<Box<dyn Future<Output = Result<SequenceRecord>> + Send + 'static>>;

/// Next sequence number for an account, paired with its account number.
///
/// Chains without account numbers leave `account_number` at zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SequenceRecord {
    pub sequence: u64,
    pub account_number: u64,
}

impl SequenceRecord {
    pub fn new(sequence: u64, account_number: u64) -> Self {
        Self {
            sequence,
            account_number,
        }
    }
}

/// Remote source of truth for an account's sequence.
///
/// Implementations must return promptly once `scope` ends; the tracker bounds
/// every fetch with its refetch timeout. Closures `Fn(Scope) -> Future` get
/// this trait for free.
pub trait SequenceSource: Send + Sync + 'static {
    fn fetch(&self, scope: Scope) -> SequenceFuture;
}

impl<F, Fut> SequenceSource for F
where
    F: Fn(Scope) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<SequenceRecord>> + Send + 'static,
{
    fn fetch(&self, scope: Scope) -> SequenceFuture {
        Box::pin(self(scope))
    }
}
