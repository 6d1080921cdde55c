use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use chainward::{Scope, SequenceRecord, SequenceSource};

/// In-memory account on a fake chain: accepts a transaction only when it
/// carries the expected sequence.
#[derive(Clone)]
pub struct MockChain {
    inner: Arc<ChainState>,
}

struct ChainState {
    account_number: u64,
    sequence: AtomicU64,
    outage: AtomicBool,
    fetch_delay_ms: AtomicU64,
    fetches: AtomicUsize,
    broadcasts: AtomicUsize,
}

impl MockChain {
    pub fn new(account_number: u64, sequence: u64) -> Self {
        Self {
            inner: Arc::new(ChainState {
                account_number,
                sequence: AtomicU64::new(sequence),
                outage: AtomicBool::new(false),
                fetch_delay_ms: AtomicU64::new(0),
                fetches: AtomicUsize::new(0),
                broadcasts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_outage(&self, down: bool) {
        self.inner.outage.store(down, Ordering::SeqCst);
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        self.inner
            .fetch_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// Simulates another signer spending sequences behind our back.
    pub fn advance(&self, by: u64) {
        self.inner.sequence.fetch_add(by, Ordering::SeqCst);
    }

    pub fn sequence(&self) -> u64 {
        self.inner.sequence.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.inner.fetches.load(Ordering::SeqCst)
    }

    pub fn broadcasts(&self) -> usize {
        self.inner.broadcasts.load(Ordering::SeqCst)
    }

    pub fn broadcast(&self, sequence: u64) -> Result<u64> {
        self.inner.broadcasts.fetch_add(1, Ordering::SeqCst);
        if self.inner.outage.load(Ordering::SeqCst) {
            bail!("connection refused");
        }

        let expected = self.sequence();
        if sequence != expected {
            bail!("account sequence mismatch, expected {expected}, got {sequence}");
        }
        self.inner.sequence.fetch_add(1, Ordering::SeqCst);
        Ok(sequence)
    }

    pub async fn query(&self, scope: Scope) -> Result<SequenceRecord> {
        self.inner.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = Duration::from_millis(self.inner.fetch_delay_ms.load(Ordering::SeqCst));
        if !delay.is_zero() {
            scope.run(tokio::time::sleep(delay)).await?;
        }
        if self.inner.outage.load(Ordering::SeqCst) {
            bail!("connection refused");
        }
        Ok(SequenceRecord::new(self.sequence(), self.inner.account_number))
    }

    pub fn source(&self) -> impl SequenceSource {
        let chain = self.clone();
        move |scope: Scope| {
            let chain = chain.clone();
            async move { chain.query(scope).await }
        }
    }
}
