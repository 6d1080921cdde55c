use std::sync::Arc;
use std::time::Duration;

use crate::support::{
    helpers::{drain_results, init_tracing, retrying_config, wait_until},
    mock_chain::MockChain,
};
use anyhow::Result;
use chainward::{
    AsyncProcessor, NonceError, NonceTracker, NonceTrackerConfig, Scope, ScopeError, WorkItem,
};
use tokio::time::Instant;

#[tokio::test]
async fn sequence_mismatch_triggers_resync() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(9, 10);
    let config = NonceTrackerConfig::new(Duration::from_millis(20), Duration::from_millis(500))?;
    let tracker = Arc::new(
        NonceTracker::with_initial_refetch(&Scope::new(), chain.source(), config).await?,
    );

    // Another signer spends five sequences after our initial fetch.
    chain.advance(5);

    let mut processor = AsyncProcessor::with_fn(retrying_config(4, &[])?, {
        let (tracker, chain) = (tracker.clone(), chain.clone());
        move |scope: Scope, _item: WorkItem<&'static str>| {
            let (tracker, chain) = (tracker.clone(), chain.clone());
            async move {
                let record = tracker.increment_and_get().await;
                let outcome: Result<u64> = match chain.broadcast(record.sequence) {
                    Ok(sequence) => Ok(sequence),
                    Err(err) if err.to_string().contains("sequence mismatch") => {
                        let fresh = tracker.force_refetch(&scope).await?;
                        chain.broadcast(fresh.sequence)
                    }
                    Err(err) => Err(err),
                };
                outcome
            }
        }
    });
    let mut rx = processor.results().expect("results available");
    processor.start()?;

    for id in ["a", "b", "c"] {
        assert!(processor.submit(WorkItem::new(id, "payload")));
    }
    processor.stop().await;

    let results = drain_results(&mut rx).await?;
    let sequences: Vec<u64> = results.iter().filter_map(|r| r.value().copied()).collect();
    assert_eq!(sequences, [15, 16, 17]);
    assert_eq!(chain.sequence(), 18);
    assert_eq!(tracker.current_nonce().await.sequence, 17);
    assert_eq!(tracker.current_nonce().await.account_number, 9);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refetches_hit_the_source_once() -> Result<()> {
    let chain = MockChain::new(1, 40);
    let config = NonceTrackerConfig::new(Duration::from_secs(60), Duration::from_secs(1))?;
    let tracker = Arc::new(NonceTracker::new(chain.source(), config));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let tracker = tracker.clone();
        handles.push(tokio::spawn(async move {
            tracker.force_refetch(&Scope::new()).await
        }));
    }

    let mut refreshed = 0;
    let mut throttled = 0;
    for handle in handles {
        match handle.await? {
            Ok(record) => {
                assert_eq!(record.sequence, 40);
                refreshed += 1;
            }
            Err(NonceError::Throttled { interval, .. }) => {
                assert_eq!(interval, Duration::from_secs(60));
                throttled += 1;
            }
            Err(other) => panic!("unexpected refetch error: {other}"),
        }
    }

    assert_eq!(refreshed, 1);
    assert_eq!(throttled, 7);
    assert_eq!(chain.fetches(), 1);
    Ok(())
}

#[tokio::test]
async fn slow_source_is_bounded_by_refetch_timeout() -> Result<()> {
    let chain = MockChain::new(1, 5);
    let tracker = NonceTracker::with_initial_refetch(
        &Scope::new(),
        chain.source(),
        NonceTrackerConfig::new(Duration::ZERO, Duration::from_millis(50))?,
    )
    .await?;

    chain.set_fetch_delay(Duration::from_secs(5));
    chain.advance(3);

    let started = Instant::now();
    let err = tracker
        .force_refetch(&Scope::new())
        .await
        .expect_err("fetch should time out");
    assert!(matches!(err, NonceError::Scope(ScopeError::DeadlineExceeded)));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(tracker.current_nonce().await.sequence, 5);

    // Once the source recovers the tracker catches up.
    chain.set_fetch_delay(Duration::ZERO);
    let tracker = &tracker;
    wait_until(Duration::from_secs(1), move || async move {
        tracker.force_refetch(&Scope::new()).await.is_ok()
    })
    .await?;
    assert_eq!(tracker.current_nonce().await.sequence, 8);
    Ok(())
}

#[tokio::test]
async fn initial_refetch_failure_fails_construction() {
    let chain = MockChain::new(1, 5);
    chain.set_outage(true);

    let err = NonceTracker::with_initial_refetch(
        &Scope::new(),
        chain.source(),
        NonceTrackerConfig::default(),
    )
    .await
    .expect_err("outage should fail construction");
    assert!(format!("{err:#}").contains("connection refused"));
}
