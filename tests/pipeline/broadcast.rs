use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::support::{
    helpers::{drain_results, init_tracing, retrying_config},
    mock_chain::MockChain,
};
use anyhow::Result;
use chainward::{
    AsyncProcessor, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitOpen,
    CircuitState, NonceTracker, NonceTrackerConfig, Scope, WorkItem,
};

type Transitions = Arc<Mutex<Vec<(CircuitState, CircuitState)>>>;

fn recording_breaker(threshold: usize) -> (CircuitBreaker, Transitions) {
    let transitions: Transitions = Arc::default();
    let sink = transitions.clone();
    let breaker = CircuitBreaker::new(
        CircuitBreakerConfig::default()
            .failure_threshold(threshold)
            .reset_timeout(Duration::from_secs(60))
            .on_state_change(move |from, to| {
                sink.lock().expect("transitions lock").push((from, to));
            }),
    );
    (breaker, transitions)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn broadcasts_in_order_through_tracker_and_breaker() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3, 7);
    let tracker = Arc::new(
        NonceTracker::with_initial_refetch(
            &Scope::new(),
            chain.source(),
            NonceTrackerConfig::default(),
        )
        .await?,
    );
    let (breaker, transitions) = recording_breaker(3);

    let mut processor = AsyncProcessor::with_fn(
        retrying_config(8, &["circuit breaker is open", "sequence mismatch"])?,
        {
            let (tracker, breaker, chain) = (tracker.clone(), breaker.clone(), chain.clone());
            move |_scope: Scope, _item: WorkItem<String>| {
                let (tracker, breaker, chain) = (tracker.clone(), breaker.clone(), chain.clone());
                async move {
                    let record = tracker.increment_and_get().await;
                    breaker
                        .execute(|| async { chain.broadcast(record.sequence) })
                        .await
                        .map_err(CircuitBreakerError::into_anyhow)
                }
            }
        },
    );
    let mut rx = processor.results().expect("results available");
    processor.start()?;

    for n in 0..5 {
        assert!(processor.submit(WorkItem::new(format!("tx-{n}"), format!("transfer {n}"))));
    }
    processor.stop().await;

    let results = drain_results(&mut rx).await?;
    let sequences: Vec<u64> = results.iter().filter_map(|r| r.value().copied()).collect();
    assert_eq!(sequences, [7, 8, 9, 10, 11]);
    assert_eq!(chain.sequence(), 12);
    assert_eq!(tracker.current_nonce().await.sequence, 11);
    assert_eq!(breaker.get_state(), CircuitState::Closed);
    assert!(transitions.lock().expect("transitions lock").is_empty());
    Ok(())
}

#[tokio::test]
async fn outage_opens_breaker_and_stops_retrying() -> Result<()> {
    init_tracing();
    let chain = MockChain::new(3, 1);
    chain.set_outage(true);
    let (breaker, transitions) = recording_breaker(2);

    let mut processor = AsyncProcessor::with_fn(retrying_config(2, &["circuit breaker is open"])?, {
        let (breaker, chain) = (breaker.clone(), chain.clone());
        move |_scope: Scope, item: WorkItem<u64>| {
            let (breaker, chain) = (breaker.clone(), chain.clone());
            async move {
                breaker
                    .execute(|| async { chain.broadcast(item.payload) })
                    .await
                    .map_err(CircuitBreakerError::into_anyhow)
            }
        }
    });
    let mut rx = processor.results().expect("results available");
    processor.start()?;

    assert!(processor.submit(WorkItem::new("tx", 1)));
    processor.stop().await;

    let results = drain_results(&mut rx).await?;
    assert_eq!(results.len(), 1);
    let err = results[0].error().expect("breaker rejection");
    assert!(err.downcast_ref::<CircuitOpen>().is_some(), "unexpected error: {err:#}");

    // Two failed attempts trip the breaker; the third is rejected before it
    // reaches the chain.
    assert_eq!(chain.broadcasts(), 2);
    assert_eq!(breaker.get_state(), CircuitState::Open);
    assert_eq!(
        *transitions.lock().expect("transitions lock"),
        [(CircuitState::Closed, CircuitState::Open)]
    );
    Ok(())
}
