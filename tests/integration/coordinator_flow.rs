use futures::FutureExt;
use investr::cache::{
    now_ms, CacheEntry, FreshnessPolicy, MemoryStore, StorageLayout, TieredCache,
    ANALYSIS_STALE_THRESHOLD,
};
use investr::error::FetchError;
use investr::fetch::{FetchCoordinator, FetchMode, Loaded};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

fn analysis_key(symbol: &str) -> String {
    format!("companyAnalysis:{}", symbol)
}

fn analysis_cache() -> Arc<TieredCache<String>> {
    Arc::new(TieredCache::new(
        Arc::new(MemoryStore::new()),
        StorageLayout::Envelope(analysis_key),
    ))
}

fn policy() -> FreshnessPolicy {
    FreshnessPolicy::StaleAfter(ANALYSIS_STALE_THRESHOLD)
}

/// Coordinator whose fetches return `"<key> #<n>"` and count calls
fn counting_coordinator(
    cache: Arc<TieredCache<String>>,
) -> (FetchCoordinator<String>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let coordinator = FetchCoordinator::new(
        "company analysis",
        cache,
        move |key: String, _mode: FetchMode| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            async move { Ok::<_, FetchError>(format!("{} #{}", key, n)) }
        },
        policy(),
    );
    (coordinator, calls)
}

/// Coordinator whose n-th fetch resolves when the n-th gate is released
fn gated_coordinator(
    cache: Arc<TieredCache<String>>,
    gates: Vec<oneshot::Receiver<String>>,
) -> (Arc<FetchCoordinator<String>>, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let gates = Arc::new(Mutex::new(VecDeque::from(gates)));
    let coordinator = FetchCoordinator::new(
        "company analysis",
        cache,
        move |_key: String, _mode: FetchMode| {
            counter.fetch_add(1, Ordering::SeqCst);
            let gate = gates.lock().unwrap().pop_front().expect("unexpected fetch");
            async move {
                gate.await
                    .map_err(|_| FetchError::Transport("gate dropped".to_string()))
            }
        },
        policy(),
    );
    (Arc::new(coordinator), calls)
}

async fn wait_for_calls(calls: &AtomicUsize, expected: usize) {
    while calls.load(Ordering::SeqCst) < expected {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn test_second_load_within_threshold_is_served_from_cache() {
    let (coordinator, calls) = counting_coordinator(analysis_cache());

    let first = coordinator.load("TCS").await.unwrap();
    let second = coordinator.load("TCS").await.unwrap();

    assert_eq!(first, Loaded::Fetched("TCS #1".to_string()));
    assert_eq!(second, Loaded::Fresh("TCS #1".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_fresh_hit_resolves_without_network() {
    let cache = analysis_cache();
    cache.put_entry("TCS", CacheEntry::at("seeded".to_string(), now_ms()));
    let (coordinator, calls) = counting_coordinator(cache);

    // A fresh hit never suspends, so the future completes on first poll
    let loaded = coordinator
        .load("TCS")
        .now_or_never()
        .expect("fresh hit must not await")
        .unwrap();

    assert_eq!(loaded, Loaded::Fresh("seeded".to_string()));
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stale_entry_returned_then_revalidated_once() {
    let cache = analysis_cache();
    let six_minutes_ago = now_ms() - 6 * 60 * 1000;
    cache.put_entry("TCS", CacheEntry::at("stale".to_string(), six_minutes_ago));
    let (coordinator, calls) = counting_coordinator(cache.clone());
    let mut state = coordinator.subscribe();

    let loaded = coordinator
        .load("TCS")
        .now_or_never()
        .expect("stale hit must not await")
        .unwrap();
    assert_eq!(loaded, Loaded::Stale("stale".to_string()));

    state.wait_for(|s| !s.loading).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let entry = cache.get("TCS").unwrap();
    assert_eq!(entry.payload, "TCS #1");
    assert!(entry.fetched_at > six_minutes_ago);
    assert_eq!(coordinator.state().data.as_deref(), Some("TCS #1"));
}

#[tokio::test]
async fn test_superseded_response_is_never_applied() {
    let (first_tx, first_rx) = oneshot::channel();
    let (second_tx, second_rx) = oneshot::channel();
    let cache = analysis_cache();
    let (coordinator, calls) = gated_coordinator(cache.clone(), vec![first_rx, second_rx]);

    let loader = coordinator.clone();
    let first = tokio::spawn(async move { loader.load("TCS").await });
    wait_for_calls(&calls, 1).await;

    let loader = coordinator.clone();
    let second = tokio::spawn(async move { loader.load("TCS").await });
    wait_for_calls(&calls, 2).await;

    second_tx.send("newer".to_string()).unwrap();
    assert_eq!(
        second.await.unwrap(),
        Ok(Loaded::Fetched("newer".to_string()))
    );

    assert_eq!(first.await.unwrap(), Err(FetchError::Superseded));
    // The cancelled request dropped its gate; a late answer goes nowhere
    assert!(first_tx.send("older".to_string()).is_err());

    assert_eq!(cache.get("TCS").unwrap().payload, "newer");
    let state = coordinator.state();
    assert_eq!(state.data.as_deref(), Some("newer"));
    assert!(state.error.is_none());
    assert_eq!(coordinator.in_flight(), 0);
}

#[tokio::test]
async fn test_key_change_cancels_previous_key() {
    let (_tcs_tx, tcs_rx) = oneshot::channel();
    let (infy_tx, infy_rx) = oneshot::channel();
    let cache = analysis_cache();
    let (coordinator, calls) = gated_coordinator(cache.clone(), vec![tcs_rx, infy_rx]);

    let loader = coordinator.clone();
    let tcs = tokio::spawn(async move { loader.load("TCS").await });
    wait_for_calls(&calls, 1).await;

    let loader = coordinator.clone();
    let infy = tokio::spawn(async move { loader.load("INFY").await });
    assert_eq!(tcs.await.unwrap(), Err(FetchError::Superseded));

    infy_tx.send("infy thesis".to_string()).unwrap();
    assert!(infy.await.unwrap().is_ok());

    assert!(cache.get("TCS").is_none());
    let state = coordinator.state();
    assert_eq!(state.key.as_deref(), Some("INFY"));
    assert_eq!(state.data.as_deref(), Some("infy thesis"));
}

#[tokio::test]
async fn test_dropped_coordinator_applies_no_late_result() {
    let (gate_tx, gate_rx) = oneshot::channel();
    let cache = analysis_cache();
    cache.put_entry("TCS", CacheEntry::at("stale".to_string(), 0));
    let (coordinator, calls) = gated_coordinator(cache.clone(), vec![gate_rx]);
    let mut state = coordinator.subscribe();

    let loaded = coordinator.load("TCS").await.unwrap();
    assert_eq!(loaded, Loaded::Stale("stale".to_string()));
    wait_for_calls(&calls, 1).await;

    drop(coordinator);
    let _ = gate_tx.send("late".to_string());

    // The channel closes once the background task has let go
    while state.changed().await.is_ok() {}

    let last = state.borrow().clone();
    assert_eq!(last.data.as_deref(), Some("stale"));
    assert_eq!(cache.get("TCS").unwrap().payload, "stale");
    assert_eq!(cache.get("TCS").unwrap().fetched_at, 0);
}

#[tokio::test]
async fn test_consumers_share_cache_not_requests() {
    let cache = analysis_cache();
    let (first, first_calls) = counting_coordinator(cache.clone());
    let (second, second_calls) = counting_coordinator(cache);

    first.load("TCS").await.unwrap();
    let loaded = second.load("TCS").await.unwrap();

    assert_eq!(loaded, Loaded::Fresh("TCS #1".to_string()));
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refresh_ignores_fresh_entry() {
    let cache = analysis_cache();
    cache.put_entry("TCS", CacheEntry::at("seeded".to_string(), now_ms()));
    let (coordinator, calls) = counting_coordinator(cache.clone());

    let refreshed = tokio::time::timeout(Duration::from_secs(5), coordinator.refresh("TCS"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(refreshed, "TCS #1");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("TCS").unwrap().payload, "TCS #1");
}

#[tokio::test]
async fn test_repeated_stale_loads_share_one_revalidation() {
    let (gate_tx, gate_rx) = oneshot::channel();
    let cache = analysis_cache();
    cache.put_entry("TCS", CacheEntry::at("stale".to_string(), 0));
    let (coordinator, calls) = gated_coordinator(cache.clone(), vec![gate_rx]);
    let mut state = coordinator.subscribe();

    for _ in 0..3 {
        let loaded = coordinator.load("TCS").await.unwrap();
        assert_eq!(loaded, Loaded::Stale("stale".to_string()));
        wait_for_calls(&calls, 1).await;
    }
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(coordinator.in_flight(), 1);

    gate_tx.send("revalidated".to_string()).unwrap();
    state.wait_for(|s| !s.loading).await.unwrap();

    assert_eq!(cache.get("TCS").unwrap().payload, "revalidated");
    assert_eq!(coordinator.state().data.as_deref(), Some("revalidated"));
}
