use investr::cache::{
    DurableStore, FreshnessPolicy, MemoryStore, StorageLayout, TieredCache, ANALYSIS_STALE_THRESHOLD,
};
use investr::error::{FetchError, StorageError};
use investr::fetch::{FetchCoordinator, FetchMode, Loaded};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Durable tier whose writes fail as if the storage quota were exhausted
struct QuotaExceeded {
    writes: AtomicUsize,
}

impl DurableStore for QuotaExceeded {
    fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn write(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Err(StorageError::Backend("QuotaExceededError".to_string()))
    }

    fn remove(&self, _key: &str) -> Result<(), StorageError> {
        Ok(())
    }
}

fn analysis_key(symbol: &str) -> String {
    format!("companyAnalysis:{}", symbol)
}

fn thesis_coordinator(cache: Arc<TieredCache<String>>) -> FetchCoordinator<String> {
    FetchCoordinator::new(
        "company analysis",
        cache,
        |symbol: String, _mode: FetchMode| async move {
            Ok::<_, FetchError>(format!("thesis for {}", symbol))
        },
        FreshnessPolicy::StaleAfter(ANALYSIS_STALE_THRESHOLD),
    )
}

#[tokio::test]
async fn test_failing_durable_write_does_not_reach_caller() {
    let store = Arc::new(QuotaExceeded {
        writes: AtomicUsize::new(0),
    });
    let cache = Arc::new(TieredCache::new(store.clone(), StorageLayout::Envelope(analysis_key)));

    let entry = cache.set("TCS", "direct".to_string());
    assert_eq!(cache.get("TCS"), Some(entry));

    let coordinator = thesis_coordinator(cache.clone());
    cache.invalidate("TCS");
    assert!(matches!(coordinator.load("TCS").await, Ok(Loaded::Fetched(_))));
    assert!(matches!(coordinator.load("TCS").await, Ok(Loaded::Fresh(_))));
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_new_process_reads_durable_tier() {
    let store = Arc::new(MemoryStore::new());

    {
        let cache = Arc::new(TieredCache::new(store.clone(), StorageLayout::Envelope(analysis_key)));
        thesis_coordinator(cache).load("TCS").await.unwrap();
    }
    assert!(store.read("companyAnalysis:TCS").unwrap().is_some());

    // Empty process tier over the same durable tier
    let cache = Arc::new(TieredCache::new(store.clone(), StorageLayout::Envelope(analysis_key)));
    let coordinator = thesis_coordinator(cache);
    assert_eq!(
        coordinator.load("TCS").await.unwrap(),
        Loaded::Fresh("thesis for TCS".to_string())
    );
}

#[cfg(feature = "rocksdb-store")]
#[tokio::test]
async fn test_rocksdb_tier_survives_reopen() {
    use investr::cache::{now_ms, CacheEntry, RocksStore};

    let dir = tempfile::TempDir::new().unwrap();
    let fetched_at = now_ms();
    {
        let store: Arc<dyn DurableStore> = Arc::new(RocksStore::open(dir.path()).unwrap());
        let cache: TieredCache<String> = TieredCache::new(store, StorageLayout::Envelope(analysis_key));
        cache.put_entry("INFY", CacheEntry::at("hold".to_string(), fetched_at));
    }

    let store: Arc<dyn DurableStore> = Arc::new(RocksStore::open(dir.path()).unwrap());
    let cache = Arc::new(TieredCache::new(store, StorageLayout::Envelope(analysis_key)));
    let loaded = thesis_coordinator(cache).load("INFY").await.unwrap();
    assert_eq!(loaded, Loaded::Fresh("hold".to_string()));
}
