//! Two-tier keyed cache with a freshness policy
//!
//! - **Process tier**: in-memory map, lost when the process exits
//! - **Durable tier**: [`DurableStore`] holding JSON blobs, read lazily per key
//!   and written on every successful fetch; failures never reach callers

pub mod durable;
#[cfg(feature = "rocksdb-store")]
pub mod rocks;
pub mod tiered;

pub use durable::{DurableStore, MemoryStore, NullStore};
#[cfg(feature = "rocksdb-store")]
pub use rocks::RocksStore;
pub use tiered::{StorageLayout, TieredCache};

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Staleness threshold for company analysis payloads
pub const ANALYSIS_STALE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Current time in milliseconds since Unix epoch
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A cached payload plus the time it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub payload: T,
    /// Unix timestamp (milliseconds) of the fetch that produced `payload`
    pub fetched_at: i64,
}

impl<T> CacheEntry<T> {
    /// Stamps the entry with the current time
    pub fn new(payload: T) -> Self {
        Self::at(payload, now_ms())
    }

    pub fn at(payload: T, fetched_at: i64) -> Self {
        Self {
            payload,
            fetched_at,
        }
    }

    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms - self.fetched_at
    }
}

/// Decides whether a cached entry may be served without a network call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessPolicy {
    /// Fresh while younger than the threshold
    StaleAfter(Duration),
    /// Never stale; only an explicit refresh fetches again
    UntilRefreshed,
}

impl FreshnessPolicy {
    pub fn is_fresh_at<T>(&self, entry: &CacheEntry<T>, now_ms: i64) -> bool {
        match self {
            FreshnessPolicy::StaleAfter(threshold) => {
                entry.age_ms(now_ms) < threshold.as_millis() as i64
            }
            FreshnessPolicy::UntilRefreshed => true,
        }
    }

    pub fn is_fresh<T>(&self, entry: &CacheEntry<T>) -> bool {
        self.is_fresh_at(entry, now_ms())
    }
}
