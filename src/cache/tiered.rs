//! Process-lifetime + durable cache tiers behind one contract

use super::durable::DurableStore;
use super::CacheEntry;
use crate::error::StorageError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

/// How a resource key maps onto durable-tier keys
#[derive(Debug, Clone, Copy)]
pub enum StorageLayout {
    /// One durable key holding `{"payload": ..., "fetchedAt": ...}`
    Envelope(fn(&str) -> String),
    /// Payload JSON under `data`, fetch timestamp (ms) under `timestamp`
    Split {
        data: fn(&str) -> String,
        timestamp: fn(&str) -> String,
    },
}

/// Keyed cache with a fast in-process tier and a best-effort durable tier
///
/// Shared between every consumer of the same resource domain. Writes are
/// last-write-wins per key; entries are replaced, never merged.
pub struct TieredCache<T> {
    memory: Mutex<HashMap<String, CacheEntry<T>>>,
    durable: Arc<dyn DurableStore>,
    layout: StorageLayout,
    capacity: Option<usize>,
}

impl<T> TieredCache<T>
where
    T: Clone + Serialize + DeserializeOwned,
{
    /// Creates an empty cache over `durable`. The process tier is unbounded.
    pub fn new(durable: Arc<dyn DurableStore>, layout: StorageLayout) -> Self {
        Self {
            memory: Mutex::new(HashMap::new()),
            durable,
            layout,
            capacity: None,
        }
    }

    /// Bounds the process tier; the entry with the oldest `fetched_at` is
    /// evicted to make room. The durable tier is not affected.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity.max(1));
        self
    }

    fn memory(&self) -> MutexGuard<'_, HashMap<String, CacheEntry<T>>> {
        self.memory.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Looks up `key`, probing the durable tier on a process-tier miss and
    /// backfilling the process tier from it.
    pub fn get(&self, key: &str) -> Option<CacheEntry<T>> {
        if let Some(entry) = self.memory().get(key) {
            return Some(entry.clone());
        }

        match self.load_durable(key) {
            Ok(Some(entry)) => {
                debug!(key = %key, fetched_at = entry.fetched_at, "Backfilled from durable tier");
                // A concurrent set() may have landed meanwhile; it wins.
                let mut memory = self.memory();
                if !memory.contains_key(key) {
                    self.make_room(&mut memory);
                    memory.insert(key.to_string(), entry.clone());
                }
                memory.get(key).cloned()
            }
            Ok(None) => None,
            Err(err) => {
                debug!(key = %key, error = %err, "Durable tier read failed, treating as miss");
                None
            }
        }
    }

    /// Stores `payload` stamped with the current time in both tiers
    pub fn set(&self, key: &str, payload: T) -> CacheEntry<T> {
        let entry = CacheEntry::new(payload);
        self.put_entry(key, entry.clone());
        entry
    }

    /// Stores a pre-stamped entry in both tiers. Durable failures are ignored.
    pub fn put_entry(&self, key: &str, entry: CacheEntry<T>) {
        self.put_memory(key, entry.clone());

        if let Err(err) = self.persist(key, &entry) {
            debug!(key = %key, error = %err, "Durable tier write failed, process tier only");
        }
    }

    /// Writes `entry` to the process tier only
    pub fn put_memory(&self, key: &str, entry: CacheEntry<T>) {
        let mut memory = self.memory();
        if !memory.contains_key(key) {
            self.make_room(&mut memory);
        }
        memory.insert(key.to_string(), entry);
    }

    /// Writes `entry` to the durable tier only
    pub fn persist(&self, key: &str, entry: &CacheEntry<T>) -> Result<(), StorageError> {
        match self.layout {
            StorageLayout::Envelope(name) => {
                let blob = serde_json::to_string(entry)?;
                self.durable.write(&name(key), &blob)
            }
            StorageLayout::Split { data, timestamp } => {
                let blob = serde_json::to_string(&entry.payload)?;
                self.durable.write(&data(key), &blob)?;
                self.durable
                    .write(&timestamp(key), &entry.fetched_at.to_string())
            }
        }
    }

    fn load_durable(&self, key: &str) -> Result<Option<CacheEntry<T>>, StorageError> {
        match self.layout {
            StorageLayout::Envelope(name) => match self.durable.read(&name(key))? {
                Some(blob) => Ok(Some(serde_json::from_str(&blob)?)),
                None => Ok(None),
            },
            StorageLayout::Split { data, timestamp } => {
                let Some(blob) = self.durable.read(&data(key))? else {
                    return Ok(None);
                };
                let payload: T = serde_json::from_str(&blob)?;
                // A missing or garbled timestamp makes the entry maximally old.
                let fetched_at = self
                    .durable
                    .read(&timestamp(key))?
                    .and_then(|raw| raw.trim().parse::<i64>().ok())
                    .unwrap_or(0);
                Ok(Some(CacheEntry::at(payload, fetched_at)))
            }
        }
    }

    /// Drops `key` from both tiers
    pub fn invalidate(&self, key: &str) {
        self.memory().remove(key);

        let result = match self.layout {
            StorageLayout::Envelope(name) => self.durable.remove(&name(key)),
            StorageLayout::Split { data, timestamp } => self
                .durable
                .remove(&data(key))
                .and_then(|_| self.durable.remove(&timestamp(key))),
        };
        if let Err(err) = result {
            debug!(key = %key, error = %err, "Durable tier remove failed");
        }
    }

    /// Number of entries in the process tier
    pub fn len(&self) -> usize {
        self.memory().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn make_room(&self, memory: &mut HashMap<String, CacheEntry<T>>) {
        let Some(capacity) = self.capacity else {
            return;
        };
        while memory.len() >= capacity {
            let oldest = memory
                .iter()
                .min_by_key(|(_, entry)| entry.fetched_at)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    debug!(key = %key, "Evicting oldest process-tier entry");
                    memory.remove(&key);
                }
                None => break,
            }
        }
    }
}
