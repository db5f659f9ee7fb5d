//! RocksDB-backed durable tier
//!
//! Storage design:
//! - **Key format**: the durable key as-is (e.g. "companyAnalysis:TCS")
//! - **Value format**: UTF-8 JSON blob
//! - **Compression**: Zstd; payloads are small text documents

use super::durable::DurableStore;
use crate::error::StorageError;
use anyhow::Context;
use rocksdb::{Options, DB};
use std::path::Path;
use std::sync::Arc;

/// RocksDB storage handle for cached payloads
#[derive(Clone)]
pub struct RocksStore {
    db: Arc<DB>,
}

impl RocksStore {
    /// Open (or create) the store at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);

        let db = DB::open(&opts, path).context("Failed to open RocksDB for cache storage")?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

fn backend(err: rocksdb::Error) -> StorageError {
    StorageError::Backend(err.to_string())
}

impl DurableStore for RocksStore {
    fn read(&self, key: &str) -> Result<Option<String>, StorageError> {
        let Some(bytes) = self.db.get(key.as_bytes()).map_err(backend)? else {
            return Ok(None);
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| StorageError::Backend(format!("Non UTF-8 value for {}: {}", key, e)))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.put(key.as_bytes(), value.as_bytes()).map_err(backend)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.db.delete(key.as_bytes()).map_err(backend)
    }
}
