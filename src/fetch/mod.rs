//! Keyed resource fetching with staleness and cancellation
//!
//! One [`FetchCoordinator`] per consumer. Consumers of the same domain
//! share a [`TieredCache`](crate::cache::TieredCache); each coordinator owns
//! its in-flight requests and cancels them when superseded or dropped.

pub mod coordinator;

pub use coordinator::FetchCoordinator;

use crate::error::FetchError;
use futures::future::BoxFuture;
use std::future::Future;

/// Whether the fetch was triggered by an explicit refresh action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    Normal,
    Refresh,
}

/// Network side of a resource domain
pub trait ResourceFetcher<T>: Send + Sync {
    fn fetch(&self, key: &str, mode: FetchMode) -> BoxFuture<'static, Result<T, FetchError>>;
}

impl<T, F, Fut> ResourceFetcher<T> for F
where
    F: Fn(String, FetchMode) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    fn fetch(&self, key: &str, mode: FetchMode) -> BoxFuture<'static, Result<T, FetchError>> {
        Box::pin(self(key.to_string(), mode))
    }
}

/// How `load` satisfied a request
#[derive(Debug, Clone, PartialEq)]
pub enum Loaded<T> {
    /// Fresh cache hit, no network activity
    Fresh(T),
    /// Stale cache hit, revalidation continues in the background
    Stale(T),
    /// Fetched from the network
    Fetched(T),
}

impl<T> Loaded<T> {
    pub fn into_payload(self) -> T {
        match self {
            Loaded::Fresh(p) | Loaded::Stale(p) | Loaded::Fetched(p) => p,
        }
    }

    pub fn is_cached(&self) -> bool {
        !matches!(self, Loaded::Fetched(_))
    }
}

/// Snapshot published to the coordinator's subscriber
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
    /// Resource key currently shown by the consumer
    pub key: Option<String>,
    pub data: Option<T>,
    pub fetched_at: Option<i64>,
    pub loading: bool,
    /// Presentational error; previously loaded `data` stays in place
    pub error: Option<String>,
}

impl<T> Default for ResourceState<T> {
    fn default() -> Self {
        Self {
            key: None,
            data: None,
            fetched_at: None,
            loading: false,
            error: None,
        }
    }
}
