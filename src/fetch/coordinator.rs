//! Fetch coordinator: cache check, supersession and write-through
//!
//! Ordering guarantee: for one key only the most recently issued request may
//! apply its result. Issuing a new request cancels the previous one, and a
//! response is applied under the same lock that cancellation takes, so a
//! slow superseded response can never overwrite a newer one.

use super::{FetchMode, Loaded, ResourceFetcher, ResourceState};
use crate::cache::{now_ms, CacheEntry, FreshnessPolicy, TieredCache};
use crate::error::FetchError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outstanding network call for one key
struct InFlightRequest {
    id: u64,
    token: CancellationToken,
}

struct Shared<T> {
    /// Human-readable resource name used in logs and error messages
    label: &'static str,
    cache: Arc<TieredCache<T>>,
    fetcher: Arc<dyn ResourceFetcher<T>>,
    policy: FreshnessPolicy,
    in_flight: Mutex<HashMap<String, InFlightRequest>>,
    next_id: AtomicU64,
    /// Parent of every request token; cancelled when the coordinator drops
    lifetime: CancellationToken,
    state: watch::Sender<ResourceState<T>>,
}

/// Coordinates cache reads and network fetches for one consumer
///
/// Dropping the coordinator cancels everything it has in flight; no state
/// update happens afterwards.
pub struct FetchCoordinator<T> {
    shared: Arc<Shared<T>>,
}

impl<T> FetchCoordinator<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new<F>(
        label: &'static str,
        cache: Arc<TieredCache<T>>,
        fetcher: F,
        policy: FreshnessPolicy,
    ) -> Self
    where
        F: ResourceFetcher<T> + 'static,
    {
        Self::with_fetcher(label, cache, Arc::new(fetcher), policy)
    }

    /// Builds a coordinator around an already shared fetcher
    pub fn with_fetcher(
        label: &'static str,
        cache: Arc<TieredCache<T>>,
        fetcher: Arc<dyn ResourceFetcher<T>>,
        policy: FreshnessPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ResourceState::default());
        Self {
            shared: Arc::new(Shared {
                label,
                cache,
                fetcher,
                policy,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                lifetime: CancellationToken::new(),
                state,
            }),
        }
    }

    /// Loads `key`, from cache when possible.
    ///
    /// - Fresh entry: returned immediately, no network activity
    /// - Stale entry: returned immediately, revalidated in the background
    ///   unless a request for the key is already outstanding
    /// - Missing: fetched in the foreground
    ///
    /// Dropping the returned future before it settles withdraws its request
    /// and clears `loading`.
    ///
    /// Switching to a different key than the previous call cancels the
    /// requests still outstanding for the old key. Returns
    /// `FetchError::Superseded` if this call's own request was replaced.
    pub async fn load(&self, key: &str) -> Result<Loaded<T>, FetchError> {
        let shared = &self.shared;
        shared.focus(key);

        if let Some(entry) = shared.cache.get(key) {
            if shared.policy.is_fresh(&entry) {
                debug!(resource = shared.label, key = %key, "Serving fresh cache entry");
                shared.publish(key, |state| {
                    state.data = Some(entry.payload.clone());
                    state.fetched_at = Some(entry.fetched_at);
                    state.error = None;
                });
                return Ok(Loaded::Fresh(entry.payload));
            }

            debug!(
                resource = shared.label,
                key = %key,
                age_ms = entry.age_ms(now_ms()),
                "Serving stale cache entry, revalidating"
            );
            shared.publish(key, |state| {
                state.data = Some(entry.payload.clone());
                state.fetched_at = Some(entry.fetched_at);
                state.loading = true;
            });

            // A revalidation already pending for this key is left to finish
            let Some(request) = shared.begin_if_idle(key) else {
                debug!(resource = shared.label, key = %key, "Revalidation already pending");
                return Ok(Loaded::Stale(entry.payload));
            };
            let task = Arc::clone(shared);
            let task_key = key.to_string();
            tokio::spawn(async move {
                // Failures were already published; superseded ones stay silent.
                let _ = task.run(task_key, request, FetchMode::Normal).await;
            });

            return Ok(Loaded::Stale(entry.payload));
        }

        let request = shared.begin(key);
        shared.publish(key, |state| state.loading = true);
        Arc::clone(shared)
            .run(key.to_string(), request, FetchMode::Normal)
            .await
            .map(Loaded::Fetched)
    }

    /// Clears `key` from both cache tiers and fetches it again
    pub async fn refresh(&self, key: &str) -> Result<T, FetchError> {
        let shared = &self.shared;
        shared.focus(key);
        shared.cache.invalidate(key);

        let request = shared.begin(key);
        shared.publish(key, |state| {
            state.loading = true;
            state.error = None;
        });
        Arc::clone(shared)
            .run(key.to_string(), request, FetchMode::Refresh)
            .await
    }

    /// Cached entry for `key`, fresh or not
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.shared.cache.get(key)
    }

    /// Fresh cached payload for `key`, without touching the network
    pub fn cached(&self, key: &str) -> Option<T> {
        self.peek(key)
            .filter(|entry| self.shared.policy.is_fresh(entry))
            .map(|entry| entry.payload)
    }

    pub fn subscribe(&self) -> watch::Receiver<ResourceState<T>> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> ResourceState<T> {
        self.shared.state.borrow().clone()
    }

    /// Number of requests currently outstanding
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight().len()
    }

    /// Cancels the outstanding request for `key`, if any
    pub fn cancel(&self, key: &str) {
        let removed = self.shared.in_flight().remove(key);
        if let Some(request) = removed {
            request.token.cancel();
            self.shared.publish(key, |state| state.loading = false);
        }
    }

    /// Cancels every outstanding request of this coordinator
    pub fn cancel_all(&self) {
        self.shared.cancel_where(|_| true);
    }
}

impl<T> Drop for FetchCoordinator<T> {
    fn drop(&mut self) {
        let mut in_flight = self
            .shared
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for (_, request) in in_flight.drain() {
            request.token.cancel();
        }
        drop(in_flight);
        self.shared.lifetime.cancel();
    }
}

impl<T> Shared<T> {
    fn in_flight(&self) -> MutexGuard<'_, HashMap<String, InFlightRequest>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Withdraws request `id` if it is still the one registered for `key`
    fn withdraw(&self, key: &str, id: u64) {
        let mut in_flight = self.in_flight();
        if !in_flight.get(key).is_some_and(|request| request.id == id) {
            return;
        }
        if let Some(request) = in_flight.remove(key) {
            debug!(resource = self.label, key = %key, request_id = id, "Request abandoned by caller");
            request.token.cancel();
        }
        drop(in_flight);
        self.publish(key, |state| state.loading = false);
    }

    /// Updates the published state if the consumer still shows `key`
    fn publish<F>(&self, key: &str, update: F)
    where
        F: FnOnce(&mut ResourceState<T>),
    {
        self.state.send_if_modified(|state| {
            if state.key.as_deref() != Some(key) {
                return false;
            }
            update(state);
            true
        });
    }
}

/// Withdraws its request when the future running it is dropped unsettled
struct PendingRequest<'a, T> {
    shared: &'a Shared<T>,
    key: &'a str,
    id: u64,
}

impl<T> Drop for PendingRequest<'_, T> {
    fn drop(&mut self) {
        // No-op once settled or superseded: the id is no longer registered
        self.shared.withdraw(self.key, self.id);
    }
}

impl<T> Shared<T>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Points the published state at `key`; an identifier change resets the
    /// state and cancels requests for every other key.
    fn focus(&self, key: &str) {
        let changed = self.state.send_if_modified(|state| {
            if state.key.as_deref() == Some(key) {
                return false;
            }
            *state = ResourceState {
                key: Some(key.to_string()),
                ..ResourceState::default()
            };
            true
        });

        if changed {
            self.cancel_where(|other| other != key);
        }
    }

    fn cancel_where<P>(&self, predicate: P)
    where
        P: Fn(&str) -> bool,
    {
        let mut in_flight = self.in_flight();
        let doomed: Vec<String> = in_flight
            .keys()
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in doomed {
            if let Some(request) = in_flight.remove(&key) {
                debug!(resource = self.label, key = %key, request_id = request.id, "Cancelling request");
                request.token.cancel();
            }
        }
    }

    /// Registers a new request for `key`, cancelling its predecessor
    fn begin(&self, key: &str) -> (u64, CancellationToken) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.lifetime.child_token();

        let previous = self.in_flight().insert(
            key.to_string(),
            InFlightRequest {
                id,
                token: token.clone(),
            },
        );
        if let Some(previous) = previous {
            debug!(
                resource = self.label,
                key = %key,
                superseded = previous.id,
                request_id = id,
                "Superseding in-flight request"
            );
            previous.token.cancel();
        }

        (id, token)
    }

    /// Registers a request for `key` only if none is outstanding
    fn begin_if_idle(&self, key: &str) -> Option<(u64, CancellationToken)> {
        let mut in_flight = self.in_flight();
        if in_flight.contains_key(key) {
            return None;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = self.lifetime.child_token();
        in_flight.insert(
            key.to_string(),
            InFlightRequest {
                id,
                token: token.clone(),
            },
        );
        Some((id, token))
    }

    async fn run(
        self: Arc<Self>,
        key: String,
        (id, token): (u64, CancellationToken),
        mode: FetchMode,
    ) -> Result<T, FetchError> {
        let _pending = PendingRequest {
            shared: &*self,
            key: &key,
            id,
        };
        let fetch = self.fetcher.fetch(&key, mode);
        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => Err(FetchError::Superseded),
            result = fetch => result,
        };
        self.settle(&key, id, outcome)
    }

    /// Applies a finished request, unless it is no longer the current one
    fn settle(&self, key: &str, id: u64, outcome: Result<T, FetchError>) -> Result<T, FetchError> {
        let mut in_flight = self.in_flight();
        let current = in_flight.get(key).is_some_and(|request| request.id == id);
        if !current {
            debug!(resource = self.label, key = %key, request_id = id, "Discarding superseded response");
            return Err(FetchError::Superseded);
        }
        in_flight.remove(key);

        // The process tier and the published state change under the
        // in-flight lock so a concurrent cancel cannot slip in between.
        // Durable I/O happens after the lock is released.
        match outcome {
            Ok(payload) => {
                let entry = CacheEntry::new(payload.clone());
                self.cache.put_memory(key, entry.clone());
                self.publish(key, |state| {
                    state.data = Some(entry.payload.clone());
                    state.fetched_at = Some(entry.fetched_at);
                    state.loading = false;
                    state.error = None;
                });
                drop(in_flight);

                if let Err(err) = self.cache.persist(key, &entry) {
                    debug!(resource = self.label, key = %key, error = %err, "Durable tier write failed, process tier only");
                }
                debug!(resource = self.label, key = %key, request_id = id, "Fetched and cached");
                Ok(payload)
            }
            Err(FetchError::Superseded) => Err(FetchError::Superseded),
            Err(err) => {
                warn!(
                    resource = self.label,
                    key = %key,
                    error = %err,
                    error_type = err.error_type(),
                    "Fetch failed, keeping cached payload"
                );
                let message = err.user_message(self.label);
                self.publish(key, |state| {
                    state.loading = false;
                    state.error = Some(message);
                });
                Err(err)
            }
        }
    }
}
