//! Partial-failure aggregator for company signals
//!
//! Fans out every source of a [`SignalBundle`] concurrently and collects
//! each outcome independently. Only the bundle for the most recently
//! requested key may be applied; switching keys or deactivating cancels the
//! outstanding fan-out without touching state.

use super::{
    BundleLoad, BundlePhase, CallSummary, NewsDigest, NewsWindow, SignalBundle, SignalSource,
    MAX_CALL_SUMMARIES,
};
use crate::api::types::most_recent;
use crate::error::FetchError;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Label used when the corporate events source fails
pub const CORPORATE_EVENTS_LABEL: &str = "corporate events";

/// Snapshot published to subscribers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BundleState {
    pub key: Option<String>,
    pub bundle: Option<Arc<SignalBundle>>,
    pub loading: bool,
    /// Informational message naming failed sources
    pub error: Option<String>,
}

/// The fan-out currently allowed to apply its result
struct ActiveLoad {
    key: String,
    id: u64,
    token: CancellationToken,
}

struct Shared {
    source: Arc<dyn SignalSource>,
    phases: Mutex<HashMap<String, BundlePhase>>,
    active: Mutex<Option<ActiveLoad>>,
    next_id: AtomicU64,
    lifetime: CancellationToken,
    state: watch::Sender<BundleState>,
}

pub struct SignalAggregator {
    shared: Arc<Shared>,
}

impl SignalAggregator {
    pub fn new(source: Arc<dyn SignalSource>) -> Self {
        let (state, _) = watch::channel(BundleState::default());
        Self {
            shared: Arc::new(Shared {
                source,
                phases: Mutex::new(HashMap::new()),
                active: Mutex::new(None),
                next_id: AtomicU64::new(1),
                lifetime: CancellationToken::new(),
                state,
            }),
        }
    }

    /// Loads the bundle for `key` once `active` is true.
    ///
    /// A key already loaded is served without network activity; a key
    /// already loading returns [`BundleLoad::InProgress`]. Returns
    /// `FetchError::Superseded` if the fan-out was cancelled by a key change
    /// or [`deactivate`](Self::deactivate).
    pub async fn load_bundle(&self, key: &str, active: bool) -> Result<BundleLoad, FetchError> {
        if !active {
            debug!(key = %key, "Signals not activated, skipping load");
            return Ok(BundleLoad::Inactive);
        }

        let shared = &self.shared;
        shared.focus(key);

        let (id, token) = {
            let mut active = shared.active();
            let mut phases = shared.phases();
            match phases.get(key).cloned() {
                Some(BundlePhase::Loading) => return Ok(BundleLoad::InProgress),
                Some(BundlePhase::Loaded(bundle)) => {
                    drop(phases);
                    drop(active);
                    debug!(key = %key, "Serving loaded signal bundle");
                    shared.publish(key, |state| {
                        state.error = bundle.error_message();
                        state.bundle = Some(Arc::clone(&bundle));
                        state.loading = false;
                    });
                    return Ok(BundleLoad::Ready(bundle));
                }
                Some(BundlePhase::Idle) | None => {}
            }

            phases.insert(key.to_string(), BundlePhase::Loading);
            let id = shared.next_id.fetch_add(1, Ordering::Relaxed);
            let token = shared.lifetime.child_token();
            *active = Some(ActiveLoad {
                key: key.to_string(),
                id,
                token: token.clone(),
            });
            (id, token)
        };

        let _guard = AbandonGuard {
            shared: shared.as_ref(),
            id,
        };
        info!(key = %key, request_id = id, "Loading signal bundle");
        shared.publish(key, |state| {
            state.loading = true;
            state.error = None;
        });

        let fetch_all = fan_out(Arc::clone(&shared.source), key.to_string());
        let bundle = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(FetchError::Superseded),
            bundle = fetch_all => bundle,
        };

        shared.settle(key, id, bundle).map(BundleLoad::Ready)
    }

    /// Forgets a loaded bundle so the next activation fetches again.
    /// A key that is currently loading is left alone.
    pub fn reset(&self, key: &str) {
        let mut phases = self.shared.phases();
        if !matches!(phases.get(key), Some(BundlePhase::Loading)) {
            phases.remove(key);
        }
    }

    /// Cancels the outstanding fan-out, if any
    pub fn deactivate(&self) {
        self.shared.cancel_active(|_| true);
    }

    pub fn phase(&self, key: &str) -> BundlePhase {
        self.shared
            .phases()
            .get(key)
            .cloned()
            .unwrap_or(BundlePhase::Idle)
    }

    pub fn subscribe(&self) -> watch::Receiver<BundleState> {
        self.shared.state.subscribe()
    }

    pub fn state(&self) -> BundleState {
        self.shared.state.borrow().clone()
    }
}

impl Drop for SignalAggregator {
    fn drop(&mut self) {
        self.shared.cancel_active(|_| true);
        self.shared.lifetime.cancel();
    }
}

impl Shared {
    fn active(&self) -> MutexGuard<'_, Option<ActiveLoad>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn phases(&self) -> MutexGuard<'_, HashMap<String, BundlePhase>> {
        self.phases.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Points the published state at `key`, cancelling a fan-out for any
    /// other key
    fn focus(&self, key: &str) {
        let changed = self.state.send_if_modified(|state| {
            if state.key.as_deref() == Some(key) {
                return false;
            }
            *state = BundleState {
                key: Some(key.to_string()),
                ..BundleState::default()
            };
            true
        });

        if changed {
            self.cancel_active(|load| load.key != key);
        }
    }

    /// Cancels the active fan-out if `predicate` accepts it, returning its
    /// key to Idle
    fn cancel_active<P>(&self, predicate: P)
    where
        P: Fn(&ActiveLoad) -> bool,
    {
        let mut active = self.active();
        if !active.as_ref().is_some_and(|load| predicate(load)) {
            return;
        }
        if let Some(load) = active.take() {
            debug!(key = %load.key, request_id = load.id, "Cancelling signal fan-out");
            load.token.cancel();
            let mut phases = self.phases();
            if matches!(phases.get(&load.key), Some(BundlePhase::Loading)) {
                phases.insert(load.key.clone(), BundlePhase::Idle);
            }
            drop(phases);
            self.publish(&load.key, |state| state.loading = false);
        }
    }

    fn settle(&self, key: &str, id: u64, bundle: SignalBundle) -> Result<Arc<SignalBundle>, FetchError> {
        let mut active = self.active();
        let current = active
            .as_ref()
            .is_some_and(|load| load.key == key && load.id == id);
        if !current {
            debug!(key = %key, request_id = id, "Discarding superseded signal bundle");
            return Err(FetchError::Superseded);
        }
        *active = None;

        let bundle = Arc::new(bundle);
        self.phases()
            .insert(key.to_string(), BundlePhase::Loaded(Arc::clone(&bundle)));

        let message = bundle.error_message();
        if let Some(message) = &message {
            warn!(key = %key, failed = ?bundle.failed_sources, "{}", message);
        } else {
            info!(key = %key, "Signal bundle loaded");
        }
        self.publish(key, |state| {
            state.bundle = Some(Arc::clone(&bundle));
            state.loading = false;
            state.error = message;
        });
        Ok(bundle)
    }

    fn publish<F>(&self, key: &str, update: F)
    where
        F: FnOnce(&mut BundleState),
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

/// Returns an unsettled key to Idle when its `load_bundle` future is
/// dropped; a no-op once the load settled or was cancelled
struct AbandonGuard<'a> {
    shared: &'a Shared,
    id: u64,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        let id = self.id;
        self.shared.cancel_active(|load| load.id == id);
    }
}

/// Fetches every source for `symbol`; individual failures are recorded,
/// never propagated
async fn fan_out(source: Arc<dyn SignalSource>, symbol: String) -> SignalBundle {
    let windows = join_all(
        NewsWindow::ALL
            .iter()
            .map(|&window| {
                let fetch = source.news(&symbol, window);
                async move { (window, fetch.await) }
            }),
    );
    let events = source.corporate_events(&symbol);
    let calls = conference_calls(Arc::clone(&source), symbol.clone());

    let (windows, events, conference_calls) = tokio::join!(windows, events, calls);

    let mut bundle = SignalBundle {
        symbol: symbol.clone(),
        conference_calls,
        ..SignalBundle::default()
    };

    for (window, result) in windows {
        match result {
            Ok(response) => {
                bundle.news.insert(window, NewsDigest::from(response));
            }
            Err(err) => {
                debug!(symbol = %symbol, window = window.path(), error = %err, "News window failed");
                bundle.failed_sources.push(window.label().to_string());
            }
        }
    }

    match events {
        Ok(events) => bundle.corporate_events = Some(events),
        Err(err) => {
            debug!(symbol = %symbol, error = %err, "Corporate events failed");
            bundle.failed_sources.push(CORPORATE_EVENTS_LABEL.to_string());
        }
    }

    bundle
}

/// Summaries of the most recent calls. Calls are optional: a missing
/// details listing or a failed summary is dropped, not reported.
async fn conference_calls(source: Arc<dyn SignalSource>, company_id: String) -> Vec<CallSummary> {
    let calls = match source.conference_calls(&company_id).await {
        Ok(calls) => calls,
        Err(err) if err.is_not_found() => {
            debug!(company_id = %company_id, "No conference calls on record");
            return Vec::new();
        }
        Err(err) => {
            debug!(company_id = %company_id, error = %err, "Conference call details unavailable");
            return Vec::new();
        }
    };

    let summaries = most_recent(&calls, MAX_CALL_SUMMARIES).into_iter().map(|call| {
        let fetch = source.call_summary(&company_id, &call);
        async move {
            fetch.await.ok().map(|summary| CallSummary {
                fiscal_year: call.fiscal_year,
                fiscal_quarter: call.fiscal_quarter,
                summary,
            })
        }
    });

    join_all(summaries).await.into_iter().flatten().collect()
}
