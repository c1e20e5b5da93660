//! Observer for one query.
//!
//! A `QueryObserver` tracks a single cache entry, derives a [`QueryResult`]
//! from its state plus the observer's own options, and forwards entry
//! changes to its subscribers. It is the per-position building block of
//! [`crate::QueriesObserver`], which owns one observer per descriptor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use slab::Slab;

use crate::client::QueryClient;
use crate::options::{QueryData, QueryOptions};
use crate::query::{Query, QuerySnapshot};
use crate::result::{QueryResult, QueryStatus};

/// Handle for an active subscription.
///
/// Dropping the handle (or calling [`Subscription::unsubscribe`]) removes
/// the listener; notifications delivered afterwards are no-ops.
pub struct Subscription {
    alive: Arc<AtomicBool>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub(crate) fn new(alive: Arc<AtomicBool>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            alive,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// Tear down the subscription explicitly.
    pub fn unsubscribe(mut self) {
        self.run_cancel();
    }

    fn run_cancel(&mut self) {
        self.alive.store(false, Ordering::Release);
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_cancel();
    }
}

struct ListenerEntry {
    alive: Arc<AtomicBool>,
    callback: Arc<dyn Fn(QueryResult) + Send + Sync>,
}

struct ObserverState {
    options: QueryOptions,
    query: Arc<Query>,
    /// Listener token on the current cache entry, present while attached.
    query_token: Option<usize>,
    /// Data retained from the previous key while the new key fetches.
    previous: Option<(QueryData, Instant)>,
}

pub(crate) struct ObserverShared {
    client: QueryClient,
    state: Mutex<ObserverState>,
    listeners: Mutex<Slab<ListenerEntry>>,
}

/// Stateful observer of one query.
///
/// Cheap to clone; clones share subscription state.
#[derive(Clone)]
pub struct QueryObserver {
    shared: Arc<ObserverShared>,
}

impl QueryObserver {
    /// Create an observer for the given options, resolving the cache entry
    /// from the client. No subscription or fetch happens yet.
    pub fn new(client: &QueryClient, options: QueryOptions) -> Self {
        let query = client.query(&options.key);
        Self {
            shared: Arc::new(ObserverShared {
                client: client.clone(),
                state: Mutex::new(ObserverState {
                    options,
                    query,
                    query_token: None,
                    previous: None,
                }),
                listeners: Mutex::new(Slab::new()),
            }),
        }
    }

    /// Reconfigure in place.
    ///
    /// A changed key swaps the underlying cache entry: the old entry's
    /// subscription is moved to the new entry, and when `keep_previous_data`
    /// is set, the old entry's data is retained until the new key settles.
    /// Reconfiguration itself never notifies subscribers - the caller reads
    /// the new state synchronously via [`Self::get_optimistic_result`].
    pub fn set_options(&self, options: QueryOptions) {
        let mut moved_from: Option<(Arc<Query>, usize)> = None;
        let remount;
        {
            let mut state = self.shared.state.lock();
            let key_changed = state.options.key != options.key;
            if !key_changed && state.options.matches(&options) {
                // Semantically unchanged; refresh closures only.
                state.options = options;
                return;
            }
            if key_changed {
                let old = state.query.snapshot();
                state.previous = if options.keep_previous_data {
                    old.data.zip(old.data_updated_at)
                } else {
                    None
                };
                if let Some(token) = state.query_token.take() {
                    moved_from = Some((state.query.clone(), token));
                }
                state.query = self.shared.client.query(&options.key);
            }
            let was_enabled = state.options.enabled;
            state.options = options;
            // An enable flip re-runs the mount policy: nothing else would
            // ever start the first fetch for a position that mounted
            // disabled.
            remount = key_changed || (!was_enabled && state.options.enabled);
        }
        if let Some((old_query, token)) = moved_from {
            old_query.unsubscribe(token);
        }
        if remount && self.has_listeners() {
            self.attach();
        }
    }

    /// Derive the currently-knowable result without waiting for any
    /// asynchronous tick. Synchronous and side-effect free.
    pub fn get_optimistic_result(&self) -> QueryResult {
        let state = self.shared.state.lock();
        let attached = state.query_token.is_some();
        derive_result(
            &state.query.snapshot(),
            &state.options,
            state.previous.as_ref(),
            attached,
        )
    }

    /// Register a listener for future result changes.
    ///
    /// The first subscriber attaches the observer to its cache entry and
    /// triggers a fetch when the mount policy calls for one.
    pub fn subscribe(
        &self,
        listener: impl Fn(QueryResult) + Send + Sync + 'static,
    ) -> Subscription {
        let alive = Arc::new(AtomicBool::new(true));
        let token = self.shared.listeners.lock().insert(ListenerEntry {
            alive: alive.clone(),
            callback: Arc::new(listener),
        });
        self.attach();
        let shared = Arc::downgrade(&self.shared);
        Subscription::new(alive, move || {
            if let Some(shared) = shared.upgrade() {
                let now_empty = {
                    let mut listeners = shared.listeners.lock();
                    if listeners.contains(token) {
                        listeners.remove(token);
                    }
                    listeners.is_empty()
                };
                if now_empty {
                    ObserverShared::detach(&shared);
                }
            }
        })
    }

    /// Trigger a fetch (or join the one in flight) and resolve with the
    /// terminal result once it settles.
    pub fn fetch(&self) -> BoxFuture<'static, QueryResult> {
        let (query, fetcher, retry) = {
            let state = self.shared.state.lock();
            (
                state.query.clone(),
                state.options.fetcher.clone(),
                state.options.retry,
            )
        };
        // Start eagerly so the work is in flight before anyone awaits.
        let fut = query.fetch(fetcher, retry);
        let shared = Arc::clone(&self.shared);
        async move {
            let _ = fut.await;
            let state = shared.state.lock();
            let attached = state.query_token.is_some();
            derive_result(
                &state.query.snapshot(),
                &state.options,
                state.previous.as_ref(),
                attached,
            )
        }
        .boxed()
    }

    /// Current options (used for group-level policy decisions).
    pub fn options(&self) -> QueryOptions {
        self.shared.state.lock().options.clone()
    }

    fn has_listeners(&self) -> bool {
        !self.shared.listeners.lock().is_empty()
    }

    /// Subscribe to the current cache entry and apply the mount policy.
    fn attach(&self) {
        let (query, fetch_plan) = {
            let mut state = self.shared.state.lock();
            if state.query_token.is_none() {
                let weak = Arc::downgrade(&self.shared);
                let token = state.query.subscribe(Arc::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        ObserverShared::on_query_update(&shared);
                    }
                }));
                state.query_token = Some(token);
            }
            let snapshot = state.query.snapshot();
            let plan = if should_fetch_on_mount(&snapshot, &state.options) {
                Some((state.options.fetcher.clone(), state.options.retry))
            } else {
                None
            };
            (state.query.clone(), plan)
        };
        if let Some((fetcher, retry)) = fetch_plan {
            let _ = query.fetch(fetcher, retry);
        }
    }
}

impl ObserverShared {
    fn on_query_update(shared: &Arc<Self>) {
        let result = {
            let mut state = shared.state.lock();
            let snapshot = state.query.snapshot();
            // The active key has settled; retained data is obsolete.
            if snapshot.data.is_some() || snapshot.error.is_some() {
                state.previous = None;
            }
            let attached = state.query_token.is_some();
            derive_result(&snapshot, &state.options, state.previous.as_ref(), attached)
        };
        let listeners: Vec<_> = shared
            .listeners
            .lock()
            .iter()
            .map(|(_, entry)| (entry.alive.clone(), entry.callback.clone()))
            .collect();
        for (alive, callback) in listeners {
            if alive.load(Ordering::Acquire) {
                callback(result.clone());
            }
        }
    }

    fn detach(shared: &Arc<Self>) {
        let token = {
            let mut state = shared.state.lock();
            state.query_token.take().map(|t| (state.query.clone(), t))
        };
        if let Some((query, token)) = token {
            query.unsubscribe(token);
        }
    }
}

impl Drop for ObserverShared {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if let Some(token) = state.query_token.take() {
            state.query.unsubscribe(token);
        }
    }
}

fn is_stale(snapshot: &QuerySnapshot, options: &QueryOptions) -> bool {
    match snapshot.data_updated_at {
        Some(at) => at.elapsed() >= options.stale_time.unwrap_or(Duration::ZERO),
        None => true,
    }
}

/// Mount policy: whether attaching a subscriber should start a fetch.
fn should_fetch_on_mount(snapshot: &QuerySnapshot, options: &QueryOptions) -> bool {
    if !options.enabled || snapshot.is_fetching {
        return false;
    }
    if snapshot.data.is_none() {
        // A failed entry only retries on mount when permitted.
        !(snapshot.error.is_some() && !options.retry_on_mount)
    } else {
        options.refetch_on_mount && is_stale(snapshot, options)
    }
}

fn derive_result(
    snapshot: &QuerySnapshot,
    options: &QueryOptions,
    previous: Option<&(QueryData, Instant)>,
    attached: bool,
) -> QueryResult {
    // Optimistic reads report the fetch the mount policy is about to start,
    // so a render-time read shows Loading before the subscription tick.
    let will_fetch = options.optimistic_results
        && !attached
        && should_fetch_on_mount(snapshot, options);
    let is_fetching = snapshot.is_fetching || will_fetch;

    if let Some(error) = &snapshot.error {
        return QueryResult {
            status: QueryStatus::Error,
            data: snapshot.data.clone(),
            error: Some(error.clone()),
            is_previous_data: false,
            is_fetching,
            data_updated_at: snapshot.data_updated_at,
            error_updated_at: snapshot.error_updated_at,
        };
    }
    if let Some(data) = &snapshot.data {
        return QueryResult {
            status: QueryStatus::Success,
            data: Some(data.clone()),
            error: None,
            is_previous_data: false,
            is_fetching,
            data_updated_at: snapshot.data_updated_at,
            error_updated_at: None,
        };
    }
    if let Some((data, at)) = previous {
        // Retained from the previous key; still a Success from the
        // consumer's point of view, flagged so they can tell.
        return QueryResult {
            status: QueryStatus::Success,
            data: Some(data.clone()),
            error: None,
            is_previous_data: true,
            is_fetching: true,
            data_updated_at: Some(*at),
            error_updated_at: None,
        };
    }
    if options.enabled && is_fetching {
        return QueryResult {
            status: QueryStatus::Loading,
            data: None,
            error: None,
            is_previous_data: false,
            is_fetching: true,
            data_updated_at: None,
            error_updated_at: None,
        };
    }
    QueryResult::idle()
}
