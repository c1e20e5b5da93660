//! Observer for an ordered, variable-length list of queries.
//!
//! The central invariant: the result list always has the same length and
//! order as the descriptor list. Reconciliation is positional - position `i`
//! of a new descriptor list is matched against position `i` of the old one,
//! never against a stable id. Inserting or removing in the middle of the
//! list is therefore seen as "every subsequent position changed"; this is a
//! known limitation of positional diffing, kept deliberately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{join_all, ready, BoxFuture};
use futures::FutureExt;
use parking_lot::Mutex;
use slab::Slab;

use crate::client::QueryClient;
use crate::error::QueryError;
use crate::observer::{QueryObserver, Subscription};
use crate::options::QueryOptions;
use crate::result::QueryResult;

/// Outcome reported for one position by [`QueriesObserver::fetch_optimistic`].
///
/// Positions that were already settled when the coordinated refetch started
/// get no settlement at all (`None` in the aggregate), meaning "nothing to
/// report, do not re-invoke callbacks".
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The position's fetch completed with a terminal result.
    Fulfilled(QueryResult),
    /// The position's fetch failed.
    Rejected(QueryError),
}

struct Child {
    observer: QueryObserver,
    subscription: Option<Subscription>,
}

struct GroupState {
    children: Vec<Child>,
    results: Vec<QueryResult>,
}

struct GroupListener {
    alive: Arc<AtomicBool>,
    /// Batched dispatch for this listener; a burst of child updates within
    /// one tick collapses into one call.
    notify: Arc<dyn Fn() + Send + Sync>,
}

struct QueriesShared {
    state: Mutex<GroupState>,
    listeners: Mutex<Slab<GroupListener>>,
}

/// Observer aggregating an ordered collection of child observers, one per
/// descriptor, keyed by position.
///
/// Cheap to clone; clones share children and subscriptions. The observer
/// exclusively owns its children's subscriptions - no other component may
/// subscribe or unsubscribe them directly.
#[derive(Clone)]
pub struct QueriesObserver {
    client: QueryClient,
    shared: Arc<QueriesShared>,
}

impl QueriesObserver {
    /// Create an observer for an initial descriptor list.
    ///
    /// Children are created immediately (with optimistic results forced on,
    /// so a first read reflects fetching state) but nothing is subscribed
    /// or fetched until [`Self::subscribe`] or [`Self::hold`] is called.
    pub fn new(client: &QueryClient, descriptors: Vec<QueryOptions>) -> Self {
        let observer = Self {
            client: client.clone(),
            shared: Arc::new(QueriesShared {
                state: Mutex::new(GroupState {
                    children: Vec::new(),
                    results: Vec::new(),
                }),
                listeners: Mutex::new(Slab::new()),
            }),
        };
        observer.reconcile(descriptors);
        observer
    }

    /// Replace the descriptor list, reconciling children by position.
    ///
    /// With `notify` false the downstream listener is not fired for the
    /// reconciliation itself - used when the caller's own option
    /// recomputation is already reflected in a synchronously-read optimistic
    /// result. Asynchronous state changes caused by fetches started here
    /// still notify, batched into one call per tick.
    pub fn set_queries(&self, descriptors: Vec<QueryOptions>, notify: bool) {
        let batcher = self.client.batcher().clone();
        batcher.batch(|| {
            self.reconcile(descriptors);
            if notify {
                QueriesShared::notify_all(&self.shared);
            }
        });
    }

    /// Read each position's currently-knowable result without waiting for
    /// any asynchronous tick, reconciling children to `descriptors` first.
    ///
    /// This is the render-time fast path: it must be computable
    /// synchronously so the caller has a positionally-aligned result list
    /// before committing to an output.
    pub fn get_optimistic_result(&self, descriptors: &[QueryOptions]) -> Vec<QueryResult> {
        let batcher = self.client.batcher().clone();
        batcher.batch(|| self.reconcile(descriptors.to_vec()));
        self.current_result()
    }

    /// The last derived result list.
    pub fn current_result(&self) -> Vec<QueryResult> {
        self.shared.state.lock().results.clone()
    }

    /// Register the downstream listener.
    ///
    /// The first subscriber activates the group: every child observer is
    /// subscribed, which mounts it on its cache entry and starts whatever
    /// fetches the mount policy calls for.
    pub fn subscribe(
        &self,
        listener: impl Fn(Vec<QueryResult>) + Send + Sync + 'static,
    ) -> Subscription {
        self.subscribe_inner(Some(Arc::new(listener)))
    }

    /// Keep the group active without observing results.
    ///
    /// Used by the suspense path to keep child observers mounted for the
    /// duration of a coordinated refetch.
    pub fn hold(&self) -> Subscription {
        self.subscribe_inner(None)
    }

    /// Coordinated refetch of every position that is not already settled.
    ///
    /// Fetches start before this returns; the returned future is an
    /// all-settled join resolving once every outstanding position has
    /// settled. Already-successful and disabled positions resolve to `None`.
    pub fn fetch_optimistic(
        &self,
        descriptors: &[QueryOptions],
    ) -> BoxFuture<'static, Vec<Option<Settlement>>> {
        let batcher = self.client.batcher().clone();
        batcher.batch(|| self.reconcile(descriptors.to_vec()));
        let observers: Vec<QueryObserver> = {
            let state = self.shared.state.lock();
            state.children.iter().map(|c| c.observer.clone()).collect()
        };
        let futures: Vec<BoxFuture<'static, Option<Settlement>>> = observers
            .iter()
            .map(|observer| {
                let result = observer.get_optimistic_result();
                let options = observer.options();
                if !options.enabled || (result.is_success() && !result.is_previous_data) {
                    // Settled (or unable to fetch): nothing to report.
                    return ready(None).boxed();
                }
                observer
                    .fetch()
                    .map(|terminal| {
                        Some(match terminal.error.clone() {
                            Some(error) if terminal.is_error() => Settlement::Rejected(error),
                            _ => Settlement::Fulfilled(terminal),
                        })
                    })
                    .boxed()
            })
            .collect();
        tracing::debug!(outstanding = futures.len(), "coordinated refetch");
        async move { join_all(futures).await }.boxed()
    }

    fn subscribe_inner(
        &self,
        callback: Option<Arc<dyn Fn(Vec<QueryResult>) + Send + Sync>>,
    ) -> Subscription {
        let alive = Arc::new(AtomicBool::new(true));
        let notify: Arc<dyn Fn() + Send + Sync> = match callback {
            Some(callback) => {
                let weak = Arc::downgrade(&self.shared);
                let alive = alive.clone();
                self.client.batcher().batch_calls(Arc::new(move || {
                    if let Some(shared) = weak.upgrade() {
                        if alive.load(Ordering::Acquire) {
                            let results = shared.state.lock().results.clone();
                            callback(results);
                        }
                    }
                }))
            }
            None => Arc::new(|| {}),
        };
        let was_empty = {
            let mut listeners = self.shared.listeners.lock();
            let was_empty = listeners.is_empty();
            listeners.insert(GroupListener {
                alive: alive.clone(),
                notify,
            });
            was_empty
        };
        if was_empty {
            self.activate();
        }
        let this = self.clone();
        let token_alive = alive.clone();
        Subscription::new(alive, move || {
            let now_empty = {
                let mut listeners = this.shared.listeners.lock();
                listeners.retain(|_, l| !Arc::ptr_eq(&l.alive, &token_alive));
                listeners.is_empty()
            };
            if now_empty {
                this.deactivate();
            }
        })
    }

    /// Subscribe every child that is not yet subscribed.
    fn activate(&self) {
        let pending: Vec<(usize, QueryObserver)> = {
            let state = self.shared.state.lock();
            state
                .children
                .iter()
                .enumerate()
                .filter(|(_, c)| c.subscription.is_none())
                .map(|(i, c)| (i, c.observer.clone()))
                .collect()
        };
        // Subscribing may start fetches and fire synchronous notifications,
        // so it happens with the group lock released.
        let subs: Vec<(usize, Subscription)> = pending
            .into_iter()
            .map(|(i, observer)| (i, self.subscribe_child(i, &observer)))
            .collect();
        let mut state = self.shared.state.lock();
        for (i, sub) in subs {
            if let Some(child) = state.children.get_mut(i) {
                child.subscription = Some(sub);
            }
        }
    }

    fn deactivate(&self) {
        let dropped: Vec<Option<Subscription>> = {
            let mut state = self.shared.state.lock();
            state
                .children
                .iter_mut()
                .map(|c| c.subscription.take())
                .collect()
        };
        drop(dropped);
    }

    fn subscribe_child(&self, position: usize, observer: &QueryObserver) -> Subscription {
        let weak = Arc::downgrade(&self.shared);
        observer.subscribe(move |result| {
            if let Some(shared) = weak.upgrade() {
                QueriesShared::on_child_update(&shared, position, result);
            }
        })
    }

    /// Positional reconciliation of children against a new descriptor list.
    fn reconcile(&self, descriptors: Vec<QueryOptions>) {
        // Plan under the lock, mutate children outside it: updating a child
        // can start fetches whose notifications re-enter the group.
        let (kept, active) = {
            let state = self.shared.state.lock();
            let kept: Vec<QueryObserver> = state
                .children
                .iter()
                .take(descriptors.len())
                .map(|c| c.observer.clone())
                .collect();
            let active = !self.shared.listeners.lock().is_empty();
            (kept, active)
        };

        // Positions present in both lists: push new options in place.
        for (observer, options) in kept.iter().zip(descriptors.iter()) {
            observer.set_options(options.clone());
        }

        // Positions only in the new list: fresh children, optimistic so the
        // first read reflects fetching state without a subscription tick.
        let mut created: Vec<Child> = Vec::new();
        for (i, options) in descriptors.iter().enumerate().skip(kept.len()) {
            let mut options = options.clone();
            options.optimistic_results = true;
            let observer = QueryObserver::new(&self.client, options);
            let subscription = active.then(|| self.subscribe_child(i, &observer));
            created.push(Child {
                observer,
                subscription,
            });
        }

        let removed: Vec<Child> = {
            let mut state = self.shared.state.lock();
            // Positions only in the old list: unsubscribe and discard.
            let removed = if state.children.len() > descriptors.len() {
                state.children.split_off(descriptors.len())
            } else {
                Vec::new()
            };
            state.children.append(&mut created);
            state.results = state
                .children
                .iter()
                .map(|c| c.observer.get_optimistic_result())
                .collect();
            debug_assert_eq!(state.results.len(), descriptors.len());
            removed
        };
        if !removed.is_empty() {
            tracing::trace!(count = removed.len(), "dropping trailing children");
        }
        drop(removed);
    }
}

impl QueriesShared {
    fn on_child_update(shared: &Arc<Self>, position: usize, result: QueryResult) {
        {
            let mut state = shared.state.lock();
            match state.results.get_mut(position) {
                // No observable change; do not wake the downstream listener.
                Some(slot) if slot.same_as(&result) => return,
                Some(slot) => *slot = result,
                // A late notification for a truncated position; ignore.
                None => return,
            }
        }
        Self::notify_all(shared);
    }

    fn notify_all(shared: &Arc<Self>) {
        let notifiers: Vec<Arc<dyn Fn() + Send + Sync>> = shared
            .listeners
            .lock()
            .iter()
            .filter(|(_, l)| l.alive.load(Ordering::Acquire))
            .map(|(_, l)| l.notify.clone())
            .collect();
        for notify in notifiers {
            notify();
        }
    }
}
