//! Cache entry for a single query key.
//!
//! An entry owns the fetched state for one key and the in-flight fetch, if
//! any. Observers with the same key share one entry, so a fetch started by
//! one observer is joined (not duplicated) by the others.

use std::sync::Arc;
use std::time::Instant;

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use parking_lot::Mutex;
use slab::Slab;

use crate::error::QueryError;
use crate::key::QueryKey;
use crate::notify::NotifyBatcher;
use crate::options::{Fetcher, QueryData};

/// Terminal outcome of one fetch, shared between all joiners.
pub(crate) type FetchOutcome = Result<QueryData, QueryError>;

type FetchFuture = Shared<BoxFuture<'static, FetchOutcome>>;

/// Copy of an entry's observable state, taken under lock.
#[derive(Clone)]
pub(crate) struct QuerySnapshot {
    pub data: Option<QueryData>,
    pub data_updated_at: Option<Instant>,
    pub error: Option<QueryError>,
    pub error_updated_at: Option<Instant>,
    pub is_fetching: bool,
}

#[derive(Default)]
struct QueryState {
    data: Option<QueryData>,
    data_updated_at: Option<Instant>,
    error: Option<QueryError>,
    error_updated_at: Option<Instant>,
    in_flight: Option<FetchFuture>,
}

/// One cache entry. Created by the cache, shared behind `Arc`.
pub(crate) struct Query {
    key: QueryKey,
    batcher: Arc<NotifyBatcher>,
    state: Mutex<QueryState>,
    listeners: Mutex<Slab<Arc<dyn Fn() + Send + Sync>>>,
}

impl Query {
    pub fn new(key: QueryKey, batcher: Arc<NotifyBatcher>) -> Self {
        Self {
            key,
            batcher,
            state: Mutex::new(QueryState::default()),
            listeners: Mutex::new(Slab::new()),
        }
    }

    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn snapshot(&self) -> QuerySnapshot {
        let state = self.state.lock();
        QuerySnapshot {
            data: state.data.clone(),
            data_updated_at: state.data_updated_at,
            error: state.error.clone(),
            error_updated_at: state.error_updated_at,
            is_fetching: state.in_flight.is_some(),
        }
    }

    /// Register a state-change listener. Returns a token for [`Self::unsubscribe`].
    pub fn subscribe(&self, listener: Arc<dyn Fn() + Send + Sync>) -> usize {
        self.listeners.lock().insert(listener)
    }

    pub fn unsubscribe(&self, token: usize) {
        let mut listeners = self.listeners.lock();
        if listeners.contains(token) {
            listeners.remove(token);
        }
    }

    /// Start a fetch, or join the one already in flight.
    ///
    /// The returned future resolves with the terminal outcome. The fetch is
    /// also spawned so it makes progress even if no caller awaits it.
    pub fn fetch(self: &Arc<Self>, fetcher: Fetcher, retry: u32) -> FetchFuture {
        let fut = {
            let mut state = self.state.lock();
            if let Some(in_flight) = &state.in_flight {
                return in_flight.clone();
            }
            let this = Arc::clone(self);
            let fut = async move {
                let outcome = run_attempts(fetcher, retry).await;
                this.settle(outcome.clone());
                outcome
            }
            .boxed()
            .shared();
            state.in_flight = Some(fut.clone());
            fut
        };
        tracing::trace!(key = ?self.key, "fetch started");
        // The entry is now fetching; let observers re-derive their results.
        self.notify();
        tokio::spawn(fut.clone().map(|_| ()));
        fut
    }

    fn settle(&self, outcome: FetchOutcome) {
        {
            let mut state = self.state.lock();
            state.in_flight = None;
            match &outcome {
                Ok(data) => {
                    state.data = Some(data.clone());
                    state.data_updated_at = Some(Instant::now());
                    state.error = None;
                }
                Err(error) => {
                    state.error = Some(error.clone());
                    state.error_updated_at = Some(Instant::now());
                }
            }
        }
        tracing::trace!(key = ?self.key, ok = outcome.is_ok(), "fetch settled");
        self.notify();
    }

    /// Invoke listeners with no locks held.
    ///
    /// One state change fans out to every observer of this entry, and each
    /// observer forwards in turn; the whole burst runs inside one batcher
    /// tick so a downstream listener hears it as a single call observing
    /// the final state.
    fn notify(&self) {
        let listeners: Vec<_> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        self.batcher.batch(|| {
            for listener in listeners {
                listener();
            }
        });
    }
}

async fn run_attempts(fetcher: Fetcher, retry: u32) -> FetchOutcome {
    let mut attempt = 0u32;
    loop {
        match (fetcher)().await {
            Ok(data) => return Ok(data),
            Err(err) => {
                if attempt >= retry {
                    return Err(QueryError::from(err));
                }
                attempt += 1;
            }
        }
    }
}
