//! Query-Group: positionally-aligned observation of dynamic query lists.
//!
//! Built around a small per-key cache, this crate provides an observer for
//! an ordered, variable-length list of independent asynchronous queries,
//! plus the coordination a suspending host needs to pause and resume around
//! the group.
//!
//! # Key Features
//!
//! - **Positional alignment**: the result list always has the same length
//!   and order as the descriptor list, on every read
//! - **Optimistic reads**: results are computable synchronously at render
//!   time, showing `Loading` before any subscription tick
//! - **Previous-data retention**: a position whose key changed can keep
//!   showing the last successful value while the new fetch is in flight
//! - **Batched notifications**: a burst of child updates within one logical
//!   tick reaches the downstream listener as a single call
//! - **Suspense coordination**: an all-settled coordinated refetch with
//!   exactly-once callback replay and an error-boundary reset gate
//!
//! # Example
//!
//! ```no_run
//! use query_group::{QueriesObserver, QueryClient, QueryOptions};
//!
//! # async fn example() {
//! let client = QueryClient::new();
//! let observer = QueriesObserver::new(
//!     &client,
//!     vec![
//!         QueryOptions::new("user", || async { Ok("alice".to_string()) }),
//!         QueryOptions::new("posts", || async { Ok(vec![1, 2, 3]) }),
//!     ],
//! );
//! let subscription = observer.subscribe(|results| {
//!     // Always two results, in descriptor order.
//!     assert_eq!(results.len(), 2);
//! });
//! # drop(subscription);
//! # }
//! ```
//!
//! # Suspense
//!
//! A host with a pause/resume protocol evaluates the group through a
//! [`SuspenseCoordinator`] and inspects the returned [`RenderOutcome`]:
//! `Ready` carries the aligned results, `Suspended` carries the pending
//! awaitable to resume on, and `Thrown` carries the first error (by
//! position) for the nearest error boundary.

mod cache;
mod client;
mod error;
mod key;
mod notify;
mod observer;
mod options;
mod queries;
mod query;
mod result;
mod suspense;

pub use client::QueryClient;
pub use error::QueryError;
pub use key::QueryKey;
pub use notify::NotifyBatcher;
pub use observer::{QueryObserver, Subscription};
pub use options::{
    query_data, ErrorCallback, Fetcher, QueryData, QueryOptions, SettledCallback, SuccessCallback,
};
pub use queries::{QueriesObserver, Settlement};
pub use result::{QueryResult, QueryStatus};
pub use suspense::{
    ErrorResetBoundary, RenderOutcome, SuspenseCoordinator, DEFAULT_SUSPENSE_STALE_TIME,
};
