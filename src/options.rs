//! Per-query configuration supplied by the caller.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::QueryError;
use crate::key::QueryKey;

/// Type-erased successful fetch payload.
///
/// Data is stored type-erased so a single observer can track a list of
/// queries with heterogeneous payload types; callers recover the concrete
/// type with [`crate::QueryResult::data_as`].
pub type QueryData = Arc<dyn std::any::Any + Send + Sync>;

/// Wrap a concrete value as type-erased query data.
pub fn query_data<T: Send + Sync + 'static>(value: T) -> QueryData {
    Arc::new(value)
}

/// Type-erased fetch function. Each invocation starts one fetch attempt.
pub type Fetcher =
    Arc<dyn Fn() -> BoxFuture<'static, Result<QueryData, anyhow::Error>> + Send + Sync>;

/// Callback invoked with the fetched data after a coordinated refetch.
pub type SuccessCallback = Arc<dyn Fn(QueryData) + Send + Sync>;
/// Callback invoked with the fetch error after a coordinated refetch.
pub type ErrorCallback = Arc<dyn Fn(QueryError) + Send + Sync>;
/// Callback invoked with either outcome after a coordinated refetch.
pub type SettledCallback = Arc<dyn Fn(Option<QueryData>, Option<QueryError>) + Send + Sync>;

/// Configuration for one query: its identity plus fetch and observation
/// policy. Immutable per render pass; the caller rebuilds the list and hands
/// it back to the observer, which reconciles by position.
#[derive(Clone)]
pub struct QueryOptions {
    /// Cache identity. Observers with equal keys share one cache entry.
    pub key: QueryKey,
    /// The fetch function.
    pub fetcher: Fetcher,
    /// Disabled queries never fetch and report `Idle` until data exists.
    pub enabled: bool,
    /// Keep showing the last successful data while a fetch for a changed
    /// key is in flight.
    pub keep_previous_data: bool,
    /// Request suspending mode. If any descriptor in a group sets this,
    /// the whole group is coordinated as suspending.
    pub suspense: bool,
    /// Propagate errors to the caller's error boundary instead of keeping
    /// them local to the position.
    pub use_error_boundary: bool,
    /// How long fetched data counts as fresh. `None` means immediately
    /// stale (refetch whenever a new subscriber mounts).
    pub stale_time: Option<Duration>,
    /// Number of additional fetch attempts after a failure.
    pub retry: u32,
    /// Whether a mounting subscriber refetches stale data.
    pub refetch_on_mount: bool,
    /// Whether a mounting subscriber retries a previously failed fetch.
    pub retry_on_mount: bool,
    /// Compute results as if pending work had already started, so a
    /// render-time read shows `Loading` instead of `Idle` before the
    /// subscription tick.
    pub optimistic_results: bool,
    /// Invoked once per coordinated refetch on success.
    pub on_success: Option<SuccessCallback>,
    /// Invoked once per coordinated refetch on failure.
    pub on_error: Option<ErrorCallback>,
    /// Invoked once per coordinated refetch on either outcome.
    pub on_settled: Option<SettledCallback>,
}

impl QueryOptions {
    /// Create options for a typed fetch function with default policy.
    ///
    /// # Example
    ///
    /// ```
    /// use query_group::QueryOptions;
    ///
    /// let options = QueryOptions::new("todos", || async { Ok(vec![1, 2, 3]) })
    ///     .stale_time(std::time::Duration::from_secs(5));
    /// ```
    pub fn new<T, F, Fut>(key: impl Into<QueryKey>, fetch: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, anyhow::Error>> + Send + 'static,
    {
        let fetcher: Fetcher = Arc::new(move || {
            let fut = fetch();
            async move { fut.await.map(|value| query_data(value)) }.boxed()
        });
        Self::with_fetcher(key, fetcher)
    }

    /// Create options from an already type-erased fetcher.
    pub fn with_fetcher(key: impl Into<QueryKey>, fetcher: Fetcher) -> Self {
        Self {
            key: key.into(),
            fetcher,
            enabled: true,
            keep_previous_data: false,
            suspense: false,
            use_error_boundary: false,
            stale_time: None,
            retry: 0,
            refetch_on_mount: true,
            retry_on_mount: true,
            optimistic_results: false,
            on_success: None,
            on_error: None,
            on_settled: None,
        }
    }

    /// Set whether the query may fetch at all.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Retain the previous key's data while the new key fetches.
    pub fn keep_previous_data(mut self, keep: bool) -> Self {
        self.keep_previous_data = keep;
        self
    }

    /// Request suspending mode.
    pub fn suspense(mut self, suspense: bool) -> Self {
        self.suspense = suspense;
        self
    }

    /// Propagate errors to the error boundary.
    pub fn use_error_boundary(mut self, use_boundary: bool) -> Self {
        self.use_error_boundary = use_boundary;
        self
    }

    /// Set the freshness window for fetched data.
    pub fn stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    /// Set the number of additional attempts after a failed fetch.
    pub fn retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Set the success callback for coordinated refetches.
    pub fn on_success(mut self, f: impl Fn(QueryData) + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(f));
        self
    }

    /// Set the error callback for coordinated refetches.
    pub fn on_error(mut self, f: impl Fn(QueryError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Set the settled callback for coordinated refetches.
    pub fn on_settled(
        mut self,
        f: impl Fn(Option<QueryData>, Option<QueryError>) + Send + Sync + 'static,
    ) -> Self {
        self.on_settled = Some(Arc::new(f));
        self
    }

    /// Compare the fields that matter for reconciliation.
    ///
    /// Fetch functions and callbacks are closures and cannot be compared;
    /// two descriptors with equal keys and equal policy are treated as
    /// semantically unchanged.
    pub fn matches(&self, other: &Self) -> bool {
        self.key == other.key
            && self.enabled == other.enabled
            && self.keep_previous_data == other.keep_previous_data
            && self.suspense == other.suspense
            && self.use_error_boundary == other.use_error_boundary
            && self.stale_time == other.stale_time
            && self.retry == other.retry
            && self.refetch_on_mount == other.refetch_on_mount
            && self.retry_on_mount == other.retry_on_mount
            && self.optimistic_results == other.optimistic_results
    }
}

impl fmt::Debug for QueryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryOptions")
            .field("key", &self.key)
            .field("enabled", &self.enabled)
            .field("keep_previous_data", &self.keep_previous_data)
            .field("suspense", &self.suspense)
            .field("use_error_boundary", &self.use_error_boundary)
            .field("stale_time", &self.stale_time)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}
