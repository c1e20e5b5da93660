//! Observable result of one query.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::error::QueryError;
use crate::options::QueryData;

/// Lifecycle status of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryStatus {
    /// Disabled (or never started) with nothing to show.
    Idle,
    /// A first fetch is needed or in flight and no data exists yet.
    Loading,
    /// The last settlement produced data.
    Success,
    /// The last settlement produced an error.
    Error,
}

/// Snapshot of one query as observed at a point in time.
///
/// A result is a value: recomputed on every state change, never mutated in
/// place. `is_fetching` is orthogonal to `status`; a `Success` result can
/// be fetching again in the background.
#[derive(Clone)]
pub struct QueryResult {
    /// Lifecycle status.
    pub status: QueryStatus,
    /// Last successful payload, if any.
    pub data: Option<QueryData>,
    /// Last fetch error, if any.
    pub error: Option<QueryError>,
    /// True only when `status` is `Success` and `data` was fetched under an
    /// older key than the one currently configured.
    pub is_previous_data: bool,
    /// True while a fetch is in flight (or about to start, for optimistic
    /// reads).
    pub is_fetching: bool,
    /// When `data` was last updated.
    pub data_updated_at: Option<Instant>,
    /// When `error` was last updated.
    pub error_updated_at: Option<Instant>,
}

impl QueryResult {
    pub(crate) fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_previous_data: false,
            is_fetching: false,
            data_updated_at: None,
            error_updated_at: None,
        }
    }

    /// Whether the status is `Idle`.
    pub fn is_idle(&self) -> bool {
        self.status == QueryStatus::Idle
    }

    /// Whether the status is `Loading`.
    pub fn is_loading(&self) -> bool {
        self.status == QueryStatus::Loading
    }

    /// Whether the status is `Success`.
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Whether the status is `Error`.
    pub fn is_error(&self) -> bool {
        self.status == QueryStatus::Error
    }

    /// Downcast the payload to its concrete type.
    ///
    /// Returns `None` if there is no data or the type does not match.
    pub fn data_as<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.data.clone().and_then(|data| data.downcast::<T>().ok())
    }

    /// Structural comparison for change detection. Payloads are compared by
    /// pointer - a settle always allocates fresh data, so pointer equality
    /// is exactly "no new settlement happened".
    pub(crate) fn same_as(&self, other: &Self) -> bool {
        fn ptr_eq<T: ?Sized>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => Arc::ptr_eq(a, b),
                (None, None) => true,
                _ => false,
            }
        }
        self.status == other.status
            && ptr_eq(&self.data, &other.data)
            && ptr_eq(
                &self.error.as_ref().map(|e| e.inner().clone()),
                &other.error.as_ref().map(|e| e.inner().clone()),
            )
            && self.is_previous_data == other.is_previous_data
            && self.is_fetching == other.is_fetching
            && self.data_updated_at == other.data_updated_at
            && self.error_updated_at == other.error_updated_at
    }
}

impl fmt::Debug for QueryResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryResult")
            .field("status", &self.status)
            .field("has_data", &self.data.is_some())
            .field("error", &self.error)
            .field("is_previous_data", &self.is_previous_data)
            .field("is_fetching", &self.is_fetching)
            .finish()
    }
}
