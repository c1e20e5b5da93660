//! Error type for failed fetches.

use std::fmt;
use std::sync::Arc;

/// An opaque, clonable error produced by a query's fetch function.
///
/// Fetch errors are user-domain payloads: the observer layer never inspects
/// them, it only stores, forwards, and (under error-boundary mode) surfaces
/// them. The inner error is shared behind an `Arc` so the same failure can
/// live in the cache entry, the per-position result, and the aggregate
/// selection at once.
///
/// # Example
///
/// ```
/// use query_group::QueryError;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("not found: {0}")]
/// struct NotFound(u32);
///
/// let err = QueryError::new(NotFound(42));
/// assert!(err.is::<NotFound>());
/// assert_eq!(err.downcast_ref::<NotFound>().unwrap().0, 42);
/// ```
#[derive(Clone, thiserror::Error)]
#[error("query failed: {0}")]
pub struct QueryError(Arc<anyhow::Error>);

impl QueryError {
    /// Wrap any error type.
    pub fn new(err: impl Into<anyhow::Error>) -> Self {
        Self(Arc::new(err.into()))
    }

    /// Wrap a plain message.
    pub fn msg(msg: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        Self(Arc::new(anyhow::Error::msg(msg)))
    }

    /// Attempt to downcast the inner error to a concrete type.
    pub fn downcast_ref<E: std::error::Error + Send + Sync + 'static>(&self) -> Option<&E> {
        self.0.downcast_ref::<E>()
    }

    /// Returns `true` if the inner error is of type `E`.
    pub fn is<E: std::error::Error + Send + Sync + 'static>(&self) -> bool {
        self.downcast_ref::<E>().is_some()
    }

    /// The shared inner error.
    pub fn inner(&self) -> &Arc<anyhow::Error> {
        &self.0
    }
}

impl fmt::Debug for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryError({:?})", self.0)
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(err: anyhow::Error) -> Self {
        Self(Arc::new(err))
    }
}
