//! Client handle shared by every observer.

use std::sync::Arc;

use crate::cache::QueryCache;
use crate::key::QueryKey;
use crate::notify::NotifyBatcher;
use crate::query::Query;

/// Shared handle to the query cache and the notification batcher.
///
/// This is cheap to clone - all data is behind `Arc`. Every observer built
/// from the same client shares cache entries (by key) and coalesces its
/// notifications through the same batcher instance.
#[derive(Clone)]
pub struct QueryClient {
    cache: Arc<QueryCache>,
    batcher: Arc<NotifyBatcher>,
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryClient {
    /// Create a client with a fresh cache and batcher.
    pub fn new() -> Self {
        let batcher = Arc::new(NotifyBatcher::new());
        Self {
            cache: Arc::new(QueryCache::new(batcher.clone())),
            batcher,
        }
    }

    /// The batcher all observers of this client notify through.
    pub fn batcher(&self) -> &Arc<NotifyBatcher> {
        &self.batcher
    }

    pub(crate) fn query(&self, key: &QueryKey) -> Arc<Query> {
        self.cache.entry(key)
    }
}
