//! Key-to-entry storage.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::key::QueryKey;
use crate::notify::NotifyBatcher;
use crate::query::Query;

/// Shared storage mapping query keys to cache entries.
///
/// Entries are created on first use and live for the lifetime of the cache;
/// eviction is out of scope here. Every entry shares the client's batcher
/// so settlement fan-outs coalesce per tick.
pub(crate) struct QueryCache {
    batcher: Arc<NotifyBatcher>,
    entries: RwLock<HashMap<QueryKey, Arc<Query>>>,
}

impl QueryCache {
    pub fn new(batcher: Arc<NotifyBatcher>) -> Self {
        Self {
            batcher,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Get the entry for `key`, creating it if absent.
    pub fn entry(&self, key: &QueryKey) -> Arc<Query> {
        if let Some(query) = self.entries.read().get(key) {
            return query.clone();
        }
        let mut entries = self.entries.write();
        entries
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Query::new(key.clone(), self.batcher.clone())))
            .clone()
    }
}
