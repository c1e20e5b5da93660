//! Query identity keys.

use std::fmt;
use std::sync::Arc;

/// Identity of a query in the cache.
///
/// A key is an ordered list of string segments, so callers can build
/// compound keys like `["todos", "42"]` where part of the identity varies
/// over time. Two observers configured with equal keys share the same
/// underlying cache entry.
///
/// Keys are cheap to clone (the segments are behind an `Arc`).
///
/// # Example
///
/// ```
/// use query_group::QueryKey;
///
/// let base = QueryKey::from("todos");
/// let page1 = base.with("1");
/// let page2 = base.with("2");
/// assert_ne!(page1, page2);
/// assert_eq!(page1, QueryKey::new(["todos", "1"]));
/// ```
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    segments: Arc<Vec<String>>,
}

impl QueryKey {
    /// Create a key from an ordered list of segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            segments: Arc::new(segments.into_iter().map(Into::into).collect()),
        }
    }

    /// Derive a new key by appending one segment.
    pub fn with(&self, segment: impl Into<String>) -> Self {
        let mut segments = (*self.segments).clone();
        segments.push(segment.into());
        Self {
            segments: Arc::new(segments),
        }
    }

    /// The ordered segments of this key.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }
}

impl From<&str> for QueryKey {
    fn from(segment: &str) -> Self {
        Self::new([segment])
    }
}

impl From<String> for QueryKey {
    fn from(segment: String) -> Self {
        Self::new([segment])
    }
}

impl From<Vec<String>> for QueryKey {
    fn from(segments: Vec<String>) -> Self {
        Self {
            segments: Arc::new(segments),
        }
    }
}

impl fmt::Debug for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.segments.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_keys_compare_by_segments() {
        let a = QueryKey::from("user").with("1");
        let b = QueryKey::new(["user", "1"]);
        let c = QueryKey::new(["user", "2"]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
