use crate::ast::query::MatchResult;
use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sha1::Digest;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// sha1 hex digest of a value's JSON encoding.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    let bytes = serde_json::to_vec(value)?;
    let mut hasher = sha1::Sha1::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub query: String,
    pub tree: String,
    pub options: String,
}

impl CacheKey {
    pub fn new(
        query: impl Into<String>,
        tree: impl Into<String>,
        options: impl Into<String>,
    ) -> Self {
        Self {
            query: query.into(),
            tree: tree.into(),
            options: options.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub size: usize,
    pub capacity: usize,
}

/// Memoized match results, shared between engines through an `Arc`.
pub struct QueryCache {
    entries: Mutex<LruCache<CacheKey, Arc<Vec<MatchResult>>>>,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<Arc<Vec<MatchResult>>> {
        self.entries.lock().get(key).cloned()
    }

    pub fn insert(&self, key: CacheKey, results: Arc<Vec<MatchResult>>) {
        self.entries.lock().put(key, results);
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            size: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_sha1_hex() {
        let a = fingerprint(&vec!["x", "y"]).unwrap();
        let b = fingerprint(&vec!["x", "y"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 40);
        assert_ne!(a, fingerprint(&vec!["y", "x"]).unwrap());
    }

    #[test]
    fn test_lru_eviction() {
        let cache = QueryCache::new(2);
        for i in 0..3 {
            cache.insert(CacheKey::new(i.to_string(), "t", "o"), Arc::new(Vec::new()));
        }
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&CacheKey::new("0", "t", "o")).is_none());
        assert!(cache.get(&CacheKey::new("2", "t", "o")).is_some());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.stats().capacity, 2);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let cache = QueryCache::new(0);
        assert_eq!(cache.stats().capacity, 1);
    }
}
