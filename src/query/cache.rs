use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

use crate::core::sql::Sql;

/// Compiled predicates keyed by the canonical text of their description.
pub struct QueryCache {
    cache: Mutex<LruCache<String, Option<Sql>>>,
    size_limit: usize,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

impl QueryCache {
    pub fn new(size_limit: usize) -> Self {
        let cap = NonZeroUsize::new(size_limit).unwrap_or(NonZeroUsize::MIN);
        QueryCache {
            cache: Mutex::new(LruCache::new(cap)),
            size_limit: cap.get(),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    /// Canonical key: object keys serialize sorted.
    pub fn key(description: &Value) -> String {
        description.to_string()
    }

    pub fn get(&self, key: &str) -> Option<Option<Sql>> {
        let mut cache = self.cache.lock();
        if let Some(compiled) = cache.get(key) {
            self.hit_count.fetch_add(1, Ordering::Relaxed);
            Some(compiled.clone())
        } else {
            self.miss_count.fetch_add(1, Ordering::Relaxed);
            None
        }
    }

    pub fn put(&self, key: String, compiled: Option<Sql>) {
        self.cache.lock().put(key, compiled);
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.lock().len(),
            capacity: self.size_limit,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_ignores_insertion_order() {
        let a = QueryCache::key(&json!({"degree": 2, "r2": 0}));
        let b = QueryCache::key(&json!({"r2": 0, "degree": 2}));
        assert_eq!(a, b);
    }

    #[test]
    fn evicts_and_counts() {
        let cache = QueryCache::new(1);
        cache.put("a".into(), Some(Sql::raw("x")));
        assert!(cache.get("a").is_some());
        cache.put("b".into(), None);
        assert!(cache.get("a").is_none());
        assert_eq!(cache.get("b"), Some(None));
        let stats = cache.stats();
        assert_eq!(stats.size, 1);
        assert_eq!(stats.hit_count, 2);
        assert_eq!(stats.miss_count, 1);
        cache.clear();
        assert_eq!(cache.stats().size, 0);
    }
}
