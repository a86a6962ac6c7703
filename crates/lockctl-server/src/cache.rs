//! Short-lived response cache keyed by request path.

use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;

/// Routes whose responses are cached per lock.
pub const CACHED_ROUTES: [&str; 3] = ["status", "lock", "unlock"];

pub fn cache_key(route: &str, lock_name: &str) -> String {
    format!("/api/{route}/{lock_name}")
}

struct Entry<V> {
    value: V,
    expires: Instant,
}

pub struct ResponseCache<V> {
    entries: DashMap<String, Entry<V>>,
}

impl<V: Clone> Default for ResponseCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> ResponseCache<V> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn get(&self, key: &str) -> Option<V> {
        let expired = match self.entries.get(key) {
            Some(entry) if entry.expires > Instant::now() => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Store `value` for `ttl`. A zero TTL disables caching.
    pub fn put(&self, key: String, value: V, ttl: Duration) {
        if ttl.is_zero() {
            return;
        }
        self.entries.insert(
            key,
            Entry {
                value,
                expires: Instant::now() + ttl,
            },
        );
    }

    /// Drop every cached response for one lock.
    pub fn clear_lock(&self, lock_name: &str) {
        for route in CACHED_ROUTES {
            self.entries.remove(&cache_key(route, lock_name));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = ResponseCache::new();
        cache.put(cache_key("status", "door"), 1u32, Duration::from_secs(5));
        assert_eq!(cache.get("/api/status/door"), Some(1));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get("/api/status/door"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_clear_lock_only_touches_that_lock() {
        let cache = ResponseCache::new();
        for route in CACHED_ROUTES {
            cache.put(cache_key(route, "door"), 1u32, Duration::from_secs(5));
        }
        cache.put(cache_key("status", "garage"), 2u32, Duration::from_secs(5));

        cache.clear_lock("door");
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("/api/status/garage"), Some(2));
    }

    #[tokio::test]
    async fn test_zero_ttl_not_cached() {
        let cache = ResponseCache::new();
        cache.put(cache_key("lock", "door"), 1u32, Duration::ZERO);
        assert!(cache.is_empty());
    }
}
