// =============================================================================
// TTL Cache — lazily expiring key/value store
// =============================================================================
//
// Entries are never swept. `get` simply refuses to return an entry whose age
// has reached its TTL, and the next `set` for that key overwrites it. Stale
// entries stay readable through `get_stale` so a caller that just saw a
// refresh fail can still show the last good value.
// =============================================================================

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}

/// Thread-safe map of values that expire `ttl` after they were stored.
pub struct TtlCache<K, V> {
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return the value only while it is younger than its TTL.
    pub fn get(&self, key: &K) -> Option<V> {
        let entries = self.entries.read();
        entries
            .get(key)
            .filter(|entry| entry.is_fresh())
            .map(|entry| entry.value.clone())
    }

    /// Return the value regardless of age.
    pub fn get_stale(&self, key: &K) -> Option<V> {
        self.entries.read().get(key).map(|entry| entry.value.clone())
    }

    /// Store `value`, replacing whatever was there and restarting its clock.
    pub fn set(&self, key: K, value: V, ttl: Duration) {
        self.entries.write().insert(
            key,
            CacheEntry {
                value,
                fetched_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fresh_entry_is_returned() {
        let cache = TtlCache::new();
        cache.set("bitcoin", 42.0, Duration::from_secs(30));
        assert_eq!(cache.get(&"bitcoin"), Some(42.0));
        assert_eq!(cache.get(&"ethereum"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_exactly_at_ttl() {
        let cache = TtlCache::new();
        cache.set("bitcoin", 42.0, Duration::from_secs(30));

        tokio::time::advance(Duration::from_millis(29_999)).await;
        assert_eq!(cache.get(&"bitcoin"), Some(42.0));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert_eq!(cache.get(&"bitcoin"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_stays_readable_until_overwritten() {
        let cache = TtlCache::new();
        cache.set("bitcoin", 42.0, Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(5)).await;

        assert_eq!(cache.get(&"bitcoin"), None);
        assert_eq!(cache.get_stale(&"bitcoin"), Some(42.0));
        assert_eq!(cache.len(), 1);

        cache.set("bitcoin", 43.0, Duration::from_secs(1));
        assert_eq!(cache.get(&"bitcoin"), Some(43.0));
        assert_eq!(cache.len(), 1);
    }
}
