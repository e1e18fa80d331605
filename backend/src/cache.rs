use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, instrument};

/// Namespace applied to every key.
pub const KEY_PREFIX: &str = "logistima:";

/// Listings that embed deliverer capacity figures.
pub const ZONES: &str = "zones";
pub const DELIVERERS: &str = "deliverers";

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process TTL cache for rendered listings.
///
/// Entries are advisory: a dispatch never reads from here, it only
/// invalidates what it made stale. Expired entries are dropped on read.
///
/// Every invalidation bumps a generation counter under the write lock, so a
/// reader can refuse to cache a listing it built before the bump.
pub struct ListingCache {
    ttl: Duration,
    map: RwLock<HashMap<String, Entry>>,
    generation: AtomicU64,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            map: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// `zones` -> `logistima:zones`, (`zones`, `7`) -> `logistima:zones:7`.
    pub fn key(kind: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{KEY_PREFIX}{kind}:{id}"),
            None => format!("{KEY_PREFIX}{kind}"),
        }
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        let full = Self::key(key, None);
        {
            let map = self.map.read();
            match map.get(&full) {
                Some(e) if Instant::now() < e.expires_at => {
                    debug!(target: "cache", key = %full, "cache hit");
                    return Some(e.value.clone());
                }
                Some(_) => {}
                None => {
                    debug!(target: "cache", key = %full, "cache miss");
                    return None;
                }
            }
        }

        // expired
        self.map.write().remove(&full);
        debug!(target: "cache", key = %full, "cache entry expired");
        None
    }

    pub fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, self.ttl);
    }

    pub fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        let full = Self::key(key, None);
        let expires_at = Instant::now() + ttl;
        self.map.write().insert(full, Entry { value, expires_at });
    }

    /// Store `value` only if nothing was invalidated since `seen` was read
    /// from `generation()`. Returns whether it was stored.
    pub fn set_if_current(&self, key: &str, value: Value, seen: u64) -> bool {
        let full = Self::key(key, None);
        let expires_at = Instant::now() + self.ttl;
        let mut map = self.map.write();
        if self.generation.load(Ordering::Acquire) != seen {
            debug!(target: "cache", key = %full, "listing outdated before store, not cached");
            return false;
        }
        map.insert(full, Entry { value, expires_at });
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut map = self.map.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        map.remove(&Self::key(key, None)).is_some()
    }

    /// Drop every key starting with `prefix`; returns how many were removed.
    #[instrument(skip(self), target = "cache")]
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let full = Self::key(prefix, None);
        let mut map = self.map.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let before = map.len();
        map.retain(|k, _| !k.starts_with(&full));
        let removed = before - map.len();
        if removed > 0 {
            debug!(removed, "cache prefix invalidated");
        }
        removed
    }

    #[instrument(skip(self), target = "cache")]
    pub fn clear(&self) {
        let mut map = self.map.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        let count = map.len();
        map.clear();
        info!(count, "listing cache cleared");
    }

    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(ListingCache::key(ZONES, None), "logistima:zones");
        assert_eq!(ListingCache::key(ZONES, Some("all")), "logistima:zones:all");
    }

    #[test]
    fn set_get_invalidate() {
        let cache = ListingCache::new(Duration::from_secs(60));
        assert!(cache.get("zones:all").is_none());

        cache.set("zones:all", json!([{"id": 1}]));
        assert_eq!(cache.get("zones:all"), Some(json!([{"id": 1}])));

        assert!(cache.invalidate("zones:all"));
        assert!(!cache.invalidate("zones:all"));
        assert!(cache.get("zones:all").is_none());
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = ListingCache::new(Duration::from_secs(60));
        cache.set_with_ttl("deliverers", json!([]), Duration::ZERO);
        assert!(cache.get("deliverers").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn prefix_invalidation_spares_other_listings() {
        let cache = ListingCache::new(Duration::from_secs(60));
        cache.set("zones:all", json!(1));
        cache.set("zones:4", json!(2));
        cache.set("deliverers:zone:4", json!(3));

        assert_eq!(cache.invalidate_prefix(ZONES), 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get("deliverers:zone:4").is_some());

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn listing_built_before_an_invalidation_is_not_stored() {
        let cache = ListingCache::new(Duration::from_secs(60));
        let seen = cache.generation();

        cache.invalidate_prefix(DELIVERERS);
        assert!(!cache.set_if_current("deliverers:zone:1", json!([1]), seen));
        assert!(cache.get("deliverers:zone:1").is_none());

        let seen = cache.generation();
        assert!(cache.set_if_current("deliverers:zone:1", json!([2]), seen));
        assert_eq!(cache.get("deliverers:zone:1"), Some(json!([2])));
    }

    #[test]
    fn every_invalidation_moves_the_generation() {
        let cache = ListingCache::new(Duration::from_secs(60));
        let g0 = cache.generation();
        cache.invalidate("zones:all");
        let g1 = cache.generation();
        cache.clear();
        let g2 = cache.generation();
        assert!(g0 < g1 && g1 < g2);
    }
}
