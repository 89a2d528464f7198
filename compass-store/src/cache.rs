//! TTL-keyed response cache with conditional-revalidation metadata.
//!
//! Entries expire by per-operation TTL; expiry is checked lazily on read.
//! An expired entry that carries a revalidation tag is kept in place (still
//! reported as a miss) so the next fetch can go out conditionally and be
//! refreshed with `touch` when the upstream answers "not modified".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;

use compass_core::{CachePolicy, Clock, EpochMs};

use crate::key::ScopedCacheKey;

/// One cached response.
#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    written_at_ms: EpochMs,
    ttl_ms: i64,
    revalidation_tag: Option<String>,
}

impl CacheEntry {
    fn is_expired(&self, now_ms: EpochMs) -> bool {
        now_ms - self.written_at_ms > self.ttl_ms
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses (includes expired reads).
    pub misses: u64,
    /// Number of entries currently in cache (live and revalidatable).
    pub entry_count: u64,
    /// Number of entries evicted (expiry cleanup or capacity pressure).
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Session-scoped TTL cache for upstream responses.
pub struct CacheStore {
    entries: DashMap<ScopedCacheKey, CacheEntry>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStore {
    pub fn new(clock: Arc<dyn Clock>, policy: CachePolicy) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
            max_entries: policy.max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get fresh cached data.
    ///
    /// Returns None for both "never set" and "expired". Expired entries
    /// without a revalidation tag are evicted on the spot; tagged ones are
    /// retained so [`CacheStore::revalidation_tag`] can still serve them.
    pub fn get(&self, key: &ScopedCacheKey) -> Option<Value> {
        let now_ms = self.clock.now_ms();

        let result = match self.entries.get(key) {
            Some(entry) if !entry.is_expired(now_ms) => Some(entry.data.clone()),
            Some(entry) => {
                let evict = entry.revalidation_tag.is_none();
                drop(entry);
                if evict {
                    self.entries.remove(key);
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
                None
            }
            None => None,
        };

        match &result {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    /// Store a response.
    pub fn set(
        &self,
        key: ScopedCacheKey,
        data: Value,
        ttl: Duration,
        revalidation_tag: Option<String>,
    ) {
        let now_ms = self.clock.now_ms();
        self.entries.insert(
            key,
            CacheEntry {
                data,
                written_at_ms: now_ms,
                ttl_ms: ttl.as_millis() as i64,
                revalidation_tag,
            },
        );
        self.prune(now_ms);
    }

    /// The stored revalidation tag for a key, fresh or expired.
    pub fn revalidation_tag(&self, key: &ScopedCacheKey) -> Option<String> {
        self.entries
            .get(key)
            .and_then(|entry| entry.revalidation_tag.clone())
    }

    /// Refresh an entry in place after the upstream reported "not
    /// modified": `written_at` moves to now, data and tag are retained.
    /// Returns the retained data, or None when the entry is gone.
    pub fn touch(&self, key: &ScopedCacheKey) -> Option<Value> {
        let now_ms = self.clock.now_ms();
        self.entries.get_mut(key).map(|mut entry| {
            entry.written_at_ms = now_ms;
            entry.data.clone()
        })
    }

    /// Remove one entry.
    pub fn remove(&self, key: &ScopedCacheKey) {
        self.entries.remove(key);
    }

    /// Wipe all entries. Called on session destruction or switch.
    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }

    /// Drop expired tag-less entries, then oldest entries beyond capacity.
    fn prune(&self, now_ms: EpochMs) {
        if self.entries.len() <= self.max_entries {
            return;
        }

        let mut expired = Vec::new();
        let mut by_age: Vec<(ScopedCacheKey, EpochMs)> = Vec::with_capacity(self.entries.len());
        for entry in self.entries.iter() {
            if entry.value().is_expired(now_ms) && entry.value().revalidation_tag.is_none() {
                expired.push(entry.key().clone());
            } else {
                by_age.push((entry.key().clone(), entry.value().written_at_ms));
            }
        }
        for key in &expired {
            self.entries.remove(key);
        }
        let mut evicted = expired.len();

        if self.entries.len() > self.max_entries {
            by_age.sort_by_key(|(_, written_at)| *written_at);
            let excess = self.entries.len().saturating_sub(self.max_entries);
            for (key, _) in by_age.into_iter().take(excess) {
                self.entries.remove(&key);
                evicted += 1;
            }
        }

        self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entry_count", &self.entries.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use compass_core::ManualClock;
    use serde_json::json;

    const START_MS: EpochMs = 1_700_000_000_000;
    const FIVE_MIN: Duration = Duration::from_secs(300);

    fn store_with_clock() -> (CacheStore, Arc<ManualClock>) {
        let clock = ManualClock::shared(START_MS);
        let store = CacheStore::new(clock.clone(), CachePolicy::default());
        (store, clock)
    }

    fn key(name: &str) -> ScopedCacheKey {
        ScopedCacheKey::for_user("github.profile", &json!({ "username": name }), "111")
    }

    #[test]
    fn test_miss_when_never_set() {
        let (store, _clock) = store_with_clock();
        assert_eq!(store.get(&key("octocat")), None);
        assert_eq!(store.stats().misses, 1);
    }

    #[test]
    fn test_hit_before_ttl_miss_after() {
        let (store, clock) = store_with_clock();
        store.set(key("octocat"), json!({"id": 1}), FIVE_MIN, None);

        // T + 4:59 - hit
        clock.advance_ms(299_000);
        assert_eq!(store.get(&key("octocat")), Some(json!({"id": 1})));

        // T + 5:01 - miss (lazy eviction)
        clock.advance_ms(2_000);
        assert_eq!(store.get(&key("octocat")), None);
        assert!(store.is_empty());
    }

    #[test]
    fn test_exact_ttl_boundary_is_still_fresh() {
        let (store, clock) = store_with_clock();
        store.set(key("octocat"), json!({"id": 1}), FIVE_MIN, None);
        clock.advance_ms(300_000);
        // now - written_at == ttl: not yet *older than* the ttl
        assert!(store.get(&key("octocat")).is_some());
    }

    #[test]
    fn test_expired_tagged_entry_is_miss_but_keeps_tag() {
        let (store, clock) = store_with_clock();
        store.set(
            key("octocat"),
            json!({"id": 1}),
            FIVE_MIN,
            Some("etag-abc".to_string()),
        );
        clock.advance_ms(301_000);

        assert_eq!(store.get(&key("octocat")), None);
        assert_eq!(
            store.revalidation_tag(&key("octocat")),
            Some("etag-abc".to_string())
        );
    }

    #[test]
    fn test_touch_refreshes_written_at_in_place() {
        let (store, clock) = store_with_clock();
        store.set(
            key("octocat"),
            json!({"id": 1}),
            FIVE_MIN,
            Some("etag-abc".to_string()),
        );
        clock.advance_ms(301_000);
        assert_eq!(store.get(&key("octocat")), None);

        let retained = store.touch(&key("octocat"));
        assert_eq!(retained, Some(json!({"id": 1})));

        // Fresh again for a full TTL from the touch.
        clock.advance_ms(299_000);
        assert_eq!(store.get(&key("octocat")), Some(json!({"id": 1})));
        assert_eq!(
            store.revalidation_tag(&key("octocat")),
            Some("etag-abc".to_string())
        );
    }

    #[test]
    fn test_touch_missing_key_is_none() {
        let (store, _clock) = store_with_clock();
        assert_eq!(store.touch(&key("octocat")), None);
    }

    #[test]
    fn test_set_replaces_entry() {
        let (store, _clock) = store_with_clock();
        store.set(key("octocat"), json!({"id": 1}), FIVE_MIN, None);
        store.set(key("octocat"), json!({"id": 2}), FIVE_MIN, None);
        assert_eq!(store.get(&key("octocat")), Some(json!({"id": 2})));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_clear_wipes_everything() {
        let (store, _clock) = store_with_clock();
        store.set(key("a"), json!(1), FIVE_MIN, None);
        store.set(key("b"), json!(2), FIVE_MIN, None);
        store.clear();
        assert!(store.is_empty());
        assert_eq!(store.get(&key("a")), None);
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let clock = ManualClock::shared(START_MS);
        let store = CacheStore::new(clock.clone(), CachePolicy { max_entries: 2 });

        store.set(key("first"), json!(1), FIVE_MIN, None);
        clock.advance_ms(1_000);
        store.set(key("second"), json!(2), FIVE_MIN, None);
        clock.advance_ms(1_000);
        store.set(key("third"), json!(3), FIVE_MIN, None);

        assert_eq!(store.len(), 2);
        assert_eq!(store.get(&key("first")), None);
        assert_eq!(store.get(&key("second")), Some(json!(2)));
        assert_eq!(store.get(&key("third")), Some(json!(3)));
        assert!(store.stats().evictions >= 1);
    }

    #[test]
    fn test_stats_hit_rate() {
        let (store, _clock) = store_with_clock();
        store.set(key("octocat"), json!(1), FIVE_MIN, None);
        store.get(&key("octocat"));
        store.get(&key("octocat"));
        store.get(&key("missing"));

        let stats = store.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 0.001);
    }

    #[test]
    fn test_empty_stats_hit_rate_is_zero() {
        let (store, _clock) = store_with_clock();
        assert!((store.stats().hit_rate() - 0.0).abs() < f64::EPSILON);
    }
}
