//! Generic TTL cache with group-scoped invalidation.
//!
//! # Responsibility
//! - Store values under string keys with a per-entry expiry.
//! - Tag keys into invalidation groups so call sites never track keys.
//!
//! # Invariants
//! - Expired entries read as misses through `get`; expiry is checked lazily.
//! - Invalidating a group evicts every key ever tagged into it, then clears
//!   the tag set. There is no partial invalidation within a group.
//! - A backfill started before an invalidation is never stored after it
//!   (`set_if_unchanged`).

use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// TTL applied when a call does not override it.
pub const DEFAULT_TTL: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug)]
struct CacheState<V> {
    entries: HashMap<String, CacheEntry<V>>,
    groups: HashMap<String, HashSet<String>>,
    generation: u64,
}

/// Keyed TTL cache shared behind `&self`.
#[derive(Debug)]
pub struct KeyedCache<V> {
    default_ttl: Duration,
    state: Mutex<CacheState<V>>,
}

impl<V: Clone> Default for KeyedCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<V: Clone> KeyedCache<V> {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            default_ttl,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                groups: HashMap::new(),
                generation: 0,
            }),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Returns the live value for `key`, or `None` when missing or expired.
    pub fn get(&self, key: &str) -> Option<V> {
        let state = self.lock();
        let entry = state.entries.get(key)?;
        if entry.is_expired(Instant::now()) {
            debug!("event=cache_get module=cache status=expired key={key}");
            return None;
        }
        Some(entry.value.clone())
    }

    /// Returns the value for `key` even when its TTL elapsed.
    ///
    /// Entries removed by group invalidation are gone and never returned.
    pub fn get_stale(&self, key: &str) -> Option<V> {
        self.lock().entries.get(key).map(|entry| entry.value.clone())
    }

    /// Stores `value` under `key` and tags it into every named group.
    ///
    /// `ttl = None` applies the cache default.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>, groups: &[&str]) {
        let mut state = self.lock();
        self.insert_locked(&mut state, key, value, ttl, groups);
    }

    /// Stores `value` only if no invalidation happened since `generation`.
    ///
    /// Returns `false` when the value was discarded as possibly stale.
    pub fn set_if_unchanged(
        &self,
        generation: u64,
        key: &str,
        value: V,
        ttl: Option<Duration>,
        groups: &[&str],
    ) -> bool {
        let mut state = self.lock();
        if state.generation != generation {
            debug!("event=cache_set module=cache status=skip reason=invalidated key={key}");
            return false;
        }
        self.insert_locked(&mut state, key, value, ttl, groups);
        true
    }

    /// Monotonic counter bumped on every group invalidation.
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    /// Evicts every entry tagged into any of `groups`, then clears those tags.
    ///
    /// Returns how many entries were evicted.
    pub fn invalidate_groups(&self, groups: &[&str]) -> usize {
        let mut state = self.lock();
        state.generation += 1;

        let mut evicted = 0;
        for group in groups {
            let Some(keys) = state.groups.remove(*group) else {
                continue;
            };
            for key in keys {
                if state.entries.remove(&key).is_some() {
                    evicted += 1;
                }
            }
        }

        debug!(
            "event=cache_invalidate module=cache status=ok groups={} evicted={evicted}",
            groups.join(",")
        );
        evicted
    }

    /// Drops entries whose TTL elapsed. Optional; reads already treat them as misses.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired(now));
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert_locked(
        &self,
        state: &mut CacheState<V>,
        key: &str,
        value: V,
        ttl: Option<Duration>,
        groups: &[&str],
    ) {
        let expires_at = Instant::now() + ttl.unwrap_or(self.default_ttl);
        state
            .entries
            .insert(key.to_string(), CacheEntry { value, expires_at });
        for group in groups {
            state
                .groups
                .entry((*group).to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyedCache, DEFAULT_TTL};
    use std::time::Duration;

    #[test]
    fn default_ttl_is_ten_minutes() {
        let cache: KeyedCache<u32> = KeyedCache::default();
        assert_eq!(cache.default_ttl(), DEFAULT_TTL);
        assert_eq!(DEFAULT_TTL, Duration::from_secs(600));
    }

    #[test]
    fn get_returns_value_before_expiry() {
        let cache = KeyedCache::new(DEFAULT_TTL);
        cache.set("events:page:1", 7u32, None, &["events"]);
        assert_eq!(cache.get("events:page:1"), Some(7));
        assert_eq!(cache.get("events:page:2"), None);
    }

    #[test]
    fn expired_entry_is_a_miss_but_still_available_as_stale() {
        let cache = KeyedCache::new(DEFAULT_TTL);
        cache.set("count", 3u32, Some(Duration::ZERO), &["events"]);

        assert_eq!(cache.get("count"), None);
        assert_eq!(cache.get_stale("count"), Some(3));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.get_stale("count"), None);
    }

    #[test]
    fn invalidate_groups_evicts_every_tagged_key_and_clears_tags() {
        let cache = KeyedCache::new(DEFAULT_TTL);
        cache.set("a", 1u32, None, &["events"]);
        cache.set("b", 2u32, None, &["events", "assignments"]);
        cache.set("c", 3u32, None, &["workers"]);

        assert_eq!(cache.invalidate_groups(&["events"]), 2);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get_stale("b"), None);
        assert_eq!(cache.get("c"), Some(3));

        // Tags were cleared: re-setting `a` without groups survives a second pass.
        cache.set("a", 10u32, None, &[]);
        assert_eq!(cache.invalidate_groups(&["events"]), 0);
        assert_eq!(cache.get("a"), Some(10));
    }

    #[test]
    fn set_if_unchanged_discards_backfill_raced_by_invalidation() {
        let cache = KeyedCache::new(DEFAULT_TTL);
        let generation = cache.generation();
        cache.invalidate_groups(&["events"]);

        assert!(!cache.set_if_unchanged(generation, "page", 1u32, None, &["events"]));
        assert_eq!(cache.get("page"), None);

        let fresh = cache.generation();
        assert!(cache.set_if_unchanged(fresh, "page", 2u32, None, &["events"]));
        assert_eq!(cache.get("page"), Some(2));
    }
}
