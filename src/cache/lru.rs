//! Size-bounded LRU cache with time-to-live expiry.
//!
//! Recency order and capacity eviction come from [`lru::LruCache`]; each
//! slot carries its insertion [`Instant`]. Expiry is checked on every
//! access, so an entry older than the TTL is never served even if the
//! sweeper has not removed it yet.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;

use ::lru::LruCache;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Point-in-time counters of a [`TtlLruCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Entries currently held, including expired ones not yet purged.
    pub entries: usize,
    /// Maximum number of entries.
    pub capacity: usize,
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing or an expired entry.
    pub misses: u64,
    /// Entries dropped to respect the capacity bound.
    pub evictions: u64,
    /// Entries dropped because their TTL elapsed.
    pub expirations: u64,
}

#[derive(Debug)]
struct Slot<V> {
    value: V,
    inserted_at: Instant,
}

#[derive(Debug)]
struct Inner<K: Hash + Eq, V> {
    slots: LruCache<K, Slot<V>>,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Concurrent LRU cache whose entries expire `ttl` after insertion.
///
/// All operations take an internal async mutex; none of them hold it across
/// an await point other than the lock itself.
#[derive(Debug)]
pub struct TtlLruCache<K: Hash + Eq, V> {
    inner: Mutex<Inner<K, V>>,
    ttl: Duration,
}

impl<K, V> TtlLruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Creates an empty cache. A capacity of zero is treated as one.
    #[must_use]
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                slots: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            ttl,
        }
    }

    /// Maximum number of entries.
    pub async fn capacity(&self) -> usize {
        self.inner.lock().await.slots.cap().get()
    }

    /// Time-to-live applied to every entry.
    #[must_use]
    pub const fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Returns a clone of the live value for `key` and marks it most
    /// recently used. Expired entries are removed and reported as absent.
    pub async fn get(&self, key: &K) -> Option<V> {
        let mut guard = self.inner.lock().await;
        let inner = &mut *guard;

        let expired = match inner.slots.peek(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(slot) => slot.inserted_at.elapsed() >= self.ttl,
        };
        if expired {
            inner.slots.pop(key);
            inner.expirations += 1;
            inner.misses += 1;
            return None;
        }

        let value = inner.slots.get(key).map(|slot| slot.value.clone());
        inner.hits += 1;
        value
    }

    /// Inserts or replaces `key`, restarting its TTL, and evicts the least
    /// recently used entry beyond the capacity.
    pub async fn put(&self, key: K, value: V) {
        self.put_if(key, value, || true).await;
    }

    /// Like [`TtlLruCache::put`], but only if `condition` still holds once
    /// the cache lock is taken. Returns `true` if the value was stored.
    pub async fn put_if<F>(&self, key: K, value: V, condition: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let mut guard = self.inner.lock().await;
        if !condition() {
            return false;
        }
        let replacing = guard.slots.contains(&key);
        let displaced = guard.slots.push(
            key,
            Slot {
                value,
                inserted_at: Instant::now(),
            },
        );
        if displaced.is_some() && !replacing {
            guard.evictions += 1;
        }
        true
    }

    /// Removes `key`. Returns `true` if it was present.
    pub async fn invalidate(&self, key: &K) -> bool {
        self.inner.lock().await.slots.pop(key).is_some()
    }

    /// Removes every key for which `predicate` returns `true` and returns
    /// how many were removed.
    pub async fn invalidate_if<F>(&self, mut predicate: F) -> usize
    where
        F: FnMut(&K) -> bool,
    {
        let mut guard = self.inner.lock().await;
        let doomed: Vec<K> = guard
            .slots
            .iter()
            .filter(|(k, _)| predicate(*k))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            guard.slots.pop(key);
        }
        doomed.len()
    }

    /// Removes all entries and returns how many there were.
    pub async fn clear(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let removed = guard.slots.len();
        guard.slots.clear();
        removed
    }

    /// Physically removes entries whose TTL has elapsed.
    pub async fn purge_expired(&self) -> usize {
        let mut guard = self.inner.lock().await;
        let ttl = self.ttl;
        let expired: Vec<K> = guard
            .slots
            .iter()
            .filter(|(_, slot)| slot.inserted_at.elapsed() >= ttl)
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            guard.slots.pop(key);
        }
        guard.expirations += expired.len() as u64;
        expired.len()
    }

    /// Number of entries held, including expired ones not yet purged.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.slots.len()
    }

    /// Returns `true` if the cache holds no entries.
    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.slots.is_empty()
    }

    /// Returns the current counters.
    pub async fn stats(&self) -> CacheStats {
        let guard = self.inner.lock().await;
        CacheStats {
            entries: guard.slots.len(),
            capacity: guard.slots.cap().get(),
            hits: guard.hits,
            misses: guard.misses,
            evictions: guard.evictions,
            expirations: guard.expirations,
        }
    }
}
