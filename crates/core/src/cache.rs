//! Bounded cache
//!
//! Least-recently-used eviction with an optional per-entry time-to-live.
//! Used for context-free reply caching and tool result caching.

use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Cache statistics
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub expirations: AtomicU64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    fn record_expiration(&self) {
        self.expirations.fetch_add(1, Ordering::Relaxed);
    }
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
    /// Position in the recency index
    tick: u64,
}

struct Inner<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// tick -> key, oldest first
    recency: BTreeMap<u64, K>,
    next_tick: u64,
}

impl<K: Hash + Eq + Clone, V> Inner<K, V> {
    fn bump(&mut self, key: &K) {
        let tick = self.next_tick;
        self.next_tick += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) -> Option<Entry<V>> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.tick);
        Some(entry)
    }

    fn pop_lru(&mut self) -> Option<K> {
        let (_, key) = self.recency.pop_first()?;
        self.entries.remove(&key);
        Some(key)
    }
}

/// Thread-safe LRU cache with TTL expiry
///
/// Reads refresh recency, so "least recently used" really means used, not
/// merely inserted. Expired entries are dropped lazily on access and eagerly
/// by [`TtlLruCache::purge_expired`].
pub struct TtlLruCache<K, V> {
    capacity: usize,
    ttl: Option<Duration>,
    inner: Mutex<Inner<K, V>>,
    pub stats: CacheStats,
}

impl<K: Hash + Eq + Clone, V: Clone> TtlLruCache<K, V> {
    /// Create a cache holding at most `capacity` entries, each living at most `ttl`
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                recency: BTreeMap::new(),
                next_tick: 0,
            }),
            stats: CacheStats::default(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    fn get_at(&self, key: &K, now: Instant) -> Option<V> {
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            None => {
                self.stats.record_miss();
                return None;
            }
            Some(entry) => self.is_expired(entry, now),
        };

        if expired {
            inner.remove(key);
            self.stats.record_expiration();
            self.stats.record_miss();
            return None;
        }

        inner.bump(key);
        self.stats.record_hit();
        inner.entries.get(key).map(|e| e.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    fn insert_at(&self, key: K, value: V, now: Instant) {
        let mut inner = self.inner.lock();

        if let Some(entry) = inner.entries.get_mut(&key) {
            entry.value = value;
            entry.inserted_at = now;
            inner.bump(&key);
            return;
        }

        while inner.entries.len() >= self.capacity {
            if inner.pop_lru().is_none() {
                break;
            }
            self.stats.record_eviction();
        }

        let tick = inner.next_tick;
        inner.next_tick += 1;
        inner.recency.insert(tick, key.clone());
        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: now,
                tick,
            },
        );
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.lock().remove(key).map(|e| e.value)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        self.purge_expired_at(Instant::now())
    }

    fn purge_expired_at(&self, now: Instant) -> usize {
        let mut inner = self.inner.lock();
        let expired: Vec<K> = inner
            .entries
            .iter()
            .filter(|(_, e)| self.is_expired(e, now))
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            inner.remove(key);
            self.stats.record_expiration();
        }
        expired.len()
    }

    fn is_expired(&self, entry: &Entry<V>, now: Instant) -> bool {
        match self.ttl {
            Some(ttl) => now.saturating_duration_since(entry.inserted_at) >= ttl,
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.recency.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
