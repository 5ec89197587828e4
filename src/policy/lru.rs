//! Least-Recently-Used eviction policy.
//!
//! [`LruCache`] keeps a recency ring beside the table: the least recently
//! used entry sits at the front, the most recently used at the back. Every
//! `get` (and every upsert) moves the touched entry to the back; `peek`
//! reads without touching. The victim is always the front entry.
//!
//! A touch mutates the ring, so `get` takes the cache's write lock and
//! bumps the generation counter — the touch is part of the read's
//! linearization point, and in-flight iterators are invalidated by it. Use
//! [`peek`](LruCache::peek) when recency must not change.
//!
//! ## Operations
//!
//! | Operation                  | Time   | Notes                           |
//! |----------------------------|--------|---------------------------------|
//! | `get`                      | O(1)   | Moves entry to the back         |
//! | `peek`                     | O(1)   | No reordering                   |
//! | `insert`                   | O(1)*  | *May evict the front entry      |
//! | `popitem`                  | O(1)   | Removes the least recent entry  |
//! | `least_recently_used(n)`   | O(n)   | Walks the ring from the front   |
//! | `most_recently_used`       | O(1)   | Back of the ring                |
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::LruCache;
//!
//! let cache = LruCache::new(2);
//! cache.insert("a", 1);
//! cache.insert("b", 2);
//! cache.get(&"a");      // "a" is now most recent
//! cache.insert("c", 3); // evicts "b"
//!
//! assert!(!cache.contains(&"b"));
//! assert_eq!(cache.least_recently_used(0), Some("a"));
//! ```

use std::hash::Hash;

use parking_lot::RwLock;

use crate::ds::arena::Slot;
use crate::ds::order_ring::OrderRing;
use crate::iter::{Items, Keys, SnapshotSource, Values};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Unsynchronized LRU core; see [`LruCache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct LruCore<K, V> {
    table: CacheTable<K, V, Option<Slot>>,
    ring: OrderRing,
    generation: u64,
}

impl<K, V> LruCore<K, V>
where
    K: Hash + Eq,
{
    pub fn new(maxsize: usize, capacity: usize) -> Self {
        Self {
            table: CacheTable::new(maxsize, capacity),
            ring: OrderRing::with_capacity(capacity),
            generation: 0,
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if let Some(slot) = self.table.find(&key) {
            let node = self.table.entry(slot).and_then(|entry| entry.meta);
            if let Some(entry) = self.table.entry_mut(slot) {
                let old = std::mem::replace(&mut entry.value, value);
                if let Some(node) = node {
                    self.ring.move_to_back(node);
                }
                self.generation += 1;
                return Some(old);
            }
        }
        if self.table.is_full() {
            self.evict_front();
        }
        let slot = self.table.insert_new(key, value, None);
        let node = self.ring.push_back(slot);
        if let Some(entry) = self.table.entry_mut(slot) {
            entry.meta = Some(node);
        }
        self.generation += 1;
        None
    }

    /// Reads a key and marks it most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = self.table.find(key)?;
        if let Some(node) = self.table.entry(slot).and_then(|entry| entry.meta) {
            self.ring.move_to_back(node);
            self.generation += 1;
        }
        self.table.entry(slot).map(|entry| &entry.value)
    }

    /// Reads a key without touching recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = self.table.find(key)?;
        self.table.entry(slot).map(|entry| &entry.value)
    }

    pub fn setdefault(&mut self, key: K, default: V) -> V
    where
        V: Clone,
    {
        if let Some(value) = self.get(&key) {
            return value.clone();
        }
        let value = default.clone();
        self.insert(key, default);
        value
    }

    pub fn pop(&mut self, key: &K) -> Option<V> {
        let entry = self.table.erase_key(key)?;
        if let Some(node) = entry.meta {
            self.ring.remove(node);
        }
        self.generation += 1;
        Some(entry.value)
    }

    /// Removes and returns the least recently used entry.
    pub fn popitem(&mut self) -> Option<(K, V)> {
        let slot = self.ring.pop_front()?;
        let entry = self.table.erase(slot)?;
        self.generation += 1;
        Some((entry.key, entry.value))
    }

    pub fn drain(&mut self, n: usize) -> usize {
        let mut removed = 0;
        for _ in 0..n {
            if self.popitem().is_none() {
                break;
            }
            removed += 1;
        }
        removed
    }

    pub fn update<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.insert(key, value);
        }
    }

    /// Returns the key at rank `n` from the least recent end.
    pub fn least_recently_used(&self, n: usize) -> Option<&K> {
        let slot = self.ring.nth(n)?;
        self.table.entry(slot).map(|entry| &entry.key)
    }

    /// Returns the most recently used key.
    pub fn most_recently_used(&self) -> Option<&K> {
        let slot = self.ring.back()?;
        self.table.entry(slot).map(|entry| &entry.key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.table.find(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.table.is_full()
    }

    pub fn maxsize(&self) -> usize {
        self.table.maxsize()
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    pub fn clear(&mut self, reuse: bool) {
        self.table.clear(reuse);
        if reuse {
            self.ring.clear();
        } else {
            self.ring.release();
        }
        self.generation += 1;
    }

    pub fn shrink_to_fit(&mut self) {
        self.table.shrink_to_fit();
        self.ring.shrink_to_fit();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn evict_front(&mut self) {
        if let Some(slot) = self.ring.pop_front() {
            self.table.erase(slot);
        }
    }

    pub(crate) fn table(&self) -> &CacheTable<K, V, Option<Slot>> {
        &self.table
    }

    pub(crate) fn ring(&self) -> &OrderRing {
        &self.ring
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.table.debug_validate_invariants();
        self.ring.debug_validate_invariants();
        assert_eq!(self.ring.len(), self.table.len());
    }
}

/// Thread-safe LRU cache: evicts the least recently used entry at the bound.
pub struct LruCache<K, V> {
    inner: RwLock<LruCore<K, V>>,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq,
{
    /// Creates a cache bounded by `maxsize` (0 meaning unbounded).
    pub fn new(maxsize: usize) -> Self {
        Self::with_capacity(maxsize, 0)
    }

    /// Creates a cache with `capacity` entries pre-allocated.
    pub fn with_capacity(maxsize: usize, capacity: usize) -> Self {
        Self {
            inner: RwLock::new(LruCore::new(maxsize, capacity)),
        }
    }

    /// Upserts a key and marks it most recently used; returns the previous
    /// value if one was replaced. Evicts the least recent entry when a new
    /// key arrives at the bound.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Looks up a key and marks it most recently used.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.write().get(key).cloned()
    }

    /// Looks up a key without touching recency.
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().peek(key).cloned()
    }

    /// Inserts `default` if the key is absent; returns the current value.
    /// Touches recency either way.
    pub fn setdefault(&self, key: K, default: V) -> V
    where
        V: Clone,
    {
        self.inner.write().setdefault(key, default)
    }

    /// Removes a key, returning its value if it was present.
    pub fn pop(&self, key: &K) -> Option<V> {
        self.inner.write().pop(key)
    }

    /// Removes and returns the least recently used entry.
    pub fn popitem(&self) -> Option<(K, V)> {
        self.inner.write().popitem()
    }

    /// Removes up to `n` least recent entries; returns the count removed.
    pub fn drain(&self, n: usize) -> usize {
        self.inner.write().drain(n)
    }

    /// Bulk upsert in iteration order.
    pub fn update<I>(&self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.inner.write().update(entries)
    }

    /// Returns the key at rank `n` from the least recent end;
    /// `least_recently_used(0)` is the next eviction victim.
    pub fn least_recently_used(&self, n: usize) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().least_recently_used(n).cloned()
    }

    /// Returns the most recently used key.
    pub fn most_recently_used(&self) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().most_recently_used().cloned()
    }

    /// Returns `true` if the key is present. Does not touch recency.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().contains(key)
    }

    /// Returns the number of live entries.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Returns `true` if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Returns `true` if the cache is at its bound.
    pub fn is_full(&self) -> bool {
        self.inner.read().is_full()
    }

    /// Returns the effective bound.
    pub fn maxsize(&self) -> usize {
        self.inner.read().maxsize()
    }

    /// Returns how many entries fit without reallocating.
    pub fn capacity(&self) -> usize {
        self.inner.read().capacity()
    }

    /// Removes all entries; with `reuse` the allocations are kept.
    pub fn clear(&self, reuse: bool) {
        self.inner.write().clear(reuse);
    }

    /// Shrinks storage to fit the current entries.
    pub fn shrink_to_fit(&self) {
        self.inner.write().shrink_to_fit();
    }

    /// Returns the mutation generation counter.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation()
    }

    /// Snapshot iterator over keys. Order is unspecified.
    pub fn keys(&self) -> Keys<'_, Self> {
        Keys::new(self)
    }

    /// Snapshot iterator over values. Order is unspecified.
    pub fn values(&self) -> Values<'_, Self> {
        Values::new(self)
    }

    /// Snapshot iterator over `(key, value)` pairs. Order is unspecified.
    pub fn items(&self) -> Items<'_, Self> {
        Items::new(self)
    }

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&LruCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<K, V> SnapshotSource for LruCache<K, V>
where
    K: Hash + Eq,
{
    type Key = K;
    type Value = V;
    type Meta = Option<Slot>;

    fn with_table<R>(&self, f: impl FnOnce(&CacheTable<K, V, Option<Slot>>, u64) -> R) -> R {
        let core = self.inner.read();
        f(core.table(), core.generation())
    }
}

impl<K, V> SharedCache<K, V> for LruCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key)
    }

    fn store(&self, key: K, value: V) -> Result<Option<V>, crate::error::OverflowError> {
        Ok(self.insert(key, value))
    }

    fn len(&self) -> usize {
        LruCache::len(self)
    }

    fn maxsize(&self) -> usize {
        LruCache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for LruCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.inner.read().clone()),
        }
    }
}

impl<K, V> std::fmt::Debug for LruCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("LruCache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for LruCache<K, V>
where
    K: Hash + Eq,
    V: PartialEq,
{
    fn eq(&self, other: &Self) -> bool {
        if std::ptr::eq(self, other) {
            return true;
        }
        let a = self.inner.read();
        let b = other.inner.read();
        multiset_eq(a.table(), b.table())
    }
}
