//! First-In-First-Out eviction policy.
//!
//! [`FifoCache`] keeps an insertion-order ring beside the table: new keys
//! append at the back, the victim is always the front (oldest) entry.
//! Updating a present key replaces the value in place and does not move the
//! entry — age is decided by first insertion only.
//!
//! ## Architecture
//!
//! ```text
//!   ring:  front ─► [a] ◄──► [b] ◄──► [c] ◄─ back
//!                    │        │        │
//!   table:        entry_a  entry_b  entry_c     meta = ring node handle
//!
//!   insert(d) at capacity:
//!     1. pop front node → erase entry_a
//!     2. insert entry_d, append node at back
//! ```
//!
//! ## Operations
//!
//! | Operation   | Time   | Notes                                   |
//! |-------------|--------|-----------------------------------------|
//! | `get`       | O(1)   | No reordering                           |
//! | `insert`    | O(1)*  | *May evict the front entry              |
//! | `popitem`   | O(1)   | Removes and returns the oldest entry    |
//! | `first(n)`  | O(n)   | Walks the ring from the front           |
//! | `last`      | O(1)   | Back of the ring                        |
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::FifoCache;
//!
//! let cache = FifoCache::new(2);
//! cache.insert("a", 1);
//! cache.insert("b", 2);
//! cache.insert("c", 3); // evicts "a"
//!
//! assert!(!cache.contains(&"a"));
//! assert_eq!(cache.popitem(), Some(("b", 2)));
//! ```

use std::hash::Hash;

use parking_lot::RwLock;

use crate::ds::arena::Slot;
use crate::ds::order_ring::OrderRing;
use crate::iter::{Items, Keys, SnapshotSource, Values};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Unsynchronized FIFO core; see [`FifoCache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct FifoCore<K, V> {
    table: CacheTable<K, V, Option<Slot>>,
    ring: OrderRing,
    generation: u64,
}

impl<K, V> FifoCore<K, V>
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
            if let Some(entry) = self.table.entry_mut(slot) {
                let old = std::mem::replace(&mut entry.value, value);
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

    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = self.table.find(key)?;
        self.table.entry(slot).map(|entry| &entry.value)
    }

    pub fn setdefault(&mut self, key: K, default: V) -> V
    where
        V: Clone,
    {
        if let Some(slot) = self.table.find(&key) {
            if let Some(entry) = self.table.entry(slot) {
                return entry.value.clone();
            }
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

    pub fn first(&self, n: usize) -> Option<&K> {
        let slot = self.ring.nth(n)?;
        self.table.entry(slot).map(|entry| &entry.key)
    }

    pub fn last(&self) -> Option<&K> {
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
        for slot in self.ring.iter() {
            let entry = self.table.entry(slot).expect("ring points at dead slot");
            assert!(entry.meta.is_some(), "entry missing its ring node");
        }
    }
}

/// Thread-safe FIFO cache: evicts the oldest entry at the bound.
pub struct FifoCache<K, V> {
    inner: RwLock<FifoCore<K, V>>,
}

impl<K, V> FifoCache<K, V>
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
            inner: RwLock::new(FifoCore::new(maxsize, capacity)),
        }
    }

    /// Upserts a key, returning the previous value if one was replaced.
    ///
    /// Inserting an absent key at the bound evicts the oldest entry first.
    /// Updating a present key leaves its age unchanged.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Looks up a key, cloning the value out.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().get(key).cloned()
    }

    /// Inserts `default` if the key is absent; returns the current value.
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

    /// Removes and returns the oldest entry, or `None` if empty.
    pub fn popitem(&self) -> Option<(K, V)> {
        self.inner.write().popitem()
    }

    /// Removes up to `n` oldest entries; returns the count removed.
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

    /// Returns the key at rank `n` from the oldest end; `first(0)` is the
    /// next eviction victim.
    pub fn first(&self, n: usize) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().first(n).cloned()
    }

    /// Returns the newest key.
    pub fn last(&self) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().last().cloned()
    }

    /// Returns `true` if the key is present.
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

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&FifoCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<K, V> SnapshotSource for FifoCache<K, V>
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

impl<K, V> SharedCache<K, V> for FifoCache<K, V>
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
        FifoCache::len(self)
    }

    fn maxsize(&self) -> usize {
        FifoCache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for FifoCache<K, V>
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

impl<K, V> std::fmt::Debug for FifoCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("FifoCache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for FifoCache<K, V>
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

#[cfg(test)]
mod tests {
    use super::*;

    // ==============================================
    // Eviction order
    // ==============================================

    mod eviction_order {
        use super::*;

        #[test]
        fn evicts_oldest_first() {
            let cache = FifoCache::new(2);
            cache.insert("a", 1);
            cache.insert("b", 2);
            cache.insert("c", 3);

            assert!(!cache.contains(&"a"));
            assert!(cache.contains(&"b"));
            assert!(cache.contains(&"c"));
            assert_eq!(cache.popitem(), Some(("b", 2)));
        }

        #[test]
        fn update_does_not_refresh_age() {
            let cache = FifoCache::new(2);
            cache.insert("a", 1);
            cache.insert("b", 2);
            cache.insert("a", 10); // still the oldest
            cache.insert("c", 3);

            assert!(!cache.contains(&"a"));
            assert!(cache.contains(&"b"));
        }

        #[test]
        fn popitem_follows_insertion_order() {
            let cache = FifoCache::new(10);
            for i in 0..5 {
                cache.insert(i, i * 10);
            }
            for i in 0..5 {
                assert_eq!(cache.popitem(), Some((i, i * 10)));
            }
            assert_eq!(cache.popitem(), None);
        }

        #[test]
        fn pop_middle_key_keeps_order_of_the_rest() {
            let cache = FifoCache::new(10);
            cache.insert(1, "a");
            cache.insert(2, "b");
            cache.insert(3, "c");
            assert_eq!(cache.pop(&2), Some("b"));

            assert_eq!(cache.popitem(), Some((1, "a")));
            assert_eq!(cache.popitem(), Some((3, "c")));
        }

        #[test]
        fn drain_removes_up_to_n() {
            let cache = FifoCache::new(10);
            for i in 0..4 {
                cache.insert(i, i);
            }
            assert_eq!(cache.drain(2), 2);
            assert_eq!(cache.len(), 2);
            assert_eq!(cache.drain(10), 2);
            assert!(cache.is_empty());
            assert_eq!(cache.drain(1), 0);
        }
    }

    // ==============================================
    // Ordered peeks
    // ==============================================

    mod ordered_peeks {
        use super::*;

        #[test]
        fn first_and_last_track_the_ring() {
            let cache = FifoCache::new(10);
            cache.insert("a", 1);
            cache.insert("b", 2);
            cache.insert("c", 3);

            assert_eq!(cache.first(0), Some("a"));
            assert_eq!(cache.first(1), Some("b"));
            assert_eq!(cache.first(2), Some("c"));
            assert_eq!(cache.first(3), None);
            assert_eq!(cache.last(), Some("c"));
        }

        #[test]
        fn first_on_empty_is_none() {
            let cache: FifoCache<&str, i32> = FifoCache::new(10);
            assert_eq!(cache.first(0), None);
            assert_eq!(cache.last(), None);
        }
    }

    // ==============================================
    // Bookkeeping
    // ==============================================

    mod bookkeeping {
        use super::*;

        #[test]
        fn len_is_bounded_by_maxsize() {
            let cache = FifoCache::new(3);
            for i in 0..50 {
                cache.insert(i, i);
            }
            assert_eq!(cache.len(), 3);
            assert!(cache.is_full());
        }

        #[test]
        fn clear_resets_order_state() {
            let cache = FifoCache::new(5);
            cache.insert(1, 1);
            cache.insert(2, 2);
            cache.clear(true);
            assert!(cache.is_empty());
            assert_eq!(cache.popitem(), None);

            cache.insert(3, 3);
            assert_eq!(cache.first(0), Some(3));
        }

        #[test]
        fn setdefault_keeps_existing_value() {
            let cache = FifoCache::new(5);
            cache.insert("k", 1);
            assert_eq!(cache.setdefault("k", 9), 1);
            assert_eq!(cache.setdefault("new", 7), 7);
            assert_eq!(cache.get(&"new"), Some(7));
        }

        #[test]
        fn core_invariants_hold_after_churn() {
            let mut core = FifoCore::new(8, 0);
            for i in 0..100u64 {
                core.insert(i, i);
                if i % 3 == 0 {
                    core.pop(&(i / 2));
                }
                if i % 7 == 0 {
                    core.popitem();
                }
            }
            core.debug_validate_invariants();
        }

        #[test]
        fn equality_ignores_insertion_order() {
            let a = FifoCache::new(10);
            let b = FifoCache::new(10);
            a.update(vec![(1, "x"), (2, "y")]);
            b.update(vec![(2, "y"), (1, "x")]);
            assert_eq!(a, b);
        }
    }
}
