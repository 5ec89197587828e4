//! Random-replacement eviction policy.
//!
//! [`RrCache`] keeps a dense vector of live slots beside the table; each
//! entry's metadata stores its position in that vector. Picking a victim is
//! a uniform draw over the vector followed by a swap-remove, so eviction is
//! O(1) and no access pattern is tracked at all — `get` changes nothing.
//!
//! ## Architecture
//!
//! ```text
//!   order: [ s3 | s0 | s7 | s1 ]      dense, position stored in meta
//!
//!   evict_random:
//!     1. i = rng() % len
//!     2. swap order[i] with the last element, fix the moved entry's meta
//!     3. pop the vector, erase the victim from the table
//! ```
//!
//! The generator is an in-crate XorShift64 seeded from the bound; a
//! deterministic seed keeps tests and debugging reproducible, and nothing
//! here needs cryptographic draws. Generator state is guarded by the
//! cache's lock, so even [`random_key`](RrCache::random_key) takes the
//! write lock.
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::RrCache;
//!
//! let cache = RrCache::new(5);
//! for i in 0..20 {
//!     cache.insert(i, i * 10);
//! }
//! assert_eq!(cache.len(), 5); // fifteen uniformly chosen victims evicted
//! assert!(cache.random_key().is_some());
//! ```

use std::hash::Hash;

use parking_lot::RwLock;

use crate::ds::arena::Slot;
use crate::iter::{Items, Keys, SnapshotSource, Values};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Unsynchronized RR core; see [`RrCache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct RrCore<K, V> {
    table: CacheTable<K, V, usize>,
    order: Vec<Slot>,
    rng_state: u64,
    generation: u64,
}

impl<K, V> RrCore<K, V>
where
    K: Hash + Eq,
{
    pub fn new(maxsize: usize, capacity: usize) -> Self {
        Self {
            table: CacheTable::new(maxsize, capacity),
            order: Vec::with_capacity(capacity),
            // Non-zero seed for XorShift.
            rng_state: (maxsize as u64).wrapping_add(0x9e3779b97f4a7c15),
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
            self.evict_random();
        }
        let pos = self.order.len();
        let slot = self.table.insert_new(key, value, pos);
        self.order.push(slot);
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
        self.unlink_position(entry.meta);
        self.generation += 1;
        Some(entry.value)
    }

    /// Removes and returns a uniformly random entry.
    pub fn popitem(&mut self) -> Option<(K, V)> {
        if self.order.is_empty() {
            return None;
        }
        let pos = (self.next_rand() as usize) % self.order.len();
        let slot = self.order[pos];
        let entry = self.table.erase(slot)?;
        self.unlink_position(pos);
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

    /// Returns a uniformly random live key without removing it.
    pub fn random_key(&mut self) -> Option<&K> {
        if self.order.is_empty() {
            return None;
        }
        let pos = (self.next_rand() as usize) % self.order.len();
        let slot = self.order[pos];
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
            self.order.clear();
        } else {
            self.order = Vec::new();
        }
        self.generation += 1;
    }

    pub fn shrink_to_fit(&mut self) {
        self.table.shrink_to_fit();
        self.order.shrink_to_fit();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn next_rand(&mut self) -> u64 {
        // XorShift64: fast, deterministic, no system time needed.
        let mut x = self.rng_state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.rng_state = x;
        x
    }

    fn evict_random(&mut self) {
        if self.order.is_empty() {
            return;
        }
        let pos = (self.next_rand() as usize) % self.order.len();
        let slot = self.order[pos];
        self.table.erase(slot);
        self.unlink_position(pos);
    }

    /// Swap-removes `pos` from the dense vector, re-pointing the entry that
    /// moved into its place.
    fn unlink_position(&mut self, pos: usize) {
        let last = self.order.len() - 1;
        self.order.swap(pos, last);
        self.order.pop();
        if pos <= last {
            if let Some(&moved) = self.order.get(pos) {
                if let Some(entry) = self.table.entry_mut(moved) {
                    entry.meta = pos;
                }
            }
        }
    }

    pub(crate) fn table(&self) -> &CacheTable<K, V, usize> {
        &self.table
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.table.debug_validate_invariants();
        assert_eq!(self.order.len(), self.table.len());
        for (pos, &slot) in self.order.iter().enumerate() {
            let entry = self.table.entry(slot).expect("dense vector holds dead slot");
            assert_eq!(entry.meta, pos, "entry back-pointer out of sync");
        }
    }
}

/// Thread-safe random-replacement cache: evicts a uniformly random entry at
/// the bound.
pub struct RrCache<K, V> {
    inner: RwLock<RrCore<K, V>>,
}

impl<K, V> RrCache<K, V>
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
            inner: RwLock::new(RrCore::new(maxsize, capacity)),
        }
    }

    /// Upserts a key, returning the previous value if one was replaced.
    /// Inserting an absent key at the bound evicts a random entry first.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Looks up a key. Access does not change eviction probability.
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

    /// Removes and returns a uniformly random entry.
    pub fn popitem(&self) -> Option<(K, V)> {
        self.inner.write().popitem()
    }

    /// Removes up to `n` random entries; returns the count removed.
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

    /// Returns a uniformly random live key without removing it.
    ///
    /// Takes the write lock: the generator state is guarded by the cache's
    /// lock like everything else.
    pub fn random_key(&self) -> Option<K>
    where
        K: Clone,
    {
        self.inner.write().random_key().cloned()
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

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&RrCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<K, V> SnapshotSource for RrCache<K, V>
where
    K: Hash + Eq,
{
    type Key = K;
    type Value = V;
    type Meta = usize;

    fn with_table<R>(&self, f: impl FnOnce(&CacheTable<K, V, usize>, u64) -> R) -> R {
        let core = self.inner.read();
        f(core.table(), core.generation())
    }
}

impl<K, V> SharedCache<K, V> for RrCache<K, V>
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
        RrCache::len(self)
    }

    fn maxsize(&self) -> usize {
        RrCache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for RrCache<K, V>
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

impl<K, V> std::fmt::Debug for RrCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("RrCache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for RrCache<K, V>
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
    // Random eviction behavior
    // ==============================================

    mod eviction_behavior {
        use super::*;

        #[test]
        fn eviction_maintains_the_bound() {
            let cache = RrCache::new(5);
            for i in 0..50 {
                cache.insert(i, i * 10);
            }
            assert_eq!(cache.len(), 5);

            // Whatever survived must still be readable.
            let alive = (0..50).filter(|i| cache.contains(i)).count();
            assert_eq!(alive, 5);
        }

        #[test]
        fn get_does_not_change_eviction_probability() {
            let cache = RrCache::new(5);
            for i in 0..5 {
                cache.insert(i, i);
            }
            let g = cache.generation();
            for _ in 0..100 {
                cache.get(&0);
            }
            // No touch metadata, no generation movement.
            assert_eq!(cache.generation(), g);
        }

        #[test]
        fn popitem_removes_exactly_one() {
            let cache = RrCache::new(10);
            for i in 0..4 {
                cache.insert(i, i);
            }
            let (key, value) = cache.popitem().unwrap();
            assert_eq!(key, value);
            assert_eq!(cache.len(), 3);
            assert!(!cache.contains(&key));
        }

        #[test]
        fn popitem_on_empty_is_none() {
            let cache: RrCache<i32, i32> = RrCache::new(10);
            assert_eq!(cache.popitem(), None);
        }

        #[test]
        fn drain_removes_up_to_n() {
            let cache = RrCache::new(10);
            for i in 0..6 {
                cache.insert(i, i);
            }
            assert_eq!(cache.drain(4), 4);
            assert_eq!(cache.len(), 2);
            assert_eq!(cache.drain(10), 2);
        }
    }

    // ==============================================
    // Random key
    // ==============================================

    mod random_key {
        use super::*;

        #[test]
        fn random_key_returns_a_live_key() {
            let cache = RrCache::new(10);
            for i in 0..8 {
                cache.insert(i, i);
            }
            for _ in 0..50 {
                let key = cache.random_key().unwrap();
                assert!(cache.contains(&key));
            }
            assert_eq!(cache.len(), 8);
        }

        #[test]
        fn random_key_on_empty_is_none() {
            let cache: RrCache<i32, i32> = RrCache::new(10);
            assert_eq!(cache.random_key(), None);
        }

        #[test]
        fn random_key_eventually_varies() {
            let cache = RrCache::new(10);
            for i in 0..10 {
                cache.insert(i, i);
            }
            let distinct: std::collections::HashSet<_> =
                (0..100).filter_map(|_| cache.random_key()).collect();
            assert!(distinct.len() > 1, "100 draws never varied");
        }
    }

    // ==============================================
    // Internal consistency
    // ==============================================

    mod internal_consistency {
        use super::*;

        #[test]
        fn dense_vector_stays_in_sync_after_churn() {
            let mut core = RrCore::new(10, 0);
            for i in 0..500u64 {
                core.insert(i, i);
                if i % 3 == 0 {
                    core.pop(&(i / 2));
                }
                if i % 11 == 0 {
                    core.popitem();
                }
            }
            core.debug_validate_invariants();
        }

        #[test]
        fn pop_keeps_remaining_entries_reachable() {
            let cache = RrCache::new(0);
            for i in 0..20 {
                cache.insert(i, i);
            }
            assert_eq!(cache.pop(&7), Some(7));
            assert_eq!(cache.pop(&7), None);
            for i in (0..20).filter(|&i| i != 7) {
                assert_eq!(cache.get(&i), Some(i));
            }
        }
    }
}
