//! Bounded map without an eviction policy.
//!
//! [`Cache`] behaves like a thread-safe hash map with a hard bound: once
//! `len == maxsize`, inserting an absent key fails with
//! [`OverflowError`] instead of evicting anything. Because there is no
//! eviction order, the type deliberately has no `popitem` or `drain` —
//! operations that need a policy-chosen victim are not part of its surface.
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::Cache;
//!
//! let cache: Cache<&str, i32> = Cache::new(2);
//! assert_eq!(cache.insert("a", 1), Ok(None));
//! assert_eq!(cache.insert("a", 10), Ok(Some(1)));
//! assert_eq!(cache.insert("b", 2), Ok(None));
//!
//! // At the bound, a new key is rejected.
//! assert!(cache.insert("c", 3).is_err());
//! assert_eq!(cache.get(&"a"), Some(10));
//! ```

use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::OverflowError;
use crate::iter::{Items, Keys, SnapshotSource, Values};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Unsynchronized no-policy core; see [`Cache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct NoPolicyCore<K, V> {
    table: CacheTable<K, V, ()>,
    generation: u64,
}

impl<K, V> NoPolicyCore<K, V>
where
    K: Hash + Eq,
{
    pub fn new(maxsize: usize, capacity: usize) -> Self {
        Self {
            table: CacheTable::new(maxsize, capacity),
            generation: 0,
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Result<Option<V>, OverflowError> {
        if let Some(slot) = self.table.find(&key) {
            if let Some(entry) = self.table.entry_mut(slot) {
                let old = std::mem::replace(&mut entry.value, value);
                self.generation += 1;
                return Ok(Some(old));
            }
        }
        if self.table.is_full() {
            return Err(OverflowError::new(self.table.maxsize()));
        }
        self.table.insert_new(key, value, ());
        self.generation += 1;
        Ok(None)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let slot = self.table.find(key)?;
        self.table.entry(slot).map(|entry| &entry.value)
    }

    pub fn setdefault(&mut self, key: K, default: V) -> Result<V, OverflowError>
    where
        V: Clone,
    {
        if let Some(slot) = self.table.find(&key) {
            if let Some(entry) = self.table.entry(slot) {
                return Ok(entry.value.clone());
            }
        }
        let value = default.clone();
        self.insert(key, default)?;
        Ok(value)
    }

    pub fn pop(&mut self, key: &K) -> Option<V> {
        let entry = self.table.erase_key(key)?;
        self.generation += 1;
        Some(entry.value)
    }

    pub fn update<I>(&mut self, entries: I) -> Result<(), OverflowError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.insert(key, value)?;
        }
        Ok(())
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
        self.generation += 1;
    }

    pub fn shrink_to_fit(&mut self) {
        self.table.shrink_to_fit();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn table(&self) -> &CacheTable<K, V, ()> {
        &self.table
    }
}

/// Thread-safe bounded map with no eviction policy.
///
/// See the [module docs](self) for semantics. All methods take `&self`; a
/// single reader-writer lock serializes mutations.
pub struct Cache<K, V> {
    inner: RwLock<NoPolicyCore<K, V>>,
}

impl<K, V> Cache<K, V>
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
            inner: RwLock::new(NoPolicyCore::new(maxsize, capacity)),
        }
    }

    /// Upserts a key, returning the previous value if one was replaced.
    ///
    /// Fails with [`OverflowError`] when the key is absent and the cache is
    /// at its bound: this policy has nothing to evict.
    pub fn insert(&self, key: K, value: V) -> Result<Option<V>, OverflowError> {
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
    pub fn setdefault(&self, key: K, default: V) -> Result<V, OverflowError>
    where
        V: Clone,
    {
        self.inner.write().setdefault(key, default)
    }

    /// Removes a key, returning its value if it was present.
    pub fn pop(&self, key: &K) -> Option<V> {
        self.inner.write().pop(key)
    }

    /// Bulk upsert. Stops at the first overflow; earlier pairs stay.
    pub fn update<I>(&self, entries: I) -> Result<(), OverflowError>
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.inner.write().update(entries)
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

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&NoPolicyCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }
}

impl<K, V> SnapshotSource for Cache<K, V>
where
    K: Hash + Eq,
{
    type Key = K;
    type Value = V;
    type Meta = ();

    fn with_table<R>(&self, f: impl FnOnce(&CacheTable<K, V, ()>, u64) -> R) -> R {
        let core = self.inner.read();
        f(core.table(), core.generation())
    }
}

impl<K, V> SharedCache<K, V> for Cache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key)
    }

    fn store(&self, key: K, value: V) -> Result<Option<V>, crate::error::OverflowError> {
        self.insert(key, value)
    }

    fn len(&self) -> usize {
        Cache::len(self)
    }

    fn maxsize(&self) -> usize {
        Cache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for Cache<K, V>
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

impl<K, V> std::fmt::Debug for Cache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("Cache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for Cache<K, V>
where
    K: Hash + Eq,
    V: PartialEq,
{
    /// Two caches are equal iff they hold the same key-value multiset,
    /// regardless of internal order.
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
    // Basic operations
    // ==============================================

    mod basic_operations {
        use super::*;

        #[test]
        fn new_cache_is_empty() {
            let cache: Cache<&str, i32> = Cache::new(10);
            assert!(cache.is_empty());
            assert_eq!(cache.len(), 0);
            assert_eq!(cache.maxsize(), 10);
        }

        #[test]
        fn insert_returns_previous_value() {
            let cache = Cache::new(10);
            assert_eq!(cache.insert("k", 1), Ok(None));
            assert_eq!(cache.insert("k", 2), Ok(Some(1)));
            assert_eq!(cache.get(&"k"), Some(2));
            assert_eq!(cache.len(), 1);
        }

        #[test]
        fn pop_removes_the_key() {
            let cache = Cache::new(10);
            cache.insert("k", 1).unwrap();
            assert_eq!(cache.pop(&"k"), Some(1));
            assert_eq!(cache.pop(&"k"), None);
            assert!(!cache.contains(&"k"));
        }

        #[test]
        fn setdefault_inserts_only_when_absent() {
            let cache = Cache::new(10);
            assert_eq!(cache.setdefault("k", 1), Ok(1));
            assert_eq!(cache.setdefault("k", 9), Ok(1));
            assert_eq!(cache.get(&"k"), Some(1));
        }

        #[test]
        fn update_applies_all_pairs() {
            let cache = Cache::new(10);
            cache.update(vec![("a", 1), ("b", 2), ("a", 3)]).unwrap();
            assert_eq!(cache.len(), 2);
            assert_eq!(cache.get(&"a"), Some(3));
        }
    }

    // ==============================================
    // Bound enforcement
    // ==============================================

    mod bound_enforcement {
        use super::*;

        #[test]
        fn insert_past_bound_overflows() {
            let cache = Cache::new(2);
            cache.insert("a", 1).unwrap();
            cache.insert("b", 2).unwrap();
            assert!(cache.is_full());

            let err = cache.insert("c", 3).unwrap_err();
            assert_eq!(err.maxsize(), 2);
            assert_eq!(cache.len(), 2);
        }

        #[test]
        fn updating_a_present_key_never_overflows() {
            let cache = Cache::new(1);
            cache.insert("a", 1).unwrap();
            assert_eq!(cache.insert("a", 2), Ok(Some(1)));
        }

        #[test]
        fn setdefault_at_bound_overflows_for_new_keys() {
            let cache = Cache::new(1);
            cache.insert("a", 1).unwrap();
            assert_eq!(cache.setdefault("a", 9), Ok(1));
            assert!(cache.setdefault("b", 2).is_err());
        }

        #[test]
        fn update_stops_at_overflow() {
            let cache = Cache::new(2);
            let result = cache.update(vec![("a", 1), ("b", 2), ("c", 3)]);
            assert!(result.is_err());
            assert_eq!(cache.len(), 2);
            assert!(cache.contains(&"a"));
            assert!(cache.contains(&"b"));
        }

        #[test]
        fn maxsize_zero_is_unbounded() {
            let cache = Cache::new(0);
            assert_eq!(cache.maxsize(), crate::table::UNBOUNDED);
            for i in 0..1000 {
                cache.insert(i, i).unwrap();
            }
            assert_eq!(cache.len(), 1000);
            assert!(!cache.is_full());
        }
    }

    // ==============================================
    // Housekeeping
    // ==============================================

    mod housekeeping {
        use super::*;

        #[test]
        fn clear_reuse_keeps_capacity() {
            let cache = Cache::new(0);
            for i in 0..100 {
                cache.insert(i, i).unwrap();
            }
            let cap = cache.capacity();
            cache.clear(true);
            assert!(cache.is_empty());
            assert_eq!(cache.capacity(), cap);
        }

        #[test]
        fn clear_release_frees_capacity() {
            let cache = Cache::new(0);
            for i in 0..100 {
                cache.insert(i, i).unwrap();
            }
            cache.clear(false);
            assert!(cache.is_empty());
            assert_eq!(cache.capacity(), 0);
        }

        #[test]
        fn generation_increases_on_every_mutation() {
            let cache = Cache::new(10);
            let g0 = cache.generation();
            cache.insert("a", 1).unwrap();
            let g1 = cache.generation();
            assert!(g1 > g0);
            cache.pop(&"a");
            assert!(cache.generation() > g1);

            // Reads leave the counter alone.
            let g = cache.generation();
            cache.get(&"a");
            cache.contains(&"a");
            assert_eq!(cache.generation(), g);
        }
    }

    // ==============================================
    // Equality and iteration
    // ==============================================

    mod equality_and_iteration {
        use super::*;

        #[test]
        fn equal_contents_compare_equal() {
            let a = Cache::new(10);
            let b = Cache::new(20);
            a.update(vec![(1, "x"), (2, "y")]).unwrap();
            b.update(vec![(2, "y"), (1, "x")]).unwrap();
            assert_eq!(a, b);

            b.insert(3, "z").unwrap();
            assert_ne!(a, b);
        }

        #[test]
        fn items_visits_every_entry_once() {
            let cache = Cache::new(10);
            cache.update((0..5).map(|i| (i, i * 10))).unwrap();

            let mut seen: Vec<_> = cache.items().collect::<Result<_, _>>().unwrap();
            seen.sort_unstable();
            assert_eq!(seen, vec![(0, 0), (1, 10), (2, 20), (3, 30), (4, 40)]);
        }

        #[test]
        fn iterator_fails_after_mutation() {
            let cache = Cache::new(10);
            cache.update((0..5).map(|i| (i, i))).unwrap();

            let mut keys = cache.keys();
            assert!(keys.next().unwrap().is_ok());
            cache.insert(99, 99).unwrap();
            assert!(keys.next().unwrap().is_err());
            // Fused after the failure.
            assert!(keys.next().is_none());
        }

        #[test]
        fn clone_is_a_detached_copy() {
            let cache = Cache::new(10);
            cache.insert("a", 1).unwrap();
            let copy = cache.clone();
            copy.insert("b", 2).unwrap();
            assert_eq!(cache.len(), 1);
            assert_eq!(copy.len(), 2);
        }
    }
}
