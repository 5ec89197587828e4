//! Least-Frequently-Used eviction policy.
//!
//! [`LfuCache`] carries a 64-bit access counter in each entry's metadata.
//! Insertion starts a key at frequency 1; every `get` adds one; `peek` does
//! not. The victim is the entry with the minimum counter, ties broken by
//! insertion sequence (older first), found by a linear scan over the live
//! entries — acceptable because `n ≤ maxsize` and eviction is the rare path.
//!
//! Counters are never aged or halved; a `u64` cannot realistically
//! overflow from in-process touches.
//!
//! ## Operations
//!
//! | Operation                   | Time       | Notes                       |
//! |-----------------------------|------------|-----------------------------|
//! | `get`                       | O(1)       | Increments the counter      |
//! | `peek`                      | O(1)       | No counter change           |
//! | `insert`                    | O(1)*      | *O(n) scan when evicting    |
//! | `popitem`                   | O(n)       | Minimum (freq, seq) scan    |
//! | `least_frequently_used(n)`  | O(n log n) | Stable min-order rank       |
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::LfuCache;
//!
//! let cache = LfuCache::new(2);
//! cache.insert("a", 1);
//! cache.insert("b", 2);
//! cache.get(&"a");
//! cache.get(&"a");
//! cache.get(&"b");
//! cache.insert("c", 3); // evicts "b": freq 2 against "a" at freq 3
//!
//! assert!(!cache.contains(&"b"));
//! assert_eq!(cache.frequency(&"a"), Some(3));
//! ```

use std::hash::Hash;

use parking_lot::RwLock;

use crate::error::IterationError;
use crate::iter::{advance, Items, Keys, SnapshotSource, Step, Values};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Per-entry LFU metadata: access counter plus insertion sequence for
/// deterministic tie-breaking.
#[derive(Debug, Clone, Copy)]
pub struct LfuMeta {
    pub freq: u64,
    pub seq: u64,
}

/// Unsynchronized LFU core; see [`LfuCache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct LfuCore<K, V> {
    table: CacheTable<K, V, LfuMeta>,
    next_seq: u64,
    generation: u64,
}

impl<K, V> LfuCore<K, V>
where
    K: Hash + Eq,
{
    pub fn new(maxsize: usize, capacity: usize) -> Self {
        Self {
            table: CacheTable::new(maxsize, capacity),
            next_seq: 0,
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
            self.evict_minimum();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.table.insert_new(key, value, LfuMeta { freq: 1, seq });
        self.generation += 1;
        None
    }

    /// Reads a key, incrementing its access counter.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let slot = self.table.find(key)?;
        let entry = self.table.entry_mut(slot)?;
        entry.meta.freq = entry.meta.freq.saturating_add(1);
        self.generation += 1;
        self.table.entry(slot).map(|entry| &entry.value)
    }

    /// Reads a key without counting the access.
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = self.table.find(key)?;
        self.table.entry(slot).map(|entry| &entry.value)
    }

    /// Returns the access counter for a key.
    pub fn frequency(&self, key: &K) -> Option<u64> {
        let slot = self.table.find(key)?;
        self.table.entry(slot).map(|entry| entry.meta.freq)
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
        self.generation += 1;
        Some(entry.value)
    }

    /// Removes and returns the least frequently used entry.
    pub fn popitem(&mut self) -> Option<(K, V)> {
        let slot = self.minimum_slot()?;
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

    /// Returns the key at rank `n` in the stable minimum-frequency order.
    pub fn least_frequently_used(&self, n: usize) -> Option<&K> {
        if n >= self.table.len() {
            return None;
        }
        let mut ranked: Vec<(u64, u64, &K)> = self
            .table
            .iter()
            .map(|(_, entry)| (entry.meta.freq, entry.meta.seq, &entry.key))
            .collect();
        ranked.sort_unstable_by_key(|&(freq, seq, _)| (freq, seq));
        ranked.get(n).map(|&(_, _, key)| key)
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

    /// Inserts an entry with an explicit frequency; used when restoring a
    /// snapshot. Insertion sequence follows call order.
    pub(crate) fn insert_restored(&mut self, key: K, value: V, freq: u64) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.table.insert_new(
            key,
            value,
            LfuMeta {
                freq: freq.max(1),
                seq,
            },
        );
        self.generation += 1;
    }

    fn minimum_slot(&self) -> Option<crate::ds::arena::Slot> {
        self.table
            .iter()
            .min_by_key(|(_, entry)| (entry.meta.freq, entry.meta.seq))
            .map(|(slot, _)| slot)
    }

    fn evict_minimum(&mut self) {
        if let Some(slot) = self.minimum_slot() {
            self.table.erase(slot);
        }
    }

    pub(crate) fn table(&self) -> &CacheTable<K, V, LfuMeta> {
        &self.table
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.table.debug_validate_invariants();
        for (_, entry) in self.table.iter() {
            assert!(entry.meta.freq >= 1, "live entry with zero frequency");
        }
    }
}

/// Thread-safe LFU cache: evicts the least frequently used entry at the
/// bound, ties broken by age.
pub struct LfuCache<K, V> {
    inner: RwLock<LfuCore<K, V>>,
}

impl<K, V> LfuCache<K, V>
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
            inner: RwLock::new(LfuCore::new(maxsize, capacity)),
        }
    }

    /// Upserts a key, returning the previous value if one was replaced.
    ///
    /// A new key starts at frequency 1; updating a present key keeps its
    /// counter. Inserting at the bound evicts the minimum-frequency entry.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Looks up a key, incrementing its access counter.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.write().get(key).cloned()
    }

    /// Looks up a key without counting the access.
    pub fn peek(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.read().peek(key).cloned()
    }

    /// Returns the access counter for a key.
    pub fn frequency(&self, key: &K) -> Option<u64> {
        self.inner.read().frequency(key)
    }

    /// Inserts `default` if the key is absent; returns the current value.
    /// Counts as an access for a present key.
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

    /// Removes and returns the least frequently used entry.
    pub fn popitem(&self) -> Option<(K, V)> {
        self.inner.write().popitem()
    }

    /// Removes up to `n` least frequent entries; returns the count removed.
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

    /// Returns the key at rank `n` in the stable minimum-frequency order;
    /// `least_frequently_used(0)` is the next eviction victim.
    pub fn least_frequently_used(&self, n: usize) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().least_frequently_used(n).cloned()
    }

    /// Returns `true` if the key is present. Does not count an access.
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

    /// Snapshot iterator over `(key, value, frequency)` triples.
    pub fn items_with_frequency(&self) -> ItemsWithFrequency<'_, K, V> {
        ItemsWithFrequency {
            source: self,
            generation: self.with_table(|_, generation| generation),
            cursor: 0,
            done: false,
        }
    }

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&LfuCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }

    pub(crate) fn write_core<R>(&self, f: impl FnOnce(&mut LfuCore<K, V>) -> R) -> R {
        f(&mut self.inner.write())
    }
}

/// Snapshot iterator over `(key, value, frequency)` triples.
pub struct ItemsWithFrequency<'a, K, V> {
    source: &'a LfuCache<K, V>,
    generation: u64,
    cursor: usize,
    done: bool,
}

impl<K, V> Iterator for ItemsWithFrequency<'_, K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    type Item = Result<(K, V, u64), IterationError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let step = advance(self.source, self.generation, self.cursor, |entry| {
            (entry.key.clone(), entry.value.clone(), entry.meta.freq)
        });
        match step {
            Step::Yield(cursor, item) => {
                self.cursor = cursor;
                Some(Ok(item))
            },
            Step::Invalidated => {
                self.done = true;
                Some(Err(IterationError::new()))
            },
            Step::End => {
                self.done = true;
                None
            },
        }
    }
}

impl<K, V> SnapshotSource for LfuCache<K, V>
where
    K: Hash + Eq,
{
    type Key = K;
    type Value = V;
    type Meta = LfuMeta;

    fn with_table<R>(&self, f: impl FnOnce(&CacheTable<K, V, LfuMeta>, u64) -> R) -> R {
        let core = self.inner.read();
        f(core.table(), core.generation())
    }
}

impl<K, V> SharedCache<K, V> for LfuCache<K, V>
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
        LfuCache::len(self)
    }

    fn maxsize(&self) -> usize {
        LfuCache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for LfuCache<K, V>
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

impl<K, V> std::fmt::Debug for LfuCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("LfuCache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for LfuCache<K, V>
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
    // Frequency behavior
    // ==============================================

    mod frequency_behavior {
        use super::*;

        #[test]
        fn insert_starts_at_frequency_one() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            assert_eq!(cache.frequency(&"a"), Some(1));
        }

        #[test]
        fn get_increments_peek_does_not() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            cache.get(&"a");
            cache.get(&"a");
            assert_eq!(cache.frequency(&"a"), Some(3));

            cache.peek(&"a");
            cache.contains(&"a");
            assert_eq!(cache.frequency(&"a"), Some(3));
        }

        #[test]
        fn evicts_minimum_frequency() {
            let cache = LfuCache::new(2);
            cache.insert("a", 1);
            cache.insert("b", 2);
            cache.get(&"a");
            cache.get(&"a");
            cache.get(&"b");
            cache.insert("c", 3); // "b" (freq 2) < "a" (freq 3)

            assert!(!cache.contains(&"b"));
            assert!(cache.contains(&"a"));
            assert_eq!(cache.popitem(), Some(("c", 3)));
        }

        #[test]
        fn tie_breaks_by_insertion_order() {
            let cache = LfuCache::new(2);
            cache.insert("old", 1);
            cache.insert("new", 2);
            // Both at frequency 1; the older entry loses.
            cache.insert("x", 3);

            assert!(!cache.contains(&"old"));
            assert!(cache.contains(&"new"));
        }

        #[test]
        fn higher_frequency_is_never_evicted_before_lower() {
            let cache = LfuCache::new(3);
            cache.insert("hot", 0);
            for _ in 0..10 {
                cache.get(&"hot");
            }
            cache.insert("warm", 0);
            cache.get(&"warm");
            cache.insert("cold", 0);

            for key in ["x", "y", "z"] {
                cache.insert(key, 0); // each insert evicts the current minimum
                assert!(cache.contains(&"hot"));
            }
        }

        #[test]
        fn value_update_keeps_the_counter() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            cache.get(&"a");
            cache.insert("a", 2);
            assert_eq!(cache.frequency(&"a"), Some(2));
            assert_eq!(cache.peek(&"a"), Some(2));
        }
    }

    // ==============================================
    // Ranked peeks
    // ==============================================

    mod ranked_peeks {
        use super::*;

        #[test]
        fn least_frequently_used_ranks_stably() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            cache.insert("b", 2);
            cache.insert("c", 3);
            cache.get(&"a");
            cache.get(&"a");
            cache.get(&"c");

            assert_eq!(cache.least_frequently_used(0), Some("b")); // freq 1
            assert_eq!(cache.least_frequently_used(1), Some("c")); // freq 2
            assert_eq!(cache.least_frequently_used(2), Some("a")); // freq 3
            assert_eq!(cache.least_frequently_used(3), None);
        }

        #[test]
        fn items_with_frequency_reports_counters() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            cache.get(&"a");
            cache.insert("b", 2);

            let mut triples: Vec<_> = cache
                .items_with_frequency()
                .collect::<Result<_, _>>()
                .unwrap();
            triples.sort();
            assert_eq!(triples, vec![("a", 1, 2), ("b", 2, 1)]);
        }

        #[test]
        fn items_with_frequency_fails_after_mutation() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            cache.insert("b", 2);

            let mut iter = cache.items_with_frequency();
            assert!(iter.next().unwrap().is_ok());
            cache.get(&"a"); // a touch is a mutation
            assert!(iter.next().unwrap().is_err());
        }
    }

    // ==============================================
    // Bookkeeping
    // ==============================================

    mod bookkeeping {
        use super::*;

        #[test]
        fn len_is_bounded_by_maxsize() {
            let cache = LfuCache::new(5);
            for i in 0..100 {
                cache.insert(i, i);
            }
            assert_eq!(cache.len(), 5);
        }

        #[test]
        fn drain_removes_in_min_frequency_order() {
            let cache = LfuCache::new(10);
            cache.insert("a", 1);
            cache.insert("b", 2);
            cache.get(&"a");

            assert_eq!(cache.drain(1), 1);
            assert!(!cache.contains(&"b"));
            assert!(cache.contains(&"a"));
        }

        #[test]
        fn core_invariants_hold_after_churn() {
            let mut core = LfuCore::new(8, 0);
            for i in 0..200u64 {
                core.insert(i, i);
                core.get(&(i / 2));
                if i % 4 == 0 {
                    core.popitem();
                }
            }
            core.debug_validate_invariants();
        }
    }
}
