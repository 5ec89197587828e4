//! Per-key time-to-live eviction policy.
//!
//! [`VttlCache`] lets every insert choose its own ttl — or none, in which
//! case the entry never expires. Finite deadlines are tracked in a
//! [`DeadlineHeap`] (a lazy min-heap), so the earliest deadline is found in
//! O(log n) and an expiry sweep of k entries costs O(k log n); never-expiring
//! entries are not in the heap at all.
//!
//! Expiry is lazy: every mutating operation first pops all entries whose
//! deadline has passed, and a read that finds a due entry removes it and
//! reports the key absent. [`popitem`](VttlCache::popitem) removes the entry
//! closest to expiration; when only never-expiring entries remain it falls
//! back to insertion order.
//!
//! Setting a deadline requires the explicit ttl argument:
//! [`insert`](VttlCache::insert) with `None` — including the plain
//! [`insert_value`](VttlCache::insert_value) convenience — stores the entry
//! as never-expiring, and on a present key it *clears* any prior deadline:
//! a plain assignment replaces the entry wholesale.
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use boxcache::VttlCache;
//!
//! let cache = VttlCache::new(5);
//! cache.insert(1, "short", Some(Duration::from_millis(40)));
//! cache.insert(2, "long", Some(Duration::from_secs(60)));
//! cache.insert(3, "forever", None);
//!
//! std::thread::sleep(Duration::from_millis(60));
//! assert_eq!(cache.get(&1), None);
//! assert_eq!(cache.get(&2), Some("long"));
//! assert_eq!(cache.get(&3), Some("forever"));
//! ```

use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::ds::arena::Slot;
use crate::ds::deadline_heap::DeadlineHeap;
use crate::error::IterationError;
use crate::iter::{advance, SnapshotSource, Step};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Per-entry VTTL metadata: optional absolute deadline plus insertion
/// sequence for the never-expiring fallback order.
#[derive(Debug, Clone, Copy)]
pub struct VttlMeta {
    pub(crate) deadline: Option<Instant>,
    pub(crate) seq: u64,
}

/// Unsynchronized VTTL core; see [`VttlCache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct VttlCore<K, V> {
    table: CacheTable<K, V, VttlMeta>,
    heap: DeadlineHeap,
    next_seq: u64,
    generation: u64,
}

impl<K, V> VttlCore<K, V>
where
    K: Hash + Eq,
{
    pub fn new(maxsize: usize, capacity: usize) -> Self {
        Self {
            table: CacheTable::new(maxsize, capacity),
            heap: DeadlineHeap::new(),
            next_seq: 0,
            generation: 0,
        }
    }

    /// Removes every entry whose deadline is at or before `now`.
    pub fn sweep(&mut self, now: Instant) {
        while let Some((slot, _)) = self.heap.pop_due(now) {
            self.table.erase(slot);
            self.generation += 1;
        }
        self.heap.maybe_rebuild(4);
    }

    /// Upserts a key with an optional ttl.
    ///
    /// On a present key the value is replaced and the deadline reset from
    /// `ttl` — `None` clears it to never-expiring.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is `Some(Duration::ZERO)`.
    pub fn insert(&mut self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        assert!(
            ttl.map_or(true, |ttl| !ttl.is_zero()),
            "ttl must be positive and non-zero"
        );
        let now = Instant::now();
        self.sweep(now);
        let deadline = ttl.map(|ttl| now + ttl);

        if let Some(slot) = self.table.find(&key) {
            if let Some(entry) = self.table.entry_mut(slot) {
                let old = std::mem::replace(&mut entry.value, value);
                entry.meta.deadline = deadline;
                self.heap.remove(slot);
                if let Some(due) = deadline {
                    self.heap.insert(slot, due);
                }
                self.generation += 1;
                return Some(old);
            }
        }

        if self.table.is_full() {
            self.evict_victim();
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = self.table.insert_new(key, value, VttlMeta { deadline, seq });
        if let Some(due) = deadline {
            self.heap.insert(slot, due);
        }
        self.generation += 1;
        None
    }

    /// Reads a key; a due entry is removed and reported absent.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<&V> {
        let slot = self.table.find(key)?;
        let due = self
            .table
            .entry(slot)
            .map(|entry| entry.meta.deadline.is_some_and(|deadline| deadline <= now))?;
        if due {
            self.remove_slot(slot);
            return None;
        }
        self.table.entry(slot).map(|entry| &entry.value)
    }

    /// Reads a key together with its remaining seconds (0.0 when
    /// never-expiring).
    pub fn get_with_expire(&mut self, key: &K, now: Instant) -> Option<(&V, f64)> {
        let slot = self.table.find(key)?;
        let deadline = self.table.entry(slot).map(|entry| entry.meta.deadline)?;
        if deadline.is_some_and(|deadline| deadline <= now) {
            self.remove_slot(slot);
            return None;
        }
        let remaining = remaining_seconds(deadline, now);
        self.table
            .entry(slot)
            .map(|entry| (&entry.value, remaining))
    }

    pub fn setdefault(&mut self, key: K, default: V, ttl: Option<Duration>) -> V
    where
        V: Clone,
    {
        let now = Instant::now();
        self.sweep(now);
        if let Some(value) = self.get(&key, now) {
            return value.clone();
        }
        let value = default.clone();
        self.insert(key, default, ttl);
        value
    }

    pub fn pop(&mut self, key: &K) -> Option<V> {
        self.pop_with_expire(key).map(|(value, _)| value)
    }

    pub fn pop_with_expire(&mut self, key: &K) -> Option<(V, f64)> {
        let now = Instant::now();
        self.sweep(now);
        let slot = self.table.find(key)?;
        let deadline = self.table.entry(slot).map(|entry| entry.meta.deadline)?;
        let entry = self.remove_slot(slot)?;
        if deadline.is_some_and(|deadline| deadline <= now) {
            return None;
        }
        Some((entry.value, remaining_seconds(deadline, now)))
    }

    /// Removes the entry closest to expiration; among never-expiring
    /// entries, the oldest insertion goes first.
    pub fn popitem(&mut self) -> Option<(K, V)> {
        self.popitem_with_expire().map(|(key, value, _)| (key, value))
    }

    pub fn popitem_with_expire(&mut self) -> Option<(K, V, f64)> {
        let now = Instant::now();
        self.sweep(now);
        let slot = match self.heap.pop_earliest() {
            Some((slot, _)) => slot,
            None => self.oldest_never_expiring()?,
        };
        let entry = self.table.erase(slot)?;
        self.generation += 1;
        let remaining = remaining_seconds(entry.meta.deadline, now);
        Some((entry.key, entry.value, remaining))
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

    pub fn update<I>(&mut self, entries: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.insert(key, value, ttl);
        }
    }

    /// Returns the key at rank `n` in insertion order.
    pub fn first(&self, n: usize) -> Option<&K> {
        if n >= self.table.len() {
            return None;
        }
        let mut ordered: Vec<(u64, &K)> = self
            .table
            .iter()
            .map(|(_, entry)| (entry.meta.seq, &entry.key))
            .collect();
        ordered.sort_unstable_by_key(|&(seq, _)| seq);
        ordered.get(n).map(|&(_, key)| key)
    }

    /// Returns the most recently inserted key.
    pub fn last(&self) -> Option<&K> {
        self.table
            .iter()
            .max_by_key(|(_, entry)| entry.meta.seq)
            .map(|(_, entry)| &entry.key)
    }

    /// Deadline-aware membership test; never mutates.
    pub fn contains(&self, key: &K, now: Instant) -> bool {
        self.table
            .find(key)
            .and_then(|slot| self.table.entry(slot))
            .is_some_and(|entry| !entry.meta.deadline.is_some_and(|deadline| deadline <= now))
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

    /// Forces an expiry sweep; without `reuse`, storage is tightened too.
    pub fn expire(&mut self, reuse: bool) {
        self.sweep(Instant::now());
        if !reuse {
            self.table.shrink_to_fit();
            self.heap.shrink_to_fit();
            self.generation += 1;
        }
    }

    pub fn clear(&mut self, reuse: bool) {
        self.table.clear(reuse);
        if reuse {
            self.heap.clear();
        } else {
            self.heap.release();
        }
        self.generation += 1;
    }

    pub fn shrink_to_fit(&mut self) {
        self.table.shrink_to_fit();
        self.heap.shrink_to_fit();
        self.generation += 1;
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    fn evict_victim(&mut self) {
        let slot = match self.heap.pop_earliest() {
            Some((slot, _)) => Some(slot),
            None => self.oldest_never_expiring(),
        };
        if let Some(slot) = slot {
            self.table.erase(slot);
        }
    }

    fn oldest_never_expiring(&self) -> Option<Slot> {
        self.table
            .iter()
            .filter(|(_, entry)| entry.meta.deadline.is_none())
            .min_by_key(|(_, entry)| entry.meta.seq)
            .map(|(slot, _)| slot)
    }

    /// Inserts an entry with an explicit deadline; used when restoring a
    /// snapshot. Insertion sequence follows call order.
    pub(crate) fn insert_restored(&mut self, key: K, value: V, deadline: Option<Instant>) {
        let seq = self.next_seq;
        self.next_seq += 1;
        let slot = self.table.insert_new(key, value, VttlMeta { deadline, seq });
        if let Some(due) = deadline {
            self.heap.insert(slot, due);
        }
        self.generation += 1;
    }

    fn remove_slot(&mut self, slot: Slot) -> Option<crate::table::Entry<K, V, VttlMeta>> {
        let entry = self.table.erase(slot)?;
        self.heap.remove(slot);
        self.generation += 1;
        Some(entry)
    }

    pub(crate) fn table(&self) -> &CacheTable<K, V, VttlMeta> {
        &self.table
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.table.debug_validate_invariants();
        let finite = self
            .table
            .iter()
            .filter(|(_, entry)| entry.meta.deadline.is_some())
            .count();
        assert_eq!(finite, self.heap.len());
        for (slot, entry) in self.table.iter() {
            match entry.meta.deadline {
                Some(deadline) => {
                    assert_eq!(self.heap.deadline_of(slot), Some(deadline));
                },
                None => assert_eq!(self.heap.deadline_of(slot), None),
            }
        }
    }
}

fn remaining_seconds(deadline: Option<Instant>, now: Instant) -> f64 {
    match deadline {
        Some(deadline) => deadline.saturating_duration_since(now).as_secs_f64(),
        None => 0.0,
    }
}

/// Thread-safe cache with a per-key time-to-live.
pub struct VttlCache<K, V> {
    inner: RwLock<VttlCore<K, V>>,
}

impl<K, V> VttlCache<K, V>
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
            inner: RwLock::new(VttlCore::new(maxsize, capacity)),
        }
    }

    /// Upserts a key with an optional ttl; `None` means never expires.
    ///
    /// On a present key the value is replaced and the deadline reset from
    /// `ttl` — in particular, `None` clears a previously set deadline.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is `Some(Duration::ZERO)`.
    pub fn insert(&self, key: K, value: V, ttl: Option<Duration>) -> Option<V> {
        self.inner.write().insert(key, value, ttl)
    }

    /// Plain-assignment upsert: stores the entry as never-expiring.
    pub fn insert_value(&self, key: K, value: V) -> Option<V> {
        self.insert(key, value, None)
    }

    /// Looks up a key. A due entry is removed and reported absent.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.write().get(key, Instant::now()).cloned()
    }

    /// Looks up a key, returning `(value, remaining_seconds)`; the
    /// remaining time is `0.0` for absent keys and for live never-expiring
    /// entries.
    pub fn get_with_expire(&self, key: &K) -> (Option<V>, f64)
    where
        V: Clone,
    {
        match self.inner.write().get_with_expire(key, Instant::now()) {
            Some((value, remaining)) => (Some(value.clone()), remaining),
            None => (None, 0.0),
        }
    }

    /// Inserts `default` with `ttl` if the key is absent or due; returns
    /// the current value.
    pub fn setdefault(&self, key: K, default: V, ttl: Option<Duration>) -> V
    where
        V: Clone,
    {
        self.inner.write().setdefault(key, default, ttl)
    }

    /// Removes a key, returning its value if it was present and live.
    pub fn pop(&self, key: &K) -> Option<V> {
        self.inner.write().pop(key)
    }

    /// Removes a key, returning `(value, remaining_seconds)`; `(None, 0.0)`
    /// when absent or due.
    pub fn pop_with_expire(&self, key: &K) -> (Option<V>, f64) {
        match self.inner.write().pop_with_expire(key) {
            Some((value, remaining)) => (Some(value), remaining),
            None => (None, 0.0),
        }
    }

    /// Removes and returns the entry closest to expiration; among
    /// never-expiring entries, the oldest insertion goes first.
    pub fn popitem(&self) -> Option<(K, V)> {
        self.inner.write().popitem()
    }

    /// Like [`popitem`](Self::popitem), with the remaining seconds.
    pub fn popitem_with_expire(&self) -> Option<(K, V, f64)> {
        self.inner.write().popitem_with_expire()
    }

    /// Removes up to `n` entries in expiration order; returns the count
    /// removed.
    pub fn drain(&self, n: usize) -> usize {
        self.inner.write().drain(n)
    }

    /// Bulk upsert; every pair gets the same optional ttl.
    pub fn update<I>(&self, entries: I, ttl: Option<Duration>)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        self.inner.write().update(entries, ttl)
    }

    /// Returns the key at rank `n` in insertion order.
    pub fn first(&self, n: usize) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().first(n).cloned()
    }

    /// Returns the most recently inserted key.
    pub fn last(&self) -> Option<K>
    where
        K: Clone,
    {
        self.inner.read().last().cloned()
    }

    /// Deadline-aware membership test. Never removes anything.
    pub fn contains(&self, key: &K) -> bool {
        self.inner.read().contains(key, Instant::now())
    }

    /// Returns the number of entries, including due-but-unswept ones.
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

    /// Forces an expiry sweep; without `reuse`, storage is tightened too.
    pub fn expire(&self, reuse: bool) {
        self.inner.write().expire(reuse);
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

    /// Snapshot iterator over live keys. Order is unspecified.
    pub fn keys(&self) -> VttlKeys<'_, K, V> {
        VttlKeys(VttlEntries::new(self))
    }

    /// Snapshot iterator over live values. Order is unspecified.
    pub fn values(&self) -> VttlValues<'_, K, V> {
        VttlValues(VttlEntries::new(self))
    }

    /// Snapshot iterator over live `(key, value)` pairs.
    pub fn items(&self) -> VttlItems<'_, K, V> {
        VttlItems(VttlEntries::new(self))
    }

    /// Snapshot iterator over live `(key, value, remaining_seconds)`;
    /// remaining is `0.0` for never-expiring entries.
    pub fn items_with_expire(&self) -> VttlItemsWithExpire<'_, K, V> {
        VttlItemsWithExpire(VttlEntries::new(self))
    }

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&VttlCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }

    pub(crate) fn write_core<R>(&self, f: impl FnOnce(&mut VttlCore<K, V>) -> R) -> R {
        f(&mut self.inner.write())
    }
}

/// Shared machinery for the VTTL iterators: generation-checked cursor that
/// skips entries already past their deadline at advance time.
struct VttlEntries<'a, K, V> {
    source: &'a VttlCache<K, V>,
    generation: u64,
    cursor: usize,
    done: bool,
}

impl<'a, K, V> VttlEntries<'a, K, V>
where
    K: Hash + Eq,
{
    fn new(source: &'a VttlCache<K, V>) -> Self {
        let generation = source.with_table(|_, generation| generation);
        Self {
            source,
            generation,
            cursor: 0,
            done: false,
        }
    }

    fn next_entry<T>(
        &mut self,
        project: impl Fn(&K, &V, f64) -> T,
    ) -> Option<Result<T, IterationError>>
    where
        K: Clone,
        V: Clone,
    {
        if self.done {
            return None;
        }
        let now = Instant::now();
        loop {
            let step = advance(self.source, self.generation, self.cursor, |entry| {
                if entry.meta.deadline.is_some_and(|deadline| deadline <= now) {
                    None
                } else {
                    Some(project(
                        &entry.key,
                        &entry.value,
                        remaining_seconds(entry.meta.deadline, now),
                    ))
                }
            });
            match step {
                Step::Yield(cursor, Some(item)) => {
                    self.cursor = cursor;
                    return Some(Ok(item));
                },
                Step::Yield(cursor, None) => {
                    self.cursor = cursor;
                },
                Step::Invalidated => {
                    self.done = true;
                    return Some(Err(IterationError::new()));
                },
                Step::End => {
                    self.done = true;
                    return None;
                },
            }
        }
    }
}

macro_rules! vttl_iter {
    ($(#[$doc:meta])* $name:ident, $item:ty, |$key:ident, $value:ident, $remaining:ident| $project:expr) => {
        $(#[$doc])*
        pub struct $name<'a, K, V>(VttlEntries<'a, K, V>);

        impl<K, V> Iterator for $name<'_, K, V>
        where
            K: Hash + Eq + Clone,
            V: Clone,
        {
            type Item = Result<$item, IterationError>;

            fn next(&mut self) -> Option<Self::Item> {
                self.0.next_entry(|$key, $value, $remaining| $project)
            }
        }
    };
}

vttl_iter!(
    /// Snapshot iterator over live keys.
    VttlKeys,
    K,
    |key, _value, _remaining| key.clone()
);

vttl_iter!(
    /// Snapshot iterator over live values.
    VttlValues,
    V,
    |_key, value, _remaining| value.clone()
);

vttl_iter!(
    /// Snapshot iterator over live `(key, value)` pairs.
    VttlItems,
    (K, V),
    |key, value, _remaining| (key.clone(), value.clone())
);

vttl_iter!(
    /// Snapshot iterator over live `(key, value, remaining_seconds)`.
    VttlItemsWithExpire,
    (K, V, f64),
    |key, value, remaining| (key.clone(), value.clone(), remaining)
);

impl<K, V> SnapshotSource for VttlCache<K, V>
where
    K: Hash + Eq,
{
    type Key = K;
    type Value = V;
    type Meta = VttlMeta;

    fn with_table<R>(&self, f: impl FnOnce(&CacheTable<K, V, VttlMeta>, u64) -> R) -> R {
        let core = self.inner.read();
        f(core.table(), core.generation())
    }
}

impl<K, V> SharedCache<K, V> for VttlCache<K, V>
where
    K: Hash + Eq,
    V: Clone,
{
    fn lookup(&self, key: &K) -> Option<V> {
        self.get(key)
    }

    fn store(&self, key: K, value: V) -> Result<Option<V>, crate::error::OverflowError> {
        Ok(self.insert(key, value, None))
    }

    fn len(&self) -> usize {
        VttlCache::len(self)
    }

    fn maxsize(&self) -> usize {
        VttlCache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for VttlCache<K, V>
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

impl<K, V> std::fmt::Debug for VttlCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("VttlCache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for VttlCache<K, V>
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
    use std::thread::sleep;

    // ==============================================
    // Per-key expiry
    // ==============================================

    mod per_key_expiry {
        use super::*;

        #[test]
        fn keys_expire_independently() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::from_millis(250)));
            cache.insert(2, 2, Some(Duration::from_secs(60)));
            cache.insert(3, 3, Some(Duration::from_millis(40)));

            sleep(Duration::from_millis(80));
            assert_eq!(cache.get(&3), None);
            assert_eq!(cache.get(&1), Some(1));
            assert_eq!(cache.get(&2), Some(2));
        }

        #[test]
        fn never_expiring_entries_stay() {
            let cache = VttlCache::new(5);
            cache.insert(1, "forever", None);
            cache.insert(2, "brief", Some(Duration::from_millis(30)));

            sleep(Duration::from_millis(50));
            assert_eq!(cache.get(&1), Some("forever"));
            assert_eq!(cache.get(&2), None);
        }

        #[test]
        fn mutating_operations_sweep_due_entries() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::from_millis(30)));
            cache.insert(2, 2, Some(Duration::from_millis(30)));
            sleep(Duration::from_millis(50));

            cache.insert(3, 3, None);
            assert_eq!(cache.len(), 1);
        }

        #[test]
        fn contains_is_deadline_aware_without_removing() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::from_millis(30)));
            sleep(Duration::from_millis(50));

            assert!(!cache.contains(&1));
            assert_eq!(cache.len(), 1);
            cache.expire(true);
            assert_eq!(cache.len(), 0);
        }

        #[test]
        #[should_panic(expected = "ttl must be positive")]
        fn zero_ttl_is_rejected() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::ZERO));
        }
    }

    // ==============================================
    // Deadline updates
    // ==============================================

    mod deadline_updates {
        use super::*;

        #[test]
        fn plain_assignment_clears_deadline() {
            let cache = VttlCache::new(5);
            cache.insert(1, "a", Some(Duration::from_millis(30)));
            cache.insert_value(1, "b"); // replaces wholesale: never expires

            sleep(Duration::from_millis(50));
            assert_eq!(cache.get(&1), Some("b"));
        }

        #[test]
        fn reinsert_with_ttl_sets_a_new_deadline() {
            let cache = VttlCache::new(5);
            cache.insert(1, "a", None);
            cache.insert(1, "b", Some(Duration::from_millis(30)));

            sleep(Duration::from_millis(50));
            assert_eq!(cache.get(&1), None);
        }

        #[test]
        fn get_with_expire_reports_remaining() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::from_secs(5)));
            cache.insert(2, 2, None);

            let (value, remaining) = cache.get_with_expire(&1);
            assert_eq!(value, Some(1));
            assert!(remaining > 0.0 && remaining <= 5.0);

            // Never-expiring entries report 0.0 remaining.
            let (value, remaining) = cache.get_with_expire(&2);
            assert_eq!(value, Some(2));
            assert_eq!(remaining, 0.0);

            let (value, remaining) = cache.get_with_expire(&99);
            assert_eq!(value, None);
            assert_eq!(remaining, 0.0);
        }
    }

    // ==============================================
    // Victim selection
    // ==============================================

    mod victim_selection {
        use super::*;

        #[test]
        fn popitem_takes_the_earliest_deadline() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::from_secs(30)));
            cache.insert(2, 2, Some(Duration::from_secs(10)));
            cache.insert(3, 3, None);

            assert_eq!(cache.popitem(), Some((2, 2)));
            assert_eq!(cache.popitem(), Some((1, 1)));
            assert_eq!(cache.popitem(), Some((3, 3)));
            assert_eq!(cache.popitem(), None);
        }

        #[test]
        fn never_expiring_fall_back_to_insertion_order() {
            let cache = VttlCache::new(5);
            cache.insert("first", 1, None);
            cache.insert("second", 2, None);

            assert_eq!(cache.popitem(), Some(("first", 1)));
            assert_eq!(cache.popitem(), Some(("second", 2)));
        }

        #[test]
        fn capacity_eviction_prefers_earliest_deadline() {
            let cache = VttlCache::new(2);
            cache.insert(1, 1, Some(Duration::from_secs(5)));
            cache.insert(2, 2, None);
            cache.insert(3, 3, None); // evicts key 1 (only finite deadline)

            assert!(!cache.contains(&1));
            assert!(cache.contains(&2));
            assert!(cache.contains(&3));
        }

        #[test]
        fn popitem_with_expire_reports_remaining() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, Some(Duration::from_secs(20)));
            let (key, value, remaining) = cache.popitem_with_expire().unwrap();
            assert_eq!((key, value), (1, 1));
            assert!(remaining > 0.0 && remaining <= 20.0);
        }
    }

    // ==============================================
    // Order helpers and iteration
    // ==============================================

    mod order_and_iteration {
        use super::*;

        #[test]
        fn first_and_last_follow_insertion_order() {
            let cache = VttlCache::new(5);
            cache.insert("a", 1, None);
            cache.insert("b", 2, Some(Duration::from_secs(60)));
            cache.insert("c", 3, None);

            assert_eq!(cache.first(0), Some("a"));
            assert_eq!(cache.first(1), Some("b"));
            assert_eq!(cache.first(9), None);
            assert_eq!(cache.last(), Some("c"));
        }

        #[test]
        fn items_with_expire_reports_metadata() {
            let cache = VttlCache::new(5);
            cache.insert(1, "a", Some(Duration::from_secs(30)));
            cache.insert(2, "b", None);

            let mut items: Vec<_> = cache.items_with_expire().collect::<Result<_, _>>().unwrap();
            items.sort_by_key(|&(key, _, _)| key);

            assert_eq!(items[0].0, 1);
            assert!(items[0].2 > 0.0);
            assert_eq!(items[1].0, 2);
            assert_eq!(items[1].2, 0.0);
        }

        #[test]
        fn iteration_skips_due_entries() {
            let cache = VttlCache::new(5);
            cache.insert(1, "brief", Some(Duration::from_millis(30)));
            cache.insert(2, "stays", None);
            sleep(Duration::from_millis(50));

            // Nothing swept yet, but iteration must hide the corpse.
            let items: Vec<_> = cache.items().collect::<Result<_, _>>().unwrap();
            assert_eq!(items, vec![(2, "stays")]);
        }

        #[test]
        fn iterator_fails_after_mutation() {
            let cache = VttlCache::new(5);
            cache.insert(1, 1, None);
            cache.insert(2, 2, None);

            let mut keys = cache.keys();
            assert!(keys.next().unwrap().is_ok());
            cache.insert(3, 3, None);
            assert!(keys.next().unwrap().is_err());
        }

        #[test]
        fn core_invariants_hold_after_churn() {
            let mut core = VttlCore::new(8, 0);
            for i in 0..100u64 {
                let ttl = if i % 2 == 0 {
                    Some(Duration::from_secs(60 + i))
                } else {
                    None
                };
                core.insert(i, i, ttl);
                if i % 3 == 0 {
                    core.pop(&(i / 2));
                }
                if i % 7 == 0 {
                    core.popitem();
                }
            }
            core.debug_validate_invariants();
        }
    }
}
