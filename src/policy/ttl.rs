//! Uniform time-to-live eviction policy.
//!
//! [`TtlCache`] gives every entry the same `ttl`, measured from its first
//! insertion on the monotonic clock. Because the ttl is uniform, the
//! insertion-order ring is also the expiration-order ring: expiry sweeps pop
//! from the front and stop at the first entry that is still live, so a sweep
//! costs only as much as the number of expirations actually due.
//!
//! Expiry is lazy. Reads check the looked-up entry's deadline and remove it
//! when due (reporting the key absent), which is why `get` takes the write
//! lock; mutating operations sweep the ring head before doing their own
//! work. [`contains`](TtlCache::contains) is deadline-aware without
//! removing anything, and [`expire`](TtlCache::expire) forces a sweep.
//!
//! Updating a present key replaces the value only: its slot in the ring and
//! its deadline are unchanged, which keeps ring order equal to expiry order.
//!
//! ## Operations
//!
//! | Operation             | Time     | Notes                              |
//! |-----------------------|----------|------------------------------------|
//! | `get`                 | O(1)     | Removes the entry if it is due     |
//! | `insert`              | O(1+k)   | k = expirations due at the head    |
//! | `popitem`             | O(1+k)   | Oldest entry after the sweep       |
//! | `get_with_expire`     | O(1)     | Value plus remaining seconds       |
//! | `first(n)` / `last`   | O(n)/O(1)| Raw ring order                     |
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use boxcache::TtlCache;
//!
//! let cache = TtlCache::new(5, Duration::from_millis(50));
//! cache.insert(1, "one");
//!
//! let (value, remaining) = cache.get_with_expire(&1);
//! assert_eq!(value, Some("one"));
//! assert!(remaining > 0.0 && remaining <= 0.05);
//!
//! std::thread::sleep(Duration::from_millis(60));
//! assert_eq!(cache.get(&1), None);
//! ```

use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;

use crate::ds::arena::Slot;
use crate::ds::order_ring::OrderRing;
use crate::error::IterationError;
use crate::iter::{advance, SnapshotSource, Step};
use crate::table::{multiset_eq, CacheTable};
use crate::traits::SharedCache;

/// Per-entry TTL metadata: ring node handle plus absolute deadline.
#[derive(Debug, Clone, Copy)]
pub struct TtlMeta {
    pub(crate) node: Option<Slot>,
    pub(crate) deadline: Instant,
}

/// Unsynchronized TTL core; see [`TtlCache`] for the shared surface.
#[derive(Debug, Clone)]
pub struct TtlCore<K, V> {
    table: CacheTable<K, V, TtlMeta>,
    ring: OrderRing,
    ttl: Duration,
    generation: u64,
}

impl<K, V> TtlCore<K, V>
where
    K: Hash + Eq,
{
    /// Creates a core with the given uniform `ttl`.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is zero.
    pub fn new(maxsize: usize, ttl: Duration, capacity: usize) -> Self {
        assert!(!ttl.is_zero(), "ttl must be positive and non-zero");
        Self {
            table: CacheTable::new(maxsize, capacity),
            ring: OrderRing::with_capacity(capacity),
            ttl,
            generation: 0,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    fn deadline(&self, meta: &TtlMeta) -> Instant {
        meta.deadline
    }

    /// Pops every due entry off the ring head. Uniform ttl keeps the ring
    /// in expiry order, so the walk stops at the first live entry.
    pub fn expire_head(&mut self, now: Instant) {
        while let Some(slot) = self.ring.front() {
            let due = match self.table.entry(slot) {
                Some(entry) => self.deadline(&entry.meta) <= now,
                None => true,
            };
            if !due {
                break;
            }
            self.ring.pop_front();
            self.table.erase(slot);
            self.generation += 1;
        }
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let now = Instant::now();
        self.expire_head(now);
        if let Some(slot) = self.table.find(&key) {
            if let Some(entry) = self.table.entry_mut(slot) {
                let old = std::mem::replace(&mut entry.value, value);
                self.generation += 1;
                return Some(old);
            }
        }
        if self.table.is_full() {
            if let Some(slot) = self.ring.pop_front() {
                self.table.erase(slot);
            }
        }
        let slot = self.table.insert_new(
            key,
            value,
            TtlMeta {
                node: None,
                deadline: now + self.ttl,
            },
        );
        let node = self.ring.push_back(slot);
        if let Some(entry) = self.table.entry_mut(slot) {
            entry.meta.node = Some(node);
        }
        self.generation += 1;
        None
    }

    /// Reads a key; a due entry is removed and reported absent.
    pub fn get(&mut self, key: &K, now: Instant) -> Option<&V> {
        let slot = self.table.find(key)?;
        let expired = self
            .table
            .entry(slot)
            .map(|entry| self.deadline(&entry.meta) <= now)?;
        if expired {
            self.remove_slot(slot);
            return None;
        }
        self.table.entry(slot).map(|entry| &entry.value)
    }

    /// Reads a key together with its remaining seconds.
    pub fn get_with_expire(&mut self, key: &K, now: Instant) -> Option<(&V, f64)> {
        let slot = self.table.find(key)?;
        let deadline = self.table.entry(slot).map(|entry| self.deadline(&entry.meta))?;
        if deadline <= now {
            self.remove_slot(slot);
            return None;
        }
        let remaining = (deadline - now).as_secs_f64();
        self.table
            .entry(slot)
            .map(|entry| (&entry.value, remaining))
    }

    pub fn setdefault(&mut self, key: K, default: V) -> V
    where
        V: Clone,
    {
        let now = Instant::now();
        self.expire_head(now);
        if let Some(value) = self.get(&key, now) {
            return value.clone();
        }
        let value = default.clone();
        self.insert(key, default);
        value
    }

    pub fn pop(&mut self, key: &K) -> Option<V> {
        self.pop_with_expire(key).map(|(value, _)| value)
    }

    pub fn pop_with_expire(&mut self, key: &K) -> Option<(V, f64)> {
        let now = Instant::now();
        self.expire_head(now);
        let slot = self.table.find(key)?;
        let deadline = self.table.entry(slot).map(|entry| self.deadline(&entry.meta))?;
        let entry = self.remove_slot(slot)?;
        if deadline <= now {
            return None;
        }
        Some((entry.value, (deadline - now).as_secs_f64()))
    }

    /// Removes the entry that has been in the cache the longest.
    pub fn popitem(&mut self) -> Option<(K, V)> {
        self.popitem_with_expire().map(|(key, value, _)| (key, value))
    }

    pub fn popitem_with_expire(&mut self) -> Option<(K, V, f64)> {
        let now = Instant::now();
        self.expire_head(now);
        let slot = self.ring.pop_front()?;
        let entry = self.table.erase(slot)?;
        self.generation += 1;
        let remaining = (self.deadline(&entry.meta))
            .saturating_duration_since(now)
            .as_secs_f64();
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

    pub fn update<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (K, V)>,
    {
        for (key, value) in entries {
            self.insert(key, value);
        }
    }

    /// Returns the key at rank `n` from the oldest end of the ring.
    pub fn first(&self, n: usize) -> Option<&K> {
        let slot = self.ring.nth(n)?;
        self.table.entry(slot).map(|entry| &entry.key)
    }

    /// Returns the newest key.
    pub fn last(&self) -> Option<&K> {
        let slot = self.ring.back()?;
        self.table.entry(slot).map(|entry| &entry.key)
    }

    /// Deadline-aware membership test; never mutates.
    pub fn contains(&self, key: &K, now: Instant) -> bool {
        self.table
            .find(key)
            .and_then(|slot| self.table.entry(slot))
            .is_some_and(|entry| self.deadline(&entry.meta) > now)
    }

    /// Live-entry count. Entries past their deadline but not yet swept
    /// still count until the next mutating operation removes them.
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
        self.expire_head(Instant::now());
        if !reuse {
            self.table.shrink_to_fit();
            self.ring.shrink_to_fit();
            self.generation += 1;
        }
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

    /// Appends an entry with an explicit deadline; used when restoring a
    /// snapshot. Callers must append in ascending-deadline order.
    pub(crate) fn insert_restored(&mut self, key: K, value: V, deadline: Instant) {
        let slot = self
            .table
            .insert_new(key, value, TtlMeta { node: None, deadline });
        let node = self.ring.push_back(slot);
        if let Some(entry) = self.table.entry_mut(slot) {
            entry.meta.node = Some(node);
        }
        self.generation += 1;
    }

    fn remove_slot(&mut self, slot: Slot) -> Option<crate::table::Entry<K, V, TtlMeta>> {
        let entry = self.table.erase(slot)?;
        if let Some(node) = entry.meta.node {
            self.ring.remove(node);
        }
        self.generation += 1;
        Some(entry)
    }

    pub(crate) fn table(&self) -> &CacheTable<K, V, TtlMeta> {
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
        // Uniform ttl: ring order must equal deadline order.
        let mut previous: Option<Instant> = None;
        for slot in self.ring.iter() {
            let entry = self.table.entry(slot).expect("ring points at dead slot");
            if let Some(prev) = previous {
                assert!(prev <= entry.meta.deadline, "ring out of deadline order");
            }
            previous = Some(entry.meta.deadline);
        }
    }
}

/// Thread-safe cache with one uniform time-to-live for every entry.
pub struct TtlCache<K, V> {
    inner: RwLock<TtlCore<K, V>>,
}

impl<K, V> TtlCache<K, V>
where
    K: Hash + Eq,
{
    /// Creates a cache bounded by `maxsize` (0 meaning unbounded) whose
    /// entries live for `ttl` after insertion.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is zero.
    pub fn new(maxsize: usize, ttl: Duration) -> Self {
        Self::with_capacity(maxsize, ttl, 0)
    }

    /// Creates a cache with `capacity` entries pre-allocated.
    pub fn with_capacity(maxsize: usize, ttl: Duration, capacity: usize) -> Self {
        Self {
            inner: RwLock::new(TtlCore::new(maxsize, ttl, capacity)),
        }
    }

    /// Returns the uniform time-to-live.
    pub fn ttl(&self) -> Duration {
        self.inner.read().ttl()
    }

    /// Upserts a key, returning the previous value if one was replaced.
    ///
    /// A new key's deadline is `now + ttl`; updating a present key replaces
    /// the value without refreshing its deadline. Due entries at the ring
    /// head are swept first; at the bound the oldest entry is evicted.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.write().insert(key, value)
    }

    /// Looks up a key. A due entry is removed and reported absent.
    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.inner.write().get(key, Instant::now()).cloned()
    }

    /// Looks up a key, returning `(value, remaining_seconds)`; `(None, 0.0)`
    /// when absent or due.
    pub fn get_with_expire(&self, key: &K) -> (Option<V>, f64)
    where
        V: Clone,
    {
        match self.inner.write().get_with_expire(key, Instant::now()) {
            Some((value, remaining)) => (Some(value.clone()), remaining),
            None => (None, 0.0),
        }
    }

    /// Inserts `default` if the key is absent or due; returns the current
    /// value.
    pub fn setdefault(&self, key: K, default: V) -> V
    where
        V: Clone,
    {
        self.inner.write().setdefault(key, default)
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

    /// Removes and returns the oldest entry, or `None` if empty after the
    /// sweep.
    pub fn popitem(&self) -> Option<(K, V)> {
        self.inner.write().popitem()
    }

    /// Like [`popitem`](Self::popitem), with the remaining seconds.
    pub fn popitem_with_expire(&self) -> Option<(K, V, f64)> {
        self.inner.write().popitem_with_expire()
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
    pub fn keys(&self) -> TtlKeys<'_, K, V> {
        TtlKeys(TtlEntries::new(self))
    }

    /// Snapshot iterator over live values. Order is unspecified.
    pub fn values(&self) -> TtlValues<'_, K, V> {
        TtlValues(TtlEntries::new(self))
    }

    /// Snapshot iterator over live `(key, value)` pairs.
    pub fn items(&self) -> TtlItems<'_, K, V> {
        TtlItems(TtlEntries::new(self))
    }

    /// Snapshot iterator over live `(key, value, remaining_seconds)`.
    pub fn items_with_expire(&self) -> TtlItemsWithExpire<'_, K, V> {
        TtlItemsWithExpire(TtlEntries::new(self))
    }

    pub(crate) fn read_core<R>(&self, f: impl FnOnce(&TtlCore<K, V>) -> R) -> R {
        f(&self.inner.read())
    }

    pub(crate) fn write_core<R>(&self, f: impl FnOnce(&mut TtlCore<K, V>) -> R) -> R {
        f(&mut self.inner.write())
    }
}

/// Shared machinery for the TTL iterators: a generation-checked cursor that
/// skips entries already past their deadline at advance time.
struct TtlEntries<'a, K, V> {
    source: &'a TtlCache<K, V>,
    generation: u64,
    cursor: usize,
    done: bool,
}

impl<'a, K, V> TtlEntries<'a, K, V>
where
    K: Hash + Eq,
{
    fn new(source: &'a TtlCache<K, V>) -> Self {
        let generation = source.read_core(|core| core.generation());
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
                let deadline = entry.meta.deadline;
                if deadline <= now {
                    None
                } else {
                    Some(project(
                        &entry.key,
                        &entry.value,
                        (deadline - now).as_secs_f64(),
                    ))
                }
            });
            match step {
                Step::Yield(cursor, Some(item)) => {
                    self.cursor = cursor;
                    return Some(Ok(item));
                },
                Step::Yield(cursor, None) => {
                    // Expired after the snapshot; skip it.
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

macro_rules! ttl_iter {
    ($(#[$doc:meta])* $name:ident, $item:ty, |$key:ident, $value:ident, $remaining:ident| $project:expr) => {
        $(#[$doc])*
        pub struct $name<'a, K, V>(TtlEntries<'a, K, V>);

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

ttl_iter!(
    /// Snapshot iterator over live keys.
    TtlKeys,
    K,
    |key, _value, _remaining| key.clone()
);

ttl_iter!(
    /// Snapshot iterator over live values.
    TtlValues,
    V,
    |_key, value, _remaining| value.clone()
);

ttl_iter!(
    /// Snapshot iterator over live `(key, value)` pairs.
    TtlItems,
    (K, V),
    |key, value, _remaining| (key.clone(), value.clone())
);

ttl_iter!(
    /// Snapshot iterator over live `(key, value, remaining_seconds)`.
    TtlItemsWithExpire,
    (K, V, f64),
    |key, value, remaining| (key.clone(), value.clone(), remaining)
);

impl<K, V> SnapshotSource for TtlCache<K, V>
where
    K: Hash + Eq,
{
    type Key = K;
    type Value = V;
    type Meta = TtlMeta;

    fn with_table<R>(&self, f: impl FnOnce(&CacheTable<K, V, TtlMeta>, u64) -> R) -> R {
        let core = self.inner.read();
        f(core.table(), core.generation())
    }
}

impl<K, V> SharedCache<K, V> for TtlCache<K, V>
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
        TtlCache::len(self)
    }

    fn maxsize(&self) -> usize {
        TtlCache::maxsize(self)
    }

    fn approx_bytes(&self) -> usize {
        self.inner.read().table().approx_bytes()
    }

    fn wipe(&self, reuse: bool) {
        self.clear(reuse);
    }
}

impl<K, V> Clone for TtlCache<K, V>
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

impl<K, V> std::fmt::Debug for TtlCache<K, V>
where
    K: std::hash::Hash + Eq,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.inner.read();
        f.debug_struct("TtlCache")
            .field("len", &core.len())
            .field("maxsize", &core.maxsize())
            .finish_non_exhaustive()
    }
}

impl<K, V> PartialEq for TtlCache<K, V>
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
