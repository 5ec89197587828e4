//! Open-addressed hash table substrate shared by every policy engine.
//!
//! Maps keys to arena-stable entries. The probe structure is a flat array of
//! control bytes scanned in conceptual 16-wide groups: each byte is either
//! `EMPTY`, `TOMBSTONE`, or the top seven bits of the entry's hash, so a
//! probe filters on one byte before touching the entry itself. Entries live
//! in an [`Arena`] and keep their [`Slot`] across rehashes; only the control
//! and index arrays are rebuilt when the table grows or shrinks.
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────────────────────────────────────────────────────┐
//!   │ ctrl:  [h2][EMPTY][h2][TOMB][h2][EMPTY] ...   (bucket array) │
//!   │ index: [ 3][  -  ][ 0][  - ][ 7][  -  ] ...   (slot per pos) │
//!   │                                                              │
//!   │ arena: Slot → Entry { hash64, key, value, meta }             │
//!   └──────────────────────────────────────────────────────────────┘
//!
//!   find(key):
//!     1. h = hash64(key); pos = h & mask; tag = top 7 bits of h
//!     2. walk positions; EMPTY terminates, TOMBSTONE is skipped
//!     3. tag match → compare cached hash64 → compare key (user Eq)
//! ```
//!
//! ## Operations
//!
//! | Operation        | Time    | Notes                                  |
//! |------------------|---------|----------------------------------------|
//! | `find`           | O(1)*   | *Expected; cached-hash + tag filtered  |
//! | `insert_new`     | O(1)*   | Grows at 7/8 load, reuses tombstones   |
//! | `erase`          | O(1)*   | Reclaims trailing tombstone runs       |
//! | `reserve`        | O(n)    | Rehash when growth is needed           |
//! | `shrink_to_fit`  | O(n)    | Smallest bucket array holding `len`    |
//!
//! ## Implementation Notes
//!
//! - Keys cache their 64-bit hash; rehashing never re-invokes user `Hash`.
//! - `maxsize == 0` is the caller's "unbounded" sentinel and is normalized
//!   to [`UNBOUNDED`] at construction.
//! - User `Eq` runs only under a tag + hash64 double match; a panic in user
//!   code propagates before any structural change is made.

use std::hash::{BuildHasher, BuildHasherDefault, Hash};

use rustc_hash::FxHasher;

use crate::ds::arena::{Arena, Slot};

const EMPTY: u8 = 0xFF;
const TOMBSTONE: u8 = 0xFE;

/// Conceptual probe-group width; the bucket array never shrinks below one
/// group.
const GROUP: usize = 16;

/// Target load factor of 7/8 (0.875).
const LOAD_NUM: usize = 7;
const LOAD_DEN: usize = 8;

/// Effective bound used when a cache is constructed with `maxsize == 0`.
pub const UNBOUNDED: usize = isize::MAX as usize;

type FxBuild = BuildHasherDefault<FxHasher>;

/// One live cache entry: cached hash, key, value and policy metadata.
#[derive(Debug, Clone)]
pub struct Entry<K, V, M> {
    pub hash: u64,
    pub key: K,
    pub value: V,
    pub meta: M,
}

/// Open-addressed table from key to [`Entry`], generic over the policy
/// metadata type `M`.
#[derive(Debug, Clone)]
pub struct CacheTable<K, V, M> {
    entries: Arena<Entry<K, V, M>>,
    ctrl: Box<[u8]>,
    index: Box<[u32]>,
    mask: usize,
    tombstones: usize,
    maxsize: usize,
    hasher: FxBuild,
}

#[inline]
fn tag(hash: u64) -> u8 {
    // Top seven bits; never collides with EMPTY (0xFF) or TOMBSTONE (0xFE).
    (hash >> 57) as u8
}

fn bucket_count_for(entries: usize) -> usize {
    // Smallest power of two whose 7/8 load holds `entries`.
    let needed = entries
        .saturating_mul(LOAD_DEN)
        .div_ceil(LOAD_NUM)
        .saturating_add(1);
    needed.max(GROUP).next_power_of_two()
}

impl<K, V, M> CacheTable<K, V, M>
where
    K: Hash + Eq,
{
    /// Creates a table bounded by `maxsize` (0 meaning unbounded), with
    /// room for `capacity` entries pre-allocated. The pre-allocation is
    /// capped at the effective bound.
    pub fn new(maxsize: usize, capacity: usize) -> Self {
        let maxsize = if maxsize == 0 { UNBOUNDED } else { maxsize };
        let capacity = capacity.min(maxsize);
        let buckets = if capacity == 0 {
            0
        } else {
            bucket_count_for(capacity)
        };
        Self {
            entries: Arena::with_capacity(capacity),
            ctrl: vec![EMPTY; buckets].into_boxed_slice(),
            index: vec![0; buckets].into_boxed_slice(),
            mask: buckets.wrapping_sub(1),
            tombstones: 0,
            maxsize,
            hasher: FxBuild::default(),
        }
    }

    /// Returns the effective bound (never 0; see [`UNBOUNDED`]).
    #[inline]
    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    /// Returns the number of live entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if the table holds no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns `true` if the table is at its bound.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.maxsize
    }

    /// Returns how many entries fit without growing the bucket array.
    pub fn capacity(&self) -> usize {
        if self.ctrl.is_empty() {
            0
        } else {
            self.ctrl.len() * LOAD_NUM / LOAD_DEN
        }
    }

    /// Computes the cached 64-bit hash for a key.
    #[inline]
    pub fn hash_of(&self, key: &K) -> u64 {
        self.hasher.hash_one(key)
    }

    /// Looks up `key`, returning its slot.
    pub fn find(&self, key: &K) -> Option<Slot> {
        self.find_with_pos(key).map(|(_, slot)| slot)
    }

    fn find_with_pos(&self, key: &K) -> Option<(usize, Slot)> {
        if self.ctrl.is_empty() || self.entries.is_empty() {
            return None;
        }
        let hash = self.hash_of(key);
        let wanted = tag(hash);
        let mut pos = (hash as usize) & self.mask;
        let mut probed = 0usize;
        loop {
            let ctrl = self.ctrl[pos];
            if ctrl == EMPTY {
                return None;
            }
            if ctrl == wanted {
                let slot = Slot(self.index[pos]);
                if let Some(entry) = self.entries.get(slot) {
                    if entry.hash == hash && entry.key == *key {
                        return Some((pos, slot));
                    }
                }
            }
            probed += 1;
            if probed > self.mask {
                return None;
            }
            pos = (pos + 1) & self.mask;
        }
    }

    /// Returns a shared reference to the entry at `slot`.
    #[inline]
    pub fn entry(&self, slot: Slot) -> Option<&Entry<K, V, M>> {
        self.entries.get(slot)
    }

    /// Returns a mutable reference to the entry at `slot`.
    #[inline]
    pub fn entry_mut(&mut self, slot: Slot) -> Option<&mut Entry<K, V, M>> {
        self.entries.get_mut(slot)
    }

    /// Inserts an entry for a key known to be absent; returns its slot.
    ///
    /// Callers resolve present keys through [`find`](Self::find) +
    /// [`entry_mut`](Self::entry_mut) first, and evict before inserting
    /// when their bound requires it.
    pub fn insert_new(&mut self, key: K, value: V, meta: M) -> Slot {
        self.grow_if_needed(1);
        let hash = self.hash_of(&key);
        let slot = self.entries.insert(Entry {
            hash,
            key,
            value,
            meta,
        });

        let wanted_pos = self.probe_insert_pos(hash);
        if self.ctrl[wanted_pos] == TOMBSTONE {
            self.tombstones -= 1;
        }
        self.ctrl[wanted_pos] = tag(hash);
        self.index[wanted_pos] = slot.0;
        slot
    }

    /// Removes the entry at `slot` and returns it.
    pub fn erase(&mut self, slot: Slot) -> Option<Entry<K, V, M>> {
        let hash = self.entries.get(slot)?.hash;
        let pos = self.position_of(hash, slot)?;
        let entry = self.entries.remove(slot)?;
        self.vacate(pos);
        Some(entry)
    }

    /// Removes the entry for `key` and returns it.
    pub fn erase_key(&mut self, key: &K) -> Option<Entry<K, V, M>> {
        let (pos, slot) = self.find_with_pos(key)?;
        let entry = self.entries.remove(slot)?;
        self.vacate(pos);
        Some(entry)
    }

    /// Ensures capacity for `len + extra` entries without a later rehash.
    pub fn reserve(&mut self, extra: usize) {
        self.grow_if_needed(extra);
        self.entries.reserve(extra);
    }

    /// Rebuilds the bucket array at the smallest size holding the current
    /// entries at target load, and trims entry storage.
    pub fn shrink_to_fit(&mut self) {
        self.entries.shrink_to_fit();
        let buckets = if self.entries.is_empty() {
            0
        } else {
            bucket_count_for(self.entries.len())
        };
        self.rebuild_buckets(buckets);
    }

    /// Removes all entries. With `reuse` the allocations are kept for
    /// refilling; without it they are released.
    pub fn clear(&mut self, reuse: bool) {
        self.tombstones = 0;
        if reuse {
            self.entries.clear();
            self.ctrl.fill(EMPTY);
        } else {
            self.entries.release();
            self.ctrl = Box::new([]);
            self.index = Box::new([]);
            self.mask = usize::MAX;
        }
    }

    /// Iterates live `(Slot, &Entry)` pairs in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Entry<K, V, M>)> {
        self.entries.iter()
    }

    /// Cursor-style walk used by snapshot iterators; see [`Arena::scan`].
    pub fn scan(&self, from: usize) -> Option<(usize, Slot, &Entry<K, V, M>)> {
        self.entries.scan(from)
    }

    /// Approximate heap footprint in bytes.
    pub fn approx_bytes(&self) -> usize {
        std::mem::size_of::<Self>()
            + self.ctrl.len() * (std::mem::size_of::<u8>() + std::mem::size_of::<u32>())
            + self.entries.capacity() * std::mem::size_of::<Entry<K, V, M>>()
    }

    fn probe_insert_pos(&self, hash: u64) -> usize {
        let mut pos = (hash as usize) & self.mask;
        let mut reusable = None;
        loop {
            match self.ctrl[pos] {
                EMPTY => return reusable.unwrap_or(pos),
                TOMBSTONE => {
                    if reusable.is_none() {
                        reusable = Some(pos);
                    }
                },
                _ => {},
            }
            pos = (pos + 1) & self.mask;
        }
    }

    fn position_of(&self, hash: u64, slot: Slot) -> Option<usize> {
        if self.ctrl.is_empty() {
            return None;
        }
        let mut pos = (hash as usize) & self.mask;
        let mut probed = 0usize;
        loop {
            let ctrl = self.ctrl[pos];
            if ctrl == EMPTY {
                return None;
            }
            if ctrl != TOMBSTONE && self.index[pos] == slot.0 {
                return Some(pos);
            }
            probed += 1;
            if probed > self.mask {
                return None;
            }
            pos = (pos + 1) & self.mask;
        }
    }

    fn vacate(&mut self, pos: usize) {
        let next = (pos + 1) & self.mask;
        if self.ctrl[next] == EMPTY {
            // No probe chain continues past this position; the slot and any
            // tombstone run leading into it can become EMPTY again.
            self.ctrl[pos] = EMPTY;
            let mut back = pos.wrapping_sub(1) & self.mask;
            while back != pos && self.ctrl[back] == TOMBSTONE {
                self.ctrl[back] = EMPTY;
                self.tombstones -= 1;
                back = back.wrapping_sub(1) & self.mask;
            }
        } else {
            self.ctrl[pos] = TOMBSTONE;
            self.tombstones += 1;
        }
    }

    fn grow_if_needed(&mut self, extra: usize) {
        let needed = self.entries.len() + self.tombstones + extra;
        let buckets = self.ctrl.len();
        if buckets == 0 || needed * LOAD_DEN > buckets * LOAD_NUM {
            // Rebuilding at the same size is enough when only tombstones
            // pushed us over the threshold.
            let target = bucket_count_for(self.entries.len() + extra).max(buckets);
            self.rebuild_buckets(target);
        }
    }

    fn rebuild_buckets(&mut self, buckets: usize) {
        self.ctrl = vec![EMPTY; buckets].into_boxed_slice();
        self.index = vec![0; buckets].into_boxed_slice();
        self.mask = buckets.wrapping_sub(1);
        self.tombstones = 0;
        if buckets == 0 {
            return;
        }
        // Re-point every live entry using its cached hash; user Hash/Eq is
        // never re-invoked here.
        let mut placements = Vec::with_capacity(self.entries.len());
        for (slot, entry) in self.entries.iter() {
            placements.push((slot, entry.hash));
        }
        for (slot, hash) in placements {
            let mut pos = (hash as usize) & self.mask;
            while self.ctrl[pos] != EMPTY {
                pos = (pos + 1) & self.mask;
            }
            self.ctrl[pos] = tag(hash);
            self.index[pos] = slot.0;
        }
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        self.entries.debug_validate_invariants();
        let full = self
            .ctrl
            .iter()
            .filter(|&&c| c != EMPTY && c != TOMBSTONE)
            .count();
        assert_eq!(full, self.entries.len());
        let tombs = self.ctrl.iter().filter(|&&c| c == TOMBSTONE).count();
        assert_eq!(tombs, self.tombstones);
        for (pos, &ctrl) in self.ctrl.iter().enumerate() {
            if ctrl != EMPTY && ctrl != TOMBSTONE {
                let slot = Slot(self.index[pos]);
                let entry = self.entries.get(slot).expect("indexed slot missing");
                assert_eq!(tag(entry.hash), ctrl);
            }
        }
    }
}

/// Order-insensitive key-value multiset comparison between two tables,
/// regardless of their policy metadata. Backs cache `PartialEq`.
pub(crate) fn multiset_eq<K, V, M1, M2>(a: &CacheTable<K, V, M1>, b: &CacheTable<K, V, M2>) -> bool
where
    K: Hash + Eq,
    V: PartialEq,
{
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(_, entry)| {
        b.find(&entry.key)
            .and_then(|slot| b.entry(slot))
            .is_some_and(|other| other.value == entry.value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(maxsize: usize) -> CacheTable<u64, u64, ()> {
        CacheTable::new(maxsize, 0)
    }

    // ==============================================
    // Lookup and insertion
    // ==============================================

    mod lookup_and_insertion {
        use super::*;

        #[test]
        fn insert_then_find() {
            let mut t = table(0);
            let slot = t.insert_new(1, 100, ());
            assert_eq!(t.find(&1), Some(slot));
            assert_eq!(t.entry(slot).map(|e| e.value), Some(100));
            assert_eq!(t.len(), 1);
            t.debug_validate_invariants();
        }

        #[test]
        fn find_missing_returns_none() {
            let t = table(0);
            assert_eq!(t.find(&42), None);
        }

        #[test]
        fn many_inserts_grow_the_buckets() {
            let mut t = table(0);
            for i in 0..1000 {
                t.insert_new(i, i * 2, ());
            }
            assert_eq!(t.len(), 1000);
            for i in 0..1000 {
                let slot = t.find(&i).expect("key lost during growth");
                assert_eq!(t.entry(slot).map(|e| e.value), Some(i * 2));
            }
            t.debug_validate_invariants();
        }

        #[test]
        fn slots_are_stable_across_growth() {
            let mut t = table(0);
            let slot = t.insert_new(7, 70, ());
            for i in 100..600 {
                t.insert_new(i, i, ());
            }
            assert_eq!(t.entry(slot).map(|e| e.value), Some(70));
            assert_eq!(t.find(&7), Some(slot));
        }
    }

    // ==============================================
    // Erasure and tombstones
    // ==============================================

    mod erasure {
        use super::*;

        #[test]
        fn erase_by_key_removes_the_entry() {
            let mut t = table(0);
            t.insert_new(1, 10, ());
            t.insert_new(2, 20, ());

            let entry = t.erase_key(&1).unwrap();
            assert_eq!((entry.key, entry.value), (1, 10));
            assert_eq!(t.find(&1), None);
            assert_eq!(t.len(), 1);
            t.debug_validate_invariants();
        }

        #[test]
        fn erase_by_slot_removes_the_entry() {
            let mut t = table(0);
            let slot = t.insert_new(5, 50, ());
            let entry = t.erase(slot).unwrap();
            assert_eq!(entry.value, 50);
            assert_eq!(t.find(&5), None);
            t.debug_validate_invariants();
        }

        #[test]
        fn erase_missing_slot_is_none() {
            let mut t = table(0);
            let slot = t.insert_new(5, 50, ());
            t.erase(slot);
            assert!(t.erase(slot).is_none());
        }

        #[test]
        fn churn_does_not_lose_keys() {
            let mut t = table(0);
            for round in 0u64..50 {
                for i in 0..64 {
                    t.insert_new(round * 64 + i, i, ());
                }
                for i in 0..64 {
                    assert!(t.erase_key(&(round * 64 + i)).is_some());
                }
            }
            assert!(t.is_empty());
            t.debug_validate_invariants();
        }

        #[test]
        fn probe_chains_survive_interleaved_erasure() {
            let mut t = table(0);
            for i in 0..256u64 {
                t.insert_new(i, i, ());
            }
            for i in (0..256u64).step_by(2) {
                t.erase_key(&i);
            }
            for i in (1..256u64).step_by(2) {
                assert!(t.find(&i).is_some(), "lost key {i}");
            }
            t.debug_validate_invariants();
        }
    }

    // ==============================================
    // Bounds and capacity
    // ==============================================

    mod bounds_and_capacity {
        use super::*;

        #[test]
        fn maxsize_zero_is_unbounded() {
            let t = table(0);
            assert_eq!(t.maxsize(), UNBOUNDED);
            assert!(!t.is_full());
        }

        #[test]
        fn is_full_tracks_the_bound() {
            let mut t = table(2);
            assert!(!t.is_full());
            t.insert_new(1, 1, ());
            t.insert_new(2, 2, ());
            assert!(t.is_full());
        }

        #[test]
        fn capacity_holds_preallocation() {
            let t: CacheTable<u64, u64, ()> = CacheTable::new(0, 100);
            assert!(t.capacity() >= 100);
        }

        #[test]
        fn preallocation_is_capped_at_maxsize() {
            let t: CacheTable<u64, u64, ()> = CacheTable::new(20, 1000);
            assert!(t.capacity() >= 20);
            assert!(t.capacity() < 1000);
        }

        #[test]
        fn shrink_to_fit_tightens_buckets() {
            let mut t = table(0);
            for i in 0..500 {
                t.insert_new(i, i, ());
            }
            for i in 8..500 {
                t.erase_key(&i);
            }
            t.shrink_to_fit();
            assert!(t.capacity() < 100);
            for i in 0..8 {
                assert!(t.find(&i).is_some());
            }
            t.debug_validate_invariants();
        }

        #[test]
        fn clear_reuse_keeps_buckets() {
            let mut t = table(0);
            for i in 0..100 {
                t.insert_new(i, i, ());
            }
            let cap = t.capacity();
            t.clear(true);
            assert!(t.is_empty());
            assert_eq!(t.capacity(), cap);

            t.insert_new(1, 1, ());
            assert!(t.find(&1).is_some());
        }

        #[test]
        fn clear_release_drops_buckets() {
            let mut t = table(0);
            for i in 0..100 {
                t.insert_new(i, i, ());
            }
            t.clear(false);
            assert!(t.is_empty());
            assert_eq!(t.capacity(), 0);

            // The table must be usable again after a releasing clear.
            t.insert_new(9, 9, ());
            assert!(t.find(&9).is_some());
            t.debug_validate_invariants();
        }

        #[test]
        fn reserve_prevents_rehash() {
            let mut t = table(0);
            t.reserve(100);
            let cap = t.capacity();
            for i in 0..100 {
                t.insert_new(i, i, ());
            }
            assert_eq!(t.capacity(), cap);
        }
    }

    // ==============================================
    // Scanning
    // ==============================================

    mod scanning {
        use super::*;

        #[test]
        fn scan_visits_every_live_entry_once() {
            let mut t = table(0);
            for i in 0..10 {
                t.insert_new(i, i, ());
            }
            t.erase_key(&3);
            t.erase_key(&7);

            let mut seen = Vec::new();
            let mut cursor = 0;
            while let Some((next, _, entry)) = t.scan(cursor) {
                seen.push(entry.key);
                cursor = next;
            }
            seen.sort_unstable();
            assert_eq!(seen, vec![0, 1, 2, 4, 5, 6, 8, 9]);
        }
    }
}
