//! Lazy min-heap over per-entry deadlines.
//!
//! Maintains a `BinaryHeap` of `(deadline, seq, slot)` plus an authoritative
//! map from slot to its current `(deadline, seq)`. Re-inserting a slot pushes
//! a fresh heap entry with a new sequence number; removal only touches the
//! map. Pops skip heap entries whose sequence no longer matches the map, so
//! the earliest live deadline is found in amortized O(log n) and an expiry
//! sweep of k entries costs O(k log n).
//!
//! ```text
//!   deadlines (authoritative)          heap (may hold stale entries)
//!   ┌────────┬──────────────┐          min: (t1, seq=5, s_b)
//!   │  s_a   │ (t3, seq=2)  │               (t2, seq=2, s_a)
//!   │  s_b   │ (t1, seq=5)  │               (t9, seq=1, s_b)  stale
//!   └────────┴──────────────┘
//! ```
//!
//! The sequence guard also protects against slot reuse: a recycled `Slot`
//! gets a new sequence, so leftover heap entries for its previous occupant
//! can never match.

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::Instant;

use rustc_hash::FxHashMap;

use crate::ds::arena::Slot;

#[derive(Debug, Clone, Copy)]
struct DueEntry {
    due: Instant,
    seq: u64,
    slot: Slot,
}

impl PartialEq for DueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for DueEntry {}

impl PartialOrd for DueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.due.cmp(&other.due) {
            Ordering::Equal => self.seq.cmp(&other.seq),
            ordering => ordering,
        }
    }
}

/// Min-ordered deadline sequence with lazy deletion.
#[derive(Debug, Clone, Default)]
pub struct DeadlineHeap {
    deadlines: FxHashMap<Slot, (Instant, u64)>,
    heap: BinaryHeap<Reverse<DueEntry>>,
    seq: u64,
}

impl DeadlineHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of slots with a live deadline.
    #[inline]
    pub fn len(&self) -> usize {
        self.deadlines.len()
    }

    /// Returns `true` if no slot has a deadline.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.deadlines.is_empty()
    }

    /// Returns the current deadline for `slot`, if tracked.
    pub fn deadline_of(&self, slot: Slot) -> Option<Instant> {
        self.deadlines.get(&slot).map(|&(due, _)| due)
    }

    /// Sets (or replaces) the deadline for `slot`.
    pub fn insert(&mut self, slot: Slot, due: Instant) {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        self.deadlines.insert(slot, (due, seq));
        self.heap.push(Reverse(DueEntry { due, seq, slot }));
    }

    /// Drops the deadline for `slot`, returning it if one was tracked.
    ///
    /// Stale heap entries are left behind and skipped on later pops.
    pub fn remove(&mut self, slot: Slot) -> Option<Instant> {
        self.deadlines.remove(&slot).map(|(due, _)| due)
    }

    /// Pops the earliest live deadline if it is at or before `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Slot, Instant)> {
        loop {
            let entry = match self.heap.peek() {
                Some(Reverse(entry)) => *entry,
                None => return None,
            };
            match self.deadlines.get(&entry.slot) {
                Some(&(due, seq)) if seq == entry.seq => {
                    if due > now {
                        return None;
                    }
                    self.heap.pop();
                    self.deadlines.remove(&entry.slot);
                    return Some((entry.slot, due));
                },
                _ => {
                    self.heap.pop();
                },
            }
        }
    }

    /// Pops the earliest live deadline unconditionally.
    pub fn pop_earliest(&mut self) -> Option<(Slot, Instant)> {
        loop {
            let Reverse(entry) = self.heap.pop()?;
            match self.deadlines.get(&entry.slot) {
                Some(&(_, seq)) if seq == entry.seq => {
                    self.deadlines.remove(&entry.slot);
                    return Some((entry.slot, entry.due));
                },
                _ => continue,
            }
        }
    }

    /// Returns the earliest live deadline without removing it.
    ///
    /// Stale heap entries encountered on the way are discarded.
    pub fn peek_earliest(&mut self) -> Option<(Slot, Instant)> {
        loop {
            let entry = match self.heap.peek() {
                Some(Reverse(entry)) => *entry,
                None => return None,
            };
            match self.deadlines.get(&entry.slot) {
                Some(&(_, seq)) if seq == entry.seq => return Some((entry.slot, entry.due)),
                _ => {
                    self.heap.pop();
                },
            }
        }
    }

    /// Clears all deadlines, keeping allocations.
    pub fn clear(&mut self) {
        self.deadlines.clear();
        self.heap.clear();
    }

    /// Clears all deadlines and releases allocations.
    pub fn release(&mut self) {
        self.deadlines = FxHashMap::default();
        self.heap = BinaryHeap::new();
    }

    /// Rebuilds the heap from the authoritative map, dropping stale entries.
    pub fn rebuild(&mut self) {
        self.heap.clear();
        for (&slot, &(due, seq)) in &self.deadlines {
            self.heap.push(Reverse(DueEntry { due, seq, slot }));
        }
    }

    /// Rebuilds when stale entries outnumber live ones `factor` times over.
    pub fn maybe_rebuild(&mut self, factor: usize) {
        let factor = factor.max(1);
        if self.heap.len() > self.deadlines.len().saturating_mul(factor).max(64) {
            self.rebuild();
        }
    }

    /// Shrinks internal storage to fit current contents.
    pub fn shrink_to_fit(&mut self) {
        self.rebuild();
        self.deadlines.shrink_to_fit();
        self.heap.shrink_to_fit();
    }

    #[cfg(any(test, debug_assertions))]
    pub fn debug_validate_invariants(&self) {
        assert!(self.heap.len() >= self.deadlines.len());
        for (&slot, &(due, seq)) in &self.deadlines {
            let found = self
                .heap
                .iter()
                .any(|Reverse(e)| e.slot == slot && e.seq == seq && e.due == due);
            assert!(found, "live deadline missing from heap for {slot:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn slot(n: u32) -> Slot {
        Slot(n)
    }

    #[test]
    fn pops_in_deadline_order() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(slot(1), base + Duration::from_secs(3));
        heap.insert(slot(2), base + Duration::from_secs(1));
        heap.insert(slot(3), base + Duration::from_secs(2));

        assert_eq!(heap.pop_earliest().map(|(s, _)| s), Some(slot(2)));
        assert_eq!(heap.pop_earliest().map(|(s, _)| s), Some(slot(3)));
        assert_eq!(heap.pop_earliest().map(|(s, _)| s), Some(slot(1)));
        assert_eq!(heap.pop_earliest(), None);
    }

    #[test]
    fn reinsert_supersedes_old_deadline() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(slot(1), base + Duration::from_secs(1));
        heap.insert(slot(1), base + Duration::from_secs(5));
        heap.insert(slot(2), base + Duration::from_secs(2));

        // The stale (slot 1, 1s) entry must be skipped.
        assert_eq!(heap.pop_earliest().map(|(s, _)| s), Some(slot(2)));
        assert_eq!(heap.pop_earliest().map(|(s, _)| s), Some(slot(1)));
        assert!(heap.is_empty());
    }

    #[test]
    fn pop_due_respects_now() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(slot(1), base + Duration::from_secs(1));
        heap.insert(slot(2), base + Duration::from_secs(10));

        assert_eq!(
            heap.pop_due(base + Duration::from_secs(2)).map(|(s, _)| s),
            Some(slot(1))
        );
        assert_eq!(heap.pop_due(base + Duration::from_secs(2)), None);
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn removed_slot_is_never_popped() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(slot(1), base + Duration::from_secs(1));
        heap.insert(slot(2), base + Duration::from_secs(2));
        assert!(heap.remove(slot(1)).is_some());

        assert_eq!(heap.pop_earliest().map(|(s, _)| s), Some(slot(2)));
        assert_eq!(heap.pop_earliest(), None);
    }

    #[test]
    fn slot_reuse_does_not_resurrect_old_entry() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(slot(1), base + Duration::from_secs(1));
        heap.remove(slot(1));
        // Slot 1 is recycled by a new entry with a later deadline.
        heap.insert(slot(1), base + Duration::from_secs(9));

        let (popped, due) = heap.pop_earliest().unwrap();
        assert_eq!(popped, slot(1));
        assert_eq!(due, base + Duration::from_secs(9));
    }

    #[test]
    fn peek_does_not_remove() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        heap.insert(slot(7), base + Duration::from_secs(4));
        assert_eq!(heap.peek_earliest().map(|(s, _)| s), Some(slot(7)));
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn rebuild_drops_stale_entries() {
        let base = Instant::now();
        let mut heap = DeadlineHeap::new();
        for i in 0..10 {
            heap.insert(slot(1), base + Duration::from_secs(i));
        }
        heap.rebuild();
        assert_eq!(heap.heap.len(), 1);
        heap.debug_validate_invariants();
    }
}
