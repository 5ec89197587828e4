//! Shared cache surface used by the memoization layer.
//!
//! Every cache in this crate is internally synchronized and exposes its
//! operations through `&self`. [`SharedCache`] captures the minimal slice of
//! that surface the [`memo`](crate::memo) wrapper needs so a memoizer can be
//! backed by any policy:
//!
//! | Method          | Backed by                                        |
//! |-----------------|--------------------------------------------------|
//! | `lookup`        | the policy's `get` (touching recency/frequency)  |
//! | `store`         | the policy's upsert (TTL uses its uniform ttl,   |
//! |                 | per-key TTL stores without a deadline)           |
//! | `wipe`          | `clear(reuse)`                                   |
//! | `approx_bytes`  | the table's footprint estimate                   |
//!
//! `store` is fallible only for the no-policy [`Cache`](crate::Cache),
//! whose bound is hard; evicting policies always make room and return
//! `Ok`. Policy-specific operations (`popitem`, ordered peeks, expiry
//! variants) stay inherent methods on the concrete types — a deliberately
//! narrow trait keeps policy-inappropriate operations off generic code.

use crate::error::OverflowError;

/// Thread-safe map-like surface common to all seven cache types.
pub trait SharedCache<K, V> {
    /// Looks up a key, cloning the value out. Counts as a touch for
    /// recency/frequency policies and is expiry-aware for the TTL policies.
    fn lookup(&self, key: &K) -> Option<V>;

    /// Upserts a key, returning the previous value if one was replaced.
    ///
    /// Evicting policies never fail; the no-policy cache reports
    /// [`OverflowError`] at its bound.
    fn store(&self, key: K, value: V) -> Result<Option<V>, OverflowError>;

    /// Returns the number of live entries.
    fn len(&self) -> usize;

    /// Returns `true` if the cache holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the effective bound (see [`table::UNBOUNDED`](crate::table::UNBOUNDED)).
    fn maxsize(&self) -> usize;

    /// Approximate heap footprint in bytes.
    fn approx_bytes(&self) -> usize;

    /// Removes all entries; with `reuse` the allocations are kept.
    fn wipe(&self, reuse: bool);
}
