//! Function memoization over any cache, with single-flight semantics.
//!
//! [`Memoized`] wraps an infallible function and [`TryMemoized`] a fallible
//! one. Results are stored in a backing cache (any [`SharedCache`]); when
//! several threads miss on the same key at once, exactly one computes and
//! the rest block on a per-key flight until the result lands — the cache
//! stampede never reaches the wrapped function.
//!
//! ## Single-flight protocol
//!
//! ```text
//!   caller ──► cache hit? ──yes──► record hit, return copy
//!                 │ no
//!                 ▼
//!   flight map (short lock): existing flight?
//!        │ yes                        │ no
//!        ▼                            ▼
//!   wait on condvar            install flight, compute OUTSIDE all locks
//!   Done(v)   → hit            store in cache, mark Done, notify
//!   Failed(e) → propagate      (errors propagate to waiters, never cached)
//!   Abandoned → retry          (panicking winner abandons the flight)
//! ```
//!
//! The backing cache's own lock is never held while the wrapped function
//! runs, and the flight map lock is held only for map lookups.
//!
//! ## Result copying
//!
//! Values come out of the cache by `Clone`, which for most Rust types is
//! already an independent copy. For `Arc`-backed aggregates a plain clone
//! shares the interior; the [`CopyLevel`] knob plus an optional deep-copy
//! hook control whether callers get the shared form ([`CopyLevel::Never`])
//! or a detached one ([`CopyLevel::Aggregates`]/[`CopyLevel::Full`] with a
//! hook installed). Without a hook every level degrades to plain `Clone`.
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::memo::Memoized;
//! use boxcache::FifoCache;
//!
//! let memo = Memoized::new(FifoCache::new(64), |n: &u64| n * n);
//! assert_eq!(memo.call(12), 144);
//! assert_eq!(memo.call(12), 144); // served from cache
//!
//! let info = memo.cache_info();
//! assert_eq!((info.hits, info.misses), (1, 1));
//! ```

use std::convert::Infallible;
use std::hash::{BuildHasher, BuildHasherDefault, Hash};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHasher};

use crate::traits::SharedCache;

/// Integer code reported for a miss event.
pub const EVENT_MISS: u8 = 1;
/// Integer code reported for a hit event.
pub const EVENT_HIT: u8 = 2;

/// Cache event passed to the optional callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The value was computed by the wrapped function.
    Miss,
    /// The value was served from the cache (or from another caller's
    /// just-finished flight).
    Hit,
}

impl Event {
    /// Returns the stable integer code ([`EVENT_MISS`] / [`EVENT_HIT`]).
    pub fn code(self) -> u8 {
        match self {
            Event::Miss => EVENT_MISS,
            Event::Hit => EVENT_HIT,
        }
    }
}

/// How results are returned to callers; see the [module docs](self).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyLevel {
    /// Hand back the plain clone; `Arc`-backed values share their interior.
    Never,
    /// Route container-like results through the deep-copy hook if one is
    /// installed.
    #[default]
    Aggregates,
    /// Route every result through the deep-copy hook if one is installed.
    Full,
}

/// Counters and sizing snapshot returned by `cache_info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheInfo {
    pub hits: u64,
    pub misses: u64,
    pub maxsize: usize,
    pub length: usize,
    /// Approximate memory footprint of the backing cache, in bytes.
    pub memory: usize,
}

/// Hashes any `Hash` value into a stable 64-bit cache key.
///
/// Helper for callers whose natural arguments are a tuple: hash the tuple
/// once and use the digest as the memoization key.
pub fn hash_key<T: Hash>(args: &T) -> u64 {
    BuildHasherDefault::<FxHasher>::default().hash_one(args)
}

type EventCallback<K, V> = Box<dyn Fn(Event, &K, &V) + Send + Sync>;
type DeepCopyFn<V> = Box<dyn Fn(&V) -> V + Send + Sync>;

// ---------------------------------------------------------------------------
// Single-flight machinery
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum FlightState<V, E> {
    Pending,
    Done(V),
    Failed(E),
    Abandoned,
}

#[derive(Debug)]
struct Flight<V, E> {
    state: Mutex<FlightState<V, E>>,
    cond: Condvar,
}

impl<V, E> Flight<V, E> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            cond: Condvar::new(),
        }
    }
}

#[derive(Debug)]
struct FlightMap<K, V, E> {
    flights: Mutex<FxHashMap<K, Arc<Flight<V, E>>>>,
}

/// Removes a still-pending flight on unwind so waiters retry instead of
/// blocking forever behind a panicked winner.
struct AbandonGuard<'a, K, V, E>
where
    K: Hash + Eq,
{
    map: &'a Mutex<FxHashMap<K, Arc<Flight<V, E>>>>,
    flight: &'a Arc<Flight<V, E>>,
    key: &'a K,
    armed: bool,
}

impl<K, V, E> AbandonGuard<'_, K, V, E>
where
    K: Hash + Eq,
{
    fn settle(mut self, state: FlightState<V, E>) {
        self.remove_from_map();
        *self.flight.state.lock() = state;
        self.flight.cond.notify_all();
        self.armed = false;
    }

    fn remove_from_map(&self) {
        let mut map = self.map.lock();
        if let Some(current) = map.get(self.key) {
            if Arc::ptr_eq(current, self.flight) {
                map.remove(self.key);
            }
        }
    }
}

impl<K, V, E> Drop for AbandonGuard<'_, K, V, E>
where
    K: Hash + Eq,
{
    fn drop(&mut self) {
        if self.armed {
            self.remove_from_map();
            *self.flight.state.lock() = FlightState::Abandoned;
            self.flight.cond.notify_all();
        }
    }
}

impl<K, V, E> FlightMap<K, V, E>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
{
    fn new() -> Self {
        Self {
            flights: Mutex::new(FxHashMap::default()),
        }
    }

    /// Runs `compute` under single-flight coordination for `key`.
    ///
    /// Returns the value plus whether this caller was the winner that ran
    /// `compute`. The winner stores into the cache inside `compute`, before
    /// any waiter is released.
    fn run(&self, key: &K, compute: impl Fn() -> Result<V, E>) -> Result<(V, bool), E> {
        loop {
            let (flight, installed) = {
                let mut map = self.flights.lock();
                match map.get(key) {
                    Some(flight) => (Arc::clone(flight), false),
                    None => {
                        let flight = Arc::new(Flight::new());
                        map.insert(key.clone(), Arc::clone(&flight));
                        (flight, true)
                    },
                }
            };

            if installed {
                // We are the winner: compute outside every lock. The guard
                // abandons the flight if `compute` unwinds.
                let guard = AbandonGuard {
                    map: &self.flights,
                    flight: &flight,
                    key,
                    armed: true,
                };
                return match compute() {
                    Ok(value) => {
                        guard.settle(FlightState::Done(value.clone()));
                        Ok((value, true))
                    },
                    Err(error) => {
                        guard.settle(FlightState::Failed(error.clone()));
                        Err(error)
                    },
                };
            }

            let mut state = flight.state.lock();
            while matches!(*state, FlightState::Pending) {
                flight.cond.wait(&mut state);
            }
            match &*state {
                FlightState::Done(value) => return Ok((value.clone(), false)),
                FlightState::Failed(error) => return Err(error.clone()),
                // The winner panicked; elect a new one.
                FlightState::Abandoned | FlightState::Pending => continue,
            }
        }
    }

    fn clear(&self) {
        self.flights.lock().clear();
    }
}

// ---------------------------------------------------------------------------
// Memoized (infallible)
// ---------------------------------------------------------------------------

/// Memoizes an infallible function over a backing cache.
///
/// Construct with [`new`](Self::new), then configure with the builder-style
/// `with_*` methods. Call through [`call`](Self::call);
/// [`call_uncached`](Self::call_uncached) bypasses the cache entirely.
pub struct Memoized<K, V, C, F>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: SharedCache<K, V>,
    F: Fn(&K) -> V,
{
    cache: C,
    func: F,
    flights: FlightMap<K, V, Infallible>,
    hits: AtomicU64,
    misses: AtomicU64,
    callback: Option<EventCallback<K, V>>,
    copy_level: CopyLevel,
    deep_copy: Option<DeepCopyFn<V>>,
    clear_reuse: bool,
}

impl<K, V, C, F> Memoized<K, V, C, F>
where
    K: Hash + Eq + Clone,
    V: Clone,
    C: SharedCache<K, V>,
    F: Fn(&K) -> V,
{
    /// Wraps `func` with memoization backed by `cache`.
    pub fn new(cache: C, func: F) -> Self {
        Self {
            cache,
            func,
            flights: FlightMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            callback: None,
            copy_level: CopyLevel::default(),
            deep_copy: None,
            clear_reuse: false,
        }
    }

    /// Installs a hit/miss callback.
    pub fn with_callback(mut self, callback: impl Fn(Event, &K, &V) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Sets the result copy level.
    pub fn with_copy_level(mut self, level: CopyLevel) -> Self {
        self.copy_level = level;
        self
    }

    /// Installs the deep-copy hook used by [`CopyLevel::Aggregates`] and
    /// [`CopyLevel::Full`].
    pub fn with_deep_copy(mut self, deep: impl Fn(&V) -> V + Send + Sync + 'static) -> Self {
        self.deep_copy = Some(Box::new(deep));
        self
    }

    /// Makes [`cache_clear`](Self::cache_clear) keep allocations for reuse.
    pub fn with_clear_reuse(mut self, reuse: bool) -> Self {
        self.clear_reuse = reuse;
        self
    }

    /// Looks up or computes the value for `key`.
    ///
    /// Concurrent callers for the same key block on one flight; exactly one
    /// invokes the wrapped function. If the backing cache is a full
    /// no-policy [`Cache`](crate::Cache), the computed value is returned
    /// but not retained.
    pub fn call(&self, key: K) -> V {
        if let Some(value) = self.cache.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.emit(Event::Hit, &key, &value);
            return self.copy_out(value);
        }

        let outcome = self.flights.run(&key, || {
            // Re-check: another flight may have landed between our lookup
            // and the flight installation.
            if let Some(value) = self.cache.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.emit(Event::Hit, &key, &value);
                return Ok(value);
            }
            let value = (self.func)(&key);
            let _ = self.cache.store(key.clone(), value.clone());
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.emit(Event::Miss, &key, &value);
            Ok(value)
        });
        let (value, winner) = match outcome {
            Ok(pair) => pair,
            Err(never) => match never {},
        };
        if !winner {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.emit(Event::Hit, &key, &value);
        }
        self.copy_out(value)
    }

    /// Calls the wrapped function directly, bypassing the cache.
    pub fn call_uncached(&self, key: &K) -> V {
        (self.func)(key)
    }

    /// Returns the backing cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns hit/miss counters and backing-cache sizing.
    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            maxsize: self.cache.maxsize(),
            length: self.cache.len(),
            memory: self.cache.approx_bytes(),
        }
    }

    /// Clears the backing cache, the counters and any idle flights.
    pub fn cache_clear(&self) {
        self.cache.wipe(self.clear_reuse);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.flights.clear();
    }

    fn emit(&self, event: Event, key: &K, value: &V) {
        if let Some(callback) = &self.callback {
            callback(event, key, value);
        }
    }

    fn copy_out(&self, value: V) -> V {
        match self.copy_level {
            CopyLevel::Never => value,
            CopyLevel::Aggregates | CopyLevel::Full => match &self.deep_copy {
                Some(deep) => deep(&value),
                None => value,
            },
        }
    }
}

// ---------------------------------------------------------------------------
// TryMemoized (fallible)
// ---------------------------------------------------------------------------

/// Memoizes a fallible function over a backing cache.
///
/// Successful values are cached; errors are propagated to every caller
/// currently waiting on the same flight and are never cached — the next
/// call for that key retries the computation.
pub struct TryMemoized<K, V, E, C, F>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
    C: SharedCache<K, V>,
    F: Fn(&K) -> Result<V, E>,
{
    cache: C,
    func: F,
    flights: FlightMap<K, V, E>,
    hits: AtomicU64,
    misses: AtomicU64,
    callback: Option<EventCallback<K, V>>,
    copy_level: CopyLevel,
    deep_copy: Option<DeepCopyFn<V>>,
    clear_reuse: bool,
}

impl<K, V, E, C, F> TryMemoized<K, V, E, C, F>
where
    K: Hash + Eq + Clone,
    V: Clone,
    E: Clone,
    C: SharedCache<K, V>,
    F: Fn(&K) -> Result<V, E>,
{
    /// Wraps `func` with memoization backed by `cache`.
    pub fn new(cache: C, func: F) -> Self {
        Self {
            cache,
            func,
            flights: FlightMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            callback: None,
            copy_level: CopyLevel::default(),
            deep_copy: None,
            clear_reuse: false,
        }
    }

    /// Installs a hit/miss callback.
    pub fn with_callback(mut self, callback: impl Fn(Event, &K, &V) + Send + Sync + 'static) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Sets the result copy level.
    pub fn with_copy_level(mut self, level: CopyLevel) -> Self {
        self.copy_level = level;
        self
    }

    /// Installs the deep-copy hook used by [`CopyLevel::Aggregates`] and
    /// [`CopyLevel::Full`].
    pub fn with_deep_copy(mut self, deep: impl Fn(&V) -> V + Send + Sync + 'static) -> Self {
        self.deep_copy = Some(Box::new(deep));
        self
    }

    /// Makes [`cache_clear`](Self::cache_clear) keep allocations for reuse.
    pub fn with_clear_reuse(mut self, reuse: bool) -> Self {
        self.clear_reuse = reuse;
        self
    }

    /// Looks up or computes the value for `key`.
    ///
    /// An error from the wrapped function reaches every waiter of the
    /// current flight and is not cached; a later call retries.
    pub fn call(&self, key: K) -> Result<V, E> {
        if let Some(value) = self.cache.lookup(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.emit(Event::Hit, &key, &value);
            return Ok(self.copy_out(value));
        }

        let (value, winner) = self.flights.run(&key, || {
            if let Some(value) = self.cache.lookup(&key) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                self.emit(Event::Hit, &key, &value);
                return Ok(value);
            }
            let value = (self.func)(&key)?;
            let _ = self.cache.store(key.clone(), value.clone());
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.emit(Event::Miss, &key, &value);
            Ok(value)
        })?;
        if !winner {
            self.hits.fetch_add(1, Ordering::Relaxed);
            self.emit(Event::Hit, &key, &value);
        }
        Ok(self.copy_out(value))
    }

    /// Calls the wrapped function directly, bypassing the cache.
    pub fn call_uncached(&self, key: &K) -> Result<V, E> {
        (self.func)(key)
    }

    /// Returns the backing cache.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    /// Returns hit/miss counters and backing-cache sizing.
    pub fn cache_info(&self) -> CacheInfo {
        CacheInfo {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            maxsize: self.cache.maxsize(),
            length: self.cache.len(),
            memory: self.cache.approx_bytes(),
        }
    }

    /// Clears the backing cache, the counters and any idle flights.
    pub fn cache_clear(&self) {
        self.cache.wipe(self.clear_reuse);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.flights.clear();
    }

    fn emit(&self, event: Event, key: &K, value: &V) {
        if let Some(callback) = &self.callback {
            callback(event, key, value);
        }
    }

    fn copy_out(&self, value: V) -> V {
        match self.copy_level {
            CopyLevel::Never => value,
            CopyLevel::Aggregates | CopyLevel::Full => match &self.deep_copy {
                Some(deep) => deep(&value),
                None => value,
            },
        }
    }
}
