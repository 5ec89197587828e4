//! Generation-checked snapshot iteration.
//!
//! Iterators hold a borrow of their cache plus the generation counter
//! observed at creation. Every advance briefly takes the cache's shared
//! lock, re-checks the generation, and clones the next live entry out; a
//! mismatch yields `Err(`[`IterationError`]`)` exactly once, after which the
//! iterator is fused empty. No lock is held between advances, so holding an
//! iterator never blocks writers — it merely gets invalidated by them.
//!
//! The TTL policies define their own iterators on the same
//! [`SnapshotSource`] access so they can skip entries that expired after the
//! snapshot was taken.

use crate::error::IterationError;
use crate::table::CacheTable;

/// Shared-lock access to a cache's table and generation counter.
///
/// Implemented by every cache wrapper; the closure runs under the cache's
/// shared lock and must not re-enter the cache.
pub trait SnapshotSource {
    type Key;
    type Value;
    type Meta;

    fn with_table<R>(
        &self,
        f: impl FnOnce(&CacheTable<Self::Key, Self::Value, Self::Meta>, u64) -> R,
    ) -> R;
}

pub(crate) enum Step<T> {
    Yield(usize, T),
    Invalidated,
    End,
}

pub(crate) fn advance<S, T>(
    source: &S,
    generation: u64,
    cursor: usize,
    project: impl FnOnce(&crate::table::Entry<S::Key, S::Value, S::Meta>) -> T,
) -> Step<T>
where
    S: SnapshotSource,
    S::Key: std::hash::Hash + Eq,
{
    source.with_table(|table, current| {
        if current != generation {
            return Step::Invalidated;
        }
        match table.scan(cursor) {
            Some((next, _, entry)) => Step::Yield(next, project(entry)),
            None => Step::End,
        }
    })
}

macro_rules! snapshot_iter {
    ($(#[$doc:meta])* $name:ident, $item:ty, |$entry:ident| $project:expr) => {
        $(#[$doc])*
        pub struct $name<'a, S: SnapshotSource> {
            source: &'a S,
            generation: u64,
            cursor: usize,
            done: bool,
        }

        impl<'a, S: SnapshotSource> $name<'a, S> {
            pub(crate) fn new(source: &'a S) -> Self {
                let generation = source.with_table(|_, generation| generation);
                Self {
                    source,
                    generation,
                    cursor: 0,
                    done: false,
                }
            }
        }

        impl<'a, S> Iterator for $name<'a, S>
        where
            S: SnapshotSource,
            S::Key: Clone + std::hash::Hash + Eq,
            S::Value: Clone,
        {
            type Item = Result<$item, IterationError>;

            fn next(&mut self) -> Option<Self::Item> {
                if self.done {
                    return None;
                }
                let step = advance(self.source, self.generation, self.cursor, |$entry| {
                    $project
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
    };
}

snapshot_iter!(
    /// Snapshot iterator over cache keys. Order is unspecified.
    Keys,
    S::Key,
    |entry| entry.key.clone()
);

snapshot_iter!(
    /// Snapshot iterator over cache values. Order is unspecified.
    Values,
    S::Value,
    |entry| entry.value.clone()
);

snapshot_iter!(
    /// Snapshot iterator over `(key, value)` pairs. Order is unspecified.
    Items,
    (S::Key, S::Value),
    |entry| (entry.key.clone(), entry.value.clone())
);
