//! Error types for the boxcache library.
//!
//! ## Key Components
//!
//! - [`OverflowError`]: Returned when an insert would push a non-evicting
//!   cache past its bound.
//! - [`IterationError`]: Returned when an iterator observes a mutation that
//!   happened after its creation.
//! - [`SnapshotError`]: Returned when saving or loading a cache snapshot
//!   fails (I/O, wrong format version, wrong policy, corrupt stream).
//!
//! Absent keys are reported as `None` throughout the crate rather than as an
//! error value. Invalid constructor arguments (a zero ttl, for instance) are
//! programmer errors and are `assert!`-checked at construction.
//!
//! ## Example Usage
//!
//! ```
//! use boxcache::Cache;
//! use boxcache::error::OverflowError;
//!
//! let cache: Cache<&str, i32> = Cache::new(1);
//! cache.insert("a", 1).unwrap();
//!
//! // The no-policy cache has nothing to evict, so the bound is hard.
//! let err: OverflowError = cache.insert("b", 2).unwrap_err();
//! assert!(err.to_string().contains("maxsize"));
//! ```

use std::fmt;

// ---------------------------------------------------------------------------
// OverflowError
// ---------------------------------------------------------------------------

/// Error returned when inserting into a full non-evicting cache.
///
/// Only the plain [`Cache`](crate::Cache) produces this: it has no eviction
/// policy, so once `len == maxsize` a new key has nowhere to go. Caches with
/// an eviction policy make room instead and never return this error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowError {
    maxsize: usize,
}

impl OverflowError {
    pub(crate) fn new(maxsize: usize) -> Self {
        Self { maxsize }
    }

    /// Returns the bound that was hit.
    #[inline]
    pub fn maxsize(&self) -> usize {
        self.maxsize
    }
}

impl fmt::Display for OverflowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cache reached the maxsize limit ({})", self.maxsize)
    }
}

impl std::error::Error for OverflowError {}

// ---------------------------------------------------------------------------
// IterationError
// ---------------------------------------------------------------------------

/// Error yielded by a cache iterator after a concurrent mutation.
///
/// Iterators record the cache's generation counter at creation; any mutation
/// bumps the counter, and the next advance of the iterator fails with this
/// error instead of yielding stale or duplicated entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IterationError(());

impl IterationError {
    pub(crate) fn new() -> Self {
        Self(())
    }
}

impl fmt::Display for IterationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("cache changed during iteration")
    }
}

impl std::error::Error for IterationError {}

// ---------------------------------------------------------------------------
// SnapshotError
// ---------------------------------------------------------------------------

/// Error returned by [`snapshot`](crate::snapshot) save/load operations.
#[derive(Debug)]
pub enum SnapshotError {
    /// Underlying reader or writer failed.
    Io(std::io::Error),
    /// The stream was produced by an incompatible major format version.
    Version { found: u16, expected: u16 },
    /// The stream encodes a different cache policy than the one loading it.
    Policy { found: u8, expected: u8 },
    /// The stream is truncated or structurally invalid.
    Corrupt(String),
}

impl fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SnapshotError::Io(err) => write!(f, "snapshot i/o error: {err}"),
            SnapshotError::Version { found, expected } => {
                write!(
                    f,
                    "incompatible snapshot version {found} (expected major {expected})"
                )
            },
            SnapshotError::Policy { found, expected } => {
                write!(
                    f,
                    "snapshot holds policy tag {found}, cannot load as policy {expected}"
                )
            },
            SnapshotError::Corrupt(what) => write!(f, "corrupt snapshot: {what}"),
        }
    }
}

impl std::error::Error for SnapshotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SnapshotError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SnapshotError {
    fn from(err: std::io::Error) -> Self {
        SnapshotError::Io(err)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_display_names_the_bound() {
        let err = OverflowError::new(128);
        assert!(err.to_string().contains("128"));
        assert_eq!(err.maxsize(), 128);
    }

    #[test]
    fn iteration_display_is_stable() {
        assert_eq!(
            IterationError::new().to_string(),
            "cache changed during iteration"
        );
    }

    #[test]
    fn snapshot_version_display_shows_both_versions() {
        let err = SnapshotError::Version {
            found: 3,
            expected: 1,
        };
        let text = err.to_string();
        assert!(text.contains('3'));
        assert!(text.contains('1'));
    }

    #[test]
    fn errors_implement_std_error() {
        fn assert_error<T: std::error::Error>() {}
        assert_error::<OverflowError>();
        assert_error::<IterationError>();
        assert_error::<SnapshotError>();
    }
}
