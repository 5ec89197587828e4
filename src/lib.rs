//! boxcache: bounded in-process caches behind a common map-like surface.
//!
//! Seven interchangeable eviction policies (no-policy, FIFO, LRU, LFU, RR,
//! uniform TTL, per-key TTL) share a single open-addressed table substrate.
//! Every cache is internally synchronized with one reader-writer lock and a
//! mutation generation counter that invalidates in-flight iterators. On top
//! sits a memoizing wrapper with single-flight (stampede-avoidance)
//! semantics, and every cache can be saved to and restored from a versioned
//! byte stream.
//!
//! See `DESIGN.md` for internal architecture and invariants.

pub mod ds;
pub mod error;
pub mod iter;
pub mod memo;
pub mod policy;
pub mod snapshot;
pub mod table;
pub mod traits;

pub mod prelude;

pub use error::{IterationError, OverflowError, SnapshotError};
pub use policy::fifo::FifoCache;
pub use policy::lfu::LfuCache;
pub use policy::lru::LruCache;
pub use policy::nopolicy::Cache;
pub use policy::rr::RrCache;
pub use policy::ttl::TtlCache;
pub use policy::vttl::VttlCache;
