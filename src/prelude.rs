pub use crate::ds::{Arena, DeadlineHeap, OrderRing, Slot};
pub use crate::error::{IterationError, OverflowError, SnapshotError};
pub use crate::memo::{CacheInfo, CopyLevel, Event, Memoized, TryMemoized};
pub use crate::policy::fifo::FifoCache;
pub use crate::policy::lfu::LfuCache;
pub use crate::policy::lru::LruCache;
pub use crate::policy::nopolicy::Cache;
pub use crate::policy::rr::RrCache;
pub use crate::policy::ttl::TtlCache;
pub use crate::policy::vttl::VttlCache;
pub use crate::traits::SharedCache;
