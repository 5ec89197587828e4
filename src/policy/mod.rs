//! The seven eviction-policy engines.
//!
//! Each module pairs an unsynchronized `*Core` (all of the policy logic,
//! owning the table and its auxiliary structure) with a public thread-safe
//! cache type holding the core behind one reader-writer lock — the
//! concurrency shell. Read-shaped operations that mutate policy structure
//! (an LRU/LFU touch, a TTL expiry removal) take the write lock.
//!
//! | Module     | Type        | Auxiliary structure          | Victim        |
//! |------------|-------------|------------------------------|---------------|
//! | `nopolicy` | [`Cache`]   | none                         | rejects       |
//! | `fifo`     | [`FifoCache`]| insertion ring              | oldest        |
//! | `lru`      | [`LruCache`]| recency ring                 | least recent  |
//! | `lfu`      | [`LfuCache`]| per-entry counter            | least frequent|
//! | `rr`       | [`RrCache`] | dense slot vector            | uniform random|
//! | `ttl`      | [`TtlCache`]| insertion ring (= expiry)    | oldest        |
//! | `vttl`     | [`VttlCache`]| deadline heap               | earliest due  |
//!
//! [`Cache`]: nopolicy::Cache
//! [`FifoCache`]: fifo::FifoCache
//! [`LruCache`]: lru::LruCache
//! [`LfuCache`]: lfu::LfuCache
//! [`RrCache`]: rr::RrCache
//! [`TtlCache`]: ttl::TtlCache
//! [`VttlCache`]: vttl::VttlCache

pub mod fifo;
pub mod lfu;
pub mod lru;
pub mod nopolicy;
pub mod rr;
pub mod ttl;
pub mod vttl;
