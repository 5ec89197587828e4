//! Data-structure substrate shared by the policy engines.
//!
//! - [`Arena`]/[`Slot`]: stable-handle slot storage for cache entries.
//! - [`OrderRing`]: doubly linked insertion/recency ring over arena slots.
//! - [`DeadlineHeap`]: lazy min-heap over per-entry deadlines.

pub mod arena;
pub mod deadline_heap;
pub mod order_ring;

pub use arena::{Arena, Slot};
pub use deadline_heap::DeadlineHeap;
pub use order_ring::OrderRing;
