//! Bounded per-tenant state storage.
//!
//! All per-tenant control blocks live in a [`BoundedCache`], a fixed-capacity
//! LRU whose storage is allocated once at construction. [`GuardedCache`] adds
//! the coarse lock that serializes cache *shape* changes (slot assignment,
//! eviction, recency) across threads; numeric work on a cached value is
//! guarded separately by the value itself.

mod guarded;
mod lru;

pub use guarded::GuardedCache;
pub use lru::{BoundedCache, Iter};
