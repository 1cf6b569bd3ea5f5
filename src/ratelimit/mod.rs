//! Admission control algorithms and per-tenant state.

mod backend;
mod leaky_bucket;
mod sliding_window;
mod tenancy;

pub use backend::RateLimiterBackend;
pub use leaky_bucket::{CapacityBook, LeakyBucketControlBlock, LeakyBucketLimiter, SyncDelta};
pub use sliding_window::{AccessCounter, SlidingWindowConfig, SlidingWindowControlBlock, SlidingWindowLimiter};
pub use tenancy::{StaticTenancy, TenancyResolver, TenantLimit};
