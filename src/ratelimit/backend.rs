//! Rate limiter trait for abstracting over the admission algorithms.

/// Trait for rate limiter implementations.
///
/// This is the whole surface the request-handling layer sees: one boolean per
/// request. It abstracts over the `SlidingWindowLimiter` and the
/// `LeakyBucketLimiter` so the caller can work with either.
pub trait RateLimiterBackend: Send + Sync {
    /// Charge `cost` against every identifier attached to a request and
    /// decide whether the request may proceed.
    ///
    /// A request carrying no identifier that the limiter can charge is
    /// denied.
    fn attempt_access(&self, cost: u32, tenant_ids: &[&str]) -> bool;
}
