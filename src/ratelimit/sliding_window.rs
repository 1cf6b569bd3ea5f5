//! Discrete sliding window rate limiter.
//!
//! Each tenant owns a ring of `sub_interval_count` counters covering the full
//! interval. Counters are retired one sub-interval at a time as the window
//! slides, so memory per tenant is fixed regardless of the request limit.
//!
//! The window only has sub-interval precision. A burst landing at the very
//! end of a sub-interval is forgotten once that slot is reused, so the
//! enforced window can be as short as
//! `full_interval - sub_interval_length + 1`. The advertised interval is never
//! silently lengthened to compensate.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{trace, warn};

use super::backend::RateLimiterBackend;
use crate::cache::GuardedCache;
use crate::clock::{elapsed_between, Clock};
use crate::error::{MeshLimitError, Result};

/// Per sub-interval counter. Deliberately narrow: the cache is sized for
/// millions of tenants.
pub type AccessCounter = u8;

/// Window parameters shared by every tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlidingWindowConfig {
    request_limit: AccessCounter,
    full_interval: Duration,
    sub_interval_count: u32,
}

impl SlidingWindowConfig {
    pub fn new(
        request_limit: AccessCounter,
        full_interval: Duration,
        sub_interval_count: u32,
    ) -> Result<Self> {
        if request_limit == 0 {
            return Err(MeshLimitError::InvalidLimit(
                "request limit must be at least 1".to_string(),
            ));
        }
        if sub_interval_count == 0 {
            return Err(MeshLimitError::InvalidLimit(
                "sub interval count must be at least 1".to_string(),
            ));
        }
        if full_interval.as_nanos() < u128::from(sub_interval_count) {
            return Err(MeshLimitError::InvalidLimit(format!(
                "full interval {:?} cannot be split into {} sub intervals",
                full_interval, sub_interval_count
            )));
        }

        Ok(Self {
            request_limit,
            full_interval,
            sub_interval_count,
        })
    }

    pub fn request_limit(&self) -> AccessCounter {
        self.request_limit
    }

    pub fn full_interval(&self) -> Duration {
        self.full_interval
    }

    pub fn sub_interval_count(&self) -> u32 {
        self.sub_interval_count
    }

    pub fn sub_interval_length(&self) -> Duration {
        self.full_interval / self.sub_interval_count
    }
}

impl Default for SlidingWindowConfig {
    /// 100 requests per hour in 6 minute slots.
    fn default() -> Self {
        Self {
            request_limit: 100,
            full_interval: Duration::from_secs(3600),
            sub_interval_count: 10,
        }
    }
}

/// Mutable per-tenant window state.
pub struct SlidingWindowControlBlock {
    state: Mutex<WindowState>,
}

struct WindowState {
    /// Start of the sub-interval at `last_access_index`.
    window_start: DateTime<Utc>,
    last_access_index: usize,
    counters: Box<[AccessCounter]>,
    /// Always equal to the sum of `counters`.
    accesses_in_window: AccessCounter,
}

impl SlidingWindowControlBlock {
    fn new(now: DateTime<Utc>, config: &SlidingWindowConfig) -> Self {
        Self {
            state: Mutex::new(WindowState {
                window_start: now,
                last_access_index: 0,
                counters: vec![0; config.sub_interval_count as usize].into_boxed_slice(),
                accesses_in_window: 0,
            }),
        }
    }

    /// Record an access attempt and report whether it was within quota.
    ///
    /// Denied attempts are counted too: a client retrying in a tight loop
    /// stays denied until it backs off, rather than draining a fresh quota
    /// the moment its window slides.
    fn access_attempt(&self, now: DateTime<Utc>, config: &SlidingWindowConfig, cost: u32) -> bool {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.reconcile(now, config);

        let allowed = state.accesses_in_window < config.request_limit;

        // On would-overflow the attempt goes unrecorded; the decision stands.
        if let Ok(cost) = AccessCounter::try_from(cost) {
            let index = state.last_access_index;
            let slot = &mut state.counters[index];
            if let (Some(in_slot), Some(in_window)) = (
                slot.checked_add(cost),
                state.accesses_in_window.checked_add(cost),
            ) {
                *slot = in_slot;
                state.accesses_in_window = in_window;
            }
        }

        allowed
    }

    /// Whether this tenant's current window is still open at `now`.
    fn would_be_limited(&self, now: DateTime<Utc>, config: &SlidingWindowConfig) -> bool {
        let state = self.state.lock();
        elapsed_between(state.window_start, now) < config.full_interval
    }
}

impl WindowState {
    fn reconcile(&mut self, now: DateTime<Utc>, config: &SlidingWindowConfig) {
        let elapsed = elapsed_between(self.window_start, now);

        if elapsed > config.full_interval {
            // reuse the ring in place
            self.counters.fill(0);
            self.accesses_in_window = 0;
            self.window_start = now;
            self.last_access_index = 0;
            return;
        }

        let sub_interval = config.sub_interval_length();
        let crossed = (elapsed.as_nanos() / sub_interval.as_nanos()) as usize;
        if crossed == 0 {
            return;
        }

        let ring = self.counters.len();
        for step in 1..=crossed.min(ring) {
            let i = (self.last_access_index + step) % ring;
            self.accesses_in_window = self.accesses_in_window.saturating_sub(self.counters[i]);
            self.counters[i] = 0;
        }

        let advance = sub_interval * crossed as u32;
        self.window_start += chrono::Duration::from_std(advance).unwrap_or(chrono::Duration::zero());
        self.last_access_index = (self.last_access_index + crossed) % ring;
    }
}

/// Per-tenant sliding window limiter over a bounded cache.
///
/// Only the noisiest `tenant_capacity` tenants are tracked at any time.
pub struct SlidingWindowLimiter {
    cache: GuardedCache<String, SlidingWindowControlBlock>,
    clock: Arc<dyn Clock>,
    config: SlidingWindowConfig,
    limited_evictions: AtomicU64,
}

impl SlidingWindowLimiter {
    pub fn new(config: SlidingWindowConfig, tenant_capacity: NonZeroUsize, clock: Arc<dyn Clock>) -> Self {
        Self {
            cache: GuardedCache::new(tenant_capacity),
            clock,
            config,
            limited_evictions: AtomicU64::new(0),
        }
    }

    /// Charge `cost` to `tenant_id` and report whether it was within quota.
    pub fn attempt_access(&self, tenant_id: &str, cost: u32) -> bool {
        let now = self.clock.now();

        let (block, evicted) = self
            .cache
            .get_or_insert_with(tenant_id, || SlidingWindowControlBlock::new(now, &self.config));

        if let Some((evicted_id, evicted_block)) = evicted {
            if evicted_block.would_be_limited(now, &self.config) {
                self.limited_evictions.fetch_add(1, Ordering::Relaxed);
                warn!(
                    tenant = %evicted_id,
                    capacity = self.cache.capacity(),
                    "Evicted a tenant still inside its rate limit window; tenant capacity is undersized"
                );
            }
        }

        let allowed = block.access_attempt(now, &self.config, cost);
        trace!(tenant = %tenant_id, cost, allowed, "Sliding window access attempt");
        allowed
    }

    pub fn config(&self) -> &SlidingWindowConfig {
        &self.config
    }

    /// Number of tenants evicted while their window was still open.
    pub fn limited_evictions(&self) -> u64 {
        self.limited_evictions.load(Ordering::Relaxed)
    }

    pub fn tenant_count(&self) -> usize {
        self.cache.len()
    }
}

impl RateLimiterBackend for SlidingWindowLimiter {
    fn attempt_access(&self, cost: u32, tenant_ids: &[&str]) -> bool {
        let mut seen: Vec<&str> = Vec::with_capacity(tenant_ids.len());
        let mut allowed = true;

        for &id in tenant_ids {
            if seen.contains(&id) {
                continue;
            }
            seen.push(id);
            // every identifier is charged, even after one has been denied
            if !SlidingWindowLimiter::attempt_access(self, id, cost) {
                allowed = false;
            }
        }

        allowed && !seen.is_empty()
    }
}
