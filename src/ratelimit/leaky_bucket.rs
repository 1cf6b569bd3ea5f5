//! Leaky bucket rate limiter.
//!
//! Each tenant holds a bucket of capacity that refills continuously at its
//! configured rate up to its burst. Spent capacity is also tallied per tenant
//! so it can be propagated to peer replicas (see [`crate::mesh`]).

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::backend::RateLimiterBackend;
use super::tenancy::{TenancyResolver, TenantLimit};
use crate::cache::GuardedCache;
use crate::clock::{elapsed_between, Clock};

/// Tenant id to available capacity, as reported by a replica.
pub type CapacityBook = HashMap<String, f64>;

/// Tenant id to capacity spent since the previous sync tick.
pub type SyncDelta = HashMap<String, u64>;

/// Mutable per-tenant bucket state.
pub struct LeakyBucketControlBlock {
    state: Mutex<BucketState>,
}

struct BucketState {
    /// Never above burst. Goes negative when peers report spend this
    /// replica never saw.
    available: f64,
    last_access: DateTime<Utc>,
    spent_since_sync: u64,
}

impl LeakyBucketControlBlock {
    fn new(available: f64, now: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(BucketState {
                available,
                last_access: now,
                spent_since_sync: 0,
            }),
        }
    }

    fn access_attempt(&self, limit: &TenantLimit, now: DateTime<Utc>, cost: u32) -> bool {
        let mut state = self.state.lock();

        let elapsed = elapsed_between(state.last_access, now);
        state.available = (state.available + limit.rate * elapsed.as_secs_f64()).min(limit.burst);
        state.last_access = now;

        let cost_f = f64::from(cost);
        let allowed = cost_f <= state.available;
        if allowed {
            state.available -= cost_f;
            state.spent_since_sync = state.spent_since_sync.saturating_add(u64::from(cost));
        }

        allowed
    }

    /// Subtract spend reported by a peer. Refill timing is left alone.
    fn debit(&self, spent: u64) {
        self.state.lock().available -= spent as f64;
    }

    fn take_spent(&self) -> u64 {
        std::mem::take(&mut self.state.lock().spent_since_sync)
    }

    fn available(&self) -> f64 {
        self.state.lock().available
    }

    /// Whether the bucket would still be short of a full burst at `now`.
    fn would_be_limited(&self, limit: &TenantLimit, now: DateTime<Utc>) -> bool {
        let state = self.state.lock();
        let elapsed = elapsed_between(state.last_access, now);
        state.available + limit.rate * elapsed.as_secs_f64() < limit.burst
    }
}

/// Per-tenant leaky bucket limiter over a bounded cache.
pub struct LeakyBucketLimiter {
    cache: GuardedCache<String, LeakyBucketControlBlock>,
    clock: Arc<dyn Clock>,
    tenancy: Arc<dyn TenancyResolver>,
    limited_evictions: AtomicU64,
}

impl LeakyBucketLimiter {
    pub fn new(
        tenant_capacity: NonZeroUsize,
        tenancy: Arc<dyn TenancyResolver>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache: GuardedCache::new(tenant_capacity),
            clock,
            tenancy,
            limited_evictions: AtomicU64::new(0),
        }
    }

    /// Charge `cost` to every identifier attached to one request.
    ///
    /// Identifiers without a configured limit are ignored; if none remain
    /// the request is denied. Each identifier with enough capacity is
    /// debited even when another identifier denies the request. Repeated
    /// identifiers are charged once.
    pub fn attempt_access(&self, cost: u32, tenant_ids: &[&str]) -> bool {
        let tenancies: HashMap<&str, TenantLimit> = tenant_ids
            .iter()
            .filter_map(|&id| self.tenancy.resolve(id).map(|limit| (id, limit)))
            .collect();

        if tenancies.is_empty() {
            debug!(ids = ?tenant_ids, "No rate limited identity on request, denying");
            return false;
        }

        let now = self.clock.now();
        let mut allowed = true;

        for (id, limit) in &tenancies {
            let block = self.block_for(id, limit, now);
            // all identities get tested
            if !block.access_attempt(limit, now, cost) {
                trace!(tenant = %id, cost, "Leaky bucket exhausted");
                allowed = false;
            }
        }

        allowed
    }

    /// Every cached tenant's raw available capacity.
    pub fn capacity_book(&self) -> CapacityBook {
        self.cache
            .snapshot()
            .into_iter()
            .map(|(id, block)| {
                let available = block.available();
                (id, available)
            })
            .collect()
    }

    /// Overwrite `tenant_id`'s bucket with `capacity` reported by a peer.
    ///
    /// The capacity is clamped to the tenant's burst when it has a limit.
    pub fn prime(&self, tenant_id: &str, capacity: f64) {
        let now = self.clock.now();
        let capacity = match self.tenancy.resolve(tenant_id) {
            Some(limit) => capacity.min(limit.burst),
            None => capacity,
        };

        let block = Arc::new(LeakyBucketControlBlock::new(capacity, now));
        if let Some(displaced) = self.cache.put(tenant_id.to_string(), block) {
            if displaced.0 != tenant_id {
                self.note_eviction(displaced, now);
            }
        }
    }

    /// Apply capacity a peer reports `tenant_id` spent there.
    ///
    /// Unknown tenants start from a full bucket. Returns `false` when the
    /// tenant has no limit here.
    pub fn debit(&self, tenant_id: &str, spent: u64) -> bool {
        let Some(limit) = self.tenancy.resolve(tenant_id) else {
            return false;
        };
        let now = self.clock.now();
        self.block_for(tenant_id, &limit, now).debit(spent);
        true
    }

    /// Read and zero every tenant's spend since the previous call.
    ///
    /// Tenants with nothing spent are left out.
    pub fn drain_spent(&self) -> SyncDelta {
        // cache lock is released before any bucket lock is taken
        self.cache
            .snapshot()
            .into_iter()
            .filter_map(|(id, block)| {
                let spent = block.take_spent();
                (spent > 0).then_some((id, spent))
            })
            .collect()
    }

    /// Available capacity without refilling or touching recency.
    pub fn available_capacity(&self, tenant_id: &str) -> Option<f64> {
        self.cache.peek(tenant_id).map(|block| block.available())
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Number of tenants evicted before their bucket refilled.
    pub fn limited_evictions(&self) -> u64 {
        self.limited_evictions.load(Ordering::Relaxed)
    }

    pub fn tenant_count(&self) -> usize {
        self.cache.len()
    }

    fn block_for(&self, tenant_id: &str, limit: &TenantLimit, now: DateTime<Utc>) -> Arc<LeakyBucketControlBlock> {
        let (block, evicted) = self
            .cache
            .get_or_insert_with(tenant_id, || LeakyBucketControlBlock::new(limit.burst, now));
        if let Some(evicted) = evicted {
            self.note_eviction(evicted, now);
        }
        block
    }

    fn note_eviction(&self, (tenant_id, block): (String, Arc<LeakyBucketControlBlock>), now: DateTime<Utc>) {
        let limited = self
            .tenancy
            .resolve(&tenant_id)
            .is_some_and(|limit| block.would_be_limited(&limit, now));

        if limited {
            self.limited_evictions.fetch_add(1, Ordering::Relaxed);
            warn!(
                tenant = %tenant_id,
                capacity = self.cache.capacity(),
                "Evicted a tenant whose bucket had not refilled; tenant capacity is undersized"
            );
        }
    }
}

impl RateLimiterBackend for LeakyBucketLimiter {
    fn attempt_access(&self, cost: u32, tenant_ids: &[&str]) -> bool {
        LeakyBucketLimiter::attempt_access(self, cost, tenant_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::ratelimit::StaticTenancy;
    use chrono::TimeZone;
    use std::thread;
    use std::time::Duration;

    const UNIFORM: TenantLimit = TenantLimit { rate: 100.0, burst: 100.0 };

    fn limiter(capacity: usize) -> (LeakyBucketLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2000, 3, 12, 10, 10, 10).unwrap()));
        let limiter = LeakyBucketLimiter::new(
            NonZeroUsize::new(capacity).unwrap(),
            Arc::new(StaticTenancy::uniform(UNIFORM)),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_burst_then_refill() {
        let (limiter, clock) = limiter(4);

        for i in 0..100 {
            assert!(limiter.attempt_access(1, &["10.0.0.1"]), "access {} should pass", i);
        }
        assert!(!limiter.attempt_access(1, &["10.0.0.1"]));

        // 10ms at 100/s refills exactly one unit
        clock.advance(Duration::from_millis(10));
        assert!(limiter.attempt_access(1, &["10.0.0.1"]));
        assert!(!limiter.attempt_access(1, &["10.0.0.1"]));
    }

    #[test]
    fn test_capacity_never_exceeds_burst() {
        let (limiter, clock) = limiter(4);
        limiter.attempt_access(30, &["tenant"]);

        clock.advance(Duration::from_secs(3600));
        limiter.attempt_access(0, &["tenant"]);

        assert_eq!(limiter.available_capacity("tenant"), Some(100.0));
    }

    #[test]
    fn test_denied_access_is_not_debited() {
        let (limiter, _clock) = limiter(4);
        assert!(limiter.attempt_access(60, &["tenant"]));
        assert!(!limiter.attempt_access(60, &["tenant"]));

        assert_eq!(limiter.available_capacity("tenant"), Some(40.0));
        assert_eq!(limiter.drain_spent().get("tenant"), Some(&60));
    }

    #[test]
    fn test_unknown_identities_are_denied() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let tenancy = |id: &str| (id == "limited").then_some(UNIFORM);
        let limiter = LeakyBucketLimiter::new(NonZeroUsize::new(4).unwrap(), Arc::new(tenancy), clock);

        assert!(!limiter.attempt_access(1, &[]));
        assert!(!limiter.attempt_access(1, &["unlimited"]));
        assert!(limiter.attempt_access(1, &["unlimited", "limited"]));
        assert_eq!(limiter.tenant_count(), 1);
    }

    #[test]
    fn test_every_identity_with_capacity_is_charged() {
        let (limiter, _clock) = limiter(4);
        assert!(limiter.attempt_access(95, &["account"]));

        // the account denies the request, the ip is still charged
        assert!(!limiter.attempt_access(10, &["ip", "account"]));
        assert_eq!(limiter.available_capacity("ip"), Some(90.0));
        assert_eq!(limiter.available_capacity("account"), Some(5.0));
    }

    #[test]
    fn test_duplicate_identities_charged_once() {
        let (limiter, _clock) = limiter(4);
        assert!(limiter.attempt_access(10, &["ip", "ip", "ip"]));
        assert_eq!(limiter.available_capacity("ip"), Some(90.0));
    }

    #[test]
    fn test_drain_spent_resets() {
        let (limiter, _clock) = limiter(4);
        limiter.attempt_access(5, &["a"]);
        limiter.attempt_access(7, &["b"]);

        let delta = limiter.drain_spent();
        assert_eq!(delta, SyncDelta::from([("a".to_string(), 5), ("b".to_string(), 7)]));
        assert!(limiter.drain_spent().is_empty());
    }

    #[test]
    fn test_debit_goes_negative_and_keeps_refill_clock() {
        let (limiter, clock) = limiter(4);
        limiter.attempt_access(100, &["tenant"]);
        assert!(limiter.debit("tenant", 50));
        assert_eq!(limiter.available_capacity("tenant"), Some(-50.0));

        // refill accrues from the last local access, not from the debit
        clock.advance(Duration::from_millis(510));
        assert!(limiter.attempt_access(1, &["tenant"]));
        // local spend only, peer debits are never re-broadcast
        assert_eq!(limiter.drain_spent().get("tenant"), Some(&101));
    }

    #[test]
    fn test_debit_unknown_tenant_starts_from_burst() {
        let (limiter, _clock) = limiter(4);
        assert!(limiter.debit("new", 30));
        assert_eq!(limiter.available_capacity("new"), Some(70.0));
    }

    #[test]
    fn test_prime_overwrites_and_clamps() {
        let (limiter, _clock) = limiter(4);
        limiter.attempt_access(1, &["tenant"]);

        limiter.prime("tenant", 5.0);
        assert_eq!(limiter.available_capacity("tenant"), Some(5.0));
        assert!(limiter.drain_spent().is_empty());

        limiter.prime("other", 1_000.0);
        assert_eq!(limiter.available_capacity("other"), Some(100.0));
    }

    #[test]
    fn test_capacity_book_lists_cached_tenants() {
        let (limiter, _clock) = limiter(4);
        limiter.attempt_access(10, &["a"]);
        limiter.attempt_access(20, &["b"]);

        let book = limiter.capacity_book();
        assert_eq!(book.len(), 2);
        assert_eq!(book["a"], 90.0);
        assert_eq!(book["b"], 80.0);
    }

    #[test]
    fn test_eviction_of_draining_bucket_is_counted() {
        let (limiter, clock) = limiter(1);
        limiter.attempt_access(50, &["a"]);
        limiter.attempt_access(1, &["b"]);
        assert_eq!(limiter.limited_evictions(), 1);

        // "b" has long since refilled
        clock.advance(Duration::from_secs(10));
        limiter.attempt_access(1, &["c"]);
        assert_eq!(limiter.limited_evictions(), 1);
    }

    #[test]
    fn test_parallel_tenants() {
        let (limiter, _clock) = limiter(64);
        let limiter = Arc::new(limiter);

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || {
                    let id = format!("tenant-{}", t % 4);
                    (0..100).filter(|_| limiter.attempt_access(1, &[id.as_str()])).count()
                })
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        // four tenants, one burst each, no refill on a frozen clock
        assert_eq!(admitted, 400);
        let spent: u64 = limiter.drain_spent().values().sum();
        assert_eq!(spent, 400);
    }
}
