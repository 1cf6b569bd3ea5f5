//! Tenant limit lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{MeshLimitError, Result};

/// Refill rate (units per second) and maximum burst for one tenant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TenantLimit {
    pub rate: f64,
    pub burst: f64,
}

impl TenantLimit {
    pub fn new(rate: f64, burst: f64) -> Result<Self> {
        let limit = Self { rate, burst };
        limit.validate()?;
        Ok(limit)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.rate.is_finite() && self.rate > 0.0) {
            return Err(MeshLimitError::InvalidLimit(format!(
                "rate must be positive and finite, got {}",
                self.rate
            )));
        }
        if !(self.burst.is_finite() && self.burst > 0.0) {
            return Err(MeshLimitError::InvalidLimit(format!(
                "burst must be positive and finite, got {}",
                self.burst
            )));
        }
        Ok(())
    }
}

/// Maps a tenant identifier to its limit.
///
/// `None` means the identifier is not rate limited and takes no part in an
/// admission decision.
pub trait TenancyResolver: Send + Sync {
    fn resolve(&self, tenant_id: &str) -> Option<TenantLimit>;
}

impl<F> TenancyResolver for F
where
    F: Fn(&str) -> Option<TenantLimit> + Send + Sync,
{
    fn resolve(&self, tenant_id: &str) -> Option<TenantLimit> {
        self(tenant_id)
    }
}

/// Limits taken from configuration: exact per-tenant overrides, falling back
/// to an optional default.
#[derive(Debug, Clone, Default)]
pub struct StaticTenancy {
    default: Option<TenantLimit>,
    overrides: HashMap<String, TenantLimit>,
}

impl StaticTenancy {
    pub fn new(default: Option<TenantLimit>, overrides: HashMap<String, TenantLimit>) -> Self {
        Self { default, overrides }
    }

    /// Every tenant gets the same limit.
    pub fn uniform(limit: TenantLimit) -> Self {
        Self::new(Some(limit), HashMap::new())
    }
}

impl TenancyResolver for StaticTenancy {
    fn resolve(&self, tenant_id: &str) -> Option<TenantLimit> {
        self.overrides.get(tenant_id).copied().or(self.default)
    }
}
