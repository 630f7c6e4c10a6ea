use serde::{Deserialize, Serialize};

use super::counter::{Direction, ScopeClass};

pub const FREE_TIER_MESSAGES_LIMIT: u64 = 10_000;
pub const FREE_TIER_BYTES_LIMIT: u64 = 100 * 1024 * 1024;
pub const GLOBAL_MESSAGES_LIMIT: u64 = 200_000;
pub const GLOBAL_BYTES_LIMIT: u64 = 2_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimit {
    pub messages_per_day: u64,
    pub bytes_per_day: u64,
}

impl QuotaLimit {
    pub fn new(messages_per_day: u64, bytes_per_day: u64) -> Self {
        Self {
            messages_per_day,
            bytes_per_day,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionalLimits {
    pub inbound: QuotaLimit,
    pub outbound: QuotaLimit,
}

impl DirectionalLimits {
    /// Same ceiling for publish and delivery.
    pub fn symmetric(limit: QuotaLimit) -> Self {
        Self {
            inbound: limit,
            outbound: limit,
        }
    }

    pub fn get(&self, direction: Direction) -> QuotaLimit {
        match direction {
            Direction::In => self.inbound,
            Direction::Out => self.outbound,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitSet {
    pub tenant: DirectionalLimits,
    pub global: DirectionalLimits,
}

impl LimitSet {
    pub fn new(tenant: QuotaLimit, global: QuotaLimit) -> Self {
        Self {
            tenant: DirectionalLimits::symmetric(tenant),
            global: DirectionalLimits::symmetric(global),
        }
    }

    pub fn for_scope(&self, class: ScopeClass, direction: Direction) -> QuotaLimit {
        match class {
            ScopeClass::Tenant => self.tenant.get(direction),
            ScopeClass::Global => self.global.get(direction),
        }
    }
}

impl Default for LimitSet {
    fn default() -> Self {
        Self::new(
            QuotaLimit::new(FREE_TIER_MESSAGES_LIMIT, FREE_TIER_BYTES_LIMIT),
            QuotaLimit::new(GLOBAL_MESSAGES_LIMIT, GLOBAL_BYTES_LIMIT),
        )
    }
}
