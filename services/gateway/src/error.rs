use thiserror::Error;

use crate::broker::BrokerError;
use crate::guard::Rejection;
use crate::ledger::{Direction, LedgerError, Resource, ScopeClass};
use crate::tenant::{TenantError, TenantId};
use crate::tracker::TrackerError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{scope} {direction} quota exceeded for {resource}: {current} + {requested} > {limit}")]
    QuotaExceeded {
        scope: ScopeClass,
        direction: Direction,
        resource: Resource,
        limit: u64,
        current: u64,
        requested: u64,
    },

    #[error("maximum of {cap} concurrent streams reached for tenant {tenant_id} ({active} active)")]
    ConnectionCapExceeded {
        tenant_id: TenantId,
        active: usize,
        cap: usize,
    },

    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("message {index} is {size} bytes, limit is {limit}")]
    PayloadTooLarge { index: usize, size: u64, limit: u64 },

    #[error("topic {0} not found")]
    TopicNotFound(String),

    #[error(transparent)]
    InvalidTenant(#[from] TenantError),

    #[error("quota ledger unavailable: {0}")]
    Ledger(#[from] LedgerError),

    #[error("rate limit of {limit} requests per {period_secs}s exceeded, retry in {retry_after_secs}s")]
    RateLimited {
        limit: u32,
        period_secs: u64,
        retry_after_secs: u64,
    },

    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl GatewayError {
    /// Stable identifier used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::QuotaExceeded { .. } => "quota_exceeded",
            GatewayError::ConnectionCapExceeded { .. } => "connection_cap_exceeded",
            GatewayError::BrokerUnavailable(_) => "broker_unavailable",
            GatewayError::InvalidPayload(_) => "invalid_payload",
            GatewayError::PayloadTooLarge { .. } => "payload_too_large",
            GatewayError::TopicNotFound(_) => "topic_not_found",
            GatewayError::InvalidTenant(_) => "invalid_tenant_id",
            GatewayError::Ledger(_) => "ledger_unavailable",
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::ShuttingDown => "shutting_down",
        }
    }

    /// Whether the same request may succeed if retried shortly.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            GatewayError::BrokerUnavailable(_) | GatewayError::Ledger(_)
        )
    }
}

impl From<Rejection> for GatewayError {
    fn from(rejection: Rejection) -> Self {
        GatewayError::QuotaExceeded {
            scope: rejection.scope,
            direction: rejection.direction,
            resource: rejection.denial.resource,
            limit: rejection.denial.limit,
            current: rejection.denial.current,
            requested: rejection.denial.requested,
        }
    }
}

impl From<TrackerError> for GatewayError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::CapExceeded {
                tenant_id,
                active,
                cap,
            } => GatewayError::ConnectionCapExceeded {
                tenant_id,
                active,
                cap,
            },
            TrackerError::ShuttingDown => GatewayError::ShuttingDown,
        }
    }
}

impl From<BrokerError> for GatewayError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::TopicNotFound(topic) => GatewayError::TopicNotFound(topic),
            BrokerError::Encoding(err) => GatewayError::InvalidPayload(err.to_string()),
            other => GatewayError::BrokerUnavailable(other.to_string()),
        }
    }
}
