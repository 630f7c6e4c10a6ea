use thiserror::Error;

use crate::tenant::TenantId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackerError {
    #[error("stream limit reached for tenant {tenant_id}: {active} active (cap {cap})")]
    CapExceeded {
        tenant_id: TenantId,
        active: usize,
        cap: usize,
    },
    #[error("connection tracker is shutting down")]
    ShuttingDown,
}
