use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::tenant::TenantId;

use super::connections::TrackerInner;

/// One admitted stream slot. Returned to the tracker exactly once: by an
/// explicit [`Lease::release`] or, failing that, when the lease is dropped.
pub struct Lease {
    pub(super) tracker: Weak<TrackerInner>,
    pub(super) tenant_id: TenantId,
    pub(super) connection_id: Uuid,
    pub(super) cancel: CancellationToken,
    pub(super) last_seen: Arc<AtomicI64>,
    pub(super) released: AtomicBool,
}

impl Lease {
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    /// Fires on admin force-close, watchdog eviction or tracker shutdown.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Liveness stamp read by the tracker watchdog.
    pub fn touch(&self) {
        self.last_seen.store(now_millis(), Ordering::Relaxed);
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Returns `true` only for the call that actually released the slot.
    pub fn release(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        if let Some(inner) = self.tracker.upgrade() {
            inner.remove(&self.tenant_id, self.connection_id);
        }

        debug!(
            tenant_id = %self.tenant_id,
            connection_id = %self.connection_id,
            "stream lease released"
        );
        true
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("tenant_id", &self.tenant_id)
            .field("connection_id", &self.connection_id)
            .field("released", &self.is_released())
            .finish()
    }
}

pub(super) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
