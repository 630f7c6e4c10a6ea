use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::tenant::TenantId;

use super::error::TrackerError;
use super::lease::{now_millis, Lease};

pub const DEFAULT_MAX_STREAMS_PER_TENANT: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveStream {
    pub tenant_id: TenantId,
    pub connection_id: Uuid,
    pub topic: String,
    pub started_at: DateTime<Utc>,
}

struct StreamEntry {
    info: ActiveStream,
    cancel: CancellationToken,
    last_seen: Arc<AtomicI64>,
}

pub(crate) struct TrackerInner {
    streams: DashMap<TenantId, HashMap<Uuid, StreamEntry>>,
    max_per_tenant: usize,
    shutdown: CancellationToken,
}

impl TrackerInner {
    pub(super) fn remove(&self, tenant_id: &TenantId, connection_id: Uuid) -> bool {
        self.evict(tenant_id, connection_id).is_some()
    }

    fn evict(&self, tenant_id: &TenantId, connection_id: Uuid) -> Option<StreamEntry> {
        let removed = self
            .streams
            .get_mut(tenant_id)
            .and_then(|mut streams| streams.remove(&connection_id));
        self.streams
            .remove_if(tenant_id, |_, streams| streams.is_empty());
        removed
    }
}

/// Registry of live streaming sessions, sharded by tenant.
///
/// The per-tenant map is only locked for the duration of an acquire, release
/// or lookup; sessions hold a [`Lease`] by value while they poll and emit.
#[derive(Clone)]
pub struct ConnectionTracker {
    inner: Arc<TrackerInner>,
}

impl ConnectionTracker {
    pub fn new(max_per_tenant: usize) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                streams: DashMap::new(),
                max_per_tenant,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn max_per_tenant(&self) -> usize {
        self.inner.max_per_tenant
    }

    pub fn acquire(&self, tenant_id: &TenantId, topic: &str) -> Result<Lease, TrackerError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(TrackerError::ShuttingDown);
        }

        let cap = self.inner.max_per_tenant;
        let mut streams = self.inner.streams.entry(tenant_id.clone()).or_default();
        let active = streams.len();
        if active >= cap {
            return Err(TrackerError::CapExceeded {
                tenant_id: tenant_id.clone(),
                active,
                cap,
            });
        }

        let connection_id = Uuid::new_v4();
        let cancel = self.inner.shutdown.child_token();
        let last_seen = Arc::new(AtomicI64::new(now_millis()));
        let info = ActiveStream {
            tenant_id: tenant_id.clone(),
            connection_id,
            topic: topic.to_string(),
            started_at: Utc::now(),
        };

        streams.insert(
            connection_id,
            StreamEntry {
                info,
                cancel: cancel.clone(),
                last_seen: Arc::clone(&last_seen),
            },
        );
        drop(streams);

        debug!(
            %tenant_id,
            %connection_id,
            active = active + 1,
            cap,
            "stream lease acquired"
        );

        Ok(Lease {
            tracker: Arc::downgrade(&self.inner),
            tenant_id: tenant_id.clone(),
            connection_id,
            cancel,
            last_seen,
            released: AtomicBool::new(false),
        })
    }

    /// Idempotent; equivalent to [`Lease::release`].
    pub fn release(&self, lease: &Lease) -> bool {
        lease.release()
    }

    pub fn active_count(&self, tenant_id: &TenantId) -> usize {
        self.inner
            .streams
            .get(tenant_id)
            .map(|streams| streams.len())
            .unwrap_or(0)
    }

    pub fn total_active(&self) -> usize {
        self.inner
            .streams
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    /// Snapshot of every live stream, oldest first.
    pub fn list_active(&self) -> Vec<ActiveStream> {
        let mut active: Vec<ActiveStream> = self
            .inner
            .streams
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .values()
                    .map(|stream| stream.info.clone())
                    .collect::<Vec<_>>()
            })
            .collect();

        active.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        active
    }

    /// Signals one session to close. The session releases its own lease.
    pub fn cancel(&self, tenant_id: &TenantId, connection_id: Uuid) -> bool {
        let Some(streams) = self.inner.streams.get(tenant_id) else {
            return false;
        };

        match streams.get(&connection_id) {
            Some(stream) => {
                stream.cancel.cancel();
                info!(%tenant_id, %connection_id, "stream cancellation requested");
                true
            }
            None => false,
        }
    }

    pub fn cancel_tenant(&self, tenant_id: &TenantId) -> usize {
        let Some(streams) = self.inner.streams.get(tenant_id) else {
            return 0;
        };

        for stream in streams.values() {
            stream.cancel.cancel();
        }
        let cancelled = streams.len();
        if cancelled > 0 {
            info!(%tenant_id, cancelled, "cancelled tenant streams");
        }
        cancelled
    }

    /// Cancels every session and refuses further acquires.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!(active = self.total_active(), "connection tracker shutting down");
        }
        self.inner.shutdown.cancel();
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Removes and cancels every entry whose lease was not touched within
    /// `stale_after`. Covers sessions whose transport stopped pulling events
    /// without the stream ever being dropped.
    pub fn evict_stale(&self, stale_after: Duration) -> usize {
        let window = i64::try_from(stale_after.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(window);

        let stale: Vec<(TenantId, Uuid)> = self
            .inner
            .streams
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .iter()
                    .filter(|(_, stream)| stream.last_seen.load(Ordering::Relaxed) < cutoff)
                    .map(|(connection_id, _)| (entry.key().clone(), *connection_id))
                    .collect::<Vec<_>>()
            })
            .collect();

        let mut evicted = 0usize;
        for (tenant_id, connection_id) in stale {
            if let Some(stream) = self.inner.evict(&tenant_id, connection_id) {
                stream.cancel.cancel();
                warn!(
                    %tenant_id,
                    %connection_id,
                    topic = %stream.info.topic,
                    started_at = %stream.info.started_at,
                    "evicted stale stream"
                );
                evicted += 1;
            }
        }
        evicted
    }

    pub fn start_watchdog(&self, every: Duration, stale_after: Duration) -> JoinHandle<()> {
        let tracker = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = tracker.inner.shutdown.cancelled() => {
                        debug!("stream watchdog stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let evicted = tracker.evict_stale(stale_after);
                        if evicted > 0 {
                            info!(evicted, "stream watchdog evicted stale leases");
                        }
                    }
                }
            }
        })
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_STREAMS_PER_TENANT)
    }
}
