use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::stream::{self, Stream};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::broker::{Broker, Record, TopicCursor};
use crate::guard::{Admission, AdmissionReceipt, QuotaGuard};
use crate::ledger::Direction;
use crate::tracker::Lease;

use super::event::{CloseReason, SessionState, StreamEvent};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_MAX_BATCH: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    pub max_batch: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }
}

/// One admitted streaming connection.
///
/// Events are produced lazily by [`StreamSession::next_event`]: nothing is
/// polled from the broker until the transport asks for the next event. Every
/// batch is charged against the tenant and global outbound quota before any of
/// its records are emitted; whatever part of it is still unsent when the
/// session closes or is dropped is refunded. The lease is returned to the tracker exactly once
/// when the session reaches [`SessionState::Closed`], or on drop.
pub struct StreamSession {
    lease: Lease,
    topic: String,
    broker: Arc<dyn Broker>,
    guard: QuotaGuard,
    config: SessionConfig,
    state: SessionState,
    cursor: Option<Box<dyn TopicCursor>>,
    pending: VecDeque<Record>,
    unsent: Option<AdmissionReceipt>,
    last_heartbeat: Instant,
    delivered: u64,
}

impl StreamSession {
    pub fn new(
        lease: Lease,
        topic: impl Into<String>,
        broker: Arc<dyn Broker>,
        guard: QuotaGuard,
        config: SessionConfig,
    ) -> Self {
        Self {
            lease,
            topic: topic.into(),
            broker,
            guard,
            config,
            state: SessionState::Admitted,
            cursor: None,
            pending: VecDeque::new(),
            unsent: None,
            last_heartbeat: Instant::now(),
            delivered: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn lease(&self) -> &Lease {
        &self.lease
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Messages emitted so far.
    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    /// `None` once the terminal [`StreamEvent::Closed`] has been returned.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        let event = self.step().await;
        if event.is_some() {
            self.lease.touch();
        }
        event
    }

    pub fn into_stream(self) -> impl Stream<Item = StreamEvent> + Send {
        stream::unfold(self, |mut session| async move {
            let event = session.next_event().await?;
            Some((event, session))
        })
    }

    async fn step(&mut self) -> Option<StreamEvent> {
        loop {
            if self.state == SessionState::Closed {
                return None;
            }

            if self.lease.cancellation().is_cancelled() {
                return Some(self.close(CloseReason::Cancelled));
            }

            match self.state {
                SessionState::Admitted => return Some(self.open().await),
                SessionState::Emitting => match self.pending.pop_front() {
                    Some(record) => {
                        self.delivered += 1;
                        self.mark_sent(&record);
                        return Some(StreamEvent::Message {
                            value: record.value,
                            timestamp: Utc::now(),
                        });
                    }
                    None => self.state = SessionState::Polling,
                },
                SessionState::Polling => {
                    if let Some(event) = self.poll_once().await {
                        return Some(event);
                    }
                }
                SessionState::Throttled | SessionState::Closed => {
                    return Some(self.close(CloseReason::InternalError));
                }
            }
        }
    }

    async fn open(&mut self) -> StreamEvent {
        match self.broker.subscribe(&self.topic).await {
            Ok(cursor) => {
                self.cursor = Some(cursor);
                self.state = SessionState::Polling;
                self.last_heartbeat = Instant::now();
                info!(
                    tenant_id = %self.lease.tenant_id(),
                    connection_id = %self.lease.connection_id(),
                    topic = %self.topic,
                    "stream opened"
                );
                StreamEvent::Connected {
                    connection_id: self.lease.connection_id(),
                }
            }
            Err(err) => {
                warn!(topic = %self.topic, error = %err, "subscribe failed");
                self.close(CloseReason::UpstreamUnavailable)
            }
        }
    }

    /// One wait on the cursor, bounded by the poll interval and the next
    /// heartbeat deadline. `None` means nothing to emit yet.
    async fn poll_once(&mut self) -> Option<StreamEvent> {
        let since_heartbeat = self.last_heartbeat.elapsed();
        if since_heartbeat >= self.config.heartbeat_interval {
            self.last_heartbeat = Instant::now();
            return Some(StreamEvent::Heartbeat {
                timestamp: Utc::now(),
            });
        }

        let wait = self
            .config
            .poll_interval
            .min(self.config.heartbeat_interval - since_heartbeat);
        let cancel = self.lease.cancellation().clone();
        let max_batch = self.config.max_batch;

        let Some(cursor) = self.cursor.as_mut() else {
            return Some(self.close(CloseReason::InternalError));
        };

        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = cursor.poll(max_batch, wait) => Some(result),
        };

        match polled {
            None => Some(self.close(CloseReason::Cancelled)),
            Some(Err(err)) => {
                warn!(
                    tenant_id = %self.lease.tenant_id(),
                    connection_id = %self.lease.connection_id(),
                    error = %err,
                    "broker poll failed"
                );
                Some(self.close(CloseReason::UpstreamUnavailable))
            }
            Some(Ok(batch)) if batch.is_empty() => None,
            Some(Ok(batch)) => self.admit_batch(batch),
        }
    }

    /// The whole batch is admitted or the session is throttled. A denied
    /// batch is not re-delivered: the cursor has already moved past it.
    fn admit_batch(&mut self, batch: Vec<Record>) -> Option<StreamEvent> {
        self.state = SessionState::Emitting;
        let messages = batch.len() as u64;
        let bytes = batch.iter().map(|record| record.size_bytes).sum::<u64>();

        match self
            .guard
            .admit(self.lease.tenant_id(), Direction::Out, messages, bytes)
        {
            Ok(Admission::Admitted(receipt)) => {
                debug!(
                    tenant_id = %self.lease.tenant_id(),
                    messages,
                    bytes,
                    "outbound batch admitted"
                );
                self.pending.extend(batch);
                self.unsent = Some(receipt);
                None
            }
            Ok(Admission::Rejected(rejection)) => {
                self.state = SessionState::Throttled;
                info!(
                    tenant_id = %self.lease.tenant_id(),
                    connection_id = %self.lease.connection_id(),
                    scope = %rejection.scope,
                    resource = %rejection.denial.resource,
                    dropped = messages,
                    "stream throttled"
                );
                Some(self.close(CloseReason::QuotaExceeded {
                    scope: rejection.scope,
                }))
            }
            Err(err) => {
                error!(
                    tenant_id = %self.lease.tenant_id(),
                    error = %err,
                    "outbound quota check failed"
                );
                Some(self.close(CloseReason::InternalError))
            }
        }
    }

    fn mark_sent(&mut self, record: &Record) {
        if let Some(receipt) = self.unsent.as_mut() {
            receipt.messages = receipt.messages.saturating_sub(1);
            receipt.bytes = receipt.bytes.saturating_sub(record.size_bytes);
            if receipt.messages == 0 {
                self.unsent = None;
            }
        }
    }

    fn refund_unsent(&mut self) {
        let Some(receipt) = self.unsent.take() else {
            return;
        };
        match self.guard.refund(&receipt) {
            Ok(()) => debug!(
                tenant_id = %receipt.tenant_id,
                messages = receipt.messages,
                bytes = receipt.bytes,
                "refunded unsent outbound messages"
            ),
            Err(err) => error!(
                tenant_id = %receipt.tenant_id,
                messages = receipt.messages,
                error = %err,
                "failed to refund unsent outbound messages"
            ),
        }
    }

    fn close(&mut self, reason: CloseReason) -> StreamEvent {
        self.state = SessionState::Closed;
        self.refund_unsent();
        self.pending.clear();
        self.cursor = None;
        self.lease.release();

        info!(
            tenant_id = %self.lease.tenant_id(),
            connection_id = %self.lease.connection_id(),
            %reason,
            delivered = self.delivered,
            "stream closed"
        );
        StreamEvent::Closed { reason }
    }
}

impl Drop for StreamSession {
    fn drop(&mut self) {
        self.refund_unsent();
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("lease", &self.lease)
            .field("topic", &self.topic)
            .field("state", &self.state)
            .field("delivered", &self.delivered)
            .finish()
    }
}
