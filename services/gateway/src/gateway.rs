use std::sync::Arc;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::broker::{Broker, BrokerError, Record};
use crate::error::GatewayError;
use crate::guard::{Admission, QuotaGuard};
use crate::ledger::{Direction, Scope, ScopeClass, UsageReport};
use crate::stream::{SessionConfig, StreamSession};
use crate::tenant::TenantId;
use crate::tracker::{ActiveStream, ConnectionTracker};

pub const DEFAULT_MAX_PAYLOAD_BYTES: u64 = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayOptions {
    pub max_payload_bytes: u64,
    pub session: SessionConfig,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishMessage {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub topic: String,
    pub messages: u64,
    pub bytes: u64,
}

/// Entry point for the publish and stream paths. Cheap to clone; every clone
/// shares the same ledger, tracker and broker.
#[derive(Clone)]
pub struct Gateway {
    guard: QuotaGuard,
    tracker: ConnectionTracker,
    broker: Arc<dyn Broker>,
    options: GatewayOptions,
}

impl Gateway {
    pub fn new(
        guard: QuotaGuard,
        tracker: ConnectionTracker,
        broker: Arc<dyn Broker>,
        options: GatewayOptions,
    ) -> Self {
        Self {
            guard,
            tracker,
            broker,
            options,
        }
    }

    pub fn tracker(&self) -> &ConnectionTracker {
        &self.tracker
    }

    pub fn guard(&self) -> &QuotaGuard {
        &self.guard
    }

    pub fn options(&self) -> &GatewayOptions {
        &self.options
    }

    /// Creates the tenant topic. An existing topic is not an error.
    pub async fn provision_tenant(&self, tenant_id: &TenantId) -> Result<String, GatewayError> {
        let topic = tenant_id.topic_name();
        match self.broker.create_topic(&topic).await {
            Ok(()) => info!(%tenant_id, %topic, "tenant provisioned"),
            Err(BrokerError::TopicAlreadyExists(_)) => {
                debug!(%tenant_id, %topic, "tenant topic already exists")
            }
            Err(err) => return Err(err.into()),
        }
        Ok(topic)
    }

    /// Closes the tenant's live streams and deletes its topic.
    pub async fn deprovision_tenant(&self, tenant_id: &TenantId) -> Result<usize, GatewayError> {
        let closed = self.tracker.cancel_tenant(tenant_id);
        let topic = tenant_id.topic_name();
        match self.broker.delete_topic(&topic).await {
            Ok(()) | Err(BrokerError::TopicNotFound(_)) => {}
            Err(err) => return Err(err.into()),
        }

        info!(%tenant_id, %topic, closed_streams = closed, "tenant deprovisioned");
        Ok(closed)
    }

    /// Validates, admits inbound usage for the whole batch, then produces.
    /// A produce failure refunds the admission.
    pub async fn publish(
        &self,
        tenant_id: &TenantId,
        messages: Vec<PublishMessage>,
    ) -> Result<PublishReceipt, GatewayError> {
        let records = self.validate(messages)?;
        let count = records.len() as u64;
        let bytes = records.iter().map(|record| record.size_bytes).sum::<u64>();

        let receipt = match self.guard.admit(tenant_id, Direction::In, count, bytes)? {
            Admission::Admitted(receipt) => receipt,
            Admission::Rejected(rejection) => {
                info!(
                    %tenant_id,
                    scope = %rejection.scope,
                    resource = %rejection.denial.resource,
                    requested = count,
                    "publish rejected by quota"
                );
                return Err(rejection.into());
            }
        };

        let topic = tenant_id.topic_name();
        if let Err(err) = self.broker.produce(&topic, records).await {
            warn!(%tenant_id, %topic, error = %err, "produce failed");
            if let Err(refund_err) = self.guard.refund(&receipt) {
                error!(%tenant_id, error = %refund_err, "failed to refund publish admission");
            }
            return Err(err.into());
        }

        debug!(%tenant_id, %topic, messages = count, bytes, "published");
        Ok(PublishReceipt {
            topic,
            messages: count,
            bytes,
        })
    }

    fn validate(&self, messages: Vec<PublishMessage>) -> Result<Vec<Record>, GatewayError> {
        if messages.is_empty() {
            return Err(GatewayError::InvalidPayload(
                "messages must not be empty".to_string(),
            ));
        }

        let limit = self.options.max_payload_bytes;
        messages
            .into_iter()
            .enumerate()
            .map(|(index, message)| {
                if message.value.is_null() {
                    return Err(GatewayError::InvalidPayload(format!(
                        "message {index} has no value"
                    )));
                }
                let record = Record::new(message.key, message.value)?;
                if record.size_bytes > limit {
                    return Err(GatewayError::PayloadTooLarge {
                        index,
                        size: record.size_bytes,
                        limit,
                    });
                }
                Ok(record)
            })
            .collect()
    }

    /// Takes a stream slot for the tenant. The returned session subscribes on
    /// its first event.
    pub fn open_stream(&self, tenant_id: &TenantId) -> Result<StreamSession, GatewayError> {
        let topic = tenant_id.topic_name();
        let lease = self.tracker.acquire(tenant_id, &topic).map_err(|err| {
            info!(%tenant_id, error = %err, "stream rejected");
            GatewayError::from(err)
        })?;

        Ok(StreamSession::new(
            lease,
            topic,
            Arc::clone(&self.broker),
            self.guard.clone(),
            self.options.session,
        ))
    }

    pub fn usage(&self, tenant_id: &TenantId, day: NaiveDate) -> Result<UsageReport, GatewayError> {
        self.report(Scope::Tenant(tenant_id.clone()), day)
    }

    pub fn global_usage(&self, day: NaiveDate) -> Result<UsageReport, GatewayError> {
        self.report(Scope::Global, day)
    }

    fn report(&self, scope: Scope, day: NaiveDate) -> Result<UsageReport, GatewayError> {
        let ledger = self.guard.ledger();
        let counter = ledger.usage(&scope, day)?;
        let class: ScopeClass = scope.class();
        Ok(UsageReport::build(
            scope.scope_id(),
            class,
            day,
            &counter,
            ledger.limits(),
        ))
    }

    pub fn active_streams(&self) -> Vec<ActiveStream> {
        self.tracker.list_active()
    }

    /// Signals one stream to close; its session releases the slot.
    pub fn close_stream(&self, tenant_id: &TenantId, connection_id: Uuid) -> bool {
        let found = self.tracker.cancel(tenant_id, connection_id);
        if found {
            info!(%tenant_id, %connection_id, "stream force-closed");
        }
        found
    }
}
