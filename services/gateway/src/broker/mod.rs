//! Message broker contracts consumed by the gateway.
//!
//! The gateway only needs three primitives: topic administration, produce,
//! and a per-connection cursor that can be polled with a timeout. Storage,
//! replication and delivery guarantees belong to the implementation.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use memory::InMemoryBroker;

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("topic {0} already exists")]
    TopicAlreadyExists(String),
    #[error("topic {0} not found")]
    TopicNotFound(String),
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// A single message with the byte size used for quota accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub key: Option<String>,
    pub value: Value,
    pub size_bytes: u64,
}

impl Record {
    /// Size is the length of the compact JSON encoding of `value`.
    pub fn new(key: Option<String>, value: Value) -> Result<Self, BrokerError> {
        let size_bytes = serde_json::to_vec(&value)?.len() as u64;
        Ok(Self {
            key,
            value,
            size_bytes,
        })
    }
}

#[async_trait]
pub trait TopicAdmin: Send + Sync {
    async fn create_topic(&self, name: &str) -> Result<(), BrokerError>;
    async fn delete_topic(&self, name: &str) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Producer: Send + Sync {
    async fn produce(&self, topic: &str, records: Vec<Record>) -> Result<(), BrokerError>;
}

#[async_trait]
pub trait Consumer: Send + Sync {
    /// Opens a cursor positioned at the current end of `topic`.
    async fn subscribe(&self, topic: &str) -> Result<Box<dyn TopicCursor>, BrokerError>;
}

#[async_trait]
pub trait TopicCursor: Send {
    /// Waits up to `timeout` for records; returns an empty batch on timeout.
    /// The cursor advances past everything it returns.
    async fn poll(
        &mut self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<Record>, BrokerError>;
}

pub trait Broker: TopicAdmin + Producer + Consumer {}

impl<T: TopicAdmin + Producer + Consumer> Broker for T {}
