use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::PublishMessage;
use crate::tracker::ActiveStream;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishRequest {
    pub messages: Vec<PublishMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResponse {
    pub success: bool,
    pub topic: String,
    pub messages: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicResponse {
    pub tenant_id: String,
    pub topic: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_streams: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageQuery {
    pub date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveStreamsResponse {
    pub total: usize,
    pub tenants: BTreeMap<String, Vec<ActiveStream>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloseStreamResponse {
    pub closed: bool,
}

/// `data:` payload of one delivered message on the event stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamMessagePayload {
    pub value: Value,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    pub details: Option<Value>,
}
