use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::ledger::ScopeClass;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Admitted,
    Polling,
    Emitting,
    Throttled,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum CloseReason {
    QuotaExceeded { scope: ScopeClass },
    UpstreamUnavailable,
    Cancelled,
    InternalError,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::QuotaExceeded { .. } => "quota_exceeded",
            CloseReason::UpstreamUnavailable => "upstream_unavailable",
            CloseReason::Cancelled => "cancelled",
            CloseReason::InternalError => "internal_error",
        }
    }

    pub fn scope(&self) -> Option<ScopeClass> {
        match self {
            CloseReason::QuotaExceeded { scope } => Some(*scope),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Connected { connection_id: Uuid },
    Message { value: Value, timestamp: DateTime<Utc> },
    Heartbeat { timestamp: DateTime<Utc> },
    /// Always the last event of a session.
    Closed { reason: CloseReason },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Closed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_serializes_with_scope() {
        let reason = CloseReason::QuotaExceeded {
            scope: ScopeClass::Tenant,
        };
        assert_eq!(
            serde_json::to_value(reason).unwrap(),
            serde_json::json!({"reason": "quota_exceeded", "scope": "tenant"})
        );
        assert_eq!(
            serde_json::to_value(CloseReason::Cancelled).unwrap(),
            serde_json::json!({"reason": "cancelled"})
        );
    }
}
