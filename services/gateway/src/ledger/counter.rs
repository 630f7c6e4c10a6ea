use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::tenant::TenantId;

use super::limits::QuotaLimit;

/// Traffic direction relative to the tenant topic: `In` is publish, `Out` is stream delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeClass {
    Tenant,
    Global,
}

impl ScopeClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeClass::Tenant => "tenant",
            ScopeClass::Global => "global",
        }
    }
}

impl fmt::Display for ScopeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scope {
    Tenant(TenantId),
    Global,
}

impl Scope {
    pub fn class(&self) -> ScopeClass {
        match self {
            Scope::Tenant(_) => ScopeClass::Tenant,
            Scope::Global => ScopeClass::Global,
        }
    }

    /// Stable storage identifier for the scope.
    pub fn scope_id(&self) -> String {
        match self {
            Scope::Tenant(tenant) => format!("tenant:{tenant}"),
            Scope::Global => "global".to_string(),
        }
    }

    pub fn key(&self, day: NaiveDate) -> CounterKey {
        CounterKey {
            scope_id: self.scope_id(),
            day,
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.scope_id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub scope_id: String,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Messages,
    Bytes,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Messages => f.write_str("messages"),
            Resource::Bytes => f.write_str("bytes"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageDelta {
    pub messages: u64,
    pub bytes: u64,
}

impl UsageDelta {
    pub fn new(messages: u64, bytes: u64) -> Self {
        Self { messages, bytes }
    }
}

/// Consumed quota for one (scope, day).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub messages_in: u64,
    pub messages_out: u64,
    pub bytes_in: u64,
    pub bytes_out: u64,
}

impl UsageCounter {
    pub fn messages(&self, direction: Direction) -> u64 {
        match direction {
            Direction::In => self.messages_in,
            Direction::Out => self.messages_out,
        }
    }

    pub fn bytes(&self, direction: Direction) -> u64 {
        match direction {
            Direction::In => self.bytes_in,
            Direction::Out => self.bytes_out,
        }
    }

    /// Checks `delta` against `limit` without mutating. Messages are checked
    /// before bytes; filling a limit exactly is allowed.
    pub fn check(
        &self,
        direction: Direction,
        delta: UsageDelta,
        limit: &QuotaLimit,
    ) -> Result<(), Denial> {
        let messages = self.messages(direction);
        if exceeds(messages, delta.messages, limit.messages_per_day) {
            return Err(Denial {
                resource: Resource::Messages,
                current: messages,
                requested: delta.messages,
                limit: limit.messages_per_day,
            });
        }

        let bytes = self.bytes(direction);
        if exceeds(bytes, delta.bytes, limit.bytes_per_day) {
            return Err(Denial {
                resource: Resource::Bytes,
                current: bytes,
                requested: delta.bytes,
                limit: limit.bytes_per_day,
            });
        }

        Ok(())
    }

    pub fn apply(&mut self, direction: Direction, delta: UsageDelta) {
        match direction {
            Direction::In => {
                self.messages_in = self.messages_in.saturating_add(delta.messages);
                self.bytes_in = self.bytes_in.saturating_add(delta.bytes);
            }
            Direction::Out => {
                self.messages_out = self.messages_out.saturating_add(delta.messages);
                self.bytes_out = self.bytes_out.saturating_add(delta.bytes);
            }
        }
    }

    pub fn revert(&mut self, direction: Direction, delta: UsageDelta) {
        match direction {
            Direction::In => {
                self.messages_in = self.messages_in.saturating_sub(delta.messages);
                self.bytes_in = self.bytes_in.saturating_sub(delta.bytes);
            }
            Direction::Out => {
                self.messages_out = self.messages_out.saturating_sub(delta.messages);
                self.bytes_out = self.bytes_out.saturating_sub(delta.bytes);
            }
        }
    }
}

fn exceeds(current: u64, requested: u64, limit: u64) -> bool {
    match current.checked_add(requested) {
        Some(total) => total > limit,
        None => true,
    }
}

/// Why a reservation was refused: the usage already committed and the ceiling it would cross.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Denial {
    pub resource: Resource,
    pub current: u64,
    pub requested: u64,
    pub limit: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reservation {
    /// Carries the counter value after the reservation was committed.
    Granted(UsageCounter),
    Denied(Denial),
}

impl Reservation {
    pub fn is_granted(&self) -> bool {
        matches!(self, Reservation::Granted(_))
    }
}
