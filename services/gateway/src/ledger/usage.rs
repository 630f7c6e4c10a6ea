use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::counter::{Direction, ScopeClass, UsageCounter};
use super::limits::{LimitSet, QuotaLimit};

pub const USAGE_WARNING_PERCENT: f64 = 80.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageMetrics {
    pub messages_used: u64,
    pub messages_limit: u64,
    pub messages_remaining: u64,
    pub messages_percentage: f64,
    pub messages_warning: bool,
    pub bytes_used: u64,
    pub bytes_limit: u64,
    pub bytes_remaining: u64,
    pub bytes_percentage: f64,
    pub bytes_warning: bool,
}

impl UsageMetrics {
    pub fn calculate(messages_used: u64, bytes_used: u64, limit: &QuotaLimit) -> Self {
        let messages_percentage = percentage(messages_used, limit.messages_per_day);
        let bytes_percentage = percentage(bytes_used, limit.bytes_per_day);

        Self {
            messages_used,
            messages_limit: limit.messages_per_day,
            messages_remaining: limit.messages_per_day.saturating_sub(messages_used),
            messages_percentage,
            messages_warning: messages_percentage >= USAGE_WARNING_PERCENT,
            bytes_used,
            bytes_limit: limit.bytes_per_day,
            bytes_remaining: limit.bytes_per_day.saturating_sub(bytes_used),
            bytes_percentage,
            bytes_warning: bytes_percentage >= USAGE_WARNING_PERCENT,
        }
    }
}

fn percentage(used: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    let raw = (used as f64 / limit as f64) * 100.0;
    (raw * 100.0).round() / 100.0
}

/// Daily usage for one scope, both directions, against the configured limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageReport {
    pub scope: String,
    pub date: NaiveDate,
    pub inbound: UsageMetrics,
    pub outbound: UsageMetrics,
}

impl UsageReport {
    pub fn build(
        scope: String,
        class: ScopeClass,
        date: NaiveDate,
        counter: &UsageCounter,
        limits: &LimitSet,
    ) -> Self {
        let inbound_limit = limits.for_scope(class, Direction::In);
        let outbound_limit = limits.for_scope(class, Direction::Out);

        Self {
            scope,
            date,
            inbound: UsageMetrics::calculate(
                counter.messages_in,
                counter.bytes_in,
                &inbound_limit,
            ),
            outbound: UsageMetrics::calculate(
                counter.messages_out,
                counter.bytes_out,
                &outbound_limit,
            ),
        }
    }
}
