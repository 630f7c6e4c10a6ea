use chrono::NaiveDate;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::counter::{CounterKey, Direction, Reservation, UsageCounter, UsageDelta};
use super::error::LedgerError;
use super::limits::QuotaLimit;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    pub day: NaiveDate,
    pub counter: UsageCounter,
}

/// Persistence seam behind [`super::UsageLedger`].
///
/// `reserve` must evaluate check-and-increment as one linearizable step per
/// [`CounterKey`]: concurrent callers for the same key observe some sequential
/// order, and a denied call leaves the counter untouched.
pub trait UsageStore: Send + Sync {
    fn reserve(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
        limit: QuotaLimit,
    ) -> Result<Reservation, LedgerError>;

    /// Compensating release of a delta previously granted by `reserve`.
    fn release(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
    ) -> Result<(), LedgerError>;

    /// Current value, zero when the counter was never touched.
    fn load(&self, key: &CounterKey) -> Result<UsageCounter, LedgerError>;

    /// All retained days for a scope, newest first.
    fn history(&self, scope_id: &str) -> Result<Vec<DailyUsage>, LedgerError>;
}

/// In-process store. The DashMap entry guard is the per-(scope, day)
/// exclusive section, so unrelated keys only contend when they share a shard.
#[derive(Default)]
pub struct MemoryUsageStore {
    counters: DashMap<CounterKey, UsageCounter>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for MemoryUsageStore {
    fn reserve(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
        limit: QuotaLimit,
    ) -> Result<Reservation, LedgerError> {
        let mut entry = self.counters.entry(key.clone()).or_default();

        if let Err(denial) = entry.check(direction, delta, &limit) {
            return Ok(Reservation::Denied(denial));
        }

        entry.apply(direction, delta);
        Ok(Reservation::Granted(*entry))
    }

    fn release(
        &self,
        key: &CounterKey,
        direction: Direction,
        delta: UsageDelta,
    ) -> Result<(), LedgerError> {
        if let Some(mut entry) = self.counters.get_mut(key) {
            entry.revert(direction, delta);
        }
        Ok(())
    }

    fn load(&self, key: &CounterKey) -> Result<UsageCounter, LedgerError> {
        Ok(self
            .counters
            .get(key)
            .map(|entry| *entry.value())
            .unwrap_or_default())
    }

    fn history(&self, scope_id: &str) -> Result<Vec<DailyUsage>, LedgerError> {
        let mut days: Vec<DailyUsage> = self
            .counters
            .iter()
            .filter(|entry| entry.key().scope_id == scope_id)
            .map(|entry| DailyUsage {
                day: entry.key().day,
                counter: *entry.value(),
            })
            .collect();

        days.sort_by(|a, b| b.day.cmp(&a.day));
        Ok(days)
    }
}
