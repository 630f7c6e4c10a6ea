use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use tracing::debug;

use super::counter::{Direction, Reservation, Scope, UsageCounter, UsageDelta};
use super::error::LedgerError;
use super::limits::LimitSet;
use super::store::{DailyUsage, UsageStore};

/// Owner of every usage counter. All reads and writes go through this type
/// with the scope and day passed explicitly.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn UsageStore>,
    limits: LimitSet,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn UsageStore>, limits: LimitSet) -> Self {
        Self { store, limits }
    }

    pub fn limits(&self) -> &LimitSet {
        &self.limits
    }

    pub fn reserve(
        &self,
        scope: &Scope,
        day: NaiveDate,
        direction: Direction,
        messages: u64,
        bytes: u64,
    ) -> Result<Reservation, LedgerError> {
        let limit = self.limits.for_scope(scope.class(), direction);
        let key = scope.key(day);
        let reservation =
            self.store
                .reserve(&key, direction, UsageDelta::new(messages, bytes), limit)?;

        match &reservation {
            Reservation::Granted(counter) => debug!(
                scope = %scope,
                %day,
                %direction,
                messages,
                bytes,
                used_messages = counter.messages(direction),
                used_bytes = counter.bytes(direction),
                "usage reserved"
            ),
            Reservation::Denied(denial) => debug!(
                scope = %scope,
                %day,
                %direction,
                resource = %denial.resource,
                current = denial.current,
                requested = denial.requested,
                limit = denial.limit,
                "usage reservation denied"
            ),
        }

        Ok(reservation)
    }

    /// Undo a granted reservation. Only the guard's compensation paths call this.
    pub(crate) fn release(
        &self,
        scope: &Scope,
        day: NaiveDate,
        direction: Direction,
        messages: u64,
        bytes: u64,
    ) -> Result<(), LedgerError> {
        self.store.release(
            &scope.key(day),
            direction,
            UsageDelta::new(messages, bytes),
        )?;
        debug!(scope = %scope, %day, %direction, messages, bytes, "usage released");
        Ok(())
    }

    pub fn usage(&self, scope: &Scope, day: NaiveDate) -> Result<UsageCounter, LedgerError> {
        self.store.load(&scope.key(day))
    }

    pub fn history(&self, scope: &Scope) -> Result<Vec<DailyUsage>, LedgerError> {
        self.store.history(&scope.scope_id())
    }
}

pub fn current_day() -> NaiveDate {
    Utc::now().date_naive()
}
