pub mod counter;
pub mod error;
pub mod limits;
pub mod store;
pub mod usage;
pub mod usage_ledger;

pub use counter::{
    CounterKey, Denial, Direction, Reservation, Resource, Scope, ScopeClass, UsageCounter,
    UsageDelta,
};
pub use error::LedgerError;
pub use limits::{
    DirectionalLimits, LimitSet, QuotaLimit, FREE_TIER_BYTES_LIMIT, FREE_TIER_MESSAGES_LIMIT,
    GLOBAL_BYTES_LIMIT, GLOBAL_MESSAGES_LIMIT,
};
pub use store::{DailyUsage, MemoryUsageStore, UsageStore};
pub use usage::{UsageMetrics, UsageReport};
pub use usage_ledger::{current_day, UsageLedger};
