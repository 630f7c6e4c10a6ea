use std::sync::Arc;

use rand::Rng;
use tempfile::TempDir;
use topic_gate_gateway::guard::QuotaGuard;
use topic_gate_gateway::ledger::{LimitSet, MemoryUsageStore, QuotaLimit, UsageLedger, UsageStore};
use topic_gate_gateway::storage::SqliteUsageStore;
use topic_gate_gateway::TenantId;

/// A guard over a fresh store, with limits high enough that benches never
/// hit a denial.
pub struct LedgerBenchFixture {
    pub guard: QuotaGuard,
    pub tenant_id: TenantId,
    pub temp_dir: Option<TempDir>,
}

impl LedgerBenchFixture {
    pub fn memory(tenant_id: &str) -> Self {
        Self::with_store(tenant_id, Arc::new(MemoryUsageStore::new()), None)
    }

    pub fn sqlite(tenant_id: &str) -> Self {
        let temp_dir = TempDir::new().expect("tempdir");
        let store = SqliteUsageStore::new(temp_dir.path().to_path_buf()).expect("sqlite store");
        Self::with_store(tenant_id, Arc::new(store), Some(temp_dir))
    }

    fn with_store(tenant_id: &str, store: Arc<dyn UsageStore>, temp_dir: Option<TempDir>) -> Self {
        Self {
            guard: QuotaGuard::new(UsageLedger::new(store, unbounded_limits())),
            tenant_id: TenantId::parse(tenant_id).expect("valid tenant id"),
            temp_dir,
        }
    }
}

pub fn unbounded_limits() -> LimitSet {
    let limit = QuotaLimit::new(u64::MAX / 2, u64::MAX / 2);
    LimitSet::new(limit, limit)
}

pub fn random_tenant_id(prefix: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen_range(100_000..999_999);
    format!("{prefix}-{suffix}")
}
