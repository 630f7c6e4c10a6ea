use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::ledger::{Denial, Direction, ScopeClass};
use crate::tenant::TenantId;

/// Proof that both scopes were charged. Needed to refund a reservation when
/// the guarded operation fails afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionReceipt {
    pub tenant_id: TenantId,
    pub day: NaiveDate,
    pub direction: Direction,
    pub messages: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    pub scope: ScopeClass,
    pub direction: Direction,
    pub denial: Denial,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted(AdmissionReceipt),
    Rejected(Rejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted(_))
    }
}
