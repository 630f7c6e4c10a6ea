use chrono::NaiveDate;
use tracing::{debug, error};

use crate::ledger::{current_day, Direction, LedgerError, Reservation, Scope, ScopeClass, UsageLedger};
use crate::tenant::TenantId;

use super::admission::{Admission, AdmissionReceipt, Rejection};

/// Two-scope admission: tenant first, then global, for the same delta.
///
/// A tenant denial short-circuits before the global counter is touched. A
/// global denial (or a ledger failure on the global reserve) rolls the tenant
/// reservation back, so a tenant is never charged for traffic that was not
/// admitted.
#[derive(Clone)]
pub struct QuotaGuard {
    ledger: UsageLedger,
}

impl QuotaGuard {
    pub fn new(ledger: UsageLedger) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.ledger
    }

    pub fn admit(
        &self,
        tenant_id: &TenantId,
        direction: Direction,
        messages: u64,
        bytes: u64,
    ) -> Result<Admission, LedgerError> {
        self.admit_on(current_day(), tenant_id, direction, messages, bytes)
    }

    pub fn admit_on(
        &self,
        day: NaiveDate,
        tenant_id: &TenantId,
        direction: Direction,
        messages: u64,
        bytes: u64,
    ) -> Result<Admission, LedgerError> {
        let tenant_scope = Scope::Tenant(tenant_id.clone());

        match self
            .ledger
            .reserve(&tenant_scope, day, direction, messages, bytes)?
        {
            Reservation::Granted(_) => {}
            Reservation::Denied(denial) => {
                debug!(%tenant_id, %direction, resource = %denial.resource, "tenant quota exceeded");
                return Ok(Admission::Rejected(Rejection {
                    scope: ScopeClass::Tenant,
                    direction,
                    denial,
                }));
            }
        }

        let global = match self
            .ledger
            .reserve(&Scope::Global, day, direction, messages, bytes)
        {
            Ok(reservation) => reservation,
            Err(err) => {
                self.rollback(&tenant_scope, day, direction, messages, bytes);
                return Err(err);
            }
        };

        match global {
            Reservation::Granted(_) => Ok(Admission::Admitted(AdmissionReceipt {
                tenant_id: tenant_id.clone(),
                day,
                direction,
                messages,
                bytes,
            })),
            Reservation::Denied(denial) => {
                self.rollback(&tenant_scope, day, direction, messages, bytes);
                debug!(%tenant_id, %direction, resource = %denial.resource, "global quota exceeded");
                Ok(Admission::Rejected(Rejection {
                    scope: ScopeClass::Global,
                    direction,
                    denial,
                }))
            }
        }
    }

    /// Returns an admitted delta to both scopes, global first.
    pub fn refund(&self, receipt: &AdmissionReceipt) -> Result<(), LedgerError> {
        self.ledger.release(
            &Scope::Global,
            receipt.day,
            receipt.direction,
            receipt.messages,
            receipt.bytes,
        )?;
        self.ledger.release(
            &Scope::Tenant(receipt.tenant_id.clone()),
            receipt.day,
            receipt.direction,
            receipt.messages,
            receipt.bytes,
        )
    }

    fn rollback(
        &self,
        tenant_scope: &Scope,
        day: NaiveDate,
        direction: Direction,
        messages: u64,
        bytes: u64,
    ) {
        if let Err(err) = self
            .ledger
            .release(tenant_scope, day, direction, messages, bytes)
        {
            error!(
                scope = %tenant_scope,
                %day,
                %direction,
                messages,
                bytes,
                error = %err,
                "failed to roll back tenant reservation"
            );
        }
    }
}
