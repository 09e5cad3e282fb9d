//! Projections: disposable, tenant-isolated read models folded from events.
//!
//! Every projection tracks a cursor per `(tenant, aggregate)` stream, so
//! redelivered events are skipped and gaps are reported instead of silently
//! producing a wrong read model.

pub mod borrowers;
pub mod cursor;
pub mod cursor_store;
pub mod disbursements;
pub mod ledger;
pub mod loans;
pub mod payroll;
pub mod products;
pub mod roles;
pub mod savings;
pub mod tenants;
pub mod users;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;

use microfin_core::TenantId;
use microfin_events::EventEnvelope;

use crate::event_store::StoredEvent;

pub use borrowers::{BorrowerReadModel, BorrowersProjection};
pub use cursor::{CursorCheck, StreamCursors};
pub use cursor_store::ProjectionCursorStore;
pub use disbursements::{BatchReadModel, DisbursementsProjection};
pub use ledger::{AccountBalance, JournalEntryReadModel, LedgerProjection, TrialBalance, TrialBalanceRow};
pub use loans::{LoanReadModel, LoansProjection};
pub use payroll::{PayrollProjection, PayrollRunReadModel};
pub use products::{ProductReadModel, ProductsProjection};
pub use roles::{RoleReadModel, RolesProjection};
pub use savings::{SavingsAccountReadModel, SavingsProjection};
pub use tenants::{TenantReadModel, TenantsProjection};
pub use users::{UserReadModel, UsersProjection};

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize event: {0}")]
    Deserialize(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// A read model builder fed from committed event envelopes.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fold one event. Envelopes for other aggregate types are ignored.
    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop the tenant's rows and cursors.
    fn clear_tenant(&self, tenant_id: TenantId);
}

/// Wipe a tenant's read model and fold its history again.
pub fn rebuild_from_scratch(
    projection: &dyn Projection,
    tenant_id: TenantId,
    history: &[StoredEvent],
) -> Result<(), ProjectionError> {
    projection.clear_tenant(tenant_id);
    for stored in history.iter().filter(|e| e.tenant_id == tenant_id) {
        projection.apply_envelope(&stored.to_envelope())?;
    }
    Ok(())
}

/// Decode an envelope addressed to `aggregate_type`, or `None` when it belongs
/// to another projection or was already applied.
pub(crate) fn accept<E>(
    cursors: &StreamCursors,
    aggregate_type: &str,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<Option<E>, ProjectionError>
where
    E: DeserializeOwned,
{
    if envelope.aggregate_type() != aggregate_type {
        return Ok(None);
    }
    match cursors.check(envelope.tenant_id(), envelope.aggregate_id(), envelope.sequence_number())? {
        CursorCheck::Skip => Ok(None),
        CursorCheck::Apply => serde_json::from_value(envelope.payload().clone())
            .map(Some)
            .map_err(|e| ProjectionError::Deserialize(e.to_string())),
    }
}

pub(crate) fn ensure_tenant(event_tenant: TenantId, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
    if event_tenant != envelope.tenant_id() {
        return Err(ProjectionError::TenantIsolation(format!(
            "event tenant_id {event_tenant} does not match envelope tenant_id {}",
            envelope.tenant_id()
        )));
    }
    Ok(())
}

pub(crate) fn ensure_aggregate(
    event_aggregate: microfin_core::AggregateId,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<(), ProjectionError> {
    if event_aggregate != envelope.aggregate_id() {
        return Err(ProjectionError::TenantIsolation(format!(
            "event aggregate {event_aggregate} does not match envelope aggregate_id {}",
            envelope.aggregate_id()
        )));
    }
    Ok(())
}

/// Every read model the API serves, fed by one consumer.
#[derive(Debug, Default)]
pub struct ReadModels {
    pub borrowers: BorrowersProjection,
    pub products: ProductsProjection,
    pub loans: LoansProjection,
    pub disbursements: DisbursementsProjection,
    pub savings: SavingsProjection,
    pub ledger: LedgerProjection,
    pub payroll: PayrollProjection,
    pub tenants: TenantsProjection,
    pub users: UsersProjection,
    pub roles: RolesProjection,
}

impl ReadModels {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist cursors of every projection in `store`.
    pub fn with_cursor_store(self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        Self {
            borrowers: self.borrowers.with_cursor_store(store.clone()),
            products: self.products.with_cursor_store(store.clone()),
            loans: self.loans.with_cursor_store(store.clone()),
            disbursements: self.disbursements.with_cursor_store(store.clone()),
            savings: self.savings.with_cursor_store(store.clone()),
            ledger: self.ledger.with_cursor_store(store.clone()),
            payroll: self.payroll.with_cursor_store(store.clone()),
            tenants: self.tenants.with_cursor_store(store.clone()),
            users: self.users.with_cursor_store(store.clone()),
            roles: self.roles.with_cursor_store(store),
        }
    }

    pub fn all(&self) -> [&dyn Projection; 10] {
        [
            &self.borrowers,
            &self.products,
            &self.loans,
            &self.disbursements,
            &self.savings,
            &self.ledger,
            &self.payroll,
            &self.tenants,
            &self.users,
            &self.roles,
        ]
    }

    /// Route an envelope to every projection. A failing projection does not
    /// starve the others; the first error is returned.
    pub fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let mut first_error = None;
        for projection in self.all() {
            if let Err(err) = projection.apply_envelope(envelope) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Startup replay of the whole store: tenants are reset before their
    /// history is folded, so stale durable cursors cannot hide events.
    pub fn replay(&self, events: &[StoredEvent]) -> Result<usize, ProjectionError> {
        let tenants: BTreeSet<uuid::Uuid> = events.iter().map(|e| *e.tenant_id.as_uuid()).collect();
        for tenant in tenants {
            for projection in self.all() {
                projection.clear_tenant(TenantId::from_uuid(tenant));
            }
        }

        // cursors only need per-stream order
        let mut ordered: Vec<&StoredEvent> = events.iter().collect();
        ordered.sort_by_key(|e| (*e.tenant_id.as_uuid(), *e.aggregate_id.as_uuid(), e.sequence_number));
        for stored in ordered {
            self.apply_envelope(&stored.to_envelope())?;
        }
        Ok(events.len())
    }
}

#[cfg(test)]
pub(crate) fn envelope_for<E: serde::Serialize>(
    tenant_id: TenantId,
    aggregate_id: microfin_core::AggregateId,
    aggregate_type: &str,
    sequence_number: u64,
    event: &E,
) -> EventEnvelope<JsonValue> {
    EventEnvelope::new(
        uuid::Uuid::now_v7(),
        tenant_id,
        aggregate_id,
        aggregate_type,
        sequence_number,
        serde_json::to_value(event).expect("event serializes"),
    )
}
