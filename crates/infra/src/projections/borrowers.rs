use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_borrowers::{BorrowerEvent, BorrowerId, BorrowerStatus, ContactDetails};
use microfin_core::{BranchId, TenantId};
use microfin_events::EventEnvelope;

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BorrowerReadModel {
    pub borrower_id: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub name: String,
    pub national_id: String,
    pub contact: ContactDetails,
    pub status: BorrowerStatus,
    pub suspension_reason: Option<String>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct BorrowersProjection<S = InMemoryTenantStore<BorrowerId, BorrowerReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for BorrowersProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> BorrowersProjection<S>
where
    S: TenantStore<BorrowerId, BorrowerReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("borrowers.registry") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, borrower_id: &BorrowerId) -> Option<BorrowerReadModel> {
        self.store.get(tenant_id, borrower_id)
    }

    /// Borrowers ordered by registration; `branch` narrows to one branch.
    pub fn list(&self, tenant_id: TenantId, branch: Option<BranchId>) -> Vec<BorrowerReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|b| branch.is_none() || b.branch_id == branch)
            .collect();
        rows.sort_by_key(|b| b.registered_at);
        rows
    }
}

impl<S> Projection for BorrowersProjection<S>
where
    S: TenantStore<BorrowerId, BorrowerReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<BorrowerEvent>(&self.cursors, aggregate_types::BORROWER, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        let (event_tenant, borrower_id) = match &ev {
            BorrowerEvent::Registered(e) => (e.tenant_id, e.borrower_id),
            BorrowerEvent::Updated(e) => (e.tenant_id, e.borrower_id),
            BorrowerEvent::Suspended(e) => (e.tenant_id, e.borrower_id),
            BorrowerEvent::Reactivated(e) => (e.tenant_id, e.borrower_id),
        };
        ensure_tenant(event_tenant, envelope)?;
        ensure_aggregate(borrower_id.0, envelope)?;

        match ev {
            BorrowerEvent::Registered(e) => {
                self.store.upsert(
                    tenant_id,
                    borrower_id,
                    BorrowerReadModel {
                        borrower_id,
                        branch_id: e.branch_id,
                        name: e.name,
                        national_id: e.national_id,
                        contact: e.contact,
                        status: BorrowerStatus::Active,
                        suspension_reason: None,
                        registered_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            BorrowerEvent::Updated(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &borrower_id) {
                    row.name = e.name;
                    row.contact = e.contact;
                    row.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, borrower_id, row);
                }
            }
            BorrowerEvent::Suspended(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &borrower_id) {
                    row.status = BorrowerStatus::Suspended;
                    row.suspension_reason = e.reason;
                    row.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, borrower_id, row);
                }
            }
            BorrowerEvent::Reactivated(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &borrower_id) {
                    row.status = BorrowerStatus::Active;
                    row.suspension_reason = None;
                    row.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, borrower_id, row);
                }
            }
        }

        self.cursors.advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
