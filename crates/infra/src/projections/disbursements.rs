use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_core::{Money, TenantId, UserId};
use microfin_events::EventEnvelope;
use microfin_lending::{BatchEvent, BatchId, BatchItem, BatchStatus};

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReadModel {
    pub batch_id: BatchId,
    pub reference: String,
    pub items: Vec<BatchItem>,
    pub total: Money,
    pub status: BatchStatus,
    pub attempts: u32,
    pub provider_reference: Option<String>,
    pub last_failure: Option<String>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct DisbursementsProjection<S = InMemoryTenantStore<BatchId, BatchReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for DisbursementsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> DisbursementsProjection<S>
where
    S: TenantStore<BatchId, BatchReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("lending.disbursement_batches") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, batch_id: &BatchId) -> Option<BatchReadModel> {
        self.store.get(tenant_id, batch_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<BatchReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by_key(|b| b.created_at);
        rows
    }

    fn update(&self, tenant_id: TenantId, batch_id: BatchId, at: DateTime<Utc>, f: impl FnOnce(&mut BatchReadModel)) {
        if let Some(mut row) = self.store.get(tenant_id, &batch_id) {
            f(&mut row);
            row.updated_at = at;
            self.store.upsert(tenant_id, batch_id, row);
        }
    }
}

impl<S> Projection for DisbursementsProjection<S>
where
    S: TenantStore<BatchId, BatchReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<BatchEvent>(&self.cursors, aggregate_types::DISBURSEMENT_BATCH, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        let batch_id = ev.batch_id();
        ensure_tenant(ev.tenant_id(), envelope)?;
        ensure_aggregate(batch_id.0, envelope)?;

        match ev {
            BatchEvent::Created(e) => {
                let total = e.items.iter().map(|i| i.amount).sum();
                self.store.upsert(
                    tenant_id,
                    batch_id,
                    BatchReadModel {
                        batch_id,
                        reference: e.reference,
                        items: e.items,
                        total,
                        status: BatchStatus::Queued,
                        attempts: 1,
                        provider_reference: None,
                        last_failure: None,
                        created_by: e.created_by,
                        created_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            BatchEvent::Sent(e) => {
                self.update(tenant_id, batch_id, e.occurred_at, |b| {
                    b.status = BatchStatus::Sent;
                    b.provider_reference = Some(e.provider_reference);
                });
            }
            BatchEvent::Failed(e) => {
                self.update(tenant_id, batch_id, e.occurred_at, |b| {
                    b.status = BatchStatus::Failed;
                    b.last_failure = Some(e.reason);
                });
            }
            BatchEvent::Requeued(e) => {
                self.update(tenant_id, batch_id, e.occurred_at, |b| {
                    b.status = BatchStatus::Queued;
                    b.attempts = e.attempt;
                    b.provider_reference = None;
                });
            }
            BatchEvent::Posted(e) => {
                self.update(tenant_id, batch_id, e.occurred_at, |b| b.status = BatchStatus::Posted);
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
