use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_core::TenantId;
use microfin_events::EventEnvelope;
use microfin_lending::{ProductEvent, ProductId, ProductSnapshot};

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Loan product catalog entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    #[serde(flatten)]
    pub product: ProductSnapshot,
    pub defined_at: DateTime<Utc>,
    pub retired_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct ProductsProjection<S = InMemoryTenantStore<ProductId, ProductReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for ProductsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> ProductsProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("lending.products") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(tenant_id, product_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<ProductReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.product.name.cmp(&b.product.name));
        rows
    }
}

impl<S> Projection for ProductsProjection<S>
where
    S: TenantStore<ProductId, ProductReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<ProductEvent>(&self.cursors, aggregate_types::LOAN_PRODUCT, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        match ev {
            ProductEvent::Defined(e) => {
                ensure_tenant(e.tenant_id, envelope)?;
                ensure_aggregate(e.product.product_id.0, envelope)?;
                self.store.upsert(
                    tenant_id,
                    e.product.product_id,
                    ProductReadModel { product: e.product, defined_at: e.occurred_at, retired_at: None },
                );
            }
            ProductEvent::Retired(e) => {
                ensure_tenant(e.tenant_id, envelope)?;
                ensure_aggregate(e.product_id.0, envelope)?;
                if let Some(mut row) = self.store.get(tenant_id, &e.product_id) {
                    row.product.retired = true;
                    row.retired_at = Some(e.occurred_at);
                    self.store.upsert(tenant_id, e.product_id, row);
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
