//! Tenant-defined roles. Built-in roles are not projected; the catalog serves them.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_auth::{Permission, RoleDefinitionEvent, role_aggregate_id};
use microfin_core::TenantId;
use microfin_events::EventEnvelope;

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleReadModel {
    pub name: String,
    pub description: Option<String>,
    pub permissions: BTreeSet<Permission>,
    pub defined_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct RolesProjection<S = InMemoryTenantStore<String, RoleReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for RolesProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> RolesProjection<S>
where
    S: TenantStore<String, RoleReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("auth.roles") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, name: &str) -> Option<RoleReadModel> {
        self.store.get(tenant_id, &name.to_string())
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<RoleReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }
}

impl<S> Projection for RolesProjection<S>
where
    S: TenantStore<String, RoleReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<RoleDefinitionEvent>(&self.cursors, aggregate_types::ROLE, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        let (event_tenant, name) = match &ev {
            RoleDefinitionEvent::Defined(e) => (e.tenant_id, e.name.clone()),
            RoleDefinitionEvent::PermissionGranted(e) => (e.tenant_id, e.name.clone()),
            RoleDefinitionEvent::PermissionRevoked(e) => (e.tenant_id, e.name.clone()),
        };
        ensure_tenant(event_tenant, envelope)?;
        ensure_aggregate(role_aggregate_id(&name), envelope)?;

        match ev {
            RoleDefinitionEvent::Defined(e) => {
                self.store.upsert(
                    tenant_id,
                    name.clone(),
                    RoleReadModel {
                        name,
                        description: e.description,
                        permissions: e.permissions.into_iter().collect(),
                        defined_at: e.occurred_at,
                        updated_at: e.occurred_at,
                    },
                );
            }
            RoleDefinitionEvent::PermissionGranted(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &name) {
                    row.permissions.insert(e.permission);
                    row.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, name, row);
                }
            }
            RoleDefinitionEvent::PermissionRevoked(e) => {
                if let Some(mut row) = self.store.get(tenant_id, &name) {
                    row.permissions.remove(&e.permission);
                    row.updated_at = e.occurred_at;
                    self.store.upsert(tenant_id, name, row);
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
