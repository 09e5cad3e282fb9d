use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_auth::{Role, UserEvent, UserStatus};
use microfin_core::{AggregateId, BranchId, TenantId, UserId};
use microfin_events::EventEnvelope;

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserReadModel {
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub home_branch: Option<BranchId>,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    pub suspension_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct UsersProjection<S = InMemoryTenantStore<UserId, UserReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for UsersProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> UsersProjection<S>
where
    S: TenantStore<UserId, UserReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("auth.users") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, user_id: &UserId) -> Option<UserReadModel> {
        self.store.get(tenant_id, user_id)
    }

    pub fn list(&self, tenant_id: TenantId) -> Vec<UserReadModel> {
        let mut rows = self.store.list(tenant_id);
        rows.sort_by(|a, b| a.email.cmp(&b.email));
        rows
    }

    pub fn find_by_email(&self, tenant_id: TenantId, email: &str) -> Option<UserReadModel> {
        self.store
            .list(tenant_id)
            .into_iter()
            .find(|u| u.email.eq_ignore_ascii_case(email))
    }
}

impl<S> Projection for UsersProjection<S>
where
    S: TenantStore<UserId, UserReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<UserEvent>(&self.cursors, aggregate_types::USER, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        let (event_tenant, user_id) = match &ev {
            UserEvent::Created(e) => (e.tenant_id, e.user_id),
            UserEvent::RoleAssigned(e) => (e.tenant_id, e.user_id),
            UserEvent::RoleRevoked(e) => (e.tenant_id, e.user_id),
            UserEvent::Suspended(e) => (e.tenant_id, e.user_id),
            UserEvent::Activated(e) => (e.tenant_id, e.user_id),
        };
        ensure_tenant(event_tenant, envelope)?;
        ensure_aggregate(AggregateId::from_uuid(*user_id.as_uuid()), envelope)?;

        if let UserEvent::Created(e) = ev {
            self.store.upsert(
                tenant_id,
                user_id,
                UserReadModel {
                    user_id,
                    email: e.email,
                    display_name: e.display_name,
                    home_branch: e.home_branch,
                    roles: e.initial_roles,
                    status: UserStatus::Active,
                    suspension_reason: None,
                    created_at: e.occurred_at,
                },
            );
        } else if let Some(mut row) = self.store.get(tenant_id, &user_id) {
            match ev {
                UserEvent::RoleAssigned(e) => {
                    if !row.roles.contains(&e.role) {
                        row.roles.push(e.role);
                    }
                }
                UserEvent::RoleRevoked(e) => row.roles.retain(|r| r != &e.role),
                UserEvent::Suspended(e) => {
                    row.status = UserStatus::Suspended;
                    row.suspension_reason = Some(e.reason);
                }
                UserEvent::Activated(_) => {
                    row.status = UserStatus::Active;
                    row.suspension_reason = None;
                }
                UserEvent::Created(_) => {}
            }
            self.store.upsert(tenant_id, user_id, row);
        }

        self.cursors.advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
