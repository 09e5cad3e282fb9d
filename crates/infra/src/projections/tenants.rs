//! Subscription read model (plan, entitlements, billing).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use microfin_core::{Money, TenantId};
use microfin_events::EventEnvelope;
use microfin_tenancy::{Charge, Entitlement, Plan, TenantEvent, TenantStatus, effective_entitlements, tenant_aggregate_id};

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantReadModel {
    pub tenant_id: TenantId,
    pub name: String,
    pub plan: Plan,
    pub status: TenantStatus,
    pub suspension_reason: Option<String>,
    pub granted: BTreeSet<Entitlement>,
    pub revoked: BTreeSet<Entitlement>,
    pub entitlements: BTreeSet<Entitlement>,
    pub charges: Vec<Charge>,
    pub registered_at: DateTime<Utc>,
}

impl TenantReadModel {
    pub fn outstanding_charges(&self) -> Money {
        self.charges.iter().filter(|c| c.settled_at.is_none()).map(|c| c.amount).sum()
    }

    fn refresh_entitlements(&mut self) {
        self.entitlements = effective_entitlements(self.plan, &self.granted, &self.revoked, self.status);
    }
}

/// One row per tenant, keyed by the tenant itself.
#[derive(Debug)]
pub struct TenantsProjection<S = InMemoryTenantStore<(), TenantReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for TenantsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> TenantsProjection<S>
where
    S: TenantStore<(), TenantReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("tenancy.subscriptions") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId) -> Option<TenantReadModel> {
        self.store.get(tenant_id, &())
    }

    pub fn charge(&self, tenant_id: TenantId, charge_id: Uuid) -> Option<Charge> {
        self.get(tenant_id)?.charges.into_iter().find(|c| c.charge_id == charge_id)
    }
}

impl<S> Projection for TenantsProjection<S>
where
    S: TenantStore<(), TenantReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<TenantEvent>(&self.cursors, aggregate_types::TENANT, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();
        ensure_tenant(ev.tenant_id(), envelope)?;
        ensure_aggregate(tenant_aggregate_id(tenant_id), envelope)?;

        if let TenantEvent::Registered(e) = ev {
            let mut row = TenantReadModel {
                tenant_id,
                name: e.name,
                plan: e.plan,
                status: TenantStatus::Active,
                suspension_reason: None,
                granted: BTreeSet::new(),
                revoked: BTreeSet::new(),
                entitlements: BTreeSet::new(),
                charges: Vec::new(),
                registered_at: e.occurred_at,
            };
            row.refresh_entitlements();
            self.store.upsert(tenant_id, (), row);
        } else if let Some(mut row) = self.get(tenant_id) {
            match ev {
                TenantEvent::PlanChanged(e) => row.plan = e.to,
                TenantEvent::EntitlementGranted(e) => {
                    row.revoked.remove(&e.entitlement);
                    row.granted.insert(e.entitlement);
                }
                TenantEvent::EntitlementRevoked(e) => {
                    row.granted.remove(&e.entitlement);
                    row.revoked.insert(e.entitlement);
                }
                TenantEvent::Suspended(e) => {
                    row.status = TenantStatus::Suspended;
                    row.suspension_reason = Some(e.reason);
                }
                TenantEvent::Reactivated(_) => {
                    row.status = TenantStatus::Active;
                    row.suspension_reason = None;
                }
                TenantEvent::ChargeIssued(e) => row.charges.push(e.charge),
                TenantEvent::ChargeSettled(e) => {
                    if let Some(c) = row.charges.iter_mut().find(|c| c.charge_id == e.charge_id) {
                        c.settled_at = Some(e.occurred_at);
                    }
                }
                TenantEvent::Registered(_) => {}
            }
            row.refresh_entitlements();
            self.store.upsert(tenant_id, (), row);
        }

        self.cursors.advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projections::envelope_for;
    use microfin_tenancy::{EntitlementRevoked, PlanChanged, TenantRegistered, TenantSuspended};

    #[test]
    fn revocations_survive_plan_changes_and_suspension_empties_entitlements() {
        let projection = TenantsProjection::default();
        let t = TenantId::new();
        let agg = tenant_aggregate_id(t);
        let now = Utc::now();

        let events = [
            TenantEvent::Registered(TenantRegistered {
                tenant_id: t,
                name: "Kijiji MFI".into(),
                plan: Plan::Growth,
                occurred_at: now,
            }),
            TenantEvent::EntitlementRevoked(EntitlementRevoked {
                tenant_id: t,
                entitlement: Entitlement::Realtime,
                occurred_at: now,
            }),
            TenantEvent::PlanChanged(PlanChanged { tenant_id: t, from: Plan::Growth, to: Plan::Enterprise, occurred_at: now }),
        ];
        for (i, ev) in events.iter().enumerate() {
            projection
                .apply_envelope(&envelope_for(t, agg, aggregate_types::TENANT, i as u64 + 1, ev))
                .unwrap();
        }

        let row = projection.get(t).unwrap();
        assert!(row.entitlements.contains(&Entitlement::Payroll));
        assert!(!row.entitlements.contains(&Entitlement::Realtime));

        let suspended = TenantEvent::Suspended(TenantSuspended { tenant_id: t, reason: "unpaid".into(), occurred_at: now });
        projection
            .apply_envelope(&envelope_for(t, agg, aggregate_types::TENANT, 4, &suspended))
            .unwrap();
        assert!(projection.get(t).unwrap().entitlements.is_empty());
    }
}
