use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_core::{BranchId, Money, TenantId, UserId};
use microfin_events::EventEnvelope;
use microfin_payroll::{PayrollEvent, PayrollRunId, Payslip, RunStatus};

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayrollRunReadModel {
    pub run_id: PayrollRunId,
    pub branch_id: Option<BranchId>,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub status: RunStatus,
    pub payslips: Vec<Payslip>,
    pub gross_total: Money,
    pub net_total: Money,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub posted_by: Option<UserId>,
    pub posted_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct PayrollProjection<S = InMemoryTenantStore<PayrollRunId, PayrollRunReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for PayrollProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> PayrollProjection<S>
where
    S: TenantStore<PayrollRunId, PayrollRunReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("payroll.runs") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, run_id: &PayrollRunId) -> Option<PayrollRunReadModel> {
        self.store.get(tenant_id, run_id)
    }

    pub fn list(&self, tenant_id: TenantId, branch: Option<BranchId>) -> Vec<PayrollRunReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|r| branch.is_none() || r.branch_id == branch)
            .collect();
        rows.sort_by_key(|r| (r.period_start, r.created_at));
        rows
    }
}

impl<S> Projection for PayrollProjection<S>
where
    S: TenantStore<PayrollRunId, PayrollRunReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<PayrollEvent>(&self.cursors, aggregate_types::PAYROLL_RUN, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        let run_id = ev.run_id();
        ensure_tenant(ev.tenant_id(), envelope)?;
        ensure_aggregate(run_id.0, envelope)?;

        match ev {
            PayrollEvent::Created(e) => {
                self.store.upsert(
                    tenant_id,
                    run_id,
                    PayrollRunReadModel {
                        run_id,
                        branch_id: e.branch_id,
                        period_start: e.period_start,
                        period_end: e.period_end,
                        status: RunStatus::Draft,
                        payslips: Vec::new(),
                        gross_total: Money::ZERO,
                        net_total: Money::ZERO,
                        created_by: e.created_by,
                        created_at: e.occurred_at,
                        approved_by: None,
                        approved_at: None,
                        posted_by: None,
                        posted_at: None,
                    },
                );
            }
            other => {
                if let Some(mut row) = self.store.get(tenant_id, &run_id) {
                    match other {
                        PayrollEvent::PayslipAdded(e) => {
                            row.gross_total += e.payslip.gross;
                            row.net_total += e.payslip.net;
                            row.payslips.push(e.payslip);
                        }
                        PayrollEvent::Approved(e) => {
                            row.status = RunStatus::Approved;
                            row.approved_by = Some(e.approved_by);
                            row.approved_at = Some(e.occurred_at);
                        }
                        PayrollEvent::Posted(e) => {
                            row.status = RunStatus::Posted;
                            row.posted_by = Some(e.posted_by);
                            row.posted_at = Some(e.occurred_at);
                        }
                        PayrollEvent::Created(_) => {}
                    }
                    self.store.upsert(tenant_id, run_id, row);
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
