//! Loan portfolio read model: status, audit trail, schedule and payments.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_borrowers::BorrowerId;
use microfin_core::{BranchId, Money, TenantId, UserId};
use microfin_events::EventEnvelope;
use microfin_lending::{
    BatchId, ClosureReason, Installment, LoanEvent, LoanId, LoanPayment, LoanStatus, LoanTerms, Outstanding,
};

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoanReadModel {
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub status: LoanStatus,
    pub closure: Option<ClosureReason>,
    pub terms: LoanTerms,
    pub outstanding: Outstanding,
    pub penalties_assessed: Money,
    pub schedule: Vec<Installment>,
    pub payments: Vec<LoanPayment>,

    pub applied_by: UserId,
    pub applied_at: DateTime<Utc>,
    pub approved_by: Option<UserId>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_by: Option<UserId>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub disbursed_by: Option<UserId>,
    pub disbursed_at: Option<DateTime<Utc>>,
    pub disbursement_batch: Option<BatchId>,
    pub delinquent_as_of: Option<NaiveDate>,
    pub written_off_at: Option<DateTime<Utc>>,
    pub write_off_reason: Option<String>,
    pub closed_at: Option<DateTime<Utc>>,
    pub version: u64,
}

impl LoanReadModel {
    /// Sum of non-reversed repayments.
    pub fn total_repaid(&self) -> Money {
        self.payments.iter().filter(|p| !p.reversed).map(|p| p.amount).sum()
    }
}

#[derive(Debug)]
pub struct LoansProjection<S = InMemoryTenantStore<LoanId, LoanReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for LoansProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> LoansProjection<S>
where
    S: TenantStore<LoanId, LoanReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("lending.loans") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, loan_id: &LoanId) -> Option<LoanReadModel> {
        self.store.get(tenant_id, loan_id)
    }

    pub fn list(&self, tenant_id: TenantId, branch: Option<BranchId>) -> Vec<LoanReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|l| branch.is_none() || l.branch_id == branch)
            .collect();
        rows.sort_by_key(|l| l.applied_at);
        rows
    }

    pub fn for_borrower(&self, tenant_id: TenantId, borrower_id: BorrowerId) -> Vec<LoanReadModel> {
        self.list(tenant_id, None)
            .into_iter()
            .filter(|l| l.borrower_id == borrower_id)
            .collect()
    }

    fn update(&self, tenant_id: TenantId, loan_id: LoanId, f: impl FnOnce(&mut LoanReadModel)) {
        if let Some(mut row) = self.store.get(tenant_id, &loan_id) {
            f(&mut row);
            row.version += 1;
            self.store.upsert(tenant_id, loan_id, row);
        }
    }
}

fn event_keys(ev: &LoanEvent) -> (TenantId, LoanId) {
    match ev {
        LoanEvent::Applied(e) => (e.tenant_id, e.loan_id),
        LoanEvent::Approved(e) => (e.tenant_id, e.loan_id),
        LoanEvent::Rejected(e) => (e.tenant_id, e.loan_id),
        LoanEvent::Disbursed(e) => (e.tenant_id, e.loan_id),
        LoanEvent::RepaymentRecorded(e) => (e.tenant_id, e.loan_id),
        LoanEvent::RepaymentReversed(e) => (e.tenant_id, e.loan_id),
        LoanEvent::PenaltyAssessed(e) => (e.tenant_id, e.loan_id),
        LoanEvent::MarkedDelinquent(e) => (e.tenant_id, e.loan_id),
        LoanEvent::DelinquencyCured(e) => (e.tenant_id, e.loan_id),
        LoanEvent::WrittenOff(e) => (e.tenant_id, e.loan_id),
        LoanEvent::Closed(e) => (e.tenant_id, e.loan_id),
        LoanEvent::Reopened(e) => (e.tenant_id, e.loan_id),
    }
}

impl<S> Projection for LoansProjection<S>
where
    S: TenantStore<LoanId, LoanReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<LoanEvent>(&self.cursors, aggregate_types::LOAN, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();
        let (event_tenant, loan_id) = event_keys(&ev);
        ensure_tenant(event_tenant, envelope)?;
        ensure_aggregate(loan_id.0, envelope)?;

        match ev {
            LoanEvent::Applied(e) => self.store.upsert(
                tenant_id,
                loan_id,
                LoanReadModel {
                    loan_id,
                    borrower_id: e.borrower_id,
                    branch_id: e.branch_id,
                    status: LoanStatus::Queued,
                    closure: None,
                    terms: e.terms,
                    outstanding: Outstanding::default(),
                    penalties_assessed: Money::ZERO,
                    schedule: Vec::new(),
                    payments: Vec::new(),
                    applied_by: e.applied_by,
                    applied_at: e.occurred_at,
                    approved_by: None,
                    approved_at: None,
                    rejected_by: None,
                    rejected_at: None,
                    rejection_reason: None,
                    disbursed_by: None,
                    disbursed_at: None,
                    disbursement_batch: None,
                    delinquent_as_of: None,
                    written_off_at: None,
                    write_off_reason: None,
                    closed_at: None,
                    version: 1,
                },
            ),
            LoanEvent::Approved(e) => self.update(tenant_id, loan_id, |l| {
                l.approved_by = Some(e.approved_by);
                l.approved_at = Some(e.occurred_at);
            }),
            LoanEvent::Rejected(e) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Closed;
                l.closure = Some(ClosureReason::Rejected);
                l.rejected_by = Some(e.rejected_by);
                l.rejected_at = Some(e.occurred_at);
                l.rejection_reason = Some(e.reason);
                l.closed_at = Some(e.occurred_at);
            }),
            LoanEvent::Disbursed(e) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Active;
                l.disbursed_by = Some(e.disbursed_by);
                l.disbursed_at = Some(e.occurred_at);
                l.disbursement_batch = e.batch_id;
                l.outstanding = Outstanding {
                    penalty: Money::ZERO,
                    fee: e.processing_fee,
                    interest: e.schedule.iter().map(|i| i.interest).sum(),
                    principal: e.principal,
                };
                l.schedule = e.schedule;
            }),
            LoanEvent::RepaymentRecorded(e) => self.update(tenant_id, loan_id, |l| {
                l.outstanding.pay(&e.payment.allocation);
                l.payments.push(e.payment);
            }),
            LoanEvent::RepaymentReversed(e) => self.update(tenant_id, loan_id, |l| {
                l.outstanding.restore(&e.allocation);
                if let Some(p) = l.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                    p.reversed = true;
                    p.reversed_at = Some(e.occurred_at);
                    p.reversed_by = Some(e.reversed_by);
                    p.reversal_reason = Some(e.reason);
                }
            }),
            LoanEvent::PenaltyAssessed(e) => self.update(tenant_id, loan_id, |l| {
                l.outstanding.penalty += e.amount;
                l.penalties_assessed += e.amount;
            }),
            LoanEvent::MarkedDelinquent(e) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Delinquent;
                l.delinquent_as_of = Some(e.as_of);
            }),
            LoanEvent::DelinquencyCured(_) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Active;
                l.delinquent_as_of = None;
            }),
            LoanEvent::WrittenOff(e) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Closed;
                l.closure = Some(ClosureReason::WrittenOff);
                l.outstanding = Outstanding::default();
                l.written_off_at = Some(e.occurred_at);
                l.write_off_reason = Some(e.reason);
                l.closed_at = Some(e.occurred_at);
            }),
            LoanEvent::Closed(e) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Closed;
                l.closure = Some(e.reason);
                l.closed_at = Some(e.occurred_at);
            }),
            LoanEvent::Reopened(_) => self.update(tenant_id, loan_id, |l| {
                l.status = LoanStatus::Active;
                l.closure = None;
                l.closed_at = None;
            }),
        }

        self.cursors.advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
