use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use microfin_borrowers::BorrowerId;
use microfin_core::{BranchId, Money, TenantId, UserId};
use microfin_events::EventEnvelope;
use microfin_savings::{SavingsAccountId, SavingsEvent, SavingsStatus, SavingsTransaction};

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_aggregate, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SavingsAccountReadModel {
    pub account_id: SavingsAccountId,
    pub owner: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub status: SavingsStatus,
    pub balance: Money,
    pub minimum_balance: Money,
    pub transactions: Vec<SavingsTransaction>,
    pub opened_by: UserId,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
pub struct SavingsProjection<S = InMemoryTenantStore<SavingsAccountId, SavingsAccountReadModel>> {
    store: S,
    cursors: StreamCursors,
}

impl Default for SavingsProjection {
    fn default() -> Self {
        Self::new(InMemoryTenantStore::new())
    }
}

impl<S> SavingsProjection<S>
where
    S: TenantStore<SavingsAccountId, SavingsAccountReadModel>,
{
    pub fn new(store: S) -> Self {
        Self { store, cursors: StreamCursors::new("savings.accounts") }
    }

    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    pub fn get(&self, tenant_id: TenantId, account_id: &SavingsAccountId) -> Option<SavingsAccountReadModel> {
        self.store.get(tenant_id, account_id)
    }

    pub fn list(&self, tenant_id: TenantId, branch: Option<BranchId>) -> Vec<SavingsAccountReadModel> {
        let mut rows: Vec<_> = self
            .store
            .list(tenant_id)
            .into_iter()
            .filter(|a| branch.is_none() || a.branch_id == branch)
            .collect();
        rows.sort_by_key(|a| a.opened_at);
        rows
    }
}

impl<S> Projection for SavingsProjection<S>
where
    S: TenantStore<SavingsAccountId, SavingsAccountReadModel>,
{
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<SavingsEvent>(&self.cursors, aggregate_types::SAVINGS_ACCOUNT, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        let (event_tenant, account_id) = match &ev {
            SavingsEvent::Opened(e) => (e.tenant_id, e.account_id),
            SavingsEvent::TransactionPosted(e) => (e.tenant_id, e.account_id),
            SavingsEvent::TransactionReversed(e) => (e.tenant_id, e.account_id),
            SavingsEvent::Closed(e) => (e.tenant_id, e.account_id),
        };
        ensure_tenant(event_tenant, envelope)?;
        ensure_aggregate(account_id.0, envelope)?;

        if let SavingsEvent::Opened(e) = ev {
            self.store.upsert(
                tenant_id,
                account_id,
                SavingsAccountReadModel {
                    account_id,
                    owner: e.owner,
                    branch_id: e.branch_id,
                    status: SavingsStatus::Open,
                    balance: Money::ZERO,
                    minimum_balance: e.minimum_balance,
                    transactions: Vec::new(),
                    opened_by: e.opened_by,
                    opened_at: e.occurred_at,
                    closed_at: None,
                },
            );
        } else if let Some(mut row) = self.store.get(tenant_id, &account_id) {
            match ev {
                SavingsEvent::TransactionPosted(e) => {
                    row.balance = e.balance_after;
                    row.transactions.push(e.transaction);
                }
                SavingsEvent::TransactionReversed(e) => {
                    row.balance = e.balance_after;
                    if let Some(t) = row.transactions.iter_mut().find(|t| t.txn_id == e.txn_id) {
                        t.reversed = true;
                        t.reversed_at = Some(e.occurred_at);
                        t.reversed_by = Some(e.by);
                        t.reversal_reason = Some(e.reason);
                    }
                }
                SavingsEvent::Closed(e) => {
                    row.status = SavingsStatus::Closed;
                    row.closed_at = Some(e.occurred_at);
                }
                SavingsEvent::Opened(_) => {}
            }
            self.store.upsert(tenant_id, account_id, row);
        }

        self.cursors.advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.store.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}
