//! General ledger read models: account balances, the journal and the trial balance.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use microfin_accounting::{Account, JournalEntryLine, LedgerEvent, chart_of_accounts};
use microfin_core::{Money, TenantId};
use microfin_events::EventEnvelope;

use super::{Projection, ProjectionCursorStore, ProjectionError, StreamCursors, accept, ensure_tenant};
use crate::aggregate_types;
use crate::read_model::{InMemoryTenantStore, TenantStore};

/// Running totals of one account. `balance` is debit-positive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub account: Account,
    pub debit_total: Money,
    pub credit_total: Money,
    pub balance: Money,
}

impl AccountBalance {
    fn opening(account: Account) -> Self {
        Self { account, debit_total: Money::ZERO, credit_total: Money::ZERO, balance: Money::ZERO }
    }

    fn post(&mut self, line: &JournalEntryLine) {
        self.debit_total += line.debit;
        self.credit_total += line.credit;
        self.balance += line.signed();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JournalEntryReadModel {
    pub entry_id: Uuid,
    pub reference: String,
    pub memo: Option<String>,
    pub lines: Vec<JournalEntryLine>,
    pub posted_at: DateTime<Utc>,
    /// Set on an original entry once it has been reversed.
    pub reversed_by: Option<Uuid>,
    /// Set on a mirror entry: the entry it reverses.
    pub reversal_of: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalanceRow {
    pub code: String,
    pub name: String,
    pub debit: Money,
    pub credit: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TrialBalance {
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub balanced: bool,
}

#[derive(Debug)]
pub struct LedgerProjection {
    balances: InMemoryTenantStore<String, AccountBalance>,
    journal: InMemoryTenantStore<Uuid, JournalEntryReadModel>,
    cursors: StreamCursors,
}

impl Default for LedgerProjection {
    fn default() -> Self {
        Self {
            balances: InMemoryTenantStore::new(),
            journal: InMemoryTenantStore::new(),
            cursors: StreamCursors::new("accounting.ledger"),
        }
    }
}

impl LedgerProjection {
    pub fn with_cursor_store(mut self, store: Arc<dyn ProjectionCursorStore>) -> Self {
        self.cursors = self.cursors.with_store(store);
        self
    }

    /// Balance of one account; accounts never posted to read as zero.
    pub fn balance(&self, tenant_id: TenantId, code: &str) -> Option<AccountBalance> {
        self.balances.get(tenant_id, &code.to_string()).or_else(|| {
            chart_of_accounts()
                .into_iter()
                .find(|a| a.code == code)
                .map(AccountBalance::opening)
        })
    }

    /// Every chart account, in chart order.
    pub fn balances(&self, tenant_id: TenantId) -> Vec<AccountBalance> {
        chart_of_accounts()
            .into_iter()
            .map(|account| {
                self.balances
                    .get(tenant_id, &account.code)
                    .unwrap_or_else(|| AccountBalance::opening(account))
            })
            .collect()
    }

    pub fn entry(&self, tenant_id: TenantId, entry_id: Uuid) -> Option<JournalEntryReadModel> {
        self.journal.get(tenant_id, &entry_id)
    }

    /// Journal in posting order.
    pub fn journal(&self, tenant_id: TenantId) -> Vec<JournalEntryReadModel> {
        let mut entries = self.journal.list(tenant_id);
        entries.sort_by(|a, b| a.posted_at.cmp(&b.posted_at).then(a.entry_id.cmp(&b.entry_id)));
        entries
    }

    pub fn trial_balance(&self, tenant_id: TenantId) -> TrialBalance {
        let rows: Vec<TrialBalanceRow> = self
            .balances(tenant_id)
            .into_iter()
            .filter(|b| !b.balance.is_zero())
            .map(|b| {
                let (debit, credit) = if b.balance.is_positive() {
                    (b.balance, Money::ZERO)
                } else {
                    (Money::ZERO, -b.balance)
                };
                TrialBalanceRow { code: b.account.code, name: b.account.name, debit, credit }
            })
            .collect();

        let total_debit: Money = rows.iter().map(|r| r.debit).sum();
        let total_credit: Money = rows.iter().map(|r| r.credit).sum();
        TrialBalance { balanced: total_debit == total_credit, rows, total_debit, total_credit }
    }

    fn post_lines(&self, tenant_id: TenantId, lines: &[JournalEntryLine]) {
        for line in lines {
            let mut balance = self
                .balances
                .get(tenant_id, &line.account.code)
                .unwrap_or_else(|| AccountBalance::opening(line.account.clone()));
            balance.post(line);
            self.balances.upsert(tenant_id, line.account.code.clone(), balance);
        }
    }
}

impl Projection for LedgerProjection {
    fn name(&self) -> &'static str {
        self.cursors.projection_name()
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let Some(ev) = accept::<LedgerEvent>(&self.cursors, aggregate_types::LEDGER, envelope)? else {
            return Ok(());
        };
        let tenant_id = envelope.tenant_id();

        match ev {
            LedgerEvent::JournalEntryPosted(e) => {
                ensure_tenant(e.tenant_id, envelope)?;
                self.post_lines(tenant_id, &e.lines);
                self.journal.upsert(
                    tenant_id,
                    e.entry_id,
                    JournalEntryReadModel {
                        entry_id: e.entry_id,
                        reference: e.reference,
                        memo: e.memo,
                        lines: e.lines,
                        posted_at: e.occurred_at,
                        reversed_by: None,
                        reversal_of: None,
                    },
                );
            }
            LedgerEvent::JournalEntryReversed(e) => {
                ensure_tenant(e.tenant_id, envelope)?;
                self.post_lines(tenant_id, &e.lines);

                let reference = match self.journal.get(tenant_id, &e.entry_id) {
                    Some(mut original) => {
                        original.reversed_by = Some(e.reversal_id);
                        let reference = format!("reversal of {}", original.reference);
                        self.journal.upsert(tenant_id, e.entry_id, original);
                        reference
                    }
                    None => format!("reversal of {}", e.entry_id),
                };
                self.journal.upsert(
                    tenant_id,
                    e.reversal_id,
                    JournalEntryReadModel {
                        entry_id: e.reversal_id,
                        reference,
                        memo: Some(e.reason),
                        lines: e.lines,
                        posted_at: e.occurred_at,
                        reversed_by: None,
                        reversal_of: Some(e.entry_id),
                    },
                );
            }
        }

        self.cursors.advance(tenant_id, envelope.aggregate_id(), envelope.sequence_number());
        Ok(())
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        self.balances.clear_tenant(tenant_id);
        self.journal.clear_tenant(tenant_id);
        self.cursors.clear_tenant(tenant_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microfin_accounting::chart::{CASH, LOAN_PORTFOLIO};
    use microfin_accounting::{JournalEntryPosted, JournalEntryReversed, ledger_aggregate_id, lookup_account};

    use crate::projections::envelope_for;

    fn line(code: &str, debit: i64, credit: i64) -> JournalEntryLine {
        JournalEntryLine {
            account: lookup_account(code).unwrap(),
            debit: Money::from_minor(debit),
            credit: Money::from_minor(credit),
        }
    }

    #[test]
    fn reversal_nets_balances_and_links_entries() {
        let projection = LedgerProjection::default();
        let t = TenantId::new();
        let entry_id = Uuid::now_v7();
        let reversal_id = Uuid::now_v7();
        let lines = vec![line(LOAN_PORTFOLIO, 10_000, 0), line(CASH, 0, 10_000)];

        let posted = LedgerEvent::JournalEntryPosted(JournalEntryPosted {
            tenant_id: t,
            entry_id,
            reference: "loan disbursement".into(),
            memo: None,
            lines: lines.clone(),
            occurred_at: Utc::now(),
        });
        projection
            .apply_envelope(&envelope_for(t, ledger_aggregate_id(), aggregate_types::LEDGER, 1, &posted))
            .unwrap();

        assert_eq!(projection.balance(t, CASH).unwrap().balance, Money::from_minor(-10_000));
        let tb = projection.trial_balance(t);
        assert!(tb.balanced);
        assert_eq!(tb.total_debit, Money::from_minor(10_000));

        let reversed = LedgerEvent::JournalEntryReversed(JournalEntryReversed {
            tenant_id: t,
            entry_id,
            reversal_id,
            reason: "keyed twice".into(),
            lines: lines.iter().map(JournalEntryLine::mirrored).collect(),
            occurred_at: Utc::now(),
        });
        projection
            .apply_envelope(&envelope_for(t, ledger_aggregate_id(), aggregate_types::LEDGER, 2, &reversed))
            .unwrap();

        assert!(projection.balances(t).iter().all(|b| b.balance.is_zero()));
        assert_eq!(projection.entry(t, entry_id).unwrap().reversed_by, Some(reversal_id));
        assert_eq!(projection.entry(t, reversal_id).unwrap().reversal_of, Some(entry_id));
        assert_eq!(projection.journal(t).len(), 2);
    }

    #[test]
    fn untouched_accounts_read_as_zero() {
        let projection = LedgerProjection::default();
        let t = TenantId::new();
        assert_eq!(projection.balances(t).len(), chart_of_accounts().len());
        assert!(projection.balance(t, CASH).unwrap().balance.is_zero());
        assert!(projection.balance(t, "9999").is_none());
        assert!(projection.trial_balance(t).rows.is_empty());
    }
}
