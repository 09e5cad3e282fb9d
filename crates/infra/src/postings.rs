//! Ledger postings derived from committed business events.
//!
//! Every loan, savings and payroll event with a cash or accrual effect maps to
//! one journal entry. The entry id is derived from the source event id, so
//! posting the same event twice is a no-op.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};
use uuid::Uuid;

use microfin_accounting::posting::{self, RepaymentParts};
use microfin_accounting::{JournalEntryLine, Ledger, LedgerCommand, PostJournalEntry, ledger_aggregate_id};
use microfin_events::{EventBus, EventEnvelope};
use microfin_lending::{Allocation, LoanEvent};
use microfin_payroll::PayrollEvent;
use microfin_savings::{SavingsEvent, TransactionKind};

use crate::aggregate_types;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{EventStore, StoredEvent};

const MAX_ATTEMPTS: usize = 3;

/// Deterministic journal entry id for a source event.
pub fn entry_id_for(source_event_id: Uuid) -> Uuid {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, source_event_id.as_bytes())
}

fn parts(a: &Allocation) -> RepaymentParts {
    RepaymentParts { penalty: a.penalty, fee: a.fee, interest: a.interest, principal: a.principal }
}

fn entry(
    stored: &StoredEvent,
    reference: String,
    memo: Option<String>,
    lines: Vec<JournalEntryLine>,
    occurred_at: DateTime<Utc>,
) -> Option<PostJournalEntry> {
    if lines.is_empty() {
        return None;
    }
    Some(PostJournalEntry {
        tenant_id: stored.tenant_id,
        entry_id: entry_id_for(stored.event_id),
        reference,
        memo,
        lines,
        occurred_at,
    })
}

/// The journal entry a committed event implies, if any.
pub fn journal_entry_for(stored: &StoredEvent) -> Result<Option<PostJournalEntry>, serde_json::Error> {
    match stored.aggregate_type.as_str() {
        aggregate_types::LOAN => loan_entry(stored, stored.decode()?),
        aggregate_types::SAVINGS_ACCOUNT => savings_entry(stored, stored.decode()?),
        aggregate_types::PAYROLL_RUN => payroll_entry(stored, stored.decode()?),
        _ => Ok(None),
    }
}

fn loan_entry(stored: &StoredEvent, ev: LoanEvent) -> Result<Option<PostJournalEntry>, serde_json::Error> {
    Ok(match ev {
        LoanEvent::Disbursed(e) => entry(
            stored,
            format!("loan:{}:disbursement", e.loan_id),
            None,
            posting::disbursement(e.principal, e.processing_fee),
            e.occurred_at,
        ),
        LoanEvent::RepaymentRecorded(e) => entry(
            stored,
            format!("loan:{}:repayment:{}", e.loan_id, e.payment.payment_id),
            None,
            posting::repayment(parts(&e.payment.allocation)),
            e.occurred_at,
        ),
        LoanEvent::RepaymentReversed(e) => entry(
            stored,
            format!("loan:{}:repayment:{}:reversal", e.loan_id, e.payment_id),
            Some(e.reason),
            posting::repayment_reversal(parts(&e.allocation)),
            e.occurred_at,
        ),
        LoanEvent::PenaltyAssessed(e) => entry(
            stored,
            format!("loan:{}:penalty", e.loan_id),
            Some(e.reason),
            posting::penalty_assessed(e.amount),
            e.occurred_at,
        ),
        LoanEvent::WrittenOff(e) => entry(
            stored,
            format!("loan:{}:write_off", e.loan_id),
            Some(e.reason),
            posting::write_off(e.outstanding.principal, e.outstanding.fee, e.outstanding.penalty),
            e.occurred_at,
        ),
        _ => None,
    })
}

fn savings_entry(stored: &StoredEvent, ev: SavingsEvent) -> Result<Option<PostJournalEntry>, serde_json::Error> {
    Ok(match ev {
        SavingsEvent::TransactionPosted(e) => {
            let (label, lines) = match e.transaction.kind {
                TransactionKind::Deposit => ("deposit", posting::savings_deposit(e.transaction.amount)),
                TransactionKind::Withdrawal => ("withdrawal", posting::savings_withdrawal(e.transaction.amount)),
            };
            entry(
                stored,
                format!("savings:{}:{label}:{}", e.account_id, e.transaction.txn_id),
                None,
                lines,
                e.occurred_at,
            )
        }
        SavingsEvent::TransactionReversed(e) => entry(
            stored,
            format!("savings:{}:reversal:{}", e.account_id, e.txn_id),
            Some(e.reason),
            posting::savings_reversal(e.kind == TransactionKind::Deposit, e.amount),
            e.occurred_at,
        ),
        _ => None,
    })
}

fn payroll_entry(stored: &StoredEvent, ev: PayrollEvent) -> Result<Option<PostJournalEntry>, serde_json::Error> {
    Ok(match ev {
        PayrollEvent::Posted(e) => entry(
            stored,
            format!("payroll:{}", e.run_id),
            None,
            posting::payroll(e.gross, e.net),
            e.occurred_at,
        ),
        _ => None,
    })
}

/// Post the journal entries implied by `committed`, skipping entries already on the ledger.
///
/// The ledger is one stream per tenant, so a stale version is retried a few times
/// before giving up.
pub fn post_derived_entries<S, B>(
    dispatcher: &CommandDispatcher<S, B>,
    committed: &[StoredEvent],
) -> Result<Vec<StoredEvent>, DispatchError>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    let mut posted = Vec::new();

    for stored in committed {
        let Some(cmd) = journal_entry_for(stored).map_err(|e| DispatchError::Deserialize(e.to_string()))? else {
            continue;
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let ledger: Ledger = dispatcher.load(cmd.tenant_id, ledger_aggregate_id(), |_, id| Ledger::empty(id))?;
            if ledger.has_entry(cmd.entry_id) {
                debug!(entry_id = %cmd.entry_id, "journal entry already posted");
                break;
            }

            match dispatcher.dispatch(
                cmd.tenant_id,
                ledger_aggregate_id(),
                aggregate_types::LEDGER,
                LedgerCommand::Post(cmd.clone()),
                |_, id| Ledger::empty(id),
            ) {
                Ok(events) => {
                    posted.extend(events);
                    break;
                }
                Err(DispatchError::Concurrency(msg)) if attempt < MAX_ATTEMPTS => {
                    warn!(attempt, error = %msg, "ledger stream moved; retrying posting");
                }
                Err(err) => return Err(err),
            }
        }
    }

    Ok(posted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use microfin_core::{AggregateId, Money, TenantId, UserId};
    use microfin_events::InMemoryEventBus;
    use microfin_lending::PenaltyAssessed;

    use crate::event_store::{InMemoryEventStore, UncommittedEvent};

    fn penalty_event(tenant_id: TenantId, loan: AggregateId) -> UncommittedEvent {
        let ev = LoanEvent::PenaltyAssessed(PenaltyAssessed {
            tenant_id,
            loan_id: microfin_lending::LoanId(loan),
            amount: Money::from_minor(250),
            reason: "late".into(),
            occurred_at: Utc::now(),
        });
        UncommittedEvent::from_typed(tenant_id, loan, aggregate_types::LOAN, Uuid::now_v7(), &ev).unwrap()
    }

    #[test]
    fn derived_entries_are_posted_once() {
        let dispatcher = CommandDispatcher::new(
            InMemoryEventStore::new(),
            InMemoryEventBus::<EventEnvelope<JsonValue>>::new(),
        );
        let tenant_id = TenantId::new();
        let loan = AggregateId::new();
        let committed = dispatcher
            .store()
            .append(vec![penalty_event(tenant_id, loan)], microfin_core::ExpectedVersion::Exact(0))
            .unwrap();

        let first = post_derived_entries(&dispatcher, &committed).unwrap();
        assert_eq!(first.len(), 1);
        let again = post_derived_entries(&dispatcher, &committed).unwrap();
        assert!(again.is_empty());

        let ledger: Ledger = dispatcher.load(tenant_id, ledger_aggregate_id(), |_, id| Ledger::empty(id)).unwrap();
        assert_eq!(ledger.entry_count(), 1);
        assert!(ledger.has_entry(entry_id_for(committed[0].event_id)));
    }

    #[test]
    fn events_without_money_movement_post_nothing() {
        let tenant_id = TenantId::new();
        let run = AggregateId::new();
        let ev = PayrollEvent::Approved(microfin_payroll::RunApproved {
            tenant_id,
            run_id: microfin_payroll::PayrollRunId(run),
            approved_by: UserId::new(),
            occurred_at: Utc::now(),
        });
        let stored = StoredEvent {
            event_id: Uuid::now_v7(),
            tenant_id,
            aggregate_id: run,
            aggregate_type: aggregate_types::PAYROLL_RUN.into(),
            sequence_number: 2,
            event_type: "payroll.run.approved".into(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::to_value(&ev).unwrap(),
        };
        assert!(journal_entry_for(&stored).unwrap().is_none());
    }
}
