use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use microfin_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use microfin_events::Event;

use crate::chart::Account;

/// The tenant's general ledger is a single stream.
pub fn ledger_aggregate_id() -> AggregateId {
    AggregateId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, b"microfin.ledger.general"))
}

/// One row of a journal entry.
///
/// Exactly one of `debit` / `credit` is positive; the other is zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryLine {
    pub account: Account,
    pub debit: Money,
    pub credit: Money,
}

impl JournalEntryLine {
    pub fn debit(account: Account, amount: Money) -> Self {
        Self { account, debit: amount, credit: Money::ZERO }
    }

    pub fn credit(account: Account, amount: Money) -> Self {
        Self { account, debit: Money::ZERO, credit: amount }
    }

    pub fn is_debit(&self) -> bool {
        self.debit.is_positive()
    }

    /// Debit-positive signed amount.
    pub fn signed(&self) -> Money {
        self.debit - self.credit
    }

    /// Same amount on the opposite side.
    pub fn mirrored(&self) -> Self {
        Self { account: self.account.clone(), debit: self.credit, credit: self.debit }
    }

    pub fn validate(&self) -> Result<(), DomainError> {
        if self.debit.is_negative() || self.credit.is_negative() {
            return Err(DomainError::validation("line amounts cannot be negative"));
        }
        if self.debit.is_positive() == self.credit.is_positive() {
            return Err(DomainError::validation(format!(
                "line on account {} must have exactly one of debit or credit",
                self.account.code
            )));
        }
        Ok(())
    }
}

/// Aggregate root: the tenant's general ledger.
///
/// Holds no balances; those come from projections over posted entries. Keeps
/// enough to enforce unique entry ids and reverse an entry exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    entries: HashMap<Uuid, Vec<JournalEntryLine>>,
    reversed: HashSet<Uuid>,
    version: u64,
}

impl Ledger {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            entries: HashMap::new(),
            reversed: HashSet::new(),
            version: 0,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn has_entry(&self, entry_id: Uuid) -> bool {
        self.entries.contains_key(&entry_id)
    }

    pub fn is_reversed(&self, entry_id: Uuid) -> bool {
        self.reversed.contains(&entry_id)
    }
}

impl AggregateRoot for Ledger {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostJournalEntry {
    pub tenant_id: TenantId,
    pub entry_id: Uuid,
    /// Business reference (e.g. "loan:<id>:repayment:<payment>").
    pub reference: String,
    pub memo: Option<String>,
    pub lines: Vec<JournalEntryLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseJournalEntry {
    pub tenant_id: TenantId,
    pub entry_id: Uuid,
    pub reversal_id: Uuid,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerCommand {
    Post(PostJournalEntry),
    Reverse(ReverseJournalEntry),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryPosted {
    pub tenant_id: TenantId,
    pub entry_id: Uuid,
    pub reference: String,
    pub memo: Option<String>,
    pub lines: Vec<JournalEntryLine>,
    pub occurred_at: DateTime<Utc>,
}

/// The mirror entry posted by a reversal (`lines` already swapped).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntryReversed {
    pub tenant_id: TenantId,
    pub entry_id: Uuid,
    pub reversal_id: Uuid,
    pub reason: String,
    pub lines: Vec<JournalEntryLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerEvent {
    JournalEntryPosted(JournalEntryPosted),
    JournalEntryReversed(JournalEntryReversed),
}

impl Event for LedgerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LedgerEvent::JournalEntryPosted(_) => "accounting.ledger.journal_entry_posted",
            LedgerEvent::JournalEntryReversed(_) => "accounting.ledger.journal_entry_reversed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LedgerEvent::JournalEntryPosted(e) => e.occurred_at,
            LedgerEvent::JournalEntryReversed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Ledger {
    type Command = LedgerCommand;
    type Event = LedgerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LedgerEvent::JournalEntryPosted(e) => {
                self.tenant_id.get_or_insert(e.tenant_id);
                self.entries.insert(e.entry_id, e.lines.clone());
            }
            LedgerEvent::JournalEntryReversed(e) => {
                self.reversed.insert(e.entry_id);
                self.entries.insert(e.reversal_id, e.lines.clone());
                // A reversal entry is final: it cannot be reversed itself.
                self.reversed.insert(e.reversal_id);
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LedgerCommand::Post(cmd) => self.handle_post(cmd),
            LedgerCommand::Reverse(cmd) => self.handle_reverse(cmd),
        }
    }
}

/// Σ debit = Σ credit and every line valid.
pub fn validate_lines(lines: &[JournalEntryLine]) -> Result<(), DomainError> {
    if lines.is_empty() {
        return Err(DomainError::validation("journal entry must have lines"));
    }

    let mut debit_total: i128 = 0;
    let mut credit_total: i128 = 0;
    for line in lines {
        line.validate()?;
        debit_total += i128::from(line.debit.minor());
        credit_total += i128::from(line.credit.minor());
    }

    if debit_total != credit_total {
        return Err(DomainError::invariant("debits must equal credits"));
    }
    Ok(())
}

impl Ledger {
    fn ensure_tenant(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        match self.tenant_id {
            Some(t) if t != tenant_id => Err(DomainError::invariant("tenant mismatch")),
            _ => Ok(()),
        }
    }

    fn handle_post(&self, cmd: &PostJournalEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        if self.entries.contains_key(&cmd.entry_id) {
            return Err(DomainError::conflict(format!("journal entry {} already posted", cmd.entry_id)));
        }
        if cmd.reference.trim().is_empty() {
            return Err(DomainError::validation("reference cannot be empty"));
        }
        validate_lines(&cmd.lines)?;

        Ok(vec![LedgerEvent::JournalEntryPosted(JournalEntryPosted {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            reference: cmd.reference.trim().to_string(),
            memo: cmd.memo.clone(),
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reverse(&self, cmd: &ReverseJournalEntry) -> Result<Vec<LedgerEvent>, DomainError> {
        self.ensure_tenant(cmd.tenant_id)?;
        let Some(lines) = self.entries.get(&cmd.entry_id) else {
            return Err(DomainError::NotFound);
        };
        if self.reversed.contains(&cmd.entry_id) {
            return Err(DomainError::invariant("journal entry already reversed"));
        }
        if self.entries.contains_key(&cmd.reversal_id) {
            return Err(DomainError::conflict(format!("journal entry {} already posted", cmd.reversal_id)));
        }

        Ok(vec![LedgerEvent::JournalEntryReversed(JournalEntryReversed {
            tenant_id: cmd.tenant_id,
            entry_id: cmd.entry_id,
            reversal_id: cmd.reversal_id,
            reason: cmd.reason.clone(),
            lines: lines.iter().map(JournalEntryLine::mirrored).collect(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{CASH, LOAN_PORTFOLIO, known};
    use microfin_events::execute;
    use proptest::prelude::*;

    fn post(tenant_id: TenantId, lines: Vec<JournalEntryLine>) -> LedgerCommand {
        LedgerCommand::Post(PostJournalEntry {
            tenant_id,
            entry_id: Uuid::now_v7(),
            reference: "manual".into(),
            memo: None,
            lines,
            occurred_at: Utc::now(),
        })
    }

    fn balanced(amount: i64) -> Vec<JournalEntryLine> {
        vec![
            JournalEntryLine::debit(known(LOAN_PORTFOLIO), Money::from_minor(amount)),
            JournalEntryLine::credit(known(CASH), Money::from_minor(amount)),
        ]
    }

    #[test]
    fn balanced_entry_posts() {
        let ledger = Ledger::empty(ledger_aggregate_id());
        let tenant_id = TenantId::new();
        let events = ledger.handle(&post(tenant_id, balanced(100))).unwrap();
        let LedgerEvent::JournalEntryPosted(e) = &events[0] else {
            panic!("expected JournalEntryPosted");
        };
        assert_eq!(e.tenant_id, tenant_id);
        assert_eq!(e.lines, balanced(100));
    }

    #[test]
    fn unbalanced_entry_is_rejected() {
        let ledger = Ledger::empty(ledger_aggregate_id());
        let lines = vec![
            JournalEntryLine::debit(known(LOAN_PORTFOLIO), Money::from_minor(100)),
            JournalEntryLine::credit(known(CASH), Money::from_minor(90)),
        ];
        let err = ledger.handle(&post(TenantId::new(), lines)).unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(m) if m.contains("debits must equal credits")));
    }

    #[test]
    fn line_with_both_sides_is_rejected() {
        let ledger = Ledger::empty(ledger_aggregate_id());
        let both = JournalEntryLine {
            account: known(CASH),
            debit: Money::from_minor(5),
            credit: Money::from_minor(5),
        };
        let neither = JournalEntryLine { account: known(CASH), debit: Money::ZERO, credit: Money::ZERO };
        assert!(matches!(ledger.handle(&post(TenantId::new(), vec![both])), Err(DomainError::Validation(_))));
        assert!(matches!(ledger.handle(&post(TenantId::new(), vec![neither])), Err(DomainError::Validation(_))));
    }

    #[test]
    fn duplicate_entry_id_conflicts() {
        let tenant_id = TenantId::new();
        let mut ledger = Ledger::empty(ledger_aggregate_id());
        let cmd = post(tenant_id, balanced(10));
        execute(&mut ledger, &cmd).unwrap();
        assert!(matches!(ledger.handle(&cmd), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn reversal_mirrors_once() {
        let tenant_id = TenantId::new();
        let mut ledger = Ledger::empty(ledger_aggregate_id());
        let cmd = post(tenant_id, balanced(250));
        execute(&mut ledger, &cmd).unwrap();
        let LedgerCommand::Post(p) = &cmd else { unreachable!() };

        let reverse = LedgerCommand::Reverse(ReverseJournalEntry {
            tenant_id,
            entry_id: p.entry_id,
            reversal_id: Uuid::now_v7(),
            reason: "keyed twice".into(),
            occurred_at: Utc::now(),
        });
        let events = execute(&mut ledger, &reverse).unwrap();
        let LedgerEvent::JournalEntryReversed(r) = &events[0] else {
            panic!("expected JournalEntryReversed");
        };
        let net: Money = p.lines.iter().chain(&r.lines).map(|l| l.signed()).sum();
        assert_eq!(net, Money::ZERO);
        assert!(r.lines[0].credit.is_positive());
        assert!(ledger.is_reversed(p.entry_id));

        let again = LedgerCommand::Reverse(ReverseJournalEntry {
            tenant_id,
            entry_id: p.entry_id,
            reversal_id: Uuid::now_v7(),
            reason: "again".into(),
            occurred_at: Utc::now(),
        });
        assert!(ledger.handle(&again).is_err());
    }

    #[test]
    fn other_tenant_cannot_post() {
        let mut ledger = Ledger::empty(ledger_aggregate_id());
        execute(&mut ledger, &post(TenantId::new(), balanced(1))).unwrap();
        assert!(ledger.handle(&post(TenantId::new(), balanced(1))).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, ..ProptestConfig::default() })]

        #[test]
        fn accepted_entries_always_balance(
            amounts in prop::collection::vec(1i64..1_000_000i64, 1..6),
            skew in -2i64..3i64,
        ) {
            let total: i64 = amounts.iter().sum();
            let mut lines: Vec<JournalEntryLine> = amounts
                .iter()
                .map(|a| JournalEntryLine::debit(known(LOAN_PORTFOLIO), Money::from_minor(*a)))
                .collect();
            lines.push(JournalEntryLine::credit(known(CASH), Money::from_minor(total + skew)));

            let ledger = Ledger::empty(ledger_aggregate_id());
            match ledger.handle(&post(TenantId::new(), lines)) {
                Ok(events) => {
                    prop_assert_eq!(skew, 0);
                    let LedgerEvent::JournalEntryPosted(e) = &events[0] else {
                        return Err(TestCaseError::fail("expected JournalEntryPosted"));
                    };
                    let net: Money = e.lines.iter().map(|l| l.signed()).sum();
                    prop_assert_eq!(net, Money::ZERO);
                }
                Err(_) => prop_assert_ne!(skew, 0),
            }
        }
    }
}
