use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use microfin_borrowers::BorrowerId;
use microfin_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, Money, TenantId, UserId};
use microfin_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SavingsAccountId(pub AggregateId);

impl SavingsAccountId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SavingsAccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SavingsStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
}

impl TransactionKind {
    /// Effect on the balance: deposits add, withdrawals subtract.
    fn signed(self, amount: Money) -> Money {
        match self {
            TransactionKind::Deposit => amount,
            TransactionKind::Withdrawal => -amount,
        }
    }
}

/// Append-only record. Reversal sets `reversed`; the row is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavingsTransaction {
    pub txn_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Money,
    pub at: DateTime<Utc>,
    pub by: UserId,
    pub reversed: bool,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<UserId>,
    pub reversal_reason: Option<String>,
}

/// Aggregate root: a borrower's savings account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavingsAccount {
    id: SavingsAccountId,
    tenant_id: Option<TenantId>,
    owner: Option<BorrowerId>,
    branch_id: Option<BranchId>,
    minimum_balance: Money,
    balance: Money,
    status: SavingsStatus,
    transactions: Vec<SavingsTransaction>,
    version: u64,
}

impl SavingsAccount {
    pub fn empty(id: SavingsAccountId) -> Self {
        Self {
            id,
            tenant_id: None,
            owner: None,
            branch_id: None,
            minimum_balance: Money::ZERO,
            balance: Money::ZERO,
            status: SavingsStatus::Open,
            transactions: Vec::new(),
            version: 0,
        }
    }

    pub fn owner(&self) -> Option<BorrowerId> {
        self.owner
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn balance(&self) -> Money {
        self.balance
    }

    pub fn minimum_balance(&self) -> Money {
        self.minimum_balance
    }

    pub fn status(&self) -> SavingsStatus {
        self.status
    }

    pub fn transactions(&self) -> &[SavingsTransaction] {
        &self.transactions
    }

    pub fn transaction(&self, txn_id: Uuid) -> Option<&SavingsTransaction> {
        self.transactions.iter().find(|t| t.txn_id == txn_id)
    }

    fn ensure_open(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if self.owner.is_none() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.status == SavingsStatus::Closed {
            return Err(DomainError::invariant("account is closed"));
        }
        Ok(())
    }

    fn ensure_new_txn(&self, txn_id: Uuid, amount: Money) -> Result<(), DomainError> {
        if self.transaction(txn_id).is_some() {
            return Err(DomainError::conflict(format!("transaction {txn_id} already recorded")));
        }
        if !amount.is_positive() {
            return Err(DomainError::validation("amount must be positive"));
        }
        Ok(())
    }
}

impl AggregateRoot for SavingsAccount {
    type Id = SavingsAccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenAccount {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub owner: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub minimum_balance: Money,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub txn_id: Uuid,
    pub amount: Money,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Withdraw {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub txn_id: Uuid,
    pub amount: Money,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseTransaction {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub txn_id: Uuid,
    pub reason: String,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseAccount {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsCommand {
    Open(OpenAccount),
    Deposit(Deposit),
    Withdraw(Withdraw),
    Reverse(ReverseTransaction),
    Close(CloseAccount),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpened {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub owner: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub minimum_balance: Money,
    pub opened_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionPosted {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub transaction: SavingsTransaction,
    pub balance_after: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReversed {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub txn_id: Uuid,
    pub kind: TransactionKind,
    pub amount: Money,
    pub reason: String,
    pub by: UserId,
    pub balance_after: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClosed {
    pub tenant_id: TenantId,
    pub account_id: SavingsAccountId,
    pub by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SavingsEvent {
    Opened(AccountOpened),
    TransactionPosted(TransactionPosted),
    TransactionReversed(TransactionReversed),
    Closed(AccountClosed),
}

impl Event for SavingsEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SavingsEvent::Opened(_) => "savings.account.opened",
            SavingsEvent::TransactionPosted(_) => "savings.account.transaction_posted",
            SavingsEvent::TransactionReversed(_) => "savings.account.transaction_reversed",
            SavingsEvent::Closed(_) => "savings.account.closed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SavingsEvent::Opened(e) => e.occurred_at,
            SavingsEvent::TransactionPosted(e) => e.occurred_at,
            SavingsEvent::TransactionReversed(e) => e.occurred_at,
            SavingsEvent::Closed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SavingsAccount {
    type Command = SavingsCommand;
    type Event = SavingsEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SavingsEvent::Opened(e) => {
                self.id = e.account_id;
                self.tenant_id = Some(e.tenant_id);
                self.owner = Some(e.owner);
                self.branch_id = e.branch_id;
                self.minimum_balance = e.minimum_balance;
                self.status = SavingsStatus::Open;
            }
            SavingsEvent::TransactionPosted(e) => {
                self.balance = e.balance_after;
                self.transactions.push(e.transaction.clone());
            }
            SavingsEvent::TransactionReversed(e) => {
                self.balance = e.balance_after;
                if let Some(t) = self.transactions.iter_mut().find(|t| t.txn_id == e.txn_id) {
                    t.reversed = true;
                    t.reversed_at = Some(e.occurred_at);
                    t.reversed_by = Some(e.by);
                    t.reversal_reason = Some(e.reason.clone());
                }
            }
            SavingsEvent::Closed(_) => self.status = SavingsStatus::Closed,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SavingsCommand::Open(cmd) => {
                if self.owner.is_some() {
                    return Err(DomainError::conflict("account already open"));
                }
                if cmd.minimum_balance.is_negative() {
                    return Err(DomainError::validation("minimum balance cannot be negative"));
                }
                Ok(vec![SavingsEvent::Opened(AccountOpened {
                    tenant_id: cmd.tenant_id,
                    account_id: cmd.account_id,
                    owner: cmd.owner,
                    branch_id: cmd.branch_id,
                    minimum_balance: cmd.minimum_balance,
                    opened_by: cmd.opened_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SavingsCommand::Deposit(cmd) => {
                self.ensure_open(cmd.tenant_id)?;
                self.ensure_new_txn(cmd.txn_id, cmd.amount)?;
                let balance_after = self
                    .balance
                    .checked_add(cmd.amount)
                    .ok_or_else(|| DomainError::validation("balance overflow"))?;
                Ok(vec![self.posted(cmd.tenant_id, TransactionKind::Deposit, cmd.txn_id, cmd.amount, cmd.by, cmd.occurred_at, balance_after)])
            }
            SavingsCommand::Withdraw(cmd) => {
                self.ensure_open(cmd.tenant_id)?;
                self.ensure_new_txn(cmd.txn_id, cmd.amount)?;
                let balance_after = self.balance - cmd.amount;
                if balance_after < self.minimum_balance {
                    return Err(DomainError::invariant(format!(
                        "withdrawal of {} would leave {} below the minimum balance {}",
                        cmd.amount, balance_after, self.minimum_balance
                    )));
                }
                Ok(vec![self.posted(cmd.tenant_id, TransactionKind::Withdrawal, cmd.txn_id, cmd.amount, cmd.by, cmd.occurred_at, balance_after)])
            }
            SavingsCommand::Reverse(cmd) => {
                self.ensure_open(cmd.tenant_id)?;
                let Some(txn) = self.transaction(cmd.txn_id) else {
                    return Err(DomainError::not_found());
                };
                if txn.reversed {
                    return Err(DomainError::invariant("transaction already reversed"));
                }
                let balance_after = self.balance - txn.kind.signed(txn.amount);
                if balance_after.is_negative() {
                    return Err(DomainError::invariant("reversal would make the balance negative"));
                }
                Ok(vec![SavingsEvent::TransactionReversed(TransactionReversed {
                    tenant_id: cmd.tenant_id,
                    account_id: self.id,
                    txn_id: cmd.txn_id,
                    kind: txn.kind,
                    amount: txn.amount,
                    reason: cmd.reason.clone(),
                    by: cmd.by,
                    balance_after,
                    occurred_at: cmd.occurred_at,
                })])
            }
            SavingsCommand::Close(cmd) => {
                self.ensure_open(cmd.tenant_id)?;
                if !self.balance.is_zero() {
                    return Err(DomainError::invariant(format!(
                        "balance must be zero to close (is {})",
                        self.balance
                    )));
                }
                Ok(vec![SavingsEvent::Closed(AccountClosed {
                    tenant_id: cmd.tenant_id,
                    account_id: self.id,
                    by: cmd.by,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl SavingsAccount {
    #[allow(clippy::too_many_arguments)]
    fn posted(
        &self,
        tenant_id: TenantId,
        kind: TransactionKind,
        txn_id: Uuid,
        amount: Money,
        by: UserId,
        at: DateTime<Utc>,
        balance_after: Money,
    ) -> SavingsEvent {
        SavingsEvent::TransactionPosted(TransactionPosted {
            tenant_id,
            account_id: self.id,
            transaction: SavingsTransaction {
                txn_id,
                kind,
                amount,
                at,
                by,
                reversed: false,
                reversed_at: None,
                reversed_by: None,
                reversal_reason: None,
            },
            balance_after,
            occurred_at: at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microfin_events::execute;
    use proptest::prelude::*;

    struct Fixture {
        tenant_id: TenantId,
        user: UserId,
        account: SavingsAccount,
    }

    fn m(v: i64) -> Money {
        Money::from_minor(v)
    }

    fn opened(minimum: i64) -> Fixture {
        let tenant_id = TenantId::new();
        let user = UserId::new();
        let id = SavingsAccountId::new(AggregateId::new());
        let mut account = SavingsAccount::empty(id);
        execute(
            &mut account,
            &SavingsCommand::Open(OpenAccount {
                tenant_id,
                account_id: id,
                owner: BorrowerId::new(AggregateId::new()),
                branch_id: None,
                minimum_balance: m(minimum),
                opened_by: user,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        Fixture { tenant_id, user, account }
    }

    fn deposit(f: &Fixture, amount: i64) -> (Uuid, SavingsCommand) {
        let txn_id = Uuid::now_v7();
        let cmd = SavingsCommand::Deposit(Deposit {
            tenant_id: f.tenant_id,
            account_id: *f.account.id(),
            txn_id,
            amount: m(amount),
            by: f.user,
            occurred_at: Utc::now(),
        });
        (txn_id, cmd)
    }

    fn withdraw(f: &Fixture, amount: i64) -> (Uuid, SavingsCommand) {
        let txn_id = Uuid::now_v7();
        let cmd = SavingsCommand::Withdraw(Withdraw {
            tenant_id: f.tenant_id,
            account_id: *f.account.id(),
            txn_id,
            amount: m(amount),
            by: f.user,
            occurred_at: Utc::now(),
        });
        (txn_id, cmd)
    }

    fn reverse(f: &Fixture, txn_id: Uuid) -> SavingsCommand {
        SavingsCommand::Reverse(ReverseTransaction {
            tenant_id: f.tenant_id,
            account_id: *f.account.id(),
            txn_id,
            reason: "teller error".into(),
            by: f.user,
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn withdrawal_respects_minimum_balance() {
        let mut f = opened(500);
        let (_, cmd) = deposit(&f, 2_000);
        execute(&mut f.account, &cmd).unwrap();

        let (_, too_much) = withdraw(&f, 1_501);
        assert!(matches!(f.account.handle(&too_much), Err(DomainError::InvariantViolation(_))));

        let (_, ok) = withdraw(&f, 1_500);
        execute(&mut f.account, &ok).unwrap();
        assert_eq!(f.account.balance(), m(500));
    }

    #[test]
    fn reversal_is_soft_and_once() {
        let mut f = opened(0);
        let (txn_id, cmd) = deposit(&f, 1_000);
        execute(&mut f.account, &cmd).unwrap();
        let cmd = reverse(&f, txn_id);
        execute(&mut f.account, &cmd).unwrap();

        assert_eq!(f.account.balance(), m(0));
        assert_eq!(f.account.transactions().len(), 1);
        assert!(f.account.transaction(txn_id).unwrap().reversed);
        assert!(f.account.handle(&reverse(&f, txn_id)).is_err());
    }

    #[test]
    fn deposit_reversal_cannot_go_negative() {
        let mut f = opened(0);
        let (dep, cmd) = deposit(&f, 1_000);
        execute(&mut f.account, &cmd).unwrap();
        let (wd, cmd) = withdraw(&f, 800);
        execute(&mut f.account, &cmd).unwrap();

        assert!(f.account.handle(&reverse(&f, dep)).is_err());
        let cmd = reverse(&f, wd);
        execute(&mut f.account, &cmd).unwrap();
        assert_eq!(f.account.balance(), m(1_000));
        let cmd = reverse(&f, dep);
        execute(&mut f.account, &cmd).unwrap();
        assert_eq!(f.account.balance(), m(0));
    }

    #[test]
    fn close_requires_zero_balance_and_blocks_further_use() {
        let mut f = opened(0);
        let (_, cmd) = deposit(&f, 10);
        execute(&mut f.account, &cmd).unwrap();
        let close = SavingsCommand::Close(CloseAccount {
            tenant_id: f.tenant_id,
            account_id: *f.account.id(),
            by: f.user,
            occurred_at: Utc::now(),
        });
        assert!(f.account.handle(&close).is_err());

        let (_, cmd) = withdraw(&f, 10);
        execute(&mut f.account, &cmd).unwrap();
        execute(&mut f.account, &close).unwrap();
        assert_eq!(f.account.status(), SavingsStatus::Closed);

        let (_, cmd) = deposit(&f, 10);
        assert!(f.account.handle(&cmd).is_err());
    }

    #[test]
    fn duplicate_txn_and_foreign_tenant() {
        let mut f = opened(0);
        let (_, cmd) = deposit(&f, 10);
        execute(&mut f.account, &cmd).unwrap();
        assert!(matches!(f.account.handle(&cmd), Err(DomainError::Conflict(_))));

        let foreign = SavingsCommand::Deposit(Deposit {
            tenant_id: TenantId::new(),
            account_id: *f.account.id(),
            txn_id: Uuid::now_v7(),
            amount: m(5),
            by: f.user,
            occurred_at: Utc::now(),
        });
        assert!(f.account.handle(&foreign).is_err());
    }

    proptest! {
        #[test]
        fn balance_never_below_minimum(minimum in 0i64..1_000, ops in prop::collection::vec((any::<bool>(), 1i64..2_000), 1..30)) {
            let mut f = opened(minimum);
            let (_, cmd) = deposit(&f, minimum);
            if minimum > 0 {
                execute(&mut f.account, &cmd).unwrap();
            }
            for (is_deposit, amount) in ops {
                let (_, cmd) = if is_deposit { deposit(&f, amount) } else { withdraw(&f, amount) };
                let _ = execute(&mut f.account, &cmd);
                prop_assert!(f.account.balance() >= f.account.minimum_balance());
            }
            let live: Money = f
                .account
                .transactions()
                .iter()
                .filter(|t| !t.reversed)
                .map(|t| t.kind.signed(t.amount))
                .sum();
            prop_assert_eq!(live, f.account.balance());
        }
    }
}
