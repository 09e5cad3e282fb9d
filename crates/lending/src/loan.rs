//! Loan aggregate: application through closure.
//!
//! Status moves `queued → active → delinquent → closed` (delinquent loans may
//! return to active once arrears clear). Repayments are append-only; a
//! reversal flags the payment and restores what it paid.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use microfin_borrowers::BorrowerId;
use microfin_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, Money, Rate, TenantId, UserId};
use microfin_events::Event;

use crate::allocation::{Allocation, Outstanding, allocate};
use crate::disbursement::BatchId;
use crate::product::{ProductId, ProductSnapshot};
use crate::schedule::{Installment, InterestMethod, RepaymentFrequency, ScheduleTerms, generate_schedule};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LoanId(pub AggregateId);

impl LoanId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for LoanId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoanStatus {
    Queued,
    Active,
    Delinquent,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClosureReason {
    Rejected,
    Repaid,
    WrittenOff,
    /// Closed by staff with nothing outstanding (e.g. a withdrawn application).
    Manual,
}

/// Terms fixed at application time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanTerms {
    pub product_id: ProductId,
    pub principal: Money,
    pub term: u32,
    pub interest_method: InterestMethod,
    pub annual_rate: Rate,
    pub frequency: RepaymentFrequency,
    pub processing_fee: Money,
    pub penalty_rate: Rate,
}

/// One repayment. Never deleted; `reversed` marks a soft reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanPayment {
    pub payment_id: Uuid,
    pub amount: Money,
    pub allocation: Allocation,
    pub received_at: DateTime<Utc>,
    pub recorded_by: UserId,
    pub reversed: bool,
    pub reversed_at: Option<DateTime<Utc>>,
    pub reversed_by: Option<UserId>,
    pub reversal_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loan {
    id: LoanId,
    tenant_id: Option<TenantId>,
    borrower_id: Option<BorrowerId>,
    branch_id: Option<BranchId>,
    terms: Option<LoanTerms>,
    status: LoanStatus,
    closure: Option<ClosureReason>,
    schedule: Vec<Installment>,
    outstanding: Outstanding,
    payments: Vec<LoanPayment>,
    applied_by: Option<UserId>,
    applied_at: Option<DateTime<Utc>>,
    approved_by: Option<UserId>,
    approved_at: Option<DateTime<Utc>>,
    rejected_by: Option<UserId>,
    rejected_at: Option<DateTime<Utc>>,
    disbursed_by: Option<UserId>,
    disbursed_at: Option<DateTime<Utc>>,
    disbursement_batch: Option<BatchId>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
}

impl Loan {
    pub fn empty(id: LoanId) -> Self {
        Self {
            id,
            tenant_id: None,
            borrower_id: None,
            branch_id: None,
            terms: None,
            status: LoanStatus::Queued,
            closure: None,
            schedule: Vec::new(),
            outstanding: Outstanding::default(),
            payments: Vec::new(),
            applied_by: None,
            applied_at: None,
            approved_by: None,
            approved_at: None,
            rejected_by: None,
            rejected_at: None,
            disbursed_by: None,
            disbursed_at: None,
            disbursement_batch: None,
            closed_at: None,
            version: 0,
        }
    }

    pub fn status(&self) -> LoanStatus {
        self.status
    }

    pub fn closure(&self) -> Option<ClosureReason> {
        self.closure
    }

    pub fn terms(&self) -> Option<&LoanTerms> {
        self.terms.as_ref()
    }

    pub fn borrower_id(&self) -> Option<BorrowerId> {
        self.borrower_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn schedule(&self) -> &[Installment] {
        &self.schedule
    }

    pub fn outstanding(&self) -> Outstanding {
        self.outstanding
    }

    pub fn payments(&self) -> &[LoanPayment] {
        &self.payments
    }

    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }

    pub fn approved_at(&self) -> Option<DateTime<Utc>> {
        self.approved_at
    }

    pub fn disbursed_at(&self) -> Option<DateTime<Utc>> {
        self.disbursed_at
    }

    /// Batch whose payout disbursed this loan, if any.
    pub fn disbursement_batch(&self) -> Option<BatchId> {
        self.disbursement_batch
    }

    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }

    pub fn payment(&self, payment_id: Uuid) -> Option<&LoanPayment> {
        self.payments.iter().find(|p| p.payment_id == payment_id)
    }

    /// Scheduled principal + interest due on or before `as_of`, less what
    /// non-reversed payments put toward interest and principal. Never negative.
    pub fn arrears(&self, as_of: NaiveDate) -> Money {
        let due: Money = self
            .schedule
            .iter()
            .filter(|i| i.due_date <= as_of)
            .map(Installment::total)
            .sum();
        let paid: Money = self
            .payments
            .iter()
            .filter(|p| !p.reversed)
            .map(|p| p.allocation.scheduled_part())
            .sum();
        due.saturating_sub_floor(paid)
    }
}

impl AggregateRoot for Loan {
    type Id = LoanId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

// Commands

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyForLoan {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub product: ProductSnapshot,
    pub principal: Money,
    pub term: u32,
    pub applied_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveLoan {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectLoan {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisburseLoan {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub disbursed_by: UserId,
    /// Defaults to one period after the disbursement date.
    pub first_due_date: Option<NaiveDate>,
    /// Set when the payout went through a disbursement batch.
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRepayment {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub payment_id: Uuid,
    pub amount: Money,
    pub recorded_by: UserId,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReverseRepayment {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub payment_id: Uuid,
    pub reversed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessPenalty {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    /// `None` charges the product penalty rate on current arrears.
    pub amount: Option<Money>,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDelinquent {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub as_of: NaiveDate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOffLoan {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub written_off_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseLoan {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanCommand {
    Apply(ApplyForLoan),
    Approve(ApproveLoan),
    Reject(RejectLoan),
    Disburse(DisburseLoan),
    RecordRepayment(RecordRepayment),
    ReverseRepayment(ReverseRepayment),
    AssessPenalty(AssessPenalty),
    MarkDelinquent(MarkDelinquent),
    WriteOff(WriteOffLoan),
    Close(CloseLoan),
}

// Events

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApplied {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub borrower_id: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub terms: LoanTerms,
    pub applied_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanApproved {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanRejected {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub rejected_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanDisbursed {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub disbursed_by: UserId,
    pub principal: Money,
    pub processing_fee: Money,
    pub schedule: Vec<Installment>,
    #[serde(default)]
    pub batch_id: Option<BatchId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentRecorded {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub payment: LoanPayment,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepaymentReversed {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub payment_id: Uuid,
    /// What the payment had paid; restored to outstanding.
    pub allocation: Allocation,
    pub reversed_by: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PenaltyAssessed {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub amount: Money,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanMarkedDelinquent {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub as_of: NaiveDate,
    pub arrears: Money,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelinquencyCured {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanWrittenOff {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub written_off_by: UserId,
    pub reason: String,
    /// Balances at the moment of write-off.
    pub outstanding: Outstanding,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanClosed {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub reason: ClosureReason,
    pub closed_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanReopened {
    pub tenant_id: TenantId,
    pub loan_id: LoanId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoanEvent {
    Applied(LoanApplied),
    Approved(LoanApproved),
    Rejected(LoanRejected),
    Disbursed(LoanDisbursed),
    RepaymentRecorded(RepaymentRecorded),
    RepaymentReversed(RepaymentReversed),
    PenaltyAssessed(PenaltyAssessed),
    MarkedDelinquent(LoanMarkedDelinquent),
    DelinquencyCured(DelinquencyCured),
    WrittenOff(LoanWrittenOff),
    Closed(LoanClosed),
    Reopened(LoanReopened),
}

impl Event for LoanEvent {
    fn event_type(&self) -> &'static str {
        match self {
            LoanEvent::Applied(_) => "lending.loan.applied",
            LoanEvent::Approved(_) => "lending.loan.approved",
            LoanEvent::Rejected(_) => "lending.loan.rejected",
            LoanEvent::Disbursed(_) => "lending.loan.disbursed",
            LoanEvent::RepaymentRecorded(_) => "lending.loan.repayment_recorded",
            LoanEvent::RepaymentReversed(_) => "lending.loan.repayment_reversed",
            LoanEvent::PenaltyAssessed(_) => "lending.loan.penalty_assessed",
            LoanEvent::MarkedDelinquent(_) => "lending.loan.marked_delinquent",
            LoanEvent::DelinquencyCured(_) => "lending.loan.delinquency_cured",
            LoanEvent::WrittenOff(_) => "lending.loan.written_off",
            LoanEvent::Closed(_) => "lending.loan.closed",
            LoanEvent::Reopened(_) => "lending.loan.reopened",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            LoanEvent::Applied(e) => e.occurred_at,
            LoanEvent::Approved(e) => e.occurred_at,
            LoanEvent::Rejected(e) => e.occurred_at,
            LoanEvent::Disbursed(e) => e.occurred_at,
            LoanEvent::RepaymentRecorded(e) => e.occurred_at,
            LoanEvent::RepaymentReversed(e) => e.occurred_at,
            LoanEvent::PenaltyAssessed(e) => e.occurred_at,
            LoanEvent::MarkedDelinquent(e) => e.occurred_at,
            LoanEvent::DelinquencyCured(e) => e.occurred_at,
            LoanEvent::WrittenOff(e) => e.occurred_at,
            LoanEvent::Closed(e) => e.occurred_at,
            LoanEvent::Reopened(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Loan {
    type Command = LoanCommand;
    type Event = LoanEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            LoanEvent::Applied(e) => {
                self.id = e.loan_id;
                self.tenant_id = Some(e.tenant_id);
                self.borrower_id = Some(e.borrower_id);
                self.branch_id = e.branch_id;
                self.terms = Some(e.terms);
                self.status = LoanStatus::Queued;
                self.applied_by = Some(e.applied_by);
                self.applied_at = Some(e.occurred_at);
            }
            LoanEvent::Approved(e) => {
                self.approved_by = Some(e.approved_by);
                self.approved_at = Some(e.occurred_at);
            }
            LoanEvent::Rejected(e) => {
                self.rejected_by = Some(e.rejected_by);
                self.rejected_at = Some(e.occurred_at);
                self.close(ClosureReason::Rejected, e.occurred_at);
            }
            LoanEvent::Disbursed(e) => {
                self.status = LoanStatus::Active;
                self.disbursed_by = Some(e.disbursed_by);
                self.disbursed_at = Some(e.occurred_at);
                self.disbursement_batch = e.batch_id;
                self.outstanding = Outstanding {
                    penalty: Money::ZERO,
                    fee: e.processing_fee,
                    interest: e.schedule.iter().map(|i| i.interest).sum(),
                    principal: e.principal,
                };
                self.schedule = e.schedule.clone();
            }
            LoanEvent::RepaymentRecorded(e) => {
                self.outstanding.pay(&e.payment.allocation);
                self.payments.push(e.payment.clone());
            }
            LoanEvent::RepaymentReversed(e) => {
                self.outstanding.restore(&e.allocation);
                if let Some(p) = self.payments.iter_mut().find(|p| p.payment_id == e.payment_id) {
                    p.reversed = true;
                    p.reversed_at = Some(e.occurred_at);
                    p.reversed_by = Some(e.reversed_by);
                    p.reversal_reason = Some(e.reason.clone());
                }
            }
            LoanEvent::PenaltyAssessed(e) => self.outstanding.penalty += e.amount,
            LoanEvent::MarkedDelinquent(_) => self.status = LoanStatus::Delinquent,
            LoanEvent::DelinquencyCured(_) => self.status = LoanStatus::Active,
            LoanEvent::WrittenOff(e) => {
                self.outstanding = Outstanding::default();
                self.close(ClosureReason::WrittenOff, e.occurred_at);
            }
            LoanEvent::Closed(e) => self.close(e.reason, e.occurred_at),
            LoanEvent::Reopened(_) => {
                self.status = LoanStatus::Active;
                self.closure = None;
                self.closed_at = None;
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            LoanCommand::Apply(cmd) => self.handle_apply(cmd),
            LoanCommand::Approve(cmd) => self.handle_approve(cmd),
            LoanCommand::Reject(cmd) => self.handle_reject(cmd),
            LoanCommand::Disburse(cmd) => self.handle_disburse(cmd),
            LoanCommand::RecordRepayment(cmd) => self.handle_repayment(cmd),
            LoanCommand::ReverseRepayment(cmd) => self.handle_reversal(cmd),
            LoanCommand::AssessPenalty(cmd) => self.handle_penalty(cmd),
            LoanCommand::MarkDelinquent(cmd) => self.handle_delinquency(cmd),
            LoanCommand::WriteOff(cmd) => self.handle_write_off(cmd),
            LoanCommand::Close(cmd) => self.handle_close(cmd),
        }
    }
}

impl Loan {
    fn close(&mut self, reason: ClosureReason, at: DateTime<Utc>) {
        self.status = LoanStatus::Closed;
        self.closure = Some(reason);
        self.closed_at = Some(at);
    }

    fn ensure_existing(&self, tenant_id: TenantId, loan_id: LoanId) -> Result<(), DomainError> {
        if self.terms.is_none() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != loan_id {
            return Err(DomainError::invariant("loan_id mismatch"));
        }
        Ok(())
    }

    fn ensure_status(&self, allowed: &[LoanStatus], action: &str) -> Result<(), DomainError> {
        if allowed.contains(&self.status) {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "cannot {action} a loan in status {:?}",
                self.status
            )))
        }
    }

    fn handle_apply(&self, cmd: &ApplyForLoan) -> Result<Vec<LoanEvent>, DomainError> {
        if self.terms.is_some() {
            return Err(DomainError::conflict("loan already exists"));
        }
        let product = &cmd.product;
        if product.retired {
            return Err(DomainError::invariant("product is retired"));
        }
        if cmd.principal < product.min_principal || cmd.principal > product.max_principal {
            return Err(DomainError::validation(format!(
                "principal must be between {} and {}",
                product.min_principal, product.max_principal
            )));
        }
        if cmd.term < product.min_term || cmd.term > product.max_term {
            return Err(DomainError::validation(format!(
                "term must be between {} and {} installments",
                product.min_term, product.max_term
            )));
        }

        Ok(vec![LoanEvent::Applied(LoanApplied {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            borrower_id: cmd.borrower_id,
            branch_id: cmd.branch_id,
            terms: LoanTerms {
                product_id: product.product_id,
                principal: cmd.principal,
                term: cmd.term,
                interest_method: product.interest_method,
                annual_rate: product.annual_rate,
                frequency: product.frequency,
                processing_fee: product.processing_fee.of(cmd.principal),
                penalty_rate: product.penalty_rate,
            },
            applied_by: cmd.applied_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Queued], "approve")?;
        if self.is_approved() {
            return Err(DomainError::conflict("loan already approved"));
        }
        Ok(vec![LoanEvent::Approved(LoanApproved {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            approved_by: cmd.approved_by,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &RejectLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Queued], "reject")?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("rejection reason is required"));
        }
        Ok(vec![LoanEvent::Rejected(LoanRejected {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            rejected_by: cmd.rejected_by,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_disburse(&self, cmd: &DisburseLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Queued], "disburse")?;
        if !self.is_approved() {
            return Err(DomainError::invariant("loan must be approved before disbursement"));
        }
        let Some(terms) = self.terms else {
            return Err(DomainError::not_found());
        };

        let disbursed_on = cmd.occurred_at.date_naive();
        let first_due_date = match cmd.first_due_date {
            Some(d) => d,
            None => terms
                .frequency
                .due_date(disbursed_on, 1)
                .ok_or_else(|| DomainError::validation("due date out of range"))?,
        };
        if first_due_date <= disbursed_on {
            return Err(DomainError::validation("first due date must be after the disbursement date"));
        }

        let schedule = generate_schedule(&ScheduleTerms {
            principal: terms.principal,
            annual_rate: terms.annual_rate,
            term: terms.term,
            frequency: terms.frequency,
            method: terms.interest_method,
            first_due_date,
        })?;
        let owed = schedule.iter().flat_map(|i| [i.principal, i.interest]).chain([terms.processing_fee]);
        if Money::checked_sum(owed).is_none() {
            return Err(DomainError::validation("scheduled repayments overflow the loan balance"));
        }

        Ok(vec![LoanEvent::Disbursed(LoanDisbursed {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            disbursed_by: cmd.disbursed_by,
            principal: terms.principal,
            processing_fee: terms.processing_fee,
            schedule,
            batch_id: cmd.batch_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_repayment(&self, cmd: &RecordRepayment) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Active, LoanStatus::Delinquent], "repay")?;
        if self.payment(cmd.payment_id).is_some() {
            return Err(DomainError::conflict(format!("payment {} already recorded", cmd.payment_id)));
        }

        let allocation = allocate(cmd.amount, &self.outstanding)?;
        let recorded = LoanEvent::RepaymentRecorded(RepaymentRecorded {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            payment: LoanPayment {
                payment_id: cmd.payment_id,
                amount: cmd.amount,
                allocation,
                received_at: cmd.received_at,
                recorded_by: cmd.recorded_by,
                reversed: false,
                reversed_at: None,
                reversed_by: None,
                reversal_reason: None,
            },
            occurred_at: cmd.received_at,
        });

        let mut after = self.clone();
        after.apply(&recorded);
        let mut events = vec![recorded];

        if after.outstanding.is_settled() {
            events.push(LoanEvent::Closed(LoanClosed {
                tenant_id: cmd.tenant_id,
                loan_id: cmd.loan_id,
                reason: ClosureReason::Repaid,
                closed_by: cmd.recorded_by,
                occurred_at: cmd.received_at,
            }));
        } else if self.status == LoanStatus::Delinquent && after.arrears(cmd.received_at.date_naive()).is_zero() {
            events.push(LoanEvent::DelinquencyCured(DelinquencyCured {
                tenant_id: cmd.tenant_id,
                loan_id: cmd.loan_id,
                occurred_at: cmd.received_at,
            }));
        }
        Ok(events)
    }

    fn handle_reversal(&self, cmd: &ReverseRepayment) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        let Some(payment) = self.payment(cmd.payment_id) else {
            return Err(DomainError::not_found());
        };
        if payment.reversed {
            return Err(DomainError::invariant("payment already reversed"));
        }
        if self.closure == Some(ClosureReason::WrittenOff) {
            return Err(DomainError::invariant("cannot reverse a payment on a written-off loan"));
        }

        let mut events = vec![LoanEvent::RepaymentReversed(RepaymentReversed {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            payment_id: cmd.payment_id,
            allocation: payment.allocation,
            reversed_by: cmd.reversed_by,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })];
        if self.status == LoanStatus::Closed {
            events.push(LoanEvent::Reopened(LoanReopened {
                tenant_id: cmd.tenant_id,
                loan_id: cmd.loan_id,
                occurred_at: cmd.occurred_at,
            }));
        }
        Ok(events)
    }

    fn handle_penalty(&self, cmd: &AssessPenalty) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Active, LoanStatus::Delinquent], "penalize")?;

        let amount = match cmd.amount {
            Some(a) => a,
            None => {
                let rate = self.terms.map(|t| t.penalty_rate).unwrap_or(Rate::ZERO);
                rate.of(self.arrears(cmd.occurred_at.date_naive()))
            }
        };
        if !amount.is_positive() {
            return Err(DomainError::validation("penalty amount must be positive"));
        }
        if self.outstanding.total().checked_add(amount).is_none() {
            return Err(DomainError::validation(format!("penalty {amount} overflows the outstanding balance")));
        }

        Ok(vec![LoanEvent::PenaltyAssessed(PenaltyAssessed {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            amount,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_delinquency(&self, cmd: &MarkDelinquent) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Active], "mark delinquent")?;
        let arrears = self.arrears(cmd.as_of);
        if arrears.is_zero() {
            return Err(DomainError::invariant(format!("no arrears as of {}", cmd.as_of)));
        }
        Ok(vec![LoanEvent::MarkedDelinquent(LoanMarkedDelinquent {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            as_of: cmd.as_of,
            arrears,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_write_off(&self, cmd: &WriteOffLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        self.ensure_status(&[LoanStatus::Delinquent], "write off")?;
        Ok(vec![LoanEvent::WrittenOff(LoanWrittenOff {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            written_off_by: cmd.written_off_by,
            reason: cmd.reason.clone(),
            outstanding: self.outstanding,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close(&self, cmd: &CloseLoan) -> Result<Vec<LoanEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.loan_id)?;
        if self.status == LoanStatus::Closed {
            return Err(DomainError::conflict("loan already closed"));
        }
        if !self.outstanding.is_settled() {
            return Err(DomainError::invariant(format!(
                "loan still has {} outstanding",
                self.outstanding.total()
            )));
        }
        Ok(vec![LoanEvent::Closed(LoanClosed {
            tenant_id: cmd.tenant_id,
            loan_id: cmd.loan_id,
            reason: ClosureReason::Manual,
            closed_by: cmd.closed_by,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use microfin_events::execute;
    use proptest::prelude::*;

    struct Fixture {
        tenant_id: TenantId,
        user: UserId,
        loan: Loan,
    }

    fn m(v: i64) -> Money {
        Money::from_minor(v)
    }

    fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, 10, 0, 0).unwrap()
    }

    fn product() -> ProductSnapshot {
        ProductSnapshot {
            product_id: ProductId::new(AggregateId::new()),
            name: "Group 4".into(),
            interest_method: InterestMethod::Flat,
            // 12% p.a. monthly flat: 1% of principal per installment.
            annual_rate: Rate::from_bps(1_200),
            frequency: RepaymentFrequency::Monthly,
            min_principal: m(1_000),
            max_principal: m(1_000_000),
            min_term: 1,
            max_term: 12,
            processing_fee: Rate::from_bps(100),
            penalty_rate: Rate::from_bps(1_000),
            retired: false,
        }
    }

    fn apply_cmd(f: &Fixture, principal: i64, term: u32) -> LoanCommand {
        LoanCommand::Apply(ApplyForLoan {
            tenant_id: f.tenant_id,
            loan_id: *f.loan.id(),
            borrower_id: BorrowerId::new(AggregateId::new()),
            branch_id: Some(BranchId::new()),
            product: product(),
            principal: m(principal),
            term,
            applied_by: f.user,
            occurred_at: at(2024, 1, 2),
        })
    }

    fn fixture() -> Fixture {
        Fixture {
            tenant_id: TenantId::new(),
            user: UserId::new(),
            loan: Loan::empty(LoanId::new(AggregateId::new())),
        }
    }

    /// 4-month loan of 40_000, disbursed 2024-01-15, first due 2024-02-15.
    /// Installments: 10_000 principal + 400 interest. Fee: 400.
    fn active() -> Fixture {
        let mut f = fixture();
        let id = *f.loan.id();
        let cmd = apply_cmd(&f, 40_000, 4);
        execute(&mut f.loan, &cmd).unwrap();
        execute(
            &mut f.loan,
            &LoanCommand::Approve(ApproveLoan {
                tenant_id: f.tenant_id,
                loan_id: id,
                approved_by: f.user,
                occurred_at: at(2024, 1, 10),
            }),
        )
        .unwrap();
        execute(
            &mut f.loan,
            &LoanCommand::Disburse(DisburseLoan {
                tenant_id: f.tenant_id,
                loan_id: id,
                disbursed_by: f.user,
                first_due_date: None,
                batch_id: None,
                occurred_at: at(2024, 1, 15),
            }),
        )
        .unwrap();
        f
    }

    fn repay(f: &Fixture, amount: i64, when: DateTime<Utc>) -> (Uuid, LoanCommand) {
        let payment_id = Uuid::now_v7();
        (
            payment_id,
            LoanCommand::RecordRepayment(RecordRepayment {
                tenant_id: f.tenant_id,
                loan_id: *f.loan.id(),
                payment_id,
                amount: m(amount),
                recorded_by: f.user,
                received_at: when,
            }),
        )
    }

    fn reverse(f: &Fixture, payment_id: Uuid) -> LoanCommand {
        LoanCommand::ReverseRepayment(ReverseRepayment {
            tenant_id: f.tenant_id,
            loan_id: *f.loan.id(),
            payment_id,
            reversed_by: f.user,
            reason: "bounced".into(),
            occurred_at: at(2024, 2, 20),
        })
    }

    #[test]
    fn application_is_bounded_by_product() {
        let f = fixture();
        assert!(matches!(f.loan.handle(&apply_cmd(&f, 500, 4)), Err(DomainError::Validation(_))));
        assert!(matches!(f.loan.handle(&apply_cmd(&f, 5_000, 24)), Err(DomainError::Validation(_))));

        let mut retired = f.loan.clone();
        let LoanCommand::Apply(mut cmd) = apply_cmd(&f, 5_000, 4) else { unreachable!() };
        cmd.product.retired = true;
        assert!(retired.handle(&LoanCommand::Apply(cmd)).is_err());
        execute(&mut retired, &apply_cmd(&f, 5_000, 4)).unwrap();
        assert_eq!(retired.status(), LoanStatus::Queued);
        assert_eq!(retired.terms().unwrap().processing_fee, m(50));
    }

    #[test]
    fn disbursement_requires_approval() {
        let mut f = fixture();
        let cmd = apply_cmd(&f, 40_000, 4);
        execute(&mut f.loan, &cmd).unwrap();
        let err = f
            .loan
            .handle(&LoanCommand::Disburse(DisburseLoan {
                tenant_id: f.tenant_id,
                loan_id: *f.loan.id(),
                disbursed_by: f.user,
                first_due_date: None,
                batch_id: None,
                occurred_at: at(2024, 1, 15),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("approved"));
    }

    #[test]
    fn disbursement_builds_schedule_and_outstanding() {
        let f = active();
        assert_eq!(f.loan.status(), LoanStatus::Active);
        assert!(f.loan.approved_at().is_some() && f.loan.disbursed_at().is_some());
        assert_eq!(f.loan.schedule().len(), 4);
        assert_eq!(f.loan.schedule()[0].due_date, NaiveDate::from_ymd_opt(2024, 2, 15).unwrap());
        assert_eq!(
            f.loan.outstanding(),
            Outstanding { penalty: m(0), fee: m(400), interest: m(1_600), principal: m(40_000) }
        );
    }

    #[test]
    fn batch_payout_is_recorded_on_the_loan() {
        let f = active();
        assert_eq!(f.loan.disbursement_batch(), None);

        let mut f = fixture();
        let loan_id = *f.loan.id();
        let batch = BatchId::new(AggregateId::new());
        let cmd = apply_cmd(&f, 40_000, 4);
        execute(&mut f.loan, &cmd).unwrap();
        let approve = LoanCommand::Approve(ApproveLoan {
            tenant_id: f.tenant_id,
            loan_id,
            approved_by: f.user,
            occurred_at: at(2024, 1, 10),
        });
        execute(&mut f.loan, &approve).unwrap();
        let disburse = LoanCommand::Disburse(DisburseLoan {
            tenant_id: f.tenant_id,
            loan_id,
            disbursed_by: f.user,
            first_due_date: None,
            batch_id: Some(batch),
            occurred_at: at(2024, 1, 15),
        });
        execute(&mut f.loan, &disburse).unwrap();
        assert_eq!(f.loan.status(), LoanStatus::Active);
        assert_eq!(f.loan.disbursement_batch(), Some(batch));
    }

    #[test]
    fn reject_closes_queued_loan() {
        let mut f = fixture();
        let cmd = apply_cmd(&f, 40_000, 4);
        execute(&mut f.loan, &cmd).unwrap();
        let loan_id = *f.loan.id();
        execute(
            &mut f.loan,
            &LoanCommand::Reject(RejectLoan {
                tenant_id: f.tenant_id,
                loan_id,
                rejected_by: f.user,
                reason: "insufficient collateral".into(),
                occurred_at: at(2024, 1, 5),
            }),
        )
        .unwrap();
        assert_eq!(f.loan.status(), LoanStatus::Closed);
        assert_eq!(f.loan.closure(), Some(ClosureReason::Rejected));
    }

    #[test]
    fn repayment_allocates_fee_first() {
        let mut f = active();
        let (_, cmd) = repay(&f, 1_000, at(2024, 2, 15));
        let events = execute(&mut f.loan, &cmd).unwrap();
        let LoanEvent::RepaymentRecorded(e) = &events[0] else { panic!("expected RepaymentRecorded") };
        assert_eq!(e.payment.allocation, Allocation { penalty: m(0), fee: m(400), interest: m(600), principal: m(0) });
    }

    #[test]
    fn full_repayment_closes_and_reversal_reopens() {
        let mut f = active();
        let (payment_id, cmd) = repay(&f, 42_000, at(2024, 2, 1));
        let events = execute(&mut f.loan, &cmd).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(f.loan.status(), LoanStatus::Closed);
        assert_eq!(f.loan.closure(), Some(ClosureReason::Repaid));

        let cmd = reverse(&f, payment_id);

        execute(&mut f.loan, &cmd).unwrap();
        assert_eq!(f.loan.status(), LoanStatus::Active);
        assert_eq!(f.loan.outstanding().total(), m(42_000));
        let p = f.loan.payment(payment_id).unwrap();
        assert!(p.reversed && p.reversed_at.is_some());
        assert_eq!(f.loan.payments().len(), 1);

        assert!(f.loan.handle(&reverse(&f, payment_id)).is_err());
    }

    #[test]
    fn overpayment_is_rejected() {
        let f = active();
        let (_, cmd) = repay(&f, 42_001, at(2024, 2, 1));
        assert!(matches!(f.loan.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn delinquency_cycle() {
        let mut f = active();
        let id = *f.loan.id();
        let early = MarkDelinquent {
            tenant_id: f.tenant_id,
            loan_id: id,
            as_of: NaiveDate::from_ymd_opt(2024, 2, 14).unwrap(),
            occurred_at: at(2024, 2, 14),
        };
        assert!(f.loan.handle(&LoanCommand::MarkDelinquent(early)).is_err());

        let as_of = NaiveDate::from_ymd_opt(2024, 2, 20).unwrap();
        assert_eq!(f.loan.arrears(as_of), m(10_400));
        execute(
            &mut f.loan,
            &LoanCommand::MarkDelinquent(MarkDelinquent {
                tenant_id: f.tenant_id,
                loan_id: id,
                as_of,
                occurred_at: at(2024, 2, 20),
            }),
        )
        .unwrap();
        assert_eq!(f.loan.status(), LoanStatus::Delinquent);

        // Penalty from rate: 10% of 10_400.
        execute(
            &mut f.loan,
            &LoanCommand::AssessPenalty(AssessPenalty {
                tenant_id: f.tenant_id,
                loan_id: id,
                amount: None,
                reason: "late".into(),
                occurred_at: at(2024, 2, 20),
            }),
        )
        .unwrap();
        assert_eq!(f.loan.outstanding().penalty, m(1_040));

        // Penalty + fee + the first installment clears arrears.
        let (_, cmd) = repay(&f, 1_040 + 400 + 10_400, at(2024, 2, 21));
        let events = execute(&mut f.loan, &cmd).unwrap();
        assert!(matches!(events.last(), Some(LoanEvent::DelinquencyCured(_))));
        assert_eq!(f.loan.status(), LoanStatus::Active);
    }

    #[test]
    fn penalty_that_would_overflow_outstanding_is_rejected() {
        let mut f = active();
        let id = *f.loan.id();
        let penalty = |amount: i64| {
            LoanCommand::AssessPenalty(AssessPenalty {
                tenant_id: f.tenant_id,
                loan_id: id,
                amount: Some(m(amount)),
                reason: "manual".into(),
                occurred_at: at(2024, 2, 20),
            })
        };
        let huge = penalty(i64::MAX);
        assert!(matches!(f.loan.handle(&huge), Err(DomainError::Validation(_))));

        // The largest penalty that still fits keeps the loan usable.
        let headroom = i64::MAX - f.loan.outstanding().total().minor();
        let fits = penalty(headroom);
        execute(&mut f.loan, &fits).unwrap();
        assert_eq!(f.loan.outstanding().total(), m(i64::MAX));
        assert!(matches!(f.loan.handle(&penalty(1)), Err(DomainError::Validation(_))));

        let (_, cmd) = repay(&f, 100, at(2024, 2, 21));
        execute(&mut f.loan, &cmd).unwrap();
        assert_eq!(f.loan.outstanding().penalty, m(headroom - 100));
    }

    #[test]
    fn write_off_only_when_delinquent() {
        let mut f = active();
        let id = *f.loan.id();
        let write_off = LoanCommand::WriteOff(WriteOffLoan {
            tenant_id: f.tenant_id,
            loan_id: id,
            written_off_by: f.user,
            reason: "absconded".into(),
            occurred_at: at(2024, 6, 1),
        });
        assert!(f.loan.handle(&write_off).is_err());

        execute(
            &mut f.loan,
            &LoanCommand::MarkDelinquent(MarkDelinquent {
                tenant_id: f.tenant_id,
                loan_id: id,
                as_of: NaiveDate::from_ymd_opt(2024, 6, 1).unwrap(),
                occurred_at: at(2024, 6, 1),
            }),
        )
        .unwrap();
        let events = execute(&mut f.loan, &write_off).unwrap();
        let LoanEvent::WrittenOff(e) = &events[0] else { panic!("expected WrittenOff") };
        assert_eq!(e.outstanding.principal, m(40_000));
        assert_eq!(f.loan.closure(), Some(ClosureReason::WrittenOff));
        assert!(f.loan.outstanding().is_settled());
    }

    #[test]
    fn close_requires_nothing_outstanding() {
        let f = active();
        let close = LoanCommand::Close(CloseLoan {
            tenant_id: f.tenant_id,
            loan_id: *f.loan.id(),
            closed_by: f.user,
            occurred_at: at(2024, 3, 1),
        });
        assert!(f.loan.handle(&close).is_err());

        let mut queued = fixture();
        let cmd = apply_cmd(&queued, 5_000, 2);
        execute(&mut queued.loan, &cmd).unwrap();
        let close = LoanCommand::Close(CloseLoan {
            tenant_id: queued.tenant_id,
            loan_id: *queued.loan.id(),
            closed_by: queued.user,
            occurred_at: at(2024, 3, 1),
        });
        execute(&mut queued.loan, &close).unwrap();
        assert_eq!(queued.loan.closure(), Some(ClosureReason::Manual));
    }

    #[test]
    fn duplicate_payment_id_conflicts() {
        let mut f = active();
        let (_, cmd) = repay(&f, 100, at(2024, 2, 1));
        execute(&mut f.loan, &cmd).unwrap();
        assert!(matches!(f.loan.handle(&cmd), Err(DomainError::Conflict(_))));
    }

    proptest! {
        #[test]
        fn reversals_restore_outstanding(amounts in prop::collection::vec(1i64..5_000, 1..8)) {
            let mut f = active();
            let initial = f.loan.outstanding();
            let mut ids = Vec::new();
            let mut when = at(2024, 2, 1);
            for a in amounts {
                let (id, cmd) = repay(&f, a, when);
                if execute(&mut f.loan, &cmd).is_ok() {
                    ids.push(id);
                }
                when += Duration::days(1);
            }
            for id in ids {
                let cmd = reverse(&f, id);
                execute(&mut f.loan, &cmd).unwrap();
            }
            prop_assert_eq!(f.loan.outstanding(), initial);
            prop_assert!(f.loan.payments().iter().all(|p| p.reversed));
        }
    }
}
