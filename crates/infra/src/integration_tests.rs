//! Command → event store → bus → projections, end to end.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use microfin_accounting::chart::{CASH, FEE_INCOME, FEES_RECEIVABLE, INTEREST_INCOME, LOAN_PORTFOLIO};
use microfin_borrowers::{Borrower, BorrowerCommand, BorrowerId, ContactDetails, RegisterBorrower};
use microfin_core::{AggregateId, Money, Rate, TenantId, UserId};
use microfin_events::{EventEnvelope, InMemoryEventBus};
use microfin_lending::{
    ApplyForLoan, ApproveLoan, DefineProduct, DisburseLoan, InterestMethod, Loan, LoanCommand, LoanId, LoanProduct,
    LoanStatus, ProductCommand, ProductId, RecordRepayment, RepaymentFrequency, ReverseRepayment,
};

use crate::aggregate_types;
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::{InMemoryEventStore, StoredEvent};
use crate::postings::post_derived_entries;
use crate::projections::ReadModels;
use crate::workers::ProjectionWorker;

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;

struct Harness {
    dispatcher: CommandDispatcher<InMemoryEventStore, Bus>,
    read_models: ReadModels,
    tenant_id: TenantId,
    user: UserId,
}

impl Harness {
    fn new() -> Self {
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        Self {
            dispatcher: CommandDispatcher::new(InMemoryEventStore::new(), bus),
            read_models: ReadModels::new(),
            tenant_id: TenantId::new(),
            user: UserId::new(),
        }
    }

    fn fold(&self, committed: &[StoredEvent]) {
        for stored in committed {
            self.read_models.apply_envelope(&stored.to_envelope()).unwrap();
        }
    }

    /// Dispatch a loan command, post its ledger entries and fold everything.
    fn loan(&self, loan_id: LoanId, cmd: LoanCommand) -> Result<Vec<StoredEvent>, DispatchError> {
        let committed =
            self.dispatcher
                .dispatch(self.tenant_id, loan_id.0, aggregate_types::LOAN, cmd, |_, id| Loan::empty(LoanId(id)))?;
        self.fold(&committed);
        let postings = post_derived_entries(&self.dispatcher, &committed)?;
        self.fold(&postings);
        Ok(committed)
    }

    fn register_borrower(&self) -> BorrowerId {
        let borrower_id = BorrowerId::new(AggregateId::new());
        let committed = self
            .dispatcher
            .dispatch(
                self.tenant_id,
                borrower_id.0,
                aggregate_types::BORROWER,
                BorrowerCommand::Register(RegisterBorrower {
                    tenant_id: self.tenant_id,
                    borrower_id,
                    branch_id: None,
                    name: "Amina Njeri".into(),
                    national_id: "29384756".into(),
                    contact: ContactDetails::default(),
                    occurred_at: Utc::now(),
                }),
                |_, id| Borrower::empty(BorrowerId(id)),
            )
            .unwrap();
        self.fold(&committed);
        borrower_id
    }

    fn define_product(&self) -> LoanProduct {
        let product_id = ProductId::new(AggregateId::new());
        let committed = self
            .dispatcher
            .dispatch(
                self.tenant_id,
                product_id.0,
                aggregate_types::LOAN_PRODUCT,
                ProductCommand::Define(DefineProduct {
                    tenant_id: self.tenant_id,
                    product_id,
                    name: "Biashara monthly".into(),
                    interest_method: InterestMethod::Flat,
                    annual_rate: Rate::from_bps(1_200),
                    frequency: RepaymentFrequency::Monthly,
                    min_principal: Money::from_minor(1_000),
                    max_principal: Money::from_minor(100_000),
                    min_term: 1,
                    max_term: 24,
                    processing_fee: Rate::from_bps(200),
                    penalty_rate: Rate::from_bps(500),
                    occurred_at: Utc::now(),
                }),
                |_, id| LoanProduct::empty(ProductId(id)),
            )
            .unwrap();
        self.fold(&committed);
        self.dispatcher
            .load(self.tenant_id, product_id.0, |_, id| LoanProduct::empty(ProductId(id)))
            .unwrap()
    }

    /// Applied, approved and disbursed: 12_000 over 12 months, flat 12% p.a., 2% fee.
    fn active_loan(&self) -> LoanId {
        let borrower_id = self.register_borrower();
        let product = self.define_product();
        let loan_id = LoanId::new(AggregateId::new());
        let now = Utc::now();

        self.loan(
            loan_id,
            LoanCommand::Apply(ApplyForLoan {
                tenant_id: self.tenant_id,
                loan_id,
                borrower_id,
                branch_id: None,
                product: product.snapshot().cloned().unwrap(),
                principal: Money::from_minor(12_000),
                term: 12,
                applied_by: self.user,
                occurred_at: now,
            }),
        )
        .unwrap();
        self.loan(
            loan_id,
            LoanCommand::Approve(ApproveLoan { tenant_id: self.tenant_id, loan_id, approved_by: self.user, occurred_at: now }),
        )
        .unwrap();
        self.loan(
            loan_id,
            LoanCommand::Disburse(DisburseLoan {
                tenant_id: self.tenant_id,
                loan_id,
                disbursed_by: self.user,
                first_due_date: None,
                batch_id: None,
                occurred_at: now,
            }),
        )
        .unwrap();
        loan_id
    }

    fn repay(&self, loan_id: LoanId, payment_id: Uuid, amount: i64) -> Result<Vec<StoredEvent>, DispatchError> {
        self.loan(
            loan_id,
            LoanCommand::RecordRepayment(RecordRepayment {
                tenant_id: self.tenant_id,
                loan_id,
                payment_id,
                amount: Money::from_minor(amount),
                recorded_by: self.user,
                received_at: Utc::now(),
            }),
        )
    }
}

#[test]
fn loan_lifecycle_updates_read_models_and_ledger() {
    let h = Harness::new();
    let loan_id = h.active_loan();

    let row = h.read_models.loans.get(h.tenant_id, &loan_id).unwrap();
    assert_eq!(row.status, LoanStatus::Active);
    assert_eq!(row.schedule.len(), 12);
    assert_eq!(row.outstanding.fee, Money::from_minor(240));
    assert_eq!(row.outstanding.interest, Money::from_minor(1_440));

    h.repay(loan_id, Uuid::now_v7(), 500).unwrap();

    let row = h.read_models.loans.get(h.tenant_id, &loan_id).unwrap();
    let allocation = row.payments[0].allocation;
    assert_eq!(allocation.fee, Money::from_minor(240));
    assert_eq!(allocation.interest, Money::from_minor(260));
    assert_eq!(allocation.principal, Money::ZERO);
    assert_eq!(row.total_repaid(), Money::from_minor(500));

    let ledger = &h.read_models.ledger;
    let balance = |code| ledger.balance(h.tenant_id, code).unwrap().balance;
    assert_eq!(balance(LOAN_PORTFOLIO), Money::from_minor(12_000));
    assert_eq!(balance(CASH), Money::from_minor(-11_500));
    assert_eq!(balance(FEES_RECEIVABLE), Money::ZERO);
    assert_eq!(balance(FEE_INCOME), Money::from_minor(-240));
    assert_eq!(balance(INTEREST_INCOME), Money::from_minor(-260));
    assert!(ledger.trial_balance(h.tenant_id).balanced);
    assert_eq!(ledger.journal(h.tenant_id).len(), 2);
}

#[test]
fn reversed_repayment_restores_outstanding_and_nets_the_ledger() {
    let h = Harness::new();
    let loan_id = h.active_loan();
    let payment_id = Uuid::now_v7();
    h.repay(loan_id, payment_id, 1_000).unwrap();

    h.loan(
        loan_id,
        LoanCommand::ReverseRepayment(ReverseRepayment {
            tenant_id: h.tenant_id,
            loan_id,
            payment_id,
            reversed_by: h.user,
            reason: "bounced".into(),
            occurred_at: Utc::now(),
        }),
    )
    .unwrap();

    let row = h.read_models.loans.get(h.tenant_id, &loan_id).unwrap();
    assert!(row.payments[0].reversed);
    assert_eq!(row.outstanding.fee, Money::from_minor(240));
    assert_eq!(row.total_repaid(), Money::ZERO);

    let cash = h.read_models.ledger.balance(h.tenant_id, CASH).unwrap();
    assert_eq!(cash.balance, Money::from_minor(-12_000));
}

#[test]
fn duplicate_payment_ids_are_rejected() {
    let h = Harness::new();
    let loan_id = h.active_loan();
    let payment_id = Uuid::now_v7();
    h.repay(loan_id, payment_id, 100).unwrap();

    let err = h.repay(loan_id, payment_id, 100).unwrap_err();
    assert!(matches!(err, DispatchError::Concurrency(_)));
}

#[test]
fn overpayment_is_a_validation_error() {
    let h = Harness::new();
    let loan_id = h.active_loan();
    let err = h.repay(loan_id, Uuid::now_v7(), 1_000_000).unwrap_err();
    assert!(matches!(err, DispatchError::Validation(_)));
}

#[test]
fn other_tenants_see_nothing() {
    let h = Harness::new();
    let loan_id = h.active_loan();
    let stranger = TenantId::new();

    assert!(h.read_models.loans.get(stranger, &loan_id).is_none());
    assert!(h.read_models.loans.list(stranger, None).is_empty());
    assert!(h.read_models.ledger.trial_balance(stranger).rows.is_empty());

    let err = h
        .dispatcher
        .dispatch(
            stranger,
            loan_id.0,
            aggregate_types::LOAN,
            LoanCommand::Approve(ApproveLoan { tenant_id: stranger, loan_id, approved_by: h.user, occurred_at: Utc::now() }),
            |_, id| Loan::empty(LoanId(id)),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotFound));
}

#[test]
fn replay_rebuilds_the_same_read_models() {
    let h = Harness::new();
    let loan_id = h.active_loan();
    h.repay(loan_id, Uuid::now_v7(), 700).unwrap();

    let rebuilt = ReadModels::new();
    let all = crate::event_store::EventStore::load_all(h.dispatcher.store()).unwrap();
    rebuilt.replay(&all).unwrap();

    assert_eq!(rebuilt.loans.get(h.tenant_id, &loan_id), h.read_models.loans.get(h.tenant_id, &loan_id));
    assert_eq!(rebuilt.ledger.trial_balance(h.tenant_id), h.read_models.ledger.trial_balance(h.tenant_id));
}

#[test]
fn worker_folds_published_events() {
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let read_models = Arc::new(ReadModels::new());
    let sink = read_models.clone();
    let worker = ProjectionWorker::spawn("projections", &bus, None, move |env: EventEnvelope<JsonValue>| {
        sink.apply_envelope(&env)
    })
    .unwrap();

    let h = Harness { dispatcher: CommandDispatcher::new(InMemoryEventStore::new(), bus), ..Harness::new() };
    let borrower_id = h.register_borrower();

    let deadline = Instant::now() + Duration::from_secs(2);
    while read_models.borrowers.get(h.tenant_id, &borrower_id).is_none() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    worker.shutdown();

    let row = read_models.borrowers.get(h.tenant_id, &borrower_id).unwrap();
    assert_eq!(row.name, "Amina Njeri");
}
