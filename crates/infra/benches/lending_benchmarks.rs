use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use uuid::Uuid;

use microfin_borrowers::BorrowerId;
use microfin_core::{AggregateId, Money, Rate, TenantId, UserId};
use microfin_events::{EventEnvelope, InMemoryEventBus};
use microfin_infra::aggregate_types;
use microfin_infra::command_dispatcher::CommandDispatcher;
use microfin_infra::event_store::InMemoryEventStore;
use microfin_infra::projections::ReadModels;
use microfin_lending::{
    ApplyForLoan, ApproveLoan, DisburseLoan, InterestMethod, Loan, LoanCommand, LoanId, ProductId, ProductSnapshot,
    RecordRepayment, RepaymentFrequency, ScheduleTerms, generate_schedule,
};

type Dispatcher = CommandDispatcher<InMemoryEventStore, Arc<InMemoryEventBus<EventEnvelope<serde_json::Value>>>>;

fn product() -> ProductSnapshot {
    ProductSnapshot {
        product_id: ProductId::new(AggregateId::new()),
        name: "bench".into(),
        interest_method: InterestMethod::DecliningBalance,
        annual_rate: Rate::from_bps(2_400),
        frequency: RepaymentFrequency::Weekly,
        min_principal: Money::from_minor(1),
        max_principal: Money::from_minor(100_000_000),
        min_term: 1,
        max_term: 520,
        processing_fee: Rate::from_bps(100),
        penalty_rate: Rate::from_bps(500),
        retired: false,
    }
}

/// A disbursed loan with `payments` repayments of 10 minor units already recorded.
fn disbursed_loan(payments: usize) -> (Dispatcher, TenantId, LoanId) {
    let dispatcher = CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(InMemoryEventBus::new()));
    let tenant_id = TenantId::new();
    let user = UserId::new();
    let loan_id = LoanId::new(AggregateId::new());
    let now = Utc::now();

    let commands = [
        LoanCommand::Apply(ApplyForLoan {
            tenant_id,
            loan_id,
            borrower_id: BorrowerId::new(AggregateId::new()),
            branch_id: None,
            product: product(),
            principal: Money::from_minor(5_000_000),
            term: 104,
            applied_by: user,
            occurred_at: now,
        }),
        LoanCommand::Approve(ApproveLoan { tenant_id, loan_id, approved_by: user, occurred_at: now }),
        LoanCommand::Disburse(DisburseLoan {
            tenant_id,
            loan_id,
            disbursed_by: user,
            first_due_date: None,
            batch_id: None,
            occurred_at: now,
        }),
    ];
    let payments = (0..payments).map(|_| repayment(tenant_id, loan_id, user));

    for cmd in commands.into_iter().chain(payments) {
        dispatcher
            .dispatch(tenant_id, loan_id.0, aggregate_types::LOAN, cmd, |_, id| Loan::empty(LoanId(id)))
            .unwrap();
    }
    (dispatcher, tenant_id, loan_id)
}

fn repayment(tenant_id: TenantId, loan_id: LoanId, user: UserId) -> LoanCommand {
    LoanCommand::RecordRepayment(RecordRepayment {
        tenant_id,
        loan_id,
        payment_id: Uuid::now_v7(),
        amount: Money::from_minor(10),
        recorded_by: user,
        received_at: Utc::now(),
    })
}

fn bench_schedule_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("schedule_generation");
    let first_due_date = NaiveDate::from_ymd_opt(2026, 1, 31).unwrap();

    for term in [12u32, 52, 260] {
        group.throughput(Throughput::Elements(u64::from(term)));
        for method in [InterestMethod::Flat, InterestMethod::DecliningBalance] {
            let terms = ScheduleTerms {
                principal: Money::from_minor(12_345_678),
                annual_rate: Rate::from_bps(1_850),
                term,
                frequency: RepaymentFrequency::Monthly,
                method,
                first_due_date,
            };
            group.bench_with_input(BenchmarkId::new(format!("{method:?}"), term), &terms, |b, terms| {
                b.iter(|| generate_schedule(black_box(terms)).unwrap());
            });
        }
    }
    group.finish();
}

fn bench_repayment_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("repayment_dispatch");
    group.sample_size(30);

    // Cost grows with stream length: the aggregate is rehydrated on every command.
    for history in [0usize, 50, 250] {
        group.bench_with_input(BenchmarkId::from_parameter(history), &history, |b, &history| {
            let (dispatcher, tenant_id, loan_id) = disbursed_loan(history);
            let user = UserId::new();
            b.iter(|| {
                dispatcher
                    .dispatch(
                        tenant_id,
                        loan_id.0,
                        aggregate_types::LOAN,
                        repayment(tenant_id, loan_id, user),
                        |_, id| Loan::empty(LoanId(id)),
                    )
                    .unwrap()
            });
        });
    }
    group.finish();
}

fn bench_read_model_replay(c: &mut Criterion) {
    let mut group = c.benchmark_group("read_model_replay");
    group.sample_size(20);

    for history in [50usize, 500] {
        let (dispatcher, _, _) = disbursed_loan(history);
        let events = microfin_infra::event_store::EventStore::load_all(dispatcher.store()).unwrap();
        group.throughput(Throughput::Elements(events.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(history), &events, |b, events| {
            b.iter(|| {
                let read_models = ReadModels::new();
                read_models.replay(black_box(events)).unwrap()
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_schedule_generation, bench_repayment_dispatch, bench_read_model_replay);
criterion_main!(benches);
