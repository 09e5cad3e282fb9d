use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use microfin_auth::catalog::{
    LOANS_APPLY, LOANS_APPROVE, LOANS_CLOSE, LOANS_DISBURSE, LOANS_PENALIZE, LOANS_READ, LOANS_REPAY, LOANS_REVERSE,
};
use microfin_borrowers::{Borrower, BorrowerId};
use microfin_core::AggregateId;
use microfin_infra::aggregate_types;
use microfin_lending::{
    ApplyForLoan, ApproveLoan, AssessPenalty, CloseLoan, DisburseLoan, Loan, LoanCommand, LoanId, LoanProduct,
    LoanStatus, MarkDelinquent, ProductId, RecordRepayment, RejectLoan, ReverseRepayment, ScheduleTerms, WriteOffLoan,
    generate_schedule,
};

use crate::app::errors::{self, ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(apply_for_loan).get(list_loans))
        .route("/:id", get(get_loan))
        .route("/:id/schedule", get(loan_schedule))
        .route("/:id/approve", post(approve_loan))
        .route("/:id/reject", post(reject_loan))
        .route("/:id/disburse", post(disburse_loan))
        .route("/:id/repayments", post(record_repayment))
        .route("/:id/repayments/:payment_id/reverse", post(reverse_repayment))
        .route("/:id/penalties", post(assess_penalty))
        .route("/:id/delinquency", post(mark_delinquent))
        .route("/:id/write-off", post(write_off_loan))
        .route("/:id/close", post(close_loan))
}

pub(crate) fn dispatch_loan(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    loan_id: LoanId,
    cmd: LoanCommand,
    permission: &'static str,
) -> Result<Vec<microfin_infra::event_store::StoredEvent>, axum::response::Response> {
    let cmd = CmdAuth::new(cmd, permission);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    services
        .dispatch::<Loan>(tenant.tenant_id(), loan_id.0, aggregate_types::LOAN, cmd.inner, |_, id| {
            Loan::empty(LoanId::new(id))
        })
        .map_err(dispatch_error_to_response)
}

fn run(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    loan_id: LoanId,
    cmd: LoanCommand,
    permission: &'static str,
) -> ApiResult {
    let committed = dispatch_loan(services, tenant, principal, loan_id, cmd, permission)?;
    Ok(common::committed(StatusCode::OK, loan_id, &committed))
}

fn loan_id(raw: &str) -> Result<LoanId, axum::response::Response> {
    Ok(LoanId::new(common::parse_id(raw, "loan")?))
}

/// Apply for a loan against a product and an eligible borrower.
///
/// The product terms are snapshotted into the loan so later product edits or
/// retirement leave existing loans untouched.
pub async fn apply_for_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::ApplyForLoanRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let borrower_id = BorrowerId::new(common::parse_id(&body.borrower_id, "borrower")?);
    let product_id = ProductId::new(common::parse_id(&body.product_id, "product")?);

    // Fail on permissions before revealing whether the borrower exists.
    common::require(&services, &tenant, &principal, LOANS_APPLY)?;

    let borrower: Borrower = services
        .load(tenant.tenant_id(), borrower_id.0, |_, id| Borrower::empty(BorrowerId::new(id)))
        .map_err(dispatch_error_to_response)?;
    if borrower.tenant_id().is_none() {
        return Err(not_found("borrower"));
    }
    if !borrower.can_borrow() {
        return Err(errors::fail(
            StatusCode::UNPROCESSABLE_ENTITY,
            "invariant_violation",
            "borrower is suspended",
        ));
    }

    let product: LoanProduct = services
        .load(tenant.tenant_id(), product_id.0, |_, id| LoanProduct::empty(ProductId::new(id)))
        .map_err(dispatch_error_to_response)?;
    let Some(snapshot) = product.snapshot().cloned() else {
        return Err(not_found("product"));
    };

    let loan_id = LoanId::new(AggregateId::new());
    let cmd = LoanCommand::Apply(ApplyForLoan {
        tenant_id: tenant.tenant_id(),
        loan_id,
        borrower_id,
        branch_id: tenant.branch_id().or(borrower.branch_id()),
        product: snapshot,
        principal: body.principal,
        term: body.term,
        applied_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_loan(&services, &tenant, &principal, loan_id, cmd, LOANS_APPLY)?;
    Ok(common::committed(StatusCode::CREATED, loan_id, &committed))
}

pub async fn approve_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let cmd = LoanCommand::Approve(ApproveLoan {
        tenant_id: tenant.tenant_id(),
        loan_id,
        approved_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_APPROVE)
}

pub async fn reject_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let body = common::body(body)?;
    let cmd = LoanCommand::Reject(RejectLoan {
        tenant_id: tenant.tenant_id(),
        loan_id,
        rejected_by: principal.user_id(),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_APPROVE)
}

pub async fn disburse_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::DisburseLoanRequest>>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let cmd = LoanCommand::Disburse(DisburseLoan {
        tenant_id: tenant.tenant_id(),
        loan_id,
        disbursed_by: principal.user_id(),
        first_due_date: body.first_due_date,
        batch_id: None,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_DISBURSE)
}

pub async fn record_repayment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::RecordRepaymentRequest>, JsonRejection>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let body = common::body(body)?;
    let payment_id = body.payment_id.unwrap_or_else(Uuid::now_v7);

    let cmd = LoanCommand::RecordRepayment(RecordRepayment {
        tenant_id: tenant.tenant_id(),
        loan_id,
        payment_id,
        amount: body.amount,
        recorded_by: principal.user_id(),
        received_at: body.received_at.unwrap_or_else(Utc::now),
    });
    let committed = dispatch_loan(&services, &tenant, &principal, loan_id, cmd, LOANS_REPAY)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": loan_id.to_string(),
            "payment_id": payment_id,
            "events_committed": committed.len(),
        })),
    )
        .into_response())
}

pub async fn reverse_repayment(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, payment_id)): Path<(String, String)>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let payment_id: Uuid = common::parse_id(&payment_id, "payment")?;
    let body = common::body(body)?;

    let cmd = LoanCommand::ReverseRepayment(ReverseRepayment {
        tenant_id: tenant.tenant_id(),
        loan_id,
        payment_id,
        reversed_by: principal.user_id(),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_REVERSE)
}

pub async fn assess_penalty(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::AssessPenaltyRequest>, JsonRejection>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let body = common::body(body)?;
    let cmd = LoanCommand::AssessPenalty(AssessPenalty {
        tenant_id: tenant.tenant_id(),
        loan_id,
        amount: body.amount,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_PENALIZE)
}

pub async fn mark_delinquent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Option<Json<dto::MarkDelinquentRequest>>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let now = Utc::now();
    let cmd = LoanCommand::MarkDelinquent(MarkDelinquent {
        tenant_id: tenant.tenant_id(),
        loan_id,
        as_of: body.as_of.unwrap_or_else(|| now.date_naive()),
        occurred_at: now,
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_PENALIZE)
}

pub async fn write_off_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let body = common::body(body)?;
    let cmd = LoanCommand::WriteOff(WriteOffLoan {
        tenant_id: tenant.tenant_id(),
        loan_id,
        written_off_by: principal.user_id(),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_CLOSE)
}

pub async fn close_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let loan_id = loan_id(&id)?;
    let cmd = LoanCommand::Close(CloseLoan {
        tenant_id: tenant.tenant_id(),
        loan_id,
        closed_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, loan_id, cmd, LOANS_CLOSE)
}

pub async fn get_loan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LOANS_READ)?;
    let loan_id = loan_id(&id)?;

    services
        .read_models()
        .loans
        .get(tenant.tenant_id(), &loan_id)
        .map(common::ok)
        .ok_or_else(|| not_found("loan"))
}

pub async fn list_loans(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LOANS_READ)?;
    Ok(common::items(services.read_models().loans.list(tenant.tenant_id(), tenant.branch_id())))
}

/// Installments of a disbursed loan; queued loans get a preview dated from today.
pub async fn loan_schedule(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, LOANS_READ)?;
    let loan_id = loan_id(&id)?;

    let Some(loan) = services.read_models().loans.get(tenant.tenant_id(), &loan_id) else {
        return Err(not_found("loan"));
    };

    if loan.status != LoanStatus::Queued || !loan.schedule.is_empty() {
        return Ok(common::ok(json!({ "preview": false, "installments": loan.schedule })));
    }

    let today = Utc::now().date_naive();
    let first_due_date = loan
        .terms
        .frequency
        .due_date(today, 1)
        .ok_or_else(|| errors::validation("due date out of range"))?;
    let installments = generate_schedule(&ScheduleTerms {
        principal: loan.terms.principal,
        annual_rate: loan.terms.annual_rate,
        term: loan.terms.term,
        frequency: loan.terms.frequency,
        method: loan.terms.interest_method,
        first_due_date,
    })
    .map_err(|e| errors::validation(e.to_string()))?;

    Ok(common::ok(json!({ "preview": true, "installments": installments })))
}
