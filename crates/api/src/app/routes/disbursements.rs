use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

use microfin_auth::catalog::DISBURSEMENTS_MANAGE;
use microfin_core::AggregateId;
use microfin_infra::aggregate_types;
use microfin_lending::{
    BatchCommand, BatchId, BatchItem, BatchStatus, CreateBatch, DisburseLoan, DisbursementBatch, Loan, LoanCommand,
    LoanId, LoanStatus, MarkBatchFailed, MarkBatchPosted, MarkBatchSent, RequeueBatch,
};

use crate::app::errors::{self, ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::routes::loans::dispatch_loan;
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_batch).get(list_batches))
        .route("/:id", get(get_batch))
        .route("/:id/sent", post(mark_sent))
        .route("/:id/failed", post(mark_failed))
        .route("/:id/requeue", post(requeue_batch))
        .route("/:id/posted", post(mark_posted))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    batch_id: BatchId,
    cmd: BatchCommand,
    status: StatusCode,
) -> ApiResult {
    let cmd = CmdAuth::new(cmd, DISBURSEMENTS_MANAGE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    let committed = services
        .dispatch::<DisbursementBatch>(
            tenant.tenant_id(),
            batch_id.0,
            aggregate_types::DISBURSEMENT_BATCH,
            cmd.inner,
            |_, id| DisbursementBatch::empty(BatchId::new(id)),
        )
        .map_err(dispatch_error_to_response)?;

    Ok(common::committed(status, batch_id, &committed))
}

fn batch_id(raw: &str) -> Result<BatchId, Response> {
    Ok(BatchId::new(common::parse_id(raw, "batch")?))
}

fn load_loan(services: &AppServices, tenant: &TenantContext, loan_id: LoanId) -> Result<Loan, Response> {
    services
        .load(tenant.tenant_id(), loan_id.0, |_, id| Loan::empty(LoanId::new(id)))
        .map_err(dispatch_error_to_response)
}

/// A batch that has not failed still owns its loans.
fn open_batch_for(services: &AppServices, tenant: &TenantContext, loan_id: LoanId) -> Option<BatchId> {
    services
        .read_models()
        .disbursements
        .list(tenant.tenant_id())
        .into_iter()
        .find(|b| b.status != BatchStatus::Failed && b.items.iter().any(|i| i.loan_id == loan_id))
        .map(|b| b.batch_id)
}

fn invariant(message: String) -> Response {
    errors::fail(StatusCode::UNPROCESSABLE_ENTITY, "invariant_violation", message)
}

/// Group approved, undisbursed loans into a batch for the payment provider.
pub async fn create_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateBatchRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    common::require(&services, &tenant, &principal, DISBURSEMENTS_MANAGE)?;

    let mut items = Vec::with_capacity(body.items.len());
    for item in body.items {
        let loan_id = LoanId::new(common::parse_id(&item.loan_id, "loan")?);
        let loan = load_loan(&services, &tenant, loan_id)?;
        let Some(terms) = loan.terms() else {
            return Err(not_found("loan"));
        };
        if loan.status() != LoanStatus::Queued || !loan.is_approved() {
            return Err(errors::validation(format!("loan {loan_id} is not approved and awaiting disbursement")));
        }
        if item.amount != terms.principal {
            return Err(errors::validation(format!(
                "batch amount for loan {loan_id} must equal its principal {}",
                terms.principal
            )));
        }
        if let Some(other) = open_batch_for(&services, &tenant, loan_id) {
            return Err(errors::fail(
                StatusCode::CONFLICT,
                "conflict",
                format!("loan {loan_id} is already in batch {other}"),
            ));
        }
        items.push(BatchItem { loan_id, amount: item.amount });
    }

    let batch_id = BatchId::new(AggregateId::new());
    let cmd = BatchCommand::Create(CreateBatch {
        tenant_id: tenant.tenant_id(),
        batch_id,
        reference: body.reference,
        items,
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, batch_id, cmd, StatusCode::CREATED)
}

pub async fn mark_sent(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::MarkBatchSentRequest>, JsonRejection>,
) -> ApiResult {
    let batch_id = batch_id(&id)?;
    let body = common::body(body)?;
    let cmd = BatchCommand::MarkSent(MarkBatchSent {
        tenant_id: tenant.tenant_id(),
        batch_id,
        provider_reference: body.provider_reference,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, batch_id, cmd, StatusCode::OK)
}

pub async fn mark_failed(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let batch_id = batch_id(&id)?;
    let body = common::body(body)?;
    let cmd = BatchCommand::MarkFailed(MarkBatchFailed {
        tenant_id: tenant.tenant_id(),
        batch_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, batch_id, cmd, StatusCode::OK)
}

pub async fn requeue_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let batch_id = batch_id(&id)?;
    common::require(&services, &tenant, &principal, DISBURSEMENTS_MANAGE)?;
    if let Some(batch) = services.read_models().disbursements.get(tenant.tenant_id(), &batch_id) {
        for item in &batch.items {
            if let Some(other) = open_batch_for(&services, &tenant, item.loan_id) {
                return Err(errors::fail(
                    StatusCode::CONFLICT,
                    "conflict",
                    format!("loan {} was re-batched in {other}", item.loan_id),
                ));
            }
        }
    }
    let cmd = BatchCommand::Requeue(RequeueBatch { tenant_id: tenant.tenant_id(), batch_id, occurred_at: Utc::now() });
    dispatch(&services, &tenant, &principal, batch_id, cmd, StatusCode::OK)
}

/// Provider confirmed the payout: disburse every loan of the batch, then close it.
///
/// Loans this batch already disbursed (a retry after a partial failure) are
/// skipped, so the endpoint can be called again until the batch reaches
/// `posted`. Any other loan that is no longer awaiting disbursement fails the
/// whole request before anything is disbursed.
pub async fn mark_posted(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let batch_id = batch_id(&id)?;
    common::require(&services, &tenant, &principal, DISBURSEMENTS_MANAGE)?;

    let batch: DisbursementBatch = services
        .load(tenant.tenant_id(), batch_id.0, |_, id| DisbursementBatch::empty(BatchId::new(id)))
        .map_err(dispatch_error_to_response)?;
    if batch.items().is_empty() {
        return Err(not_found("batch"));
    }
    if batch.status() != BatchStatus::Sent {
        return Err(invariant(format!("cannot post a batch in status {:?}", batch.status())));
    }

    let mut pending = Vec::new();
    for item in batch.items() {
        let loan = load_loan(&services, &tenant, item.loan_id)?;
        if loan.disbursed_at().is_some() {
            if loan.disbursement_batch() == Some(batch_id) {
                continue;
            }
            return Err(invariant(format!("loan {} was disbursed outside this batch", item.loan_id)));
        }
        if loan.status() != LoanStatus::Queued || !loan.is_approved() {
            return Err(invariant(format!(
                "loan {} can no longer be disbursed (status {:?})",
                item.loan_id,
                loan.status()
            )));
        }
        pending.push(item.loan_id);
    }

    let mut disbursed = Vec::new();
    for loan_id in pending {
        let cmd = LoanCommand::Disburse(DisburseLoan {
            tenant_id: tenant.tenant_id(),
            loan_id,
            disbursed_by: principal.user_id(),
            first_due_date: None,
            batch_id: Some(batch_id),
            occurred_at: Utc::now(),
        });
        dispatch_loan(&services, &tenant, &principal, loan_id, cmd, DISBURSEMENTS_MANAGE)?;
        disbursed.push(loan_id.to_string());
    }

    let cmd = CmdAuth::new(
        BatchCommand::MarkPosted(MarkBatchPosted { tenant_id: tenant.tenant_id(), batch_id, occurred_at: Utc::now() }),
        DISBURSEMENTS_MANAGE,
    );
    let committed = services
        .dispatch::<DisbursementBatch>(
            tenant.tenant_id(),
            batch_id.0,
            aggregate_types::DISBURSEMENT_BATCH,
            cmd.inner,
            |_, id| DisbursementBatch::empty(BatchId::new(id)),
        )
        .map_err(dispatch_error_to_response)?;

    info!(tenant_id = %tenant.tenant_id(), batch_id = %batch_id, loans = disbursed.len(), "disbursement batch posted");

    Ok((
        StatusCode::OK,
        Json(json!({
            "id": batch_id.to_string(),
            "events_committed": committed.len(),
            "loans_disbursed": disbursed,
        })),
    )
        .into_response())
}

pub async fn get_batch(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, DISBURSEMENTS_MANAGE)?;
    let batch_id = batch_id(&id)?;

    services
        .read_models()
        .disbursements
        .get(tenant.tenant_id(), &batch_id)
        .map(common::ok)
        .ok_or_else(|| not_found("batch"))
}

pub async fn list_batches(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, DISBURSEMENTS_MANAGE)?;
    Ok(common::items(services.read_models().disbursements.list(tenant.tenant_id())))
}
