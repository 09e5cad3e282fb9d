use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;

use microfin_auth::catalog::{BORROWERS_READ, BORROWERS_WRITE};
use microfin_borrowers::{
    Borrower, BorrowerCommand, BorrowerId, ReactivateBorrower, RegisterBorrower, SuspendBorrower,
    UpdateBorrowerDetails,
};
use microfin_core::AggregateId;
use microfin_infra::aggregate_types;

use crate::app::errors::{ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(register_borrower).get(list_borrowers))
        .route("/:id", get(get_borrower).patch(update_borrower))
        .route("/:id/suspend", post(suspend_borrower))
        .route("/:id/reactivate", post(reactivate_borrower))
        .route("/:id/loans", get(borrower_loans))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    borrower_id: BorrowerId,
    cmd: BorrowerCommand,
    status: StatusCode,
) -> ApiResult {
    let cmd = CmdAuth::new(cmd, BORROWERS_WRITE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    let committed = services
        .dispatch::<Borrower>(tenant.tenant_id(), borrower_id.0, aggregate_types::BORROWER, cmd.inner, |_, id| {
            Borrower::empty(BorrowerId::new(id))
        })
        .map_err(dispatch_error_to_response)?;

    Ok(common::committed(status, borrower_id, &committed))
}

pub async fn register_borrower(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::RegisterBorrowerRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let borrower_id = BorrowerId::new(AggregateId::new());

    let cmd = BorrowerCommand::Register(RegisterBorrower {
        tenant_id: tenant.tenant_id(),
        borrower_id,
        branch_id: tenant.branch_id(),
        name: body.name,
        national_id: body.national_id,
        contact: body.contact,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, borrower_id, cmd, StatusCode::CREATED)
}

pub async fn update_borrower(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::UpdateBorrowerRequest>, JsonRejection>,
) -> ApiResult {
    let borrower_id = BorrowerId::new(common::parse_id(&id, "borrower")?);
    let body = common::body(body)?;

    let cmd = BorrowerCommand::UpdateDetails(UpdateBorrowerDetails {
        tenant_id: tenant.tenant_id(),
        borrower_id,
        name: body.name,
        contact: body.contact,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, borrower_id, cmd, StatusCode::OK)
}

pub async fn suspend_borrower(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::SuspendRequest>, JsonRejection>,
) -> ApiResult {
    let borrower_id = BorrowerId::new(common::parse_id(&id, "borrower")?);
    let body = common::body(body)?;

    let cmd = BorrowerCommand::Suspend(SuspendBorrower {
        tenant_id: tenant.tenant_id(),
        borrower_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, borrower_id, cmd, StatusCode::OK)
}

pub async fn reactivate_borrower(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let borrower_id = BorrowerId::new(common::parse_id(&id, "borrower")?);

    let cmd = BorrowerCommand::Reactivate(ReactivateBorrower {
        tenant_id: tenant.tenant_id(),
        borrower_id,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, borrower_id, cmd, StatusCode::OK)
}

pub async fn get_borrower(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, BORROWERS_READ)?;
    let borrower_id = BorrowerId::new(common::parse_id(&id, "borrower")?);

    services
        .read_models()
        .borrowers
        .get(tenant.tenant_id(), &borrower_id)
        .map(common::ok)
        .ok_or_else(|| not_found("borrower"))
}

pub async fn list_borrowers(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, BORROWERS_READ)?;
    Ok(common::items(services.read_models().borrowers.list(tenant.tenant_id(), tenant.branch_id())))
}

/// Loans of one borrower (loan read permission).
pub async fn borrower_loans(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, microfin_auth::catalog::LOANS_READ)?;
    let borrower_id = BorrowerId::new(common::parse_id(&id, "borrower")?);
    Ok(common::items(services.read_models().loans.for_borrower(tenant.tenant_id(), borrower_id)))
}
