use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use chrono::Utc;

use microfin_auth::catalog::{PAYROLL_MANAGE, PAYROLL_READ};
use microfin_core::AggregateId;
use microfin_infra::aggregate_types;
use microfin_payroll::{AddPayslip, ApproveRun, CreateRun, PayrollCommand, PayrollRun, PayrollRunId, PostRun};

use crate::app::errors::{ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_run).get(list_runs))
        .route("/:id", get(get_run))
        .route("/:id/payslips", post(add_payslip))
        .route("/:id/approve", post(approve_run))
        .route("/:id/post", post(post_run))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    run_id: PayrollRunId,
    cmd: PayrollCommand,
    status: StatusCode,
) -> ApiResult {
    let cmd = CmdAuth::new(cmd, PAYROLL_MANAGE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    let committed = services
        .dispatch::<PayrollRun>(tenant.tenant_id(), run_id.0, aggregate_types::PAYROLL_RUN, cmd.inner, |_, id| {
            PayrollRun::empty(PayrollRunId::new(id))
        })
        .map_err(dispatch_error_to_response)?;

    Ok(common::committed(status, run_id, &committed))
}

fn run_id(raw: &str) -> Result<PayrollRunId, axum::response::Response> {
    Ok(PayrollRunId::new(common::parse_id(raw, "payroll run")?))
}

pub async fn create_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreatePayrollRunRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let run_id = PayrollRunId::new(AggregateId::new());

    let cmd = PayrollCommand::Create(CreateRun {
        tenant_id: tenant.tenant_id(),
        run_id,
        period_start: body.period_start,
        period_end: body.period_end,
        branch_id: tenant.branch_id(),
        created_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, run_id, cmd, StatusCode::CREATED)
}

pub async fn add_payslip(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::AddPayslipRequest>, JsonRejection>,
) -> ApiResult {
    let run_id = run_id(&id)?;
    let body = common::body(body)?;

    let cmd = PayrollCommand::AddPayslip(AddPayslip {
        tenant_id: tenant.tenant_id(),
        run_id,
        employee: body.employee,
        gross: body.gross,
        deductions: body.deductions,
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, run_id, cmd, StatusCode::CREATED)
}

pub async fn approve_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let run_id = run_id(&id)?;
    let cmd = PayrollCommand::Approve(ApproveRun {
        tenant_id: tenant.tenant_id(),
        run_id,
        approved_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, run_id, cmd, StatusCode::OK)
}

/// Post an approved run; the salary journal entry follows from the committed event.
pub async fn post_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let run_id = run_id(&id)?;
    let cmd = PayrollCommand::Post(PostRun {
        tenant_id: tenant.tenant_id(),
        run_id,
        posted_by: principal.user_id(),
        occurred_at: Utc::now(),
    });
    dispatch(&services, &tenant, &principal, run_id, cmd, StatusCode::OK)
}

pub async fn get_run(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, PAYROLL_READ)?;
    let run_id = run_id(&id)?;

    services
        .read_models()
        .payroll
        .get(tenant.tenant_id(), &run_id)
        .map(common::ok)
        .ok_or_else(|| not_found("payroll run"))
}

pub async fn list_runs(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, PAYROLL_READ)?;
    Ok(common::items(services.read_models().payroll.list(tenant.tenant_id(), tenant.branch_id())))
}
