//! Subscription, plan and entitlement management for the caller's tenant.

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
use uuid::Uuid;

use microfin_auth::catalog::{TENANCY_MANAGE, TENANCY_READ};
use microfin_infra::aggregate_types;
use microfin_infra::event_store::StoredEvent;
use microfin_tenancy::{
    ChangePlan, Entitlement, GrantEntitlement, IssueCharge, Plan, ReactivateTenant, RegisterTenant, RevokeEntitlement,
    SettleCharge, SuspendTenant, Tenant, TenantCommand, tenant_aggregate_id,
};

use crate::app::errors::{ApiResult, dispatch_error_to_response, fail};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/plans", get(list_plans))
        .route("/subscription", get(get_subscription).post(register_tenant))
        .route("/subscription/plan", post(change_plan))
        .route("/entitlements", post(grant_entitlement))
        .route("/entitlements/:name/revoke", post(revoke_entitlement))
        .route("/suspend", post(suspend_tenant))
        .route("/reactivate", post(reactivate_tenant))
        .route("/charges", post(issue_charge))
        .route("/charges/:id/settle", post(settle_charge))
}

fn dispatch(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    cmd: TenantCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd = CmdAuth::new(cmd, TENANCY_MANAGE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    services
        .dispatch::<Tenant>(
            tenant.tenant_id(),
            tenant_aggregate_id(tenant.tenant_id()),
            aggregate_types::TENANT,
            cmd.inner,
            |_, id| Tenant::empty(id),
        )
        .map_err(dispatch_error_to_response)
}

fn run(services: &AppServices, tenant: &TenantContext, principal: &PrincipalContext, cmd: TenantCommand) -> ApiResult {
    let committed = dispatch(services, tenant, principal, cmd)?;
    Ok(common::committed(StatusCode::OK, tenant.tenant_id(), &committed))
}

pub async fn list_plans(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, TENANCY_READ)?;

    let plans: Vec<_> = Plan::ALL
        .into_iter()
        .map(|plan| {
            json!({
                "code": plan.code(),
                "monthly_fee": plan.monthly_fee(),
                "entitlements": plan.entitlements(),
            })
        })
        .collect();
    Ok(common::items(plans))
}

/// The tenant's subscription; tenants that never registered run on the default plan.
pub async fn get_subscription(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, TENANCY_READ)?;

    if let Some(row) = services.read_models().tenants.get(tenant.tenant_id()) {
        let outstanding = row.outstanding_charges();
        let mut body = serde_json::to_value(&row)
            .map_err(|e| fail(StatusCode::INTERNAL_SERVER_ERROR, "serialization_error", e.to_string()))?;
        body["registered"] = json!(true);
        body["outstanding_charges"] = json!(outstanding);
        return Ok(common::ok(body));
    }

    let plan = services.default_plan();
    Ok(common::ok(json!({
        "tenant_id": tenant.tenant_id().to_string(),
        "registered": false,
        "plan": plan,
        "entitlements": plan.entitlements(),
        "charges": [],
    })))
}

pub async fn register_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::RegisterTenantRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let cmd = TenantCommand::Register(RegisterTenant {
        tenant_id: tenant.tenant_id(),
        name: body.name,
        plan: body.plan,
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, cmd)?;
    Ok(common::committed(StatusCode::CREATED, tenant.tenant_id(), &committed))
}

pub async fn change_plan(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::ChangePlanRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let cmd =
        TenantCommand::ChangePlan(ChangePlan { tenant_id: tenant.tenant_id(), plan: body.plan, occurred_at: Utc::now() });
    run(&services, &tenant, &principal, cmd)
}

pub async fn grant_entitlement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::EntitlementRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let cmd = TenantCommand::Grant(GrantEntitlement {
        tenant_id: tenant.tenant_id(),
        entitlement: body.entitlement,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, cmd)
}

pub async fn revoke_entitlement(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(name): Path<String>,
) -> ApiResult {
    let entitlement: Entitlement = name
        .parse()
        .map_err(|e: microfin_tenancy::UnknownCode| fail(StatusCode::BAD_REQUEST, "unknown_entitlement", e.to_string()))?;
    let cmd = TenantCommand::Revoke(RevokeEntitlement {
        tenant_id: tenant.tenant_id(),
        entitlement,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, cmd)
}

pub async fn suspend_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let cmd = TenantCommand::Suspend(SuspendTenant {
        tenant_id: tenant.tenant_id(),
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    run(&services, &tenant, &principal, cmd)
}

pub async fn reactivate_tenant(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    let cmd = TenantCommand::Reactivate(ReactivateTenant { tenant_id: tenant.tenant_id(), occurred_at: Utc::now() });
    run(&services, &tenant, &principal, cmd)
}

/// Bill the current plan for a period.
pub async fn issue_charge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::IssueChargeRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let charge_id = Uuid::now_v7();
    let cmd = TenantCommand::IssueCharge(IssueCharge {
        tenant_id: tenant.tenant_id(),
        charge_id,
        period: body.period,
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, cmd)?;

    Ok((
        StatusCode::CREATED,
        Json(json!({ "id": charge_id, "events_committed": committed.len() })),
    )
        .into_response())
}

pub async fn settle_charge(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let charge_id: Uuid = common::parse_id(&id, "charge")?;
    let cmd = TenantCommand::SettleCharge(SettleCharge {
        tenant_id: tenant.tenant_id(),
        charge_id,
        occurred_at: Utc::now(),
    });
    let committed = dispatch(&services, &tenant, &principal, cmd)?;
    Ok(common::committed(StatusCode::OK, charge_id, &committed))
}
