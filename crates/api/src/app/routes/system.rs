use std::sync::Arc;

use axum::{
    Json,
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use microfin_auth::catalog::STREAM_SUBSCRIBE;

use crate::app::errors::{ApiResult, dispatch_error_to_response};
use crate::app::routes::common;
use crate::app::services::{self, AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Identity, scope and effective permissions of the caller.
pub async fn whoami(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    let permissions =
        authz::effective_permissions(&services, &tenant, principal.roles()).map_err(dispatch_error_to_response)?;
    let entitlements = services.entitlements(tenant.tenant_id()).map_err(dispatch_error_to_response)?;

    Ok(Json(serde_json::json!({
        "tenant_id": tenant.tenant_id().to_string(),
        "branch_id": tenant.branch_id().map(|b| b.to_string()),
        "principal_id": principal.principal_id().to_string(),
        "roles": principal.roles().iter().map(|r| r.as_str()).collect::<Vec<_>>(),
        "permissions": permissions,
        "entitlements": entitlements,
    }))
    .into_response())
}

pub async fn stream(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> Response {
    if let Err(denied) = common::require(&services, &tenant, &principal, STREAM_SUBSCRIBE) {
        return denied;
    }
    services::tenant_sse_stream(services, tenant.tenant_id()).into_response()
}
