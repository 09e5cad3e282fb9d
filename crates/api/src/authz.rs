//! API-side authorization guard for commands and queries.
//!
//! Permissions are resolved per request: each token role maps through the
//! tenant's role definitions (falling back to the built-in seed), so the
//! guard, `/rbac/explain` and `/rbac/users/:id/permissions` agree.

use std::collections::BTreeSet;

use axum::http::StatusCode;
use axum::response::Response;

use microfin_auth::{CommandAuthorization, Permission, Principal, Role, TenantMembership, authorize};
use microfin_infra::command_dispatcher::DispatchError;
use microfin_tenancy::Entitlement;

use crate::app::errors::{dispatch_error_to_response, fail};
use crate::app::services::AppServices;
use crate::context::{PrincipalContext, TenantContext};

/// Union of what `roles` grant within the tenant.
pub fn effective_permissions(
    services: &AppServices,
    tenant: &TenantContext,
    roles: &[Role],
) -> Result<Vec<Permission>, DispatchError> {
    let mut permissions = BTreeSet::new();
    for role in roles {
        permissions.extend(services.role_permissions(tenant.tenant_id(), role.as_str())?);
    }
    Ok(permissions.into_iter().collect())
}

/// Build the authorization principal for the current request.
pub fn resolve_principal(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
) -> Result<Principal, DispatchError> {
    let membership = TenantMembership {
        tenant_id: tenant.tenant_id(),
        roles: principal.roles().to_vec(),
        permissions: effective_permissions(services, tenant, principal.roles())?,
    };

    Ok(Principal { principal_id: principal.principal_id(), active_tenant_id: tenant.tenant_id(), membership })
}

/// Check authorization for a command in the current request context.
///
/// Called **before** dispatching; answers 403 `forbidden` on denial.
pub fn authorize_command<C: CommandAuthorization>(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    command: &C,
) -> Result<(), Response> {
    let principal = resolve_principal(services, tenant, principal).map_err(dispatch_error_to_response)?;

    for perm in command.required_permissions() {
        authorize(&principal, perm).map_err(|e| fail(StatusCode::FORBIDDEN, "forbidden", e.to_string()))?;
    }

    Ok(())
}

/// 403 `entitlement_required` unless the tenant's plan (or grants) cover `entitlement`.
pub fn require_entitlement(
    services: &AppServices,
    tenant: &TenantContext,
    entitlement: Entitlement,
) -> Result<(), Response> {
    let entitlements = services.entitlements(tenant.tenant_id()).map_err(dispatch_error_to_response)?;
    if entitlements.contains(&entitlement) {
        Ok(())
    } else {
        Err(fail(
            StatusCode::FORBIDDEN,
            "entitlement_required",
            format!("tenant is not entitled to '{entitlement}'"),
        ))
    }
}
