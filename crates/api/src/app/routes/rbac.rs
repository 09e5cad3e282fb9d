//! Role and user administration plus authorization debugging.
//!
//! `/rbac/explain` answers "why was this request denied?" using the same
//! per-tenant role resolution as the request guard.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path, rejection::JsonRejection},
    http::StatusCode,
    response::Response,
    routing::{get, post},
};
use chrono::Utc;
use serde_json::json;
use tracing::warn;

use microfin_auth::catalog::{RBAC_MANAGE, RBAC_READ};
use microfin_auth::{
    ActivateUser, AssignRole, CreateUser, DefineRole, GrantPermission, Permission, Principal, PrincipalId,
    RbacRegistry, RevokePermission, RevokeRole, Role, RoleDefinition, RoleDefinitionCommand, SuspendUser,
    TenantMembership, User, UserCommand, explain_authorization, role_aggregate_id,
};
use microfin_core::{AggregateId, TenantId, UserId};
use microfin_infra::aggregate_types;
use microfin_infra::event_store::StoredEvent;

use crate::app::errors::{ApiResult, dispatch_error_to_response, not_found};
use crate::app::routes::common::{self, CmdAuth};
use crate::app::{dto, services::AppServices};
use crate::authz;
use crate::context::{PrincipalContext, TenantContext};

pub fn router() -> Router {
    Router::new()
        .route("/catalog", get(permission_catalog))
        .route("/roles", get(list_roles).post(define_role))
        .route("/roles/:name/grants", post(grant_permission))
        .route("/roles/:name/revoke", post(revoke_permission))
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id/roles", post(assign_role))
        .route("/users/:id/roles/:role/revoke", post(revoke_role))
        .route("/users/:id/suspend", post(suspend_user))
        .route("/users/:id/activate", post(activate_user))
        .route("/users/:id/permissions", get(user_permissions))
        .route("/explain", post(explain))
}

/// Resolver handed to the pure RBAC helpers; a store failure grants nothing.
fn role_resolver(services: &AppServices, tenant_id: TenantId) -> impl Fn(&str) -> Vec<Permission> + '_ {
    move |role: &str| {
        services.role_permissions(tenant_id, role).unwrap_or_else(|err| {
            warn!(tenant_id = %tenant_id, role, error = %err, "role resolution failed");
            Vec::new()
        })
    }
}

fn dispatch_role(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    name: &str,
    cmd: RoleDefinitionCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd = CmdAuth::new(cmd, RBAC_MANAGE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    services
        .dispatch::<RoleDefinition>(
            tenant.tenant_id(),
            role_aggregate_id(name),
            aggregate_types::ROLE,
            cmd.inner,
            |_, id| RoleDefinition::empty(id),
        )
        .map_err(dispatch_error_to_response)
}

fn dispatch_user(
    services: &AppServices,
    tenant: &TenantContext,
    principal: &PrincipalContext,
    user_id: UserId,
    cmd: UserCommand,
) -> Result<Vec<StoredEvent>, Response> {
    let cmd = CmdAuth::new(cmd, RBAC_MANAGE);
    authz::authorize_command(services, tenant, principal, &cmd)?;

    services
        .dispatch::<User>(
            tenant.tenant_id(),
            AggregateId::from_uuid(*user_id.as_uuid()),
            aggregate_types::USER,
            cmd.inner,
            move |_, _| User::empty(user_id),
        )
        .map_err(dispatch_error_to_response)
}

fn user_id(raw: &str) -> Result<UserId, Response> {
    common::parse_id(raw, "user")
}

pub async fn permission_catalog(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, RBAC_READ)?;
    let registry = RbacRegistry::build(std::iter::empty(), role_resolver(&services, tenant.tenant_id()));
    Ok(common::items(registry.permissions.into_values().collect()))
}

/// Built-in roles as resolved for this tenant, plus tenant-defined ones.
pub async fn list_roles(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, RBAC_READ)?;

    let defined = services.read_models().roles.list(tenant.tenant_id());
    let grants: Vec<(String, Vec<Permission>)> =
        defined.into_iter().map(|r| (r.name, r.permissions.into_iter().collect())).collect();

    let registry = RbacRegistry::build(
        grants.iter().map(|(name, perms)| (name.as_str(), perms.as_slice())),
        role_resolver(&services, tenant.tenant_id()),
    );
    Ok(common::items(registry.roles.into_values().collect()))
}

pub async fn define_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::DefineRoleRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let name = body.name.trim().to_string();

    let cmd = RoleDefinitionCommand::Define(DefineRole {
        tenant_id: tenant.tenant_id(),
        name: name.clone(),
        description: body.description,
        permissions: body.permissions.into_iter().map(Permission::new).collect(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_role(&services, &tenant, &principal, &name, cmd)?;
    Ok(common::committed(StatusCode::CREATED, name, &committed))
}

pub async fn grant_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(name): Path<String>,
    body: Result<Json<dto::PermissionRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let cmd = RoleDefinitionCommand::Grant(GrantPermission {
        tenant_id: tenant.tenant_id(),
        permission: Permission::new(body.permission),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_role(&services, &tenant, &principal, &name, cmd)?;
    Ok(common::committed(StatusCode::OK, name, &committed))
}

pub async fn revoke_permission(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(name): Path<String>,
    body: Result<Json<dto::PermissionRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let cmd = RoleDefinitionCommand::Revoke(RevokePermission {
        tenant_id: tenant.tenant_id(),
        permission: Permission::new(body.permission),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_role(&services, &tenant, &principal, &name, cmd)?;
    Ok(common::committed(StatusCode::OK, name, &committed))
}

pub async fn list_users(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, RBAC_READ)?;
    Ok(common::items(services.read_models().users.list(tenant.tenant_id())))
}

/// Register a user. Only roles the caller could grant may be assigned.
pub async fn create_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::CreateUserRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;
    let user_id = body.user_id.map(UserId::from_uuid).unwrap_or_default();

    let cmd = UserCommand::Create(CreateUser {
        tenant_id: tenant.tenant_id(),
        user_id,
        email: body.email,
        display_name: body.display_name,
        home_branch: body.home_branch,
        initial_roles: body.roles.into_iter().map(Role::new).collect(),
        actor_roles: principal.roles().to_vec(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_user(&services, &tenant, &principal, user_id, cmd)?;
    Ok(common::committed(StatusCode::CREATED, user_id, &committed))
}

pub async fn assign_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::AssignRoleRequest>, JsonRejection>,
) -> ApiResult {
    let user_id = user_id(&id)?;
    let body = common::body(body)?;

    let cmd = UserCommand::AssignRole(AssignRole {
        tenant_id: tenant.tenant_id(),
        user_id,
        role: Role::new(body.role),
        actor_roles: principal.roles().to_vec(),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_user(&services, &tenant, &principal, user_id, cmd)?;
    Ok(common::committed(StatusCode::OK, user_id, &committed))
}

pub async fn revoke_role(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path((id, role)): Path<(String, String)>,
) -> ApiResult {
    let user_id = user_id(&id)?;
    let cmd = UserCommand::RevokeRole(RevokeRole {
        tenant_id: tenant.tenant_id(),
        user_id,
        role: Role::new(role),
        occurred_at: Utc::now(),
    });
    let committed = dispatch_user(&services, &tenant, &principal, user_id, cmd)?;
    Ok(common::committed(StatusCode::OK, user_id, &committed))
}

pub async fn suspend_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
    body: Result<Json<dto::ReasonRequest>, JsonRejection>,
) -> ApiResult {
    let user_id = user_id(&id)?;
    let body = common::body(body)?;
    let cmd = UserCommand::Suspend(SuspendUser {
        tenant_id: tenant.tenant_id(),
        user_id,
        reason: body.reason,
        occurred_at: Utc::now(),
    });
    let committed = dispatch_user(&services, &tenant, &principal, user_id, cmd)?;
    Ok(common::committed(StatusCode::OK, user_id, &committed))
}

pub async fn activate_user(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    let user_id = user_id(&id)?;
    let cmd = UserCommand::Activate(ActivateUser { tenant_id: tenant.tenant_id(), user_id, occurred_at: Utc::now() });
    let committed = dispatch_user(&services, &tenant, &principal, user_id, cmd)?;
    Ok(common::committed(StatusCode::OK, user_id, &committed))
}

/// Effective permissions of a registered user, resolved through the tenant's roles.
pub async fn user_permissions(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    Path(id): Path<String>,
) -> ApiResult {
    common::require(&services, &tenant, &principal, RBAC_READ)?;
    let user_id = user_id(&id)?;

    let Some(user) = services.read_models().users.get(tenant.tenant_id(), &user_id) else {
        return Err(not_found("user"));
    };
    let permissions =
        authz::effective_permissions(&services, &tenant, &user.roles).map_err(dispatch_error_to_response)?;

    Ok(common::ok(json!({
        "user_id": user_id.to_string(),
        "roles": user.roles,
        "permissions": permissions,
    })))
}

/// Explain a permission decision for the caller, or for another registered user.
pub async fn explain(
    Extension(services): Extension<Arc<AppServices>>,
    Extension(tenant): Extension<TenantContext>,
    Extension(principal): Extension<PrincipalContext>,
    body: Result<Json<dto::ExplainRequest>, JsonRejection>,
) -> ApiResult {
    let body = common::body(body)?;

    let subject = match body.user_id.as_deref() {
        None => authz::resolve_principal(&services, &tenant, &principal).map_err(dispatch_error_to_response)?,
        Some(raw) => {
            common::require(&services, &tenant, &principal, RBAC_READ)?;
            let user_id = user_id(raw)?;
            let Some(user) = services.read_models().users.get(tenant.tenant_id(), &user_id) else {
                return Err(not_found("user"));
            };
            let permissions =
                authz::effective_permissions(&services, &tenant, &user.roles).map_err(dispatch_error_to_response)?;
            Principal {
                principal_id: PrincipalId::from_uuid(*user_id.as_uuid()),
                active_tenant_id: tenant.tenant_id(),
                membership: TenantMembership { tenant_id: tenant.tenant_id(), roles: user.roles, permissions },
            }
        }
    };

    let required = Permission::new(body.permission);
    let explanation = explain_authorization(&subject, &required, role_resolver(&services, tenant.tenant_id()));
    Ok(common::ok(explanation))
}
