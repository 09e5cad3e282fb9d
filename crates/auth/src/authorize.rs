use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use thiserror::Error;

use microfin_core::TenantId;

use crate::catalog::{BUILTIN_ROLES, PERMISSION_CATALOG, role_description};
use crate::{Permission, PrincipalId, TenantMembership};

/// A fully resolved principal for authorization decisions.
///
/// Built by the API from token claims plus the role resolver; no storage access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub principal_id: PrincipalId,
    pub active_tenant_id: TenantId,
    pub membership: TenantMembership,
}

impl Principal {
    pub fn has_wildcard(&self) -> bool {
        self.membership.permissions.iter().any(Permission::is_wildcard)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("forbidden: missing permission '{0}'")]
    Forbidden(String),
}

/// Permissions a command needs before it may be dispatched.
pub trait CommandAuthorization {
    fn required_permissions(&self) -> &[Permission];
}

/// Pure policy check of one permission within the principal's active tenant.
pub fn authorize(principal: &Principal, required: &Permission) -> Result<(), AuthzError> {
    if principal.active_tenant_id != principal.membership.tenant_id {
        return Err(AuthzError::TenantMismatch);
    }

    let granted = principal
        .membership
        .permissions
        .iter()
        .any(|p| p.is_wildcard() || p == required);

    if granted {
        Ok(())
    } else {
        Err(AuthzError::Forbidden(required.as_str().to_string()))
    }
}

/// Why a permission check passes or fails (served by `/rbac/explain`).
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub required_permission: String,
    pub granted: bool,
    pub reason: String,
    pub roles: Vec<String>,
    pub effective_permissions: Vec<String>,
    /// Built-in roles that would grant the permission.
    pub granting_roles: Vec<String>,
}

/// Explain a decision. `role_permissions` is the same resolver the API uses.
pub fn explain_authorization<F>(
    principal: &Principal,
    required: &Permission,
    role_permissions: F,
) -> AuthorizationExplanation
where
    F: Fn(&str) -> Vec<Permission>,
{
    let roles: Vec<String> = principal.membership.roles.iter().map(|r| r.to_string()).collect();

    let mut effective: BTreeSet<String> = principal
        .membership
        .permissions
        .iter()
        .map(|p| p.to_string())
        .collect();
    for role in &principal.membership.roles {
        effective.extend(role_permissions(role.as_str()).into_iter().map(|p| p.to_string()));
    }

    let granting_roles = BUILTIN_ROLES
        .iter()
        .copied()
        .filter(|r| {
            role_permissions(*r)
                .iter()
                .any(|p| p.is_wildcard() || p == required)
        })
        .map(str::to_string)
        .collect();

    let (granted, reason) = match authorize(principal, required) {
        Ok(()) if principal.has_wildcard() => (true, "granted by wildcard permission '*'".to_string()),
        Ok(()) => (true, format!("principal holds '{required}'")),
        Err(AuthzError::TenantMismatch) => (
            false,
            format!(
                "active tenant {} differs from membership tenant {}",
                principal.active_tenant_id, principal.membership.tenant_id
            ),
        ),
        Err(AuthzError::Forbidden(_)) => (false, format!("no assigned role grants '{required}'")),
    };

    AuthorizationExplanation {
        required_permission: required.to_string(),
        granted,
        reason,
        roles,
        effective_permissions: effective.into_iter().collect(),
        granting_roles,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleView {
    pub name: String,
    pub permissions: Vec<String>,
    pub description: Option<String>,
    /// `true` when the tenant has its own definition of the role.
    pub tenant_defined: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PermissionView {
    pub name: String,
    pub description: String,
    pub category: String,
}

/// Complete RBAC view of a tenant: built-in roles, tenant roles, permissions.
#[derive(Debug, Clone, Serialize)]
pub struct RbacRegistry {
    pub roles: BTreeMap<String, RoleView>,
    pub permissions: BTreeMap<String, PermissionView>,
}

impl RbacRegistry {
    /// `tenant_roles` are the tenant's own role definitions (name, grants).
    pub fn build<'a, I>(tenant_roles: I, role_permissions: impl Fn(&str) -> Vec<Permission>) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a [Permission])>,
    {
        let mut roles = BTreeMap::new();
        for name in BUILTIN_ROLES.iter().copied() {
            roles.insert(
                name.to_string(),
                RoleView {
                    name: name.to_string(),
                    permissions: role_permissions(name).iter().map(|p| p.to_string()).collect(),
                    description: role_description(name).map(str::to_string),
                    tenant_defined: false,
                },
            );
        }
        for (name, perms) in tenant_roles {
            roles.insert(
                name.to_string(),
                RoleView {
                    name: name.to_string(),
                    permissions: perms.iter().map(|p| p.to_string()).collect(),
                    description: role_description(name).map(str::to_string),
                    tenant_defined: true,
                },
            );
        }

        let permissions = PERMISSION_CATALOG
            .iter()
            .map(|(name, description)| {
                let p = Permission::from_static(*name);
                (
                    name.to_string(),
                    PermissionView {
                        name: name.to_string(),
                        description: description.to_string(),
                        category: p.category().to_string(),
                    },
                )
            })
            .collect();

        Self { roles, permissions }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LOANS_APPROVE, LOANS_REPAY, resolve_role};
    use crate::Role;

    fn principal(roles: &[&'static str]) -> Principal {
        let tenant_id = TenantId::new();
        let roles: Vec<Role> = roles.iter().map(|r| Role::new(*r)).collect();
        let permissions = roles.iter().flat_map(|r| resolve_role(r.as_str(), None)).collect();
        Principal {
            principal_id: PrincipalId::new(),
            active_tenant_id: tenant_id,
            membership: TenantMembership { tenant_id, roles, permissions },
        }
    }

    #[test]
    fn cashier_may_repay_but_not_approve() {
        let p = principal(&["cashier"]);
        assert!(authorize(&p, &Permission::from_static(LOANS_REPAY)).is_ok());
        assert_eq!(
            authorize(&p, &Permission::from_static(LOANS_APPROVE)),
            Err(AuthzError::Forbidden(LOANS_APPROVE.to_string()))
        );
    }

    #[test]
    fn admin_wildcard_allows_anything() {
        let p = principal(&["admin"]);
        assert!(authorize(&p, &Permission::new("whatever.you.like")).is_ok());
    }

    #[test]
    fn tenant_mismatch_is_rejected_before_permissions() {
        let mut p = principal(&["admin"]);
        p.active_tenant_id = TenantId::new();
        assert_eq!(
            authorize(&p, &Permission::from_static(LOANS_REPAY)),
            Err(AuthzError::TenantMismatch)
        );
    }

    #[test]
    fn explanation_lists_granting_roles() {
        let p = principal(&["cashier"]);
        let e = explain_authorization(&p, &Permission::from_static(LOANS_APPROVE), |r| resolve_role(r, None));
        assert!(!e.granted);
        assert!(e.granting_roles.contains(&"admin".to_string()));
        assert!(e.granting_roles.contains(&"branch_manager".to_string()));
        assert!(!e.granting_roles.contains(&"cashier".to_string()));
    }

    #[test]
    fn registry_marks_tenant_roles() {
        let custom = vec![Permission::from_static(LOANS_REPAY)];
        let reg = RbacRegistry::build([("collector", custom.as_slice())], |r| resolve_role(r, None));
        assert!(reg.roles["collector"].tenant_defined);
        assert!(!reg.roles["cashier"].tenant_defined);
        assert_eq!(reg.permissions.len(), PERMISSION_CATALOG.len());
    }
}
