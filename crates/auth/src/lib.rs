//! `microfin-auth` — authentication/authorization boundary.
//!
//! Decoupled from HTTP and storage: token verification, RBAC policy and the
//! event-sourced `User` / `RoleDefinition` aggregates.

pub mod authorize;
pub mod catalog;
pub mod claims;
pub mod jwt;
pub mod permissions;
pub mod principal;
pub mod role_definition;
pub mod roles;
pub mod user;

pub use authorize::{
    AuthorizationExplanation, AuthzError, CommandAuthorization, PermissionView, Principal, RbacRegistry,
    RoleView, authorize, explain_authorization,
};
pub use catalog::{BUILTIN_ROLES, PERMISSION_CATALOG, builtin_role_permissions, is_known_permission, resolve_role};
pub use claims::{JwtClaims, TokenValidationError, validate_claims};
pub use jwt::{Hs256JwtValidator, JwtError, JwtValidator};
pub use permissions::Permission;
pub use principal::{PrincipalId, TenantMembership};
pub use role_definition::{
    DefineRole, GrantPermission, RevokePermission, RoleDefinition, RoleDefined, RoleDefinitionCommand,
    RoleDefinitionEvent, RolePermissionGranted, RolePermissionRevoked, role_aggregate_id,
};
pub use roles::Role;
pub use user::{
    ActivateUser, AssignRole, CreateUser, RevokeRole, RoleAssigned, RoleRevoked, SuspendUser, User,
    UserActivated, UserCommand, UserCreated, UserEvent, UserStatus, UserSuspended,
};
