//! Tenant-defined role (event-sourced): the Role / RolePermission side of RBAC.
//!
//! A definition replaces the built-in seed for a role name within one tenant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use microfin_core::{Aggregate, AggregateId, AggregateRoot, DomainError, TenantId};
use microfin_events::Event;

use crate::Permission;
use crate::catalog::is_known_permission;

/// Deterministic stream id for a role name (same name, same stream, per tenant).
pub fn role_aggregate_id(name: &str) -> AggregateId {
    AggregateId::from_uuid(Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("microfin.role:{name}").as_bytes()))
}

#[derive(Debug, Clone)]
pub struct RoleDefinition {
    pub id: AggregateId,
    pub tenant_id: Option<TenantId>,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub version: u64,
    pub defined: bool,
}

impl RoleDefinition {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            description: None,
            permissions: Vec::new(),
            version: 0,
            defined: false,
        }
    }

    fn ensure_defined(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.defined {
            return Err(DomainError::NotFound);
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }
}

impl AggregateRoot for RoleDefinition {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefineRole {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantPermission {
    pub tenant_id: TenantId,
    pub permission: Permission,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokePermission {
    pub tenant_id: TenantId,
    pub permission: Permission,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoleDefinitionCommand {
    Define(DefineRole),
    Grant(GrantPermission),
    Revoke(RevokePermission),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDefined {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: Option<String>,
    pub permissions: Vec<Permission>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermissionGranted {
    pub tenant_id: TenantId,
    pub name: String,
    pub permission: Permission,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermissionRevoked {
    pub tenant_id: TenantId,
    pub name: String,
    pub permission: Permission,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RoleDefinitionEvent {
    Defined(RoleDefined),
    PermissionGranted(RolePermissionGranted),
    PermissionRevoked(RolePermissionRevoked),
}

impl Event for RoleDefinitionEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RoleDefinitionEvent::Defined(_) => "auth.role.defined",
            RoleDefinitionEvent::PermissionGranted(_) => "auth.role.permission_granted",
            RoleDefinitionEvent::PermissionRevoked(_) => "auth.role.permission_revoked",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            RoleDefinitionEvent::Defined(e) => e.occurred_at,
            RoleDefinitionEvent::PermissionGranted(e) => e.occurred_at,
            RoleDefinitionEvent::PermissionRevoked(e) => e.occurred_at,
        }
    }
}

fn validate_permission(p: &Permission) -> Result<(), DomainError> {
    if p.is_wildcard() {
        return Err(DomainError::validation("wildcard is reserved for the admin role"));
    }
    if !is_known_permission(p.as_str()) {
        return Err(DomainError::validation(format!("unknown permission '{p}'")));
    }
    Ok(())
}

impl Aggregate for RoleDefinition {
    type Command = RoleDefinitionCommand;
    type Event = RoleDefinitionEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RoleDefinitionEvent::Defined(e) => {
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.description = e.description.clone();
                self.permissions = e.permissions.clone();
                self.defined = true;
            }
            RoleDefinitionEvent::PermissionGranted(e) => self.permissions.push(e.permission.clone()),
            RoleDefinitionEvent::PermissionRevoked(e) => self.permissions.retain(|p| p != &e.permission),
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RoleDefinitionCommand::Define(cmd) => {
                if self.defined {
                    return Err(DomainError::conflict(format!("role '{}' already defined", self.name)));
                }
                let name = cmd.name.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                    return Err(DomainError::validation("role name must be lowercase letters and '_'"));
                }
                if name == "admin" {
                    return Err(DomainError::validation("the admin role cannot be redefined"));
                }
                let mut permissions: Vec<Permission> = Vec::new();
                for p in &cmd.permissions {
                    validate_permission(p)?;
                    if !permissions.contains(p) {
                        permissions.push(p.clone());
                    }
                }
                Ok(vec![RoleDefinitionEvent::Defined(RoleDefined {
                    tenant_id: cmd.tenant_id,
                    name: name.to_string(),
                    description: cmd.description.clone(),
                    permissions,
                    occurred_at: cmd.occurred_at,
                })])
            }
            RoleDefinitionCommand::Grant(cmd) => {
                self.ensure_defined(cmd.tenant_id)?;
                validate_permission(&cmd.permission)?;
                if self.permissions.contains(&cmd.permission) {
                    return Err(DomainError::invariant("permission already granted"));
                }
                Ok(vec![RoleDefinitionEvent::PermissionGranted(RolePermissionGranted {
                    tenant_id: cmd.tenant_id,
                    name: self.name.clone(),
                    permission: cmd.permission.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            RoleDefinitionCommand::Revoke(cmd) => {
                self.ensure_defined(cmd.tenant_id)?;
                if !self.permissions.contains(&cmd.permission) {
                    return Err(DomainError::invariant("permission not granted"));
                }
                Ok(vec![RoleDefinitionEvent::PermissionRevoked(RolePermissionRevoked {
                    tenant_id: cmd.tenant_id,
                    name: self.name.clone(),
                    permission: cmd.permission.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{LOANS_READ, LOANS_REPAY};
    use microfin_events::execute;

    fn defined(tenant_id: TenantId) -> RoleDefinition {
        let mut role = RoleDefinition::empty(role_aggregate_id("collector"));
        execute(
            &mut role,
            &RoleDefinitionCommand::Define(DefineRole {
                tenant_id,
                name: "collector".into(),
                description: Some("Field collections".into()),
                permissions: vec![Permission::from_static(LOANS_READ), Permission::from_static(LOANS_READ)],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        role
    }

    #[test]
    fn ids_are_stable_per_name() {
        assert_eq!(role_aggregate_id("cashier"), role_aggregate_id("cashier"));
        assert_ne!(role_aggregate_id("cashier"), role_aggregate_id("auditor"));
    }

    #[test]
    fn define_dedups_permissions() {
        let role = defined(TenantId::new());
        assert_eq!(role.permissions, vec![Permission::from_static(LOANS_READ)]);
        assert_eq!(role.version, 1);
    }

    #[test]
    fn grant_and_revoke() {
        let tenant_id = TenantId::new();
        let mut role = defined(tenant_id);
        let grant = RoleDefinitionCommand::Grant(GrantPermission {
            tenant_id,
            permission: Permission::from_static(LOANS_REPAY),
            occurred_at: Utc::now(),
        });
        execute(&mut role, &grant).unwrap();
        assert!(role.handle(&grant).is_err());

        execute(
            &mut role,
            &RoleDefinitionCommand::Revoke(RevokePermission {
                tenant_id,
                permission: Permission::from_static(LOANS_READ),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(role.permissions, vec![Permission::from_static(LOANS_REPAY)]);
    }

    #[test]
    fn rejects_wildcard_unknown_and_admin() {
        let role = RoleDefinition::empty(role_aggregate_id("x"));
        let define = |name: &str, p: Permission| {
            RoleDefinitionCommand::Define(DefineRole {
                tenant_id: TenantId::new(),
                name: name.into(),
                description: None,
                permissions: vec![p],
                occurred_at: Utc::now(),
            })
        };
        assert!(role.handle(&define("x", Permission::WILDCARD)).is_err());
        assert!(role.handle(&define("x", Permission::new("loans.launder"))).is_err());
        assert!(role.handle(&define("admin", Permission::from_static(LOANS_READ))).is_err());
        assert!(role.handle(&define("Bad Name", Permission::from_static(LOANS_READ))).is_err());
    }

    #[test]
    fn other_tenant_cannot_grant() {
        let role = defined(TenantId::new());
        let err = role
            .handle(&RoleDefinitionCommand::Grant(GrantPermission {
                tenant_id: TenantId::new(),
                permission: Permission::from_static(LOANS_REPAY),
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }
}
