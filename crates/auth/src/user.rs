//! Staff user aggregate (event-sourced): the UserRole side of RBAC.
//!
//! Tenant isolation and privilege escalation are enforced here, not in the API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use microfin_core::{Aggregate, AggregateRoot, BranchId, DomainError, TenantId, UserId};
use microfin_events::Event;

use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    #[default]
    Active,
    Suspended,
}

/// Staff user.
///
/// # Invariants
/// - `tenant_id` never changes after creation.
/// - Suspended users cannot be assigned roles.
/// - Only `admin` may grant a role the actor does not hold.
#[derive(Debug, Clone)]
pub struct User {
    pub id: UserId,
    pub tenant_id: Option<TenantId>,
    pub email: String,
    pub display_name: String,
    pub home_branch: Option<BranchId>,
    pub roles: Vec<Role>,
    pub status: UserStatus,
    pub version: u64,
    pub created: bool,
}

impl User {
    pub fn empty(id: UserId) -> Self {
        Self {
            id,
            tenant_id: None,
            email: String::new(),
            display_name: String::new(),
            home_branch: None,
            roles: Vec::new(),
            status: UserStatus::Active,
            version: 0,
            created: false,
        }
    }

    fn ensure_exists_in(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::NotFound);
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }

    fn has_role(&self, role: &Role) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

impl AggregateRoot for User {
    type Id = UserId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub home_branch: Option<BranchId>,
    pub initial_roles: Vec<Role>,
    /// Roles of the acting principal (escalation check on initial roles).
    pub actor_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRole {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub actor_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokeRole {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivateUser {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserCommand {
    Create(CreateUser),
    AssignRole(AssignRole),
    RevokeRole(RevokeRole),
    Suspend(SuspendUser),
    Activate(ActivateUser),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreated {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub email: String,
    pub display_name: String,
    pub home_branch: Option<BranchId>,
    pub initial_roles: Vec<Role>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssigned {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRevoked {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub role: Role,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSuspended {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserActivated {
    pub tenant_id: TenantId,
    pub user_id: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum UserEvent {
    Created(UserCreated),
    RoleAssigned(RoleAssigned),
    RoleRevoked(RoleRevoked),
    Suspended(UserSuspended),
    Activated(UserActivated),
}

impl Event for UserEvent {
    fn event_type(&self) -> &'static str {
        match self {
            UserEvent::Created(_) => "auth.user.created",
            UserEvent::RoleAssigned(_) => "auth.user.role_assigned",
            UserEvent::RoleRevoked(_) => "auth.user.role_revoked",
            UserEvent::Suspended(_) => "auth.user.suspended",
            UserEvent::Activated(_) => "auth.user.activated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            UserEvent::Created(e) => e.occurred_at,
            UserEvent::RoleAssigned(e) => e.occurred_at,
            UserEvent::RoleRevoked(e) => e.occurred_at,
            UserEvent::Suspended(e) => e.occurred_at,
            UserEvent::Activated(e) => e.occurred_at,
        }
    }
}

fn ensure_may_grant(actor_roles: &[Role], role: &Role) -> Result<(), DomainError> {
    let actor_is_admin = actor_roles.iter().any(Role::is_admin);
    if actor_is_admin || actor_roles.contains(role) {
        Ok(())
    } else {
        Err(DomainError::Unauthorized)
    }
}

impl Aggregate for User {
    type Command = UserCommand;
    type Event = UserEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            UserEvent::Created(e) => {
                self.id = e.user_id;
                self.tenant_id = Some(e.tenant_id);
                self.email = e.email.clone();
                self.display_name = e.display_name.clone();
                self.home_branch = e.home_branch;
                self.roles = e.initial_roles.clone();
                self.status = UserStatus::Active;
                self.created = true;
            }
            UserEvent::RoleAssigned(e) => self.roles.push(e.role.clone()),
            UserEvent::RoleRevoked(e) => self.roles.retain(|r| r != &e.role),
            UserEvent::Suspended(_) => self.status = UserStatus::Suspended,
            UserEvent::Activated(_) => self.status = UserStatus::Active,
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            UserCommand::Create(cmd) => self.handle_create(cmd),
            UserCommand::AssignRole(cmd) => self.handle_assign_role(cmd),
            UserCommand::RevokeRole(cmd) => {
                self.ensure_exists_in(cmd.tenant_id)?;
                if !self.has_role(&cmd.role) {
                    return Err(DomainError::invariant("role not assigned"));
                }
                Ok(vec![UserEvent::RoleRevoked(RoleRevoked {
                    tenant_id: cmd.tenant_id,
                    user_id: cmd.user_id,
                    role: cmd.role.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            UserCommand::Suspend(cmd) => {
                self.ensure_exists_in(cmd.tenant_id)?;
                if self.status == UserStatus::Suspended {
                    return Err(DomainError::invariant("user already suspended"));
                }
                Ok(vec![UserEvent::Suspended(UserSuspended {
                    tenant_id: cmd.tenant_id,
                    user_id: cmd.user_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            UserCommand::Activate(cmd) => {
                self.ensure_exists_in(cmd.tenant_id)?;
                if self.status == UserStatus::Active {
                    return Err(DomainError::invariant("user already active"));
                }
                Ok(vec![UserEvent::Activated(UserActivated {
                    tenant_id: cmd.tenant_id,
                    user_id: cmd.user_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

impl User {
    fn handle_create(&self, cmd: &CreateUser) -> Result<Vec<UserEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("user already exists"));
        }
        let email = cmd.email.trim();
        if email.is_empty() || !email.contains('@') {
            return Err(DomainError::validation("invalid email format"));
        }
        if cmd.display_name.trim().is_empty() {
            return Err(DomainError::validation("display name cannot be empty"));
        }
        for role in &cmd.initial_roles {
            ensure_may_grant(&cmd.actor_roles, role)?;
        }

        let mut roles: Vec<Role> = Vec::new();
        for role in &cmd.initial_roles {
            if !roles.contains(role) {
                roles.push(role.clone());
            }
        }

        Ok(vec![UserEvent::Created(UserCreated {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            email: email.to_lowercase(),
            display_name: cmd.display_name.trim().to_string(),
            home_branch: cmd.home_branch,
            initial_roles: roles,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_assign_role(&self, cmd: &AssignRole) -> Result<Vec<UserEvent>, DomainError> {
        self.ensure_exists_in(cmd.tenant_id)?;
        if self.status == UserStatus::Suspended {
            return Err(DomainError::invariant("user is suspended"));
        }
        if self.has_role(&cmd.role) {
            return Err(DomainError::invariant("role already assigned"));
        }
        ensure_may_grant(&cmd.actor_roles, &cmd.role)?;

        Ok(vec![UserEvent::RoleAssigned(RoleAssigned {
            tenant_id: cmd.tenant_id,
            user_id: cmd.user_id,
            role: cmd.role.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microfin_events::execute;

    fn created(tenant_id: TenantId, roles: &[&'static str]) -> User {
        let user_id = UserId::new();
        let mut user = User::empty(user_id);
        execute(
            &mut user,
            &UserCommand::Create(CreateUser {
                tenant_id,
                user_id,
                email: " Amina@Example.com ".into(),
                display_name: "Amina".into(),
                home_branch: Some(BranchId::new()),
                initial_roles: roles.iter().map(|r| Role::new(*r)).collect(),
                actor_roles: vec![Role::new("admin")],
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        user
    }

    fn assign(user: &User, tenant_id: TenantId, role: &'static str, actor: &'static str) -> UserCommand {
        UserCommand::AssignRole(AssignRole {
            tenant_id,
            user_id: user.id,
            role: Role::new(role),
            actor_roles: vec![Role::new(actor)],
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn create_normalizes_email_and_keeps_branch() {
        let user = created(TenantId::new(), &["cashier", "cashier"]);
        assert_eq!(user.email, "amina@example.com");
        assert!(user.home_branch.is_some());
        assert_eq!(user.roles, vec![Role::new("cashier")]);
    }

    #[test]
    fn create_rejects_bad_email() {
        let user = User::empty(UserId::new());
        let cmd = UserCommand::Create(CreateUser {
            tenant_id: TenantId::new(),
            user_id: user.id,
            email: "nope".into(),
            display_name: "X".into(),
            home_branch: None,
            initial_roles: vec![],
            actor_roles: vec![Role::new("admin")],
            occurred_at: Utc::now(),
        });
        assert!(matches!(user.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn manager_cannot_grant_admin() {
        let tenant_id = TenantId::new();
        let user = created(tenant_id, &[]);
        let err = user.handle(&assign(&user, tenant_id, "admin", "branch_manager")).unwrap_err();
        assert_eq!(err, DomainError::Unauthorized);
    }

    #[test]
    fn holder_may_grant_own_role() {
        let tenant_id = TenantId::new();
        let mut user = created(tenant_id, &[]);
        let cmd = assign(&user, tenant_id, "cashier", "cashier");
        execute(&mut user, &cmd).unwrap();
        assert_eq!(user.roles, vec![Role::new("cashier")]);
    }

    #[test]
    fn suspended_user_gets_no_roles() {
        let tenant_id = TenantId::new();
        let mut user = created(tenant_id, &[]);
        let user_id = user.id;
        execute(
            &mut user,
            &UserCommand::Suspend(SuspendUser {
                tenant_id,
                user_id,
                reason: "leave".into(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        let err = user.handle(&assign(&user, tenant_id, "auditor", "admin")).unwrap_err();
        assert!(err.to_string().contains("suspended"));

        execute(
            &mut user,
            &UserCommand::Activate(ActivateUser { tenant_id, user_id, occurred_at: Utc::now() }),
        )
        .unwrap();
        assert_eq!(user.status, UserStatus::Active);
    }

    #[test]
    fn other_tenant_is_rejected() {
        let user = created(TenantId::new(), &[]);
        let err = user.handle(&assign(&user, TenantId::new(), "auditor", "admin")).unwrap_err();
        assert!(err.to_string().contains("tenant"));
    }

    #[test]
    fn revoke_removes_role() {
        let tenant_id = TenantId::new();
        let mut user = created(tenant_id, &["loan_officer"]);
        let revoke = UserCommand::RevokeRole(RevokeRole {
            tenant_id,
            user_id: user.id,
            role: Role::new("loan_officer"),
            occurred_at: Utc::now(),
        });
        execute(&mut user, &revoke).unwrap();
        assert!(user.roles.is_empty());
        assert!(user.handle(&revoke).is_err());
    }
}
