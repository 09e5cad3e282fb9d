use microfin_auth::{PrincipalId, Role};
use microfin_core::{BranchId, TenantId, UserId};

/// Tenant context for a request.
///
/// The tenant always comes from the verified token; the branch is the
/// `x-branch-id` header or the token's branch scope.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
    branch_id: Option<BranchId>,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId, branch_id: Option<BranchId>) -> Self {
        Self { tenant_id, branch_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }
}

/// Principal context for a request (authenticated identity + roles).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal_id: PrincipalId,
    roles: Vec<Role>,
}

impl PrincipalContext {
    pub fn new(principal_id: PrincipalId, roles: Vec<Role>) -> Self {
        Self { principal_id, roles }
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    /// Staff user recorded as the actor on commands.
    pub fn user_id(&self) -> UserId {
        self.principal_id.as_user_id()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}
