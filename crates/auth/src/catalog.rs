//! Permission catalog and built-in role seeds.
//!
//! One resolver decides what a role grants: a tenant-defined role (from the
//! `RoleDefinition` aggregate) wins; otherwise the built-in seed applies;
//! unknown roles grant nothing.

use crate::Permission;

pub const BORROWERS_READ: &str = "borrowers.read";
pub const BORROWERS_WRITE: &str = "borrowers.write";
pub const LOANS_READ: &str = "loans.read";
pub const LOANS_APPLY: &str = "loans.apply";
pub const LOANS_APPROVE: &str = "loans.approve";
pub const LOANS_DISBURSE: &str = "loans.disburse";
pub const LOANS_REPAY: &str = "loans.repay";
pub const LOANS_REVERSE: &str = "loans.reverse";
pub const LOANS_CLOSE: &str = "loans.close";
pub const LOANS_PENALIZE: &str = "loans.penalize";
pub const PRODUCTS_WRITE: &str = "products.write";
pub const SAVINGS_READ: &str = "savings.read";
pub const SAVINGS_OPEN: &str = "savings.open";
pub const SAVINGS_DEPOSIT: &str = "savings.deposit";
pub const SAVINGS_WITHDRAW: &str = "savings.withdraw";
pub const SAVINGS_REVERSE: &str = "savings.reverse";
pub const DISBURSEMENTS_MANAGE: &str = "disbursements.manage";
pub const LEDGER_READ: &str = "ledger.read";
pub const LEDGER_POST: &str = "ledger.post";
pub const PAYROLL_READ: &str = "payroll.read";
pub const PAYROLL_MANAGE: &str = "payroll.manage";
pub const TENANCY_READ: &str = "tenancy.read";
pub const TENANCY_MANAGE: &str = "tenancy.manage";
pub const RBAC_READ: &str = "rbac.read";
pub const RBAC_MANAGE: &str = "rbac.manage";
pub const STREAM_SUBSCRIBE: &str = "stream.subscribe";

/// Every grantable permission with a short description.
pub const PERMISSION_CATALOG: &[(&str, &str)] = &[
    (BORROWERS_READ, "View borrowers"),
    (BORROWERS_WRITE, "Register and maintain borrowers"),
    (LOANS_READ, "View loans, schedules and repayments"),
    (LOANS_APPLY, "Submit loan applications"),
    (LOANS_APPROVE, "Approve or reject loan applications"),
    (LOANS_DISBURSE, "Disburse approved loans"),
    (LOANS_REPAY, "Record loan repayments"),
    (LOANS_REVERSE, "Reverse recorded repayments"),
    (LOANS_CLOSE, "Close or write off loans"),
    (LOANS_PENALIZE, "Assess penalties and flag delinquency"),
    (PRODUCTS_WRITE, "Define and retire loan products"),
    (SAVINGS_READ, "View savings accounts and transactions"),
    (SAVINGS_OPEN, "Open and close savings accounts"),
    (SAVINGS_DEPOSIT, "Record savings deposits"),
    (SAVINGS_WITHDRAW, "Record savings withdrawals"),
    (SAVINGS_REVERSE, "Reverse savings transactions"),
    (DISBURSEMENTS_MANAGE, "Create and progress disbursement batches"),
    (LEDGER_READ, "View journal, balances and trial balance"),
    (LEDGER_POST, "Post and reverse manual journal entries"),
    (PAYROLL_READ, "View payroll runs"),
    (PAYROLL_MANAGE, "Create, approve and post payroll runs"),
    (TENANCY_READ, "View tenant plan, entitlements and charges"),
    (TENANCY_MANAGE, "Change plan, entitlements and billing"),
    (RBAC_READ, "View users and roles"),
    (RBAC_MANAGE, "Manage users, roles and grants"),
    (STREAM_SUBSCRIBE, "Subscribe to the realtime stream"),
];

/// Names of the built-in roles, in display order.
pub const BUILTIN_ROLES: &[&str] = &[
    "admin",
    "branch_manager",
    "loan_officer",
    "cashier",
    "accountant",
    "auditor",
];

pub fn is_known_permission(name: &str) -> bool {
    name == "*" || PERMISSION_CATALOG.iter().any(|(p, _)| *p == name)
}

pub fn role_description(role: &str) -> Option<&'static str> {
    match role {
        "admin" => Some("Tenant administrator with every permission"),
        "branch_manager" => Some("Runs a branch: approvals, disbursements, closures"),
        "loan_officer" => Some("Originates loans and manages borrowers"),
        "cashier" => Some("Takes repayments and savings transactions"),
        "accountant" => Some("Owns the ledger and payroll"),
        "auditor" => Some("Read-only access across the tenant"),
        _ => None,
    }
}

/// Seed permissions for a built-in role (`None` for unknown roles).
pub fn builtin_role_permissions(role: &str) -> Option<Vec<Permission>> {
    let names: &[&'static str] = match role {
        "admin" => &["*"],
        "branch_manager" => &[
            BORROWERS_READ,
            BORROWERS_WRITE,
            LOANS_READ,
            LOANS_APPLY,
            LOANS_APPROVE,
            LOANS_DISBURSE,
            LOANS_REPAY,
            LOANS_REVERSE,
            LOANS_CLOSE,
            LOANS_PENALIZE,
            SAVINGS_READ,
            SAVINGS_OPEN,
            SAVINGS_DEPOSIT,
            SAVINGS_WITHDRAW,
            SAVINGS_REVERSE,
            DISBURSEMENTS_MANAGE,
            LEDGER_READ,
            PAYROLL_READ,
            STREAM_SUBSCRIBE,
        ],
        "loan_officer" => &[
            BORROWERS_READ,
            BORROWERS_WRITE,
            LOANS_READ,
            LOANS_APPLY,
            LOANS_PENALIZE,
            SAVINGS_READ,
            SAVINGS_OPEN,
            STREAM_SUBSCRIBE,
        ],
        "cashier" => &[
            BORROWERS_READ,
            LOANS_READ,
            LOANS_REPAY,
            SAVINGS_READ,
            SAVINGS_DEPOSIT,
            SAVINGS_WITHDRAW,
            STREAM_SUBSCRIBE,
        ],
        "accountant" => &[
            LOANS_READ,
            SAVINGS_READ,
            LEDGER_READ,
            LEDGER_POST,
            PAYROLL_READ,
            PAYROLL_MANAGE,
            DISBURSEMENTS_MANAGE,
            TENANCY_READ,
        ],
        "auditor" => &[
            BORROWERS_READ,
            LOANS_READ,
            SAVINGS_READ,
            LEDGER_READ,
            PAYROLL_READ,
            TENANCY_READ,
            RBAC_READ,
        ],
        _ => return None,
    };
    Some(names.iter().map(|n| Permission::from_static(*n)).collect())
}

/// Resolve what `role` grants within a tenant.
///
/// `tenant_defined` is the tenant's own definition of the role, if any.
pub fn resolve_role(role: &str, tenant_defined: Option<&[Permission]>) -> Vec<Permission> {
    match tenant_defined {
        Some(perms) => perms.to_vec(),
        None => builtin_role_permissions(role).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_seeded_permission_is_in_the_catalog() {
        for role in BUILTIN_ROLES {
            let perms = builtin_role_permissions(role).unwrap();
            assert!(!perms.is_empty(), "{role} has no permissions");
            for p in perms {
                assert!(is_known_permission(p.as_str()), "{role}: unknown {p}");
            }
            assert!(role_description(role).is_some());
        }
    }

    #[test]
    fn only_admin_has_wildcard() {
        for role in BUILTIN_ROLES {
            let wildcard = builtin_role_permissions(role).unwrap().iter().any(|p| p.is_wildcard());
            assert_eq!(wildcard, *role == "admin");
        }
    }

    #[test]
    fn tenant_definition_overrides_seed() {
        let custom = vec![Permission::from_static(LOANS_READ)];
        assert_eq!(resolve_role("cashier", Some(&custom)), custom);
        assert!(resolve_role("cashier", None).contains(&Permission::from_static(LOANS_REPAY)));
    }

    #[test]
    fn unknown_role_grants_nothing() {
        assert!(resolve_role("janitor", None).is_empty());
        assert!(builtin_role_permissions("janitor").is_none());
    }

    #[test]
    fn cashier_cannot_approve() {
        let perms = resolve_role("cashier", None);
        assert!(!perms.contains(&Permission::from_static(LOANS_APPROVE)));
    }
}
