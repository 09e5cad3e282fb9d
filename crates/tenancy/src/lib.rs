//! SaaS tenancy: plans, entitlements and subscription billing.

pub mod plan;
pub mod tenant;

pub use plan::{Entitlement, Plan, UnknownCode};
pub use tenant::{
    ChangePlan, Charge, ChargeIssued, ChargeSettled, EntitlementGranted, EntitlementRevoked, GrantEntitlement,
    IssueCharge, PlanChanged, ReactivateTenant, RegisterTenant, RevokeEntitlement, SettleCharge, SuspendTenant, Tenant,
    TenantCommand, TenantEvent, TenantReactivated, TenantRegistered, TenantStatus, TenantSuspended,
    effective_entitlements, tenant_aggregate_id,
};
