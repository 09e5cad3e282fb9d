//! Tenant subscription aggregate.
//!
//! One stream per tenant; its aggregate id is the tenant id itself.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use microfin_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, TenantId};
use microfin_events::Event;

use crate::plan::{Entitlement, Plan};

pub fn tenant_aggregate_id(tenant_id: TenantId) -> AggregateId {
    AggregateId::from_uuid(*tenant_id.as_uuid())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
}

/// A subscription charge for one billing period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub charge_id: Uuid,
    /// Billing period label, `YYYY-MM`.
    pub period: String,
    pub plan: Plan,
    pub amount: Money,
    pub issued_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant {
    id: AggregateId,
    tenant_id: Option<TenantId>,
    name: String,
    plan: Plan,
    status: TenantStatus,
    granted: BTreeSet<Entitlement>,
    revoked: BTreeSet<Entitlement>,
    charges: Vec<Charge>,
    version: u64,
}

impl Tenant {
    pub fn empty(id: AggregateId) -> Self {
        Self {
            id,
            tenant_id: None,
            name: String::new(),
            plan: Plan::Starter,
            status: TenantStatus::Active,
            granted: BTreeSet::new(),
            revoked: BTreeSet::new(),
            charges: Vec::new(),
            version: 0,
        }
    }

    pub fn is_registered(&self) -> bool {
        self.tenant_id.is_some()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plan(&self) -> Plan {
        self.plan
    }

    pub fn status(&self) -> TenantStatus {
        self.status
    }

    pub fn charges(&self) -> &[Charge] {
        &self.charges
    }

    /// Plan entitlements plus grants, minus revocations. Empty while suspended.
    pub fn effective_entitlements(&self) -> BTreeSet<Entitlement> {
        effective_entitlements(self.plan, &self.granted, &self.revoked, self.status)
    }

    pub fn has(&self, entitlement: Entitlement) -> bool {
        self.effective_entitlements().contains(&entitlement)
    }

    fn ensure_registered(&self, tenant_id: TenantId) -> Result<(), DomainError> {
        if !self.is_registered() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        Ok(())
    }
}

/// Shared with read models so both sides compute the same set.
pub fn effective_entitlements(
    plan: Plan,
    granted: &BTreeSet<Entitlement>,
    revoked: &BTreeSet<Entitlement>,
    status: TenantStatus,
) -> BTreeSet<Entitlement> {
    if status == TenantStatus::Suspended {
        return BTreeSet::new();
    }
    plan.entitlements()
        .iter()
        .copied()
        .chain(granted.iter().copied())
        .filter(|e| !revoked.contains(e))
        .collect()
}

impl AggregateRoot for Tenant {
    type Id = AggregateId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterTenant {
    pub tenant_id: TenantId,
    pub name: String,
    pub plan: Plan,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangePlan {
    pub tenant_id: TenantId,
    pub plan: Plan,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrantEntitlement {
    pub tenant_id: TenantId,
    pub entitlement: Entitlement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevokeEntitlement {
    pub tenant_id: TenantId,
    pub entitlement: Entitlement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendTenant {
    pub tenant_id: TenantId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateTenant {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueCharge {
    pub tenant_id: TenantId,
    pub charge_id: Uuid,
    pub period: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleCharge {
    pub tenant_id: TenantId,
    pub charge_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantCommand {
    Register(RegisterTenant),
    ChangePlan(ChangePlan),
    Grant(GrantEntitlement),
    Revoke(RevokeEntitlement),
    Suspend(SuspendTenant),
    Reactivate(ReactivateTenant),
    IssueCharge(IssueCharge),
    SettleCharge(SettleCharge),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantRegistered {
    pub tenant_id: TenantId,
    pub name: String,
    pub plan: Plan,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanChanged {
    pub tenant_id: TenantId,
    pub from: Plan,
    pub to: Plan,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementGranted {
    pub tenant_id: TenantId,
    pub entitlement: Entitlement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementRevoked {
    pub tenant_id: TenantId,
    pub entitlement: Entitlement,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSuspended {
    pub tenant_id: TenantId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantReactivated {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeIssued {
    pub tenant_id: TenantId,
    pub charge: Charge,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeSettled {
    pub tenant_id: TenantId,
    pub charge_id: Uuid,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TenantEvent {
    Registered(TenantRegistered),
    PlanChanged(PlanChanged),
    EntitlementGranted(EntitlementGranted),
    EntitlementRevoked(EntitlementRevoked),
    Suspended(TenantSuspended),
    Reactivated(TenantReactivated),
    ChargeIssued(ChargeIssued),
    ChargeSettled(ChargeSettled),
}

impl TenantEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            TenantEvent::Registered(e) => e.tenant_id,
            TenantEvent::PlanChanged(e) => e.tenant_id,
            TenantEvent::EntitlementGranted(e) => e.tenant_id,
            TenantEvent::EntitlementRevoked(e) => e.tenant_id,
            TenantEvent::Suspended(e) => e.tenant_id,
            TenantEvent::Reactivated(e) => e.tenant_id,
            TenantEvent::ChargeIssued(e) => e.tenant_id,
            TenantEvent::ChargeSettled(e) => e.tenant_id,
        }
    }
}

impl Event for TenantEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TenantEvent::Registered(_) => "tenancy.tenant.registered",
            TenantEvent::PlanChanged(_) => "tenancy.tenant.plan_changed",
            TenantEvent::EntitlementGranted(_) => "tenancy.tenant.entitlement_granted",
            TenantEvent::EntitlementRevoked(_) => "tenancy.tenant.entitlement_revoked",
            TenantEvent::Suspended(_) => "tenancy.tenant.suspended",
            TenantEvent::Reactivated(_) => "tenancy.tenant.reactivated",
            TenantEvent::ChargeIssued(_) => "tenancy.tenant.charge_issued",
            TenantEvent::ChargeSettled(_) => "tenancy.tenant.charge_settled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TenantEvent::Registered(e) => e.occurred_at,
            TenantEvent::PlanChanged(e) => e.occurred_at,
            TenantEvent::EntitlementGranted(e) => e.occurred_at,
            TenantEvent::EntitlementRevoked(e) => e.occurred_at,
            TenantEvent::Suspended(e) => e.occurred_at,
            TenantEvent::Reactivated(e) => e.occurred_at,
            TenantEvent::ChargeIssued(e) => e.occurred_at,
            TenantEvent::ChargeSettled(e) => e.occurred_at,
        }
    }
}

fn valid_period(period: &str) -> bool {
    let bytes = period.as_bytes();
    bytes.len() == 7
        && bytes[4] == b'-'
        && bytes[..4].iter().all(u8::is_ascii_digit)
        && bytes[5..].iter().all(u8::is_ascii_digit)
        && matches!(period[5..].parse::<u32>(), Ok(1..=12))
}

impl Aggregate for Tenant {
    type Command = TenantCommand;
    type Event = TenantEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            TenantEvent::Registered(e) => {
                self.id = tenant_aggregate_id(e.tenant_id);
                self.tenant_id = Some(e.tenant_id);
                self.name = e.name.clone();
                self.plan = e.plan;
                self.status = TenantStatus::Active;
            }
            TenantEvent::PlanChanged(e) => self.plan = e.to,
            TenantEvent::EntitlementGranted(e) => {
                self.revoked.remove(&e.entitlement);
                self.granted.insert(e.entitlement);
            }
            TenantEvent::EntitlementRevoked(e) => {
                self.granted.remove(&e.entitlement);
                self.revoked.insert(e.entitlement);
            }
            TenantEvent::Suspended(_) => self.status = TenantStatus::Suspended,
            TenantEvent::Reactivated(_) => self.status = TenantStatus::Active,
            TenantEvent::ChargeIssued(e) => self.charges.push(e.charge.clone()),
            TenantEvent::ChargeSettled(e) => {
                if let Some(c) = self.charges.iter_mut().find(|c| c.charge_id == e.charge_id) {
                    c.settled_at = Some(e.occurred_at);
                }
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            TenantCommand::Register(cmd) => {
                if self.is_registered() {
                    return Err(DomainError::conflict("tenant already registered"));
                }
                let name = cmd.name.trim();
                if name.is_empty() {
                    return Err(DomainError::validation("tenant name cannot be empty"));
                }
                Ok(vec![TenantEvent::Registered(TenantRegistered {
                    tenant_id: cmd.tenant_id,
                    name: name.to_string(),
                    plan: cmd.plan,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TenantCommand::ChangePlan(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                if cmd.plan == self.plan {
                    return Err(DomainError::conflict(format!("already on plan {}", self.plan)));
                }
                Ok(vec![TenantEvent::PlanChanged(PlanChanged {
                    tenant_id: cmd.tenant_id,
                    from: self.plan,
                    to: cmd.plan,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TenantCommand::Grant(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                if self.granted.contains(&cmd.entitlement) {
                    return Err(DomainError::conflict(format!("{} already granted", cmd.entitlement)));
                }
                Ok(vec![TenantEvent::EntitlementGranted(EntitlementGranted {
                    tenant_id: cmd.tenant_id,
                    entitlement: cmd.entitlement,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TenantCommand::Revoke(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                if self.revoked.contains(&cmd.entitlement) {
                    return Err(DomainError::conflict(format!("{} already revoked", cmd.entitlement)));
                }
                Ok(vec![TenantEvent::EntitlementRevoked(EntitlementRevoked {
                    tenant_id: cmd.tenant_id,
                    entitlement: cmd.entitlement,
                    occurred_at: cmd.occurred_at,
                })])
            }
            TenantCommand::Suspend(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                if self.status == TenantStatus::Suspended {
                    return Err(DomainError::conflict("tenant already suspended"));
                }
                Ok(vec![TenantEvent::Suspended(TenantSuspended {
                    tenant_id: cmd.tenant_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            TenantCommand::Reactivate(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                if self.status == TenantStatus::Active {
                    return Err(DomainError::conflict("tenant is active"));
                }
                Ok(vec![TenantEvent::Reactivated(TenantReactivated { tenant_id: cmd.tenant_id, occurred_at: cmd.occurred_at })])
            }
            TenantCommand::IssueCharge(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                if !valid_period(&cmd.period) {
                    return Err(DomainError::validation("period must look like YYYY-MM"));
                }
                if self.charges.iter().any(|c| c.period == cmd.period) {
                    return Err(DomainError::conflict(format!("period {} already charged", cmd.period)));
                }
                if self.charges.iter().any(|c| c.charge_id == cmd.charge_id) {
                    return Err(DomainError::conflict("charge id already used"));
                }
                Ok(vec![TenantEvent::ChargeIssued(ChargeIssued {
                    tenant_id: cmd.tenant_id,
                    charge: Charge {
                        charge_id: cmd.charge_id,
                        period: cmd.period.clone(),
                        plan: self.plan,
                        amount: self.plan.monthly_fee(),
                        issued_at: cmd.occurred_at,
                        settled_at: None,
                    },
                    occurred_at: cmd.occurred_at,
                })])
            }
            TenantCommand::SettleCharge(cmd) => {
                self.ensure_registered(cmd.tenant_id)?;
                let Some(charge) = self.charges.iter().find(|c| c.charge_id == cmd.charge_id) else {
                    return Err(DomainError::not_found());
                };
                if charge.settled_at.is_some() {
                    return Err(DomainError::conflict("charge already settled"));
                }
                Ok(vec![TenantEvent::ChargeSettled(ChargeSettled {
                    tenant_id: cmd.tenant_id,
                    charge_id: cmd.charge_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microfin_events::execute;

    fn registered(plan: Plan) -> (TenantId, Tenant) {
        let tenant_id = TenantId::new();
        let mut t = Tenant::empty(tenant_aggregate_id(tenant_id));
        execute(
            &mut t,
            &TenantCommand::Register(RegisterTenant {
                tenant_id,
                name: "Umoja SACCO".into(),
                plan,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (tenant_id, t)
    }

    #[test]
    fn effective_entitlements_follow_plan_grants_and_revocations() {
        let (tenant_id, mut t) = registered(Plan::Starter);
        assert!(t.has(Entitlement::Loans));
        assert!(!t.has(Entitlement::Payroll));

        let grant = TenantCommand::Grant(GrantEntitlement {
            tenant_id,
            entitlement: Entitlement::Payroll,
            occurred_at: Utc::now(),
        });
        execute(&mut t, &grant).unwrap();
        assert!(t.has(Entitlement::Payroll));

        execute(
            &mut t,
            &TenantCommand::Revoke(RevokeEntitlement {
                tenant_id,
                entitlement: Entitlement::Loans,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(!t.has(Entitlement::Loans));

        // A revoked plan entitlement stays revoked across plan changes.
        execute(&mut t, &TenantCommand::ChangePlan(ChangePlan { tenant_id, plan: Plan::Enterprise, occurred_at: Utc::now() }))
            .unwrap();
        assert!(!t.has(Entitlement::Loans));
        assert!(t.has(Entitlement::Realtime));
    }

    #[test]
    fn suspension_removes_everything() {
        let (tenant_id, mut t) = registered(Plan::Enterprise);
        execute(
            &mut t,
            &TenantCommand::Suspend(SuspendTenant { tenant_id, reason: "unpaid".into(), occurred_at: Utc::now() }),
        )
        .unwrap();
        assert!(t.effective_entitlements().is_empty());

        execute(&mut t, &TenantCommand::Reactivate(ReactivateTenant { tenant_id, occurred_at: Utc::now() })).unwrap();
        assert_eq!(t.effective_entitlements().len(), Entitlement::ALL.len());
    }

    #[test]
    fn charges_use_plan_fee_once_per_period() {
        let (tenant_id, mut t) = registered(Plan::Growth);
        let charge_id = Uuid::now_v7();
        let issue = |charge_id, period: &str| {
            TenantCommand::IssueCharge(IssueCharge { tenant_id, charge_id, period: period.into(), occurred_at: Utc::now() })
        };
        assert!(t.handle(&issue(charge_id, "2024-13")).is_err());
        execute(&mut t, &issue(charge_id, "2024-03")).unwrap();
        assert_eq!(t.charges()[0].amount, Plan::Growth.monthly_fee());
        assert!(matches!(t.handle(&issue(Uuid::now_v7(), "2024-03")), Err(DomainError::Conflict(_))));

        let settle = TenantCommand::SettleCharge(SettleCharge { tenant_id, charge_id, occurred_at: Utc::now() });
        execute(&mut t, &settle).unwrap();
        assert!(t.charges()[0].settled_at.is_some());
        assert!(t.handle(&settle).is_err());
    }

    #[test]
    fn commands_for_another_tenant_fail() {
        let (_, t) = registered(Plan::Starter);
        let cmd = TenantCommand::Suspend(SuspendTenant {
            tenant_id: TenantId::new(),
            reason: "x".into(),
            occurred_at: Utc::now(),
        });
        assert!(t.handle(&cmd).is_err());
    }
}
