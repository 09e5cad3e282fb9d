use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use microfin_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, Money, TenantId, UserId};
use microfin_events::Event;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PayrollRunId(pub AggregateId);

impl PayrollRunId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PayrollRunId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Draft,
    Approved,
    Posted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deduction {
    pub label: String,
    pub amount: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payslip {
    pub employee: String,
    pub gross: Money,
    pub deductions: Vec<Deduction>,
    pub net: Money,
}

/// Aggregate root: one payroll period for a branch (or the whole tenant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollRun {
    id: PayrollRunId,
    tenant_id: Option<TenantId>,
    branch_id: Option<BranchId>,
    period_start: Option<NaiveDate>,
    period_end: Option<NaiveDate>,
    payslips: Vec<Payslip>,
    status: RunStatus,
    approved_by: Option<UserId>,
    posted_at: Option<DateTime<Utc>>,
    version: u64,
}

impl PayrollRun {
    pub fn empty(id: PayrollRunId) -> Self {
        Self {
            id,
            tenant_id: None,
            branch_id: None,
            period_start: None,
            period_end: None,
            payslips: Vec::new(),
            status: RunStatus::Draft,
            approved_by: None,
            posted_at: None,
            version: 0,
        }
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn payslips(&self) -> &[Payslip] {
        &self.payslips
    }

    pub fn gross_total(&self) -> Money {
        self.payslips.iter().map(|p| p.gross).sum()
    }

    pub fn net_total(&self) -> Money {
        self.payslips.iter().map(|p| p.net).sum()
    }

    pub fn posted_at(&self) -> Option<DateTime<Utc>> {
        self.posted_at
    }

    fn ensure(&self, tenant_id: TenantId, status: RunStatus) -> Result<(), DomainError> {
        if self.tenant_id.is_none() {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.status != status {
            return Err(DomainError::invariant(format!(
                "run is {:?}, expected {:?}",
                self.status, status
            )));
        }
        Ok(())
    }
}

impl AggregateRoot for PayrollRun {
    type Id = PayrollRunId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub branch_id: Option<BranchId>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddPayslip {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub employee: String,
    pub gross: Money,
    pub deductions: Vec<Deduction>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRun {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayrollCommand {
    Create(CreateRun),
    AddPayslip(AddPayslip),
    Approve(ApproveRun),
    Post(PostRun),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCreated {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub branch_id: Option<BranchId>,
    pub created_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayslipAdded {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub payslip: Payslip,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunApproved {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub approved_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

/// Totals are carried so the ledger posting needs no rehydration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunPosted {
    pub tenant_id: TenantId,
    pub run_id: PayrollRunId,
    pub gross: Money,
    pub net: Money,
    pub posted_by: UserId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayrollEvent {
    Created(RunCreated),
    PayslipAdded(PayslipAdded),
    Approved(RunApproved),
    Posted(RunPosted),
}

impl PayrollEvent {
    pub fn tenant_id(&self) -> TenantId {
        match self {
            PayrollEvent::Created(e) => e.tenant_id,
            PayrollEvent::PayslipAdded(e) => e.tenant_id,
            PayrollEvent::Approved(e) => e.tenant_id,
            PayrollEvent::Posted(e) => e.tenant_id,
        }
    }

    pub fn run_id(&self) -> PayrollRunId {
        match self {
            PayrollEvent::Created(e) => e.run_id,
            PayrollEvent::PayslipAdded(e) => e.run_id,
            PayrollEvent::Approved(e) => e.run_id,
            PayrollEvent::Posted(e) => e.run_id,
        }
    }
}

impl Event for PayrollEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PayrollEvent::Created(_) => "payroll.run.created",
            PayrollEvent::PayslipAdded(_) => "payroll.run.payslip_added",
            PayrollEvent::Approved(_) => "payroll.run.approved",
            PayrollEvent::Posted(_) => "payroll.run.posted",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PayrollEvent::Created(e) => e.occurred_at,
            PayrollEvent::PayslipAdded(e) => e.occurred_at,
            PayrollEvent::Approved(e) => e.occurred_at,
            PayrollEvent::Posted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PayrollRun {
    type Command = PayrollCommand;
    type Event = PayrollEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PayrollEvent::Created(e) => {
                self.id = e.run_id;
                self.tenant_id = Some(e.tenant_id);
                self.branch_id = e.branch_id;
                self.period_start = Some(e.period_start);
                self.period_end = Some(e.period_end);
                self.status = RunStatus::Draft;
            }
            PayrollEvent::PayslipAdded(e) => self.payslips.push(e.payslip.clone()),
            PayrollEvent::Approved(e) => {
                self.status = RunStatus::Approved;
                self.approved_by = Some(e.approved_by);
            }
            PayrollEvent::Posted(e) => {
                self.status = RunStatus::Posted;
                self.posted_at = Some(e.occurred_at);
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PayrollCommand::Create(cmd) => {
                if self.tenant_id.is_some() {
                    return Err(DomainError::conflict("payroll run already exists"));
                }
                if cmd.period_end < cmd.period_start {
                    return Err(DomainError::validation("period end precedes period start"));
                }
                Ok(vec![PayrollEvent::Created(RunCreated {
                    tenant_id: cmd.tenant_id,
                    run_id: cmd.run_id,
                    period_start: cmd.period_start,
                    period_end: cmd.period_end,
                    branch_id: cmd.branch_id,
                    created_by: cmd.created_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayrollCommand::AddPayslip(cmd) => {
                self.ensure(cmd.tenant_id, RunStatus::Draft)?;
                let employee = cmd.employee.trim();
                if employee.is_empty() {
                    return Err(DomainError::validation("employee cannot be empty"));
                }
                if self.payslips.iter().any(|p| p.employee == employee) {
                    return Err(DomainError::conflict(format!("{employee} already has a payslip in this run")));
                }
                if !cmd.gross.is_positive() {
                    return Err(DomainError::validation("gross pay must be positive"));
                }
                if cmd.deductions.iter().any(|d| d.amount.is_negative()) {
                    return Err(DomainError::validation("deductions cannot be negative"));
                }
                // Net never exceeds gross, so a bounded gross total bounds the net total too.
                if self.gross_total().checked_add(cmd.gross).is_none() {
                    return Err(DomainError::validation("gross pay overflows the run total"));
                }
                let deducted = Money::checked_sum(cmd.deductions.iter().map(|d| d.amount))
                    .ok_or_else(|| DomainError::validation("deductions overflow"))?;
                let net = cmd.gross - deducted;
                if net.is_negative() {
                    return Err(DomainError::validation(format!(
                        "deductions {deducted} exceed gross pay {}",
                        cmd.gross
                    )));
                }
                Ok(vec![PayrollEvent::PayslipAdded(PayslipAdded {
                    tenant_id: cmd.tenant_id,
                    run_id: cmd.run_id,
                    payslip: Payslip {
                        employee: employee.to_string(),
                        gross: cmd.gross,
                        deductions: cmd.deductions.clone(),
                        net,
                    },
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayrollCommand::Approve(cmd) => {
                self.ensure(cmd.tenant_id, RunStatus::Draft)?;
                if self.payslips.is_empty() {
                    return Err(DomainError::invariant("cannot approve a run without payslips"));
                }
                Ok(vec![PayrollEvent::Approved(RunApproved {
                    tenant_id: cmd.tenant_id,
                    run_id: cmd.run_id,
                    approved_by: cmd.approved_by,
                    occurred_at: cmd.occurred_at,
                })])
            }
            PayrollCommand::Post(cmd) => {
                self.ensure(cmd.tenant_id, RunStatus::Approved)?;
                Ok(vec![PayrollEvent::Posted(RunPosted {
                    tenant_id: cmd.tenant_id,
                    run_id: cmd.run_id,
                    gross: self.gross_total(),
                    net: self.net_total(),
                    posted_by: cmd.posted_by,
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

    fn m(v: i64) -> Money {
        Money::from_minor(v)
    }

    fn draft() -> (TenantId, PayrollRun) {
        let tenant_id = TenantId::new();
        let id = PayrollRunId::new(AggregateId::new());
        let mut run = PayrollRun::empty(id);
        execute(
            &mut run,
            &PayrollCommand::Create(CreateRun {
                tenant_id,
                run_id: id,
                period_start: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                period_end: NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
                branch_id: None,
                created_by: UserId::new(),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        (tenant_id, run)
    }

    fn payslip(tenant_id: TenantId, run_id: PayrollRunId, employee: &str, gross: i64, deductions: &[i64]) -> PayrollCommand {
        PayrollCommand::AddPayslip(AddPayslip {
            tenant_id,
            run_id,
            employee: employee.into(),
            gross: m(gross),
            deductions: deductions.iter().map(|d| Deduction { label: "paye".into(), amount: m(*d) }).collect(),
            occurred_at: Utc::now(),
        })
    }

    #[test]
    fn net_is_gross_less_deductions() {
        let (tenant_id, mut run) = draft();
        let id = *run.id();
        execute(&mut run, &payslip(tenant_id, id, "Wanjiru", 50_000, &[5_000, 1_200])).unwrap();
        assert_eq!(run.payslips()[0].net, m(43_800));

        assert!(run.handle(&payslip(tenant_id, id, "Otieno", 1_000, &[1_001])).is_err());
        assert!(matches!(
            run.handle(&payslip(tenant_id, id, "Wanjiru", 1_000, &[])),
            Err(DomainError::Conflict(_))
        ));
    }

    #[test]
    fn draft_approved_posted() {
        let (tenant_id, mut run) = draft();
        let id = *run.id();
        let approve = PayrollCommand::Approve(ApproveRun { tenant_id, run_id: id, approved_by: UserId::new(), occurred_at: Utc::now() });
        assert!(run.handle(&approve).is_err());

        execute(&mut run, &payslip(tenant_id, id, "Achieng", 30_000, &[3_000])).unwrap();
        execute(&mut run, &payslip(tenant_id, id, "Kamau", 20_000, &[])).unwrap();
        execute(&mut run, &approve).unwrap();
        assert!(run.handle(&payslip(tenant_id, id, "Late", 1_000, &[])).is_err());

        let events = execute(
            &mut run,
            &PayrollCommand::Post(PostRun { tenant_id, run_id: id, posted_by: UserId::new(), occurred_at: Utc::now() }),
        )
        .unwrap();
        let PayrollEvent::Posted(posted) = &events[0] else { panic!("expected Posted") };
        assert_eq!(posted.gross, m(50_000));
        assert_eq!(posted.net, m(47_000));
        assert_eq!(run.status(), RunStatus::Posted);
        assert!(run.posted_at().is_some());
    }

    #[test]
    fn oversized_amounts_are_rejected_not_wrapped() {
        let (tenant_id, mut run) = draft();
        let id = *run.id();
        let err = run.handle(&payslip(tenant_id, id, "Njeri", 1_000, &[i64::MAX, 1])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        execute(&mut run, &payslip(tenant_id, id, "Mwangi", i64::MAX, &[])).unwrap();
        let err = run.handle(&payslip(tenant_id, id, "Odhiambo", 1, &[])).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(run.gross_total(), m(i64::MAX));
    }
}
