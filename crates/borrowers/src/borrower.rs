use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use microfin_core::{Aggregate, AggregateId, AggregateRoot, BranchId, DomainError, TenantId};
use microfin_events::Event;

/// Borrower identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BorrowerId(pub AggregateId);

impl BorrowerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BorrowerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BorrowerStatus {
    Active,
    Suspended,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ContactDetails {
    pub phone: Option<String>,
    pub email: Option<String>,
    pub address: Option<String>,
}

/// Aggregate root: Borrower (a client of the institution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Borrower {
    id: BorrowerId,
    tenant_id: Option<TenantId>,
    branch_id: Option<BranchId>,
    name: String,
    national_id: String,
    contact: ContactDetails,
    status: BorrowerStatus,
    version: u64,
    created: bool,
}

impl Borrower {
    pub fn empty(id: BorrowerId) -> Self {
        Self {
            id,
            tenant_id: None,
            branch_id: None,
            name: String::new(),
            national_id: String::new(),
            contact: ContactDetails::default(),
            status: BorrowerStatus::Active,
            version: 0,
            created: false,
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn branch_id(&self) -> Option<BranchId> {
        self.branch_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn national_id(&self) -> &str {
        &self.national_id
    }

    pub fn contact(&self) -> &ContactDetails {
        &self.contact
    }

    pub fn status(&self) -> BorrowerStatus {
        self.status
    }

    /// Suspended borrowers cannot take new loans or open accounts.
    pub fn can_borrow(&self) -> bool {
        self.created && self.status == BorrowerStatus::Active
    }
}

impl AggregateRoot for Borrower {
    type Id = BorrowerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBorrower {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub name: String,
    pub national_id: String,
    pub contact: ContactDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBorrowerDetails {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    /// `None` keeps the current value.
    pub name: Option<String>,
    pub contact: Option<ContactDetails>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspendBorrower {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivateBorrower {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorrowerCommand {
    Register(RegisterBorrower),
    UpdateDetails(UpdateBorrowerDetails),
    Suspend(SuspendBorrower),
    Reactivate(ReactivateBorrower),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerRegistered {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub branch_id: Option<BranchId>,
    pub name: String,
    pub national_id: String,
    pub contact: ContactDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerUpdated {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub name: String,
    pub contact: ContactDetails,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerSuspended {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorrowerReactivated {
    pub tenant_id: TenantId,
    pub borrower_id: BorrowerId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BorrowerEvent {
    Registered(BorrowerRegistered),
    Updated(BorrowerUpdated),
    Suspended(BorrowerSuspended),
    Reactivated(BorrowerReactivated),
}

impl Event for BorrowerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BorrowerEvent::Registered(_) => "borrowers.borrower.registered",
            BorrowerEvent::Updated(_) => "borrowers.borrower.updated",
            BorrowerEvent::Suspended(_) => "borrowers.borrower.suspended",
            BorrowerEvent::Reactivated(_) => "borrowers.borrower.reactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BorrowerEvent::Registered(e) => e.occurred_at,
            BorrowerEvent::Updated(e) => e.occurred_at,
            BorrowerEvent::Suspended(e) => e.occurred_at,
            BorrowerEvent::Reactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Borrower {
    type Command = BorrowerCommand;
    type Event = BorrowerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BorrowerEvent::Registered(e) => {
                self.id = e.borrower_id;
                self.tenant_id = Some(e.tenant_id);
                self.branch_id = e.branch_id;
                self.name = e.name.clone();
                self.national_id = e.national_id.clone();
                self.contact = e.contact.clone();
                self.status = BorrowerStatus::Active;
                self.created = true;
            }
            BorrowerEvent::Updated(e) => {
                self.name = e.name.clone();
                self.contact = e.contact.clone();
            }
            BorrowerEvent::Suspended(_) => self.status = BorrowerStatus::Suspended,
            BorrowerEvent::Reactivated(_) => self.status = BorrowerStatus::Active,
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BorrowerCommand::Register(cmd) => self.handle_register(cmd),
            BorrowerCommand::UpdateDetails(cmd) => self.handle_update(cmd),
            BorrowerCommand::Suspend(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.borrower_id)?;
                if self.status == BorrowerStatus::Suspended {
                    return Err(DomainError::conflict("borrower is already suspended"));
                }
                Ok(vec![BorrowerEvent::Suspended(BorrowerSuspended {
                    tenant_id: cmd.tenant_id,
                    borrower_id: cmd.borrower_id,
                    reason: cmd.reason.clone(),
                    occurred_at: cmd.occurred_at,
                })])
            }
            BorrowerCommand::Reactivate(cmd) => {
                self.ensure_existing(cmd.tenant_id, cmd.borrower_id)?;
                if self.status == BorrowerStatus::Active {
                    return Err(DomainError::conflict("borrower is already active"));
                }
                Ok(vec![BorrowerEvent::Reactivated(BorrowerReactivated {
                    tenant_id: cmd.tenant_id,
                    borrower_id: cmd.borrower_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
        }
    }
}

fn non_blank(value: &str, field: &str) -> Result<String, DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

impl Borrower {
    fn ensure_existing(&self, tenant_id: TenantId, borrower_id: BorrowerId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("tenant mismatch"));
        }
        if self.id != borrower_id {
            return Err(DomainError::invariant("borrower_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterBorrower) -> Result<Vec<BorrowerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("borrower already exists"));
        }
        let name = non_blank(&cmd.name, "name")?;
        let national_id = non_blank(&cmd.national_id, "national_id")?;

        Ok(vec![BorrowerEvent::Registered(BorrowerRegistered {
            tenant_id: cmd.tenant_id,
            borrower_id: cmd.borrower_id,
            branch_id: cmd.branch_id,
            name,
            national_id,
            contact: cmd.contact.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update(&self, cmd: &UpdateBorrowerDetails) -> Result<Vec<BorrowerEvent>, DomainError> {
        self.ensure_existing(cmd.tenant_id, cmd.borrower_id)?;

        let name = match &cmd.name {
            Some(n) => non_blank(n, "name")?,
            None => self.name.clone(),
        };
        let contact = cmd.contact.clone().unwrap_or_else(|| self.contact.clone());

        Ok(vec![BorrowerEvent::Updated(BorrowerUpdated {
            tenant_id: cmd.tenant_id,
            borrower_id: cmd.borrower_id,
            name,
            contact,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use microfin_events::execute;
    use proptest::prelude::*;

    fn register_cmd(tenant_id: TenantId, borrower_id: BorrowerId, name: &str) -> BorrowerCommand {
        BorrowerCommand::Register(RegisterBorrower {
            tenant_id,
            borrower_id,
            branch_id: Some(BranchId::new()),
            name: name.to_string(),
            national_id: "NID-0042".to_string(),
            contact: ContactDetails { phone: Some("+254700000000".into()), ..Default::default() },
            occurred_at: Utc::now(),
        })
    }

    fn registered() -> (TenantId, Borrower) {
        let tenant_id = TenantId::new();
        let id = BorrowerId::new(AggregateId::new());
        let mut borrower = Borrower::empty(id);
        execute(&mut borrower, &register_cmd(tenant_id, id, "Wanjiru Kamau")).unwrap();
        (tenant_id, borrower)
    }

    #[test]
    fn register_records_branch_and_details() {
        let (tenant_id, b) = registered();
        assert_eq!(b.tenant_id(), Some(tenant_id));
        assert!(b.branch_id().is_some());
        assert_eq!(b.name(), "Wanjiru Kamau");
        assert!(b.can_borrow());
    }

    #[test]
    fn duplicate_registration_conflicts() {
        let (tenant_id, b) = registered();
        let err = b.handle(&register_cmd(tenant_id, *b.id(), "Again")).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn update_keeps_unspecified_fields() {
        let (tenant_id, mut b) = registered();
        let borrower_id = *b.id();
        execute(
            &mut b,
            &BorrowerCommand::UpdateDetails(UpdateBorrowerDetails {
                tenant_id,
                borrower_id,
                name: None,
                contact: Some(ContactDetails { email: Some("w@example.com".into()), ..Default::default() }),
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert_eq!(b.name(), "Wanjiru Kamau");
        assert_eq!(b.contact().email.as_deref(), Some("w@example.com"));
        assert_eq!(b.contact().phone, None);
    }

    #[test]
    fn suspend_blocks_borrowing_until_reactivated() {
        let (tenant_id, mut b) = registered();
        let borrower_id = *b.id();
        let suspend = BorrowerCommand::Suspend(SuspendBorrower {
            tenant_id,
            borrower_id,
            reason: Some("fraud review".into()),
            occurred_at: Utc::now(),
        });
        execute(&mut b, &suspend).unwrap();
        assert!(!b.can_borrow());
        assert!(matches!(b.handle(&suspend), Err(DomainError::Conflict(_))));

        execute(
            &mut b,
            &BorrowerCommand::Reactivate(ReactivateBorrower {
                tenant_id,
                borrower_id,
                occurred_at: Utc::now(),
            }),
        )
        .unwrap();
        assert!(b.can_borrow());
    }

    #[test]
    fn other_tenant_cannot_touch_borrower() {
        let (_, b) = registered();
        let err = b
            .handle(&BorrowerCommand::Suspend(SuspendBorrower {
                tenant_id: TenantId::new(),
                borrower_id: *b.id(),
                reason: None,
                occurred_at: Utc::now(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvariantViolation(_)));
    }

    proptest! {
        #[test]
        fn blank_names_are_rejected(spaces in "[ \t]{0,8}") {
            let id = BorrowerId::new(AggregateId::new());
            let b = Borrower::empty(id);
            let res = b.handle(&register_cmd(TenantId::new(), id, &spaces));
            prop_assert!(matches!(res, Err(DomainError::Validation(_))));
        }
    }
}
