use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use microfin_core::{Aggregate, AggregateId, AggregateRoot, DomainError, Money, Rate, TenantId};
use microfin_events::Event;

use crate::schedule::{InterestMethod, MAX_TERM, RepaymentFrequency};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Terms a loan copies from its product at application time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductSnapshot {
    pub product_id: ProductId,
    pub name: String,
    pub interest_method: InterestMethod,
    pub annual_rate: Rate,
    pub frequency: RepaymentFrequency,
    pub min_principal: Money,
    pub max_principal: Money,
    pub min_term: u32,
    pub max_term: u32,
    /// Charged once on disbursement, as a share of principal.
    pub processing_fee: Rate,
    /// Applied to overdue amounts when a penalty is assessed.
    pub penalty_rate: Rate,
    pub retired: bool,
}

/// Aggregate root: a loan product offered by a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanProduct {
    id: ProductId,
    tenant_id: Option<TenantId>,
    snapshot: Option<ProductSnapshot>,
    version: u64,
}

impl LoanProduct {
    pub fn empty(id: ProductId) -> Self {
        Self { id, tenant_id: None, snapshot: None, version: 0 }
    }

    pub fn snapshot(&self) -> Option<&ProductSnapshot> {
        self.snapshot.as_ref()
    }
}

impl AggregateRoot for LoanProduct {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DefineProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub name: String,
    pub interest_method: InterestMethod,
    pub annual_rate: Rate,
    pub frequency: RepaymentFrequency,
    pub min_principal: Money,
    pub max_principal: Money,
    pub min_term: u32,
    pub max_term: u32,
    pub processing_fee: Rate,
    pub penalty_rate: Rate,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetireProduct {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    Define(DefineProduct),
    Retire(RetireProduct),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductDefined {
    pub tenant_id: TenantId,
    pub product: ProductSnapshot,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRetired {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    Defined(ProductDefined),
    Retired(ProductRetired),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::Defined(_) => "lending.product.defined",
            ProductEvent::Retired(_) => "lending.product.retired",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::Defined(e) => e.occurred_at,
            ProductEvent::Retired(e) => e.occurred_at,
        }
    }
}

/// 100% p.a. ceiling.
const MAX_ANNUAL_RATE_BPS: u32 = 10_000;

impl Aggregate for LoanProduct {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::Defined(e) => {
                self.id = e.product.product_id;
                self.tenant_id = Some(e.tenant_id);
                self.snapshot = Some(e.product.clone());
            }
            ProductEvent::Retired(_) => {
                if let Some(s) = self.snapshot.as_mut() {
                    s.retired = true;
                }
            }
        }
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::Define(cmd) => {
                if self.snapshot.is_some() {
                    return Err(DomainError::conflict("product already defined"));
                }
                let name = cmd.name.trim();
                if name.is_empty() {
                    return Err(DomainError::validation("name cannot be empty"));
                }
                if !cmd.min_principal.is_positive() || cmd.min_principal > cmd.max_principal {
                    return Err(DomainError::validation("principal bounds must satisfy 0 < min <= max"));
                }
                if cmd.min_term == 0 || cmd.min_term > cmd.max_term || cmd.max_term > MAX_TERM {
                    return Err(DomainError::validation(format!(
                        "term bounds must satisfy 1 <= min <= max <= {MAX_TERM}"
                    )));
                }
                if cmd.annual_rate.bps() > MAX_ANNUAL_RATE_BPS
                    || cmd.processing_fee.bps() > MAX_ANNUAL_RATE_BPS
                    || cmd.penalty_rate.bps() > MAX_ANNUAL_RATE_BPS
                {
                    return Err(DomainError::validation("rates cannot exceed 10000 bps"));
                }

                Ok(vec![ProductEvent::Defined(ProductDefined {
                    tenant_id: cmd.tenant_id,
                    product: ProductSnapshot {
                        product_id: cmd.product_id,
                        name: name.to_string(),
                        interest_method: cmd.interest_method,
                        annual_rate: cmd.annual_rate,
                        frequency: cmd.frequency,
                        min_principal: cmd.min_principal,
                        max_principal: cmd.max_principal,
                        min_term: cmd.min_term,
                        max_term: cmd.max_term,
                        processing_fee: cmd.processing_fee,
                        penalty_rate: cmd.penalty_rate,
                        retired: false,
                    },
                    occurred_at: cmd.occurred_at,
                })])
            }
            ProductCommand::Retire(cmd) => {
                let Some(snapshot) = &self.snapshot else {
                    return Err(DomainError::not_found());
                };
                if self.tenant_id != Some(cmd.tenant_id) {
                    return Err(DomainError::invariant("tenant mismatch"));
                }
                if snapshot.retired {
                    return Err(DomainError::conflict("product already retired"));
                }
                Ok(vec![ProductEvent::Retired(ProductRetired {
                    tenant_id: cmd.tenant_id,
                    product_id: cmd.product_id,
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

    fn define(tenant_id: TenantId, product_id: ProductId) -> DefineProduct {
        DefineProduct {
            tenant_id,
            product_id,
            name: "Biashara 12".into(),
            interest_method: InterestMethod::Flat,
            annual_rate: Rate::from_bps(2_400),
            frequency: RepaymentFrequency::Monthly,
            min_principal: Money::from_minor(10_000),
            max_principal: Money::from_minor(5_000_000),
            min_term: 3,
            max_term: 24,
            processing_fee: Rate::from_bps(200),
            penalty_rate: Rate::from_bps(500),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn define_then_retire() {
        let tenant_id = TenantId::new();
        let id = ProductId::new(AggregateId::new());
        let mut p = LoanProduct::empty(id);
        execute(&mut p, &ProductCommand::Define(define(tenant_id, id))).unwrap();
        assert!(!p.snapshot().unwrap().retired);

        let retire = ProductCommand::Retire(RetireProduct { tenant_id, product_id: id, occurred_at: Utc::now() });
        execute(&mut p, &retire).unwrap();
        assert!(p.snapshot().unwrap().retired);
        assert!(matches!(p.handle(&retire), Err(DomainError::Conflict(_))));
    }

    #[test]
    fn bounds_are_validated() {
        let id = ProductId::new(AggregateId::new());
        let p = LoanProduct::empty(id);

        let mut cmd = define(TenantId::new(), id);
        cmd.min_principal = Money::from_minor(10_000_000);
        assert!(p.handle(&ProductCommand::Define(cmd)).is_err());

        let mut cmd = define(TenantId::new(), id);
        cmd.min_term = 0;
        assert!(p.handle(&ProductCommand::Define(cmd)).is_err());

        let mut cmd = define(TenantId::new(), id);
        cmd.annual_rate = Rate::from_bps(20_000);
        assert!(p.handle(&ProductCommand::Define(cmd)).is_err());
    }
}
