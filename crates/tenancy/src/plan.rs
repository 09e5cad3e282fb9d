//! Plan catalog and entitlement names.

use core::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use microfin_core::Money;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown {kind}: {code}")]
pub struct UnknownCode {
    pub kind: &'static str,
    pub code: String,
}

/// A feature a tenant may or may not use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Entitlement {
    Loans,
    Savings,
    Payroll,
    Accounting,
    DisbursementBatches,
    Realtime,
}

impl Entitlement {
    pub const ALL: [Entitlement; 6] = [
        Entitlement::Loans,
        Entitlement::Savings,
        Entitlement::Payroll,
        Entitlement::Accounting,
        Entitlement::DisbursementBatches,
        Entitlement::Realtime,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Entitlement::Loans => "loans",
            Entitlement::Savings => "savings",
            Entitlement::Payroll => "payroll",
            Entitlement::Accounting => "accounting",
            Entitlement::DisbursementBatches => "disbursement_batches",
            Entitlement::Realtime => "realtime",
        }
    }
}

impl core::fmt::Display for Entitlement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Entitlement {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Entitlement::ALL
            .into_iter()
            .find(|e| e.as_str() == s)
            .ok_or_else(|| UnknownCode { kind: "entitlement", code: s.to_string() })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Starter,
    Growth,
    Enterprise,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Starter, Plan::Growth, Plan::Enterprise];

    pub fn code(self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Growth => "growth",
            Plan::Enterprise => "enterprise",
        }
    }

    /// Monthly subscription fee in minor units.
    pub fn monthly_fee(self) -> Money {
        match self {
            Plan::Starter => Money::from_minor(5_000),
            Plan::Growth => Money::from_minor(15_000),
            Plan::Enterprise => Money::from_minor(40_000),
        }
    }

    pub fn entitlements(self) -> &'static [Entitlement] {
        use Entitlement::*;
        match self {
            Plan::Starter => &[Loans, Savings],
            Plan::Growth => &[Loans, Savings, Accounting, DisbursementBatches, Realtime],
            Plan::Enterprise => &Entitlement::ALL,
        }
    }

    pub fn includes(self, entitlement: Entitlement) -> bool {
        self.entitlements().contains(&entitlement)
    }
}

impl core::fmt::Display for Plan {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Plan {
    type Err = UnknownCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Plan::ALL
            .into_iter()
            .find(|p| p.code() == s)
            .ok_or_else(|| UnknownCode { kind: "plan", code: s.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_parse_back() {
        for p in Plan::ALL {
            assert_eq!(p.code().parse::<Plan>().unwrap(), p);
        }
        for e in Entitlement::ALL {
            assert_eq!(e.as_str().parse::<Entitlement>().unwrap(), e);
        }
        assert!("platinum".parse::<Plan>().is_err());
    }

    #[test]
    fn plans_are_nested() {
        for e in Plan::Starter.entitlements() {
            assert!(Plan::Growth.includes(*e));
        }
        for e in Plan::Growth.entitlements() {
            assert!(Plan::Enterprise.includes(*e));
        }
        assert!(!Plan::Growth.includes(Entitlement::Payroll));
        assert!(Plan::Starter.monthly_fee() < Plan::Growth.monthly_fee());
    }
}
