//! Fixed chart of accounts shared by every tenant.

use serde::{Deserialize, Serialize};

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    /// Assets and expenses grow on the debit side.
    pub fn is_debit_normal(self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Account {
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
}

pub const CASH: &str = "1000";
pub const LOAN_PORTFOLIO: &str = "1100";
pub const FEES_RECEIVABLE: &str = "1200";
pub const PENALTIES_RECEIVABLE: &str = "1210";
pub const SAVINGS_DEPOSITS: &str = "2000";
pub const PAYROLL_LIABILITIES: &str = "2100";
pub const OWNER_EQUITY: &str = "3000";
pub const INTEREST_INCOME: &str = "4000";
pub const FEE_INCOME: &str = "4100";
pub const PENALTY_INCOME: &str = "4200";
pub const PAYROLL_EXPENSE: &str = "5000";
pub const WRITE_OFF_EXPENSE: &str = "5100";

const CHART: &[(&str, &str, AccountKind)] = &[
    (CASH, "Cash and bank", AccountKind::Asset),
    (LOAN_PORTFOLIO, "Loan portfolio", AccountKind::Asset),
    (FEES_RECEIVABLE, "Fees receivable", AccountKind::Asset),
    (PENALTIES_RECEIVABLE, "Penalties receivable", AccountKind::Asset),
    (SAVINGS_DEPOSITS, "Savings deposits", AccountKind::Liability),
    (PAYROLL_LIABILITIES, "Payroll liabilities", AccountKind::Liability),
    (OWNER_EQUITY, "Owner equity", AccountKind::Equity),
    (INTEREST_INCOME, "Interest income", AccountKind::Revenue),
    (FEE_INCOME, "Fee income", AccountKind::Revenue),
    (PENALTY_INCOME, "Penalty income", AccountKind::Revenue),
    (PAYROLL_EXPENSE, "Salaries and wages", AccountKind::Expense),
    (WRITE_OFF_EXPENSE, "Loan write-offs", AccountKind::Expense),
];

pub fn chart_of_accounts() -> Vec<Account> {
    CHART
        .iter()
        .map(|(code, name, kind)| Account { code: code.to_string(), name: name.to_string(), kind: *kind })
        .collect()
}

pub fn lookup_account(code: &str) -> Option<Account> {
    chart_of_accounts().into_iter().find(|a| a.code == code)
}

/// Chart account by code. Only called with the constants above.
pub(crate) fn known(code: &'static str) -> Account {
    lookup_account(code).unwrap_or(Account {
        code: code.to_string(),
        name: code.to_string(),
        kind: AccountKind::Asset,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_unique() {
        let chart = chart_of_accounts();
        let mut codes: Vec<&str> = chart.iter().map(|a| a.code.as_str()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), chart.len());
    }

    #[test]
    fn normal_sides() {
        assert!(lookup_account(CASH).unwrap().kind.is_debit_normal());
        assert!(!lookup_account(SAVINGS_DEPOSITS).unwrap().kind.is_debit_normal());
        assert!(lookup_account("9999").is_none());
    }
}
