//! Posting rules: business event → balanced journal lines.
//!
//! Interest is recognised when collected. Processing fees and penalties are
//! accrued to receivables when charged and relieved when paid.

use microfin_core::Money;

use crate::chart::{
    CASH, FEE_INCOME, FEES_RECEIVABLE, INTEREST_INCOME, LOAN_PORTFOLIO, PAYROLL_EXPENSE, PAYROLL_LIABILITIES,
    PENALTIES_RECEIVABLE, PENALTY_INCOME, SAVINGS_DEPOSITS, WRITE_OFF_EXPENSE, known,
};
use crate::ledger::JournalEntryLine;

/// How a repayment was split across the loan buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RepaymentParts {
    pub penalty: Money,
    pub fee: Money,
    pub interest: Money,
    pub principal: Money,
}

impl RepaymentParts {
    pub fn total(&self) -> Money {
        self.penalty + self.fee + self.interest + self.principal
    }
}

fn push_debit(lines: &mut Vec<JournalEntryLine>, code: &'static str, amount: Money) {
    if amount.is_positive() {
        lines.push(JournalEntryLine::debit(known(code), amount));
    }
}

fn push_credit(lines: &mut Vec<JournalEntryLine>, code: &'static str, amount: Money) {
    if amount.is_positive() {
        lines.push(JournalEntryLine::credit(known(code), amount));
    }
}

pub fn mirror(lines: &[JournalEntryLine]) -> Vec<JournalEntryLine> {
    lines.iter().map(JournalEntryLine::mirrored).collect()
}

/// Cash out to the borrower; the processing fee is charged at the same time.
pub fn disbursement(principal: Money, processing_fee: Money) -> Vec<JournalEntryLine> {
    let mut lines = Vec::new();
    push_debit(&mut lines, LOAN_PORTFOLIO, principal);
    push_credit(&mut lines, CASH, principal);
    push_debit(&mut lines, FEES_RECEIVABLE, processing_fee);
    push_credit(&mut lines, FEE_INCOME, processing_fee);
    lines
}

pub fn repayment(parts: RepaymentParts) -> Vec<JournalEntryLine> {
    let mut lines = Vec::new();
    push_debit(&mut lines, CASH, parts.total());
    push_credit(&mut lines, PENALTIES_RECEIVABLE, parts.penalty);
    push_credit(&mut lines, FEES_RECEIVABLE, parts.fee);
    push_credit(&mut lines, INTEREST_INCOME, parts.interest);
    push_credit(&mut lines, LOAN_PORTFOLIO, parts.principal);
    lines
}

pub fn repayment_reversal(parts: RepaymentParts) -> Vec<JournalEntryLine> {
    mirror(&repayment(parts))
}

pub fn penalty_assessed(amount: Money) -> Vec<JournalEntryLine> {
    let mut lines = Vec::new();
    push_debit(&mut lines, PENALTIES_RECEIVABLE, amount);
    push_credit(&mut lines, PENALTY_INCOME, amount);
    lines
}

/// Writes off the booked balances. Unpaid interest was never recognised.
pub fn write_off(principal: Money, fees: Money, penalties: Money) -> Vec<JournalEntryLine> {
    let mut lines = Vec::new();
    push_debit(&mut lines, WRITE_OFF_EXPENSE, principal + fees + penalties);
    push_credit(&mut lines, LOAN_PORTFOLIO, principal);
    push_credit(&mut lines, FEES_RECEIVABLE, fees);
    push_credit(&mut lines, PENALTIES_RECEIVABLE, penalties);
    lines
}

pub fn savings_deposit(amount: Money) -> Vec<JournalEntryLine> {
    let mut lines = Vec::new();
    push_debit(&mut lines, CASH, amount);
    push_credit(&mut lines, SAVINGS_DEPOSITS, amount);
    lines
}

pub fn savings_withdrawal(amount: Money) -> Vec<JournalEntryLine> {
    mirror(&savings_deposit(amount))
}

/// Undoes a savings transaction: a reversed deposit pays the cash back out.
pub fn savings_reversal(was_deposit: bool, amount: Money) -> Vec<JournalEntryLine> {
    if was_deposit { savings_withdrawal(amount) } else { savings_deposit(amount) }
}

/// Gross salaries expensed; net paid in cash; deductions held as liabilities.
pub fn payroll(gross: Money, net: Money) -> Vec<JournalEntryLine> {
    let mut lines = Vec::new();
    push_debit(&mut lines, PAYROLL_EXPENSE, gross);
    push_credit(&mut lines, CASH, net);
    push_credit(&mut lines, PAYROLL_LIABILITIES, gross - net);
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::validate_lines;

    fn m(v: i64) -> Money {
        Money::from_minor(v)
    }

    #[test]
    fn every_rule_balances() {
        let parts = RepaymentParts { penalty: m(5), fee: m(10), interest: m(40), principal: m(200) };
        for lines in [
            disbursement(m(10_000), m(200)),
            disbursement(m(10_000), Money::ZERO),
            repayment(parts),
            repayment_reversal(parts),
            penalty_assessed(m(75)),
            write_off(m(3_000), m(20), m(15)),
            savings_deposit(m(500)),
            savings_withdrawal(m(500)),
            savings_reversal(true, m(500)),
            savings_reversal(false, m(500)),
            payroll(m(9_000), m(7_500)),
            payroll(m(9_000), m(9_000)),
        ] {
            validate_lines(&lines).unwrap();
        }
    }

    #[test]
    fn zero_buckets_produce_no_lines() {
        let lines = repayment(RepaymentParts { principal: m(100), ..Default::default() });
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].account.code, CASH);
        assert_eq!(lines[0].debit, m(100));
    }

    #[test]
    fn reversal_nets_to_zero_per_account() {
        let parts = RepaymentParts { penalty: m(1), fee: m(2), interest: m(3), principal: m(4) };
        let mut all = repayment(parts);
        all.extend(repayment_reversal(parts));
        for code in [CASH, PENALTIES_RECEIVABLE, FEES_RECEIVABLE, INTEREST_INCOME, LOAN_PORTFOLIO] {
            let net: Money = all.iter().filter(|l| l.account.code == code).map(|l| l.signed()).sum();
            assert_eq!(net, Money::ZERO, "{code}");
        }
    }
}
