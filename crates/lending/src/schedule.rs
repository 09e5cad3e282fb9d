//! Amortization schedules.
//!
//! Interest is computed in exact integer arithmetic per period. The declining
//! balance installment amount is the one place floating point is used; it is
//! rounded to minor units and the last installment absorbs any drift, so the
//! principal portions always sum to the loan principal.

use chrono::{Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

use microfin_core::{DomainError, Money, Rate};

pub const MAX_TERM: u32 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterestMethod {
    /// Interest on the original principal every period.
    Flat,
    /// Equal installments; interest on the remaining balance.
    DecliningBalance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepaymentFrequency {
    Weekly,
    Fortnightly,
    Monthly,
}

impl RepaymentFrequency {
    pub fn periods_per_year(self) -> u32 {
        match self {
            RepaymentFrequency::Weekly => 52,
            RepaymentFrequency::Fortnightly => 26,
            RepaymentFrequency::Monthly => 12,
        }
    }

    /// Due date of installment `index` (0-based) counted from the first due date.
    pub fn due_date(self, first: NaiveDate, index: u32) -> Option<NaiveDate> {
        match self {
            RepaymentFrequency::Weekly => first.checked_add_days(Days::new(7 * u64::from(index))),
            RepaymentFrequency::Fortnightly => first.checked_add_days(Days::new(14 * u64::from(index))),
            // chrono clamps the day to the end of shorter months.
            RepaymentFrequency::Monthly => first.checked_add_months(Months::new(index)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleTerms {
    pub principal: Money,
    pub annual_rate: Rate,
    pub term: u32,
    pub frequency: RepaymentFrequency,
    pub method: InterestMethod,
    pub first_due_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Installment {
    pub number: u32,
    pub due_date: NaiveDate,
    pub principal: Money,
    pub interest: Money,
}

impl Installment {
    pub fn total(&self) -> Money {
        self.principal + self.interest
    }
}

/// `amount × annual_rate / periods_per_year`, rounded half up.
fn periodic_interest(amount: Money, annual_rate: Rate, periods_per_year: u32) -> Money {
    let num = i128::from(amount.minor()) * i128::from(annual_rate.bps());
    let den = 10_000i128 * i128::from(periods_per_year);
    Money::from_minor(((num + den / 2) / den) as i64)
}

pub fn generate_schedule(terms: &ScheduleTerms) -> Result<Vec<Installment>, DomainError> {
    if !terms.principal.is_positive() {
        return Err(DomainError::validation("principal must be positive"));
    }
    if terms.term == 0 || terms.term > MAX_TERM {
        return Err(DomainError::validation(format!("term must be between 1 and {MAX_TERM}")));
    }

    let n = terms.term;
    let ppy = terms.frequency.periods_per_year();
    let mut installments = Vec::with_capacity(n as usize);

    let amounts: Vec<(Money, Money)> = match terms.method {
        _ if terms.annual_rate.is_zero() => even_principal(terms.principal, n)
            .into_iter()
            .map(|p| (p, Money::ZERO))
            .collect(),
        InterestMethod::Flat => {
            let interest = periodic_interest(terms.principal, terms.annual_rate, ppy);
            even_principal(terms.principal, n).into_iter().map(|p| (p, interest)).collect()
        }
        InterestMethod::DecliningBalance => annuity(terms.principal, terms.annual_rate, ppy, n),
    };

    for (i, (principal, interest)) in amounts.into_iter().enumerate() {
        let index = i as u32;
        let due_date = terms
            .frequency
            .due_date(terms.first_due_date, index)
            .ok_or_else(|| DomainError::validation("due date out of range"))?;
        installments.push(Installment { number: index + 1, due_date, principal, interest });
    }

    Ok(installments)
}

/// Principal split evenly; the last installment takes the remainder.
fn even_principal(principal: Money, n: u32) -> Vec<Money> {
    let base = principal.minor() / i64::from(n);
    let mut parts = vec![Money::from_minor(base); n as usize];
    let remainder = principal.minor() - base * i64::from(n);
    if let Some(last) = parts.last_mut() {
        *last += Money::from_minor(remainder);
    }
    parts
}

fn annuity(principal: Money, annual_rate: Rate, ppy: u32, n: u32) -> Vec<(Money, Money)> {
    let r = annual_rate.as_fraction() / f64::from(ppy);
    let p = principal.minor() as f64;
    let payment = (p * r / (1.0 - (1.0 + r).powi(-(n as i32)))).round() as i64;

    let mut balance = principal;
    let mut out = Vec::with_capacity(n as usize);
    for i in 0..n {
        let interest = periodic_interest(balance, annual_rate, ppy);
        let mut portion = Money::from_minor((payment - interest.minor()).max(0));
        if i + 1 == n || portion > balance {
            portion = balance;
        }
        balance -= portion;
        out.push((portion, interest));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn terms(principal: i64, bps: u32, term: u32, frequency: RepaymentFrequency, method: InterestMethod) -> ScheduleTerms {
        ScheduleTerms {
            principal: Money::from_minor(principal),
            annual_rate: Rate::from_bps(bps),
            term,
            frequency,
            method,
            first_due_date: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        }
    }

    #[test]
    fn flat_monthly_example() {
        // 120_000 at 12% p.a. over 12 months: 1% per month flat = 1_200 interest.
        let s = generate_schedule(&terms(120_000, 1_200, 12, RepaymentFrequency::Monthly, InterestMethod::Flat)).unwrap();
        assert_eq!(s.len(), 12);
        assert!(s.iter().all(|i| i.interest == Money::from_minor(1_200)));
        assert!(s.iter().all(|i| i.principal == Money::from_minor(10_000)));
    }

    #[test]
    fn flat_remainder_goes_last() {
        let s = generate_schedule(&terms(100, 0, 3, RepaymentFrequency::Weekly, InterestMethod::Flat)).unwrap();
        let p: Vec<i64> = s.iter().map(|i| i.principal.minor()).collect();
        assert_eq!(p, vec![33, 33, 34]);
    }

    #[test]
    fn monthly_dates_clamp_to_month_end() {
        let s = generate_schedule(&terms(3_000, 0, 3, RepaymentFrequency::Monthly, InterestMethod::Flat)).unwrap();
        let dates: Vec<NaiveDate> = s.iter().map(|i| i.due_date).collect();
        assert_eq!(
            dates,
            vec![
                NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
                NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            ]
        );
    }

    #[test]
    fn fortnightly_dates_step_fourteen_days() {
        let s = generate_schedule(&terms(3_000, 0, 2, RepaymentFrequency::Fortnightly, InterestMethod::Flat)).unwrap();
        assert_eq!(s[1].due_date, NaiveDate::from_ymd_opt(2024, 2, 14).unwrap());
    }

    #[test]
    fn declining_balance_interest_shrinks() {
        let s = generate_schedule(&terms(1_000_000, 2_400, 12, RepaymentFrequency::Monthly, InterestMethod::DecliningBalance))
            .unwrap();
        // 2% on the full balance first month.
        assert_eq!(s[0].interest, Money::from_minor(20_000));
        for w in s.windows(2) {
            assert!(w[1].interest <= w[0].interest);
        }
        // Level installments apart from the final adjustment.
        let first = s[0].total();
        for i in &s[..11] {
            assert!((i.total().minor() - first.minor()).abs() <= 1);
        }
    }

    #[test]
    fn zero_rate_declining_is_equal_principal() {
        let s = generate_schedule(&terms(1_000, 0, 4, RepaymentFrequency::Weekly, InterestMethod::DecliningBalance)).unwrap();
        assert!(s.iter().all(|i| i.interest.is_zero() && i.principal == Money::from_minor(250)));
    }

    #[test]
    fn rejects_bad_inputs() {
        assert!(generate_schedule(&terms(0, 1_000, 12, RepaymentFrequency::Monthly, InterestMethod::Flat)).is_err());
        assert!(generate_schedule(&terms(1_000, 1_000, 0, RepaymentFrequency::Monthly, InterestMethod::Flat)).is_err());
    }

    fn method() -> impl Strategy<Value = InterestMethod> {
        prop_oneof![Just(InterestMethod::Flat), Just(InterestMethod::DecliningBalance)]
    }

    fn frequency() -> impl Strategy<Value = RepaymentFrequency> {
        prop_oneof![
            Just(RepaymentFrequency::Weekly),
            Just(RepaymentFrequency::Fortnightly),
            Just(RepaymentFrequency::Monthly)
        ]
    }

    proptest! {
        #[test]
        fn principal_portions_sum_to_principal(
            principal in 1i64..50_000_000,
            bps in 0u32..12_000,
            term in 1u32..120,
            method in method(),
            frequency in frequency(),
        ) {
            let s = generate_schedule(&terms(principal, bps, term, frequency, method)).unwrap();
            prop_assert_eq!(s.len(), term as usize);
            let total: Money = s.iter().map(|i| i.principal).sum();
            prop_assert_eq!(total, Money::from_minor(principal));
            prop_assert!(s.iter().all(|i| !i.principal.is_negative() && !i.interest.is_negative()));
            for w in s.windows(2) {
                prop_assert!(w[0].due_date < w[1].due_date);
            }
        }
    }
}
