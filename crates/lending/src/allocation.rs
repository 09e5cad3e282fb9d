//! Repayment allocation: penalties, then fees, then interest, then principal.

use serde::{Deserialize, Serialize};

use microfin_core::{DomainError, Money};

/// Amounts still owed on a loan, per bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Outstanding {
    pub penalty: Money,
    pub fee: Money,
    pub interest: Money,
    pub principal: Money,
}

impl Outstanding {
    pub fn total(&self) -> Money {
        self.penalty + self.fee + self.interest + self.principal
    }

    pub fn is_settled(&self) -> bool {
        self.total().is_zero()
    }

    pub fn pay(&mut self, a: &Allocation) {
        self.penalty -= a.penalty;
        self.fee -= a.fee;
        self.interest -= a.interest;
        self.principal -= a.principal;
    }

    pub fn restore(&mut self, a: &Allocation) {
        self.penalty += a.penalty;
        self.fee += a.fee;
        self.interest += a.interest;
        self.principal += a.principal;
    }
}

/// How one payment was split. Stored on the payment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Allocation {
    pub penalty: Money,
    pub fee: Money,
    pub interest: Money,
    pub principal: Money,
}

impl Allocation {
    pub fn total(&self) -> Money {
        self.penalty + self.fee + self.interest + self.principal
    }

    /// The part that counts against the schedule.
    pub fn scheduled_part(&self) -> Money {
        self.interest + self.principal
    }
}

pub fn allocate(amount: Money, outstanding: &Outstanding) -> Result<Allocation, DomainError> {
    if !amount.is_positive() {
        return Err(DomainError::validation("payment amount must be positive"));
    }
    if amount > outstanding.total() {
        return Err(DomainError::validation(format!(
            "payment {amount} exceeds outstanding balance {}",
            outstanding.total()
        )));
    }

    let mut remaining = amount;
    let mut take = |bucket: Money| {
        let portion = remaining.min(bucket.max(Money::ZERO));
        remaining -= portion;
        portion
    };

    Ok(Allocation {
        penalty: take(outstanding.penalty),
        fee: take(outstanding.fee),
        interest: take(outstanding.interest),
        principal: take(outstanding.principal),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn m(v: i64) -> Money {
        Money::from_minor(v)
    }

    fn owed() -> Outstanding {
        Outstanding { penalty: m(50), fee: m(100), interest: m(300), principal: m(1_000) }
    }

    #[test]
    fn order_is_penalty_fee_interest_principal() {
        let a = allocate(m(400), &owed()).unwrap();
        assert_eq!(a, Allocation { penalty: m(50), fee: m(100), interest: m(250), principal: m(0) });

        let a = allocate(m(40), &owed()).unwrap();
        assert_eq!(a, Allocation { penalty: m(40), ..Default::default() });
    }

    #[test]
    fn exact_settlement() {
        let a = allocate(m(1_450), &owed()).unwrap();
        let mut o = owed();
        o.pay(&a);
        assert!(o.is_settled());
    }

    #[test]
    fn overpayment_and_non_positive_are_rejected() {
        assert!(allocate(m(1_451), &owed()).is_err());
        assert!(allocate(m(0), &owed()).is_err());
        assert!(allocate(m(-5), &owed()).is_err());
    }

    #[test]
    fn restore_undoes_pay() {
        let a = allocate(m(777), &owed()).unwrap();
        let mut o = owed();
        o.pay(&a);
        o.restore(&a);
        assert_eq!(o, owed());
    }

    proptest! {
        #[test]
        fn allocation_sums_and_respects_order(
            penalty in 0i64..10_000,
            fee in 0i64..10_000,
            interest in 0i64..100_000,
            principal in 1i64..1_000_000,
            pick in 0.0f64..1.0,
        ) {
            let o = Outstanding { penalty: m(penalty), fee: m(fee), interest: m(interest), principal: m(principal) };
            let amount = m(((o.total().minor() as f64) * pick).ceil().max(1.0) as i64);
            let a = allocate(amount, &o).unwrap();

            prop_assert_eq!(a.total(), amount);
            // A later bucket only receives money once every earlier bucket is full.
            if a.fee.is_positive() { prop_assert_eq!(a.penalty, o.penalty); }
            if a.interest.is_positive() { prop_assert_eq!(a.fee, o.fee); }
            if a.principal.is_positive() { prop_assert_eq!(a.interest, o.interest); }
            prop_assert!(a.principal <= o.principal);
        }
    }
}
