//! User account
//!
//! The balance ledger entry for one user. `version` increases on every
//! write and is what concurrent writers are checked against.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Amount, Balance, DomainError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAccount {
    pub id: Uuid,
    pub balance: Balance,
    pub total_deposited: Decimal,
    pub total_withdrawn: Decimal,
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// A fresh account with zero balance
    pub fn new(id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id,
            balance: Balance::zero(),
            total_deposited: Decimal::ZERO,
            total_withdrawn: Decimal::ZERO,
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    fn next(&self, balance: Balance) -> Self {
        Self {
            balance,
            version: self.version + 1,
            updated_at: Utc::now(),
            ..self.clone()
        }
    }

    /// Confirmed deposit: balance and deposit counter grow by `amount`
    pub fn credit_deposit(&self, amount: &Amount) -> Result<Self, DomainError> {
        let mut next = self.next(self.balance.credit(amount)?);
        next.total_deposited += amount.value();
        Ok(next)
    }

    /// Withdrawal initiation: funds leave the balance before the gateway is asked to pay
    pub fn debit_withdrawal(&self, amount: &Amount) -> Result<Self, DomainError> {
        if !self.balance.is_sufficient_for(amount) {
            return Err(DomainError::insufficient_balance(
                amount.value(),
                self.balance.value(),
            ));
        }
        Ok(self.next(self.balance.debit(amount)?))
    }

    /// Confirmed withdrawal: balance already debited, only the counter moves
    pub fn confirm_withdrawal(&self, amount: &Amount) -> Self {
        let mut next = self.next(self.balance);
        next.total_withdrawn += amount.value();
        next
    }

    /// Failed or timed-out withdrawal: give the debited funds back
    pub fn refund_withdrawal(&self, amount: &Amount) -> Result<Self, DomainError> {
        Ok(self.next(self.balance.credit(amount)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn amount(v: Decimal) -> Amount {
        Amount::new(v).unwrap()
    }

    #[test]
    fn test_new_account_is_empty() {
        let account = UserAccount::new(Uuid::new_v4());
        assert_eq!(account.balance, Balance::zero());
        assert_eq!(account.version, 1);
    }

    #[test]
    fn test_credit_deposit_bumps_counters_and_version() {
        let account = UserAccount::new(Uuid::new_v4());
        let next = account.credit_deposit(&amount(dec!(500))).unwrap();

        assert_eq!(next.balance.value(), dec!(500));
        assert_eq!(next.total_deposited, dec!(500));
        assert_eq!(next.version, account.version + 1);
    }

    #[test]
    fn test_debit_requires_funds() {
        let account = UserAccount::new(Uuid::new_v4());
        let err = account.debit_withdrawal(&amount(dec!(1))).unwrap_err();
        assert!(matches!(err, DomainError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_debit_then_refund_is_net_zero() {
        let account = UserAccount::new(Uuid::new_v4())
            .credit_deposit(&amount(dec!(300)))
            .unwrap();
        let debited = account.debit_withdrawal(&amount(dec!(200))).unwrap();
        assert_eq!(debited.balance.value(), dec!(100));

        let refunded = debited.refund_withdrawal(&amount(dec!(200))).unwrap();
        assert_eq!(refunded.balance, account.balance);
        assert_eq!(refunded.total_withdrawn, Decimal::ZERO);
    }

    #[test]
    fn test_confirm_withdrawal_leaves_balance() {
        let account = UserAccount::new(Uuid::new_v4())
            .credit_deposit(&amount(dec!(300)))
            .unwrap()
            .debit_withdrawal(&amount(dec!(200)))
            .unwrap();
        let confirmed = account.confirm_withdrawal(&amount(dec!(200)));

        assert_eq!(confirmed.balance.value(), dec!(100));
        assert_eq!(confirmed.total_withdrawn, dec!(200));
    }
}
