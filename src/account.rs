//! Lender accounts.
//!
//! Every lender with at least one offer gets an account that tracks what
//! they have lent out and what came back: repayments, interest, liquidation
//! proceeds and penalties. Shortfalls from liquidations that could not cover
//! the debt are recorded here too, so losses are always attributed.

use crate::types::{AccountId, Quote, Timestamp};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LenderAccount {
    pub id: AccountId,
    /// Principal currently out on open positions
    pub principal_outstanding: Quote,
    /// Interest accrued on this lender's positions, repaid or not
    pub interest_accrued: Quote,
    pub principal_repaid: Quote,
    pub interest_repaid: Quote,
    /// Debt recovered by selling seized collateral
    pub liquidation_proceeds: Quote,
    pub penalties_earned: Quote,
    pub unrecovered_debt: Quote,
    pub created_at: Timestamp,
}

impl LenderAccount {
    pub fn new(id: AccountId, timestamp: Timestamp) -> Self {
        Self {
            id,
            principal_outstanding: Quote::zero(),
            interest_accrued: Quote::zero(),
            principal_repaid: Quote::zero(),
            interest_repaid: Quote::zero(),
            liquidation_proceeds: Quote::zero(),
            penalties_earned: Quote::zero(),
            unrecovered_debt: Quote::zero(),
            created_at: timestamp,
        }
    }

    pub fn record_loan(&mut self, principal: Quote) {
        self.principal_outstanding = self.principal_outstanding.add(principal);
    }

    pub fn record_interest(&mut self, interest: Quote) {
        self.interest_accrued = self.interest_accrued.add(interest);
    }

    pub fn record_repayment(&mut self, principal: Quote, interest: Quote) {
        self.principal_outstanding = self.principal_outstanding.saturating_sub(principal);
        self.principal_repaid = self.principal_repaid.add(principal);
        self.interest_repaid = self.interest_repaid.add(interest);
    }

    /// `principal_closed` is the principal no longer outstanding after the
    /// liquidation, whether it was recovered or lost.
    pub fn record_liquidation(&mut self, principal_closed: Quote, recovered: Quote, penalty: Quote, unrecovered: Quote) {
        self.principal_outstanding = self.principal_outstanding.saturating_sub(principal_closed);
        self.liquidation_proceeds = self.liquidation_proceeds.add(recovered);
        self.penalties_earned = self.penalties_earned.add(penalty);
        self.unrecovered_debt = self.unrecovered_debt.add(unrecovered);
    }

    /// Everything received back: repayments, interest, liquidation proceeds and penalties.
    pub fn total_received(&self) -> Quote {
        self.principal_repaid
            .add(self.interest_repaid)
            .add(self.liquidation_proceeds)
            .add(self.penalties_earned)
    }

    /// Realized yield: interest and penalties received minus losses.
    pub fn net_earnings(&self) -> Quote {
        self.interest_repaid
            .add(self.penalties_earned)
            .sub(self.unrecovered_debt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn loan_lifecycle() {
        let mut account = LenderAccount::new(AccountId(1), Timestamp::from_millis(0));
        account.record_loan(Quote::new(dec!(10000)));
        account.record_interest(Quote::new(dec!(41.2)));
        account.record_repayment(Quote::new(dec!(10000)), Quote::new(dec!(41.2)));

        assert!(account.principal_outstanding.is_zero());
        assert_eq!(account.total_received().value(), dec!(10041.2));
        assert_eq!(account.net_earnings().value(), dec!(41.2));
    }

    #[test]
    fn liquidation_shortfall_is_a_loss() {
        let mut account = LenderAccount::new(AccountId(1), Timestamp::from_millis(0));
        account.record_loan(Quote::new(dec!(10000)));
        account.record_liquidation(
            Quote::new(dec!(10000)),
            Quote::new(dec!(9000)),
            Quote::zero(),
            Quote::new(dec!(1000)),
        );

        assert!(account.principal_outstanding.is_zero());
        assert_eq!(account.net_earnings().value(), dec!(-1000));
    }
}
