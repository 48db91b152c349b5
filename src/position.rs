// 4.0: open loan tracking. debt = principal + accrued interest.
// 4.1 has the pure transitions (accrue, repay, liquidate) at the bottom. the ledger commits them.

use crate::interest::{accrue_ticks, ticks_between};
use crate::liquidation::LiquidationEvent;
use crate::types::{AccountId, Apy, Bps, MarketId, OfferId, PositionId, Quote, Timestamp, Units};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionStatus {
    Active,
    /// Health dropped below 1.0. seized on the next pass unless it recovers
    LiquidationPending,
    Repaid,
    Liquidated,
}

impl PositionStatus {
    /// Still carries debt and collateral.
    pub fn is_open(&self) -> bool {
        matches!(self, PositionStatus::Active | PositionStatus::LiquidationPending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: PositionId,
    pub borrower: AccountId,
    pub lender: AccountId,
    pub offer_id: OfferId,
    pub collateral_market: MarketId,
    pub collateral: Units,
    pub principal: Quote,
    pub accrued_interest: Quote,
    pub apy: Apy,
    pub max_ltv: Bps,
    pub opened_at: Timestamp,
    /// Last tick boundary interest was accrued to
    pub last_accrual_at: Timestamp,
    pub matures_at: Timestamp,
    pub pending_since: Option<Timestamp>,
    pub principal_repaid: Quote,
    pub interest_repaid: Quote,
    pub status: PositionStatus,
    /// Bumped on every committed transition. guards optimistic commits
    pub version: u64,
}

/// Everything needed to open a position, produced by matching.
#[derive(Debug, Clone)]
pub struct PositionTerms {
    pub borrower: AccountId,
    pub lender: AccountId,
    pub offer_id: OfferId,
    pub collateral_market: MarketId,
    pub collateral: Units,
    pub principal: Quote,
    pub apy: Apy,
    pub max_ltv: Bps,
    pub duration_days: u32,
}

impl Position {
    pub fn open(id: PositionId, terms: &PositionTerms, opened_at: Timestamp, accrual_start: Timestamp) -> Self {
        Self {
            id,
            borrower: terms.borrower,
            lender: terms.lender,
            offer_id: terms.offer_id,
            collateral_market: terms.collateral_market,
            collateral: terms.collateral,
            principal: terms.principal,
            accrued_interest: Quote::zero(),
            apy: terms.apy,
            max_ltv: terms.max_ltv,
            opened_at,
            // interest starts with the first full tick after opening
            last_accrual_at: accrual_start,
            matures_at: opened_at.plus_days(terms.duration_days),
            pending_since: None,
            principal_repaid: Quote::zero(),
            interest_repaid: Quote::zero(),
            status: PositionStatus::Active,
            version: 0,
        }
    }

    pub fn debt(&self) -> Quote {
        self.principal.add(self.accrued_interest)
    }

    pub fn is_open(&self) -> bool {
        self.status.is_open()
    }

    pub fn is_overdue(&self, now: Timestamp) -> bool {
        self.is_open() && now >= self.matures_at
    }
}

/// 4.1: result of accruing a position to a tick boundary.
#[derive(Debug, Clone)]
pub struct Accrual {
    pub position: Position,
    pub interest: Quote,
    pub ticks: u64,
}

pub fn accrue_position(position: &Position, boundary: Timestamp, tick_interval_ms: i64) -> Option<Accrual> {
    if !position.is_open() || boundary <= position.last_accrual_at {
        return None;
    }

    let ticks = ticks_between(position.last_accrual_at, boundary, tick_interval_ms);
    if ticks == 0 {
        return None;
    }

    let interest = accrue_ticks(position.principal, position.accrued_interest, position.apy, tick_interval_ms, ticks);

    let mut next = position.clone();
    next.accrued_interest = position.accrued_interest.add(interest);
    next.last_accrual_at = position.last_accrual_at.plus_millis(ticks as i64 * tick_interval_ms);

    Some(Accrual {
        position: next,
        interest,
        ticks,
    })
}

#[derive(Debug, Clone)]
pub struct Repayment {
    pub position: Position,
    pub interest_paid: Quote,
    pub principal_paid: Quote,
    /// Collateral released when the debt reaches zero
    pub collateral_released: Units,
}

// 4.2: interest first, then principal. closes the loan at zero debt
pub fn apply_repayment(position: &Position, amount: Quote) -> Result<Repayment, PositionError> {
    if !position.is_open() {
        return Err(PositionError::NotActive(position.id));
    }
    if !amount.is_positive() {
        return Err(PositionError::NonPositiveAmount(amount));
    }
    let debt = position.debt();
    if amount > debt {
        return Err(PositionError::OverRepayment {
            position_id: position.id,
            requested: amount,
            outstanding: debt,
        });
    }

    let interest_paid = amount.min(position.accrued_interest);
    let principal_paid = amount.sub(interest_paid);

    let mut next = position.clone();
    next.accrued_interest = position.accrued_interest.sub(interest_paid);
    next.principal = position.principal.sub(principal_paid);
    next.interest_repaid = position.interest_repaid.add(interest_paid);
    next.principal_repaid = position.principal_repaid.add(principal_paid);

    let mut collateral_released = Units::zero();
    if next.debt().is_zero() {
        collateral_released = next.collateral;
        next.collateral = Units::zero();
        next.status = PositionStatus::Repaid;
        next.pending_since = None;
    }

    Ok(Repayment {
        position: next,
        interest_paid,
        principal_paid,
        collateral_released,
    })
}

// 4.3: applies a liquidation record. interest is written off before principal
pub fn apply_liquidation(position: &Position, event: &LiquidationEvent) -> Result<Position, PositionError> {
    if event.position_id != position.id {
        return Err(PositionError::WrongPosition {
            expected: position.id,
            found: event.position_id,
        });
    }
    if !position.is_open() {
        return Err(PositionError::NotActive(position.id));
    }
    if event.collateral_seized > position.collateral {
        return Err(PositionError::SeizureExceedsCollateral {
            position_id: position.id,
            seized: event.collateral_seized,
            held: position.collateral,
        });
    }

    let mut next = position.clone();
    next.pending_since = None;

    if event.full_close {
        next.principal = Quote::zero();
        next.accrued_interest = Quote::zero();
        next.collateral = Units::zero();
        next.status = PositionStatus::Liquidated;
        return Ok(next);
    }

    let repaid = event.debt_repaid().min(position.debt());
    let interest_part = repaid.min(position.accrued_interest);
    next.accrued_interest = position.accrued_interest.sub(interest_part);
    next.principal = position.principal.sub(repaid.sub(interest_part));
    next.collateral = position.collateral.sub(event.collateral_seized);
    next.status = PositionStatus::Active;

    Ok(next)
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PositionError {
    #[error("Position {0} is not active")]
    NotActive(PositionId),

    #[error("Repayment {requested} exceeds outstanding debt {outstanding} on {position_id}")]
    OverRepayment {
        position_id: PositionId,
        requested: Quote,
        outstanding: Quote,
    },

    #[error("Amount must be positive, got {0}")]
    NonPositiveAmount(Quote),

    #[error("Seizing {seized} exceeds collateral {held} on {position_id}")]
    SeizureExceedsCollateral {
        position_id: PositionId,
        seized: Units,
        held: Units,
    },

    #[error("Liquidation record for {found} applied to {expected}")]
    WrongPosition { expected: PositionId, found: PositionId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    const HOUR: i64 = 3_600_000;

    fn test_position() -> Position {
        let terms = PositionTerms {
            borrower: AccountId(1),
            lender: AccountId(2),
            offer_id: OfferId(1),
            collateral_market: MarketId(1),
            collateral: Units::new(dec!(15000)),
            principal: Quote::new(dec!(10000)),
            apy: Apy::from_percent(dec!(5)).unwrap(),
            max_ltv: Bps::new(7500),
            duration_days: 30,
        };
        Position::open(PositionId(1), &terms, Timestamp::from_millis(0), Timestamp::from_millis(0))
    }

    fn liquidation_record(seized: Decimal, covered: Decimal, penalty: Decimal, full: bool) -> LiquidationEvent {
        LiquidationEvent {
            position_id: PositionId(1),
            trigger_price: dec!(0.6),
            debt_covered: Quote::new(covered),
            collateral_seized: Units::new(seized),
            penalty_amount: Quote::new(penalty),
            unrecovered_debt: Quote::zero(),
            full_close: full,
            timestamp: Timestamp::from_millis(5),
        }
    }

    #[test]
    fn open_sets_maturity() {
        let pos = test_position();
        assert_eq!(pos.debt().value(), dec!(10000));
        assert_eq!(pos.matures_at, Timestamp::from_millis(30 * crate::types::DAY_MS));
        assert!(!pos.is_overdue(Timestamp::from_millis(1)));
        assert!(pos.is_overdue(pos.matures_at));
    }

    #[test]
    fn accrual_is_idempotent_per_boundary() {
        let pos = test_position();
        let first = accrue_position(&pos, Timestamp::from_millis(HOUR), HOUR).unwrap();
        assert!(first.interest.is_positive());
        assert_eq!(first.ticks, 1);

        // same boundary again is a no-op
        assert!(accrue_position(&first.position, Timestamp::from_millis(HOUR), HOUR).is_none());
        // an earlier boundary too
        assert!(accrue_position(&first.position, Timestamp::from_millis(0), HOUR).is_none());
    }

    #[test]
    fn repay_interest_first() {
        let mut pos = test_position();
        pos.accrued_interest = Quote::new(dec!(50));

        let repayment = apply_repayment(&pos, Quote::new(dec!(80))).unwrap();
        assert_eq!(repayment.interest_paid.value(), dec!(50));
        assert_eq!(repayment.principal_paid.value(), dec!(30));
        assert_eq!(repayment.position.principal.value(), dec!(9970));
        assert_eq!(repayment.position.status, PositionStatus::Active);
        assert!(repayment.collateral_released.is_zero());
    }

    #[test]
    fn full_repay_releases_collateral() {
        let pos = test_position();
        let repayment = apply_repayment(&pos, Quote::new(dec!(10000))).unwrap();
        assert_eq!(repayment.position.status, PositionStatus::Repaid);
        assert_eq!(repayment.collateral_released.value(), dec!(15000));
        assert!(repayment.position.collateral.is_zero());
    }

    #[test]
    fn over_repayment_rejected() {
        let pos = test_position();
        let result = apply_repayment(&pos, Quote::new(dec!(10000.01)));
        assert!(matches!(result, Err(PositionError::OverRepayment { .. })));
    }

    #[test]
    fn repay_closed_position_rejected() {
        let mut pos = test_position();
        pos.status = PositionStatus::Liquidated;
        let result = apply_repayment(&pos, Quote::new(dec!(1)));
        assert!(matches!(result, Err(PositionError::NotActive(_))));
    }

    #[test]
    fn full_liquidation_closes() {
        let pos = test_position();
        let event = liquidation_record(dec!(15000), dec!(9000), dec!(0), true);
        let next = apply_liquidation(&pos, &event).unwrap();
        assert_eq!(next.status, PositionStatus::Liquidated);
        assert!(next.debt().is_zero());
    }

    #[test]
    fn partial_liquidation_reduces_debt() {
        let pos = test_position();
        // 2100 covered, of which 100 penalty: 2000 of debt repaid
        let event = liquidation_record(dec!(3500), dec!(2100), dec!(100), false);
        let next = apply_liquidation(&pos, &event).unwrap();
        assert_eq!(next.status, PositionStatus::Active);
        assert_eq!(next.principal.value(), dec!(8000));
        assert_eq!(next.collateral.value(), dec!(11500));
    }

    #[test]
    fn seizure_capped_at_collateral() {
        let pos = test_position();
        let event = liquidation_record(dec!(15000.000001), dec!(9000), dec!(0), true);
        let result = apply_liquidation(&pos, &event);
        assert!(matches!(result, Err(PositionError::SeizureExceedsCollateral { .. })));
    }
}
