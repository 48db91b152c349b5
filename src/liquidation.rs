//! Liquidation planning for under-collateralized loans.
//!
//! A loan whose health factor drops below 1.0 is flagged pending and seized
//! on the next processing pass once its grace window has elapsed. Planning
//! is pure: it turns a position and a price into an append-only
//! `LiquidationEvent` that the ledger then commits.
//!
//! Full closure sells the collateral for the debt plus penalty. Whatever
//! the collateral cannot cover is a shortfall recorded against the lender.
//! Partial mode seizes just enough to bring health back to a target and
//! falls back to full closure when no partial seizure can get there.

use crate::position::Position;
use crate::types::{Bps, PositionId, Price, Quote, Timestamp, Units, QUOTE_SCALE};
use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LiquidationMode {
    #[default]
    Full,
    Partial,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationParams {
    /// Charged on top of the debt, paid out of seized collateral
    pub penalty: Bps,
    /// How long a position may stay pending before it is seized. 0 = next pass
    pub grace_period_ms: i64,
    pub mode: LiquidationMode,
    /// Health a partial liquidation restores
    pub target_health: Decimal,
}

impl Default for LiquidationParams {
    fn default() -> Self {
        Self {
            penalty: Bps::new(500),
            grace_period_ms: 0,
            mode: LiquidationMode::Full,
            target_health: dec!(1.05),
        }
    }
}

impl LiquidationParams {
    pub fn penalty_rate(&self) -> Decimal {
        self.penalty.as_fraction()
    }

    /// True once a position pending since `pending_since` may be seized.
    pub fn grace_elapsed(&self, pending_since: Timestamp, now: Timestamp) -> bool {
        now.millis_since(&pending_since) >= self.grace_period_ms
    }
}

/// Append-only record of one liquidation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidationEvent {
    pub position_id: PositionId,
    /// Price the seizure was valued at. zero for a worthless resolution
    pub trigger_price: Decimal,
    /// Value taken from the collateral: repaid debt plus penalty
    pub debt_covered: Quote,
    pub collateral_seized: Units,
    pub penalty_amount: Quote,
    pub unrecovered_debt: Quote,
    pub full_close: bool,
    pub timestamp: Timestamp,
}

impl LiquidationEvent {
    /// Portion of `debt_covered` that repaid debt rather than penalty.
    pub fn debt_repaid(&self) -> Quote {
        self.debt_covered.saturating_sub(self.penalty_amount)
    }
}

#[derive(Debug, Clone)]
pub struct LiquidationPlan {
    pub event: LiquidationEvent,
    /// Collateral handed back to the borrower after a full closure
    pub collateral_released: Units,
}

pub fn plan_liquidation(
    position: &Position,
    price: Price,
    params: &LiquidationParams,
    timestamp: Timestamp,
) -> LiquidationPlan {
    if params.mode == LiquidationMode::Partial {
        if let Some(plan) = plan_partial(position, price, params, timestamp) {
            return plan;
        }
    }
    plan_full(position, price, params.penalty_rate(), timestamp)
}

pub fn plan_full(position: &Position, price: Price, penalty_rate: Decimal, timestamp: Timestamp) -> LiquidationPlan {
    let debt = position.debt();
    let penalty = debt.mul(penalty_rate).round_down();
    let collateral_value = position.collateral.value_at(price).round_down();

    let debt_covered = collateral_value.min(debt.add(penalty));
    let seized = Units::new(debt_covered.value() / price.value())
        .round_up()
        .min(position.collateral);
    let penalty_amount = debt_covered.saturating_sub(debt);
    let unrecovered_debt = debt.saturating_sub(debt_covered);

    LiquidationPlan {
        event: LiquidationEvent {
            position_id: position.id,
            trigger_price: price.value(),
            debt_covered,
            collateral_seized: seized,
            penalty_amount,
            unrecovered_debt,
            full_close: true,
            timestamp,
        },
        collateral_released: position.collateral.sub(seized),
    }
}

/// Closure at a worthless resolution: nothing covered, everything owed is lost.
pub fn plan_worthless(position: &Position, timestamp: Timestamp) -> LiquidationPlan {
    LiquidationPlan {
        event: LiquidationEvent {
            position_id: position.id,
            trigger_price: Decimal::ZERO,
            debt_covered: Quote::zero(),
            collateral_seized: position.collateral,
            penalty_amount: Quote::zero(),
            unrecovered_debt: position.debt(),
            full_close: true,
            timestamp,
        },
        collateral_released: Units::zero(),
    }
}

// repaying x of debt costs x*(1+p) of collateral value. solving
// (C - x(1+p)) * L / (D - x) = t for x gives (tD - CL) / (t - (1+p)L)
fn plan_partial(
    position: &Position,
    price: Price,
    params: &LiquidationParams,
    timestamp: Timestamp,
) -> Option<LiquidationPlan> {
    let debt = position.debt().value();
    let collateral_value = position.collateral.value_at(price).value();
    let ltv = position.max_ltv.as_fraction();
    let penalty_rate = params.penalty_rate();
    let target = params.target_health;

    let denominator = target - (Decimal::ONE + penalty_rate) * ltv;
    if denominator <= Decimal::ZERO {
        return None;
    }
    // rounded up so the target is reached, not missed by a unit of dust
    let repaid = Quote::new(
        ((target * debt - collateral_value * ltv) / denominator)
            .round_dp_with_strategy(QUOTE_SCALE, RoundingStrategy::AwayFromZero),
    );
    if !repaid.is_positive() || repaid.value() >= debt {
        return None;
    }

    let penalty_amount = repaid.mul(penalty_rate).round_down();
    let debt_covered = repaid.add(penalty_amount);
    let seized = Units::new(debt_covered.value() / price.value()).round_up();
    if seized >= position.collateral {
        return None;
    }

    Some(LiquidationPlan {
        event: LiquidationEvent {
            position_id: position.id,
            trigger_price: price.value(),
            debt_covered,
            collateral_seized: seized,
            penalty_amount,
            unrecovered_debt: Quote::zero(),
            full_close: false,
            timestamp,
        },
        collateral_released: Units::zero(),
    })
}
