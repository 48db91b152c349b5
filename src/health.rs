//! Health factor calculation for collateralized loans.
//!
//! Health is the collateral's borrowing power at the current price divided
//! by the outstanding debt. At 1.0 the loan sits exactly at its max LTV;
//! below 1.0 it can be liquidated. Nothing here holds state: every call is
//! evaluated against the price it is handed.

use crate::position::Position;
use crate::types::{Bps, HealthFactor, Price, Quote, Units};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthParams {
    /// Positions below this (but at or above 1.0) are reported as at risk
    pub at_risk_threshold: Decimal,
}

impl Default for HealthParams {
    fn default() -> Self {
        Self {
            at_risk_threshold: dec!(1.1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    AtRisk,
    Liquidatable,
}

impl HealthStatus {
    pub fn classify(health: HealthFactor, params: &HealthParams) -> Self {
        if health.is_liquidatable() {
            HealthStatus::Liquidatable
        } else if health.value() < params.at_risk_threshold {
            HealthStatus::AtRisk
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Collateral value the loan may borrow against.
pub fn borrowing_power(collateral: Units, price: Price, max_ltv: Bps) -> Quote {
    collateral.value_at(price).mul(max_ltv.as_fraction())
}

pub fn health_factor(collateral: Units, price: Price, max_ltv: Bps, debt: Quote) -> HealthFactor {
    if !debt.is_positive() {
        return HealthFactor::UNBOUNDED;
    }
    HealthFactor::new(borrowing_power(collateral, price, max_ltv).value() / debt.value())
}

/// Price at which health reaches exactly 1.0. `None` when nothing is owed
/// or nothing backs the loan.
pub fn liquidation_price(collateral: Units, max_ltv: Bps, debt: Quote) -> Option<Price> {
    let backing = collateral.value() * max_ltv.as_fraction();
    if backing.is_zero() || !debt.is_positive() {
        return None;
    }
    Price::new(debt.value() / backing)
}

// rounds down: never lets a borrower take more than the LTV allows
pub fn max_borrow(collateral: Units, price: Price, max_ltv: Bps) -> Quote {
    borrowing_power(collateral, price, max_ltv).round_down()
}

// rounds up: the smallest deposit that keeps health at or above 1.0
pub fn collateral_required(amount: Quote, price: Price, max_ltv: Bps) -> Option<Units> {
    let per_unit = price.value() * max_ltv.as_fraction();
    if per_unit.is_zero() {
        return None;
    }
    Some(Units::new(amount.value() / per_unit).round_up())
}

/// Full health view of one position at one price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionHealth {
    pub health_factor: HealthFactor,
    pub status: HealthStatus,
    pub collateral_value: Quote,
    pub debt: Quote,
    pub liquidation_price: Option<Price>,
}

pub fn position_health(position: &Position, price: Price, params: &HealthParams) -> PositionHealth {
    let debt = position.debt();
    let health = health_factor(position.collateral, price, position.max_ltv, debt);
    PositionHealth {
        health_factor: health,
        status: HealthStatus::classify(health, params),
        collateral_value: position.collateral.value_at(price),
        debt,
        liquidation_price: liquidation_price(position.collateral, position.max_ltv, debt),
    }
}
