// 8.0.2: result types and errors for ledger operations.

use crate::config::ConfigError;
use crate::liquidation::LiquidationEvent;
use crate::market::MarketError;
use crate::offer::{MatchError, OfferFill};
use crate::oracle::OracleError;
use crate::position::{Position, PositionError, PositionStatus};
use crate::types::{AccountId, Apy, Bps, MarketId, OfferId, PositionId, Quote, Timestamp, Units};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A borrow request matched against the whole offer book of one market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub borrower: AccountId,
    pub market_id: MarketId,
    pub collateral: Units,
    pub amount: Quote,
    pub duration_days: u32,
}

#[derive(Debug, Clone)]
pub struct BorrowResult {
    pub fills: Vec<OfferFill>,
    /// One position per fill, in fill order
    pub positions: Vec<Position>,
}

impl BorrowResult {
    pub fn total_borrowed(&self) -> Quote {
        self.fills.iter().map(|f| f.filled_amount).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepayResult {
    pub position_id: PositionId,
    pub interest_paid: Quote,
    pub principal_paid: Quote,
    pub remaining_debt: Quote,
    pub collateral_released: Units,
    pub status: PositionStatus,
    /// Repayment lifted the position out of pending liquidation
    pub liquidation_cleared: bool,
}

#[derive(Debug, Clone)]
pub struct LiquidationResult {
    pub position_id: PositionId,
    pub borrower: AccountId,
    pub lender: AccountId,
    pub event: LiquidationEvent,
    pub collateral_released: Units,
}

/// Outcome of one pass over the liquidation queue.
#[derive(Debug, Clone, Default)]
pub struct LiquidationPassResult {
    pub liquidated: Vec<LiquidationResult>,
    /// Recovered before seizure
    pub cleared: Vec<PositionId>,
    /// No usable price. requeued
    pub deferred: Vec<PositionId>,
    /// Still inside the grace window. requeued
    pub waiting: Vec<PositionId>,
}

/// Outcome of re-evaluating health for a set of positions.
#[derive(Debug, Clone, Default)]
pub struct HealthPassResult {
    pub evaluated: usize,
    pub triggered: Vec<PositionId>,
    pub cleared: Vec<PositionId>,
    pub deferred: Vec<PositionId>,
}

#[derive(Debug, Clone, Default)]
pub struct AccrualResult {
    pub positions_accrued: usize,
    pub total_interest: Quote,
    /// Skipped after exhausting commit retries.
    pub contended: Vec<PositionId>,
}

#[derive(Debug, Clone)]
pub struct TickResult {
    pub boundary: Timestamp,
    pub accrual: AccrualResult,
    pub health: HealthPassResult,
    pub liquidations: LiquidationPassResult,
}

#[derive(Debug, Clone)]
pub struct PriceUpdateResult {
    pub market_id: MarketId,
    pub snapshot_version: u64,
    pub health: HealthPassResult,
}

#[derive(Debug, Clone, Default)]
pub struct PollResult {
    pub updated: Vec<PriceUpdateResult>,
    pub unavailable: Vec<MarketId>,
    pub rejected: Vec<(MarketId, OracleError)>,
}

#[derive(Debug, Clone)]
pub struct ResolutionResult {
    pub market_id: MarketId,
    pub resolved_price: Decimal,
    /// Force-closed by a worthless resolution
    pub closed: Vec<LiquidationResult>,
    pub health: HealthPassResult,
}

/// Request problems caught before any state is touched.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("{field} must be positive, got {value}")]
    NonPositive { field: &'static str, value: Decimal },

    #[error("{field} {value} is below the minimum {minimum}")]
    BelowMinimum {
        field: &'static str,
        value: Quote,
        minimum: Quote,
    },

    #[error("{field} {value} is above the maximum {maximum}")]
    AboveMaximum {
        field: &'static str,
        value: Decimal,
        maximum: Decimal,
    },

    #[error("APY {apy} outside [0, {max}]")]
    ApyOutOfRange { apy: Apy, max: Decimal },

    #[error("Duration {requested} days outside [1, {max}]")]
    DurationOutOfRange { requested: u32, max: u32 },

    #[error("LTV {ltv} outside (0, {max}]")]
    LtvOutOfRange { ltv: Bps, max: Bps },

    #[error("Unknown market {0}")]
    UnknownMarket(MarketId),

    #[error("Account {0:?} cannot borrow from its own offer {1}")]
    SelfBorrow(AccountId, OfferId),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LedgerError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Market {0} is not open for new loans")]
    MarketNotOpen(MarketId),

    #[error("Position {0} not found")]
    PositionNotFound(PositionId),

    #[error("Position {0} is not active")]
    PositionNotActive(PositionId),

    #[error("Offer {0} is not open")]
    OfferNotOpen(OfferId),

    #[error("Repayment {requested} exceeds outstanding debt {outstanding}")]
    OverRepayment { requested: Quote, outstanding: Quote },

    #[error("Insufficient collateral: provided {provided}, required {required}")]
    InsufficientCollateral { provided: Units, required: Units },

    #[error("Insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: Quote, available: Quote },

    #[error("Position {0} kept changing; gave up after retries")]
    ConcurrentModification(PositionId),

    #[error("Offer error: {0}")]
    Offer(MatchError),

    #[error("Position error: {0}")]
    Position(PositionError),

    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Market error: {0}")]
    Market(#[from] MarketError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LedgerError {
    pub fn is_price_unavailable(&self) -> bool {
        matches!(self, LedgerError::Oracle(e) if e.is_unavailable())
    }
}

impl From<MatchError> for LedgerError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::InsufficientLiquidity { requested, available } => {
                LedgerError::InsufficientLiquidity { requested, available }
            }
            MatchError::OfferNotOpen(offer_id) => LedgerError::OfferNotOpen(offer_id),
            other => LedgerError::Offer(other),
        }
    }
}

impl From<PositionError> for LedgerError {
    fn from(err: PositionError) -> Self {
        match err {
            PositionError::NotActive(position_id) => LedgerError::PositionNotActive(position_id),
            PositionError::OverRepayment {
                requested, outstanding, ..
            } => LedgerError::OverRepayment { requested, outstanding },
            PositionError::NonPositiveAmount(amount) => LedgerError::Validation(ValidationError::NonPositive {
                field: "amount",
                value: amount.value(),
            }),
            other => LedgerError::Position(other),
        }
    }
}
