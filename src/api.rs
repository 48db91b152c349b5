// 9.0: command API. writes arrive as explicit command objects, reads as queries.
// every failure maps to a stable ErrorCode so callers never parse messages.

use crate::account::LenderAccount;
use crate::events::Event;
use crate::ledger::{
    BorrowQuote, BorrowRequest, Ledger, LedgerError, MarketplaceStats, PlatformStats, PositionSummary, RepayResult,
};
use crate::market::{Market, MarketError};
use crate::offer::{MatchError, Offer, OfferFilter, OfferRequest, OfferSort};
use crate::oracle::OracleError;
use crate::position::Position;
use crate::types::{AccountId, MarketId, OfferId, PositionId, Quote, Timestamp, Units};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerCommand {
    SubmitOffer(OfferRequest),
    CancelOffer {
        lender: AccountId,
        offer_id: OfferId,
    },
    OpenPosition {
        offer_id: OfferId,
        borrower: AccountId,
        collateral: Units,
        amount: Quote,
        duration_days: u32,
    },
    Borrow(BorrowRequest),
    Repay {
        position_id: PositionId,
        amount: Quote,
    },
    UpdatePrice {
        market_id: MarketId,
        price: Decimal,
        timestamp: Timestamp,
    },
    ResolveMarket {
        market_id: MarketId,
        price: Decimal,
    },
    RunTick,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LedgerQuery {
    Offers { filter: OfferFilter, sort: OfferSort },
    BorrowQuote(BorrowRequest),
    Position(PositionId),
    PositionSummary(PositionId),
    BorrowerPositions(AccountId),
    LenderAccount(AccountId),
    Market(MarketId),
    PlatformStats,
    MarketplaceStats,
    RecentEvents(usize),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApiResponse {
    OfferSubmitted { offer_id: OfferId },
    OfferCancelled(Offer),
    PositionsOpened(Vec<Position>),
    Repaid(RepayResult),
    PriceUpdated {
        market_id: MarketId,
        snapshot_version: u64,
        triggered: Vec<PositionId>,
    },
    MarketResolved {
        market_id: MarketId,
        positions_closed: Vec<PositionId>,
    },
    TickCompleted {
        boundary: Timestamp,
        interest: Quote,
        liquidated: Vec<PositionId>,
        deferred: Vec<PositionId>,
    },
    Offers(Vec<Offer>),
    BorrowQuote(BorrowQuote),
    Position(Position),
    PositionSummary(PositionSummary),
    Positions(Vec<Position>),
    LenderAccount(LenderAccount),
    Market(Market),
    PlatformStats(PlatformStats),
    MarketplaceStats(MarketplaceStats),
    Events(Vec<Event>),
    Error(ApiError),
}

impl ApiResponse {
    pub fn is_error(&self) -> bool {
        matches!(self, ApiResponse::Error(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            ApiResponse::Error(e) => Some(e.code),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Unauthorized,
    MarketNotOpen,
    OfferNotOpen,
    PositionNotActive,
    OverRepayment,
    InsufficientCollateral,
    InsufficientLiquidity,
    PriceUnavailable,
    StalePrice,
    Conflict,
    ConcurrentModification,
    Internal,
}

impl From<&LedgerError> for ErrorCode {
    fn from(err: &LedgerError) -> Self {
        match err {
            LedgerError::Validation(_) => ErrorCode::Validation,
            LedgerError::MarketNotOpen(_) => ErrorCode::MarketNotOpen,
            LedgerError::PositionNotFound(_) => ErrorCode::NotFound,
            LedgerError::PositionNotActive(_) => ErrorCode::PositionNotActive,
            LedgerError::OfferNotOpen(_) => ErrorCode::OfferNotOpen,
            LedgerError::OverRepayment { .. } => ErrorCode::OverRepayment,
            LedgerError::InsufficientCollateral { .. } => ErrorCode::InsufficientCollateral,
            LedgerError::InsufficientLiquidity { .. } => ErrorCode::InsufficientLiquidity,
            LedgerError::ConcurrentModification(_) => ErrorCode::ConcurrentModification,
            LedgerError::Offer(e) => match e {
                MatchError::OfferNotFound(_) => ErrorCode::NotFound,
                MatchError::NotOfferOwner { .. } => ErrorCode::Unauthorized,
                _ => ErrorCode::Validation,
            },
            LedgerError::Position(_) => ErrorCode::Validation,
            LedgerError::Oracle(e) => match e {
                OracleError::PriceUnavailable(_) => ErrorCode::PriceUnavailable,
                OracleError::Stale { .. } => ErrorCode::StalePrice,
                OracleError::InvalidPrice { .. } | OracleError::FromFuture { .. } => ErrorCode::Validation,
                OracleError::NonMonotonic { .. } | OracleError::MarketResolved(_) => ErrorCode::Conflict,
            },
            LedgerError::Market(e) => match e {
                MarketError::AlreadyResolved(_) | MarketError::Duplicate(_) => ErrorCode::Conflict,
                _ => ErrorCode::Validation,
            },
            LedgerError::Config(_) => ErrorCode::Internal,
        }
    }
}

impl From<LedgerError> for ApiResponse {
    fn from(err: LedgerError) -> Self {
        ApiResponse::Error(ApiError {
            code: ErrorCode::from(&err),
            message: err.to_string(),
        })
    }
}

impl Ledger {
    pub fn execute(&self, command: LedgerCommand) -> ApiResponse {
        match self.dispatch(command) {
            Ok(response) => response,
            Err(e) => {
                tracing::debug!(error = %e, "command rejected");
                e.into()
            }
        }
    }

    fn dispatch(&self, command: LedgerCommand) -> Result<ApiResponse, LedgerError> {
        match command {
            LedgerCommand::SubmitOffer(request) => {
                let offer_id = self.submit_offer(request)?;
                Ok(ApiResponse::OfferSubmitted { offer_id })
            }
            LedgerCommand::CancelOffer { lender, offer_id } => {
                Ok(ApiResponse::OfferCancelled(self.cancel_offer(lender, offer_id)?))
            }
            LedgerCommand::OpenPosition {
                offer_id,
                borrower,
                collateral,
                amount,
                duration_days,
            } => {
                let position = self.open_position(offer_id, borrower, collateral, amount, duration_days)?;
                Ok(ApiResponse::PositionsOpened(vec![position]))
            }
            LedgerCommand::Borrow(request) => Ok(ApiResponse::PositionsOpened(self.borrow(request)?.positions)),
            LedgerCommand::Repay { position_id, amount } => Ok(ApiResponse::Repaid(self.repay(position_id, amount)?)),
            LedgerCommand::UpdatePrice {
                market_id,
                price,
                timestamp,
            } => {
                let update = self.update_price(market_id, price, timestamp)?;
                Ok(ApiResponse::PriceUpdated {
                    market_id,
                    snapshot_version: update.snapshot_version,
                    triggered: update.health.triggered,
                })
            }
            LedgerCommand::ResolveMarket { market_id, price } => {
                let resolution = self.resolve_market(market_id, price)?;
                Ok(ApiResponse::MarketResolved {
                    market_id,
                    positions_closed: resolution.closed.iter().map(|c| c.position_id).collect(),
                })
            }
            LedgerCommand::RunTick => {
                let tick = self.run_tick()?;
                Ok(ApiResponse::TickCompleted {
                    boundary: tick.boundary,
                    interest: tick.accrual.total_interest,
                    liquidated: tick.liquidations.liquidated.iter().map(|l| l.position_id).collect(),
                    deferred: tick.liquidations.deferred,
                })
            }
        }
    }

    pub fn query(&self, query: LedgerQuery) -> ApiResponse {
        let not_found = |what: String| {
            ApiResponse::Error(ApiError {
                code: ErrorCode::NotFound,
                message: format!("{what} not found"),
            })
        };

        match query {
            LedgerQuery::Offers { filter, sort } => ApiResponse::Offers(self.list_offers(&filter, sort)),
            LedgerQuery::BorrowQuote(request) => match self.quote_borrow(&request) {
                Ok(quote) => ApiResponse::BorrowQuote(quote),
                Err(e) => e.into(),
            },
            LedgerQuery::Position(id) => match self.position(id) {
                Some(position) => ApiResponse::Position(position),
                None => not_found(id.to_string()),
            },
            LedgerQuery::PositionSummary(id) => match self.position_summary(id) {
                Ok(summary) => ApiResponse::PositionSummary(summary),
                Err(e) => e.into(),
            },
            LedgerQuery::BorrowerPositions(borrower) => ApiResponse::Positions(self.positions_for_borrower(borrower)),
            LedgerQuery::LenderAccount(lender) => match self.lender_account(lender) {
                Some(account) => ApiResponse::LenderAccount(account),
                None => not_found(format!("lender {}", lender.0)),
            },
            LedgerQuery::Market(id) => match self.market(id) {
                Some(market) => ApiResponse::Market(market),
                None => not_found(id.to_string()),
            },
            LedgerQuery::PlatformStats => ApiResponse::PlatformStats(self.platform_stats()),
            LedgerQuery::MarketplaceStats => ApiResponse::MarketplaceStats(self.marketplace_stats()),
            LedgerQuery::RecentEvents(count) => ApiResponse::Events(self.recent_events(count)),
        }
    }
}
