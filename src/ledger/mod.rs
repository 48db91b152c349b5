// 8.0: the position ledger. single authoritative store of markets, offers,
// positions and lender accounts. every mutation is an atomic commit;
// pure math lives in the top-level modules, this layer sequences and records it.

mod accrual;
mod core;
mod liquidations;
mod markets;
mod offers;
mod positions;
mod pricing;
mod projections;
mod results;

pub use core::Ledger;
pub use projections::{BorrowQuote, MarketplaceStats, PlatformStats, PositionSummary};
pub use results::{
    AccrualResult, BorrowRequest, BorrowResult, HealthPassResult, LedgerError, LiquidationPassResult,
    LiquidationResult, PollResult, PriceUpdateResult, RepayResult, ResolutionResult, TickResult, ValidationError,
};
