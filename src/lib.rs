// lending-core: collateralized lending ledger for prediction market shares.
// lenders post offers, borrowers lock outcome shares and draw against them.
// solvency first: health checks gate every loan, liquidation closes bad ones.
// all computation is deterministic; the only I/O is the pluggable price oracle.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Price, Quote, Units, Bps, Apy, Timestamp
//   2.x  offer.rs: offer book, fill planning, filters and sorting
//   3.x  health.rs: health factor, borrowing power, liquidation price
//   4.x  position.rs: position struct, accrual, repayment, liquidation apply
//   5.x  interest.rs: per-tick compounding from APY
//   6.x  liquidation.rs: full/partial liquidation plans, penalty, shortfall
//   7.x  config.rs: interest, health, liquidation, oracle, limits, presets
//   8.x  ledger/: the ledger: offers, borrowing, repay, ticks, liquidations
//   9.x  api.rs: command/query surface with stable error codes
//   9.1  oracle.rs: price oracle trait, snapshots, mock oracle
//   10.x account.rs: lender bookkeeping
//   11.x events.rs: state transition events for audit
//   12.x market.rs: collateral market lifecycle and resolution

// core lending modules
pub mod account;
pub mod events;
pub mod health;
pub mod interest;
pub mod ledger;
pub mod liquidation;
pub mod market;
pub mod offer;
pub mod position;
pub mod types;

// integration modules
pub mod api;
pub mod config;
pub mod oracle;

// re exports for convenience
pub use account::*;
pub use events::*;
pub use health::*;
pub use interest::*;
pub use liquidation::*;
pub use market::*;
pub use offer::*;
pub use oracle::*;
pub use position::*;
pub use types::*;
pub use api::{ApiError, ApiResponse, ErrorCode, LedgerCommand, LedgerQuery};
pub use config::{ConfigError, Environment, LedgerConfig, LimitsConfig, OracleConfig};
pub use ledger::{
    AccrualResult, BorrowQuote, BorrowRequest, BorrowResult, HealthPassResult, Ledger, LedgerError, LiquidationPassResult,
    LiquidationResult, MarketplaceStats, PlatformStats, PollResult, PositionSummary, PriceUpdateResult, RepayResult,
    ResolutionResult, TickResult, ValidationError,
};
