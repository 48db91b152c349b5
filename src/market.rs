//! Conditional-token markets.
//!
//! A market is a single prediction-market outcome whose token is accepted as
//! collateral. It accepts new offers and loans only while open and before its
//! resolution deadline. Resolution fixes the token's final price once.

use crate::types::{MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Market status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketStatus {
    /// Outcome not yet known, token trades freely
    Open,
    /// Outcome known, `resolved_price` is final
    Resolved,
}

impl Default for MarketStatus {
    fn default() -> Self {
        Self::Open
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    pub id: MarketId,
    /// Human-readable name (e.g., "Fed Rate Decision")
    pub name: String,
    pub resolution_deadline: Timestamp,
    pub status: MarketStatus,
    /// Set exactly once. `None` until resolution.
    pub resolved_price: Option<Decimal>,
    pub resolved_at: Option<Timestamp>,
}

impl Market {
    pub fn new(id: MarketId, name: impl Into<String>, resolution_deadline: Timestamp) -> Self {
        Self {
            id,
            name: name.into(),
            resolution_deadline,
            status: MarketStatus::Open,
            resolved_price: None,
            resolved_at: None,
        }
    }

    pub fn validate(&self) -> Result<(), MarketError> {
        if self.name.trim().is_empty() {
            return Err(MarketError::EmptyName(self.id));
        }
        Ok(())
    }

    /// Open for new offers and new loans at `now`.
    pub fn accepts_new_loans(&self, now: Timestamp) -> bool {
        self.status == MarketStatus::Open && now < self.resolution_deadline
    }

    pub fn is_resolved(&self) -> bool {
        self.status == MarketStatus::Resolved
    }

    /// Resolved at zero: every token in this market is worthless.
    pub fn is_worthless(&self) -> bool {
        self.is_resolved() && self.resolved_price.map_or(false, |p| p.is_zero())
    }

    /// Final price as a `Price`, if resolved above zero.
    pub fn settlement_price(&self) -> Option<Price> {
        self.resolved_price.and_then(Price::new)
    }

    pub fn resolve(&mut self, price: Decimal, timestamp: Timestamp) -> Result<(), MarketError> {
        if self.is_resolved() {
            return Err(MarketError::AlreadyResolved(self.id));
        }
        if price < Decimal::ZERO || price > Decimal::ONE {
            return Err(MarketError::InvalidResolutionPrice { market_id: self.id, price });
        }
        self.status = MarketStatus::Resolved;
        self.resolved_price = Some(price);
        self.resolved_at = Some(timestamp);
        Ok(())
    }

    /// Case-insensitive substring match on the market name.
    pub fn matches_search(&self, term: &str) -> bool {
        self.name.to_lowercase().contains(&term.to_lowercase())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MarketError {
    #[error("Market {0} already resolved")]
    AlreadyResolved(MarketId),

    #[error("Invalid resolution price {price} for market {market_id}")]
    InvalidResolutionPrice { market_id: MarketId, price: Decimal },

    #[error("Market {0} already exists")]
    Duplicate(MarketId),

    #[error("Market {0} has an empty name")]
    EmptyName(MarketId),
}
