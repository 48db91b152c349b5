//! Lend offers and the offer book.
//!
//! Lenders post standing offers of USD liquidity against a single market.
//! Borrow requests are filled greedily from the cheapest capital first
//! (lowest APY), first-come first-served among equal rates. Matching is
//! planned without mutation so a request can be rejected as a whole.

use crate::types::{AccountId, Apy, Bps, MarketId, OfferId, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfferStatus {
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
}

impl OfferStatus {
    /// Still open for matching.
    pub fn is_fillable(&self) -> bool {
        matches!(self, OfferStatus::Open | OfferStatus::PartiallyFilled)
    }
}

/// What a lender submits. Validated by the ledger before it becomes an `Offer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub lender: AccountId,
    pub market_id: MarketId,
    pub principal: Quote,
    pub apy: Apy,
    pub max_duration_days: u32,
    pub max_ltv: Bps,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub lender: AccountId,
    pub market_id: MarketId,
    /// Remaining fillable amount.
    pub principal: Quote,
    pub original_principal: Quote,
    pub apy: Apy,
    pub max_duration_days: u32,
    pub max_ltv: Bps,
    pub status: OfferStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Offer {
    pub fn new(id: OfferId, request: &OfferRequest, timestamp: Timestamp) -> Self {
        Self {
            id,
            lender: request.lender,
            market_id: request.market_id,
            principal: request.principal,
            original_principal: request.principal,
            apy: request.apy,
            max_duration_days: request.max_duration_days,
            max_ltv: request.max_ltv,
            status: OfferStatus::Open,
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn filled(&self) -> Quote {
        self.original_principal.sub(self.principal)
    }

    /// Share of the original principal already lent out, 0..=1.
    pub fn utilization(&self) -> Decimal {
        if self.original_principal.is_zero() {
            return Decimal::ZERO;
        }
        self.filled().value() / self.original_principal.value()
    }

    pub fn accepts_duration(&self, duration_days: u32) -> bool {
        self.max_duration_days >= duration_days
    }

    fn key(&self) -> OfferKey {
        OfferKey::new(self.apy, self.created_at, self.id)
    }
}

// 2.1: matching priority. cheapest rate, then earliest, then lowest id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct OfferKey {
    apy: Apy,
    created_at: Timestamp,
    offer_id: OfferId,
}

impl OfferKey {
    fn new(apy: Apy, created_at: Timestamp, offer_id: OfferId) -> Self {
        Self {
            apy,
            created_at,
            offer_id,
        }
    }
}

impl PartialOrd for OfferKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OfferKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.apy
            .cmp(&other.apy)
            .then(self.created_at.cmp(&other.created_at))
            .then(self.offer_id.cmp(&other.offer_id))
    }
}

/// One leg of a matched borrow request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferFill {
    pub offer_id: OfferId,
    pub lender: AccountId,
    pub filled_amount: Quote,
    pub apy: Apy,
    pub max_ltv: Bps,
}

#[derive(Debug, Clone, Default)]
pub struct OfferBook {
    offers: HashMap<OfferId, Offer>,
    /// Fillable offers per market, in matching priority
    queues: HashMap<MarketId, BTreeSet<OfferKey>>,
}

impl OfferBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, offer: Offer) {
        if offer.status.is_fillable() {
            self.queues.entry(offer.market_id).or_default().insert(offer.key());
        }
        self.offers.insert(offer.id, offer);
    }

    pub fn get(&self, offer_id: OfferId) -> Option<&Offer> {
        self.offers.get(&offer_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Offer> {
        self.offers.values()
    }

    pub fn len(&self) -> usize {
        self.offers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offers.is_empty()
    }

    /// Fillable offers for a market in priority order.
    pub fn candidates(&self, market_id: MarketId, duration_days: u32) -> Vec<&Offer> {
        let Some(queue) = self.queues.get(&market_id) else {
            return Vec::new();
        };
        queue
            .iter()
            .filter_map(|key| self.offers.get(&key.offer_id))
            .filter(|offer| offer.accepts_duration(duration_days))
            .collect()
    }

    pub fn available_liquidity(&self, market_id: MarketId, duration_days: u32) -> Quote {
        self.candidates(market_id, duration_days)
            .iter()
            .map(|o| o.principal)
            .sum()
    }

    /// 2.2: plan a greedy fill without touching the book. the borrower's own
    /// offers are skipped.
    pub fn plan_fills(
        &self,
        market_id: MarketId,
        duration_days: u32,
        amount: Quote,
        borrower: AccountId,
    ) -> Result<Vec<OfferFill>, MatchError> {
        let mut fills = Vec::new();
        let mut remaining = amount;

        for offer in self.candidates(market_id, duration_days) {
            if !remaining.is_positive() {
                break;
            }
            if offer.lender == borrower {
                continue;
            }
            let take = remaining.min(offer.principal);
            if !take.is_positive() {
                continue;
            }
            fills.push(OfferFill {
                offer_id: offer.id,
                lender: offer.lender,
                filled_amount: take,
                apy: offer.apy,
                max_ltv: offer.max_ltv,
            });
            remaining = remaining.sub(take);
        }

        if remaining.is_positive() {
            return Err(MatchError::InsufficientLiquidity {
                requested: amount,
                available: amount.sub(remaining),
            });
        }

        Ok(fills)
    }

    /// Plan a fill against one specific offer.
    pub fn plan_single(
        &self,
        offer_id: OfferId,
        duration_days: u32,
        amount: Quote,
    ) -> Result<OfferFill, MatchError> {
        let offer = self.offers.get(&offer_id).ok_or(MatchError::OfferNotFound(offer_id))?;
        if !offer.status.is_fillable() {
            return Err(MatchError::OfferNotOpen(offer_id));
        }
        if !offer.accepts_duration(duration_days) {
            return Err(MatchError::DurationTooLong {
                offer_id,
                requested: duration_days,
                maximum: offer.max_duration_days,
            });
        }
        if amount > offer.principal {
            return Err(MatchError::InsufficientLiquidity {
                requested: amount,
                available: offer.principal,
            });
        }
        Ok(OfferFill {
            offer_id,
            lender: offer.lender,
            filled_amount: amount,
            apy: offer.apy,
            max_ltv: offer.max_ltv,
        })
    }

    /// 2.3: commit a planned fill. reduces principal and updates status
    pub fn apply_fill(&mut self, fill: &OfferFill, timestamp: Timestamp) -> Result<&Offer, MatchError> {
        let offer = self
            .offers
            .get_mut(&fill.offer_id)
            .ok_or(MatchError::OfferNotFound(fill.offer_id))?;

        if !offer.status.is_fillable() {
            return Err(MatchError::OfferNotOpen(fill.offer_id));
        }
        if fill.filled_amount > offer.principal {
            return Err(MatchError::InsufficientLiquidity {
                requested: fill.filled_amount,
                available: offer.principal,
            });
        }

        offer.principal = offer.principal.sub(fill.filled_amount);
        offer.updated_at = timestamp;

        if offer.principal.is_zero() {
            offer.status = OfferStatus::Filled;
            let key = offer.key();
            if let Some(queue) = self.queues.get_mut(&offer.market_id) {
                queue.remove(&key);
            }
        } else {
            offer.status = OfferStatus::PartiallyFilled;
        }

        self.offers
            .get(&fill.offer_id)
            .ok_or(MatchError::OfferNotFound(fill.offer_id))
    }

    /// Cancel the unfilled remainder. Only the lender may cancel.
    pub fn cancel(
        &mut self,
        offer_id: OfferId,
        lender: AccountId,
        timestamp: Timestamp,
    ) -> Result<Offer, MatchError> {
        let offer = self.offers.get_mut(&offer_id).ok_or(MatchError::OfferNotFound(offer_id))?;

        if offer.lender != lender {
            return Err(MatchError::NotOfferOwner { offer_id, account: lender });
        }
        if !offer.status.is_fillable() {
            return Err(MatchError::OfferNotOpen(offer_id));
        }

        offer.status = OfferStatus::Cancelled;
        offer.updated_at = timestamp;
        let key = offer.key();
        let market_id = offer.market_id;
        let cancelled = offer.clone();

        if let Some(queue) = self.queues.get_mut(&market_id) {
            queue.remove(&key);
        }

        Ok(cancelled)
    }
}

/// Filter for the offer listing projection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OfferFilter {
    pub market_id: Option<MarketId>,
    /// Case-insensitive substring of the market name
    pub search: Option<String>,
    pub lender: Option<AccountId>,
    pub fillable_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OfferSort {
    /// Highest yield first
    #[default]
    ApyDesc,
    /// Cheapest capital first (matching order)
    ApyAsc,
    AmountDesc,
    DurationAsc,
    Recent,
}

pub fn sort_offers(offers: &mut [Offer], sort: OfferSort) {
    match sort {
        OfferSort::ApyDesc => offers.sort_by(|a, b| b.apy.cmp(&a.apy).then(a.id.cmp(&b.id))),
        OfferSort::ApyAsc => offers.sort_by(|a, b| a.key().cmp(&b.key())),
        OfferSort::AmountDesc => {
            offers.sort_by(|a, b| b.principal.cmp(&a.principal).then(a.id.cmp(&b.id)))
        }
        OfferSort::DurationAsc => offers.sort_by(|a, b| {
            a.max_duration_days
                .cmp(&b.max_duration_days)
                .then(a.id.cmp(&b.id))
        }),
        OfferSort::Recent => {
            offers.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)))
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MatchError {
    #[error("Insufficient liquidity: requested {requested}, available {available}")]
    InsufficientLiquidity { requested: Quote, available: Quote },

    #[error("Offer {0} not found")]
    OfferNotFound(OfferId),

    #[error("Offer {0} is not open")]
    OfferNotOpen(OfferId),

    #[error("Offer {offer_id} allows at most {maximum} days, requested {requested}")]
    DurationTooLong { offer_id: OfferId, requested: u32, maximum: u32 },

    #[error("Account {account:?} does not own offer {offer_id}")]
    NotOfferOwner { offer_id: OfferId, account: AccountId },
}
