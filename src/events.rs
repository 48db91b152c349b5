// 11.0: every state change produces an event. used for audit trails and
// notifying lenders/borrowers. the EventPayload enum lists all event types.
// 11.1: EventLog is bounded; the oldest events fall off once it is full.

use crate::liquidation::LiquidationEvent;
use crate::offer::OfferStatus;
use crate::types::{AccountId, Apy, HealthFactor, MarketId, OfferId, PositionId, Price, Quote, Timestamp, Units};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Market events
    MarketCreated(MarketCreatedEvent),
    MarketResolved(MarketResolvedEvent),

    // Offer events
    OfferSubmitted(OfferSubmittedEvent),
    OfferFilled(OfferFilledEvent),
    OfferCancelled(OfferCancelledEvent),

    // Position events
    PositionOpened(PositionOpenedEvent),
    Repayment(RepaymentEvent),
    InterestAccrued(InterestAccruedEvent),

    // Price events
    PriceUpdated(PriceUpdatedEvent),

    // Risk events
    LiquidationTriggered(LiquidationTriggeredEvent),
    LiquidationCleared(LiquidationClearedEvent),
    Liquidation(LiquidationEvent),
    UnrecoveredDebt(UnrecoveredDebtEvent),
}

impl EventPayload {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::MarketCreated(_) => "market_created",
            EventPayload::MarketResolved(_) => "market_resolved",
            EventPayload::OfferSubmitted(_) => "offer_submitted",
            EventPayload::OfferFilled(_) => "offer_filled",
            EventPayload::OfferCancelled(_) => "offer_cancelled",
            EventPayload::PositionOpened(_) => "position_opened",
            EventPayload::Repayment(_) => "repayment",
            EventPayload::InterestAccrued(_) => "interest_accrued",
            EventPayload::PriceUpdated(_) => "price_updated",
            EventPayload::LiquidationTriggered(_) => "liquidation_triggered",
            EventPayload::LiquidationCleared(_) => "liquidation_cleared",
            EventPayload::Liquidation(_) => "liquidation",
            EventPayload::UnrecoveredDebt(_) => "unrecovered_debt",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketCreatedEvent {
    pub market_id: MarketId,
    pub name: String,
    pub resolution_deadline: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketResolvedEvent {
    pub market_id: MarketId,
    pub resolved_price: Decimal,
    /// Positions force-closed by a worthless resolution
    pub positions_closed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferSubmittedEvent {
    pub offer_id: OfferId,
    pub lender: AccountId,
    pub market_id: MarketId,
    pub principal: Quote,
    pub apy: Apy,
    pub max_duration_days: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferFilledEvent {
    pub offer_id: OfferId,
    pub position_id: PositionId,
    pub filled_amount: Quote,
    pub remaining: Quote,
    pub status: OfferStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferCancelledEvent {
    pub offer_id: OfferId,
    pub lender: AccountId,
    /// Unfilled principal withdrawn with the offer
    pub remaining: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionOpenedEvent {
    pub position_id: PositionId,
    pub offer_id: OfferId,
    pub borrower: AccountId,
    pub lender: AccountId,
    pub market_id: MarketId,
    pub principal: Quote,
    pub collateral: Units,
    pub apy: Apy,
    pub health_factor: HealthFactor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepaymentEvent {
    pub position_id: PositionId,
    pub borrower: AccountId,
    pub interest_paid: Quote,
    pub principal_paid: Quote,
    pub remaining_debt: Quote,
    pub collateral_released: Units,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestAccruedEvent {
    pub position_id: PositionId,
    pub lender: AccountId,
    pub interest: Quote,
    pub ticks: u64,
    pub accrued_total: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceUpdatedEvent {
    pub market_id: MarketId,
    pub price: Price,
    pub snapshot_version: u64,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationTriggeredEvent {
    pub position_id: PositionId,
    pub health_factor: HealthFactor,
    pub price: Price,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationClearedEvent {
    pub position_id: PositionId,
    pub health_factor: HealthFactor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnrecoveredDebtEvent {
    pub position_id: PositionId,
    pub lender: AccountId,
    pub amount: Quote,
}

/// Bounded, append-only event log shared by every ledger operation.
#[derive(Debug)]
pub struct EventLog {
    events: Mutex<VecDeque<Event>>,
    next_id: AtomicU64,
    max_events: usize,
}

impl EventLog {
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::new()),
            next_id: AtomicU64::new(1),
            max_events,
        }
    }

    pub fn emit(&self, timestamp: Timestamp, payload: EventPayload) -> EventId {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed));
        tracing::trace!(event_id = id.0, kind = payload.kind(), "event");

        let mut events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        events.push_back(Event {
            id,
            timestamp,
            payload,
        });
        while events.len() > self.max_events {
            events.pop_front();
        }
        id
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn all(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Events with an id strictly greater than `after`.
    pub fn since(&self, after: EventId) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.id > after)
            .cloned()
            .collect()
    }

    pub fn recent(&self, count: usize) -> Vec<Event> {
        let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let skip = events.len().saturating_sub(count);
        events.iter().skip(skip).cloned().collect()
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.all())
    }
}
