//! Offer submission and cancellation.

use super::core::{lock, Ledger};
use super::results::{LedgerError, ValidationError};
use crate::events::{EventPayload, OfferCancelledEvent, OfferSubmittedEvent};
use crate::offer::{Offer, OfferRequest};
use crate::types::{AccountId, OfferId, Quote, Units};
use std::sync::atomic::Ordering;

impl Ledger {
    pub fn submit_offer(&self, request: OfferRequest) -> Result<OfferId, LedgerError> {
        self.validate_offer(&request)?;

        let now = self.time();
        let market = self.market_snapshot(request.market_id)?;
        if !market.accepts_new_loans(now) {
            return Err(LedgerError::MarketNotOpen(request.market_id));
        }

        let offer_id = OfferId(self.next_offer_id.fetch_add(1, Ordering::Relaxed));
        let offer = Offer::new(offer_id, &request, now);
        lock(&self.book).insert(offer);
        self.with_lender(request.lender, |_| ());

        tracing::info!(
            %offer_id,
            lender = request.lender.0,
            market_id = %request.market_id,
            principal = %request.principal,
            apy = %request.apy,
            "offer submitted"
        );
        self.emit_event(EventPayload::OfferSubmitted(OfferSubmittedEvent {
            offer_id,
            lender: request.lender,
            market_id: request.market_id,
            principal: request.principal,
            apy: request.apy,
            max_duration_days: request.max_duration_days,
        }));

        Ok(offer_id)
    }

    /// Withdraw the unfilled remainder of an offer. Positions already opened
    /// against it are unaffected.
    pub fn cancel_offer(&self, lender: AccountId, offer_id: OfferId) -> Result<Offer, LedgerError> {
        let cancelled = lock(&self.book).cancel(offer_id, lender, self.time())?;

        tracing::info!(%offer_id, remaining = %cancelled.principal, "offer cancelled");
        self.emit_event(EventPayload::OfferCancelled(OfferCancelledEvent {
            offer_id,
            lender,
            remaining: cancelled.principal,
        }));
        Ok(cancelled)
    }

    pub fn offer(&self, offer_id: OfferId) -> Option<Offer> {
        lock(&self.book).get(offer_id).cloned()
    }

    fn validate_offer(&self, request: &OfferRequest) -> Result<(), ValidationError> {
        let limits = &self.config.limits;

        self.validate_amount("principal", request.principal)?;
        if request.apy.value() > self.config.interest.max_apy {
            return Err(ValidationError::ApyOutOfRange {
                apy: request.apy,
                max: self.config.interest.max_apy,
            });
        }
        self.validate_duration(request.max_duration_days)?;
        if request.max_ltv.value() == 0 || request.max_ltv > limits.max_ltv {
            return Err(ValidationError::LtvOutOfRange {
                ltv: request.max_ltv,
                max: limits.max_ltv,
            });
        }
        Ok(())
    }

    pub(super) fn validate_amount(&self, field: &'static str, amount: Quote) -> Result<(), ValidationError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositive {
                field,
                value: amount.value(),
            });
        }
        let minimum = self.config.limits.min_principal;
        if amount < minimum {
            return Err(ValidationError::BelowMinimum {
                field,
                value: amount,
                minimum,
            });
        }
        let maximum = self.config.limits.max_principal;
        if amount > maximum {
            return Err(ValidationError::AboveMaximum {
                field,
                value: amount.value(),
                maximum: maximum.value(),
            });
        }
        Ok(())
    }

    pub(super) fn validate_collateral(&self, collateral: Units) -> Result<(), ValidationError> {
        if !collateral.is_positive() {
            return Err(ValidationError::NonPositive {
                field: "collateral",
                value: collateral.value(),
            });
        }
        let maximum = self.config.limits.max_collateral;
        if collateral > maximum {
            return Err(ValidationError::AboveMaximum {
                field: "collateral",
                value: collateral.value(),
                maximum: maximum.value(),
            });
        }
        Ok(())
    }

    pub(super) fn validate_duration(&self, days: u32) -> Result<(), ValidationError> {
        let max = self.config.limits.max_duration_days;
        if days == 0 || days > max {
            return Err(ValidationError::DurationOutOfRange { requested: days, max });
        }
        Ok(())
    }
}
