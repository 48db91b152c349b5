//! Opening, repaying and liquidating positions.
//!
//! Opening holds the offer book lock for the whole match, validate and apply
//! sequence, so a rejected request never leaves a partial fill behind.

use super::core::{lock, write, Ledger, Outcome};
use super::results::{BorrowRequest, BorrowResult, LedgerError, LiquidationResult, RepayResult, ValidationError};
use crate::events::{
    EventPayload, InterestAccruedEvent, LiquidationClearedEvent, OfferFilledEvent, PositionOpenedEvent,
    RepaymentEvent,
};
use crate::health::{collateral_required, health_factor};
use crate::interest::{accrual_start, ticks_between};
use crate::liquidation::LiquidationEvent;
use crate::offer::{MatchError, OfferBook, OfferFill};
use crate::position::{accrue_position, apply_liquidation, apply_repayment, Position, PositionStatus, PositionTerms};
use crate::types::{AccountId, HealthFactor, MarketId, OfferId, Price, PositionId, Quote, Units};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

impl Ledger {
    /// Borrow against one specific offer.
    pub fn open_position(
        &self,
        offer_id: OfferId,
        borrower: AccountId,
        collateral: Units,
        borrow_amount: Quote,
        duration_days: u32,
    ) -> Result<Position, LedgerError> {
        self.validate_amount("borrow amount", borrow_amount)?;
        self.validate_duration(duration_days)?;
        self.validate_collateral(collateral)?;

        let mut book = lock(&self.book);
        let offer = book.get(offer_id).ok_or(MatchError::OfferNotFound(offer_id))?;
        if offer.lender == borrower {
            return Err(ValidationError::SelfBorrow(borrower, offer_id).into());
        }
        let market_id = offer.market_id;
        let fill = book.plan_single(offer_id, duration_days, borrow_amount)?;

        let mut positions = self.execute_fills(&mut book, borrower, market_id, collateral, duration_days, vec![fill])?;
        positions.pop().ok_or(LedgerError::OfferNotOpen(offer_id))
    }

    /// Borrow from the cheapest offers in a market until the amount is covered.
    /// The borrower's own offers are never matched.
    pub fn borrow(&self, request: BorrowRequest) -> Result<BorrowResult, LedgerError> {
        self.validate_amount("borrow amount", request.amount)?;
        self.validate_duration(request.duration_days)?;
        self.validate_collateral(request.collateral)?;

        let mut book = lock(&self.book);
        let fills = book.plan_fills(request.market_id, request.duration_days, request.amount, request.borrower)?;

        let positions = self.execute_fills(
            &mut book,
            request.borrower,
            request.market_id,
            request.collateral,
            request.duration_days,
            fills.clone(),
        )?;
        Ok(BorrowResult { fills, positions })
    }

    // validates every fill against one price before any of them is applied
    fn execute_fills(
        &self,
        book: &mut OfferBook,
        borrower: AccountId,
        market_id: MarketId,
        collateral: Units,
        duration_days: u32,
        fills: Vec<OfferFill>,
    ) -> Result<Vec<Position>, LedgerError> {
        let now = self.time();
        let market = self.market_snapshot(market_id)?;
        if !market.accepts_new_loans(now) {
            return Err(LedgerError::MarketNotOpen(market_id));
        }
        let snapshot = self.prices.snapshot();
        let price = self.price_in(&snapshot, market_id)?;

        let assessment = assess_fills(collateral, price, &fills);
        if assessment.weakest.is_liquidatable() {
            return Err(LedgerError::InsufficientCollateral {
                provided: collateral,
                required: assessment.required,
            });
        }

        let accrual_start = accrual_start(now, self.config.interest.tick_interval_ms);
        let mut opened = Vec::with_capacity(fills.len());
        for (fill, share) in fills.iter().zip(assessment.shares) {
            let offer = book.apply_fill(fill, now)?.clone();
            let position_id = PositionId(self.next_position_id.fetch_add(1, Ordering::Relaxed));
            let terms = PositionTerms {
                borrower,
                lender: fill.lender,
                offer_id: fill.offer_id,
                collateral_market: market_id,
                collateral: share,
                principal: fill.filled_amount,
                apy: fill.apy,
                max_ltv: fill.max_ltv,
                duration_days,
            };
            let position = Position::open(position_id, &terms, now, accrual_start);
            let health = health_factor(share, price, fill.max_ltv, fill.filled_amount);

            write(&self.positions).insert(position_id, Arc::new(Mutex::new(position.clone())));
            self.with_lender(fill.lender, |account| account.record_loan(fill.filled_amount));

            tracing::info!(
                %position_id,
                offer_id = %fill.offer_id,
                borrower = borrower.0,
                principal = %fill.filled_amount,
                collateral = %share,
                health = %health,
                "position opened"
            );
            self.emit_event(EventPayload::OfferFilled(OfferFilledEvent {
                offer_id: fill.offer_id,
                position_id,
                filled_amount: fill.filled_amount,
                remaining: offer.principal,
                status: offer.status,
            }));
            self.emit_event(EventPayload::PositionOpened(PositionOpenedEvent {
                position_id,
                offer_id: fill.offer_id,
                borrower,
                lender: fill.lender,
                market_id,
                principal: fill.filled_amount,
                collateral: share,
                apy: fill.apy,
                health_factor: health,
            }));
            opened.push(position);
        }

        Ok(opened)
    }

    /// Repay part or all of a position's debt. Interest is brought up to the
    /// current tick first, then paid before principal.
    pub fn repay(&self, position_id: PositionId, amount: Quote) -> Result<RepayResult, LedgerError> {
        if !amount.is_positive() {
            return Err(ValidationError::NonPositive {
                field: "amount",
                value: amount.value(),
            }
            .into());
        }

        let boundary = self.tick_boundary();
        let tick_ms = self.config.interest.tick_interval_ms;
        let snapshot = self.prices.snapshot();

        let (result, interest) = self.commit(
            position_id,
            |position| {
                if !position.is_open() {
                    return Err(LedgerError::PositionNotActive(position_id));
                }
                let accrual = accrue_position(position, boundary, tick_ms);
                let (accrued, interest) = match accrual {
                    Some(a) => (a.position, a.interest),
                    None => (position.clone(), Quote::zero()),
                };

                let repayment = apply_repayment(&accrued, amount)?;
                let mut next = repayment.position;
                let mut cleared = false;

                if next.status == PositionStatus::LiquidationPending {
                    // cured only if a usable price says so
                    if let Ok(price) = self.price_in(&snapshot, next.collateral_market) {
                        let health = health_factor(next.collateral, price, next.max_ltv, next.debt());
                        if !health.is_liquidatable() {
                            next.status = PositionStatus::Active;
                            next.pending_since = None;
                            cleared = true;
                        }
                    }
                }

                let result = RepayResult {
                    position_id,
                    interest_paid: repayment.interest_paid,
                    principal_paid: repayment.principal_paid,
                    remaining_debt: next.debt(),
                    collateral_released: repayment.collateral_released,
                    status: next.status,
                    liquidation_cleared: cleared,
                };
                Ok(Outcome::Updated(next, (result, interest)))
            },
            |before, after, (result, interest)| {
                if interest.is_positive() {
                    self.with_lender(after.lender, |account| account.record_interest(*interest));
                    self.emit_event(EventPayload::InterestAccrued(InterestAccruedEvent {
                        position_id,
                        lender: after.lender,
                        interest: *interest,
                        ticks: ticks_between(before.last_accrual_at, after.last_accrual_at, tick_ms),
                        accrued_total: before.accrued_interest.add(*interest),
                    }));
                }
                self.with_lender(after.lender, |account| {
                    account.record_repayment(result.principal_paid, result.interest_paid)
                });
                self.emit_event(EventPayload::Repayment(RepaymentEvent {
                    position_id,
                    borrower: after.borrower,
                    interest_paid: result.interest_paid,
                    principal_paid: result.principal_paid,
                    remaining_debt: result.remaining_debt,
                    collateral_released: result.collateral_released,
                }));
                if result.liquidation_cleared {
                    if let Ok(price) = self.price_in(&snapshot, after.collateral_market) {
                        self.emit_event(EventPayload::LiquidationCleared(LiquidationClearedEvent {
                            position_id,
                            health_factor: health_factor(after.collateral, price, after.max_ltv, after.debt()),
                        }));
                    }
                }
            },
        )?;

        tracing::info!(
            %position_id,
            interest = %result.interest_paid,
            principal = %result.principal_paid,
            remaining = %result.remaining_debt,
            accrued = %interest,
            status = ?result.status,
            "repayment applied"
        );
        Ok(result)
    }

    /// Apply an externally planned liquidation record atomically.
    pub fn apply_liquidation(&self, position_id: PositionId, event: LiquidationEvent) -> Result<Position, LedgerError> {
        let (position, _) = self.commit(
            position_id,
            |position| {
                let next = apply_liquidation(position, &event)?;
                let released = if event.full_close {
                    position.collateral.sub(event.collateral_seized)
                } else {
                    Units::zero()
                };
                let result = LiquidationResult {
                    position_id,
                    borrower: position.borrower,
                    lender: position.lender,
                    event: event.clone(),
                    collateral_released: released,
                };
                Ok(Outcome::Updated(next.clone(), (next, result)))
            },
            |before, after, (_, result)| self.record_liquidation(before, after, result),
        )?;
        Ok(position)
    }

    /// Consistent copy of one position.
    pub fn position(&self, position_id: PositionId) -> Option<Position> {
        self.position_cell(position_id).ok().map(|cell| lock(&cell).clone())
    }

    pub fn positions(&self) -> Vec<Position> {
        self.collect_positions(|_| true)
    }

    pub fn open_positions(&self) -> Vec<Position> {
        self.collect_positions(|p| p.is_open())
    }

    pub fn positions_for_borrower(&self, borrower: AccountId) -> Vec<Position> {
        self.collect_positions(|p| p.borrower == borrower)
    }

    pub fn positions_for_lender(&self, lender: AccountId) -> Vec<Position> {
        self.collect_positions(|p| p.lender == lender)
    }
}

/// Collateral split and health of a planned set of fills at one price.
pub(super) struct FillAssessment {
    pub(super) shares: Vec<Units>,
    /// Collateral needed for every fill to open at health 1.0
    pub(super) required: Units,
    /// Lowest health among the positions the fills would open
    pub(super) weakest: HealthFactor,
}

pub(super) fn assess_fills(collateral: Units, price: Price, fills: &[OfferFill]) -> FillAssessment {
    let shares = split_collateral(collateral, fills);
    let mut required = Units::zero();
    let mut weakest = HealthFactor::UNBOUNDED;

    for (fill, share) in fills.iter().zip(&shares) {
        weakest = weakest.min(health_factor(*share, price, fill.max_ltv, fill.filled_amount));
        if let Some(needed) = collateral_required(fill.filled_amount, price, fill.max_ltv) {
            required = required.add(needed);
        }
    }
    FillAssessment {
        shares,
        required,
        weakest,
    }
}

// pro rata to the filled amounts, rounded down; the last position takes the remainder
fn split_collateral(collateral: Units, fills: &[OfferFill]) -> Vec<Units> {
    let total: Quote = fills.iter().map(|f| f.filled_amount).sum();
    let mut shares = Vec::with_capacity(fills.len());
    let mut assigned = Units::zero();

    for (i, fill) in fills.iter().enumerate() {
        let share = if i + 1 == fills.len() || total.is_zero() {
            collateral.sub(assigned)
        } else {
            Units::new(collateral.value() * fill.filled_amount.value() / total.value()).round_down()
        };
        assigned = assigned.add(share);
        shares.push(share);
    }
    shares
}
