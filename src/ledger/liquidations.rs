//! Liquidation queue processing.

use super::core::{lock, Ledger, Outcome};
use super::results::{LedgerError, LiquidationPassResult, LiquidationResult};
use crate::events::{EventPayload, LiquidationClearedEvent, UnrecoveredDebtEvent};
use crate::health::health_factor;
use crate::liquidation::{plan_liquidation, plan_worthless, LiquidationPlan};
use crate::oracle::PriceSnapshot;
use crate::position::{apply_liquidation, Position, PositionStatus};
use crate::types::{HealthFactor, PositionId};

enum Attempt {
    Liquidated(LiquidationResult),
    Cleared(HealthFactor),
    Deferred,
    Waiting,
    Skipped,
}

impl Ledger {
    /// Drain the liquidation queue. Each pending position is re-checked
    /// against the current snapshot before it is seized; positions without a
    /// usable price or still inside their grace window go back on the queue.
    pub fn process_liquidations(&self) -> Result<LiquidationPassResult, LedgerError> {
        let queued = lock(&self.queue).drain();
        let snapshot = self.prices.snapshot();
        let mut result = LiquidationPassResult::default();

        for position_id in queued {
            let attempt = match self.try_liquidate(position_id, &snapshot) {
                Ok(attempt) => attempt,
                Err(e @ LedgerError::ConcurrentModification(_)) => {
                    // retried on the next pass
                    tracing::warn!(%position_id, error = %e, "liquidation contended");
                    self.enqueue_liquidation(position_id);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match attempt {
                Attempt::Liquidated(liquidation) => result.liquidated.push(liquidation),
                Attempt::Cleared(_) => result.cleared.push(position_id),
                Attempt::Deferred => {
                    self.enqueue_liquidation(position_id);
                    result.deferred.push(position_id);
                }
                Attempt::Waiting => {
                    self.enqueue_liquidation(position_id);
                    result.waiting.push(position_id);
                }
                Attempt::Skipped => {}
            }
        }

        if !result.liquidated.is_empty() {
            tracing::info!(
                liquidated = result.liquidated.len(),
                deferred = result.deferred.len(),
                waiting = result.waiting.len(),
                "liquidation pass"
            );
        }
        Ok(result)
    }

    fn try_liquidate(&self, position_id: PositionId, snapshot: &PriceSnapshot) -> Result<Attempt, LedgerError> {
        let now = self.time();
        let params = &self.config.liquidation;

        self.commit(
            position_id,
            |position| {
                if !position.is_open() {
                    return Ok(Outcome::Unchanged(Attempt::Skipped));
                }
                // a worthless market has nothing left to wait for
                if snapshot.is_worthless(position.collateral_market) {
                    let plan = plan_worthless(position, now);
                    return self.liquidated(position, plan);
                }

                let price = match self.price_in(snapshot, position.collateral_market) {
                    Ok(price) => price,
                    Err(e) if e.is_price_unavailable() => return Ok(Outcome::Unchanged(Attempt::Deferred)),
                    Err(e) => return Err(e),
                };

                let health = health_factor(position.collateral, price, position.max_ltv, position.debt());
                if !health.is_liquidatable() {
                    if position.status == PositionStatus::Active {
                        return Ok(Outcome::Unchanged(Attempt::Skipped));
                    }
                    let mut next = position.clone();
                    next.status = PositionStatus::Active;
                    next.pending_since = None;
                    return Ok(Outcome::Updated(next, Attempt::Cleared(health)));
                }

                // queued without a completed health check, e.g. after contention
                let pending_since = position.pending_since.unwrap_or(now);
                if !params.grace_elapsed(pending_since, now) {
                    if position.status == PositionStatus::Active {
                        let mut next = position.clone();
                        next.status = PositionStatus::LiquidationPending;
                        next.pending_since = Some(now);
                        return Ok(Outcome::Updated(next, Attempt::Waiting));
                    }
                    return Ok(Outcome::Unchanged(Attempt::Waiting));
                }

                self.liquidated(position, plan_liquidation(position, price, params, now))
            },
            |before, after, attempt| match attempt {
                Attempt::Liquidated(result) => self.record_liquidation(before, after, result),
                Attempt::Cleared(health) => {
                    tracing::info!(%position_id, health = %health, "recovered before seizure");
                    self.emit_event(EventPayload::LiquidationCleared(LiquidationClearedEvent {
                        position_id,
                        health_factor: *health,
                    }));
                }
                Attempt::Waiting if before.status == PositionStatus::Active => {
                    tracing::warn!(%position_id, "liquidation pending, grace window started");
                }
                _ => {}
            },
        )
    }

    fn liquidated(&self, position: &Position, plan: LiquidationPlan) -> Result<Outcome<Attempt>, LedgerError> {
        let next = apply_liquidation(position, &plan.event)?;
        Ok(Outcome::Updated(
            next,
            Attempt::Liquidated(LiquidationResult {
                position_id: position.id,
                borrower: position.borrower,
                lender: position.lender,
                event: plan.event,
                collateral_released: plan.collateral_released,
            }),
        ))
    }

    // runs under the position lock right after the liquidation is committed
    pub(super) fn record_liquidation(&self, before: &Position, after: &Position, result: &LiquidationResult) {
        let event = &result.event;
        let principal_closed = before.principal.sub(after.principal);

        self.with_lender(result.lender, |account| {
            account.record_liquidation(principal_closed, event.debt_repaid(), event.penalty_amount, event.unrecovered_debt)
        });
        lock(&self.liquidations).push(event.clone());

        tracing::info!(
            position_id = %result.position_id,
            price = %event.trigger_price,
            covered = %event.debt_covered,
            seized = %event.collateral_seized,
            penalty = %event.penalty_amount,
            full_close = event.full_close,
            "position liquidated"
        );
        self.emit_event(EventPayload::Liquidation(event.clone()));

        if event.unrecovered_debt.is_positive() {
            tracing::warn!(
                position_id = %result.position_id,
                lender = result.lender.0,
                shortfall = %event.unrecovered_debt,
                "liquidation left unrecovered debt"
            );
            self.emit_event(EventPayload::UnrecoveredDebt(UnrecoveredDebtEvent {
                position_id: result.position_id,
                lender: result.lender,
                amount: event.unrecovered_debt,
            }));
        }
    }
}
