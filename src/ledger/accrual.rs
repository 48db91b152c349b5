//! Interest accrual and the periodic tick.

use super::core::{Ledger, Outcome};
use super::results::{AccrualResult, LedgerError, TickResult};
use crate::events::{EventPayload, InterestAccruedEvent};
use crate::position::{accrue_position, Accrual};
use crate::types::{PositionId, Quote, Timestamp};

impl Ledger {
    /// Accrue one position up to `boundary`. Replaying a boundary that was
    /// already accrued is a no-op.
    pub fn accrue(&self, position_id: PositionId, boundary: Timestamp) -> Result<Option<Accrual>, LedgerError> {
        let tick_ms = self.config.interest.tick_interval_ms;

        self.commit(
            position_id,
            |position| match accrue_position(position, boundary, tick_ms) {
                Some(accrual) => Ok(Outcome::Updated(accrual.position.clone(), Some(accrual))),
                None => Ok(Outcome::Unchanged(None)),
            },
            |_, after, accrual| {
                if let Some(accrual) = accrual {
                    self.with_lender(after.lender, |account| account.record_interest(accrual.interest));
                    tracing::debug!(
                        %position_id,
                        interest = %accrual.interest,
                        ticks = accrual.ticks,
                        "interest accrued"
                    );
                    self.emit_event(EventPayload::InterestAccrued(InterestAccruedEvent {
                        position_id,
                        lender: after.lender,
                        interest: accrual.interest,
                        ticks: accrual.ticks,
                        accrued_total: after.accrued_interest,
                    }));
                }
            },
        )
    }

    /// Accrue every open position to the current tick boundary. A contended
    /// position is skipped; the next tick accrues it from where it stopped.
    pub fn accrue_all(&self) -> Result<AccrualResult, LedgerError> {
        let boundary = self.tick_boundary();
        let mut result = AccrualResult::default();

        for position in self.collect_positions(|p| p.is_open()) {
            match self.accrue(position.id, boundary) {
                Ok(Some(accrual)) => {
                    result.positions_accrued += 1;
                    result.total_interest = result.total_interest.add(accrual.interest);
                }
                Ok(None) => {}
                Err(e @ LedgerError::ConcurrentModification(_)) => {
                    tracing::warn!(position_id = %position.id, error = %e, "accrual contended");
                    result.contended.push(position.id);
                }
                Err(e) => return Err(e),
            }
        }
        Ok(result)
    }

    /// One scheduler tick: accrue, re-evaluate health against the current
    /// snapshot, then drain the liquidation queue. Anything that cannot be
    /// finished now stays queued for the next tick.
    pub fn run_tick(&self) -> Result<TickResult, LedgerError> {
        let boundary = self.tick_boundary();
        let accrual = self.accrue_all()?;

        let snapshot = self.prices.snapshot();
        let ids: Vec<PositionId> = self.collect_positions(|p| p.is_open()).into_iter().map(|p| p.id).collect();
        let health = self.evaluate_positions(ids, &snapshot)?;
        let liquidations = self.process_liquidations()?;

        if accrual.total_interest > Quote::zero() || !liquidations.liquidated.is_empty() {
            tracing::info!(
                boundary = %boundary,
                accrued = accrual.positions_accrued,
                interest = %accrual.total_interest,
                liquidated = liquidations.liquidated.len(),
                "tick complete"
            );
        }

        Ok(TickResult {
            boundary,
            accrual,
            health,
            liquidations,
        })
    }
}
