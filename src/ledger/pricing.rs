//! Price updates and health re-evaluation.

use super::core::{Ledger, Outcome};
use super::results::{HealthPassResult, LedgerError, PollResult, PriceUpdateResult};
use crate::events::{EventPayload, LiquidationClearedEvent, LiquidationTriggeredEvent, PriceUpdatedEvent};
use crate::health::{health_factor, position_health, PositionHealth};
use crate::oracle::{OracleError, PriceOracle, PriceQuote, PriceSnapshot};
use crate::position::PositionStatus;
use crate::types::{HealthFactor, MarketId, PositionId, Price, Timestamp};
use rust_decimal::Decimal;

/// Per-position result of a health evaluation.
enum Evaluation {
    Healthy,
    Triggered(HealthFactor, Price),
    /// Market resolved at zero. queued for a worthless close
    Worthless,
    StillPending,
    Cleared(HealthFactor),
    Deferred,
    Closed,
}

impl Ledger {
    /// Push a quote. Every open position in the market is re-evaluated
    /// against the snapshot the quote produced.
    pub fn update_price(
        &self,
        market_id: MarketId,
        price: Decimal,
        timestamp: Timestamp,
    ) -> Result<PriceUpdateResult, LedgerError> {
        let quote = PriceQuote::new(market_id, price, timestamp)?;
        self.apply_quote(quote, "push")
    }

    /// Pull a quote for every unresolved market from `oracle`.
    pub fn poll_oracle(&self, oracle: &dyn PriceOracle) -> Result<PollResult, LedgerError> {
        let mut result = PollResult::default();

        for market in self.markets() {
            if market.is_resolved() {
                continue;
            }
            let quote = match oracle.current_price(market.id) {
                Ok(quote) => quote,
                Err(e) if e.is_unavailable() => {
                    tracing::warn!(market_id = %market.id, oracle = oracle.name(), "no price from oracle");
                    result.unavailable.push(market.id);
                    continue;
                }
                Err(e) => {
                    result.rejected.push((market.id, e));
                    continue;
                }
            };

            match self.apply_quote(quote, oracle.name()) {
                Ok(update) => result.updated.push(update),
                Err(LedgerError::Oracle(e)) => {
                    tracing::warn!(market_id = %market.id, error = %e, "quote rejected");
                    result.rejected.push((market.id, e));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(result)
    }

    fn apply_quote(&self, quote: PriceQuote, source: &str) -> Result<PriceUpdateResult, LedgerError> {
        let market = self.market_snapshot(quote.market_id)?;
        if market.is_resolved() {
            return Err(OracleError::MarketResolved(quote.market_id).into());
        }

        let snapshot = self.prices.apply(quote, self.time(), self.config.oracle.max_future_skew_ms)?;
        tracing::debug!(
            market_id = %quote.market_id,
            price = %quote.price,
            version = snapshot.version,
            "price updated"
        );
        self.emit_event(EventPayload::PriceUpdated(PriceUpdatedEvent {
            market_id: quote.market_id,
            price: quote.price,
            snapshot_version: snapshot.version,
            source: source.to_string(),
        }));

        let health = self.evaluate_market(quote.market_id, &snapshot)?;
        Ok(PriceUpdateResult {
            market_id: quote.market_id,
            snapshot_version: snapshot.version,
            health,
        })
    }

    pub(super) fn evaluate_market(
        &self,
        market_id: MarketId,
        snapshot: &PriceSnapshot,
    ) -> Result<HealthPassResult, LedgerError> {
        let ids: Vec<PositionId> = self
            .collect_positions(|p| p.collateral_market == market_id && p.is_open())
            .into_iter()
            .map(|p| p.id)
            .collect();
        self.evaluate_positions(ids, snapshot)
    }

    /// Health pass over `ids`. Positions that fall below 1.0 become pending
    /// and are queued; pending positions back above 1.0 return to active.
    /// Nothing is liquidated here. A contended position is deferred and
    /// queued, the rest of the pass carries on.
    pub(super) fn evaluate_positions(
        &self,
        ids: impl IntoIterator<Item = PositionId>,
        snapshot: &PriceSnapshot,
    ) -> Result<HealthPassResult, LedgerError> {
        let mut result = HealthPassResult::default();

        for position_id in ids {
            let evaluation = match self.evaluate_position(position_id, snapshot) {
                Ok(evaluation) => evaluation,
                Err(e @ LedgerError::ConcurrentModification(_)) => {
                    // the liquidation pass re-checks it against fresh state
                    tracing::warn!(%position_id, error = %e, "health check contended");
                    self.enqueue_liquidation(position_id);
                    result.deferred.push(position_id);
                    result.evaluated += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            match evaluation {
                Evaluation::Closed => continue,
                Evaluation::Healthy => {}
                Evaluation::Triggered(..) | Evaluation::Worthless => {
                    self.enqueue_liquidation(position_id);
                    result.triggered.push(position_id);
                }
                Evaluation::StillPending => self.enqueue_liquidation(position_id),
                Evaluation::Cleared(_) => result.cleared.push(position_id),
                Evaluation::Deferred => result.deferred.push(position_id),
            }
            result.evaluated += 1;
        }

        if !result.triggered.is_empty() || !result.deferred.is_empty() {
            tracing::info!(
                evaluated = result.evaluated,
                triggered = result.triggered.len(),
                cleared = result.cleared.len(),
                deferred = result.deferred.len(),
                version = snapshot.version,
                "health pass"
            );
        }
        Ok(result)
    }

    fn evaluate_position(&self, position_id: PositionId, snapshot: &PriceSnapshot) -> Result<Evaluation, LedgerError> {
        let now = self.time();
        self.commit(
            position_id,
            |position| {
                if !position.is_open() {
                    return Ok(Outcome::Unchanged(Evaluation::Closed));
                }
                if snapshot.is_worthless(position.collateral_market) {
                    if position.status == PositionStatus::LiquidationPending {
                        return Ok(Outcome::Unchanged(Evaluation::StillPending));
                    }
                    let mut next = position.clone();
                    next.status = PositionStatus::LiquidationPending;
                    next.pending_since = Some(now);
                    return Ok(Outcome::Updated(next, Evaluation::Worthless));
                }
                let price = match self.price_in(snapshot, position.collateral_market) {
                    Ok(price) => price,
                    Err(e) if e.is_price_unavailable() => return Ok(Outcome::Unchanged(Evaluation::Deferred)),
                    Err(e) => return Err(e),
                };
                let health = health_factor(position.collateral, price, position.max_ltv, position.debt());

                match (position.status, health.is_liquidatable()) {
                    (PositionStatus::Active, true) => {
                        let mut next = position.clone();
                        next.status = PositionStatus::LiquidationPending;
                        next.pending_since = Some(now);
                        Ok(Outcome::Updated(next, Evaluation::Triggered(health, price)))
                    }
                    (PositionStatus::LiquidationPending, true) => Ok(Outcome::Unchanged(Evaluation::StillPending)),
                    (PositionStatus::LiquidationPending, false) => {
                        let mut next = position.clone();
                        next.status = PositionStatus::Active;
                        next.pending_since = None;
                        Ok(Outcome::Updated(next, Evaluation::Cleared(health)))
                    }
                    _ => Ok(Outcome::Unchanged(Evaluation::Healthy)),
                }
            },
            |_, _, evaluation| match evaluation {
                Evaluation::Triggered(health, price) => {
                    tracing::warn!(%position_id, health = %health, price = %price, "liquidation triggered");
                    self.emit_event(EventPayload::LiquidationTriggered(LiquidationTriggeredEvent {
                        position_id,
                        health_factor: *health,
                        price: *price,
                    }));
                }
                Evaluation::Worthless => {
                    tracing::warn!(%position_id, "collateral market resolved worthless");
                }
                Evaluation::Cleared(health) => {
                    tracing::info!(%position_id, health = %health, "liquidation cleared");
                    self.emit_event(EventPayload::LiquidationCleared(LiquidationClearedEvent {
                        position_id,
                        health_factor: *health,
                    }));
                }
                _ => {}
            },
        )
    }

    /// Health of one position at the current snapshot.
    pub fn position_health(&self, position_id: PositionId) -> Result<PositionHealth, LedgerError> {
        let position = self.position(position_id).ok_or(LedgerError::PositionNotFound(position_id))?;
        let snapshot = self.prices.snapshot();
        let price = self.price_in(&snapshot, position.collateral_market)?;
        Ok(position_health(&position, price, &self.config.health))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::BorrowRequest;
    use crate::market::Market;
    use crate::offer::OfferRequest;
    use crate::oracle::MockOracle;
    use crate::types::{AccountId, Apy, Bps, Quote, Units};
    use rust_decimal_macros::dec;

    fn setup() -> (Ledger, PositionId) {
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        ledger
            .add_market(Market::new(MarketId(1), "Election", Timestamp::from_millis(1_000_000_000)))
            .unwrap();
        ledger.update_price(MarketId(1), dec!(1.00), ledger.time()).unwrap();
        ledger
            .submit_offer(OfferRequest {
                lender: AccountId(1),
                market_id: MarketId(1),
                principal: Quote::new(dec!(10000)),
                apy: Apy::from_percent(dec!(5)).unwrap(),
                max_duration_days: 30,
                max_ltv: Bps::new(7500),
            })
            .unwrap();
        let result = ledger
            .borrow(BorrowRequest {
                borrower: AccountId(2),
                market_id: MarketId(1),
                collateral: Units::new(dec!(15000)),
                amount: Quote::new(dec!(10000)),
                duration_days: 30,
            })
            .unwrap();
        (ledger, result.positions[0].id)
    }

    #[test]
    fn older_quote_rejected() {
        let (ledger, _) = setup();
        ledger.advance_time(1_000);
        ledger.update_price(MarketId(1), dec!(0.9), ledger.time()).unwrap();

        let err = ledger
            .update_price(MarketId(1), dec!(0.5), Timestamp::from_millis(500))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Oracle(OracleError::NonMonotonic { .. })));
        assert_eq!(ledger.price_snapshot().quote(MarketId(1)).unwrap().price.value(), dec!(0.9));
    }

    #[test]
    fn future_quote_cannot_freeze_prices() {
        let (ledger, _) = setup();
        let skew = ledger.config().oracle.max_future_skew_ms;
        let far = ledger.time().plus_millis(skew + 1);

        let err = ledger.update_price(MarketId(1), dec!(0.5), far).unwrap_err();
        assert!(matches!(err, LedgerError::Oracle(OracleError::FromFuture { .. })));

        // the rejected quote left no mark, honest quotes still land
        ledger.advance_time(1_000);
        ledger.update_price(MarketId(1), dec!(0.9), ledger.time()).unwrap();
        assert_eq!(ledger.price_snapshot().quote(MarketId(1)).unwrap().price.value(), dec!(0.9));
    }

    #[test]
    fn zero_price_quote_rejected() {
        let (ledger, _) = setup();
        let err = ledger.update_price(MarketId(1), Decimal::ZERO, ledger.time()).unwrap_err();
        assert!(matches!(err, LedgerError::Oracle(OracleError::InvalidPrice { .. })));
    }

    #[test]
    fn recovery_clears_pending() {
        let (ledger, position_id) = setup();

        let update = ledger.update_price(MarketId(1), dec!(0.85), ledger.time()).unwrap();
        assert_eq!(update.health.triggered, vec![position_id]);

        let update = ledger.update_price(MarketId(1), dec!(0.95), ledger.time()).unwrap();
        assert_eq!(update.health.cleared, vec![position_id]);
        assert_eq!(ledger.position(position_id).unwrap().status, PositionStatus::Active);
    }

    #[test]
    fn poll_reports_missing_markets() {
        let (ledger, _) = setup();
        ledger
            .add_market(Market::new(MarketId(2), "Rates", Timestamp::from_millis(1_000_000_000)))
            .unwrap();
        let oracle = MockOracle::new("test");
        oracle.set_price(MarketId(1), dec!(0.7), ledger.time()).unwrap();

        let poll = ledger.poll_oracle(&oracle).unwrap();
        assert_eq!(poll.updated.len(), 1);
        assert_eq!(poll.unavailable, vec![MarketId(2)]);
        assert_eq!(poll.updated[0].health.triggered.len(), 1);
    }

    #[test]
    fn stale_price_defers_evaluation() {
        let (ledger, position_id) = setup();
        ledger.advance_time(ledger.config().oracle.max_staleness_ms + 1);

        let err = ledger.position_health(position_id).unwrap_err();
        assert!(err.is_price_unavailable());
    }
}
