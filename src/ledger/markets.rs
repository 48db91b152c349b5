//! Market registration and resolution.

use super::core::{lock, read, write, Ledger, Outcome};
use super::results::{HealthPassResult, LedgerError, LiquidationResult, ResolutionResult, ValidationError};
use crate::events::{EventPayload, MarketCreatedEvent, MarketResolvedEvent};
use crate::liquidation::plan_worthless;
use crate::market::{Market, MarketError};
use crate::position::apply_liquidation;
use crate::types::{MarketId, PositionId};
use rust_decimal::Decimal;

impl Ledger {
    pub fn add_market(&self, market: Market) -> Result<MarketId, LedgerError> {
        market.validate()?;
        let market_id = market.id;

        {
            let mut markets = write(&self.markets);
            if markets.contains_key(&market_id) {
                return Err(MarketError::Duplicate(market_id).into());
            }
            markets.insert(market_id, market.clone());
        }

        tracing::info!(%market_id, name = %market.name, "market added");
        self.emit_event(EventPayload::MarketCreated(MarketCreatedEvent {
            market_id,
            name: market.name,
            resolution_deadline: market.resolution_deadline,
        }));
        Ok(market_id)
    }

    pub fn market(&self, market_id: MarketId) -> Option<Market> {
        read(&self.markets).get(&market_id).cloned()
    }

    pub fn markets(&self) -> Vec<Market> {
        let mut markets: Vec<Market> = read(&self.markets).values().cloned().collect();
        markets.sort_by_key(|m| m.id);
        markets
    }

    /// Fix a market's outcome price. At zero every open position in it is
    /// force-closed with its whole debt unrecovered; above zero positions are
    /// re-evaluated at the final price, which no oracle quote can override.
    pub fn resolve_market(&self, market_id: MarketId, price: Decimal) -> Result<ResolutionResult, LedgerError> {
        let now = self.time();

        // borrows fill under the book lock; holding it here means no position
        // can open in this market between the status flip and the sweep
        let book = lock(&self.book);
        let market = {
            let mut markets = write(&self.markets);
            let market = markets
                .get_mut(&market_id)
                .ok_or(LedgerError::Validation(ValidationError::UnknownMarket(market_id)))?;
            market.resolve(price, now)?;
            market.clone()
        };
        let snapshot = self.prices.settle(market_id, price);
        let open = self.collect_positions(|p| p.collateral_market == market_id && p.is_open());
        drop(book);

        let mut closed = Vec::new();
        let mut health = HealthPassResult::default();

        if market.is_worthless() {
            for position in &open {
                match self.force_close(position.id) {
                    Ok(Some(result)) => closed.push(result),
                    Ok(None) => {}
                    Err(e @ LedgerError::ConcurrentModification(_)) => {
                        // the liquidation pass closes it against the settled snapshot
                        tracing::warn!(position_id = %position.id, error = %e, "worthless close contended");
                        self.enqueue_liquidation(position.id);
                    }
                    Err(e) => return Err(e),
                }
            }
            tracing::warn!(%market_id, closed = closed.len(), "market resolved worthless");
        } else {
            health = self.evaluate_positions(open.iter().map(|p| p.id), &snapshot)?;
            let settlement = market.settlement_price().map(|p| p.value()).unwrap_or(price);
            tracing::info!(%market_id, price = %settlement, evaluated = health.evaluated, "market resolved");
        }

        self.emit_event(EventPayload::MarketResolved(MarketResolvedEvent {
            market_id,
            resolved_price: price,
            positions_closed: closed.len(),
        }));

        Ok(ResolutionResult {
            market_id,
            resolved_price: price,
            closed,
            health,
        })
    }

    fn force_close(&self, position_id: PositionId) -> Result<Option<LiquidationResult>, LedgerError> {
        let now = self.time();
        self.commit(
            position_id,
            |position| {
                if !position.is_open() {
                    return Ok(Outcome::Unchanged(None));
                }
                let plan = plan_worthless(position, now);
                let next = apply_liquidation(position, &plan.event)?;
                Ok(Outcome::Updated(
                    next,
                    Some(LiquidationResult {
                        position_id,
                        borrower: position.borrower,
                        lender: position.lender,
                        event: plan.event,
                        collateral_released: plan.collateral_released,
                    }),
                ))
            },
            |before, after, result| {
                if let Some(result) = result {
                    self.record_liquidation(before, after, result);
                }
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::BorrowRequest;
    use crate::offer::OfferRequest;
    use crate::oracle::OracleError;
    use crate::position::PositionStatus;
    use crate::types::{AccountId, Apy, Bps, Quote, Timestamp, Units};
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
                amount: Quote::new(dec!(6000)),
                duration_days: 30,
            })
            .unwrap();
        (ledger, result.positions[0].id)
    }

    #[test]
    fn duplicate_market_rejected() {
        let (ledger, _) = setup();
        let err = ledger
            .add_market(Market::new(MarketId(1), "Again", Timestamp::from_millis(1)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Market(MarketError::Duplicate(_))));
    }

    #[test]
    fn worthless_resolution_force_closes() {
        let (ledger, position_id) = setup();
        let resolution = ledger.resolve_market(MarketId(1), Decimal::ZERO).unwrap();

        assert_eq!(resolution.closed.len(), 1);
        let event = &resolution.closed[0].event;
        assert!(event.debt_covered.is_zero());
        assert_eq!(event.unrecovered_debt, Quote::new(dec!(6000)));
        assert_eq!(event.collateral_seized, Units::new(dec!(15000)));

        let position = ledger.position(position_id).unwrap();
        assert_eq!(position.status, PositionStatus::Liquidated);
        assert_eq!(ledger.lender_account(AccountId(1)).unwrap().unrecovered_debt, Quote::new(dec!(6000)));
    }

    #[test]
    fn settled_price_overrides_quotes() {
        let (ledger, position_id) = setup();
        // 15000 * 0.5 * 0.75 / 6000 = 0.9375
        let resolution = ledger.resolve_market(MarketId(1), dec!(0.5)).unwrap();
        assert_eq!(resolution.health.triggered, vec![position_id]);

        let err = ledger.update_price(MarketId(1), dec!(0.9), ledger.time()).unwrap_err();
        assert!(matches!(err, LedgerError::Oracle(OracleError::MarketResolved(_))));

        // the final price never goes stale
        ledger.advance_time(30 * 24 * 60 * 60 * 1000);
        let pass = ledger.process_liquidations().unwrap();
        assert_eq!(pass.liquidated.len(), 1);
    }

    #[test]
    fn resolved_market_takes_no_new_offers() {
        let (ledger, _) = setup();
        ledger.resolve_market(MarketId(1), dec!(1)).unwrap();

        let err = ledger.resolve_market(MarketId(1), dec!(1)).unwrap_err();
        assert!(matches!(err, LedgerError::Market(MarketError::AlreadyResolved(_))));

        let err = ledger
            .submit_offer(OfferRequest {
                lender: AccountId(3),
                market_id: MarketId(1),
                principal: Quote::new(dec!(100)),
                apy: Apy::from_percent(dec!(5)).unwrap(),
                max_duration_days: 30,
                max_ltv: Bps::new(7500),
            })
            .unwrap_err();
        assert!(matches!(err, LedgerError::MarketNotOpen(_)));
    }
}
