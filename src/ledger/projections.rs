//! Read-side projections for dashboards and the marketplace.

use super::core::{lock, Ledger};
use super::positions::assess_fills;
use super::results::{BorrowRequest, LedgerError};
use crate::account::LenderAccount;
use crate::health::{health_factor, liquidation_price, HealthStatus};
use crate::interest::projected_interest;
use crate::market::Market;
use crate::offer::{sort_offers, Offer, OfferFill, OfferFilter, OfferSort};
use crate::position::PositionStatus;
use crate::types::{AccountId, Apy, HealthFactor, MarketId, PositionId, Price, Quote, Timestamp, Units};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub position_id: PositionId,
    pub market_id: MarketId,
    /// `None` while no usable price exists
    pub health_factor: Option<HealthFactor>,
    pub health_status: Option<HealthStatus>,
    pub liquidation_price: Option<Price>,
    pub apy: Apy,
    pub principal: Quote,
    pub accrued_interest: Quote,
    pub debt: Quote,
    pub collateral: Units,
    pub status: PositionStatus,
    pub matures_at: Timestamp,
    pub overdue: bool,
}

/// What a borrow request would get right now, without touching the book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowQuote {
    pub market_id: MarketId,
    pub amount: Quote,
    pub fills: Vec<OfferFill>,
    /// Principal-weighted APY across the fills
    pub blended_apy: Decimal,
    /// Weakest position the request would open
    pub health_factor: HealthFactor,
    pub health_status: HealthStatus,
    /// Collateral needed for every fill to open at health 1.0
    pub required_collateral: Units,
    /// Simple interest over the full term
    pub projected_interest: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformStats {
    /// Open collateral at current prices. unpriced markets are left out
    pub total_value_locked: Quote,
    pub total_borrowed: Quote,
    pub active_loans: usize,
    /// Principal-weighted APY of open positions
    pub average_apy: Decimal,
    /// Lent out / (lent out + still offered)
    pub utilization_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketplaceStats {
    pub open_liquidity: Quote,
    pub active_offers: usize,
    pub average_offer_apy: Decimal,
    pub average_utilization: Decimal,
}

impl Ledger {
    pub fn list_offers(&self, filter: &OfferFilter, sort: OfferSort) -> Vec<Offer> {
        let markets: HashMap<MarketId, Market> = self.markets().into_iter().map(|m| (m.id, m)).collect();

        let mut offers: Vec<Offer> = lock(&self.book)
            .iter()
            .filter(|o| filter.market_id.map_or(true, |m| o.market_id == m))
            .filter(|o| filter.lender.map_or(true, |l| o.lender == l))
            .filter(|o| !filter.fillable_only || o.status.is_fillable())
            .filter(|o| match &filter.search {
                Some(term) => markets.get(&o.market_id).map_or(false, |m| m.matches_search(term)),
                None => true,
            })
            .cloned()
            .collect();

        sort_offers(&mut offers, sort);
        offers
    }

    pub fn position_summary(&self, position_id: PositionId) -> Result<PositionSummary, LedgerError> {
        let position = self.position(position_id).ok_or(LedgerError::PositionNotFound(position_id))?;
        let snapshot = self.prices.snapshot();
        let debt = position.debt();

        let health = self
            .price_in(&snapshot, position.collateral_market)
            .ok()
            .filter(|_| position.is_open())
            .map(|price| health_factor(position.collateral, price, position.max_ltv, debt));

        Ok(PositionSummary {
            position_id,
            market_id: position.collateral_market,
            health_factor: health,
            health_status: health.map(|h| HealthStatus::classify(h, &self.config.health)),
            liquidation_price: liquidation_price(position.collateral, position.max_ltv, debt),
            apy: position.apy,
            principal: position.principal,
            accrued_interest: position.accrued_interest,
            debt,
            collateral: position.collateral,
            status: position.status,
            matures_at: position.matures_at,
            overdue: position.is_overdue(self.time()),
        })
    }

    /// Preview a borrow: the fills it would take, their blended rate and the
    /// health it would open at. Fails the way `borrow` would.
    pub fn quote_borrow(&self, request: &BorrowRequest) -> Result<BorrowQuote, LedgerError> {
        self.validate_amount("borrow amount", request.amount)?;
        self.validate_duration(request.duration_days)?;
        self.validate_collateral(request.collateral)?;

        let market = self.market_snapshot(request.market_id)?;
        if !market.accepts_new_loans(self.time()) {
            return Err(LedgerError::MarketNotOpen(request.market_id));
        }
        let snapshot = self.prices.snapshot();
        let price = self.price_in(&snapshot, request.market_id)?;

        let fills = lock(&self.book).plan_fills(
            request.market_id,
            request.duration_days,
            request.amount,
            request.borrower,
        )?;
        let assessment = assess_fills(request.collateral, price, &fills);

        let weighted: Decimal = fills.iter().map(|f| f.apy.value() * f.filled_amount.value()).sum();
        let interest: Quote = fills
            .iter()
            .map(|f| projected_interest(f.filled_amount, f.apy, request.duration_days))
            .sum();

        Ok(BorrowQuote {
            market_id: request.market_id,
            amount: request.amount,
            blended_apy: ratio(weighted, request.amount.value()),
            health_factor: assessment.weakest,
            health_status: HealthStatus::classify(assessment.weakest, &self.config.health),
            required_collateral: assessment.required,
            projected_interest: interest,
            fills,
        })
    }

    pub fn platform_stats(&self) -> PlatformStats {
        let snapshot = self.prices.snapshot();
        let open = self.collect_positions(|p| p.is_open());

        let mut tvl = Quote::zero();
        let mut borrowed = Quote::zero();
        let mut principal = Quote::zero();
        let mut weighted_apy = Decimal::ZERO;
        for position in &open {
            if let Ok(price) = self.price_in(&snapshot, position.collateral_market) {
                tvl = tvl.add(position.collateral.value_at(price));
            }
            borrowed = borrowed.add(position.debt());
            principal = principal.add(position.principal);
            weighted_apy += position.apy.value() * position.principal.value();
        }

        let offered: Quote = lock(&self.book)
            .iter()
            .filter(|o| o.status.is_fillable())
            .map(|o| o.principal)
            .sum();

        PlatformStats {
            total_value_locked: tvl.round_down(),
            total_borrowed: borrowed,
            active_loans: open.len(),
            average_apy: ratio(weighted_apy, principal.value()),
            utilization_rate: ratio(principal.value(), principal.add(offered).value()),
        }
    }

    pub fn marketplace_stats(&self) -> MarketplaceStats {
        let book = lock(&self.book);
        let active: Vec<&Offer> = book.iter().filter(|o| o.status.is_fillable()).collect();
        let count = Decimal::from(active.len() as u64);

        MarketplaceStats {
            open_liquidity: active.iter().map(|o| o.principal).sum(),
            active_offers: active.len(),
            average_offer_apy: ratio(active.iter().map(|o| o.apy.value()).sum(), count),
            average_utilization: ratio(active.iter().map(|o| o.utilization()).sum(), count),
        }
    }

    pub fn lender_account(&self, lender: AccountId) -> Option<LenderAccount> {
        lock(&self.lenders).get(&lender).cloned()
    }
}

fn ratio(numerator: Decimal, denominator: Decimal) -> Decimal {
    if denominator.is_zero() {
        Decimal::ZERO
    } else {
        numerator / denominator
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::ledger::BorrowRequest;
    use crate::market::Market;
    use crate::offer::OfferRequest;
    use crate::types::{Bps, Timestamp};
    use rust_decimal_macros::dec;

    fn setup() -> Ledger {
        let ledger = Ledger::new(LedgerConfig::default()).unwrap();
        ledger
            .add_market(Market::new(MarketId(1), "Fed Rate Decision", Timestamp::from_millis(1_000_000_000)))
            .unwrap();
        ledger
            .add_market(Market::new(MarketId(2), "Election Winner", Timestamp::from_millis(1_000_000_000)))
            .unwrap();
        ledger.update_price(MarketId(1), dec!(1.00), ledger.time()).unwrap();
        for (lender, market, principal, apy) in [
            (1, 1, dec!(10000), dec!(4)),
            (2, 1, dec!(10000), dec!(8)),
            (3, 2, dec!(5000), dec!(6)),
        ] {
            ledger
                .submit_offer(OfferRequest {
                    lender: AccountId(lender),
                    market_id: MarketId(market),
                    principal: Quote::new(principal),
                    apy: Apy::from_percent(apy).unwrap(),
                    max_duration_days: 30,
                    max_ltv: Bps::new(7500),
                })
                .unwrap();
        }
        ledger
    }

    fn borrow_15000(ledger: &Ledger) -> PositionId {
        ledger
            .borrow(BorrowRequest {
                borrower: AccountId(9),
                market_id: MarketId(1),
                collateral: Units::new(dec!(30000)),
                amount: Quote::new(dec!(15000)),
                duration_days: 30,
            })
            .unwrap()
            .positions[0]
            .id
    }

    #[test]
    fn listing_filters_and_sorts() {
        let ledger = setup();

        let all = ledger.list_offers(&OfferFilter::default(), OfferSort::ApyAsc);
        let apys: Vec<Decimal> = all.iter().map(|o| o.apy.as_percent()).collect();
        assert_eq!(apys, vec![dec!(4), dec!(6), dec!(8)]);

        let filter = OfferFilter {
            search: Some("ELECTION".to_string()),
            ..Default::default()
        };
        let found = ledger.list_offers(&filter, OfferSort::default());
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].market_id, MarketId(2));
    }

    #[test]
    fn borrow_quote_previews_without_filling() {
        let ledger = setup();
        let request = BorrowRequest {
            borrower: AccountId(9),
            market_id: MarketId(1),
            collateral: Units::new(dec!(30000)),
            amount: Quote::new(dec!(15000)),
            duration_days: 30,
        };

        let quote = ledger.quote_borrow(&request).unwrap();
        assert_eq!(quote.fills.len(), 2);
        // 10000 @ 4% and 5000 @ 8%
        assert_eq!(quote.blended_apy.round_dp(6), dec!(0.053333));
        // 20000 * 0.75 / 10000 on the cheaper leg, 10000 * 0.75 / 5000 on the other
        assert_eq!(quote.health_factor.value(), dec!(1.5));
        assert_eq!(quote.health_status, HealthStatus::Healthy);
        // each leg rounds its requirement up
        assert_eq!(quote.required_collateral, Units::new(dec!(20000.000001)));
        // 10000 * 0.04 * 30/365 + 5000 * 0.08 * 30/365
        assert_eq!(quote.projected_interest, Quote::new(dec!(65.753424)));

        // nothing was filled
        assert!(ledger.positions().is_empty());
        assert_eq!(ledger.marketplace_stats().open_liquidity, Quote::new(dec!(25000)));

        // the preview agrees with the real borrow
        let result = ledger.borrow(request).unwrap();
        assert_eq!(result.total_borrowed(), quote.amount);
    }

    #[test]
    fn borrow_quote_reports_missing_price() {
        let ledger = setup();
        let request = BorrowRequest {
            borrower: AccountId(9),
            market_id: MarketId(2),
            collateral: Units::new(dec!(10000)),
            amount: Quote::new(dec!(1000)),
            duration_days: 30,
        };
        let err = ledger.quote_borrow(&request).unwrap_err();
        assert!(err.is_price_unavailable());
    }

    #[test]
    fn platform_stats_weight_by_principal() {
        let ledger = setup();
        borrow_15000(&ledger);

        let stats = ledger.platform_stats();
        assert_eq!(stats.active_loans, 2);
        assert_eq!(stats.total_borrowed, Quote::new(dec!(15000)));
        // 10000 @ 4% and 5000 @ 8%
        assert_eq!(stats.average_apy.round_dp(6), dec!(0.053333));
        // collateral split 2:1 across the two positions, all priced at $1
        assert_eq!(stats.total_value_locked, Quote::new(dec!(30000)));
        // 15000 lent, 5000 + 5000 still offered
        assert_eq!(stats.utilization_rate, dec!(0.6));
    }

    #[test]
    fn marketplace_stats_cover_fillable_offers() {
        let ledger = setup();
        borrow_15000(&ledger);

        let stats = ledger.marketplace_stats();
        assert_eq!(stats.active_offers, 2);
        assert_eq!(stats.open_liquidity, Quote::new(dec!(10000)));
        assert_eq!(stats.average_offer_apy, dec!(0.07));
        assert_eq!(stats.average_utilization, dec!(0.25));
    }

    #[test]
    fn summary_reports_health() {
        let ledger = setup();
        let position_id = borrow_15000(&ledger);

        let summary = ledger.position_summary(position_id).unwrap();
        // 20000 shares backing 10000 at 75%
        assert_eq!(summary.health_factor.unwrap().value(), dec!(1.5));
        assert_eq!(summary.health_status, Some(HealthStatus::Healthy));
        assert!(!summary.overdue);

        ledger.advance_time(ledger.config().oracle.max_staleness_ms + 1);
        let summary = ledger.position_summary(position_id).unwrap();
        assert!(summary.health_factor.is_none());
    }
}
