//! Solvency invariant tests.
//!
//! These tests verify the bookkeeping invariants that keep lenders whole:
//! every unit of principal, collateral and debt is accounted for no matter
//! how prices move.

use lending_core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;

const HOUR_MS: i64 = 3_600_000;

fn ledger(config: LedgerConfig) -> Ledger {
    let ledger = Ledger::new(config).unwrap();
    ledger
        .add_market(Market::new(MarketId(1), "Fed Rate Decision", Timestamp::from_millis(365 * DAY_MS)))
        .unwrap();
    ledger.update_price(MarketId(1), dec!(1.00), ledger.time()).unwrap();
    ledger
}

fn offer(ledger: &Ledger, lender: u64, principal: Decimal, apy_percent: Decimal) -> OfferId {
    ledger
        .submit_offer(OfferRequest {
            lender: AccountId(lender),
            market_id: MarketId(1),
            principal: Quote::new(principal),
            apy: Apy::from_percent(apy_percent).unwrap(),
            max_duration_days: 30,
            max_ltv: Bps::new(7500),
        })
        .unwrap()
}

fn borrow_request(borrower: u64, collateral: Decimal, amount: Decimal) -> BorrowRequest {
    BorrowRequest {
        borrower: AccountId(borrower),
        market_id: MarketId(1),
        collateral: Units::new(collateral),
        amount: Quote::new(amount),
        duration_days: 30,
    }
}

/// Each lender's outstanding principal equals the principal still owed on
/// their open positions.
fn assert_lender_books_balance(ledger: &Ledger) {
    let mut owed: HashMap<AccountId, Quote> = HashMap::new();
    for position in ledger.open_positions() {
        let entry = owed.entry(position.lender).or_insert_with(Quote::zero);
        *entry = entry.add(position.principal);
    }

    for lender in 1..=3u64 {
        let id = AccountId(lender);
        let account = ledger.lender_account(id).unwrap();
        let expected = owed.get(&id).copied().unwrap_or_else(Quote::zero);
        assert_eq!(account.principal_outstanding, expected, "lender {lender} out of balance");
    }
}

#[derive(Debug, Clone)]
enum Step {
    Borrow { collateral: i64, amount: i64 },
    Price(i64),
    Tick(i64),
    Repay { index: usize, fraction: u32 },
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        (1_000i64..20_000i64, 100i64..8_000i64).prop_map(|(collateral, amount)| Step::Borrow { collateral, amount }),
        (20i64..=100i64).prop_map(Step::Price),
        (1i64..=12i64).prop_map(Step::Tick),
        (0usize..20, 1u32..=100u32).prop_map(|(index, fraction)| Step::Repay { index, fraction }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Random borrows, price moves, ticks and repayments never break the
    /// lender books, over-fill an offer or leave a liquidatable position
    /// marked active.
    #[test]
    fn books_balance_under_random_activity(
        steps in proptest::collection::vec(step_strategy(), 1..40),
        partial in any::<bool>(),
    ) {
        let mut config = LedgerConfig::default();
        if partial {
            config.liquidation.mode = LiquidationMode::Partial;
        }
        let ledger = ledger(config);
        let offers = [
            offer(&ledger, 1, dec!(30000), dec!(4)),
            offer(&ledger, 2, dec!(30000), dec!(6)),
            offer(&ledger, 3, dec!(30000), dec!(9)),
        ];
        let mut price = dec!(1.00);
        let mut opened: Vec<PositionId> = Vec::new();

        for (i, step) in steps.into_iter().enumerate() {
            match step {
                Step::Borrow { collateral, amount } => {
                    let request = borrow_request(100 + i as u64, Decimal::from(collateral), Decimal::from(amount));
                    if let Ok(result) = ledger.borrow(request) {
                        opened.extend(result.positions.iter().map(|p| p.id));
                    }
                }
                Step::Price(cents) => {
                    price = Decimal::new(cents, 2);
                    ledger.update_price(MarketId(1), price, ledger.time()).unwrap();
                    ledger.process_liquidations().unwrap();
                }
                Step::Tick(hours) => {
                    ledger.advance_time(hours * HOUR_MS);
                    ledger.update_price(MarketId(1), price, ledger.time()).unwrap();
                    ledger.run_tick().unwrap();
                }
                Step::Repay { index, fraction } => {
                    if opened.is_empty() {
                        continue;
                    }
                    let id = opened[index % opened.len()];
                    let position = ledger.position(id).unwrap();
                    if !position.is_open() {
                        continue;
                    }
                    let amount = position.debt().mul(Decimal::from(fraction) / dec!(100)).round_down();
                    if amount.is_positive() {
                        ledger.repay(id, amount).unwrap();
                    }
                }
            }
            assert_lender_books_balance(&ledger);
        }

        // offers never lend more than they held
        for offer_id in offers {
            let offer = ledger.offer(offer_id).unwrap();
            let lent: Quote = ledger
                .positions()
                .iter()
                .filter(|p| p.offer_id == offer_id)
                .map(|p| p.principal.add(p.principal_repaid))
                .sum();
            prop_assert!(!offer.principal.is_negative());
            prop_assert!(lent <= offer.original_principal);
        }

        // after a final pass nothing liquidatable is left untouched
        ledger.run_tick().unwrap();
        for position in ledger.open_positions() {
            if let Ok(health) = ledger.position_health(position.id) {
                if health.health_factor.is_liquidatable() {
                    prop_assert_eq!(position.status, PositionStatus::LiquidationPending);
                }
            }
        }
    }
}

#[test]
fn liquidation_splits_value_between_lender_and_borrower() {
    let ledger = ledger(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));
    offer(&ledger, 2, dec!(1), dec!(5));
    offer(&ledger, 3, dec!(1), dec!(5));

    let position = ledger.borrow(borrow_request(100, dec!(15000), dec!(10000))).unwrap().positions[0].clone();
    ledger.update_price(MarketId(1), dec!(0.88), ledger.time()).unwrap();
    let pass = ledger.process_liquidations().unwrap();
    assert_eq!(pass.liquidated.len(), 1);

    let liquidation = &pass.liquidated[0];
    let event = &liquidation.event;
    // seized + released is exactly the locked collateral
    assert_eq!(event.collateral_seized.add(liquidation.collateral_released), position.collateral);
    assert_eq!(event.debt_covered, Quote::new(dec!(10500)));
    assert_eq!(event.penalty_amount, Quote::new(dec!(500)));
    assert!(event.unrecovered_debt.is_zero());

    let lender = ledger.lender_account(AccountId(1)).unwrap();
    assert_eq!(lender.liquidation_proceeds, Quote::new(dec!(10000)));
    assert_eq!(lender.penalties_earned, Quote::new(dec!(500)));
    assert!(lender.principal_outstanding.is_zero());
    assert_lender_books_balance(&ledger);
}

#[test]
fn shortfall_is_attributed_to_the_lender() {
    let ledger = ledger(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));
    offer(&ledger, 2, dec!(1), dec!(5));
    offer(&ledger, 3, dec!(1), dec!(5));

    ledger.borrow(borrow_request(100, dec!(15000), dec!(10000))).unwrap();
    ledger.update_price(MarketId(1), dec!(0.60), ledger.time()).unwrap();
    ledger.process_liquidations().unwrap();

    let lender = ledger.lender_account(AccountId(1)).unwrap();
    assert_eq!(lender.liquidation_proceeds, Quote::new(dec!(9000)));
    assert_eq!(lender.unrecovered_debt, Quote::new(dec!(1000)));
    assert!(lender.penalties_earned.is_zero());
    assert_eq!(lender.net_earnings(), Quote::new(dec!(-1000)));

    let records = ledger.liquidation_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].unrecovered_debt, Quote::new(dec!(1000)));
}

#[test]
fn worthless_resolution_writes_off_all_debt() {
    let ledger = ledger(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));
    offer(&ledger, 2, dec!(10000), dec!(8));
    offer(&ledger, 3, dec!(1), dec!(5));

    ledger.borrow(borrow_request(100, dec!(20000), dec!(6000))).unwrap();
    ledger.borrow(borrow_request(101, dec!(30000), dec!(9000))).unwrap();
    ledger.advance_time(5 * HOUR_MS);
    ledger.run_tick().unwrap();

    let debt_before: Quote = ledger.open_positions().iter().map(|p| p.debt()).sum();
    let resolution = ledger.resolve_market(MarketId(1), Decimal::ZERO).unwrap();

    let written_off: Quote = resolution.closed.iter().map(|c| c.event.unrecovered_debt).sum();
    assert_eq!(written_off, debt_before);
    assert!(ledger.open_positions().is_empty());
    for position in ledger.positions() {
        assert_eq!(position.status, PositionStatus::Liquidated);
        assert!(position.collateral.is_zero());
    }
    assert_lender_books_balance(&ledger);
}

#[test]
fn failed_borrow_leaves_book_untouched() {
    let ledger = ledger(LedgerConfig::default());
    let cheap = offer(&ledger, 1, dec!(4000), dec!(4));
    let dear = offer(&ledger, 2, dec!(6000), dec!(6));
    offer(&ledger, 3, dec!(1), dec!(9));

    // enough liquidity but not enough collateral for the whole amount
    let err = ledger.borrow(borrow_request(100, dec!(9000), dec!(9000))).unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientCollateral { .. }));

    for offer_id in [cheap, dear] {
        let offer = ledger.offer(offer_id).unwrap();
        assert_eq!(offer.status, OfferStatus::Open);
        assert!(offer.filled().is_zero());
    }
    assert!(ledger.positions().is_empty());
    assert_lender_books_balance(&ledger);
}

#[test]
fn full_repayment_returns_principal_and_interest() {
    let ledger = ledger(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));
    offer(&ledger, 2, dec!(1), dec!(5));
    offer(&ledger, 3, dec!(1), dec!(5));

    let position = ledger.borrow(borrow_request(100, dec!(20000), dec!(10000))).unwrap().positions[0].clone();
    ledger.advance_time(HOUR_MS);
    ledger.run_tick().unwrap();

    let debt = ledger.position(position.id).unwrap().debt();
    assert_eq!(debt, Quote::new(dec!(10000.057077)));

    let repaid = ledger.repay(position.id, debt).unwrap();
    assert_eq!(repaid.status, PositionStatus::Repaid);
    assert_eq!(repaid.collateral_released, Units::new(dec!(20000)));

    let lender = ledger.lender_account(AccountId(1)).unwrap();
    assert_eq!(lender.principal_repaid, Quote::new(dec!(10000)));
    assert_eq!(lender.interest_repaid, Quote::new(dec!(0.057077)));
    assert_eq!(lender.total_received(), debt);
    assert_lender_books_balance(&ledger);
}
