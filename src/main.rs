//! Prediction Market Lending Simulation.
//!
//! Walks the ledger through its full lifecycle: offers and matching, health
//! checks, interest ticks, repayment, liquidation and market resolution.
//! Set `RUST_LOG=lending_core=debug` to see the ledger's own trace output.

use lending_core::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::thread;

const HOUR_MS: i64 = 60 * 60 * 1000;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("warn".parse().unwrap()),
        )
        .init();

    println!("Prediction Market Lending Simulation");
    println!("Peer-to-peer loans against outcome shares\n");

    scenario_1_offer_matching();
    scenario_2_health_and_liquidation();
    scenario_3_interest_and_repayment();
    scenario_4_partial_liquidation();
    scenario_5_worthless_resolution();
    scenario_6_oracle_polling();
    scenario_7_concurrent_borrowers();

    println!("\nAll simulations completed successfully.");
}

fn setup(config: LedgerConfig) -> Ledger {
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

fn borrow(ledger: &Ledger, borrower: u64, collateral: Decimal, amount: Decimal) -> Result<BorrowResult, LedgerError> {
    ledger.borrow(BorrowRequest {
        borrower: AccountId(borrower),
        market_id: MarketId(1),
        collateral: Units::new(collateral),
        amount: Quote::new(amount),
        duration_days: 30,
    })
}

/// Cheapest offers fill first; a borrow may span several offers.
fn scenario_1_offer_matching() {
    println!("Scenario 1: Offer Matching\n");

    let ledger = setup(LedgerConfig::default());
    offer(&ledger, 1, dec!(5000), dec!(6));
    offer(&ledger, 2, dec!(4000), dec!(4));
    offer(&ledger, 3, dec!(8000), dec!(9));

    println!("  Lenders post $5,000 @ 6%, $4,000 @ 4%, $8,000 @ 9%");

    let result = borrow(&ledger, 100, dec!(15000), dec!(7000)).unwrap();
    println!("  Borrower locks 15,000 shares @ $1.00 and asks for $7,000");
    for fill in &result.fills {
        println!("    filled ${} from {} @ {}", fill.filled_amount, fill.offer_id, fill.apy);
    }
    println!("  Total borrowed: ${}", result.total_borrowed());

    let stats = ledger.marketplace_stats();
    println!(
        "  Marketplace: {} active offers, ${} still offered, avg APY {:.4}\n",
        stats.active_offers, stats.open_liquidity, stats.average_offer_apy
    );
}

/// A price drop pushes health below 1.0 and the position is seized.
fn scenario_2_health_and_liquidation() {
    println!("Scenario 2: Health and Liquidation\n");

    let ledger = setup(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));

    let position = borrow(&ledger, 100, dec!(15000), dec!(10000)).unwrap().positions[0].clone();
    let summary = ledger.position_summary(position.id).unwrap();
    println!("  $10,000 against 15,000 shares @ $1.00, max LTV 75%");
    println!(
        "  Health {}, liquidation price {}",
        summary.health_factor.unwrap(),
        summary.liquidation_price.unwrap()
    );

    for price in [dec!(0.95), dec!(0.90), dec!(0.60)] {
        let update = ledger.update_price(MarketId(1), price, ledger.time()).unwrap();
        let health = ledger.position_health(position.id).unwrap();
        println!(
            "  Price ${}: health {} ({:?}), {} triggered",
            price,
            health.health_factor,
            health.status,
            update.health.triggered.len()
        );
    }

    let pass = ledger.process_liquidations().unwrap();
    for liquidation in &pass.liquidated {
        let event = &liquidation.event;
        println!(
            "  Liquidated {}: covered ${}, seized {} shares, unrecovered ${}",
            liquidation.position_id, event.debt_covered, event.collateral_seized, event.unrecovered_debt
        );
    }

    let lender = ledger.lender_account(AccountId(1)).unwrap();
    println!(
        "  Lender recovered ${}, wrote off ${}\n",
        lender.liquidation_proceeds, lender.unrecovered_debt
    );
}

/// Interest compounds every tick; repayment pays interest before principal.
fn scenario_3_interest_and_repayment() {
    println!("Scenario 3: Interest and Repayment\n");

    let ledger = setup(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));
    let position = borrow(&ledger, 100, dec!(20000), dec!(10000)).unwrap().positions[0].clone();

    ledger.advance_time(HOUR_MS);
    ledger.run_tick().unwrap();
    println!("  After 1 hour: interest ${}", ledger.position(position.id).unwrap().accrued_interest);

    ledger.advance_time(23 * HOUR_MS);
    ledger.update_price(MarketId(1), dec!(1.00), ledger.time()).unwrap();
    ledger.run_tick().unwrap();
    let current = ledger.position(position.id).unwrap();
    println!("  After 1 day: interest ${}, debt ${}", current.accrued_interest, current.debt());

    let partial = ledger.repay(position.id, Quote::new(dec!(2000))).unwrap();
    println!(
        "  Repay $2,000: ${} interest, ${} principal, ${} left",
        partial.interest_paid, partial.principal_paid, partial.remaining_debt
    );

    let rest = ledger.position(position.id).unwrap().debt();
    let full = ledger.repay(position.id, rest).unwrap();
    println!(
        "  Repay ${}: status {:?}, {} shares released",
        rest, full.status, full.collateral_released
    );

    let lender = ledger.lender_account(AccountId(1)).unwrap();
    println!("  Lender net earnings: ${}\n", lender.net_earnings());
}

/// Partial mode sells just enough collateral to restore the target health.
fn scenario_4_partial_liquidation() {
    println!("Scenario 4: Partial Liquidation\n");

    let mut config = LedgerConfig::default();
    config.liquidation.mode = LiquidationMode::Partial;
    let ledger = setup(config);
    offer(&ledger, 1, dec!(10000), dec!(5));
    let position = borrow(&ledger, 100, dec!(15000), dec!(10000)).unwrap().positions[0].clone();

    ledger.update_price(MarketId(1), dec!(0.88), ledger.time()).unwrap();
    let pass = ledger.process_liquidations().unwrap();
    for liquidation in &pass.liquidated {
        println!(
            "  Price $0.88: repaid ${}, seized {} shares, full close: {}",
            liquidation.event.debt_repaid(),
            liquidation.event.collateral_seized,
            liquidation.event.full_close
        );
    }

    let after = ledger.position_health(position.id).unwrap();
    let remaining = ledger.position(position.id).unwrap();
    println!(
        "  Remaining debt ${}, collateral {}, health {}\n",
        remaining.debt(),
        remaining.collateral,
        after.health_factor
    );
}

/// A market resolving at zero closes every loan against it.
fn scenario_5_worthless_resolution() {
    println!("Scenario 5: Market Resolves Worthless\n");

    let ledger = setup(LedgerConfig::default());
    offer(&ledger, 1, dec!(10000), dec!(5));
    offer(&ledger, 2, dec!(10000), dec!(7));
    borrow(&ledger, 100, dec!(10000), dec!(5000)).unwrap();
    borrow(&ledger, 101, dec!(20000), dec!(12000)).unwrap();

    let resolution = ledger.resolve_market(MarketId(1), Decimal::ZERO).unwrap();
    println!("  Market resolved at $0, {} positions closed", resolution.closed.len());

    let written_off: Decimal = resolution.closed.iter().map(|c| c.event.unrecovered_debt.value()).sum();
    println!("  Total unrecovered debt: ${}", written_off);

    let rejected = ledger.update_price(MarketId(1), dec!(0.5), ledger.time());
    println!("  Later quote rejected: {}\n", rejected.is_err());
}

/// Prices can be pulled from any PriceOracle implementation.
fn scenario_6_oracle_polling() {
    println!("Scenario 6: Oracle Polling\n");

    let ledger = setup(LedgerConfig::testnet());
    ledger
        .add_market(Market::new(MarketId(2), "Election Winner", Timestamp::from_millis(365 * DAY_MS)))
        .unwrap();
    let oracle = MockOracle::new("mock-feed");

    ledger.advance_time(HOUR_MS);
    oracle.set_price(MarketId(1), dec!(0.72), ledger.time()).unwrap();

    let poll = ledger.poll_oracle(&oracle).unwrap();
    println!(
        "  Poll: {} updated, {} unavailable, {} rejected",
        poll.updated.len(),
        poll.unavailable.len(),
        poll.rejected.len()
    );
    println!("  Snapshot version {}\n", ledger.price_snapshot().version);
}

/// Many borrowers racing for one offer never overdraw it.
fn scenario_7_concurrent_borrowers() {
    println!("Scenario 7: Concurrent Borrowers\n");

    let ledger = Arc::new(setup(LedgerConfig::default()));
    let offer_id = offer(&ledger, 1, dec!(50000), dec!(5));

    let handles: Vec<_> = (0..16u64)
        .map(|i| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let mut opened = 0;
                for _ in 0..5 {
                    if borrow(&ledger, 100 + i, dec!(2000), dec!(1000)).is_ok() {
                        opened += 1;
                    }
                }
                opened
            })
        })
        .collect();

    let opened: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    let filled = ledger.offer(offer_id).unwrap().filled();

    println!("  16 threads x 5 borrows of $1,000 against a $50,000 offer");
    println!("  Opened {} positions, offer filled ${}", opened, filled);

    let stats = ledger.platform_stats();
    println!(
        "  TVL ${}, borrowed ${}, utilization {:.2}",
        stats.total_value_locked, stats.total_borrowed, stats.utilization_rate
    );
    println!("  Events generated: {}\n", ledger.events().len());
}
