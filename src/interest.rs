// 5.0: interest accrual. debt compounds once per tick at apy scaled to the tick length.
// every tick's interest is rounded down so the ledger never overstates what is owed.

use crate::types::{Apy, Quote, Timestamp, YEAR_MS};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterestParams {
    /// Length of one accrual tick
    pub tick_interval_ms: i64,
    /// Upper bound on offer APY accepted by the ledger
    pub max_apy: Decimal,
}

impl Default for InterestParams {
    fn default() -> Self {
        Self {
            tick_interval_ms: 3_600_000, // hourly
            max_apy: Decimal::new(5, 0),  // 500%
        }
    }
}

impl InterestParams {
    pub fn ticks_per_year(&self) -> Decimal {
        Decimal::from(YEAR_MS) / Decimal::from(self.tick_interval_ms)
    }
}

// 5.1: apy scaled to one tick. simple division, compounding happens per tick
pub fn per_tick_rate(apy: Apy, tick_interval_ms: i64) -> Decimal {
    apy.value() * Decimal::from(tick_interval_ms) / Decimal::from(YEAR_MS)
}

/// Number of whole ticks between two boundaries.
pub fn ticks_between(from: Timestamp, to: Timestamp, tick_interval_ms: i64) -> u64 {
    let elapsed = to.millis_since(&from);
    if elapsed <= 0 {
        return 0;
    }
    (elapsed / tick_interval_ms) as u64
}

/// Boundary interest starts counting from for a loan opened at `opened_at`.
/// a part-tick before the first boundary is free.
pub fn accrual_start(opened_at: Timestamp, tick_interval_ms: i64) -> Timestamp {
    opened_at.ceil_to(tick_interval_ms)
}

// 5.2: one tick of interest on the outstanding debt, rounded down
pub fn tick_interest(outstanding: Quote, rate: Decimal) -> Quote {
    outstanding.mul(rate).round_down()
}

// 5.3: compounds `ticks` times. returns only the new interest
pub fn accrue_ticks(
    principal: Quote,
    accrued: Quote,
    apy: Apy,
    tick_interval_ms: i64,
    ticks: u64,
) -> Quote {
    let rate = per_tick_rate(apy, tick_interval_ms);
    if rate.is_zero() {
        return Quote::zero();
    }

    let mut outstanding = principal.add(accrued);
    let mut new_interest = Quote::zero();
    for _ in 0..ticks {
        let interest = tick_interest(outstanding, rate);
        if interest.is_zero() {
            // further ticks round to zero as well
            break;
        }
        outstanding = outstanding.add(interest);
        new_interest = new_interest.add(interest);
    }
    new_interest
}

/// Simple (non-compounded) interest over a number of days. used for quotes.
pub fn projected_interest(principal: Quote, apy: Apy, days: u32) -> Quote {
    principal
        .mul(apy.value() * Decimal::from(days) / Decimal::from(365))
        .round_down()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const HOUR: i64 = 3_600_000;

    fn five_pct() -> Apy {
        Apy::from_percent(dec!(5)).unwrap()
    }

    #[test]
    fn hourly_rate() {
        let rate = per_tick_rate(five_pct(), HOUR);
        // 0.05 / 8760
        assert_eq!(rate, dec!(0.05) / dec!(8760));
    }

    #[test]
    fn single_tick_rounds_down() {
        let rate = per_tick_rate(five_pct(), HOUR);
        let interest = tick_interest(Quote::new(dec!(10000)), rate);
        // 10000 * 0.05 / 8760 = 0.0570776255...
        assert_eq!(interest.value(), dec!(0.057077));
    }

    #[test]
    fn compounding_exceeds_simple() {
        let ticks = 24 * 365;
        let compounded = accrue_ticks(Quote::new(dec!(10000)), Quote::zero(), five_pct(), HOUR, ticks);
        let simple = projected_interest(Quote::new(dec!(10000)), five_pct(), 365);
        assert!(compounded > simple);
        // continuous compounding bound: 10000 * (e^0.05 - 1) ~ 512.71
        assert!(compounded.value() < dec!(512.72));
    }

    #[test]
    fn zero_apy_accrues_nothing() {
        let zero = Apy::new(Decimal::ZERO).unwrap();
        let interest = accrue_ticks(Quote::new(dec!(10000)), Quote::zero(), zero, HOUR, 100);
        assert!(interest.is_zero());
    }

    #[test]
    fn dust_stops_accruing() {
        // 0.000001 * tiny rate rounds to zero every tick
        let interest = accrue_ticks(Quote::new(dec!(0.000001)), Quote::zero(), five_pct(), HOUR, 1000);
        assert!(interest.is_zero());
    }

    #[test]
    fn ticks_between_boundaries() {
        let t0 = Timestamp::from_millis(0);
        assert_eq!(ticks_between(t0, Timestamp::from_millis(3 * HOUR), HOUR), 3);
        assert_eq!(ticks_between(t0, Timestamp::from_millis(3 * HOUR - 1), HOUR), 2);
        assert_eq!(ticks_between(Timestamp::from_millis(HOUR), t0, HOUR), 0);
    }

    #[test]
    fn accrual_starts_at_next_boundary() {
        assert_eq!(accrual_start(Timestamp::from_millis(0), HOUR), Timestamp::from_millis(0));
        assert_eq!(accrual_start(Timestamp::from_millis(1), HOUR), Timestamp::from_millis(HOUR));
        assert_eq!(accrual_start(Timestamp::from_millis(HOUR - 1), HOUR), Timestamp::from_millis(HOUR));
    }

    #[test]
    fn ticks_per_year_hourly() {
        assert_eq!(InterestParams::default().ticks_per_year(), dec!(8760));
    }
}
