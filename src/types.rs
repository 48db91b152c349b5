// 1.0: all the primitives live here. nothing in the ledger works without these types.
// IDs, prices, amounts, rates, timestamps. each is a newtype so the compiler catches type mixups.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

// USD amounts settle in 6 decimals (USDC). token units use the same scale.
pub const QUOTE_SCALE: u32 = 6;
pub const UNITS_SCALE: u32 = 6;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;
pub const YEAR_MS: i64 = 365 * DAY_MS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AccountId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OfferId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl fmt::Display for MarketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "market#{}", self.0)
    }
}

impl fmt::Display for OfferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offer#{}", self.0)
    }
}

impl fmt::Display for PositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "position#{}", self.0)
    }
}

// 1.1: price of one conditional token in USD. must be positive.
// a resolved-at-zero outcome never becomes a Price; the ledger force-closes instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Price(Decimal);

impl Price {
    #[must_use]
    pub fn new(value: Decimal) -> Option<Self> {
        if value > Decimal::ZERO {
            Some(Self(value))
        } else {
            None
        }
    }

    pub fn new_unchecked(value: Decimal) -> Self {
        debug_assert!(value > Decimal::ZERO);
        Self(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// 1.2: USD amount. principal, interest, penalties, shortfalls all use this.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote(Decimal);

impl Quote {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    pub fn add(&self, other: Quote) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Quote) -> Self {
        Self(self.0 - other.0)
    }

    // floors at zero. used where a negative balance would be meaningless
    pub fn saturating_sub(&self, other: Quote) -> Self {
        Self((self.0 - other.0).max(Decimal::ZERO))
    }

    pub fn mul(&self, factor: Decimal) -> Self {
        Self(self.0 * factor)
    }

    pub fn min(self, other: Quote) -> Self {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }

    // never rounds up: the ledger must not overstate what is owed
    pub fn round_down(&self) -> Self {
        Self(self.0.round_dp_with_strategy(QUOTE_SCALE, RoundingStrategy::ToZero))
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialOrd for Quote {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quote {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl Sum for Quote {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(q))
    }
}

impl<'a> Sum<&'a Quote> for Quote {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc.add(*q))
    }
}

// 1.3: conditional-token units held as collateral.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Units(Decimal);

impl Units {
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    pub fn add(&self, other: Units) -> Self {
        Self(self.0 + other.0)
    }

    pub fn sub(&self, other: Units) -> Self {
        Self(self.0 - other.0)
    }

    pub fn min(self, other: Units) -> Self {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }

    // 1.3.1: mark-to-market value at a given price
    pub fn value_at(&self, price: Price) -> Quote {
        Quote::new(self.0 * price.value())
    }

    pub fn round_down(&self) -> Self {
        Self(self.0.round_dp_with_strategy(UNITS_SCALE, RoundingStrategy::ToZero))
    }

    pub fn round_up(&self) -> Self {
        Self(self.0.round_dp_with_strategy(UNITS_SCALE, RoundingStrategy::AwayFromZero))
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Sum for Units {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, u| acc.add(u))
    }
}

// 1.4: basis points. 100 bps = 1%. LTV caps and penalties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bps(u32);

impl Bps {
    pub const MAX: u32 = 10_000;

    pub fn new(bps: u32) -> Self {
        Self(bps)
    }

    pub fn value(&self) -> u32 {
        self.0
    }

    pub fn as_fraction(&self) -> Decimal {
        Decimal::new(self.0 as i64, 4)
    }
}

impl fmt::Display for Bps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}bps", self.0)
    }
}

// 1.5: annual percentage yield as a fraction. 0.05 = 5%.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Apy(Decimal);

impl Apy {
    #[must_use]
    pub fn new(rate: Decimal) -> Option<Self> {
        if rate >= Decimal::ZERO {
            Some(Self(rate))
        } else {
            None
        }
    }

    pub fn from_percent(percent: Decimal) -> Option<Self> {
        Self::new(percent / dec!(100))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn as_percent(&self) -> Decimal {
        self.0 * dec!(100)
    }
}

impl fmt::Display for Apy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.as_percent().normalize())
    }
}

// 1.6: collateral value at max LTV over debt. 1.0 = exactly at the LTV boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HealthFactor(Decimal);

impl HealthFactor {
    pub const ONE: HealthFactor = HealthFactor(Decimal::ONE);
    // debt-free positions cannot be liquidated
    pub const UNBOUNDED: HealthFactor = HealthFactor(Decimal::MAX);

    pub fn new(ratio: Decimal) -> Self {
        Self(ratio)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    pub fn is_liquidatable(&self) -> bool {
        self.0 < Decimal::ONE
    }

    pub fn is_unbounded(&self) -> bool {
        self.0 == Decimal::MAX
    }
}

impl fmt::Display for HealthFactor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_unbounded() {
            write!(f, "inf")
        } else {
            write!(f, "{}", self.0.round_dp(4))
        }
    }
}

// 1.7: millisecond timestamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(chrono::Utc::now().timestamp_millis())
    }

    pub const fn from_millis(ms: i64) -> Self {
        Self(ms)
    }

    pub fn as_millis(&self) -> i64 {
        self.0
    }

    pub fn plus_millis(&self, ms: i64) -> Self {
        Self(self.0.saturating_add(ms))
    }

    pub fn plus_days(&self, days: u32) -> Self {
        self.plus_millis(days as i64 * DAY_MS)
    }

    pub fn millis_since(&self, earlier: &Timestamp) -> i64 {
        self.0.saturating_sub(earlier.0)
    }

    // 1.7.1: start of the tick this timestamp falls into
    pub fn floor_to(&self, interval_ms: i64) -> Self {
        debug_assert!(interval_ms > 0);
        Self(self.0.div_euclid(interval_ms) * interval_ms)
    }

    // 1.7.2: first tick boundary at or after this timestamp
    pub fn ceil_to(&self, interval_ms: i64) -> Self {
        let floor = self.floor_to(interval_ms);
        if floor == *self {
            floor
        } else {
            floor.plus_millis(interval_ms)
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ms", self.0)
    }
}
