// Price Oracle Adapter
//
// The ledger never reads prices from ambient state. Quotes arrive either
// pushed by a caller or polled from a `PriceOracle`, and each accepted quote
// produces a new immutable `PriceSnapshot`. Health passes hold on to the
// snapshot they started with, so a concurrent update never changes prices
// halfway through a pass.

use crate::types::{MarketId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

/// Market-implied price of one outcome token at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceQuote {
    pub market_id: MarketId,
    pub price: Price,
    pub timestamp: Timestamp,
}

impl PriceQuote {
    /// Outcome tokens pay out at most 1, so a quote must lie in (0, 1].
    pub fn new(market_id: MarketId, price: Decimal, timestamp: Timestamp) -> Result<Self, OracleError> {
        if price > Decimal::ONE {
            return Err(OracleError::InvalidPrice { market_id, price });
        }
        let price = Price::new(price).ok_or(OracleError::InvalidPrice { market_id, price })?;
        Ok(Self {
            market_id,
            price,
            timestamp,
        })
    }

    pub fn age_ms(&self, now: Timestamp) -> i64 {
        now.millis_since(&self.timestamp)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("No price available for {0}")]
    PriceUnavailable(MarketId),

    #[error("Price for {market_id} is stale ({age_ms}ms old)")]
    Stale { market_id: MarketId, age_ms: i64 },

    #[error("Quote for {market_id} at {received} is older than the latest at {latest}")]
    NonMonotonic {
        market_id: MarketId,
        latest: Timestamp,
        received: Timestamp,
    },

    #[error("Quote for {market_id} at {received} is ahead of the ledger clock at {now}")]
    FromFuture {
        market_id: MarketId,
        received: Timestamp,
        now: Timestamp,
    },

    #[error("Market {0} is resolved, quotes are no longer accepted")]
    MarketResolved(MarketId),

    #[error("Invalid price {price} for {market_id}")]
    InvalidPrice { market_id: MarketId, price: Decimal },
}

impl OracleError {
    /// Errors that mean "try again later" rather than "bad input".
    pub fn is_unavailable(&self) -> bool {
        matches!(self, OracleError::PriceUnavailable(_) | OracleError::Stale { .. })
    }
}

/// Implement this to plug in a real price source.
pub trait PriceOracle: Send + Sync {
    fn name(&self) -> &str;

    fn current_price(&self, market_id: MarketId) -> Result<PriceQuote, OracleError>;
}

/// Immutable view of every known price, tagged with a version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub version: u64,
    quotes: HashMap<MarketId, PriceQuote>,
    /// Final prices of resolved markets. zero means worthless
    settled: HashMap<MarketId, Decimal>,
}

impl PriceSnapshot {
    pub fn quote(&self, market_id: MarketId) -> Option<&PriceQuote> {
        self.quotes.get(&market_id)
    }

    pub fn is_settled(&self, market_id: MarketId) -> bool {
        self.settled.contains_key(&market_id)
    }

    /// Settled at zero: collateral in this market has no value.
    pub fn is_worthless(&self, market_id: MarketId) -> bool {
        self.settled.get(&market_id).map_or(false, |p| p.is_zero())
    }

    /// Price to value collateral at. A positive settlement price wins over
    /// any quote; quotes older than `max_staleness_ms` are unusable.
    pub fn price(&self, market_id: MarketId, now: Timestamp, max_staleness_ms: i64) -> Result<Price, OracleError> {
        if let Some(settled) = self.settled.get(&market_id) {
            return Price::new(*settled).ok_or(OracleError::PriceUnavailable(market_id));
        }

        let quote = self.quotes.get(&market_id).ok_or(OracleError::PriceUnavailable(market_id))?;
        let age_ms = quote.age_ms(now);
        if age_ms > max_staleness_ms {
            return Err(OracleError::Stale { market_id, age_ms });
        }
        Ok(quote.price)
    }

    fn with_quote(&self, quote: PriceQuote) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.quotes.insert(quote.market_id, quote);
        next
    }

    fn with_settlement(&self, market_id: MarketId, price: Decimal) -> Self {
        let mut next = self.clone();
        next.version += 1;
        next.quotes.remove(&market_id);
        next.settled.insert(market_id, price);
        next
    }
}

/// Holder of the current snapshot. Writers build a new snapshot and swap it in.
#[derive(Debug, Default)]
pub struct PriceBook {
    current: RwLock<Arc<PriceSnapshot>>,
}

impl PriceBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Arc<PriceSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Accept a quote if it is not older than the latest for its market and
    /// not stamped more than `max_future_skew_ms` past `now`.
    pub fn apply(
        &self,
        quote: PriceQuote,
        now: Timestamp,
        max_future_skew_ms: i64,
    ) -> Result<Arc<PriceSnapshot>, OracleError> {
        if quote.timestamp.millis_since(&now) > max_future_skew_ms {
            return Err(OracleError::FromFuture {
                market_id: quote.market_id,
                received: quote.timestamp,
                now,
            });
        }

        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);

        if current.is_settled(quote.market_id) {
            return Err(OracleError::MarketResolved(quote.market_id));
        }
        if let Some(latest) = current.quote(quote.market_id) {
            if quote.timestamp < latest.timestamp {
                return Err(OracleError::NonMonotonic {
                    market_id: quote.market_id,
                    latest: latest.timestamp,
                    received: quote.timestamp,
                });
            }
        }

        let next = Arc::new(current.with_quote(quote));
        *current = Arc::clone(&next);
        Ok(next)
    }

    /// Pin a resolved market's final price. Later quotes are rejected.
    pub fn settle(&self, market_id: MarketId, price: Decimal) -> Arc<PriceSnapshot> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(current.with_settlement(market_id, price));
        *current = Arc::clone(&next);
        next
    }
}

/// Mock oracle for tests and the simulator. Prices are set by hand.
#[derive(Debug)]
pub struct MockOracle {
    name: String,
    prices: Mutex<HashMap<MarketId, PriceQuote>>,
    healthy: Mutex<bool>,
}

impl MockOracle {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            prices: Mutex::new(HashMap::new()),
            healthy: Mutex::new(true),
        }
    }

    pub fn set_price(&self, market_id: MarketId, price: Decimal, timestamp: Timestamp) -> Result<(), OracleError> {
        let quote = PriceQuote::new(market_id, price, timestamp)?;
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(market_id, quote);
        Ok(())
    }

    pub fn remove_price(&self, market_id: MarketId) {
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&market_id);
    }

    pub fn set_healthy(&self, healthy: bool) {
        *self.healthy.lock().unwrap_or_else(PoisonError::into_inner) = healthy;
    }
}

impl PriceOracle for MockOracle {
    fn name(&self) -> &str {
        &self.name
    }

    fn current_price(&self, market_id: MarketId) -> Result<PriceQuote, OracleError> {
        if !*self.healthy.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(OracleError::PriceUnavailable(market_id));
        }
        self.prices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&market_id)
            .copied()
            .ok_or(OracleError::PriceUnavailable(market_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const NOW: Timestamp = Timestamp::from_millis(1_000);

    fn quote(market: u32, price: Decimal, ts: i64) -> PriceQuote {
        PriceQuote::new(MarketId(market), price, Timestamp::from_millis(ts)).unwrap()
    }

    #[test]
    fn each_update_bumps_version() {
        let book = PriceBook::new();
        assert_eq!(book.version(), 0);
        book.apply(quote(1, dec!(0.5), 10), NOW, 0).unwrap();
        book.apply(quote(2, dec!(0.3), 10), NOW, 0).unwrap();
        assert_eq!(book.version(), 2);
    }

    #[test]
    fn old_snapshot_is_unchanged() {
        let book = PriceBook::new();
        book.apply(quote(1, dec!(0.5), 10), NOW, 0).unwrap();
        let before = book.snapshot();
        book.apply(quote(1, dec!(0.4), 20), NOW, 0).unwrap();

        let now = Timestamp::from_millis(20);
        assert_eq!(before.price(MarketId(1), now, 1000).unwrap().value(), dec!(0.5));
        assert_eq!(book.snapshot().price(MarketId(1), now, 1000).unwrap().value(), dec!(0.4));
    }

    #[test]
    fn rejects_out_of_order_quotes() {
        let book = PriceBook::new();
        book.apply(quote(1, dec!(0.5), 100), NOW, 0).unwrap();
        let result = book.apply(quote(1, dec!(0.6), 99), NOW, 0);
        assert!(matches!(result, Err(OracleError::NonMonotonic { .. })));
        // other markets are independent
        assert!(book.apply(quote(2, dec!(0.6), 1), NOW, 0).is_ok());
    }

    #[test]
    fn stale_quotes_are_unavailable() {
        let book = PriceBook::new();
        book.apply(quote(1, dec!(0.5), 0), NOW, 0).unwrap();
        let snap = book.snapshot();

        assert!(snap.price(MarketId(1), Timestamp::from_millis(1000), 1000).is_ok());
        let err = snap.price(MarketId(1), Timestamp::from_millis(1001), 1000).unwrap_err();
        assert!(err.is_unavailable());
        assert!(snap.price(MarketId(9), Timestamp::from_millis(0), 1000).unwrap_err().is_unavailable());
    }

    #[test]
    fn settlement_overrides_and_blocks_quotes() {
        let book = PriceBook::new();
        book.apply(quote(1, dec!(0.7), 0), NOW, 0).unwrap();
        book.settle(MarketId(1), dec!(1));

        // settlement prices never go stale
        let price = book.snapshot().price(MarketId(1), Timestamp::from_millis(i64::MAX / 2), 1).unwrap();
        assert_eq!(price.value(), dec!(1));

        let result = book.apply(quote(1, dec!(0.9), 10), NOW, 0);
        assert_eq!(result.unwrap_err(), OracleError::MarketResolved(MarketId(1)));
        assert!(!book.snapshot().is_worthless(MarketId(1)));

        book.settle(MarketId(2), Decimal::ZERO);
        assert!(book.snapshot().is_worthless(MarketId(2)));
    }

    #[test]
    fn non_positive_quote_rejected() {
        let result = PriceQuote::new(MarketId(1), dec!(0), Timestamp::from_millis(0));
        assert!(matches!(result, Err(OracleError::InvalidPrice { .. })));

        let result = PriceQuote::new(MarketId(1), dec!(1.01), Timestamp::from_millis(0));
        assert!(matches!(result, Err(OracleError::InvalidPrice { .. })));
    }

    #[test]
    fn future_quote_rejected() {
        let book = PriceBook::new();
        let result = book.apply(quote(1, dec!(1.00), i64::MAX / 2), NOW, 5_000);
        assert!(matches!(result, Err(OracleError::FromFuture { .. })));
        assert_eq!(book.version(), 0);

        // within the skew allowance is fine, and a fresh quote can follow it
        book.apply(quote(1, dec!(0.5), 1_000 + 5_000), NOW, 5_000).unwrap();
        let later = Timestamp::from_millis(7_000);
        book.apply(quote(1, dec!(0.4), 7_000), later, 5_000).unwrap();
        assert_eq!(book.snapshot().price(MarketId(1), later, 1000).unwrap().value(), dec!(0.4));
    }

    #[test]
    fn mock_oracle_outage() {
        let oracle = MockOracle::new("mock");
        oracle.set_price(MarketId(1), dec!(0.42), Timestamp::from_millis(5)).unwrap();
        assert_eq!(oracle.current_price(MarketId(1)).unwrap().price.value(), dec!(0.42));

        oracle.set_healthy(false);
        assert_eq!(
            oracle.current_price(MarketId(1)).unwrap_err(),
            OracleError::PriceUnavailable(MarketId(1))
        );

        oracle.set_healthy(true);
        oracle.remove_price(MarketId(1));
        assert!(oracle.current_price(MarketId(1)).unwrap_err().is_unavailable());
    }
}
