// 8.0 ledger/core.rs: the ledger itself. owns markets, offers, positions, lender accounts.
// 8.1 shared as Arc<Ledger>: every operation takes &self and locks only what it touches.
// lock order when nesting: book -> markets -> positions map -> one position -> lenders -> records.

use super::results::{LedgerError, ValidationError};
use crate::account::LenderAccount;
use crate::config::LedgerConfig;
use crate::events::{Event, EventLog, EventPayload};
use crate::liquidation::LiquidationEvent;
use crate::market::Market;
use crate::offer::OfferBook;
use crate::oracle::{PriceBook, PriceSnapshot};
use crate::position::Position;
use crate::types::{AccountId, MarketId, PositionId, Price, Timestamp};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// commits swap whole values, so a poisoned lock still holds a consistent state
pub(super) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(PoisonError::into_inner)
}

pub(super) fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(PoisonError::into_inner)
}

/// What a commit closure decided for one position.
pub(super) enum Outcome<R> {
    /// Nothing to write
    Unchanged(R),
    /// Replace the position with this state
    Updated(Position, R),
}

/// Positions flagged for liquidation, each queued at most once.
#[derive(Debug, Default)]
pub(super) struct LiquidationQueue {
    order: VecDeque<PositionId>,
    queued: HashSet<PositionId>,
}

impl LiquidationQueue {
    pub(super) fn push(&mut self, position_id: PositionId) -> bool {
        if self.queued.insert(position_id) {
            self.order.push_back(position_id);
            true
        } else {
            false
        }
    }

    pub(super) fn drain(&mut self) -> Vec<PositionId> {
        self.queued.clear();
        self.order.drain(..).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.order.len()
    }
}

/** 8.2: main ledger struct. all state lives here */
#[derive(Debug)]
pub struct Ledger {
    pub(super) config: LedgerConfig,
    pub(super) clock: AtomicI64,
    pub(super) markets: RwLock<HashMap<MarketId, Market>>,
    pub(super) book: Mutex<OfferBook>,
    pub(super) positions: RwLock<HashMap<PositionId, Arc<Mutex<Position>>>>,
    pub(super) lenders: Mutex<HashMap<AccountId, LenderAccount>>,
    pub(super) prices: PriceBook,
    pub(super) queue: Mutex<LiquidationQueue>,
    pub(super) liquidations: Mutex<Vec<LiquidationEvent>>,
    pub(super) events: EventLog,
    pub(super) next_offer_id: AtomicU64,
    pub(super) next_position_id: AtomicU64,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Result<Self, LedgerError> {
        config.validate()?;
        let max_events = config.max_events;
        Ok(Self {
            config,
            clock: AtomicI64::new(0),
            markets: RwLock::new(HashMap::new()),
            book: Mutex::new(OfferBook::new()),
            positions: RwLock::new(HashMap::new()),
            lenders: Mutex::new(HashMap::new()),
            prices: PriceBook::new(),
            queue: Mutex::new(LiquidationQueue::default()),
            liquidations: Mutex::new(Vec::new()),
            events: EventLog::new(max_events),
            next_offer_id: AtomicU64::new(1),
            next_position_id: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn set_time(&self, timestamp: Timestamp) {
        self.clock.store(timestamp.as_millis(), Ordering::SeqCst);
    }

    pub fn time(&self) -> Timestamp {
        Timestamp::from_millis(self.clock.load(Ordering::SeqCst))
    }

    pub fn advance_time(&self, millis: i64) -> Timestamp {
        Timestamp::from_millis(self.clock.fetch_add(millis, Ordering::SeqCst) + millis)
    }

    /// Start of the current accrual tick.
    pub fn tick_boundary(&self) -> Timestamp {
        self.time().floor_to(self.config.interest.tick_interval_ms)
    }

    pub fn price_snapshot(&self) -> Arc<PriceSnapshot> {
        self.prices.snapshot()
    }

    pub(super) fn price_in(&self, snapshot: &PriceSnapshot, market_id: MarketId) -> Result<Price, LedgerError> {
        Ok(snapshot.price(market_id, self.time(), self.config.oracle.max_staleness_ms)?)
    }

    pub(super) fn market_snapshot(&self, market_id: MarketId) -> Result<Market, LedgerError> {
        read(&self.markets)
            .get(&market_id)
            .cloned()
            .ok_or(LedgerError::Validation(ValidationError::UnknownMarket(market_id)))
    }

    pub(super) fn position_cell(&self, position_id: PositionId) -> Result<Arc<Mutex<Position>>, LedgerError> {
        read(&self.positions)
            .get(&position_id)
            .cloned()
            .ok_or(LedgerError::PositionNotFound(position_id))
    }

    /// Consistent copies of every position matching `keep`.
    pub(super) fn collect_positions(&self, keep: impl Fn(&Position) -> bool) -> Vec<Position> {
        let cells: Vec<Arc<Mutex<Position>>> = read(&self.positions).values().cloned().collect();
        let mut out: Vec<Position> = cells
            .iter()
            .map(|cell| lock(cell).clone())
            .filter(|p| keep(p))
            .collect();
        out.sort_by_key(|p| p.id);
        out
    }

    // 8.3: optimistic commit. the new state is computed from a snapshot without
    // holding the lock, then swapped in only if nobody committed in between.
    // `effects` runs under the position lock right after a successful swap.
    pub(super) fn commit<R>(
        &self,
        position_id: PositionId,
        mut plan: impl FnMut(&Position) -> Result<Outcome<R>, LedgerError>,
        effects: impl FnOnce(&Position, &Position, &R),
    ) -> Result<R, LedgerError> {
        let cell = self.position_cell(position_id)?;

        for attempt in 1..=self.config.max_commit_attempts {
            let snapshot = lock(&cell).clone();

            match plan(&snapshot)? {
                Outcome::Unchanged(result) => return Ok(result),
                Outcome::Updated(mut next, result) => {
                    let mut current = lock(&cell);
                    if current.version != snapshot.version {
                        tracing::debug!(%position_id, attempt, "version moved, retrying commit");
                        continue;
                    }
                    next.version = snapshot.version + 1;
                    *current = next;
                    effects(&snapshot, &*current, &result);
                    return Ok(result);
                }
            }
        }

        tracing::warn!(%position_id, attempts = self.config.max_commit_attempts, "commit gave up");
        Err(LedgerError::ConcurrentModification(position_id))
    }

    pub(super) fn with_lender<R>(&self, lender: AccountId, f: impl FnOnce(&mut LenderAccount) -> R) -> R {
        let now = self.time();
        let mut lenders = lock(&self.lenders);
        let account = lenders
            .entry(lender)
            .or_insert_with(|| LenderAccount::new(lender, now));
        f(account)
    }

    pub(super) fn enqueue_liquidation(&self, position_id: PositionId) {
        if lock(&self.queue).push(position_id) {
            tracing::debug!(%position_id, "queued for liquidation");
        }
    }

    pub fn liquidation_queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    pub(super) fn emit_event(&self, payload: EventPayload) {
        self.events.emit(self.time(), payload);
    }

    pub fn recent_events(&self, count: usize) -> Vec<Event> {
        self.events.recent(count)
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.all()
    }

    pub fn export_events(&self) -> Result<String, serde_json::Error> {
        self.events.to_json()
    }

    pub fn liquidation_records(&self) -> Vec<LiquidationEvent> {
        lock(&self.liquidations).clone()
    }
}
