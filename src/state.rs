//! Shared market state - the "world view" written by the event thread
//!
//! One writer (the event-delivery thread), many readers (facade callers).
//! Each map sits behind its own `RwLock` and every write replaces a whole
//! entry, so readers never see a half-written record. Every write also bumps a
//! generation counter and wakes waiters parked in `wait_for`.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::HashMap;
use std::time::Duration;

use crate::core::{
    AccountState, ConditionDefinition, Holding, Holdings, InstrumentCode, OrderNumber,
    OrderRecord, PriceEntry, QuoteEntry, Result,
};
use crate::wait::Wait;

pub struct MarketState {
    account: RwLock<AccountState>,
    conditions: RwLock<Vec<ConditionDefinition>>,
    orders: RwLock<HashMap<OrderNumber, OrderRecord>>,
    prices: RwLock<HashMap<InstrumentCode, PriceEntry>>,
    quotes: RwLock<HashMap<InstrumentCode, QuoteEntry>>,
    generation: Mutex<u64>,
    changed: Condvar,
}

impl MarketState {
    pub fn new() -> Self {
        Self {
            account: RwLock::new(AccountState::default()),
            conditions: RwLock::new(Vec::new()),
            orders: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            quotes: RwLock::new(HashMap::new()),
            generation: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────

    pub fn account_state(&self) -> AccountState {
        self.account.read().clone()
    }

    pub fn login_code(&self) -> Option<i32> {
        self.account.read().login_code
    }

    pub fn account_number(&self) -> Option<String> {
        self.account.read().account_number.clone()
    }

    pub fn cash(&self) -> Option<i64> {
        self.account.read().cash
    }

    pub fn holdings(&self) -> Holdings {
        self.account.read().holdings.clone()
    }

    pub fn holding(&self, code: &InstrumentCode) -> Option<Holding> {
        self.account.read().holdings.get(code).cloned()
    }

    pub fn conditions(&self) -> Vec<ConditionDefinition> {
        self.conditions.read().clone()
    }

    pub fn condition(&self, name: &str) -> Option<ConditionDefinition> {
        self.conditions.read().iter().find(|c| c.name == name).cloned()
    }

    pub fn order(&self, order_no: &OrderNumber) -> Option<OrderRecord> {
        self.orders.read().get(order_no).cloned()
    }

    pub fn price(&self, code: &InstrumentCode) -> Option<PriceEntry> {
        self.prices.read().get(code).cloned()
    }

    pub fn quote(&self, code: &InstrumentCode) -> Option<QuoteEntry> {
        self.quotes.read().get(code).cloned()
    }

    // ─────────────────────────────────────────────────────────────
    // Writes (event-delivery thread only)
    // ─────────────────────────────────────────────────────────────

    pub fn set_login_code(&self, code: i32) {
        self.account.write().login_code = Some(code);
        self.bump();
    }

    pub fn set_account_number(&self, account: impl Into<String>) {
        self.account.write().account_number = Some(account.into());
        self.bump();
    }

    pub fn set_cash(&self, cash: i64) {
        self.account.write().cash = Some(cash);
        self.bump();
    }

    /// Replace the whole holdings set (first page, or a full refresh)
    pub fn replace_holdings(&self, entries: Vec<Holding>, complete: bool) {
        let entries = entries.into_iter().map(|h| (h.code.clone(), h)).collect();
        self.account.write().holdings = Holdings { entries, complete };
        self.bump();
    }

    /// Merge a continuation page into the holdings set
    pub fn extend_holdings(&self, entries: Vec<Holding>, complete: bool) {
        {
            let mut account = self.account.write();
            for holding in entries {
                account.holdings.entries.insert(holding.code.clone(), holding);
            }
            account.holdings.complete = complete;
        }
        self.bump();
    }

    pub fn upsert_holding(&self, holding: Holding) {
        self.account
            .write()
            .holdings
            .entries
            .insert(holding.code.clone(), holding);
        self.bump();
    }

    pub fn remove_holding(&self, code: &InstrumentCode) {
        self.account.write().holdings.entries.remove(code);
        self.bump();
    }

    pub fn set_conditions(&self, conditions: Vec<ConditionDefinition>) {
        *self.conditions.write() = conditions;
        self.bump();
    }

    pub fn put_order(&self, record: OrderRecord) {
        self.orders.write().insert(record.order_no.clone(), record);
        self.bump();
    }

    pub fn put_price(&self, entry: PriceEntry) {
        self.prices.write().insert(entry.code.clone(), entry);
        self.bump();
    }

    pub fn put_quote(&self, entry: QuoteEntry) {
        self.quotes.write().insert(entry.code.clone(), entry);
        self.bump();
    }

    // ─────────────────────────────────────────────────────────────
    // Waiting
    // ─────────────────────────────────────────────────────────────

    /// Re-run `lookup` after every write until it yields a value.
    ///
    /// Sleeps at most `poll_interval` between lookups, so cancellation and
    /// deadlines are observed within one interval.
    pub fn wait_for<T>(
        &self,
        lookup: impl Fn(&Self) -> Option<T>,
        wait: &Wait,
        poll_interval: Duration,
    ) -> Result<T> {
        loop {
            let seen = *self.generation.lock();
            if let Some(value) = lookup(self) {
                return Ok(value);
            }

            let nap = wait.slice(poll_interval)?;
            let mut generation = self.generation.lock();
            if *generation == seen {
                self.changed.wait_for(&mut generation, nap);
            }
        }
    }

    fn bump(&self) {
        *self.generation.lock() += 1;
        self.changed.notify_all();
    }
}

impl Default for MarketState {
    fn default() -> Self {
        Self::new()
    }
}
