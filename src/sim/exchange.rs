//! Virtual exchange - random-walk prices, ten-level quotes, instant fills

use chrono::{NaiveTime, Timelike};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::core::{
    ConditionDefinition, Holding, InstrumentCode, OrderKind, OrderNumber, OrderRecord,
    OrderSpec, OrderStatus, PriceEntry, QUOTE_DEPTH, QuoteEntry, QuoteLevel, Side, SimConfig,
};
use crate::correlator::RequestToken;
use crate::events::BrokerEvent;

pub const SIM_ACCOUNT_NUMBER: &str = "5500112233";

/// Condition definitions the simulated server stores
pub fn sim_conditions() -> Vec<ConditionDefinition> {
    ["momentum", "volume-spike", "value"]
        .iter()
        .enumerate()
        .map(|(i, name)| ConditionDefinition { name: name.to_string(), index: i as u32 })
        .collect()
}

/// Book for one instrument
#[derive(Debug, Clone)]
struct Book {
    open: i64,
    high: i64,
    low: i64,
    last: i64,
    bid_sizes: [u64; QUOTE_DEPTH],
    ask_sizes: [u64; QUOTE_DEPTH],
}

pub struct VirtualExchange {
    config: SimConfig,
    rng: StdRng,
    cash: i64,
    books: BTreeMap<InstrumentCode, Book>,
    holdings: HashMap<InstrumentCode, Holding>,
    price_subs: BTreeSet<InstrumentCode>,
    quote_subs: BTreeSet<InstrumentCode>,
    next_order_no: u64,
    events: flume::Sender<BrokerEvent>,
}

impl VirtualExchange {
    pub fn new(config: SimConfig, events: flume::Sender<BrokerEvent>) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let cash = config.start_deposit;
        let mut exchange = Self {
            config,
            rng,
            cash,
            books: BTreeMap::new(),
            holdings: HashMap::new(),
            price_subs: BTreeSet::new(),
            quote_subs: BTreeSet::new(),
            next_order_no: 1,
            events,
        };
        let universe: Vec<InstrumentCode> =
            exchange.config.universe.iter().map(InstrumentCode::new).collect();
        for code in universe {
            exchange.book(&code);
        }
        exchange
    }

    pub fn cash(&self) -> i64 {
        self.cash
    }

    pub fn last_price(&self, code: &InstrumentCode) -> Option<i64> {
        self.books.get(code).map(|b| b.last)
    }

    // ─────────────────────────────────────────────────────────────
    // Requests
    // ─────────────────────────────────────────────────────────────

    pub fn login(&mut self) {
        self.emit(BrokerEvent::LoginCompleted { code: 0 });
    }

    pub fn account_number(&mut self) {
        self.emit(BrokerEvent::AccountNumber { account: SIM_ACCOUNT_NUMBER.to_string() });
    }

    pub fn balance(&mut self) {
        let entries = self.holdings.values().cloned().collect();
        self.emit(BrokerEvent::Holdings { entries, complete: true });
    }

    pub fn deposit(&mut self, token: RequestToken) {
        self.emit(BrokerEvent::Deposit { token, amount: self.cash });
    }

    pub fn conditions(&mut self) {
        self.emit(BrokerEvent::Conditions { conditions: sim_conditions() });
    }

    pub fn condition_search(&mut self, name: String) {
        let listed: Vec<InstrumentCode> = self.books.keys().cloned().collect();
        let mut codes = Vec::with_capacity(listed.len());
        for code in listed {
            if self.rng.gen_bool(0.5) {
                codes.push(code);
            }
        }
        debug!("Condition {} matched {} instruments", name, codes.len());
        self.emit(BrokerEvent::ConditionMatches { name, codes });
    }

    pub fn register_price(&mut self, codes: Vec<InstrumentCode>, replace: bool) {
        if replace {
            self.price_subs.clear();
        }
        for code in codes {
            self.book(&code);
            self.price_subs.insert(code);
        }
    }

    pub fn register_quote(&mut self, codes: Vec<InstrumentCode>, replace: bool) {
        if replace {
            self.quote_subs.clear();
        }
        for code in codes {
            self.book(&code);
            self.quote_subs.insert(code);
        }
    }

    /// Accept, then fill or reject at once. Rejections are reported as data.
    pub fn order(&mut self, spec: OrderSpec, token: RequestToken) {
        let order_no = OrderNumber::new(format!("{:07}", self.next_order_no));
        self.next_order_no += 1;
        self.emit(BrokerEvent::OrderAccepted { token, order_no: order_no.clone() });

        let last = self.book(&spec.code).last;
        let fill_price = match spec.kind {
            OrderKind::Market => last,
            OrderKind::Limit => spec.price,
        };

        let outcome = if spec.quantity == 0 || fill_price <= 0 {
            Err("invalid quantity or price".to_string())
        } else {
            match spec.side {
                Side::Buy => self.buy(&spec.code, spec.quantity, fill_price),
                Side::Sell => self.sell(&spec.code, spec.quantity, fill_price),
            }
        };

        let (status, filled_quantity, filled_price, message) = match outcome {
            Ok(()) => (OrderStatus::Filled, spec.quantity, Some(fill_price), None),
            Err(reason) => {
                warn!("Order {} rejected: {}", order_no, reason);
                (OrderStatus::Rejected, 0, None, Some(reason))
            }
        };

        self.emit(BrokerEvent::OrderUpdate {
            record: OrderRecord {
                order_no,
                code: spec.code,
                side: spec.side,
                status,
                quantity: spec.quantity,
                filled_quantity,
                price: spec.price,
                filled_price,
                message,
                updated_at: now(),
            },
        });
    }

    fn buy(&mut self, code: &InstrumentCode, quantity: u64, price: i64) -> Result<(), String> {
        let cost = price
            .checked_mul(quantity as i64)
            .ok_or_else(|| "order value overflow".to_string())?;
        if cost > self.cash {
            return Err(format!("insufficient cash: {} < {}", self.cash, cost));
        }
        self.cash -= cost;

        let holding = self.holdings.entry(code.clone()).or_insert_with(|| Holding {
            code: code.clone(),
            name: format!("SIM {}", code),
            quantity: 0,
            available: 0,
            average_cost: 0,
        });
        let held_value = holding.average_cost * holding.quantity as i64;
        holding.quantity += quantity;
        holding.available += quantity;
        holding.average_cost = (held_value + cost) / holding.quantity as i64;
        let holding = holding.clone();

        self.emit(BrokerEvent::CashChanged { cash: self.cash });
        self.emit(BrokerEvent::HoldingChanged { holding });
        Ok(())
    }

    fn sell(&mut self, code: &InstrumentCode, quantity: u64, price: i64) -> Result<(), String> {
        let available = self.holdings.get(code).map_or(0, |h| h.available);
        if available < quantity {
            return Err(format!("insufficient holdings: {} < {}", available, quantity));
        }
        let cash = i64::try_from(quantity)
            .ok()
            .and_then(|q| price.checked_mul(q))
            .and_then(|value| self.cash.checked_add(value))
            .ok_or_else(|| "order value overflow".to_string())?;
        self.cash = cash;

        let remaining = match self.holdings.get_mut(code) {
            Some(holding) => {
                holding.quantity -= quantity;
                holding.available -= quantity;
                (holding.quantity > 0).then(|| holding.clone())
            }
            None => None,
        };

        self.emit(BrokerEvent::CashChanged { cash: self.cash });
        match remaining {
            Some(holding) => self.emit(BrokerEvent::HoldingChanged { holding }),
            None => {
                self.holdings.remove(code);
                self.emit(BrokerEvent::HoldingCleared { code: code.clone() });
            }
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Market movement
    // ─────────────────────────────────────────────────────────────

    /// Move every book one step and stream the subscribed ones
    pub fn tick(&mut self) {
        let codes: Vec<InstrumentCode> = self.books.keys().cloned().collect();
        for code in &codes {
            self.step(code);
        }

        let time = now();
        let prices: Vec<PriceEntry> = self
            .price_subs
            .iter()
            .filter_map(|code| self.books.get(code).map(|b| self.price_entry(code, b, time)))
            .collect();
        let quotes: Vec<QuoteEntry> = self
            .quote_subs
            .iter()
            .filter_map(|code| self.books.get(code).map(|b| self.quote_entry(code, b, time)))
            .collect();

        for entry in prices {
            self.emit(BrokerEvent::Price { entry });
        }
        for entry in quotes {
            self.emit(BrokerEvent::Quote { entry });
        }
    }

    fn step(&mut self, code: &InstrumentCode) {
        let max_change = self.config.max_price_change;
        let max_size_change = self.config.max_quote_change;
        let delta = self.rng.gen_range(-max_change..=max_change);
        let size_moves: Vec<i64> = (0..QUOTE_DEPTH * 2)
            .map(|_| self.rng.gen_range(-max_size_change..=max_size_change))
            .collect();

        let next = self.align(self.books[code].last + delta);
        let Some(book) = self.books.get_mut(code) else {
            return;
        };
        book.last = next;
        book.high = book.high.max(next);
        book.low = book.low.min(next);

        let (bid_moves, ask_moves) = size_moves.split_at(QUOTE_DEPTH);
        for (size, change) in book.bid_sizes.iter_mut().zip(bid_moves) {
            *size = (*size as i64 + change).max(0) as u64;
        }
        for (size, change) in book.ask_sizes.iter_mut().zip(ask_moves) {
            *size = (*size as i64 + change).max(0) as u64;
        }
    }

    /// Snap to the price unit and floor at the minimum price
    fn align(&self, price: i64) -> i64 {
        let unit = self.config.price_unit;
        (price - price.rem_euclid(unit)).max(self.config.min_price)
    }

    fn book(&mut self, code: &InstrumentCode) -> &Book {
        if !self.books.contains_key(code) {
            let (lo, hi) = self.config.start_price_range;
            let raw = self.rng.gen_range(lo..=hi);
            let start = self.align(raw);
            let (size_lo, size_hi) = self.config.start_quote_size_range;
            let mut bid_sizes = [0u64; QUOTE_DEPTH];
            let mut ask_sizes = [0u64; QUOTE_DEPTH];
            for size in bid_sizes.iter_mut().chain(ask_sizes.iter_mut()) {
                *size = self.rng.gen_range(size_lo..=size_hi);
            }
            self.books.insert(
                code.clone(),
                Book { open: start, high: start, low: start, last: start, bid_sizes, ask_sizes },
            );
        }
        &self.books[code]
    }

    fn price_entry(&self, code: &InstrumentCode, book: &Book, time: NaiveTime) -> PriceEntry {
        PriceEntry {
            code: code.clone(),
            time,
            last: book.last,
            open: book.open,
            high: book.high,
            low: book.low,
        }
    }

    /// Best bid at the last price, best ask one unit above
    fn quote_entry(&self, code: &InstrumentCode, book: &Book, time: NaiveTime) -> QuoteEntry {
        let unit = self.config.price_unit;
        let mut bids = [QuoteLevel::default(); QUOTE_DEPTH];
        let mut asks = [QuoteLevel::default(); QUOTE_DEPTH];
        for (level, (bid, ask)) in bids.iter_mut().zip(asks.iter_mut()).enumerate() {
            let offset = unit * level as i64;
            *bid = QuoteLevel { price: book.last - offset, size: book.bid_sizes[level] };
            *ask = QuoteLevel { price: book.last + unit + offset, size: book.ask_sizes[level] };
        }
        QuoteEntry { code: code.clone(), time, bids, asks }
    }

    fn emit(&self, event: BrokerEvent) {
        if self.events.send(event).is_err() {
            debug!("Event receiver gone; dropping simulated event");
        }
    }
}

/// Feed time of day, whole seconds
fn now() -> NaiveTime {
    let now = chrono::Local::now().time();
    now.with_nanosecond(0).unwrap_or(now)
}
