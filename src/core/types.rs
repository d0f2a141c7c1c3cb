//! Core types - Strong typing for account, order and streaming data

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Depth of a streaming quote on each side.
pub const QUOTE_DEPTH: usize = 10;

/// Broker instrument code (e.g., "005930")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstrumentCode(String);

impl InstrumentCode {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for InstrumentCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for InstrumentCode {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Broker-assigned order number, unique per session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderNumber(String);

impl OrderNumber {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for OrderNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-side screening rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionDefinition {
    pub name: String,
    pub index: u32,
}

/// One held instrument
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holding {
    pub code: InstrumentCode,
    pub name: String,
    /// Quantity held
    pub quantity: u64,
    /// Quantity not locked by open sell orders
    pub available: u64,
    /// Average purchase cost per unit
    pub average_cost: i64,
}

/// Holdings as currently known.
///
/// `complete` is false while the broker is still paging a large holdings set;
/// callers must tolerate a partial view in that case.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Holdings {
    pub entries: HashMap<InstrumentCode, Holding>,
    pub complete: bool,
}

impl Holdings {
    pub fn get(&self, code: &InstrumentCode) -> Option<&Holding> {
        self.entries.get(code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Session-wide account view
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountState {
    /// Last login result code (0 = success)
    pub login_code: Option<i32>,
    pub account_number: Option<String>,
    /// Cash available for ordering
    pub cash: Option<i64>,
    pub holdings: Holdings,
}

/// Order side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderKind {
    Market,
    Limit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "MARKET"),
            OrderKind::Limit => write!(f, "LIMIT"),
        }
    }
}

/// Order request handed to the broker.
///
/// A market order carries a zero price; a limit order carries a nonzero one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub side: Side,
    pub code: InstrumentCode,
    pub quantity: u64,
    pub price: i64,
    pub kind: OrderKind,
}

impl OrderSpec {
    pub fn market(side: Side, code: impl Into<InstrumentCode>, quantity: u64) -> Self {
        Self {
            side,
            code: code.into(),
            quantity,
            price: 0,
            kind: OrderKind::Market,
        }
    }

    pub fn limit(side: Side, code: impl Into<InstrumentCode>, quantity: u64, price: i64) -> Self {
        Self {
            side,
            code: code.into(),
            quantity,
            price,
            kind: OrderKind::Limit,
        }
    }

    /// Whether the price sentinel matches the order kind
    pub fn is_well_formed(&self) -> bool {
        match self.kind {
            OrderKind::Market => self.price == 0,
            OrderKind::Limit => self.price != 0,
        }
    }
}

/// Order status as reported by the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

/// Order status record written by the event side.
///
/// Broker-side rejections are carried here as data (`status` + `message`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub order_no: OrderNumber,
    pub code: InstrumentCode,
    pub side: Side,
    pub status: OrderStatus,
    pub quantity: u64,
    pub filled_quantity: u64,
    pub price: i64,
    pub filled_price: Option<i64>,
    pub message: Option<String>,
    pub updated_at: NaiveTime,
}

impl OrderRecord {
    pub fn unfilled_quantity(&self) -> u64 {
        self.quantity.saturating_sub(self.filled_quantity)
    }
}

/// Latest trade tick for an instrument; overwritten in place
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceEntry {
    pub code: InstrumentCode,
    /// Trade time (time of day only; the feed carries no date)
    pub time: NaiveTime,
    pub last: i64,
    pub open: i64,
    pub high: i64,
    pub low: i64,
}

/// One price level of a quote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteLevel {
    pub price: i64,
    pub size: u64,
}

/// Latest ten-level quote for an instrument; overwritten in place.
///
/// Level 0 is the best bid / best ask.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuoteEntry {
    pub code: InstrumentCode,
    pub time: NaiveTime,
    pub bids: [QuoteLevel; QUOTE_DEPTH],
    pub asks: [QuoteLevel; QUOTE_DEPTH],
}

impl QuoteEntry {
    pub fn best_bid(&self) -> QuoteLevel {
        self.bids[0]
    }

    pub fn best_ask(&self) -> QuoteLevel {
        self.asks[0]
    }
}

/// Age classification of a streaming entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    Ordinary,
    Stale,
}

/// A streaming entry together with its age classification at read time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot<T> {
    pub entry: T,
    pub freshness: Freshness,
}

impl<T> Snapshot<T> {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }

    pub fn into_entry(self) -> T {
        self.entry
    }
}
