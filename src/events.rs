//! Event delivery - routes broker callbacks into correlators and shared state
//!
//! The broker connection pushes pre-parsed `BrokerEvent`s into a flume
//! channel; one dedicated thread drains it and applies each event to the
//! `EventHub`. Correlated responses go to their token's slot, everything else
//! is a state write.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::{
    ConditionDefinition, Holding, InstrumentCode, OrderNumber, OrderRecord, PriceEntry,
    QuoteEntry,
};
use crate::correlator::{Correlator, RequestToken};
use crate::rendezvous::Mailbox;
use crate::state::MarketState;

/// One asynchronous result from the broker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrokerEvent {
    /// Login handshake finished; `code` 0 means success
    LoginCompleted { code: i32 },
    AccountNumber { account: String },
    /// First (or only) page of the holdings set
    Holdings { entries: Vec<Holding>, complete: bool },
    /// Continuation page of the holdings set
    HoldingsContinued { entries: Vec<Holding>, complete: bool },
    HoldingChanged { holding: Holding },
    HoldingCleared { code: InstrumentCode },
    /// Answer to a tokenized deposit request
    Deposit { token: RequestToken, amount: i64 },
    /// Unsolicited cash change, e.g. after a fill
    CashChanged { cash: i64 },
    Conditions { conditions: Vec<ConditionDefinition> },
    /// Condition search result, keyed by condition name
    ConditionMatches { name: String, codes: Vec<InstrumentCode> },
    /// Answer to a tokenized order request
    OrderAccepted { token: RequestToken, order_no: OrderNumber },
    OrderUpdate { record: OrderRecord },
    Price { entry: PriceEntry },
    Quote { entry: QuoteEntry },
}

/// Everything the event thread writes and the facade reads
pub struct EventHub {
    state: MarketState,
    deposits: Correlator<i64>,
    orders: Correlator<OrderNumber>,
    matches: Correlator<Vec<InstrumentCode>>,
    logins: Mailbox<i32>,
    conditions: Mailbox<Vec<ConditionDefinition>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            state: MarketState::new(),
            deposits: Correlator::new("deposit"),
            orders: Correlator::new("order"),
            matches: Correlator::new("condition-search"),
            logins: Mailbox::new(),
            conditions: Mailbox::new(),
        }
    }

    pub fn state(&self) -> &MarketState {
        &self.state
    }

    pub fn deposits(&self) -> &Correlator<i64> {
        &self.deposits
    }

    pub fn orders(&self) -> &Correlator<OrderNumber> {
        &self.orders
    }

    pub fn matches(&self) -> &Correlator<Vec<InstrumentCode>> {
        &self.matches
    }

    pub fn logins(&self) -> &Mailbox<i32> {
        &self.logins
    }

    pub fn conditions(&self) -> &Mailbox<Vec<ConditionDefinition>> {
        &self.conditions
    }

    /// Apply one event. Never fails: undeliverable responses are logged and dropped.
    pub fn apply(&self, event: BrokerEvent) {
        match event {
            BrokerEvent::LoginCompleted { code } => {
                if code == 0 {
                    info!("Login succeeded");
                } else {
                    warn!("Login failed with code {}", code);
                }
                self.state.set_login_code(code);
                self.logins.post(code);
            }
            BrokerEvent::AccountNumber { account } => {
                info!("Account number loaded");
                self.state.set_account_number(account);
            }
            BrokerEvent::Holdings { entries, complete } => {
                debug!("Holdings page: {} entries, complete={}", entries.len(), complete);
                self.state.replace_holdings(entries, complete);
            }
            BrokerEvent::HoldingsContinued { entries, complete } => {
                debug!("Holdings continuation: {} entries, complete={}", entries.len(), complete);
                self.state.extend_holdings(entries, complete);
            }
            BrokerEvent::HoldingChanged { holding } => self.state.upsert_holding(holding),
            BrokerEvent::HoldingCleared { code } => self.state.remove_holding(&code),
            BrokerEvent::Deposit { token, amount } => {
                self.state.set_cash(amount);
                self.deposits.deliver(&token, amount);
            }
            BrokerEvent::CashChanged { cash } => self.state.set_cash(cash),
            BrokerEvent::Conditions { conditions } => {
                debug!("{} condition definitions", conditions.len());
                self.state.set_conditions(conditions.clone());
                self.conditions.post(conditions);
            }
            BrokerEvent::ConditionMatches { name, codes } => {
                self.matches.deliver(&RequestToken::new(name), codes);
            }
            BrokerEvent::OrderAccepted { token, order_no } => {
                self.orders.deliver(&token, order_no);
            }
            BrokerEvent::OrderUpdate { record } => {
                debug!(
                    "Order {} {} {:?} {}/{}",
                    record.order_no,
                    record.code,
                    record.status,
                    record.filled_quantity,
                    record.quantity
                );
                self.state.put_order(record);
            }
            BrokerEvent::Price { entry } => self.state.put_price(entry),
            BrokerEvent::Quote { entry } => self.state.put_quote(entry),
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the single event-delivery thread.
///
/// The thread exits once every sender of `rx` has been dropped.
pub fn spawn_event_pump(
    rx: flume::Receiver<BrokerEvent>,
    hub: Arc<EventHub>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("broker-events".into())
        .spawn(move || {
            info!("Event pump started");
            let mut applied: u64 = 0;
            while let Ok(event) = rx.recv() {
                hub.apply(event);
                applied += 1;
            }
            info!("Event pump stopped after {} events", applied);
        })
}
