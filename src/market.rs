//! Market - synchronous, thread-safe trading facade
//!
//! Every operation either sends a tokenized request and blocks on its
//! rendezvous, or waits on the shared state until a keyed entry shows up.
//! Methods may be called from any number of threads at once; only
//! `initialize` must run alone, once, before anything else.
//!
//! Blocking calls take a `Wait`. `Wait::forever()` keeps the unbounded
//! behaviour expected in an attended session.

use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::core::{
    AccountState, Clock, ConditionDefinition, Holdings, InstrumentCode, MarketConfig,
    OrderNumber, OrderRecord, OrderSpec, PriceEntry, QuoteEntry, RequestDispatcher, Result,
    Snapshot,
};
use crate::correlator::{Correlator, RequestToken};
use crate::events::EventHub;
use crate::rendezvous::Mailbox;
use crate::staleness::StalenessGuard;
use crate::state::MarketState;
use crate::wait::Wait;

pub struct Market {
    dispatcher: Arc<dyn RequestDispatcher>,
    hub: Arc<EventHub>,
    guard: StalenessGuard,
    config: MarketConfig,
}

impl Market {
    pub fn new(
        dispatcher: Arc<dyn RequestDispatcher>,
        hub: Arc<EventHub>,
        config: MarketConfig,
    ) -> Self {
        let guard = StalenessGuard::new(config.stale_after());
        Self { dispatcher, hub, guard, config }
    }

    /// Same as `new` with an explicit clock for the staleness guard
    pub fn with_clock(
        dispatcher: Arc<dyn RequestDispatcher>,
        hub: Arc<EventHub>,
        config: MarketConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = StalenessGuard::with_clock(config.stale_after(), clock);
        Self { dispatcher, hub, guard, config }
    }

    /// Log in, then load the account number and the initial holdings.
    ///
    /// Login is retried until the broker reports success; a human may need to
    /// finish an external authentication step in between. Call once, before
    /// any other method.
    #[instrument(skip_all)]
    pub fn initialize(&self, wait: &Wait) -> Result<()> {
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            self.discard_leftovers("login", self.hub.logins());
            self.dispatcher.request_login()?;
            let code = self.hub.logins().recv(wait)?;
            if code == 0 {
                break;
            }
            warn!("Login attempt {} failed with code {}, retrying", attempts, code);
            if !self.config.login_retry_delay().is_zero() {
                wait.sleep(self.config.login_retry_delay())?;
            }
        }

        self.dispatcher.request_account_number()?;
        let token = self.hub.deposits().mint("GetBalance");
        self.dispatcher.request_balance(&token)?;
        info!("Session initialized after {} login attempt(s)", attempts);
        Ok(())
    }

    /// Load the stored condition definitions.
    ///
    /// The response carries no key: two callers racing here may receive each
    /// other's list. Both lists describe the same server-side data. Lists left
    /// over from abandoned waits or unsolicited pushes are discarded first.
    #[instrument(skip_all)]
    pub fn get_condition_definitions(&self, wait: &Wait) -> Result<Vec<ConditionDefinition>> {
        self.discard_leftovers("condition list", self.hub.conditions());
        self.dispatcher.request_conditions()?;
        self.hub.conditions().recv(wait)
    }

    /// Codes currently matching condition `name`.
    ///
    /// The broker allows one search per condition per minute; that limit is
    /// the caller's to respect. A second concurrent search for the same name
    /// fails with `DuplicateToken`.
    #[instrument(skip(self, wait))]
    pub fn get_matching_instruments(
        &self,
        name: &str,
        index: u32,
        wait: &Wait,
    ) -> Result<Vec<InstrumentCode>> {
        let key = self.hub.matches().open(RequestToken::new(name))?;
        self.correlated(self.hub.matches(), key, wait, |_| {
            self.dispatcher.request_condition_search(name, index)
        })
    }

    /// Orderable cash
    #[instrument(skip_all)]
    pub fn get_deposit(&self, wait: &Wait) -> Result<i64> {
        let deposits = self.hub.deposits();
        let token = deposits.issue("GetDeposit");
        self.correlated(deposits, token, wait, |token| self.dispatcher.request_deposit(token))
    }

    /// Holdings as currently known; check `complete` before relying on it
    pub fn get_holdings(&self) -> Holdings {
        self.hub.state().holdings()
    }

    pub fn account_state(&self) -> AccountState {
        self.hub.state().account_state()
    }

    /// Submit an order and return its broker order number.
    ///
    /// Market orders must carry price 0 and limit orders a nonzero price. A
    /// violation is logged and passed through to the broker unchanged.
    #[instrument(skip(self, wait))]
    pub fn place_order(&self, order: &OrderSpec, wait: &Wait) -> Result<OrderNumber> {
        if !order.is_well_formed() {
            warn!(
                "{} order for {} carries price {}; market orders use 0, limit orders nonzero",
                order.kind, order.code, order.price
            );
        }
        let orders = self.hub.orders();
        let token = orders.issue(&format!("RequestOrder-{}", order.code));
        let order_no = self.correlated(orders, token, wait, |token| {
            self.dispatcher.request_order(order, token)
        })?;
        info!("{} {} x{} accepted as {}", order.side, order.code, order.quantity, order_no);
        Ok(order_no)
    }

    /// Wait until the broker reports on `order_no`, then return the record
    #[instrument(skip(self, wait))]
    pub fn get_order_status(&self, order_no: &OrderNumber, wait: &Wait) -> Result<OrderRecord> {
        self.hub
            .state()
            .wait_for(|s| s.order(order_no), wait, self.config.poll_interval())
    }

    /// Start streaming trade ticks for `codes`. Does not wait for data.
    #[instrument(skip(self))]
    pub fn register_price_stream(
        &self,
        codes: &[InstrumentCode],
        replace_existing: bool,
    ) -> Result<()> {
        self.dispatcher.register_price(codes, replace_existing)
    }

    /// Start streaming quotes for `codes`. Does not wait for data.
    #[instrument(skip(self))]
    pub fn register_quote_stream(
        &self,
        codes: &[InstrumentCode],
        replace_existing: bool,
    ) -> Result<()> {
        self.dispatcher.register_quote(codes, replace_existing)
    }

    /// Latest trade tick for `code`, waiting for the first one if needed
    #[instrument(skip(self, wait))]
    pub fn get_price(&self, code: &InstrumentCode, wait: &Wait) -> Result<Snapshot<PriceEntry>> {
        let entry = self
            .hub
            .state()
            .wait_for(|s| s.price(code), wait, self.config.poll_interval())?;
        let freshness = self.guard.check(&entry);
        Ok(Snapshot { entry, freshness })
    }

    /// Latest quote for `code`, waiting for the first one if needed
    #[instrument(skip(self, wait))]
    pub fn get_quote(&self, code: &InstrumentCode, wait: &Wait) -> Result<Snapshot<QuoteEntry>> {
        let entry = self
            .hub
            .state()
            .wait_for(|s| s.quote(code), wait, self.config.poll_interval())?;
        let freshness = self.guard.check(&entry);
        Ok(Snapshot { entry, freshness })
    }

    pub fn state(&self) -> &MarketState {
        self.hub.state()
    }

    pub fn staleness_guard(&self) -> &StalenessGuard {
        &self.guard
    }

    /// Drop unkeyed responses nobody is waiting for
    fn discard_leftovers<T>(&self, what: &str, mailbox: &Mailbox<T>) {
        let stale = mailbox.drain().len();
        if stale > 0 {
            debug!("Discarded {} leftover {} response(s)", stale, what);
        }
    }

    /// Send through `dispatch`, then block on `token`. The token is dropped
    /// from the table on every exit path.
    fn correlated<T>(
        &self,
        correlator: &Correlator<T>,
        token: RequestToken,
        wait: &Wait,
        dispatch: impl FnOnce(&RequestToken) -> Result<()>,
    ) -> Result<T> {
        if let Err(e) = dispatch(&token) {
            correlator.abandon(&token);
            return Err(e);
        }
        correlator.await_value(&token, wait)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Error, Freshness, OrderStatus, Side};
    use crate::events::{BrokerEvent, spawn_event_pump};
    use crate::wait::CancelToken;
    use chrono::NaiveTime;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    /// Broker double: answers each request by pushing events through a real pump
    struct ScriptedBroker {
        events: flume::Sender<BrokerEvent>,
        login_codes: Mutex<VecDeque<i32>>,
        deposit: i64,
        answer_deposits: bool,
        fail_dispatch: bool,
        first_conditions_delay: Option<Duration>,
        condition_calls: AtomicUsize,
        requests: Mutex<Vec<String>>,
    }

    impl ScriptedBroker {
        fn new(events: flume::Sender<BrokerEvent>) -> Self {
            Self {
                events,
                login_codes: Mutex::new(VecDeque::new()),
                deposit: 5_000_000,
                answer_deposits: true,
                fail_dispatch: false,
                first_conditions_delay: None,
                condition_calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn send(&self, event: BrokerEvent) {
            self.events.send(event).unwrap();
        }

        fn log(&self, request: String) -> Result<()> {
            self.requests.lock().push(request);
            if self.fail_dispatch {
                return Err(Error::Dispatch("connection closed".into()));
            }
            Ok(())
        }
    }

    impl RequestDispatcher for ScriptedBroker {
        fn request_login(&self) -> Result<()> {
            self.log("login".into())?;
            let code = self.login_codes.lock().pop_front().unwrap_or(0);
            self.send(BrokerEvent::LoginCompleted { code });
            Ok(())
        }

        fn request_account_number(&self) -> Result<()> {
            self.log("account".into())?;
            self.send(BrokerEvent::AccountNumber { account: "8000000011".into() });
            Ok(())
        }

        fn request_balance(&self, token: &RequestToken) -> Result<()> {
            self.log(format!("balance {}", token))?;
            self.send(BrokerEvent::Holdings { entries: vec![], complete: true });
            Ok(())
        }

        fn request_conditions(&self) -> Result<()> {
            self.log("conditions".into())?;
            let call = self.condition_calls.fetch_add(1, Ordering::SeqCst) + 1;
            let event = BrokerEvent::Conditions {
                conditions: vec![ConditionDefinition { name: format!("list-{}", call), index: 0 }],
            };
            match self.first_conditions_delay {
                Some(delay) if call == 1 => {
                    let events = self.events.clone();
                    std::thread::spawn(move || {
                        std::thread::sleep(delay);
                        let _ = events.send(event);
                    });
                }
                _ => self.send(event),
            }
            Ok(())
        }

        fn request_condition_search(&self, name: &str, index: u32) -> Result<()> {
            self.log(format!("search {} {}", name, index))?;
            self.send(BrokerEvent::ConditionMatches {
                name: name.to_string(),
                codes: vec!["005930".into(), "000660".into()],
            });
            Ok(())
        }

        fn request_deposit(&self, token: &RequestToken) -> Result<()> {
            self.log(format!("deposit {}", token))?;
            if self.answer_deposits {
                self.send(BrokerEvent::Deposit { token: token.clone(), amount: self.deposit });
            }
            Ok(())
        }

        fn request_order(&self, order: &OrderSpec, token: &RequestToken) -> Result<()> {
            self.log(format!("order {}", token))?;
            self.send(BrokerEvent::OrderAccepted {
                token: token.clone(),
                order_no: OrderNumber::new(format!("ord-{}", order.code)),
            });
            Ok(())
        }

        fn register_price(&self, codes: &[InstrumentCode], replace: bool) -> Result<()> {
            self.log(format!("price {:?} {}", codes, replace))
        }

        fn register_quote(&self, codes: &[InstrumentCode], replace: bool) -> Result<()> {
            self.log(format!("quote {:?} {}", codes, replace))
        }
    }

    struct FixedClock(NaiveTime);

    impl Clock for FixedClock {
        fn time_of_day(&self) -> NaiveTime {
            self.0
        }
    }

    fn hms(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn fast_config() -> MarketConfig {
        MarketConfig {
            poll_interval_ms: 1000,
            stale_after_secs: 10,
            login_retry_delay_ms: 0,
        }
    }

    fn setup(
        configure: impl FnOnce(&mut ScriptedBroker),
    ) -> (Market, Arc<ScriptedBroker>, Arc<EventHub>) {
        let hub = Arc::new(EventHub::new());
        let (tx, rx) = flume::unbounded();
        spawn_event_pump(rx, hub.clone()).unwrap();
        let mut broker = ScriptedBroker::new(tx);
        configure(&mut broker);
        let broker = Arc::new(broker);
        let market = Market::with_clock(
            broker.clone(),
            hub.clone(),
            fast_config(),
            Arc::new(FixedClock(hms(9, 0, 15))),
        );
        (market, broker, hub)
    }

    fn price_at(code: &str, time: NaiveTime) -> PriceEntry {
        PriceEntry {
            code: code.into(),
            time,
            last: 70_000,
            open: 69_000,
            high: 70_500,
            low: 68_900,
        }
    }

    #[test]
    fn test_initialize_retries_login_until_success() {
        let (market, broker, hub) = setup(|b| {
            b.login_codes = Mutex::new(VecDeque::from([-100, -101, 0]));
        });

        market.initialize(&Wait::forever()).unwrap();

        let requests = broker.requests.lock().clone();
        assert_eq!(requests.iter().filter(|r| *r == "login").count(), 3);
        assert!(requests.contains(&"account".to_string()));
        assert!(requests.iter().any(|r| r.starts_with("balance GetBalance-")));
        assert_eq!(hub.deposits().pending(), 0);

        let holdings = hub.state().wait_for(
            |s| s.holdings().complete.then_some(()),
            &Wait::timeout(Duration::from_secs(2)),
            Duration::from_millis(10),
        );
        assert!(holdings.is_ok());
        assert_eq!(hub.state().login_code(), Some(0));
    }

    #[test]
    fn test_get_deposit() {
        let (market, _broker, hub) = setup(|_| {});
        assert_eq!(market.get_deposit(&Wait::forever()).unwrap(), 5_000_000);
        assert_eq!(hub.deposits().pending(), 0);
        assert_eq!(market.account_state().cash, Some(5_000_000));
    }

    #[test]
    fn test_concurrent_deposits_do_not_cross() {
        let (market, _broker, hub) = setup(|_| {});
        let market = Arc::new(market);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let market = market.clone();
                std::thread::spawn(move || market.get_deposit(&Wait::forever()).unwrap())
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 5_000_000);
        }
        assert_eq!(hub.deposits().pending(), 0);
    }

    #[test]
    fn test_dispatch_failure_abandons_token() {
        let (market, _broker, hub) = setup(|b| b.fail_dispatch = true);
        assert!(matches!(market.get_deposit(&Wait::forever()), Err(Error::Dispatch(_))));
        assert_eq!(hub.deposits().pending(), 0);

        let order = OrderSpec::market(Side::Buy, "005930", 1);
        assert!(market.place_order(&order, &Wait::forever()).is_err());
        assert_eq!(hub.orders().pending(), 0);
    }

    #[test]
    fn test_cancelled_deposit_wait() {
        let (market, _broker, hub) = setup(|b| b.answer_deposits = false);
        let token = CancelToken::new();
        let canceller = {
            let token = token.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(50));
                token.cancel();
            })
        };

        let res = market.get_deposit(&Wait::forever().cancel_on(token));
        assert!(matches!(res, Err(Error::Cancelled)));
        assert_eq!(hub.deposits().pending(), 0);
        canceller.join().unwrap();
    }

    #[test]
    fn test_condition_flow() {
        let (market, _broker, hub) = setup(|_| {});
        let conditions = market.get_condition_definitions(&Wait::forever()).unwrap();
        assert_eq!(conditions.len(), 1);

        let codes = market
            .get_matching_instruments(&conditions[0].name, conditions[0].index, &Wait::forever())
            .unwrap();
        assert_eq!(codes, vec![InstrumentCode::new("005930"), InstrumentCode::new("000660")]);
        assert_eq!(hub.matches().pending(), 0);
    }

    #[test]
    fn test_late_condition_list_not_handed_to_next_caller() {
        let (market, _broker, hub) = setup(|b| {
            b.first_conditions_delay = Some(Duration::from_millis(100));
        });

        let first = market.get_condition_definitions(&Wait::timeout(Duration::from_millis(20)));
        assert!(matches!(first, Err(Error::TimedOut)));

        // Let the first answer land with nobody waiting for it
        std::thread::sleep(Duration::from_millis(250));
        assert_eq!(hub.conditions().len(), 1);

        let second = market.get_condition_definitions(&Wait::forever()).unwrap();
        assert_eq!(second[0].name, "list-2");
        assert!(hub.conditions().is_empty());
    }

    #[test]
    fn test_unsolicited_login_result_is_discarded() {
        let (market, broker, hub) = setup(|b| {
            b.login_codes = Mutex::new(VecDeque::from([0]));
        });
        broker.send(BrokerEvent::LoginCompleted { code: -100 });
        hub.state()
            .wait_for(
                |_| (hub.logins().len() == 1).then_some(()),
                &Wait::timeout(Duration::from_secs(2)),
                Duration::from_millis(10),
            )
            .unwrap();

        market.initialize(&Wait::timeout(Duration::from_secs(2))).unwrap();
        let logins = broker.requests.lock().iter().filter(|r| *r == "login").count();
        assert_eq!(logins, 1);
        assert!(hub.logins().is_empty());
    }

    #[test]
    fn test_place_order_returns_order_number() {
        let (market, broker, _hub) = setup(|_| {});
        let order = OrderSpec::limit(Side::Sell, "005930", 3, 70_100);
        let order_no = market.place_order(&order, &Wait::forever()).unwrap();
        assert_eq!(order_no.as_str(), "ord-005930");
        assert!(broker.requests.lock().iter().any(|r| r.starts_with("order RequestOrder-005930-")));
    }

    #[test]
    fn test_malformed_order_still_dispatched() {
        let (market, _broker, _hub) = setup(|_| {});
        let mut order = OrderSpec::market(Side::Buy, "005930", 1);
        order.price = 70_000;
        assert!(!order.is_well_formed());
        assert!(market.place_order(&order, &Wait::forever()).is_ok());
    }

    #[test]
    fn test_order_status_waits_for_record() {
        let (market, broker, _hub) = setup(|_| {});
        let order_no = OrderNumber::new("0000042");

        let writer = {
            let broker = broker.clone();
            let order_no = order_no.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(200));
                let written = Instant::now();
                broker.send(BrokerEvent::OrderUpdate {
                    record: OrderRecord {
                        order_no,
                        code: "005930".into(),
                        side: Side::Buy,
                        status: OrderStatus::Rejected,
                        quantity: 1,
                        filled_quantity: 0,
                        price: 0,
                        filled_price: None,
                        message: Some("insufficient cash".into()),
                        updated_at: hms(9, 0, 1),
                    },
                });
                written
            })
        };

        let record = market.get_order_status(&order_no, &Wait::forever()).unwrap();
        let returned = Instant::now();
        let written = writer.join().unwrap();

        assert_eq!(record.status, OrderStatus::Rejected);
        assert!(returned.duration_since(written) <= Duration::from_millis(1100));
    }

    #[test]
    fn test_order_status_times_out() {
        let (market, _broker, _hub) = setup(|_| {});
        let res = market.get_order_status(
            &OrderNumber::new("missing"),
            &Wait::timeout(Duration::from_millis(50)),
        );
        assert!(matches!(res, Err(Error::TimedOut)));
    }

    #[test]
    fn test_stale_price_scenario() {
        let (market, broker, _hub) = setup(|_| {});
        let code = InstrumentCode::new("005930");
        market.register_price_stream(&[code.clone()], false).unwrap();
        broker.send(BrokerEvent::Price { entry: price_at("005930", hms(9, 0, 0)) });

        let snapshot = market.get_price(&code, &Wait::forever()).unwrap();
        assert_eq!(snapshot.entry.code, code);
        assert_eq!(snapshot.freshness, Freshness::Stale);
        assert_eq!(market.staleness_guard().stale_count(), 1);
    }

    #[test]
    fn test_fresh_quote() {
        let (market, broker, _hub) = setup(|_| {});
        let code = InstrumentCode::new("000660");
        market.register_quote_stream(&[code.clone()], true).unwrap();

        let mut bids = [crate::core::QuoteLevel::default(); crate::core::QUOTE_DEPTH];
        let mut asks = bids;
        for i in 0..crate::core::QUOTE_DEPTH {
            bids[i] = crate::core::QuoteLevel { price: 1_000 - 5 * i as i64, size: 10 };
            asks[i] = crate::core::QuoteLevel { price: 1_005 + 5 * i as i64, size: 10 };
        }
        broker.send(BrokerEvent::Quote {
            entry: QuoteEntry { code: code.clone(), time: hms(9, 0, 10), bids, asks },
        });

        let snapshot = market.get_quote(&code, &Wait::forever()).unwrap();
        assert!(!snapshot.is_stale());
        assert_eq!(snapshot.entry.best_ask().price, 1_005);
        assert_eq!(market.staleness_guard().stale_count(), 0);
    }
}
