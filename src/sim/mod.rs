//! Simulated broker - a virtual market behind the real event plumbing
//!
//! Used by the demo binary and end-to-end tests. Fills are instant, prices
//! follow a bounded random walk on a fixed price unit.

pub mod broker;
pub mod exchange;

pub use broker::SimBroker;
pub use exchange::{SIM_ACCOUNT_NUMBER, VirtualExchange, sim_conditions};

use std::sync::Arc;
use std::thread::JoinHandle;

use crate::core::{BridgeConfig, Result};
use crate::events::{EventHub, spawn_event_pump};
use crate::market::Market;

/// A facade wired to a running simulated broker
pub struct SimSession {
    market: Market,
    broker: Arc<SimBroker>,
    pump: Option<JoinHandle<()>>,
}

impl SimSession {
    pub fn start(config: &BridgeConfig) -> Result<Self> {
        let hub = Arc::new(EventHub::new());
        let (tx, rx) = flume::unbounded();
        let pump = spawn_event_pump(rx, hub.clone())?;
        let broker = Arc::new(SimBroker::start(config.sim.clone(), tx)?);
        let market = Market::new(broker.clone(), hub, config.market.clone());
        Ok(Self { market, broker, pump: Some(pump) })
    }

    pub fn market(&self) -> &Market {
        &self.market
    }

    /// Stop the exchange, then let the event pump drain and exit
    pub fn shutdown(mut self) {
        self.broker.shutdown();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Freshness, InstrumentCode, OrderSpec, OrderStatus, Side};
    use crate::wait::Wait;
    use std::time::Duration;

    fn session() -> SimSession {
        let mut config = BridgeConfig::default();
        config.sim.seed = Some(42);
        config.market.poll_interval_ms = 100;
        SimSession::start(&config).unwrap()
    }

    fn bounded() -> Wait {
        Wait::timeout(Duration::from_secs(5))
    }

    #[test]
    fn test_full_session() {
        let session = session();
        let market = session.market();

        market.initialize(&bounded()).unwrap();
        assert_eq!(market.get_deposit(&bounded()).unwrap(), 10_000_000);
        let account = market.account_state();
        assert_eq!(account.login_code, Some(0));

        let conditions = market.get_condition_definitions(&bounded()).unwrap();
        assert_eq!(conditions, sim_conditions());
        let matches = market
            .get_matching_instruments(&conditions[0].name, conditions[0].index, &bounded())
            .unwrap();
        assert!(matches.len() <= 6);

        let code = InstrumentCode::new("005930");
        let order_no = market
            .place_order(&OrderSpec::market(Side::Buy, code.clone(), 10), &bounded())
            .unwrap();
        let record = market.get_order_status(&order_no, &bounded()).unwrap();
        assert_eq!(record.status, OrderStatus::Filled);
        assert_eq!(record.filled_quantity, 10);

        let holding = market
            .state()
            .wait_for(|s| s.holding(&code), &bounded(), Duration::from_millis(50))
            .unwrap();
        assert_eq!(holding.quantity, 10);
        assert_eq!(market.account_state().account_number.as_deref(), Some(SIM_ACCOUNT_NUMBER));

        session.shutdown();
    }

    #[test]
    fn test_streaming_reads() {
        let session = session();
        let market = session.market();
        let code = InstrumentCode::new("000660");

        market.register_price_stream(&[code.clone()], false).unwrap();
        market.register_quote_stream(&[code.clone()], false).unwrap();

        let price = market.get_price(&code, &bounded()).unwrap();
        assert_eq!(price.entry.code, code);
        assert_eq!(price.freshness, Freshness::Ordinary);

        let quote = market.get_quote(&code, &bounded()).unwrap();
        assert!(quote.entry.best_bid().price < quote.entry.best_ask().price);

        session.shutdown();
    }

    #[test]
    fn test_requests_fail_after_shutdown() {
        let session = session();
        session.broker.shutdown();
        assert!(session.market().get_deposit(&bounded()).is_err());
        assert_eq!(session.market().state().cash(), None);
    }
}
