//! Core traits - Seams to the broker connection and the wall clock

use chrono::NaiveTime;

use crate::core::{InstrumentCode, OrderSpec, PriceEntry, QuoteEntry, Result};
use crate::correlator::RequestToken;

/// Request dispatch side of the broker connection.
///
/// Every call only transmits; results come back later as `BrokerEvent`s on the
/// event-delivery thread. An `Err` means the request never left.
pub trait RequestDispatcher: Send + Sync {
    /// Start (or restart) the login handshake
    fn request_login(&self) -> Result<()>;

    /// Ask for the account number of the logged-in user
    fn request_account_number(&self) -> Result<()>;

    /// Ask for the holdings set; answered through state writes, not the token
    fn request_balance(&self, token: &RequestToken) -> Result<()>;

    /// Ask for the stored condition definitions
    fn request_conditions(&self) -> Result<()>;

    /// Run a condition search; the response is keyed by `name`
    fn request_condition_search(&self, name: &str, index: u32) -> Result<()>;

    /// Ask for the orderable cash amount
    fn request_deposit(&self, token: &RequestToken) -> Result<()>;

    /// Submit an order
    fn request_order(&self, order: &OrderSpec, token: &RequestToken) -> Result<()>;

    /// Start streaming trade ticks; `replace` drops earlier registrations
    fn register_price(&self, codes: &[InstrumentCode], replace: bool) -> Result<()>;

    /// Start streaming ten-level quotes; `replace` drops earlier registrations
    fn register_quote(&self, codes: &[InstrumentCode], replace: bool) -> Result<()>;
}

/// Source of the current time of day
pub trait Clock: Send + Sync {
    fn time_of_day(&self) -> NaiveTime;
}

/// Local wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn time_of_day(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

/// Streaming entry with an embedded event time
pub trait Timestamped {
    fn code(&self) -> &InstrumentCode;
    fn event_time(&self) -> NaiveTime;
}

impl Timestamped for PriceEntry {
    fn code(&self) -> &InstrumentCode {
        &self.code
    }

    fn event_time(&self) -> NaiveTime {
        self.time
    }
}

impl Timestamped for QuoteEntry {
    fn code(&self) -> &InstrumentCode {
        &self.code
    }

    fn event_time(&self) -> NaiveTime {
        self.time
    }
}
