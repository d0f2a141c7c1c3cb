//! Simulated broker connection - owns the virtual exchange thread

use parking_lot::Mutex;
use std::thread::JoinHandle;
use std::time::Instant;
use tracing::{debug, info};

use crate::core::{Error, InstrumentCode, OrderSpec, RequestDispatcher, Result, SimConfig};
use crate::correlator::RequestToken;
use crate::events::BrokerEvent;
use crate::sim::exchange::VirtualExchange;

#[derive(Debug)]
enum Command {
    Login,
    AccountNumber,
    Balance,
    Conditions,
    Search { name: String },
    Deposit { token: RequestToken },
    Order { spec: OrderSpec, token: RequestToken },
    RegisterPrice { codes: Vec<InstrumentCode>, replace: bool },
    RegisterQuote { codes: Vec<InstrumentCode>, replace: bool },
}

/// Request dispatcher backed by a `VirtualExchange` on its own thread.
///
/// Requests are queued to the exchange thread, which answers on the event
/// channel and ticks the market every change interval.
pub struct SimBroker {
    commands: Mutex<Option<flume::Sender<Command>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SimBroker {
    pub fn start(config: SimConfig, events: flume::Sender<BrokerEvent>) -> std::io::Result<Self> {
        let (tx, rx) = flume::unbounded::<Command>();
        let interval = config.change_interval();
        let mut exchange = VirtualExchange::new(config, events);

        let handle = std::thread::Builder::new()
            .name("sim-exchange".into())
            .spawn(move || {
                info!("Virtual exchange started (tick every {:?})", interval);
                let mut next_tick = Instant::now() + interval;
                loop {
                    match rx.recv_deadline(next_tick) {
                        Ok(command) => handle_command(&mut exchange, command),
                        Err(flume::RecvTimeoutError::Timeout) => {
                            exchange.tick();
                            next_tick += interval;
                            // Skip ticks missed under load instead of bursting
                            let now = Instant::now();
                            if next_tick < now {
                                next_tick = now + interval;
                            }
                        }
                        Err(flume::RecvTimeoutError::Disconnected) => break,
                    }
                }
                info!("Virtual exchange stopped");
            })?;

        Ok(Self {
            commands: Mutex::new(Some(tx)),
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Stop the exchange thread and wait for it. Later requests fail.
    pub fn shutdown(&self) {
        self.commands.lock().take();
        if let Some(handle) = self.handle.lock().take() {
            let _ = handle.join();
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        debug!("sim <- {:?}", command);
        let commands = self.commands.lock();
        let tx = commands
            .as_ref()
            .ok_or_else(|| Error::Dispatch("simulated broker is shut down".into()))?;
        tx.send(command)
            .map_err(|_| Error::Dispatch("simulated exchange thread is gone".into()))
    }
}

impl Drop for SimBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn handle_command(exchange: &mut VirtualExchange, command: Command) {
    match command {
        Command::Login => exchange.login(),
        Command::AccountNumber => exchange.account_number(),
        Command::Balance => exchange.balance(),
        Command::Conditions => exchange.conditions(),
        Command::Search { name } => exchange.condition_search(name),
        Command::Deposit { token } => exchange.deposit(token),
        Command::Order { spec, token } => exchange.order(spec, token),
        Command::RegisterPrice { codes, replace } => exchange.register_price(codes, replace),
        Command::RegisterQuote { codes, replace } => exchange.register_quote(codes, replace),
    }
}

impl RequestDispatcher for SimBroker {
    fn request_login(&self) -> Result<()> {
        self.send(Command::Login)
    }

    fn request_account_number(&self) -> Result<()> {
        self.send(Command::AccountNumber)
    }

    fn request_balance(&self, _token: &RequestToken) -> Result<()> {
        self.send(Command::Balance)
    }

    fn request_conditions(&self) -> Result<()> {
        self.send(Command::Conditions)
    }

    fn request_condition_search(&self, name: &str, _index: u32) -> Result<()> {
        self.send(Command::Search { name: name.to_string() })
    }

    fn request_deposit(&self, token: &RequestToken) -> Result<()> {
        self.send(Command::Deposit { token: token.clone() })
    }

    fn request_order(&self, order: &OrderSpec, token: &RequestToken) -> Result<()> {
        self.send(Command::Order { spec: order.clone(), token: token.clone() })
    }

    fn register_price(&self, codes: &[InstrumentCode], replace: bool) -> Result<()> {
        self.send(Command::RegisterPrice { codes: codes.to_vec(), replace })
    }

    fn register_quote(&self, codes: &[InstrumentCode], replace: bool) -> Result<()> {
        self.send(Command::RegisterQuote { codes: codes.to_vec(), replace })
    }
}
