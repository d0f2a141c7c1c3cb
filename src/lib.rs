//! Market Bridge - Core Library
//! Synchronous, thread-safe trading API over an event-driven broker connection

// Public modules
pub mod core;
pub mod wait;
pub mod rendezvous;
pub mod correlator;
pub mod state;
pub mod staleness;
pub mod events;
pub mod market;
pub mod sim;

// Re-exports
pub use crate::core::{BridgeConfig, Error, Result};
pub use correlator::{Correlator, RequestToken};
pub use events::{BrokerEvent, EventHub, spawn_event_pump};
pub use market::Market;
pub use wait::{CancelToken, Wait};
