//! Request correlation - turns push-style broker callbacks into blocking calls
//!
//! Each outstanding request owns one `Rendezvous` slot in the table, keyed by
//! its token. The entry lives from `issue`/`open` until the single response is
//! consumed (or the wait is abandoned), then it is removed.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::core::{Error, Result};
use crate::rendezvous::Rendezvous;
use crate::wait::Wait;

/// Identifier correlating one outgoing request with its one response
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestToken(String);

impl RequestToken {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Token table for one response type
pub struct Correlator<T> {
    name: &'static str,
    table: RwLock<HashMap<RequestToken, Arc<Rendezvous<T>>>>,
    counter: AtomicU64,
}

impl<T> Correlator<T> {
    /// `name` only labels log lines
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            table: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Fresh `"{tag}-{n}"` token with no slot behind it.
    ///
    /// For named requests whose answer arrives through state writes.
    pub fn mint(&self, tag: &str) -> RequestToken {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        RequestToken(format!("{}-{}", tag, n))
    }

    /// Create a token and its empty slot
    pub fn issue(&self, tag: &str) -> RequestToken {
        let mut table = self.table.write();
        loop {
            let token = self.mint(tag);
            // A caller-chosen key from `open` may shadow a minted name
            if let Entry::Vacant(slot) = table.entry(token.clone()) {
                slot.insert(Arc::new(Rendezvous::new()));
                debug!(correlator = self.name, %token, "issued");
                return token;
            }
        }
    }

    /// Create a slot under a caller-chosen key
    pub fn open(&self, token: RequestToken) -> Result<RequestToken> {
        match self.table.write().entry(token.clone()) {
            Entry::Occupied(_) => Err(Error::DuplicateToken(token.0)),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(Rendezvous::new()));
                debug!(correlator = self.name, %token, "opened");
                Ok(token)
            }
        }
    }

    /// Block until the response for `token` arrives, then drop the entry.
    ///
    /// The entry is dropped as well when the wait ends without a value, so a
    /// late delivery is treated like any unknown token.
    pub fn await_value(&self, token: &RequestToken, wait: &Wait) -> Result<T> {
        let slot = self
            .table
            .read()
            .get(token)
            .cloned()
            .ok_or_else(|| Error::InvalidToken(token.0.clone()))?;

        if !slot.claim() {
            return Err(Error::InvalidToken(token.0.clone()));
        }

        let result = slot.take(wait);
        self.retire(token, &slot, result.is_err());
        result
    }

    /// Hand a response to whoever waits on `token`.
    ///
    /// Unknown or already-answered tokens are dropped with a warning; late and
    /// duplicate deliveries are expected when the broker retries.
    pub fn deliver(&self, token: &RequestToken, value: T) -> bool {
        // Fill under the read lock so `retire` sees every landed value
        let table = self.table.read();
        let Some(slot) = table.get(token) else {
            warn!(correlator = self.name, %token, "dropping delivery for unknown token");
            return false;
        };
        if slot.fill(value) {
            debug!(correlator = self.name, %token, "delivered");
            true
        } else {
            warn!(correlator = self.name, %token, "dropping duplicate delivery");
            false
        }
    }

    /// Forget a token whose request never reached the broker
    pub fn abandon(&self, token: &RequestToken) -> bool {
        let removed = self.table.write().remove(token).is_some();
        if removed {
            debug!(correlator = self.name, %token, "abandoned");
        }
        removed
    }

    pub fn contains(&self, token: &RequestToken) -> bool {
        self.table.read().contains_key(token)
    }

    /// Number of requests still waiting for a response or a consumer
    pub fn pending(&self) -> usize {
        self.table.read().len()
    }

    /// Remove `slot` from the table. Returns true when a value landed after
    /// the wait had already given up, and is dropped with it.
    fn retire(&self, token: &RequestToken, slot: &Arc<Rendezvous<T>>, gave_up: bool) -> bool {
        {
            let mut table = self.table.write();
            if table.get(token).is_some_and(|current| Arc::ptr_eq(current, slot)) {
                table.remove(token);
            }
        }
        let dropped = gave_up && slot.is_filled();
        if dropped {
            warn!(correlator = self.name, %token, "dropping value delivered after the wait ended");
        }
        dropped
    }
}
