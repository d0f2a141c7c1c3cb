//! Single-slot handoffs between the event thread and caller threads

use std::sync::atomic::{AtomicBool, Ordering};

use crate::core::Result;
use crate::wait::Wait;

/// Produce-once / consume-once slot.
///
/// Exactly one `fill` succeeds and exactly one caller may `claim` the right to
/// take the value. Built on a bounded(1) channel so the producer never blocks.
pub struct Rendezvous<T> {
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,
    filled: AtomicBool,
    claimed: AtomicBool,
}

impl<T> Rendezvous<T> {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(1);
        Self {
            tx,
            rx,
            filled: AtomicBool::new(false),
            claimed: AtomicBool::new(false),
        }
    }

    /// Deposit the value. Returns false if the slot was already filled.
    pub fn fill(&self, value: T) -> bool {
        if self.filled.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.tx.try_send(value).is_ok()
    }

    pub fn is_filled(&self) -> bool {
        self.filled.load(Ordering::Acquire)
    }

    /// Reserve the single consumer role. Returns false for every later caller.
    pub fn claim(&self) -> bool {
        !self.claimed.swap(true, Ordering::AcqRel)
    }

    /// Block until the value arrives or `wait` ends
    pub fn take(&self, wait: &Wait) -> Result<T> {
        wait.recv(&self.rx)
    }
}

impl<T> Default for Rendezvous<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Reusable, unkeyed FIFO handoff.
///
/// Used for responses that carry no request key (login result, condition
/// list). Concurrent waiters may receive each other's value.
pub struct Mailbox<T> {
    tx: flume::Sender<T>,
    rx: flume::Receiver<T>,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        let (tx, rx) = flume::unbounded();
        Self { tx, rx }
    }

    pub fn post(&self, value: T) {
        // Both ends live in `self`, so the channel cannot be disconnected here
        let _ = self.tx.send(value);
    }

    pub fn recv(&self, wait: &Wait) -> Result<T> {
        wait.recv(&self.rx)
    }

    /// Discard and return everything posted but not yet received
    pub fn drain(&self) -> Vec<T> {
        self.rx.drain().collect()
    }

    /// Values posted but not yet received
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}
