//! Wait policies - deadlines and cancellation for every blocking call
//!
//! All facade waits are unbounded by default. A `Wait` lets a caller bound
//! them with a deadline, a `CancelToken`, or both.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::core::{Error, Result};

/// Cooperative cancellation flag shared between a controller and waiters.
///
/// Cancelling drops the only sender of an internal channel, which wakes every
/// correlated wait selecting on it at once.
#[derive(Clone)]
pub struct CancelToken {
    trigger: Arc<Mutex<Option<flume::Sender<()>>>>,
    signal: flume::Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = flume::bounded(0);
        Self {
            trigger: Arc::new(Mutex::new(Some(tx))),
            signal: rx,
        }
    }

    /// Cancel every wait observing this token. Idempotent.
    pub fn cancel(&self) {
        self.trigger.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_disconnected()
    }

    pub(crate) fn signal(&self) -> &flume::Receiver<()> {
        &self.signal
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// How long a blocking call may wait
#[derive(Debug, Clone, Default)]
pub struct Wait {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl Wait {
    /// No deadline, no cancellation
    pub fn forever() -> Self {
        Self::default()
    }

    pub fn timeout(timeout: Duration) -> Self {
        Self::until(Instant::now() + timeout)
    }

    pub fn until(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancel: None,
        }
    }

    /// Also give up when `token` is cancelled
    pub fn cancel_on(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Fail fast when the wait is already over
    pub fn check(&self) -> Result<()> {
        if let Some(token) = &self.cancel
            && token.is_cancelled()
        {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline
            && Instant::now() >= deadline
        {
            return Err(Error::TimedOut);
        }
        Ok(())
    }

    /// Length of the next sleep: `max`, shortened to the remaining time.
    /// Errors once the wait is over.
    pub(crate) fn slice(&self, max: Duration) -> Result<Duration> {
        self.check()?;
        Ok(match self.deadline {
            Some(deadline) => max.min(deadline.saturating_duration_since(Instant::now())),
            None => max,
        })
    }

    /// Sleep for up to `max`, or less when the wait ends sooner
    pub(crate) fn sleep(&self, max: Duration) -> Result<()> {
        let nap = self.slice(max)?;
        match &self.cancel {
            // Disconnection of the signal channel ends the nap early
            Some(token) => {
                let _ = token.signal().recv_timeout(nap);
            }
            None => std::thread::sleep(nap),
        }
        self.check()
    }

    /// Receive one value from `rx` under this policy
    pub(crate) fn recv<T>(&self, rx: &flume::Receiver<T>) -> Result<T> {
        let Some(token) = &self.cancel else {
            return match self.deadline {
                None => rx.recv().map_err(|_| Error::Disconnected),
                Some(deadline) => rx.recv_deadline(deadline).map_err(|e| match e {
                    flume::RecvTimeoutError::Timeout => Error::TimedOut,
                    flume::RecvTimeoutError::Disconnected => Error::Disconnected,
                }),
            };
        };

        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let selector = flume::Selector::new()
            .recv(rx, |res| res.map_err(|_| Error::Disconnected))
            .recv(token.signal(), |_| Err(Error::Cancelled));

        match self.deadline {
            None => selector.wait(),
            Some(deadline) => selector
                .wait_deadline(deadline)
                .unwrap_or(Err(Error::TimedOut)),
        }
    }
}
