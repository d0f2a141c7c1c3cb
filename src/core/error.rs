//! Error handling - Hierarchical errors for the bridge

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Bridge error hierarchy
///
/// Stale streaming data and partial holdings are deliberately absent: both are
/// reported as ordinary data, never as failures.
#[derive(Debug, Error)]
pub enum Error {
    /// Token was never issued, or its response was already consumed
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Caller-chosen key is already waiting for a response
    #[error("Token already in flight: {0}")]
    DuplicateToken(String),

    /// Wait was cancelled through a `CancelToken`
    #[error("Wait cancelled")]
    Cancelled,

    /// Wait deadline passed before a response arrived
    #[error("Wait timed out")]
    TimedOut,

    /// The event-delivery side went away while a caller was waiting
    #[error("Event source disconnected")]
    Disconnected,

    /// Request could not be handed to the broker connection
    #[error("Dispatch error: {0}")]
    Dispatch(String),

    /// Thread spawn and other OS-level failures
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}
