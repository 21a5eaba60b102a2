//! Daemon error types
//!
//! These never reach the user: the daemon client logs them at debug and
//! returns "no daemon" so the facade falls back to a direct connection.

use thiserror::Error;

/// Daemon result type
pub type DaemonResult<T> = Result<T, DaemonError>;

/// Daemon-path errors
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Socket/file IO failure
    #[error("daemon io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed frame on the socket
    #[error("daemon protocol error: {0}")]
    Protocol(String),

    /// The worker reported a failure for this request
    #[error("daemon request failed: {0}")]
    Remote(String),

    /// A socket operation exceeded the 5 second daemon deadline
    #[error("daemon request timed out")]
    Timeout,

    /// The worker never became ready
    #[error("daemon spawn failed: {0}")]
    SpawnFailed(String),
}

impl DaemonError {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn spawn(message: impl Into<String>) -> Self {
        Self::SpawnFailed(message.into())
    }
}
