//! Transport error types

use mcpq_auth::AuthError;
use mcpq_resilience::{is_transient_message, Retryable};
use thiserror::Error;

/// Transport result type
pub type TransportResult<T> = Result<T, TransportError>;

/// Errors building or using an MCP session
#[derive(Error, Debug)]
pub enum TransportError {
    /// Could not establish the session. For stdio servers the message
    /// carries the captured tail of the child's stderr.
    #[error("Failed to connect to server '{server}': {message}")]
    ConnectionFailed { server: String, message: String },

    /// An established session rejected or failed an operation
    #[error("Server '{server}' request failed: {message}")]
    RequestFailed { server: String, message: String },

    /// The session was already closed
    #[error("Session for '{server}' is closed")]
    Closed { server: String },

    /// Authentication layer failure (flow error, AUTH_REQUIRED, ...)
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl TransportError {
    pub fn connection(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    pub fn request(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::RequestFailed {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            TransportError::ConnectionFailed { .. } => "SERVER_CONNECTION_FAILED",
            TransportError::RequestFailed { .. } => "TOOL_EXECUTION_FAILED",
            TransportError::Closed { .. } => "SERVER_CONNECTION_FAILED",
            TransportError::Auth(auth) => auth.code(),
        }
    }

    /// Whether this failure looks like the server demanding OAuth
    /// (401 / invalid token) rather than being down.
    pub fn is_auth_required_signal(&self) -> bool {
        match self {
            TransportError::ConnectionFailed { message, .. } => {
                let lowered = message.to_lowercase();
                lowered.contains("401")
                    || lowered.contains("unauthorized")
                    || lowered.contains("invalid_token")
            }
            _ => false,
        }
    }
}

impl Retryable for TransportError {
    fn is_retryable(&self) -> bool {
        match self {
            // Auth demands must surface to the flow, not be retried
            TransportError::ConnectionFailed { message, .. } => {
                !self.is_auth_required_signal() && is_transient_message(message)
            }
            TransportError::RequestFailed { message, .. } => is_transient_message(message),
            TransportError::Closed { .. } => false,
            TransportError::Auth(_) => false,
        }
    }
}
