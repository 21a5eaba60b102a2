//! Connection facade error types

use mcpq_transport::TransportError;
use thiserror::Error;

/// Connection result type
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Errors surfaced by the connection facade
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// The tool is filtered out by this record; refused locally, the
    /// server is never contacted.
    #[error("Tool '{tool}' is disabled for server '{server}'")]
    ToolDisabled { server: String, tool: String },

    /// Tool arguments were not a JSON object
    #[error("Invalid tool arguments: {message}")]
    InvalidArguments { message: String },

    /// Underlying transport/auth failure (direct path)
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A daemon-served request failed remotely
    #[error("Server '{server}' request failed: {message}")]
    DaemonRequest { server: String, message: String },
}

impl ConnectionError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            ConnectionError::ToolDisabled { .. } => "TOOL_DISABLED",
            ConnectionError::InvalidArguments { .. } => "INVALID_JSON_ARGUMENTS",
            ConnectionError::Transport(inner) => inner.code(),
            ConnectionError::DaemonRequest { .. } => "TOOL_EXECUTION_FAILED",
        }
    }
}
