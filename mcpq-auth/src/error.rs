//! Authentication error types

use thiserror::Error;

/// Authentication result type
pub type AuthResult<T> = Result<T, AuthError>;

/// Where in the authorization flow a failure happened; drives the
/// cause-specific suggestion shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowStage {
    Listener,
    Authorization,
    Callback,
    Timeout,
    TokenExchange,
    Refresh,
}

impl FlowStage {
    pub fn suggestion(&self) -> &'static str {
        match self {
            FlowStage::Listener => {
                "free one of the configured callback ports, or set oauth.callbackPorts"
            }
            FlowStage::Authorization => "check the server's OAuth configuration and try again",
            FlowStage::Callback => {
                "complete the authorization in the browser, then re-run the command"
            }
            FlowStage::Timeout => "re-run the command and finish the browser flow within 5 minutes",
            FlowStage::TokenExchange => {
                "the authorization code may have expired; re-run to restart the flow"
            }
            FlowStage::Refresh => "stored tokens were rejected; re-run to re-authorize",
        }
    }
}

/// Authentication errors
#[derive(Error, Debug)]
pub enum AuthError {
    /// The oauth block is unusable as configured
    #[error("OAuth configuration error: {message}")]
    Config { message: String },

    /// The authorization flow failed at a specific stage
    #[error("OAuth flow failed ({stage:?}): {message}")]
    Flow { stage: FlowStage, message: String },

    /// Authorization is required but the provider is non-interactive;
    /// carries the captured authorization URL for the caller to display
    #[error("Authorization required; open this URL to authorize: {url}")]
    AuthRequired { url: String },

    /// Credential store write failure (reads are forgiving and never error)
    #[error("Credential store error: {message}")]
    Storage { message: String },
}

impl AuthError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn flow(stage: FlowStage, message: impl Into<String>) -> Self {
        Self::Flow {
            stage,
            message: message.into(),
        }
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Config { .. } => "OAUTH_CONFIG_ERROR",
            AuthError::Flow { .. } => "OAUTH_FLOW_ERROR",
            AuthError::AuthRequired { .. } => "AUTH_REQUIRED",
            AuthError::Storage { .. } => "OAUTH_FLOW_ERROR",
        }
    }

    /// Recovery suggestion, when the failure has a useful one.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            AuthError::Flow { stage, .. } => Some(stage.suggestion()),
            AuthError::AuthRequired { .. } => {
                Some("open the URL in a browser, then re-run the command")
            }
            _ => None,
        }
    }
}
