//! User-facing error rendering and exit codes
//!
//! Every failure leaving the CLI shares one shape on stderr:
//!
//! ```text
//! Error [<TYPE>]: <message>
//!   Details: <...>
//!   Suggestion: <...>
//! ```
//!
//! The `<TYPE>` codes are stable so LLM-driven callers can branch on them.

use mcpq_auth::AuthError;
use mcpq_config::ConfigError;
use mcpq_connection::ConnectionError;
use mcpq_transport::TransportError;
use thiserror::Error;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Unknown subcommand \"{given}\"")]
    UnknownSubcommand {
        given: String,
        intended: Option<&'static str>,
    },

    #[error("Cannot tell whether '{server}' names a server or a subcommand")]
    AmbiguousCommand {
        server: String,
        tool: String,
        json: Option<String>,
    },

    #[error("Missing argument: {what}")]
    MissingArgument { what: String },

    #[error("Too many arguments for '{command}'")]
    TooManyArguments { command: String },

    #[error("Invalid target '{given}'")]
    InvalidTarget { given: String },

    #[error("Unknown option: {message}")]
    UnknownOption { message: String },

    #[error("Invalid JSON arguments: {message}")]
    InvalidJsonArguments { message: String },

    #[error("Tool '{tool}' not found on server '{server}'")]
    ToolNotFound {
        server: String,
        tool: String,
        available: Vec<String>,
    },

    /// The server executed the tool and reported failure
    #[error("Tool '{tool}' on server '{server}' reported an error")]
    ToolExecutionFailed { server: String, tool: String },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl CliError {
    pub fn code(&self) -> &'static str {
        match self {
            CliError::UnknownSubcommand { .. } => "UNKNOWN_SUBCOMMAND",
            CliError::AmbiguousCommand { .. } => "AMBIGUOUS_COMMAND",
            CliError::MissingArgument { .. } => "MISSING_ARGUMENT",
            CliError::TooManyArguments { .. } => "TOO_MANY_ARGUMENTS",
            CliError::InvalidTarget { .. } => "INVALID_TARGET",
            CliError::UnknownOption { .. } => "UNKNOWN_OPTION",
            CliError::InvalidJsonArguments { .. } => "INVALID_JSON_ARGUMENTS",
            CliError::ToolNotFound { .. } => "TOOL_NOT_FOUND",
            CliError::ToolExecutionFailed { .. } => "TOOL_EXECUTION_FAILED",
            CliError::Config(inner) => inner.code(),
            CliError::Connection(inner) => inner.code(),
            CliError::Transport(inner) => inner.code(),
            CliError::Auth(inner) => inner.code(),
        }
    }

    /// Process exit code: 1 client error, 2 remote tool failure,
    /// 3 network, 4 authentication.
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            "TOOL_EXECUTION_FAILED" => 2,
            "SERVER_CONNECTION_FAILED" => 3,
            "OAUTH_CONFIG_ERROR" | "OAUTH_FLOW_ERROR" | "AUTH_REQUIRED" => 4,
            _ => 1,
        }
    }

    fn details(&self) -> Option<String> {
        match self {
            CliError::AmbiguousCommand { .. } => {
                Some("the first argument matches no subcommand".to_string())
            }
            CliError::ToolNotFound { available, .. } if !available.is_empty() => {
                Some(format!("available tools: {}", available.join(", ")))
            }
            _ => None,
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            CliError::UnknownSubcommand { intended, given } => match intended {
                Some(intended) => Some(format!("did you mean `{intended}`? e.g. mcpq {intended}")),
                None => Some(format!(
                    "run `mcpq --help` for the command list, or `mcpq info {given}` if '{given}' is a server"
                )),
            },
            CliError::AmbiguousCommand { server, tool, json } => {
                let json = json.clone().unwrap_or_else(|| "'{}'".to_string());
                Some(format!(
                    "use `mcpq call {server} {tool} {json}` to invoke, or `mcpq info {server} {tool}` to inspect"
                ))
            }
            CliError::MissingArgument { .. } | CliError::UnknownOption { .. } => {
                Some("run `mcpq --help` for usage".to_string())
            }
            CliError::InvalidTarget { .. } => {
                Some("targets are `<server> <tool>` or `<server>/<tool>`".to_string())
            }
            CliError::InvalidJsonArguments { .. } => {
                Some("tool arguments must be a single JSON object, e.g. '{\"path\": \"/tmp\"}'".to_string())
            }
            CliError::ToolNotFound { server, .. } => {
                Some(format!("run `mcpq info {server}` to list this server's tools"))
            }
            CliError::ToolExecutionFailed { .. } => {
                Some("the raw result on stdout carries the server's error detail".to_string())
            }
            CliError::Auth(auth) => auth.suggestion().map(str::to_string),
            CliError::Connection(ConnectionError::Transport(TransportError::Auth(auth))) => {
                auth.suggestion().map(str::to_string)
            }
            CliError::Transport(TransportError::Auth(auth)) => auth.suggestion().map(str::to_string),
            _ => None,
        }
    }

    /// Write the shared error shape to stderr.
    pub fn render(&self) {
        eprintln!("Error [{}]: {}", self.code(), self);
        if let Some(details) = self.details() {
            eprintln!("  Details: {details}");
        }
        if let Some(suggestion) = self.suggestion() {
            eprintln!("  Suggestion: {suggestion}");
        }
    }
}
