//! Configuration error types

use std::path::PathBuf;
use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// One structural problem found during validation, rooted at its JSON path
/// (e.g. `mcpServers.github.oauth.grantType`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No configuration file was found anywhere on the search path
    #[error("No configuration file found (searched: {})", format_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    /// IO error reading the configuration file
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file exists but is not valid JSON
    #[error("Failed to parse {path}: {message}")]
    InvalidJson { path: PathBuf, message: String },

    /// The JSON parses but violates the expected shape
    #[error("Invalid configuration ({} issue(s)):\n{}", .issues.len(), format_issues(.issues))]
    ValidationFailed { issues: Vec<ValidationIssue> },

    /// Strict-mode environment substitution found unset variables
    #[error("Unset environment variable(s): {}", .names.join(", "))]
    MissingEnvVars { names: Vec<String> },

    /// A server name was requested that the catalogue does not contain
    #[error("Server '{name}' not found (available: {})", .available.join(", "))]
    ServerNotFound { name: String, available: Vec<String> },
}

impl ConfigError {
    /// Stable machine-readable code for this error, suitable for agents
    /// that parse stderr.
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::NotFound { .. } => "CONFIG_NOT_FOUND",
            ConfigError::Io { .. } => "CONFIG_NOT_FOUND",
            ConfigError::InvalidJson { .. } => "CONFIG_INVALID_JSON",
            ConfigError::ValidationFailed { .. } => "CONFIG_VALIDATION_FAILED",
            ConfigError::MissingEnvVars { .. } => "MISSING_ENV_VAR",
            ConfigError::ServerNotFound { .. } => "SERVER_NOT_FOUND",
        }
    }
}

fn format_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn format_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(|i| format!("  - {}", i))
        .collect::<Vec<_>>()
        .join("\n")
}
