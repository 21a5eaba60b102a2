//! Server catalogue management for mcpq
//!
//! This crate owns everything the CLI knows about configured MCP servers
//! before a connection exists: discovering and parsing `mcp.json`,
//! validating its structure, expanding `${VAR}` references, exposing
//! typed per-server records, matching tools against allow/deny globs,
//! and computing the stable per-record hash the daemon layer uses for
//! staleness detection.

pub mod error;
pub mod filter;
pub mod hash;
pub mod loader;
pub mod record;
pub mod subst;

pub use error::{ConfigError, ConfigResult, ValidationIssue};
pub use filter::is_tool_allowed;
pub use hash::config_hash;
pub use loader::{Catalogue, ConfigLoader};
pub use record::{
    sanitize_name, GrantType, HttpConfig, OAuthConfig, ServerRecord, StdioConfig, Transport,
};
