//! Typed server records
//!
//! A record is either a *stdio* server (a local command we spawn and talk
//! to over its stdin/stdout) or an *http* server (a remote streamable-HTTP
//! endpoint, optionally behind OAuth). Records are created once by the
//! loader and read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// OAuth grant type for HTTP servers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GrantType {
    #[serde(rename = "authorization_code")]
    #[default]
    AuthorizationCode,
    #[serde(rename = "client_credentials")]
    ClientCredentials,
}

/// OAuth block of an HTTP server record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OAuthConfig {
    #[serde(default)]
    pub grant_type: GrantType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Single preferred callback port, merged ahead of the default order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,

    /// Explicit fallback list; when present it fully replaces the default
    /// port search order
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_ports: Option<Vec<u16>>,
}

/// Local subprocess transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioConfig {
    pub command: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Merged over the inherited process environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
}

/// Remote streamable-HTTP transport
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub url: String,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Per-request timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth: Option<OAuthConfig>,
}

/// The two transport kinds a record can carry; construction is pattern
/// matched in the transport factory, never dispatched through trait objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Transport {
    Stdio(StdioConfig),
    Http(HttpConfig),
}

/// One validated server from `mcpServers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerRecord {
    #[serde(skip)]
    pub name: String,

    #[serde(flatten)]
    pub transport: Transport,

    /// Glob patterns; when non-empty only matching tools are exposed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,

    /// Glob patterns; matches are refused unconditionally
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disabled_tools: Vec<String>,
}

/// Map a server name to a safe filename: every character outside
/// `[A-Za-z0-9_-]` becomes `_`. Credential files and daemon sockets both
/// derive their names this way.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl ServerRecord {
    pub fn is_http(&self) -> bool {
        matches!(self.transport, Transport::Http(_))
    }

    pub fn http(&self) -> Option<&HttpConfig> {
        match &self.transport {
            Transport::Http(http) => Some(http),
            Transport::Stdio(_) => None,
        }
    }

    pub fn stdio(&self) -> Option<&StdioConfig> {
        match &self.transport {
            Transport::Stdio(stdio) => Some(stdio),
            Transport::Http(_) => None,
        }
    }
}
