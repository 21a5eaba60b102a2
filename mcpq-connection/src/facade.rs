//! Connection facade
//!
//! Daemon first, direct second: the facade asks the daemon client for a
//! warm handle and falls through to a retried direct connection on any
//! daemon-path failure. Closing a daemon-backed connection only drops the
//! local handle; the daemon keeps its session warm for the next
//! invocation.

use serde_json::Value;
use std::path::PathBuf;
use tokio::time::Instant;
use tracing::debug;

use mcpq_auth::{AuthMode, CredentialStore};
use mcpq_config::{is_tool_allowed, ServerRecord};
use mcpq_resilience::{RetryExecutor, RetryPolicy};
use mcpq_transport::{global_timeout, CallOutcome, McpSession, ToolDescriptor, TransportFactory};

use crate::error::{ConnectionError, ConnectionResult};

/// How a connection should be established.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Explicit config path, forwarded to spawned daemon workers
    pub config_path: Option<PathBuf>,
    /// Whether OAuth flows may open a browser
    pub auth_mode: AuthMode,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            config_path: None,
            auth_mode: AuthMode::Interactive,
        }
    }
}

enum ConnectionKind {
    #[cfg(unix)]
    Daemon(mcpq_daemon::DaemonHandle),
    Direct(McpSession),
}

/// One open connection to one server, daemon-backed or direct.
pub struct ServerConnection {
    record: ServerRecord,
    kind: Option<ConnectionKind>,
}

impl ServerConnection {
    /// Connect to `record`, preferring its daemon.
    pub async fn connect(
        record: &ServerRecord,
        options: &ConnectOptions,
    ) -> ConnectionResult<Self> {
        #[cfg(unix)]
        {
            let daemon_client = mcpq_daemon::DaemonClient::new(options.config_path.clone());
            if let Some(handle) = daemon_client.acquire(record).await {
                debug!(server = %record.name, "using daemon-backed connection");
                return Ok(Self {
                    record: record.clone(),
                    kind: Some(ConnectionKind::Daemon(handle)),
                });
            }
        }

        let session = Self::connect_direct(record, options).await?;
        Ok(Self {
            record: record.clone(),
            kind: Some(ConnectionKind::Direct(session)),
        })
    }

    /// Direct connection with the retry executor wrapped around the
    /// transport factory; only the final attempt's error surfaces.
    async fn connect_direct(
        record: &ServerRecord,
        options: &ConnectOptions,
    ) -> ConnectionResult<McpSession> {
        let store = CredentialStore::from_env().map_err(mcpq_transport::TransportError::from)?;
        let factory = TransportFactory::new(store, options.auth_mode);

        let retry = RetryExecutor::from_env();
        let budget_end = RetryPolicy::budget_until(Instant::now() + global_timeout());
        let session = retry
            .execute(budget_end, || factory.connect(record))
            .await
            .map_err(|e| ConnectionError::Transport(e.into_inner()))?;
        Ok(session)
    }

    pub fn server(&self) -> &str {
        &self.record.name
    }

    pub fn is_daemon(&self) -> bool {
        #[cfg(unix)]
        {
            matches!(self.kind, Some(ConnectionKind::Daemon(_)))
        }
        #[cfg(not(unix))]
        {
            false
        }
    }

    fn kind(&self) -> ConnectionResult<&ConnectionKind> {
        self.kind
            .as_ref()
            .ok_or_else(|| ConnectionError::DaemonRequest {
                server: self.record.name.clone(),
                message: "connection already closed".to_string(),
            })
    }

    /// The server's tools with this record's allow/deny filter applied.
    pub async fn list_tools(&self) -> ConnectionResult<Vec<ToolDescriptor>> {
        let tools = match self.kind()? {
            #[cfg(unix)]
            ConnectionKind::Daemon(handle) => {
                handle
                    .list_tools()
                    .await
                    .map_err(|e| ConnectionError::DaemonRequest {
                        server: self.record.name.clone(),
                        message: e.to_string(),
                    })?
            }
            ConnectionKind::Direct(session) => session.list_tools().await?,
        };
        Ok(tools
            .into_iter()
            .filter(|tool| is_tool_allowed(&tool.name, &self.record))
            .collect())
    }

    /// Invoke a tool. A disabled tool is refused here, before any network
    /// or socket traffic.
    pub async fn call_tool(&self, tool: &str, args: Option<Value>) -> ConnectionResult<CallOutcome> {
        if !is_tool_allowed(tool, &self.record) {
            return Err(ConnectionError::ToolDisabled {
                server: self.record.name.clone(),
                tool: tool.to_string(),
            });
        }

        match self.kind()? {
            #[cfg(unix)]
            ConnectionKind::Daemon(handle) => {
                handle
                    .call_tool(tool, args)
                    .await
                    .map_err(|e| ConnectionError::DaemonRequest {
                        server: self.record.name.clone(),
                        message: e.to_string(),
                    })
            }
            ConnectionKind::Direct(session) => {
                let args = match args {
                    None | Some(Value::Null) => None,
                    Some(Value::Object(map)) => Some(map),
                    Some(other) => {
                        return Err(ConnectionError::InvalidArguments {
                            message: format!("expected a JSON object, got {other}"),
                        })
                    }
                };
                Ok(session.call_tool(tool, args).await?)
            }
        }
    }

    pub async fn instructions(&self) -> ConnectionResult<Option<String>> {
        match self.kind()? {
            #[cfg(unix)]
            ConnectionKind::Daemon(handle) => {
                handle
                    .instructions()
                    .await
                    .map_err(|e| ConnectionError::DaemonRequest {
                        server: self.record.name.clone(),
                        message: e.to_string(),
                    })
            }
            ConnectionKind::Direct(session) => Ok(session.instructions()?),
        }
    }

    /// Close the connection. Idempotent. For a daemon-backed handle this
    /// only disconnects locally.
    pub async fn close(&mut self) {
        match self.kind.take() {
            #[cfg(unix)]
            Some(ConnectionKind::Daemon(_handle)) => {
                debug!(server = %self.record.name, "dropping daemon handle, session stays warm");
            }
            Some(ConnectionKind::Direct(mut session)) => session.close().await,
            None => {}
        }
    }
}
