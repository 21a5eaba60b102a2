//! A live MCP session
//!
//! Owns exactly one `rmcp` client connection plus a close operation. A
//! session never survives the process; daemons hold one from spawn until
//! their own cleanup.

use rmcp::model::CallToolRequestParams;
use rmcp::service::{RoleClient, RunningService};
use std::time::Duration;
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::tool::{CallOutcome, ToolDescriptor};

#[derive(Debug)]
pub struct McpSession {
    server: String,
    running: Option<RunningService<RoleClient, ()>>,
    call_timeout: Duration,
}

impl McpSession {
    pub(crate) fn new(
        server: String,
        running: RunningService<RoleClient, ()>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            server,
            running: Some(running),
            call_timeout,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn is_closed(&self) -> bool {
        self.running.is_none()
    }

    fn peer(&self) -> TransportResult<&rmcp::service::Peer<RoleClient>> {
        self.running
            .as_ref()
            .map(|running| running.peer())
            .ok_or_else(|| TransportError::Closed {
                server: self.server.clone(),
            })
    }

    pub async fn list_tools(&self) -> TransportResult<Vec<ToolDescriptor>> {
        let tools = self
            .peer()?
            .list_all_tools()
            .await
            .map_err(|e| TransportError::request(&self.server, e.to_string()))?;
        Ok(tools.into_iter().map(ToolDescriptor::from).collect())
    }

    /// Invoke one tool. The per-call timeout comes from the global request
    /// deadline; the raw MCP result is passed through untouched.
    pub async fn call_tool(
        &self,
        name: &str,
        args: Option<serde_json::Map<String, serde_json::Value>>,
    ) -> TransportResult<CallOutcome> {
        let params = CallToolRequestParams {
            meta: None,
            name: name.to_string().into(),
            arguments: args,
            task: None,
        };

        let call = self.peer()?.call_tool(params);
        let result = tokio::time::timeout(self.call_timeout, call)
            .await
            .map_err(|_| {
                TransportError::request(
                    &self.server,
                    format!("timeout after {}s", self.call_timeout.as_secs()),
                )
            })?
            .map_err(|e| TransportError::request(&self.server, e.to_string()))?;

        let is_error = result.is_error.unwrap_or(false);
        let raw = serde_json::to_value(result)
            .map_err(|e| TransportError::request(&self.server, format!("unserialisable result: {e}")))?;
        Ok(CallOutcome { raw, is_error })
    }

    /// The server's instructions from the initialize handshake, if any.
    pub fn instructions(&self) -> TransportResult<Option<String>> {
        Ok(self
            .peer()?
            .peer_info()
            .and_then(|info| info.instructions.clone()))
    }

    /// Close the session. Idempotent.
    pub async fn close(&mut self) {
        if let Some(running) = self.running.take() {
            debug!(server = %self.server, "closing MCP session");
            let _ = running.cancel().await;
        }
    }
}
