//! Daemon IPC protocol
//!
//! One JSON object per line over the Unix socket. A connection carries one
//! request and one response; responses echo the request id so the framing
//! stays compatible with multiplexed use even though no client does that
//! today.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use crate::error::{DaemonError, DaemonResult};

/// Printed on the worker's stdout once its socket is serving, so the
/// spawning client knows when to stop waiting.
pub const READY_TOKEN: &str = "DAEMON_READY";

/// The operations a daemon serves
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DaemonOp {
    Ping,
    ListTools,
    #[serde(rename_all = "camelCase")]
    CallTool {
        tool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        args: Option<Value>,
    },
    GetInstructions,
    Close,
}

/// A request frame: `{id, type, toolName?, args?}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonRequest {
    pub id: u64,
    #[serde(flatten)]
    pub op: DaemonOp,
}

/// A response frame: `{id, success, data?, error?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub id: u64,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(id: u64, data: Value) -> Self {
        Self {
            id,
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(id: u64, message: impl Into<String>) -> Self {
        Self {
            id,
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Write one newline-terminated JSON frame.
pub async fn write_frame<T, W>(writer: &mut W, frame: &T) -> DaemonResult<()>
where
    T: Serialize,
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(frame).map_err(|e| DaemonError::protocol(e.to_string()))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one newline-terminated JSON frame.
pub async fn read_frame<T, R>(reader: &mut BufReader<R>) -> DaemonResult<T>
where
    T: for<'de> Deserialize<'de>,
    R: AsyncRead + Unpin,
{
    let mut line = String::new();
    let read = reader.read_line(&mut line).await?;
    if read == 0 {
        return Err(DaemonError::protocol("connection closed mid-frame"));
    }
    serde_json::from_str(line.trim_end()).map_err(|e| DaemonError::protocol(e.to_string()))
}
