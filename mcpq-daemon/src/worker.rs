//! Daemon worker process
//!
//! Runs detached, holds one MCP session, serves newline-framed requests on
//! the per-server Unix socket. Startup order matters: descriptor first,
//! then the MCP session (with retries), then the socket bind, then the
//! `DAEMON_READY` line that unblocks the spawning client. Idle expiry,
//! `close` requests and SIGTERM/SIGINT all funnel into the same cleanup.

use serde_json::{json, Value};
use std::io::Write as _;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::{UnixListener, UnixStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio::time::{sleep, sleep_until, timeout, Instant};
use tracing::{debug, info, warn};

use mcpq_auth::{AuthMode, CredentialStore};
use mcpq_config::{config_hash, ServerRecord};
use mcpq_resilience::{RetryExecutor, RetryPolicy};
use mcpq_transport::{global_timeout, McpSession, TransportFactory};

use crate::descriptor::{self, DaemonDescriptor};
use crate::error::{DaemonError, DaemonResult};
use crate::paths;
use crate::protocol::{
    read_frame, write_frame, DaemonOp, DaemonRequest, DaemonResponse, READY_TOKEN,
};

const DEFAULT_IDLE_SECS: u64 = 300;

/// Per-request socket IO deadline; short so a wedged client cannot pin the
/// worker.
const SOCKET_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Delay between answering a `close` request and shutting down, so the
/// response gets flushed before the socket disappears.
const CLOSE_GRACE: Duration = Duration::from_millis(100);

/// Idle timeout from `MCPQ_DAEMON_TIMEOUT` (seconds), default 5 minutes.
pub fn idle_timeout() -> Duration {
    std::env::var("MCPQ_DAEMON_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_IDLE_SECS))
}

/// Worker entry point; the exit code goes straight to `std::process::exit`.
pub async fn run(record: &ServerRecord) -> i32 {
    match serve(record).await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("daemon worker for '{}' failed: {e}", record.name);
            descriptor::remove_files(&record.name);
            1
        }
    }
}

async fn serve(record: &ServerRecord) -> DaemonResult<()> {
    paths::ensure_socket_dir()?;
    let socket_path = paths::socket_path(&record.name);
    match std::fs::remove_file(&socket_path) {
        Ok(()) => debug!(path = %socket_path.display(), "removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    DaemonDescriptor::new(std::process::id(), config_hash(record)).write(&record.name)?;

    // The daemon can never drive a browser; if the server demands a fresh
    // OAuth flow the connect fails, we exit 1, and the CLI's direct path
    // handles authorization interactively.
    let store = CredentialStore::from_env().map_err(|e| DaemonError::spawn(e.to_string()))?;
    let factory = TransportFactory::new(store, AuthMode::NonInteractive);

    let retry = RetryExecutor::from_env();
    let budget_end = RetryPolicy::budget_until(Instant::now() + global_timeout());
    let mut session = retry
        .execute(budget_end, || factory.connect(record))
        .await
        .map_err(|e| DaemonError::spawn(e.into_inner().to_string()))?;

    let listener = UnixListener::bind(&socket_path)?;

    // Unblock the spawner.
    println!("{READY_TOKEN}");
    let _ = std::io::stdout().flush();
    info!(server = %record.name, "daemon ready");

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let idle = idle_timeout();
    let mut idle_deadline = Instant::now() + idle;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        continue;
                    }
                };
                // Rearm the idle timer on every request.
                idle_deadline = Instant::now() + idle;
                if handle_connection(stream, &session).await {
                    sleep(CLOSE_GRACE).await;
                    info!(server = %record.name, "close requested, shutting down");
                    break;
                }
            }
            _ = sleep_until(idle_deadline) => {
                info!(server = %record.name, idle_secs = idle.as_secs(), "idle timeout, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!(server = %record.name, "SIGTERM, shutting down");
                break;
            }
            _ = sigint.recv() => {
                info!(server = %record.name, "SIGINT, shutting down");
                break;
            }
        }
    }

    session.close().await;
    descriptor::remove_files(&record.name);
    Ok(())
}

/// Serve one request on one connection. Returns true when the request was
/// `close`. Connections are handled inline, which also serialises calls
/// into the single MCP session.
async fn handle_connection(stream: UnixStream, session: &McpSession) -> bool {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    let request: DaemonRequest = match timeout(SOCKET_IO_TIMEOUT, read_frame(&mut reader)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e)) => {
            let _ = write_frame(&mut write_half, &DaemonResponse::err(0, e.to_string())).await;
            return false;
        }
        Err(_) => {
            debug!("connection idle past the socket deadline, dropping");
            return false;
        }
    };

    let id = request.id;
    let close_requested = matches!(request.op, DaemonOp::Close);
    let response = dispatch(request, session).await;
    match timeout(SOCKET_IO_TIMEOUT, write_frame(&mut write_half, &response)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(id, error = %e, "failed to write response"),
        Err(_) => debug!(id, "response write timed out"),
    }
    close_requested
}

async fn dispatch(request: DaemonRequest, session: &McpSession) -> DaemonResponse {
    let id = request.id;
    match request.op {
        DaemonOp::Ping => DaemonResponse::ok(id, json!("pong")),

        DaemonOp::ListTools => match session.list_tools().await {
            Ok(tools) => match serde_json::to_value(tools) {
                Ok(data) => DaemonResponse::ok(id, data),
                Err(e) => DaemonResponse::err(id, e.to_string()),
            },
            Err(e) => DaemonResponse::err(id, e.to_string()),
        },

        DaemonOp::CallTool { tool_name, args } => {
            let args = match args {
                None | Some(Value::Null) => None,
                Some(Value::Object(map)) => Some(map),
                Some(other) => {
                    return DaemonResponse::err(
                        id,
                        format!("tool arguments must be an object, got {other}"),
                    )
                }
            };
            match session.call_tool(&tool_name, args).await {
                Ok(outcome) => match serde_json::to_value(outcome) {
                    Ok(data) => DaemonResponse::ok(id, data),
                    Err(e) => DaemonResponse::err(id, e.to_string()),
                },
                Err(e) => DaemonResponse::err(id, e.to_string()),
            }
        }

        DaemonOp::GetInstructions => match session.instructions() {
            Ok(instructions) => DaemonResponse::ok(id, json!(instructions)),
            Err(e) => DaemonResponse::err(id, e.to_string()),
        },

        DaemonOp::Close => DaemonResponse::ok(id, json!("closing")),
    }
}
