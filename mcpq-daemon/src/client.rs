//! Daemon client
//!
//! Locates or spawns the worker for one server, verifies freshness (pid
//! alive, config hash, socket present), and forwards framed requests.
//! Every failure here is swallowed into "no daemon": the caller must fall
//! back to a direct connection, and daemon-path errors are never fatal to
//! the user operation.

use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UnixStream;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use mcpq_config::{config_hash, ServerRecord};
use mcpq_transport::{CallOutcome, ToolDescriptor};

use crate::descriptor::{self, pid_alive, DaemonDescriptor};
use crate::error::{DaemonError, DaemonResult};
use crate::paths;
use crate::protocol::{read_frame, write_frame, DaemonOp, DaemonRequest, DaemonResponse, READY_TOKEN};

/// How long a spawned worker gets to print `DAEMON_READY`.
const SPAWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-request socket deadline, matching the worker's.
const SOCKET_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// A connected daemon for one server. Holds only the socket path; each
/// request opens a short-lived connection.
pub struct DaemonHandle {
    server: String,
    socket: PathBuf,
    next_id: AtomicU64,
}

impl DaemonHandle {
    fn new(server: &str) -> Self {
        Self {
            server: server.to_string(),
            socket: paths::socket_path(server),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    async fn request(&self, op: DaemonOp) -> DaemonResult<Option<Value>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        let stream = timeout(SOCKET_IO_TIMEOUT, UnixStream::connect(&self.socket))
            .await
            .map_err(|_| DaemonError::Timeout)??;
        let (read_half, mut write_half) = stream.into_split();

        timeout(
            SOCKET_IO_TIMEOUT,
            write_frame(&mut write_half, &DaemonRequest { id, op }),
        )
        .await
        .map_err(|_| DaemonError::Timeout)??;

        let mut reader = BufReader::new(read_half);
        let response: DaemonResponse = timeout(SOCKET_IO_TIMEOUT, read_frame(&mut reader))
            .await
            .map_err(|_| DaemonError::Timeout)??;

        if response.id != id {
            return Err(DaemonError::protocol(format!(
                "response id {} does not match request id {id}",
                response.id
            )));
        }
        if response.success {
            Ok(response.data)
        } else {
            Err(DaemonError::Remote(
                response.error.unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }

    pub async fn ping(&self) -> DaemonResult<()> {
        self.request(DaemonOp::Ping).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> DaemonResult<Vec<ToolDescriptor>> {
        let data = self
            .request(DaemonOp::ListTools)
            .await?
            .ok_or_else(|| DaemonError::protocol("listTools response had no data"))?;
        serde_json::from_value(data).map_err(|e| DaemonError::protocol(e.to_string()))
    }

    pub async fn call_tool(&self, tool_name: &str, args: Option<Value>) -> DaemonResult<CallOutcome> {
        let data = self
            .request(DaemonOp::CallTool {
                tool_name: tool_name.to_string(),
                args,
            })
            .await?
            .ok_or_else(|| DaemonError::protocol("callTool response had no data"))?;
        serde_json::from_value(data).map_err(|e| DaemonError::protocol(e.to_string()))
    }

    pub async fn instructions(&self) -> DaemonResult<Option<String>> {
        let data = self.request(DaemonOp::GetInstructions).await?;
        match data {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => Ok(Some(text)),
            Some(other) => Err(DaemonError::protocol(format!(
                "unexpected instructions payload: {other}"
            ))),
        }
    }

    /// Ask the worker to shut down (it keeps serving until the grace
    /// period ends, so the response still arrives).
    pub async fn close(&self) -> DaemonResult<()> {
        self.request(DaemonOp::Close).await.map(|_| ())
    }
}

/// Finds or spawns workers.
pub struct DaemonClient {
    config_path: Option<PathBuf>,
}

impl DaemonClient {
    /// `config_path` is forwarded to spawned workers so both sides load
    /// the same catalogue.
    pub fn new(config_path: Option<PathBuf>) -> Self {
        Self { config_path }
    }

    /// Whether the daemon path is enabled at all (`MCPQ_NO_DAEMON`
    /// disables it).
    pub fn enabled() -> bool {
        match std::env::var("MCPQ_NO_DAEMON") {
            Ok(v) => v.is_empty() || v == "0" || v == "false",
            Err(_) => true,
        }
    }

    /// A live daemon handle for this record, or None when the caller must
    /// connect directly.
    pub async fn acquire(&self, record: &ServerRecord) -> Option<DaemonHandle> {
        if !Self::enabled() {
            return None;
        }
        match self.acquire_inner(record).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                debug!(server = %record.name, error = %e, "daemon unavailable, falling back to direct");
                None
            }
        }
    }

    async fn acquire_inner(&self, record: &ServerRecord) -> DaemonResult<DaemonHandle> {
        let name = &record.name;
        let expected_hash = config_hash(record);

        if let Some(existing) = DaemonDescriptor::read(name) {
            let fresh = pid_alive(existing.pid)
                && existing.config_hash == expected_hash
                && paths::socket_path(name).exists();
            if fresh {
                let handle = DaemonHandle::new(name);
                if handle.ping().await.is_ok() {
                    debug!(server = %name, pid = existing.pid, "reusing warm daemon");
                    return Ok(handle);
                }
                debug!(server = %name, "descriptor valid but socket not serving");
            } else {
                debug!(
                    server = %name,
                    pid = existing.pid,
                    stale_hash = existing.config_hash != expected_hash,
                    "daemon stale"
                );
            }
            invalidate(name, existing.pid);
        }

        self.spawn_worker(name).await?;

        let handle = DaemonHandle::new(name);
        if let Err(e) = handle.ping().await {
            descriptor::remove_files(name);
            return Err(e);
        }
        Ok(handle)
    }

    /// Detach a worker and wait for its readiness line.
    async fn spawn_worker(&self, name: &str) -> DaemonResult<()> {
        let exe = std::env::current_exe()
            .map_err(|e| DaemonError::spawn(format!("cannot locate own binary: {e}")))?;

        let mut command = Command::new(exe);
        command
            .arg("daemon-worker")
            .arg(name)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .process_group(0);
        if let Some(path) = &self.config_path {
            command.arg("--config").arg(path);
        }

        let mut child = command
            .spawn()
            .map_err(|e| DaemonError::spawn(e.to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DaemonError::spawn("worker stdout unavailable"))?;

        let became_ready = async {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim() == READY_TOKEN {
                    return true;
                }
            }
            false
        };

        match timeout(SPAWN_TIMEOUT, became_ready).await {
            Ok(true) => Ok(()),
            Ok(false) => {
                descriptor::remove_files(name);
                Err(DaemonError::spawn("worker exited before becoming ready"))
            }
            Err(_) => {
                let _ = child.start_kill();
                descriptor::remove_files(name);
                Err(DaemonError::spawn(format!(
                    "worker not ready within {}s",
                    SPAWN_TIMEOUT.as_secs()
                )))
            }
        }
    }

    /// Remove socket/descriptor files left behind by dead daemons. Run at
    /// CLI startup.
    pub fn sweep() {
        let dir = paths::socket_dir();
        let Ok(entries) = std::fs::read_dir(&dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("pid") {
                continue;
            }
            let dead = match std::fs::read_to_string(&path)
                .ok()
                .and_then(|raw| serde_json::from_str::<DaemonDescriptor>(&raw).ok())
            {
                Some(descriptor) => !pid_alive(descriptor.pid),
                None => true,
            };
            if dead {
                debug!(path = %path.display(), "sweeping dead daemon files");
                let _ = std::fs::remove_file(path.with_extension("sock"));
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

/// Kill a stale daemon and remove its files.
fn invalidate(name: &str, pid: u32) {
    if pid_alive(pid) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %e, "failed to signal stale daemon");
        }
    }
    descriptor::remove_files(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testenv;
    use tokio::net::UnixListener;

    #[test]
    fn test_enabled_respects_no_daemon_env() {
        let _guard = testenv::lock();
        std::env::remove_var("MCPQ_NO_DAEMON");
        assert!(DaemonClient::enabled());
        std::env::set_var("MCPQ_NO_DAEMON", "1");
        assert!(!DaemonClient::enabled());
        std::env::set_var("MCPQ_NO_DAEMON", "0");
        assert!(DaemonClient::enabled());
        std::env::remove_var("MCPQ_NO_DAEMON");
    }

    #[tokio::test]
    async fn test_sweep_removes_only_dead_daemons() {
        let _guard = testenv::lock();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("MCPQ_SOCKET_DIR", dir.path());
        paths::ensure_socket_dir().unwrap();

        // Alive descriptor (our own pid) and a dead one
        DaemonDescriptor::new(std::process::id(), "aaaa".to_string())
            .write("alive")
            .unwrap();
        std::fs::write(paths::socket_path("alive"), b"").unwrap();
        DaemonDescriptor::new(u32::MAX / 2, "bbbb".to_string())
            .write("dead")
            .unwrap();
        std::fs::write(paths::socket_path("dead"), b"").unwrap();

        DaemonClient::sweep();

        assert!(paths::descriptor_path("alive").exists());
        assert!(paths::socket_path("alive").exists());
        assert!(!paths::descriptor_path("dead").exists());
        assert!(!paths::socket_path("dead").exists());

        std::env::remove_var("MCPQ_SOCKET_DIR");
    }

    #[tokio::test]
    async fn test_handle_round_trip_against_fake_worker() {
        let _guard = testenv::lock();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("MCPQ_SOCKET_DIR", dir.path());
        paths::ensure_socket_dir().unwrap();

        let listener = UnixListener::bind(paths::socket_path("fake")).unwrap();
        tokio::spawn(async move {
            // Serve exactly one ping in the worker's framing
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let request: DaemonRequest = read_frame(&mut reader).await.unwrap();
            assert_eq!(request.op, DaemonOp::Ping);
            write_frame(
                &mut write_half,
                &DaemonResponse::ok(request.id, serde_json::json!("pong")),
            )
            .await
            .unwrap();
        });

        let handle = DaemonHandle::new("fake");
        handle.ping().await.unwrap();

        std::env::remove_var("MCPQ_SOCKET_DIR");
    }

    #[tokio::test]
    async fn test_mismatched_response_id_is_a_protocol_error() {
        let _guard = testenv::lock();
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("MCPQ_SOCKET_DIR", dir.path());
        paths::ensure_socket_dir().unwrap();

        let listener = UnixListener::bind(paths::socket_path("liar")).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = stream.into_split();
            let mut reader = BufReader::new(read_half);
            let _request: DaemonRequest = read_frame(&mut reader).await.unwrap();
            write_frame(
                &mut write_half,
                &DaemonResponse::ok(9999, serde_json::json!("pong")),
            )
            .await
            .unwrap();
        });

        let handle = DaemonHandle::new("liar");
        let err = handle.ping().await.unwrap_err();
        assert!(matches!(err, DaemonError::Protocol(_)));

        std::env::remove_var("MCPQ_SOCKET_DIR");
    }
}
