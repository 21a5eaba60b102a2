//! On-disk daemon descriptors
//!
//! One descriptor per server name. A daemon is valid iff its socket file
//! exists, its pid is alive, and its config hash matches the current
//! record; violating any conjunct forces cleanup and respawn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::DaemonResult;
use crate::paths;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DaemonDescriptor {
    pub pid: u32,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
}

impl DaemonDescriptor {
    pub fn new(pid: u32, config_hash: String) -> Self {
        Self {
            pid,
            config_hash,
            started_at: Utc::now(),
        }
    }

    /// Read the descriptor for `server`; missing or malformed files are
    /// treated as absent.
    pub fn read(server: &str) -> Option<Self> {
        let path = paths::descriptor_path(server);
        let raw = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(descriptor) => Some(descriptor),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring malformed descriptor");
                None
            }
        }
    }

    /// Write the descriptor at 0600.
    pub fn write(&self, server: &str) -> DaemonResult<()> {
        let path = paths::descriptor_path(server);
        let payload = serde_json::to_vec_pretty(self)
            .map_err(|e| crate::error::DaemonError::protocol(e.to_string()))?;
        std::fs::write(&path, payload)?;
        restrict(&path)?;
        Ok(())
    }
}

/// Remove a server's socket and descriptor files; absence is fine.
pub fn remove_files(server: &str) {
    for path in [paths::socket_path(server), paths::descriptor_path(server)] {
        match std::fs::remove_file(&path) {
            Ok(()) => debug!(path = %path.display(), "removed daemon file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %path.display(), error = %e, "failed to remove daemon file"),
        }
    }
}

/// Whether a process with this pid exists.
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

fn restrict(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Descriptor reads/writes resolve the directory through the
    // MCPQ_SOCKET_DIR override; tests get an isolated directory each.
    fn with_socket_dir<R>(f: impl FnOnce() -> R) -> R {
        let _guard = crate::testenv::lock();
        let dir = TempDir::new().unwrap();
        std::env::set_var("MCPQ_SOCKET_DIR", dir.path());
        let result = f();
        std::env::remove_var("MCPQ_SOCKET_DIR");
        result
    }

    #[test]
    fn test_descriptor_roundtrip_and_removal() {
        with_socket_dir(|| {
            paths::ensure_socket_dir().unwrap();
            let descriptor = DaemonDescriptor::new(12345, "deadbeefdeadbeef".to_string());
            descriptor.write("fs").unwrap();

            let read = DaemonDescriptor::read("fs").unwrap();
            assert_eq!(read, descriptor);

            remove_files("fs");
            assert!(DaemonDescriptor::read("fs").is_none());
        });
    }

    #[test]
    fn test_malformed_descriptor_is_absent() {
        with_socket_dir(|| {
            paths::ensure_socket_dir().unwrap();
            std::fs::write(paths::descriptor_path("fs"), "gibberish").unwrap();
            assert!(DaemonDescriptor::read("fs").is_none());
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_own_pid_is_alive() {
        assert!(pid_alive(std::process::id()));
        // pid 0 targets "this process group"; use an absurd pid instead
        assert!(!pid_alive(u32::MAX / 2));
    }
}
