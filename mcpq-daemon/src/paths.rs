//! Socket and descriptor paths
//!
//! Everything lives in a per-uid directory under the OS temp dir so two
//! users on one machine never share sockets. `MCPQ_SOCKET_DIR` overrides
//! the location for tests.

use std::path::PathBuf;

use mcpq_config::sanitize_name;

/// The per-user socket directory.
pub fn socket_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("MCPQ_SOCKET_DIR") {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    #[cfg(unix)]
    let suffix = format!("mcpq-{}", unsafe { libc::getuid() });
    #[cfg(not(unix))]
    let suffix = "mcpq".to_string();
    std::env::temp_dir().join(suffix)
}

pub fn socket_path(server: &str) -> PathBuf {
    socket_dir().join(format!("{}.sock", sanitize_name(server)))
}

pub fn descriptor_path(server: &str) -> PathBuf {
    socket_dir().join(format!("{}.pid", sanitize_name(server)))
}

/// Create the socket directory, owner-only.
pub fn ensure_socket_dir() -> std::io::Result<PathBuf> {
    let dir = socket_dir();
    std::fs::create_dir_all(&dir)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&dir, std::fs::Permissions::from_mode(0o700))?;
    }
    Ok(dir)
}
