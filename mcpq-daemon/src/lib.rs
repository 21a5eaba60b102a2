//! Per-server connection daemons
//!
//! MCP session startup is expensive (npm installs, OAuth, handshakes) and
//! the CLI is invoked over and over by agents. A daemon is a detached
//! helper process holding exactly one warm MCP session for one server,
//! reachable over a per-user Unix-domain socket with newline-framed JSON
//! requests. Staleness is detected through a config hash in the on-disk
//! descriptor; daemons retire themselves after an idle period.
//!
//! Every failure on the daemon path is internal: the client returns "no
//! daemon" and the caller falls back to a direct connection.

pub mod descriptor;
pub mod error;
pub mod paths;
pub mod protocol;

#[cfg(unix)]
pub mod client;
#[cfg(unix)]
pub mod worker;

pub use descriptor::DaemonDescriptor;
pub use error::{DaemonError, DaemonResult};
pub use protocol::{DaemonOp, DaemonRequest, DaemonResponse, READY_TOKEN};

#[cfg(unix)]
pub use client::{DaemonClient, DaemonHandle};

/// Serialises tests that rewrite the `MCPQ_SOCKET_DIR` override.
#[cfg(test)]
pub(crate) mod testenv {
    use std::sync::{Mutex, MutexGuard, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    pub fn lock() -> MutexGuard<'static, ()> {
        ENV_LOCK
            .get_or_init(|| Mutex::new(()))
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
