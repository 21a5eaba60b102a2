//! Uniform server connections for mcpq
//!
//! The facade hides whether a server is reached through its warm daemon
//! or a direct session: callers get the same `list_tools` / `call_tool` /
//! `instructions` / `close` surface either way, with the record's tool
//! filter applied on top. The fan-out engine runs one operation across
//! every configured server with bounded parallelism, order-preserving
//! output, and per-server error isolation.

pub mod error;
pub mod facade;
pub mod fanout;

pub use error::{ConnectionError, ConnectionResult};
pub use facade::{ConnectOptions, ServerConnection};
pub use fanout::{fan_out, pool_size, FanoutResult};
