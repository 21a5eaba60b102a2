//! MCP session construction for mcpq
//!
//! The transport factory turns a validated server record into a live
//! [`McpSession`]: a local subprocess speaking stdio, or a remote
//! streamable-HTTP endpoint with OAuth wired in. The MCP wire protocol
//! itself comes from the `rmcp` SDK; this crate owns process plumbing
//! (stderr capture), bearer-token injection, and the
//! authorize-then-reconnect dance on 401.

pub mod error;
pub mod factory;
pub mod session;
pub mod tool;

pub use error::{TransportError, TransportResult};
pub use factory::{connect, global_timeout, TransportFactory};
pub use session::McpSession;
pub use tool::{CallOutcome, ToolDescriptor};
