//! Retry infrastructure for mcpq
//!
//! Connection attempts against MCP servers fail transiently all the time:
//! a stdio server that is still npm-installing, an HTTP endpoint behind a
//! flaky proxy, a daemon socket mid-restart. This crate wraps any such
//! operation with capped exponential backoff under a hard deadline budget,
//! and owns the classification of which failures are worth retrying.

pub mod backoff;
pub mod retry;
pub mod transient;

pub use backoff::delay_for_attempt;
pub use retry::{RetryError, RetryExecutor, RetryPolicy, Retryable};
pub use transient::is_transient_message;
