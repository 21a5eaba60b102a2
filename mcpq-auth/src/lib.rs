//! Credential persistence and OAuth 2.0 flows for mcpq
//!
//! HTTP MCP servers may sit behind OAuth 2.0. This crate owns the two
//! halves of that problem: a file-backed credential store (tokens,
//! dynamically registered clients, PKCE verifiers, all per server name)
//! and the provider that drives the authorization-code-with-PKCE flow,
//! including the localhost callback listener with port fallback. The
//! client-credentials grant is handled without a browser round-trip via
//! a token-request parameter builder.

pub mod callback;
pub mod discovery;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod store;

pub use callback::{compute_port_order, redirect_url_for_port, CallbackListener};
pub use error::{AuthError, AuthResult, FlowStage};
pub use provider::{AuthMode, OAuthProvider, TokenResponse};
pub use store::{CredentialStore, InvalidationScope, StoredClient, StoredTokens};
