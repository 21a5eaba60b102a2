//! Localhost OAuth callback listener
//!
//! The listener is pre-started before the authorization URL is built so
//! the effective port is known when `redirect_uri` is rendered. It is an
//! instance owned by one provider (one flow per CLI invocation), not a
//! process-global, and cleans itself up on resolve, reject, timeout or
//! drop.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::debug;

use mcpq_config::OAuthConfig;

use crate::error::{AuthError, AuthResult, FlowStage};

/// Default port search order. High ports only, ending in 0 (OS-assigned)
/// so the default flow never needs elevation.
pub const DEFAULT_CALLBACK_PORTS: [u16; 4] = [8090, 8091, 8092, 0];

/// How long the listener waits for the browser to come back.
pub const CALLBACK_TIMEOUT: Duration = Duration::from_secs(300);

/// The ports to try, in order. An explicit `callbackPorts` list fully
/// overrides the default order; otherwise `callbackPort` (if set) is
/// merged ahead of the defaults, with duplicates removed.
pub fn compute_port_order(oauth: &OAuthConfig) -> Vec<u16> {
    if let Some(explicit) = &oauth.callback_ports {
        return explicit.clone();
    }
    let mut order = Vec::new();
    if let Some(preferred) = oauth.callback_port {
        order.push(preferred);
    }
    for port in DEFAULT_CALLBACK_PORTS {
        if !order.contains(&port) {
            order.push(port);
        }
    }
    order
}

/// Redirect URL for an effective port; the standard HTTP port is elided.
pub fn redirect_url_for_port(port: u16) -> String {
    if port == 80 {
        "http://localhost/callback".to_string()
    } else {
        format!("http://localhost:{port}/callback")
    }
}

/// What the browser delivered to `/callback`.
#[derive(Debug, Clone)]
pub enum CallbackOutcome {
    Code { code: String, state: Option<String> },
    Error { error: String, description: Option<String> },
}

#[derive(Clone)]
struct ListenerState {
    outcome_tx: Arc<Mutex<Option<oneshot::Sender<CallbackOutcome>>>>,
}

impl ListenerState {
    fn resolve(&self, outcome: CallbackOutcome) -> bool {
        match self.outcome_tx.lock().expect("lock poisoned").take() {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// A bound callback listener serving one pending authorization.
#[derive(Debug)]
pub struct CallbackListener {
    port: u16,
    outcome_rx: Option<oneshot::Receiver<CallbackOutcome>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl CallbackListener {
    /// Bind the first port from `ports` that accepts, and start serving.
    pub async fn bind(ports: &[u16]) -> AuthResult<Self> {
        for port in ports {
            match TcpListener::bind(("127.0.0.1", *port)).await {
                Ok(listener) => return Ok(Self::serve(listener)),
                Err(e) => {
                    debug!(port, error = %e, "callback port unavailable, trying next");
                }
            }
        }
        Err(AuthError::flow(
            FlowStage::Listener,
            format!("no callback port could be bound (tried {ports:?})"),
        ))
    }

    fn serve(listener: TcpListener) -> Self {
        let port = listener
            .local_addr()
            .map(|addr| addr.port())
            .unwrap_or_default();

        let (outcome_tx, outcome_rx) = oneshot::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = ListenerState {
            outcome_tx: Arc::new(Mutex::new(Some(outcome_tx))),
        };

        let app = Router::new()
            .route("/callback", get(handle_callback))
            .route("/favicon.ico", get(handle_favicon))
            .fallback(handle_fallback)
            .with_state(state);

        tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                debug!(error = %e, "callback listener exited with error");
            }
        });

        debug!(port, "callback listener ready");
        Self {
            port,
            outcome_rx: Some(outcome_rx),
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// The effective bound port.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn redirect_url(&self) -> String {
        redirect_url_for_port(self.port)
    }

    /// Wait for the authorization code. Consumes the pending callback;
    /// the listener shuts down afterwards regardless of outcome.
    pub async fn wait_for_code(&mut self, timeout: Duration) -> AuthResult<CallbackOutcome> {
        let rx = self
            .outcome_rx
            .take()
            .ok_or_else(|| AuthError::flow(FlowStage::Callback, "callback already consumed"))?;

        let result = tokio::time::timeout(timeout, rx).await;
        self.shutdown();

        match result {
            Ok(Ok(outcome)) => Ok(outcome),
            Ok(Err(_)) => Err(AuthError::flow(
                FlowStage::Callback,
                "callback listener closed before a code arrived",
            )),
            Err(_) => Err(AuthError::flow(
                FlowStage::Timeout,
                format!("no authorization callback within {}s", timeout.as_secs()),
            )),
        }
    }

    /// Stop serving. Idempotent; also runs on drop.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for CallbackListener {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn handle_callback(
    State(state): State<ListenerState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    if let Some(error) = params.get("error") {
        let description = params.get("error_description").cloned();
        state.resolve(CallbackOutcome::Error {
            error: error.clone(),
            description: description.clone(),
        });
        let detail = description.unwrap_or_else(|| error.clone());
        return (
            StatusCode::BAD_REQUEST,
            Html(page(
                "Authorization failed",
                &format!("The authorization server reported: {detail}"),
            )),
        )
            .into_response();
    }

    if let Some(code) = params.get("code") {
        state.resolve(CallbackOutcome::Code {
            code: code.clone(),
            state: params.get("state").cloned(),
        });
        return Html(page(
            "Authorization complete",
            "You can close this window and return to the terminal.",
        ))
        .into_response();
    }

    (
        StatusCode::BAD_REQUEST,
        Html(page(
            "Invalid callback",
            "The callback was missing both 'code' and 'error' parameters.",
        )),
    )
        .into_response()
}

async fn handle_favicon() -> StatusCode {
    StatusCode::NOT_FOUND
}

async fn handle_fallback() -> StatusCode {
    StatusCode::NOT_FOUND
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>mcpq - {title}</title></head>\
         <body style=\"font-family: sans-serif; margin: 4em auto; max-width: 40em;\">\
         <h1>{title}</h1><p>{body}</p></body></html>"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oauth(port: Option<u16>, ports: Option<Vec<u16>>) -> OAuthConfig {
        OAuthConfig {
            callback_port: port,
            callback_ports: ports,
            ..Default::default()
        }
    }

    #[test]
    fn test_port_order_defaults() {
        assert_eq!(compute_port_order(&oauth(None, None)), vec![8090, 8091, 8092, 0]);
    }

    #[test]
    fn test_preferred_port_goes_first_and_dedupes() {
        assert_eq!(
            compute_port_order(&oauth(Some(7777), None)),
            vec![7777, 8090, 8091, 8092, 0]
        );
        assert_eq!(
            compute_port_order(&oauth(Some(8091), None)),
            vec![8091, 8090, 8092, 0]
        );
    }

    #[test]
    fn test_explicit_list_fully_overrides() {
        assert_eq!(
            compute_port_order(&oauth(Some(7777), Some(vec![80, 0]))),
            vec![80, 0]
        );
    }

    #[test]
    fn test_redirect_url_elides_port_80() {
        assert_eq!(redirect_url_for_port(80), "http://localhost/callback");
        assert_eq!(
            redirect_url_for_port(8090),
            "http://localhost:8090/callback"
        );
    }

    #[tokio::test]
    async fn test_bind_falls_back_when_port_taken() {
        // Occupy a port, then ask the listener to prefer it.
        let blocker = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let listener = CallbackListener::bind(&[taken, 0]).await.unwrap();
        assert_ne!(listener.port(), taken);
        assert_ne!(listener.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_fails_when_no_port_available() {
        let blocker = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let taken = blocker.local_addr().unwrap().port();

        let err = CallbackListener::bind(&[taken]).await.unwrap_err();
        assert_eq!(err.code(), "OAUTH_FLOW_ERROR");
    }

    #[tokio::test]
    async fn test_code_callback_resolves() {
        let mut listener = CallbackListener::bind(&[0]).await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}/callback?code=abc123&state=xyz",
            listener.port()
        );

        let request = tokio::spawn(async move { reqwest::get(url).await });
        let outcome = listener.wait_for_code(Duration::from_secs(5)).await.unwrap();

        match outcome {
            CallbackOutcome::Code { code, state } => {
                assert_eq!(code, "abc123");
                assert_eq!(state.as_deref(), Some("xyz"));
            }
            other => panic!("expected code, got {other:?}"),
        }
        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_error_callback_rejects_with_400() {
        let mut listener = CallbackListener::bind(&[0]).await.unwrap();
        let url = format!(
            "http://127.0.0.1:{}/callback?error=access_denied",
            listener.port()
        );

        let request = tokio::spawn(async move { reqwest::get(url).await });
        let outcome = listener.wait_for_code(Duration::from_secs(5)).await.unwrap();
        assert!(matches!(outcome, CallbackOutcome::Error { ref error, .. } if error == "access_denied"));

        let response = request.await.unwrap().unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_unknown_paths_and_favicon_404() {
        let listener = CallbackListener::bind(&[0]).await.unwrap();
        let base = format!("http://127.0.0.1:{}", listener.port());

        let favicon = reqwest::get(format!("{base}/favicon.ico")).await.unwrap();
        assert_eq!(favicon.status(), 404);

        let other = reqwest::get(format!("{base}/somewhere")).await.unwrap();
        assert_eq!(other.status(), 404);

        let empty = reqwest::get(format!("{base}/callback")).await.unwrap();
        assert_eq!(empty.status(), 400);
    }

    #[tokio::test]
    async fn test_timeout_rejects_cleanly() {
        let mut listener = CallbackListener::bind(&[0]).await.unwrap();
        let err = listener
            .wait_for_code(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            AuthError::Flow {
                stage: FlowStage::Timeout,
                ..
            }
        ));
    }
}
