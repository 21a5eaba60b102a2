//! OAuth provider
//!
//! One provider instance drives at most one authorization flow for one
//! server within a CLI invocation:
//!
//! 1. pre-start the callback listener (fixes the effective port)
//! 2. resolve client information (static config, stored registration, or
//!    dynamic registration)
//! 3. build the authorization URL, rewrite its `redirect_uri` to the
//!    effective value, and launch the browser (or capture the URL in
//!    non-interactive mode)
//! 4. wait for the callback, exchange the code with the PKCE verifier,
//!    persist tokens
//!
//! The client-credentials grant bypasses all of that: the transport asks
//! for token-request parameters and posts them itself, or lets
//! [`OAuthProvider::obtain_tokens`] do the round-trip.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use mcpq_config::{GrantType, OAuthConfig};

use crate::callback::{compute_port_order, CallbackListener, CallbackOutcome, CALLBACK_TIMEOUT};
use crate::discovery::{self, AuthEndpoints};
use crate::error::{AuthError, AuthResult, FlowStage};
use crate::pkce;
use crate::store::{CredentialStore, InvalidationScope, StoredClient, StoredTokens};

/// Whether the provider may interact with the user's browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    /// Launch the browser (fire-and-forget) and print the URL
    Interactive,
    /// Capture the URL and fail with `AUTH_REQUIRED` instead
    NonInteractive,
}

/// Token endpoint response (RFC 6749 §5.1)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

impl TokenResponse {
    fn into_stored(self) -> StoredTokens {
        StoredTokens {
            access_token: self.access_token,
            token_type: self.token_type,
            refresh_token: self.refresh_token,
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + ChronoDuration::seconds(secs as i64)),
            scope: self.scope,
        }
    }
}

pub struct OAuthProvider {
    server_name: String,
    server_url: String,
    config: OAuthConfig,
    store: CredentialStore,
    http: reqwest::Client,
    mode: AuthMode,
    callback_timeout: Duration,
}

impl OAuthProvider {
    pub fn new(
        server_name: impl Into<String>,
        server_url: impl Into<String>,
        config: OAuthConfig,
        store: CredentialStore,
        mode: AuthMode,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            server_url: server_url.into(),
            config,
            store,
            http: reqwest::Client::new(),
            mode,
            callback_timeout: CALLBACK_TIMEOUT,
        }
    }

    /// Override the callback timeout (tests).
    pub fn with_callback_timeout(mut self, timeout: Duration) -> Self {
        self.callback_timeout = timeout;
        self
    }

    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// A usable access token from the store, refreshing a stale one when a
    /// refresh token is available. `None` means a full flow is needed.
    pub async fn stored_access_token(&self) -> AuthResult<Option<StoredTokens>> {
        let Some(tokens) = self.store.load_tokens(&self.server_name) else {
            return Ok(None);
        };
        if !tokens.is_expired() {
            return Ok(Some(tokens));
        }

        match &tokens.refresh_token {
            Some(refresh_token) => {
                debug!(server = %self.server_name, "access token expired, refreshing");
                match self.refresh(refresh_token).await {
                    Ok(fresh) => Ok(Some(fresh)),
                    Err(e) => {
                        warn!(server = %self.server_name, error = %e, "token refresh failed");
                        self.store
                            .invalidate(&self.server_name, InvalidationScope::Tokens)?;
                        Ok(None)
                    }
                }
            }
            None => {
                self.store
                    .invalidate(&self.server_name, InvalidationScope::Tokens)?;
                Ok(None)
            }
        }
    }

    /// Run the configured grant to completion and persist the tokens.
    pub async fn obtain_tokens(&self) -> AuthResult<StoredTokens> {
        match self.config.grant_type {
            GrantType::AuthorizationCode => self.authorization_code_flow().await,
            GrantType::ClientCredentials => self.client_credentials_flow(None).await,
        }
    }

    // -- authorization code + PKCE ---------------------------------------

    async fn authorization_code_flow(&self) -> AuthResult<StoredTokens> {
        // Listener first: the effective port must be known before the
        // authorization URL is rendered.
        let ports = compute_port_order(&self.config);
        let mut listener = CallbackListener::bind(&ports).await?;
        let redirect_url = listener.redirect_url();

        let endpoints = discovery::discover(&self.http, &self.server_url).await?;
        let client = self.resolve_client(&redirect_url, &endpoints).await?;

        let verifier = pkce::generate_verifier();
        self.store.save_verifier(&self.server_name, &verifier)?;
        let state = pkce::generate_state();

        let mut auth_url = self.build_authorization_url(
            &endpoints,
            &client.client_id,
            &redirect_url,
            &state,
            &pkce::challenge_for(&verifier),
        )?;
        // The client may have been registered against a different default
        // port; the runtime-effective redirect always wins.
        rewrite_redirect_uri(&mut auth_url, &redirect_url);

        match self.mode {
            AuthMode::NonInteractive => {
                listener.shutdown();
                return Err(AuthError::AuthRequired {
                    url: auth_url.to_string(),
                });
            }
            AuthMode::Interactive => {
                eprintln!("Opening browser for authorization:\n  {auth_url}");
                // Fire and forget; the URL was printed either way.
                if let Err(e) = open::that_detached(auth_url.as_str()) {
                    debug!(error = %e, "browser launch failed");
                }
            }
        }

        let outcome = listener.wait_for_code(self.callback_timeout).await?;
        let code = match outcome {
            CallbackOutcome::Code {
                code,
                state: returned,
            } => {
                if returned.as_deref() != Some(state.as_str()) {
                    return Err(AuthError::flow(
                        FlowStage::Callback,
                        "state parameter mismatch in callback",
                    ));
                }
                code
            }
            CallbackOutcome::Error { error, description } => {
                return Err(AuthError::flow(
                    FlowStage::Callback,
                    description.unwrap_or(error),
                ));
            }
        };

        let tokens = self
            .exchange_code(&endpoints, &client, &code, &redirect_url)
            .await?;
        self.store.save_tokens(&self.server_name, &tokens)?;
        self.store
            .invalidate(&self.server_name, InvalidationScope::Verifier)?;
        Ok(tokens)
    }

    /// Static config wins; otherwise the persisted registration is reused
    /// when its redirect URIs still cover the current redirect URL, else
    /// it is invalidated and a fresh dynamic registration happens.
    async fn resolve_client(
        &self,
        redirect_url: &str,
        endpoints: &AuthEndpoints,
    ) -> AuthResult<StoredClient> {
        if let Some(client_id) = &self.config.client_id {
            return Ok(StoredClient {
                client_id: client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uris: vec![redirect_url.to_string()],
            });
        }

        if let Some(stored) = self.store.load_client(&self.server_name) {
            if stored.redirect_uris.iter().any(|uri| uri == redirect_url) {
                return Ok(stored);
            }
            debug!(
                server = %self.server_name,
                "stored client registered against a different redirect URL, re-registering"
            );
            self.store
                .invalidate(&self.server_name, InvalidationScope::Client)?;
        }

        self.register_client(redirect_url, endpoints).await
    }

    async fn register_client(
        &self,
        redirect_url: &str,
        endpoints: &AuthEndpoints,
    ) -> AuthResult<StoredClient> {
        let registration = endpoints.registration.as_ref().ok_or_else(|| {
            AuthError::config(
                "server supports no dynamic registration; set oauth.clientId in the config",
            )
        })?;

        #[derive(Deserialize)]
        struct RegistrationResponse {
            client_id: String,
            #[serde(default)]
            client_secret: Option<String>,
        }

        let metadata = client_metadata(&self.config, redirect_url);
        let response = self
            .http
            .post(registration.clone())
            .json(&metadata)
            .send()
            .await
            .map_err(|e| AuthError::flow(FlowStage::Authorization, format!("registration request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AuthError::flow(
                FlowStage::Authorization,
                format!("dynamic registration rejected: HTTP {}", response.status()),
            ));
        }

        let registered: RegistrationResponse = response.json().await.map_err(|e| {
            AuthError::flow(
                FlowStage::Authorization,
                format!("malformed registration response: {e}"),
            )
        })?;

        let client = StoredClient {
            client_id: registered.client_id,
            client_secret: registered.client_secret,
            redirect_uris: vec![redirect_url.to_string()],
        };
        self.store.save_client(&self.server_name, &client)?;
        Ok(client)
    }

    fn build_authorization_url(
        &self,
        endpoints: &AuthEndpoints,
        client_id: &str,
        redirect_url: &str,
        state: &str,
        challenge: &str,
    ) -> AuthResult<Url> {
        let mut url = endpoints.authorization.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("response_type", "code")
                .append_pair("client_id", client_id)
                .append_pair("redirect_uri", redirect_url)
                .append_pair("state", state)
                .append_pair("code_challenge", challenge)
                .append_pair("code_challenge_method", "S256");
            if let Some(scope) = &self.config.scope {
                query.append_pair("scope", scope);
            }
        }
        Ok(url)
    }

    async fn exchange_code(
        &self,
        endpoints: &AuthEndpoints,
        client: &StoredClient,
        code: &str,
        redirect_url: &str,
    ) -> AuthResult<StoredTokens> {
        // Absence of the verifier at exchange time is a fatal flow error:
        // the authorization request carried a challenge we cannot answer.
        let verifier = self
            .store
            .load_verifier(&self.server_name)
            .ok_or_else(|| {
                AuthError::flow(FlowStage::TokenExchange, "PKCE code verifier missing")
            })?;

        let mut params = vec![
            ("grant_type".to_string(), "authorization_code".to_string()),
            ("code".to_string(), code.to_string()),
            ("redirect_uri".to_string(), redirect_url.to_string()),
            ("client_id".to_string(), client.client_id.clone()),
            ("code_verifier".to_string(), verifier),
        ];
        if let Some(secret) = &client.client_secret {
            params.push(("client_secret".to_string(), secret.clone()));
        }

        self.post_token_request(&endpoints.token, &params, FlowStage::TokenExchange)
            .await
    }

    async fn refresh(&self, refresh_token: &str) -> AuthResult<StoredTokens> {
        let endpoints = discovery::discover(&self.http, &self.server_url).await?;

        let mut params = vec![
            ("grant_type".to_string(), "refresh_token".to_string()),
            ("refresh_token".to_string(), refresh_token.to_string()),
        ];
        if let Some(client) = self.effective_client() {
            params.push(("client_id".to_string(), client.client_id));
            if let Some(secret) = client.client_secret {
                params.push(("client_secret".to_string(), secret));
            }
        }

        let tokens = self
            .post_token_request(&endpoints.token, &params, FlowStage::Refresh)
            .await?;
        self.store.save_tokens(&self.server_name, &tokens)?;
        Ok(tokens)
    }

    fn effective_client(&self) -> Option<StoredClient> {
        if let Some(client_id) = &self.config.client_id {
            return Some(StoredClient {
                client_id: client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uris: vec![],
            });
        }
        self.store.load_client(&self.server_name)
    }

    // -- client credentials ----------------------------------------------

    /// URL-encoded token request parameters for the client-credentials
    /// grant. `scope_override` replaces the configured scope for this call.
    pub fn client_credentials_params(
        &self,
        scope_override: Option<&str>,
    ) -> AuthResult<Vec<(String, String)>> {
        let client_id = self
            .config
            .client_id
            .clone()
            .ok_or_else(|| AuthError::config("client_credentials requires oauth.clientId"))?;
        let client_secret = self
            .config
            .client_secret
            .clone()
            .ok_or_else(|| AuthError::config("client_credentials requires oauth.clientSecret"))?;

        let mut params = vec![
            ("grant_type".to_string(), "client_credentials".to_string()),
            ("client_id".to_string(), client_id),
            ("client_secret".to_string(), client_secret),
        ];
        if let Some(scope) = scope_override.map(str::to_string).or_else(|| self.config.scope.clone()) {
            params.push(("scope".to_string(), scope));
        }
        Ok(params)
    }

    async fn client_credentials_flow(
        &self,
        scope_override: Option<&str>,
    ) -> AuthResult<StoredTokens> {
        let endpoints = discovery::discover(&self.http, &self.server_url).await?;
        let params = self.client_credentials_params(scope_override)?;
        let tokens = self
            .post_token_request(&endpoints.token, &params, FlowStage::TokenExchange)
            .await?;
        self.store.save_tokens(&self.server_name, &tokens)?;
        Ok(tokens)
    }

    async fn post_token_request(
        &self,
        token_endpoint: &Url,
        params: &[(String, String)],
        stage: FlowStage,
    ) -> AuthResult<StoredTokens> {
        let response = self
            .http
            .post(token_endpoint.clone())
            .form(params)
            .send()
            .await
            .map_err(|e| AuthError::flow(stage, format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::flow(
                stage,
                format!("token endpoint returned HTTP {status}: {body}"),
            ));
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::flow(stage, format!("malformed token response: {e}")))?;
        Ok(token_response.into_stored())
    }
}

/// Client metadata advertised during dynamic registration (RFC 7591).
fn client_metadata(config: &OAuthConfig, redirect_url: &str) -> serde_json::Value {
    let auth_method = if config.client_secret.is_some() {
        "client_secret_post"
    } else {
        "none"
    };
    match config.grant_type {
        GrantType::AuthorizationCode => serde_json::json!({
            "client_name": "mcpq",
            "redirect_uris": [redirect_url],
            "grant_types": ["authorization_code", "refresh_token"],
            "response_types": ["code"],
            "token_endpoint_auth_method": auth_method,
            "scope": config.scope,
        }),
        GrantType::ClientCredentials => serde_json::json!({
            "client_name": "mcpq",
            "grant_types": ["client_credentials"],
            "response_types": [],
            "token_endpoint_auth_method": auth_method,
            "scope": config.scope,
        }),
    }
}

/// Replace (or insert) the `redirect_uri` query parameter. Ports chosen at
/// runtime may differ from whatever the URL was built or registered with.
pub fn rewrite_redirect_uri(url: &mut Url, redirect_url: &str) {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "redirect_uri")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &retained {
            query.append_pair(k, v);
        }
        query.append_pair("redirect_uri", redirect_url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(
        server: &MockServer,
        dir: &TempDir,
        config: OAuthConfig,
        mode: AuthMode,
    ) -> OAuthProvider {
        OAuthProvider::new(
            "x",
            format!("{}/mcp", server.uri()),
            config,
            CredentialStore::at(dir.path()),
            mode,
        )
    }

    fn token_response() -> serde_json::Value {
        serde_json::json!({
            "access_token": "at-1",
            "token_type": "Bearer",
            "expires_in": 3600,
            "refresh_token": "rt-1"
        })
    }

    async fn mount_no_metadata(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/.well-known/oauth-authorization-server"))
            .respond_with(ResponseTemplate::new(404))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_client_credentials_round_trip_persists_tokens() {
        let server = MockServer::start().await;
        mount_no_metadata(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=client_credentials"))
            .and(body_string_contains("client_id=cid"))
            .and(body_string_contains("client_secret=sec"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let config = OAuthConfig {
            grant_type: GrantType::ClientCredentials,
            client_id: Some("cid".to_string()),
            client_secret: Some("sec".to_string()),
            scope: Some("mcp".to_string()),
            ..Default::default()
        };
        let provider = provider_for(&server, &dir, config, AuthMode::Interactive);

        let tokens = provider.obtain_tokens().await.unwrap();
        assert_eq!(tokens.access_token, "at-1");

        let store = CredentialStore::at(dir.path());
        assert_eq!(store.load_tokens("x").unwrap().access_token, "at-1");
    }

    #[test]
    fn test_client_credentials_params_scope_override() {
        let config = OAuthConfig {
            grant_type: GrantType::ClientCredentials,
            client_id: Some("cid".to_string()),
            client_secret: Some("sec".to_string()),
            scope: Some("default-scope".to_string()),
            ..Default::default()
        };
        let dir = TempDir::new().unwrap();
        let provider = OAuthProvider::new(
            "x",
            "https://example.com/mcp",
            config,
            CredentialStore::at(dir.path()),
            AuthMode::Interactive,
        );

        let params = provider.client_credentials_params(None).unwrap();
        assert!(params.contains(&("scope".to_string(), "default-scope".to_string())));

        let params = provider.client_credentials_params(Some("other")).unwrap();
        assert!(params.contains(&("scope".to_string(), "other".to_string())));
        assert!(params.contains(&("grant_type".to_string(), "client_credentials".to_string())));
    }

    #[tokio::test]
    async fn test_non_interactive_surfaces_auth_required_with_url() {
        let server = MockServer::start().await;
        mount_no_metadata(&server).await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "dyn-client"
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let provider = provider_for(
            &server,
            &dir,
            OAuthConfig::default(),
            AuthMode::NonInteractive,
        );

        let err = provider.obtain_tokens().await.unwrap_err();
        let AuthError::AuthRequired { url } = err else {
            panic!("expected AuthRequired, got {err:?}");
        };
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=dyn-client"));
        assert!(url.contains("code_challenge_method=S256"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A"));

        // Registration was persisted for the next invocation
        let store = CredentialStore::at(dir.path());
        let client = store.load_client("x").unwrap();
        assert_eq!(client.client_id, "dyn-client");
        assert_eq!(client.redirect_uris.len(), 1);
    }

    #[tokio::test]
    async fn test_stored_client_with_stale_redirect_is_reregistered() {
        let server = MockServer::start().await;
        mount_no_metadata(&server).await;
        Mock::given(method("POST"))
            .and(path("/register"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({
                "client_id": "fresh-client"
            })))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        store
            .save_client(
                "x",
                &StoredClient {
                    client_id: "stale-client".to_string(),
                    client_secret: None,
                    redirect_uris: vec!["http://localhost:1/callback".to_string()],
                },
            )
            .unwrap();

        let provider = provider_for(
            &server,
            &dir,
            OAuthConfig::default(),
            AuthMode::NonInteractive,
        );
        let err = provider.obtain_tokens().await.unwrap_err();
        let AuthError::AuthRequired { url } = err else {
            panic!("expected AuthRequired, got {err:?}");
        };
        assert!(url.contains("client_id=fresh-client"));
        assert_eq!(store.load_client("x").unwrap().client_id, "fresh-client");
    }

    #[tokio::test]
    async fn test_expired_tokens_refresh_and_persist() {
        let server = MockServer::start().await;
        mount_no_metadata(&server).await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=rt-old"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_response()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        store
            .save_tokens(
                "x",
                &StoredTokens {
                    access_token: "at-old".to_string(),
                    token_type: "Bearer".to_string(),
                    refresh_token: Some("rt-old".to_string()),
                    expires_at: Some(Utc::now() - ChronoDuration::hours(1)),
                    scope: None,
                },
            )
            .unwrap();

        let provider = provider_for(&server, &dir, OAuthConfig::default(), AuthMode::Interactive);
        let tokens = provider.stored_access_token().await.unwrap().unwrap();
        assert_eq!(tokens.access_token, "at-1");
        assert_eq!(store.load_tokens("x").unwrap().access_token, "at-1");
    }

    #[tokio::test]
    async fn test_expired_tokens_without_refresh_are_dropped() {
        let server = MockServer::start().await;
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        store
            .save_tokens(
                "x",
                &StoredTokens {
                    access_token: "at-old".to_string(),
                    token_type: "Bearer".to_string(),
                    refresh_token: None,
                    expires_at: Some(Utc::now() - ChronoDuration::hours(1)),
                    scope: None,
                },
            )
            .unwrap();

        let provider = provider_for(&server, &dir, OAuthConfig::default(), AuthMode::Interactive);
        assert!(provider.stored_access_token().await.unwrap().is_none());
        assert!(store.load_tokens("x").is_none());
    }

    #[test]
    fn test_rewrite_redirect_uri_replaces_existing() {
        let mut url =
            Url::parse("https://as.example.com/authorize?client_id=c&redirect_uri=http%3A%2F%2Flocalhost%3A1%2Fcallback&state=s")
                .unwrap();
        rewrite_redirect_uri(&mut url, "http://localhost:8090/callback");

        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs
                .iter()
                .filter(|(k, _)| k == "redirect_uri")
                .count(),
            1
        );
        assert!(pairs.contains(&(
            "redirect_uri".to_string(),
            "http://localhost:8090/callback".to_string()
        )));
        assert!(pairs.contains(&("client_id".to_string(), "c".to_string())));
    }

    #[test]
    fn test_client_metadata_by_grant() {
        let auth_code = client_metadata(&OAuthConfig::default(), "http://localhost:8090/callback");
        assert_eq!(auth_code["response_types"][0], "code");
        assert_eq!(auth_code["token_endpoint_auth_method"], "none");
        assert_eq!(auth_code["grant_types"][1], "refresh_token");

        let config = OAuthConfig {
            grant_type: GrantType::ClientCredentials,
            client_secret: Some("s".to_string()),
            ..Default::default()
        };
        let cc = client_metadata(&config, "http://localhost:8090/callback");
        assert_eq!(cc["grant_types"][0], "client_credentials");
        assert_eq!(cc["token_endpoint_auth_method"], "client_secret_post");
        assert!(cc.get("redirect_uris").is_none());
    }
}
