//! Authorization-server endpoint discovery
//!
//! RFC 8414 metadata at `/.well-known/oauth-authorization-server` on the
//! server origin, with a fallback to the conventional `/authorize`,
//! `/token` and `/register` paths when the metadata document is absent.

use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::{AuthError, AuthResult};

#[derive(Debug, Clone, Deserialize)]
struct MetadataDocument {
    authorization_endpoint: String,
    token_endpoint: String,
    #[serde(default)]
    registration_endpoint: Option<String>,
}

/// Resolved endpoints for one authorization server.
#[derive(Debug, Clone)]
pub struct AuthEndpoints {
    pub authorization: Url,
    pub token: Url,
    pub registration: Option<Url>,
}

/// Discover endpoints for the authorization server guarding `server_url`.
pub async fn discover(client: &reqwest::Client, server_url: &str) -> AuthResult<AuthEndpoints> {
    let origin = origin_of(server_url)?;
    let metadata_url = origin
        .join("/.well-known/oauth-authorization-server")
        .map_err(|e| AuthError::config(format!("cannot build metadata URL: {e}")))?;

    match client.get(metadata_url.clone()).send().await {
        Ok(response) if response.status().is_success() => {
            let doc: MetadataDocument = response.json().await.map_err(|e| {
                AuthError::config(format!("malformed authorization server metadata: {e}"))
            })?;
            Ok(AuthEndpoints {
                authorization: parse_endpoint(&doc.authorization_endpoint, "authorization_endpoint")?,
                token: parse_endpoint(&doc.token_endpoint, "token_endpoint")?,
                registration: doc
                    .registration_endpoint
                    .as_deref()
                    .map(|e| parse_endpoint(e, "registration_endpoint"))
                    .transpose()?,
            })
        }
        Ok(response) => {
            debug!(status = %response.status(), url = %metadata_url, "no metadata document, using conventional paths");
            conventional(&origin)
        }
        Err(e) => {
            debug!(error = %e, url = %metadata_url, "metadata fetch failed, using conventional paths");
            conventional(&origin)
        }
    }
}

fn conventional(origin: &Url) -> AuthResult<AuthEndpoints> {
    let join = |path: &str| {
        origin
            .join(path)
            .map_err(|e| AuthError::config(format!("cannot build {path} endpoint: {e}")))
    };
    Ok(AuthEndpoints {
        authorization: join("/authorize")?,
        token: join("/token")?,
        registration: Some(join("/register")?),
    })
}

fn parse_endpoint(raw: &str, field: &str) -> AuthResult<Url> {
    Url::parse(raw).map_err(|e| AuthError::config(format!("invalid {field} '{raw}': {e}")))
}

fn origin_of(server_url: &str) -> AuthResult<Url> {
    let parsed = Url::parse(server_url)
        .map_err(|e| AuthError::config(format!("invalid server URL '{server_url}': {e}")))?;
    let mut origin = parsed.clone();
    origin.set_path("/");
    origin.set_query(None);
    origin.set_fragment(None);
    Ok(origin)
}
