//! File-backed credential store
//!
//! Layout under the per-user root (`$MCPQ_HOME` or `~/.mcpq`):
//!
//! ```text
//! <root>/tokens/<sanitised>.json     OAuth tokens
//! <root>/clients/<sanitised>.json    dynamically registered client info
//! <root>/verifiers/<sanitised>.txt   PKCE code verifier
//! ```
//!
//! Directories are created at 0700 and files written at 0600. Reads are
//! forgiving: a missing or malformed file is treated as absent. Writes are
//! strict and go through a temp file plus rename so a concurrent reader
//! never observes a torn payload; concurrent writers follow
//! last-writer-wins per file.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use mcpq_config::sanitize_name;

use crate::error::{AuthError, AuthResult};

/// Expiry slack: tokens within this window of expiring count as expired.
const EXPIRY_SKEW_SECS: i64 = 60;

/// Persisted OAuth tokens for one server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredTokens {
    pub access_token: String,
    pub token_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl StoredTokens {
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() + ChronoDuration::seconds(EXPIRY_SKEW_SECS) >= at,
            None => false,
        }
    }
}

/// Persisted dynamically registered client information.
///
/// `redirect_uris` records what the client was registered against; a
/// mismatch with the provider's current redirect URL invalidates the
/// record, because the authorization server would reject the redirect.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StoredClient {
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub redirect_uris: Vec<String>,
}

/// Which credential files an invalidation removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidationScope {
    All,
    Client,
    Tokens,
    Verifier,
}

/// Per-user credential tree, keyed by server name.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    root: PathBuf,
}

impl CredentialStore {
    /// Store rooted at `$MCPQ_HOME`, or `~/.mcpq` when unset.
    pub fn from_env() -> AuthResult<Self> {
        let root = match std::env::var("MCPQ_HOME") {
            Ok(home) if !home.is_empty() => PathBuf::from(home),
            _ => dirs::home_dir()
                .ok_or_else(|| AuthError::storage("cannot determine home directory"))?
                .join(".mcpq"),
        };
        Ok(Self { root })
    }

    /// Store rooted at an explicit directory (tests).
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -- tokens ----------------------------------------------------------

    pub fn load_tokens(&self, server: &str) -> Option<StoredTokens> {
        self.read_json(self.tokens_path(server))
    }

    pub fn save_tokens(&self, server: &str, tokens: &StoredTokens) -> AuthResult<()> {
        self.write_json(self.tokens_path(server), tokens)
    }

    // -- client info -----------------------------------------------------

    pub fn load_client(&self, server: &str) -> Option<StoredClient> {
        self.read_json(self.client_path(server))
    }

    pub fn save_client(&self, server: &str, client: &StoredClient) -> AuthResult<()> {
        self.write_json(self.client_path(server), client)
    }

    // -- PKCE verifier ---------------------------------------------------

    pub fn load_verifier(&self, server: &str) -> Option<String> {
        let raw = fs::read_to_string(self.verifier_path(server)).ok()?;
        let trimmed = raw.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }

    pub fn save_verifier(&self, server: &str, verifier: &str) -> AuthResult<()> {
        self.write_bytes(self.verifier_path(server), verifier.as_bytes())
    }

    // -- invalidation ----------------------------------------------------

    /// Delete exactly the files covered by `scope`; absent files are fine.
    pub fn invalidate(&self, server: &str, scope: InvalidationScope) -> AuthResult<()> {
        let targets: Vec<PathBuf> = match scope {
            InvalidationScope::All => vec![
                self.tokens_path(server),
                self.client_path(server),
                self.verifier_path(server),
            ],
            InvalidationScope::Client => vec![self.client_path(server)],
            InvalidationScope::Tokens => vec![self.tokens_path(server)],
            InvalidationScope::Verifier => vec![self.verifier_path(server)],
        };
        for path in targets {
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "removed credential file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(AuthError::storage(format!(
                        "failed to remove {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(())
    }

    // -- paths -----------------------------------------------------------

    fn tokens_path(&self, server: &str) -> PathBuf {
        self.root
            .join("tokens")
            .join(format!("{}.json", sanitize_name(server)))
    }

    fn client_path(&self, server: &str) -> PathBuf {
        self.root
            .join("clients")
            .join(format!("{}.json", sanitize_name(server)))
    }

    fn verifier_path(&self, server: &str) -> PathBuf {
        self.root
            .join("verifiers")
            .join(format!("{}.txt", sanitize_name(server)))
    }

    // -- io helpers ------------------------------------------------------

    fn read_json<T: DeserializeOwned>(&self, path: PathBuf) -> Option<T> {
        let raw = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "ignoring malformed credential file");
                None
            }
        }
    }

    fn write_json<T: Serialize>(&self, path: PathBuf, value: &T) -> AuthResult<()> {
        let payload = serde_json::to_vec_pretty(value)
            .map_err(|e| AuthError::storage(format!("serialisation failed: {e}")))?;
        self.write_bytes(path, &payload)
    }

    fn write_bytes(&self, path: PathBuf, payload: &[u8]) -> AuthResult<()> {
        let dir = path
            .parent()
            .ok_or_else(|| AuthError::storage("credential path has no parent"))?;
        create_private_dir(dir)?;

        let tmp = path.with_extension(format!("tmp.{}", std::process::id()));
        fs::write(&tmp, payload)
            .map_err(|e| AuthError::storage(format!("failed to write {}: {e}", tmp.display())))?;
        restrict_file(&tmp)?;
        fs::rename(&tmp, &path)
            .map_err(|e| AuthError::storage(format!("failed to rename into {}: {e}", path.display())))?;
        Ok(())
    }
}

fn create_private_dir(dir: &Path) -> AuthResult<()> {
    fs::create_dir_all(dir)
        .map_err(|e| AuthError::storage(format!("failed to create {}: {e}", dir.display())))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| AuthError::storage(format!("failed to chmod {}: {e}", dir.display())))?;
    }
    Ok(())
}

fn restrict_file(path: &Path) -> AuthResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))
            .map_err(|e| AuthError::storage(format!("failed to chmod {}: {e}", path.display())))?;
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

    fn tokens() -> StoredTokens {
        StoredTokens {
            access_token: "at-123".to_string(),
            token_type: "Bearer".to_string(),
            refresh_token: Some("rt-456".to_string()),
            expires_at: None,
            scope: None,
        }
    }

    #[test]
    fn test_roundtrip_tokens_client_verifier() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());

        assert!(store.load_tokens("x").is_none());
        store.save_tokens("x", &tokens()).unwrap();
        assert_eq!(store.load_tokens("x").unwrap(), tokens());

        let client = StoredClient {
            client_id: "cid".to_string(),
            client_secret: None,
            redirect_uris: vec!["http://localhost:8090/callback".to_string()],
        };
        store.save_client("x", &client).unwrap();
        assert_eq!(store.load_client("x").unwrap(), client);

        store.save_verifier("x", "verifier-value").unwrap();
        assert_eq!(store.load_verifier("x").unwrap(), "verifier-value");
    }

    #[test]
    fn test_malformed_file_reads_as_absent() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        store.save_tokens("x", &tokens()).unwrap();

        let path = store.tokens_path("x");
        std::fs::write(&path, "{not json").unwrap();
        assert!(store.load_tokens("x").is_none());
    }

    #[test]
    fn test_invalidation_scopes_are_exact() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        let client = StoredClient {
            client_id: "cid".to_string(),
            client_secret: None,
            redirect_uris: vec![],
        };

        let seed = |store: &CredentialStore| {
            store.save_tokens("x", &tokens()).unwrap();
            store.save_client("x", &client).unwrap();
            store.save_verifier("x", "v").unwrap();
        };

        seed(&store);
        store.invalidate("x", InvalidationScope::Tokens).unwrap();
        assert!(store.load_tokens("x").is_none());
        assert!(store.load_client("x").is_some());
        assert!(store.load_verifier("x").is_some());

        seed(&store);
        store.invalidate("x", InvalidationScope::Client).unwrap();
        assert!(store.load_tokens("x").is_some());
        assert!(store.load_client("x").is_none());
        assert!(store.load_verifier("x").is_some());

        seed(&store);
        store.invalidate("x", InvalidationScope::Verifier).unwrap();
        assert!(store.load_verifier("x").is_none());
        assert!(store.load_tokens("x").is_some());

        seed(&store);
        store.invalidate("x", InvalidationScope::All).unwrap();
        assert!(store.load_tokens("x").is_none());
        assert!(store.load_client("x").is_none());
        assert!(store.load_verifier("x").is_none());

        // Invalidating absent files is not an error
        store.invalidate("x", InvalidationScope::All).unwrap();
    }

    #[test]
    fn test_invalidation_does_not_cross_servers() {
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        store.save_tokens("a", &tokens()).unwrap();
        store.save_tokens("b", &tokens()).unwrap();

        store.invalidate("a", InvalidationScope::All).unwrap();
        assert!(store.load_tokens("a").is_none());
        assert!(store.load_tokens("b").is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_permissions_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let store = CredentialStore::at(dir.path());
        store.save_tokens("x", &tokens()).unwrap();

        let file_mode = std::fs::metadata(store.tokens_path("x"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(file_mode & 0o777, 0o600);

        let dir_mode = std::fs::metadata(dir.path().join("tokens"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(dir_mode & 0o777, 0o700);
    }

    #[test]
    fn test_expiry_includes_skew() {
        let mut t = tokens();
        assert!(!t.is_expired());

        t.expires_at = Some(Utc::now() + ChronoDuration::seconds(30));
        assert!(t.is_expired(), "inside the 60s skew window");

        t.expires_at = Some(Utc::now() + ChronoDuration::seconds(600));
        assert!(!t.is_expired());
    }
}
