//! Transport factory
//!
//! Pattern-matched construction over the two transport kinds. For stdio
//! the child's stderr is captured twice over: a bounded tail folded into
//! connect failures, and a live tee to our own stderr so authorization
//! prompts from the child reach the user. For HTTP the first connect may
//! raise the OAuth-required signal; the factory then drives the provider
//! flow and opens a *new* transport with the fresh tokens, because the
//! initial one has already been started and cannot be reused.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rmcp::transport::streamable_http_client::StreamableHttpClientTransportConfig;
use rmcp::transport::{ConfigureCommandExt, StreamableHttpClientTransport, TokioChildProcess};
use rmcp::ServiceExt;
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::debug;

use mcpq_auth::{AuthMode, CredentialStore, OAuthProvider};
use mcpq_config::{HttpConfig, ServerRecord, StdioConfig, Transport};

use crate::error::{TransportError, TransportResult};
use crate::session::McpSession;

/// Lines of child stderr folded into a connect failure.
const STDERR_TAIL_LINES: usize = 20;

/// Default global request deadline: 30 minutes.
const DEFAULT_TIMEOUT_SECS: u64 = 1800;

/// The operation-wide deadline from `MCPQ_TIMEOUT` (seconds).
pub fn global_timeout() -> Duration {
    std::env::var("MCPQ_TIMEOUT")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
}

/// Builds sessions for server records, wiring the credential store and
/// OAuth provider in for HTTP servers.
pub struct TransportFactory {
    store: CredentialStore,
    mode: AuthMode,
}

impl TransportFactory {
    pub fn new(store: CredentialStore, mode: AuthMode) -> Self {
        Self { store, mode }
    }

    pub async fn connect(&self, record: &ServerRecord) -> TransportResult<McpSession> {
        match &record.transport {
            Transport::Stdio(stdio) => connect_stdio(&record.name, stdio).await,
            Transport::Http(http) => self.connect_http(record, http).await,
        }
    }

    async fn connect_http(
        &self,
        record: &ServerRecord,
        http: &HttpConfig,
    ) -> TransportResult<McpSession> {
        let provider = http.oauth.clone().map(|oauth| {
            OAuthProvider::new(
                record.name.clone(),
                http.url.clone(),
                oauth,
                self.store.clone(),
                self.mode,
            )
        });

        let bearer = match &provider {
            Some(provider) => provider
                .stored_access_token()
                .await?
                .map(|tokens| tokens.access_token),
            None => None,
        };

        match connect_http_once(&record.name, http, bearer.as_deref()).await {
            Ok(session) => Ok(session),
            Err(e) if provider.is_some() && e.is_auth_required_signal() => {
                debug!(server = %record.name, "server demands authorization, starting OAuth flow");
                let provider = provider.expect("checked above");
                let tokens = provider.obtain_tokens().await?;
                connect_http_once(&record.name, http, Some(&tokens.access_token)).await
            }
            Err(e) => Err(e),
        }
    }
}

/// Convenience wrapper for one-shot connects.
pub async fn connect(
    record: &ServerRecord,
    store: CredentialStore,
    mode: AuthMode,
) -> TransportResult<McpSession> {
    TransportFactory::new(store, mode).connect(record).await
}

async fn connect_stdio(server: &str, stdio: &StdioConfig) -> TransportResult<McpSession> {
    let command = Command::new(&stdio.command).configure(|cmd| {
        cmd.args(&stdio.args);
        for (key, value) in &stdio.env {
            cmd.env(key, value);
        }
        if let Some(cwd) = &stdio.cwd {
            cmd.current_dir(cwd);
        }
        cmd.kill_on_drop(true);
    });

    let (transport, stderr) = TokioChildProcess::builder(command)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| {
            TransportError::connection(server, format!("failed to spawn '{}': {e}", stdio.command))
        })?;

    let tail = StderrTail::spawn(server.to_string(), stderr);

    match ().serve(transport).await {
        Ok(running) => Ok(McpSession::new(
            server.to_string(),
            running,
            global_timeout(),
        )),
        Err(e) => {
            // Give the child a beat to flush its dying words.
            tokio::time::sleep(Duration::from_millis(100)).await;
            Err(TransportError::connection(server, tail.fold_into(e.to_string())))
        }
    }
}

async fn connect_http_once(
    server: &str,
    http: &HttpConfig,
    bearer: Option<&str>,
) -> TransportResult<McpSession> {
    let mut headers = HeaderMap::new();
    for (key, value) in &http.headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| TransportError::connection(server, format!("invalid header '{key}': {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| TransportError::connection(server, format!("invalid value for header '{key}': {e}")))?;
        headers.insert(name, value);
    }

    let mut builder = reqwest::Client::builder().default_headers(headers);
    if let Some(seconds) = http.timeout {
        builder = builder.timeout(Duration::from_secs(seconds));
    }
    let client = builder
        .build()
        .map_err(|e| TransportError::connection(server, format!("http client: {e}")))?;

    let mut config = StreamableHttpClientTransportConfig::with_uri(http.url.clone());
    if let Some(token) = bearer {
        config = config.auth_header(token.to_string());
    }

    let transport = StreamableHttpClientTransport::with_client(client, config);
    let running = ()
        .serve(transport)
        .await
        .map_err(|e| TransportError::connection(server, e.to_string()))?;

    Ok(McpSession::new(
        server.to_string(),
        running,
        global_timeout(),
    ))
}

/// Bounded capture of a child's stderr, teed live to our own stderr.
struct StderrTail {
    lines: Arc<Mutex<VecDeque<String>>>,
}

impl StderrTail {
    fn spawn(server: String, stderr: Option<tokio::process::ChildStderr>) -> Self {
        let lines = Arc::new(Mutex::new(VecDeque::with_capacity(STDERR_TAIL_LINES)));
        if let Some(stderr) = stderr {
            let buffer = Arc::clone(&lines);
            tokio::spawn(async move {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    eprintln!("[{server}] {line}");
                    let mut buffer = buffer.lock().expect("lock poisoned");
                    if buffer.len() == STDERR_TAIL_LINES {
                        buffer.pop_front();
                    }
                    buffer.push_back(line);
                }
            });
        }
        Self { lines }
    }

    /// Append the buffered tail to a connect-failure message.
    fn fold_into(&self, message: String) -> String {
        let buffer = self.lines.lock().expect("lock poisoned");
        if buffer.is_empty() {
            return message;
        }
        let tail: Vec<String> = buffer.iter().map(|line| format!("  {line}")).collect();
        format!("{message}\nserver stderr:\n{}", tail.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn stdio_record(command: &str, args: &[&str]) -> ServerRecord {
        ServerRecord {
            name: "test".to_string(),
            transport: Transport::Stdio(StdioConfig {
                command: command.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
                env: HashMap::new(),
                cwd: None,
            }),
            allowed_tools: vec![],
            disabled_tools: vec![],
        }
    }

    #[test]
    fn test_global_timeout_env_override() {
        std::env::set_var("MCPQ_TIMEOUT", "90");
        assert_eq!(global_timeout(), Duration::from_secs(90));
        std::env::remove_var("MCPQ_TIMEOUT");
        assert_eq!(global_timeout(), Duration::from_secs(1800));
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let record = stdio_record("/nonexistent/mcpq-test-binary", &[]);
        let store = CredentialStore::at(tempfile::tempdir().unwrap().path());
        let err = connect(&record, store, AuthMode::NonInteractive)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "SERVER_CONNECTION_FAILED");
    }

    #[tokio::test]
    async fn test_connect_failure_carries_stderr_tail() {
        let record = stdio_record("sh", &["-c", "echo fatal: bad credentials >&2; exit 1"]);
        let store = CredentialStore::at(tempfile::tempdir().unwrap().path());

        let result = tokio::time::timeout(
            Duration::from_secs(15),
            connect(&record, store, AuthMode::NonInteractive),
        )
        .await
        .expect("connect should fail promptly");

        let err = result.unwrap_err();
        let message = err.to_string();
        assert!(
            message.contains("bad credentials"),
            "stderr tail missing from: {message}"
        );
    }

    #[test]
    fn test_stderr_tail_is_bounded() {
        let tail = StderrTail {
            lines: Arc::new(Mutex::new(VecDeque::new())),
        };
        {
            let mut buffer = tail.lines.lock().unwrap();
            for i in 0..50 {
                if buffer.len() == STDERR_TAIL_LINES {
                    buffer.pop_front();
                }
                buffer.push_back(format!("line {i}"));
            }
        }
        let folded = tail.fold_into("connect failed".to_string());
        assert!(folded.contains("line 49"));
        assert!(!folded.contains("line 0\n"));
    }
}
