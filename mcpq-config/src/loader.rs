//! Configuration discovery, parsing and validation

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult, ValidationIssue};
use crate::record::ServerRecord;
use crate::subst::{self, SubstMode};

/// Name of the configuration file at every search location
const CONFIG_FILE: &str = "mcp.json";

/// Loads and validates the server catalogue.
///
/// Search order: explicit path, `MCPQ_CONFIG_PATH`, `./mcp.json`,
/// `$HOME/.mcp.json`, `$HOME/.config/mcpq/mcp.json`. First hit wins.
pub struct ConfigLoader {
    explicit: Option<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { explicit: None }
    }

    /// Use an explicit config path (from `--config`), skipping discovery
    /// of later candidates only if it exists.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            explicit: Some(path.into()),
        }
    }

    /// The candidate paths in search order.
    fn candidates(&self) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(explicit) = &self.explicit {
            paths.push(explicit.clone());
        }
        if let Ok(env_path) = std::env::var("MCPQ_CONFIG_PATH") {
            if !env_path.is_empty() {
                paths.push(PathBuf::from(env_path));
            }
        }
        paths.push(PathBuf::from(CONFIG_FILE));
        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(format!(".{CONFIG_FILE}")));
        }
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("mcpq").join(CONFIG_FILE));
        }
        paths
    }

    /// Find the first existing candidate.
    pub fn discover(&self) -> ConfigResult<PathBuf> {
        let candidates = self.candidates();
        for path in &candidates {
            if path.is_file() {
                debug!(path = %path.display(), "using configuration file");
                return Ok(path.clone());
            }
        }
        Err(ConfigError::NotFound {
            searched: candidates,
        })
    }

    /// Load, validate and substitute the catalogue.
    pub fn load(&self) -> ConfigResult<Catalogue> {
        let path = self.discover()?;
        self.load_file(&path)
    }

    /// Load a specific file (used directly by tests and by `load`).
    pub fn load_file(&self, path: &Path) -> ConfigResult<Catalogue> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut root: Value =
            serde_json::from_str(&content).map_err(|e| ConfigError::InvalidJson {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let issues = validate_structure(&root);
        if !issues.is_empty() {
            return Err(ConfigError::ValidationFailed { issues });
        }

        subst::substitute(&mut root, SubstMode::from_env())?;

        build_catalogue(root)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// The validated, substituted server catalogue. Read-only after load.
#[derive(Debug, Clone)]
pub struct Catalogue {
    servers: BTreeMap<String, ServerRecord>,
}

impl Catalogue {
    pub fn names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn records(&self) -> impl Iterator<Item = &ServerRecord> {
        self.servers.values()
    }

    pub fn get(&self, name: &str) -> ConfigResult<&ServerRecord> {
        self.servers
            .get(name)
            .ok_or_else(|| ConfigError::ServerNotFound {
                name: name.to_string(),
                available: self.names(),
            })
    }
}

fn build_catalogue(root: Value) -> ConfigResult<Catalogue> {
    let mut servers = BTreeMap::new();
    let Value::Object(mut top) = root else {
        unreachable!("structure validated above");
    };
    let Some(Value::Object(entries)) = top.remove("mcpServers") else {
        unreachable!("structure validated above");
    };

    for (name, entry) in entries {
        // Shape errors were caught structurally; anything serde still
        // rejects is reported on the same channel.
        let mut record: ServerRecord =
            serde_json::from_value(entry).map_err(|e| ConfigError::ValidationFailed {
                issues: vec![ValidationIssue {
                    path: format!("mcpServers.{name}"),
                    message: e.to_string(),
                }],
            })?;
        record.name = name.clone();
        servers.insert(name, record);
    }

    Ok(Catalogue { servers })
}

const RECOGNISED_GRANTS: [&str; 2] = ["authorization_code", "client_credentials"];

/// Structural validation over the raw JSON tree, accumulating every issue
/// instead of stopping at the first.
fn validate_structure(root: &Value) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    let Value::Object(top) = root else {
        issues.push(issue("$", "top level must be an object"));
        return issues;
    };

    let Some(servers) = top.get("mcpServers") else {
        issues.push(issue("$", "missing required key 'mcpServers'"));
        return issues;
    };
    let Value::Object(servers) = servers else {
        issues.push(issue("mcpServers", "must be an object"));
        return issues;
    };

    for (name, entry) in servers {
        let path = format!("mcpServers.{name}");
        let Value::Object(entry) = entry else {
            issues.push(issue(&path, "must be an object"));
            continue;
        };

        let has_command = entry.contains_key("command");
        let has_url = entry.contains_key("url");
        if has_command == has_url {
            issues.push(issue(
                &path,
                "must have exactly one of 'command' or 'url'",
            ));
        }

        if has_command {
            expect_string(entry, "command", &path, &mut issues);
            expect_string_array(entry, "args", &path, &mut issues);
            expect_string_map(entry, "env", &path, &mut issues);
            if expect_string(entry, "cwd", &path, &mut issues) {
                if let Some(Value::String(cwd)) = entry.get("cwd") {
                    if !std::path::Path::new(cwd).is_absolute() {
                        issues.push(issue(&format!("{path}.cwd"), "must be an absolute path"));
                    }
                }
            }
        }

        if has_url {
            if expect_string(entry, "url", &path, &mut issues) {
                if let Some(Value::String(url)) = entry.get("url") {
                    if url::Url::parse(url).is_err() {
                        issues.push(issue(&format!("{path}.url"), "must be an absolute URL"));
                    }
                }
            }
            expect_string_map(entry, "headers", &path, &mut issues);
            if let Some(timeout) = entry.get("timeout") {
                if !timeout.is_u64() {
                    issues.push(issue(
                        &format!("{path}.timeout"),
                        "must be a non-negative integer (seconds)",
                    ));
                }
            }
            if let Some(oauth) = entry.get("oauth") {
                validate_oauth(oauth, &format!("{path}.oauth"), &mut issues);
            }
        } else if entry.contains_key("oauth") {
            issues.push(issue(
                &format!("{path}.oauth"),
                "oauth is only valid for http servers",
            ));
        }

        expect_string_array(entry, "allowedTools", &path, &mut issues);
        expect_string_array(entry, "disabledTools", &path, &mut issues);
    }

    issues
}

fn validate_oauth(
    oauth: &Value,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    let Value::Object(oauth) = oauth else {
        issues.push(issue(path, "must be an object"));
        return;
    };

    let grant = match oauth.get("grantType") {
        None => "authorization_code",
        Some(Value::String(grant)) if RECOGNISED_GRANTS.contains(&grant.as_str()) => grant,
        Some(_) => {
            issues.push(issue(
                &format!("{path}.grantType"),
                "must be 'authorization_code' or 'client_credentials'",
            ));
            return;
        }
    };

    if grant == "client_credentials" {
        for key in ["clientId", "clientSecret"] {
            match oauth.get(key) {
                Some(Value::String(s)) if !s.is_empty() => {}
                _ => issues.push(issue(
                    &format!("{path}.{key}"),
                    "required for the client_credentials grant",
                )),
            }
        }
    }

    if let Some(port) = oauth.get("callbackPort") {
        if !is_valid_port(port) {
            issues.push(issue(
                &format!("{path}.callbackPort"),
                "must be an integer in 1-65535",
            ));
        }
    }
    if let Some(ports) = oauth.get("callbackPorts") {
        match ports {
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    // Port 0 is allowed in the explicit list: it asks the
                    // OS to choose.
                    if !item.as_u64().is_some_and(|p| p <= 65535) {
                        issues.push(issue(
                            &format!("{path}.callbackPorts[{i}]"),
                            "must be an integer in 0-65535",
                        ));
                    }
                }
            }
            _ => issues.push(issue(&format!("{path}.callbackPorts"), "must be an array")),
        }
    }
}

fn is_valid_port(value: &Value) -> bool {
    value.as_u64().is_some_and(|p| (1..=65535).contains(&p))
}

fn issue(path: &str, message: &str) -> ValidationIssue {
    ValidationIssue {
        path: path.to_string(),
        message: message.to_string(),
    }
}

/// Check an optional string field; returns true when present and valid.
fn expect_string(
    entry: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) -> bool {
    match entry.get(key) {
        None => false,
        Some(Value::String(_)) => true,
        Some(_) => {
            issues.push(issue(&format!("{path}.{key}"), "must be a string"));
            false
        }
    }
}

fn expect_string_array(
    entry: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    match entry.get(key) {
        None => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                if !item.is_string() {
                    issues.push(issue(&format!("{path}.{key}[{i}]"), "must be a string"));
                }
            }
        }
        Some(_) => issues.push(issue(&format!("{path}.{key}"), "must be an array of strings")),
    }
}

fn expect_string_map(
    entry: &serde_json::Map<String, Value>,
    key: &str,
    path: &str,
    issues: &mut Vec<ValidationIssue>,
) {
    match entry.get(key) {
        None => {}
        Some(Value::Object(map)) => {
            for (k, v) in map {
                if !v.is_string() {
                    issues.push(issue(&format!("{path}.{key}.{k}"), "must be a string"));
                }
            }
        }
        Some(_) => issues.push(issue(&format!("{path}.{key}"), "must be an object of strings")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_is_idempotent() {
        let file = write_config(
            r#"{"mcpServers": {
                "fs": {"command": "server-fs", "args": ["/tmp"]},
                "gh": {"url": "https://mcp.example.com/mcp"}
            }}"#,
        );
        let loader = ConfigLoader::new();
        let first = loader.load_file(file.path()).unwrap();
        let second = loader.load_file(file.path()).unwrap();
        assert_eq!(first.names(), second.names());
        for name in first.names() {
            assert_eq!(first.get(&name).unwrap(), second.get(&name).unwrap());
        }
    }

    #[test]
    fn test_exactly_one_transport_enforced() {
        let both = write_config(
            r#"{"mcpServers": {"x": {"command": "c", "url": "https://e.com"}}}"#,
        );
        let neither = write_config(r#"{"mcpServers": {"x": {"args": []}}}"#);
        let loader = ConfigLoader::new();
        for file in [&both, &neither] {
            match loader.load_file(file.path()).unwrap_err() {
                ConfigError::ValidationFailed { issues } => {
                    assert!(issues.iter().any(|i| i.message.contains("exactly one")));
                    assert!(issues.iter().any(|i| i.path == "mcpServers.x"));
                }
                other => panic!("expected ValidationFailed, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_invalid_json_reported_with_parser_message() {
        let file = write_config("{not json");
        match ConfigLoader::new().load_file(file.path()).unwrap_err() {
            ConfigError::InvalidJson { message, .. } => assert!(!message.is_empty()),
            other => panic!("expected InvalidJson, got {other:?}"),
        }
    }

    #[test]
    fn test_client_credentials_requires_id_and_secret() {
        let file = write_config(
            r#"{"mcpServers": {"x": {
                "url": "https://e.com/mcp",
                "oauth": {"grantType": "client_credentials", "clientId": "abc"}
            }}}"#,
        );
        match ConfigLoader::new().load_file(file.path()).unwrap_err() {
            ConfigError::ValidationFailed { issues } => {
                assert!(issues
                    .iter()
                    .any(|i| i.path == "mcpServers.x.oauth.clientSecret"));
            }
            other => panic!("expected ValidationFailed, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_grant_type_rejected() {
        let file = write_config(
            r#"{"mcpServers": {"x": {
                "url": "https://e.com/mcp",
                "oauth": {"grantType": "implicit"}
            }}}"#,
        );
        assert!(matches!(
            ConfigLoader::new().load_file(file.path()).unwrap_err(),
            ConfigError::ValidationFailed { .. }
        ));
    }

    #[test]
    fn test_callback_port_range_checked() {
        let file = write_config(
            r#"{"mcpServers": {"x": {
                "url": "https://e.com/mcp",
                "oauth": {"callbackPort": 0}
            }}}"#,
        );
        assert!(matches!(
            ConfigLoader::new().load_file(file.path()).unwrap_err(),
            ConfigError::ValidationFailed { .. }
        ));
    }

    #[test]
    fn test_strict_env_failure_names_the_variable() {
        let file = write_config(
            r#"{"mcpServers": {"x": {"command": "c", "env": {"KEY": "${MCPQ_TEST_LOADER_UNSET}"}}}}"#,
        );
        match ConfigLoader::new().load_file(file.path()).unwrap_err() {
            ConfigError::MissingEnvVars { names } => {
                assert_eq!(names, vec!["MCPQ_TEST_LOADER_UNSET".to_string()]);
            }
            other => panic!("expected MissingEnvVars, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_server_lists_available() {
        let file = write_config(r#"{"mcpServers": {"fs": {"command": "c"}}}"#);
        let catalogue = ConfigLoader::new().load_file(file.path()).unwrap();
        match catalogue.get("nope").unwrap_err() {
            ConfigError::ServerNotFound { available, .. } => {
                assert_eq!(available, vec!["fs".to_string()]);
            }
            other => panic!("expected ServerNotFound, got {other:?}"),
        }
    }

    #[test]
    fn test_discovery_reports_searched_paths() {
        let loader = ConfigLoader::with_path("/definitely/not/here/mcp.json");
        // Discovery may still find a real user config in later candidates;
        // only assert on the explicit-path-missing case shape.
        if let Err(ConfigError::NotFound { searched }) = loader.discover() {
            assert!(searched
                .iter()
                .any(|p| p.ends_with("not/here/mcp.json") || p.ends_with("here/mcp.json")));
            assert!(searched.len() >= 2);
        }
    }
}
