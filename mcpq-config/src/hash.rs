//! Stable per-record config hash
//!
//! The daemon layer uses this hash as its sole staleness signal: a daemon
//! whose descriptor carries a different hash than the current record is
//! killed and respawned. The hash must therefore be independent of JSON
//! key order, so the record is serialised canonically (object keys sorted
//! recursively) before hashing. serde_json's own map ordering depends on
//! feature flags other crates in the dependency graph may enable, which
//! is why the canonical form is built by hand.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;

use crate::record::ServerRecord;

/// SHA-256 over the canonical JSON of the record, truncated to 16 hex chars.
pub fn config_hash(record: &ServerRecord) -> String {
    let value = serde_json::to_value(record).unwrap_or(Value::Null);
    let mut canonical = String::new();
    write_canonical(&value, &mut canonical);

    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        let _ = write!(hex, "{:02x}", byte);
    }
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            out.push('{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key).expect("string serialises"));
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        // Scalars already have a single canonical rendering
        other => {
            out.push_str(&other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{StdioConfig, Transport};
    use std::collections::HashMap;

    fn stdio_record(command: &str, args: &[&str]) -> ServerRecord {
        ServerRecord {
            name: "fs".to_string(),
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
    fn test_hash_is_16_hex_chars() {
        let hash = config_hash(&stdio_record("npx", &["server"]));
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hash_is_deterministic() {
        let a = config_hash(&stdio_record("npx", &["server"]));
        let b = config_hash(&stdio_record("npx", &["server"]));
        assert_eq!(a, b);
    }

    #[test]
    fn test_any_field_change_flips_the_hash() {
        let base = config_hash(&stdio_record("npx", &["server"]));
        assert_ne!(base, config_hash(&stdio_record("node", &["server"])));
        assert_ne!(base, config_hash(&stdio_record("npx", &["server", "-v"])));

        let mut with_env = stdio_record("npx", &["server"]);
        if let Transport::Stdio(stdio) = &mut with_env.transport {
            stdio.env.insert("DEBUG".to_string(), "1".to_string());
        }
        assert_ne!(base, config_hash(&with_env));
    }

    #[test]
    fn test_canonical_form_sorts_keys() {
        let a: Value = serde_json::from_str(r#"{"b": 1, "a": {"d": 2, "c": 3}}"#).unwrap();
        let mut out = String::new();
        write_canonical(&a, &mut out);
        assert_eq!(out, r#"{"a":{"c":3,"d":2},"b":1}"#);
    }
}
