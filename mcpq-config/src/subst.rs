//! `${VAR}` environment substitution
//!
//! Substitution runs after structural validation and before typed records
//! are handed out, over every string leaf of the JSON tree. Strict mode
//! (the default) collects *all* unset names and aborts the load; lax mode
//! (`MCPQ_STRICT_ENV=false`) expands them to the empty string and warns.

use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::warn;

use crate::error::{ConfigError, ConfigResult};

/// Substitution mode, resolved from `MCPQ_STRICT_ENV`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubstMode {
    Strict,
    Lax,
}

impl SubstMode {
    /// Read the mode from the environment; anything other than an explicit
    /// `false`/`0` keeps the strict default.
    pub fn from_env() -> Self {
        match std::env::var("MCPQ_STRICT_ENV") {
            Ok(v) if v == "false" || v == "0" => SubstMode::Lax,
            _ => SubstMode::Strict,
        }
    }
}

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex"))
}

/// Expand `${VAR}` references in every string leaf of `value`, in place.
pub fn substitute(value: &mut Value, mode: SubstMode) -> ConfigResult<()> {
    let mut missing = BTreeSet::new();
    walk(value, &mut missing);

    if !missing.is_empty() {
        match mode {
            SubstMode::Strict => {
                return Err(ConfigError::MissingEnvVars {
                    names: missing.into_iter().collect(),
                });
            }
            SubstMode::Lax => {
                for name in &missing {
                    warn!("environment variable {} is unset, expanded to empty string", name);
                }
            }
        }
    }
    Ok(())
}

fn walk(value: &mut Value, missing: &mut BTreeSet<String>) {
    match value {
        Value::String(s) => {
            if let Some(expanded) = expand(s, missing) {
                *s = expanded;
            }
        }
        Value::Array(items) => {
            for item in items {
                walk(item, missing);
            }
        }
        Value::Object(map) => {
            for (_, item) in map.iter_mut() {
                walk(item, missing);
            }
        }
        _ => {}
    }
}

/// Returns the expanded string, or None when `s` contains no references.
fn expand(s: &str, missing: &mut BTreeSet<String>) -> Option<String> {
    if !s.contains("${") {
        return None;
    }
    let expanded = var_pattern().replace_all(s, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match std::env::var(name) {
            Ok(value) => value,
            Err(_) => {
                missing.insert(name.to_string());
                String::new()
            }
        }
    });
    Some(expanded.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_substitutes_into_nested_leaves() {
        std::env::set_var("MCPQ_TEST_TOKEN", "s3cret");
        let mut value = json!({
            "mcpServers": {
                "gh": {
                    "url": "https://example.com",
                    "headers": {"Authorization": "Bearer ${MCPQ_TEST_TOKEN}"}
                }
            }
        });
        substitute(&mut value, SubstMode::Strict).unwrap();
        assert_eq!(
            value["mcpServers"]["gh"]["headers"]["Authorization"],
            "Bearer s3cret"
        );
        std::env::remove_var("MCPQ_TEST_TOKEN");
    }

    #[test]
    fn test_strict_mode_collects_all_unset_names() {
        let mut value = json!({
            "a": "${MCPQ_TEST_UNSET_ONE}",
            "b": ["${MCPQ_TEST_UNSET_TWO}", "${MCPQ_TEST_UNSET_ONE}"]
        });
        let err = substitute(&mut value, SubstMode::Strict).unwrap_err();
        match err {
            ConfigError::MissingEnvVars { names } => {
                assert_eq!(
                    names,
                    vec![
                        "MCPQ_TEST_UNSET_ONE".to_string(),
                        "MCPQ_TEST_UNSET_TWO".to_string()
                    ]
                );
            }
            other => panic!("expected MissingEnvVars, got {other:?}"),
        }
    }

    #[test]
    fn test_lax_mode_expands_to_empty() {
        let mut value = json!({"key": "x${MCPQ_TEST_UNSET_THREE}y"});
        substitute(&mut value, SubstMode::Lax).unwrap();
        assert_eq!(value["key"], "xy");
    }

    #[test]
    fn test_literal_dollar_without_braces_is_untouched() {
        let mut value = json!({"key": "$HOME and ${not a var"});
        substitute(&mut value, SubstMode::Strict).unwrap();
        assert_eq!(value["key"], "$HOME and ${not a var");
    }
}
